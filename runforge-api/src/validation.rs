/// Task input validation
///
/// The name character class and the script deny-list are business rules
/// rather than shape checks, so they live here instead of in derive
/// attributes. All checks return the offending reason; handlers collect
/// them into field-level validation errors.

/// Characters never allowed in task names
pub const BANNED_NAME_CHARS: &str = "<>\"'&;|`$(){}[]\\/:*?\n\r\t";

/// Maximum task name length
pub const MAX_NAME_LENGTH: usize = 255;

/// Priority bounds
pub const MIN_PRIORITY: i32 = 0;
pub const MAX_PRIORITY: i32 = 10;

/// Timeout bounds in seconds
pub const MIN_TIMEOUT_SECONDS: i32 = 1;
pub const MAX_TIMEOUT_SECONDS: i32 = 3600;

/// Validates a task name: 1-255 characters, none from the banned set
pub fn validate_task_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("name must not be empty".to_string());
    }
    if name.len() > MAX_NAME_LENGTH {
        return Err(format!(
            "name must be at most {} characters",
            MAX_NAME_LENGTH
        ));
    }
    if let Some(bad) = name.chars().find(|c| BANNED_NAME_CHARS.contains(*c)) {
        return Err(format!("name contains forbidden character: {:?}", bad));
    }
    Ok(())
}

/// Validates script content: non-empty, bounded, and free of deny-listed
/// substrings (checked case-insensitively after trimming)
pub fn validate_script_content(
    script: &str,
    deny_list: &[String],
    max_bytes: usize,
) -> Result<(), String> {
    let trimmed = script.trim();
    if trimmed.is_empty() {
        return Err("script_content must not be empty".to_string());
    }
    if script.len() > max_bytes {
        return Err(format!(
            "script_content must be at most {} bytes",
            max_bytes
        ));
    }

    let lowered = trimmed.to_lowercase();
    for entry in deny_list {
        if !entry.is_empty() && lowered.contains(&entry.to_lowercase()) {
            return Err(format!(
                "script_content contains forbidden pattern: {}",
                entry
            ));
        }
    }
    Ok(())
}

/// Validates the scheduling priority
pub fn validate_priority(priority: i32) -> Result<(), String> {
    if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&priority) {
        return Err(format!(
            "priority must be between {} and {}",
            MIN_PRIORITY, MAX_PRIORITY
        ));
    }
    Ok(())
}

/// Validates the per-execution timeout
pub fn validate_timeout_seconds(timeout: i32) -> Result<(), String> {
    if !(MIN_TIMEOUT_SECONDS..=MAX_TIMEOUT_SECONDS).contains(&timeout) {
        return Err(format!(
            "timeout_seconds must be between {} and {}",
            MIN_TIMEOUT_SECONDS, MAX_TIMEOUT_SECONDS
        ));
    }
    Ok(())
}

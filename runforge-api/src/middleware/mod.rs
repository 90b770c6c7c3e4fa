/// HTTP middleware
///
/// - `security`: OWASP-ish response headers on every response
/// - `rate_limit`: in-process sliding-window rate limiting

pub mod rate_limit;
pub mod security;

/// Sliding-window rate limiting
///
/// In-process limiter: one timestamp log per `(identity, scope)` pair in a
/// map behind a read/write lock. The lock is only ever held for the
/// synchronous window arithmetic, never across I/O. Identities are the
/// authenticated user id when present, the client IP otherwise.
///
/// Stale entries are dropped by [`RateLimiter::sweep`], which the server
/// runs on a periodic background task.
///
/// # Response
///
/// An exhausted budget yields `429` with body
/// `{"error": "...", "retry_after_seconds": n}` and a `Retry-After`
/// header.

use crate::error::ApiError;
use axum::{
    extract::{ConnectInfo, Request},
    middleware::Next,
    response::Response,
};
use runforge_shared::auth::middleware::AuthContext;
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

/// One scope's request budget
#[derive(Debug, Clone, Copy)]
pub struct RateLimitRule {
    /// Scope name; part of the bucket key so scopes never interfere
    pub scope: &'static str,

    /// Requests allowed per window
    pub limit: u32,

    /// Window length
    pub window: Duration,
}

impl RateLimitRule {
    /// An hourly budget, the shape every endpoint group here uses
    pub fn per_hour(scope: &'static str, limit: u32) -> Self {
        RateLimitRule {
            scope,
            limit,
            window: Duration::from_secs(3600),
        }
    }
}

/// Sliding-window rate limiter
pub struct RateLimiter {
    windows: RwLock<HashMap<(String, &'static str), VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        RateLimiter {
            windows: RwLock::new(HashMap::new()),
        }
    }

    /// Records one request against `key` under `rule`
    ///
    /// Returns `Err(retry_after_seconds)` when the budget is exhausted.
    pub fn check(&self, key: &str, rule: &RateLimitRule) -> Result<(), u64> {
        let now = Instant::now();
        let mut windows = self.windows.write().unwrap_or_else(|e| e.into_inner());
        let log = windows
            .entry((key.to_string(), rule.scope))
            .or_insert_with(VecDeque::new);

        while let Some(front) = log.front() {
            if now.duration_since(*front) >= rule.window {
                log.pop_front();
            } else {
                break;
            }
        }

        if log.len() >= rule.limit as usize {
            let oldest = log.front().copied().unwrap_or(now);
            let retry_after = rule
                .window
                .saturating_sub(now.duration_since(oldest))
                .as_secs()
                .max(1);
            return Err(retry_after);
        }

        log.push_back(now);
        Ok(())
    }

    /// Drops buckets whose newest entry is older than `max_age`
    pub fn sweep(&self, max_age: Duration) {
        let now = Instant::now();
        let mut windows = self.windows.write().unwrap_or_else(|e| e.into_inner());
        windows.retain(|_, log| {
            log.back()
                .is_some_and(|newest| now.duration_since(*newest) < max_age)
        });
    }

    #[cfg(test)]
    fn bucket_count(&self) -> usize {
        self.windows.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

/// Middleware body: identify the caller, charge the budget, 429 on refusal
pub async fn enforce(
    limiter: Arc<RateLimiter>,
    rule: RateLimitRule,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let key = identity(&request);

    if let Err(retry_after_seconds) = limiter.check(&key, &rule) {
        tracing::debug!(key = %key, scope = rule.scope, "rate limit exceeded");
        return Err(ApiError::RateLimited {
            retry_after_seconds,
        });
    }

    Ok(next.run(request).await)
}

/// Authenticated user id when the auth middleware ran first, client IP
/// otherwise
fn identity(request: &Request) -> String {
    if let Some(auth) = request.extensions().get::<AuthContext>() {
        return format!("user:{}", auth.user_id);
    }

    if let Some(forwarded) = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
    {
        return format!("ip:{}", forwarded.trim());
    }

    if let Some(ConnectInfo(addr)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
        return format!("ip:{}", addr.ip());
    }

    "ip:unknown".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_is_enforced() {
        let limiter = RateLimiter::new();
        let rule = RateLimitRule::per_hour("test", 3);

        for _ in 0..3 {
            assert!(limiter.check("user:a", &rule).is_ok());
        }
        let retry_after = limiter.check("user:a", &rule).unwrap_err();
        assert!(retry_after >= 1);

        // Other identities and scopes are unaffected
        assert!(limiter.check("user:b", &rule).is_ok());
        let other_scope = RateLimitRule::per_hour("other", 3);
        assert!(limiter.check("user:a", &other_scope).is_ok());
    }

    #[test]
    fn test_window_slides() {
        let limiter = RateLimiter::new();
        let rule = RateLimitRule {
            scope: "test",
            limit: 2,
            window: Duration::from_millis(60),
        };

        assert!(limiter.check("k", &rule).is_ok());
        assert!(limiter.check("k", &rule).is_ok());
        assert!(limiter.check("k", &rule).is_err());

        std::thread::sleep(Duration::from_millis(80));
        assert!(limiter.check("k", &rule).is_ok());
    }

    #[test]
    fn test_sweep_evicts_stale_buckets() {
        let limiter = RateLimiter::new();
        let rule = RateLimitRule {
            scope: "test",
            limit: 5,
            window: Duration::from_millis(10),
        };

        limiter.check("a", &rule).unwrap();
        limiter.check("b", &rule).unwrap();
        assert_eq!(limiter.bucket_count(), 2);

        std::thread::sleep(Duration::from_millis(30));
        limiter.sweep(Duration::from_millis(20));
        assert_eq!(limiter.bucket_count(), 0);
    }
}

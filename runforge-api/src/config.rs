/// Configuration management for the API server
///
/// Configuration is environment-driven with sensible defaults; only
/// `DATABASE_URL` and `JWT_SECRET` are required.
///
/// # Environment Variables
///
/// - `API_HOST`, `API_PORT`: bind address (default 0.0.0.0:8080)
/// - `API_CORS_ORIGINS`: comma-separated allowed origins, `*` for permissive
/// - `API_PRODUCTION`: enables HSTS and strict CORS (default false)
/// - `DATABASE_URL`, `DATABASE_MAX_CONNECTIONS`
/// - `JWT_SECRET` (required, at least 32 bytes)
/// - `JWT_ACCESS_TTL_SECONDS` (default 3600), `JWT_REFRESH_TTL_SECONDS`
///   (default 86400)
/// - `WORKER_SLOTS`, `WORKER_USER_SLOTS`, `WORKER_POLL_INTERVAL_MS`,
///   `WORKER_BATCH_SIZE`, `WORKER_REAP_POLICY` (`requeue` | `fail`),
///   `WORKER_MAX_OUTPUT_BYTES`, `WORKER_SHUTDOWN_GRACE_SECONDS`
/// - `SCRIPT_DENY_LIST`: comma-separated forbidden substrings
/// - Rate limits: `RATE_AUTH_PER_HOUR`, `RATE_REGISTER_PER_HOUR`,
///   `RATE_REFRESH_PER_HOUR`, `RATE_TASK_OPS_PER_HOUR`,
///   `RATE_TASK_CREATE_PER_HOUR`, `RATE_EXECUTION_OPS_PER_HOUR`,
///   `RATE_EXECUTION_CREATE_PER_HOUR`

use serde::{Deserialize, Serialize};
use std::env;

/// Complete application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// API server configuration
    pub api: ApiConfig,

    /// Database configuration
    pub database: DatabaseSettings,

    /// JWT configuration
    pub jwt: JwtConfig,

    /// Worker pool configuration
    pub worker: WorkerSettings,

    /// Validation and rate limits
    pub limits: LimitsConfig,
}

/// API server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Host to bind to
    pub host: String,

    /// Port to bind to
    pub port: u16,

    /// Allowed CORS origins, `*` for permissive
    pub cors_origins: Vec<String>,

    /// Production mode (HSTS, strict CORS)
    pub production: bool,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections in pool
    pub max_connections: u32,
}

/// JWT configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    /// Secret key for JWT signing, at least 32 bytes
    ///
    /// Generate with: `openssl rand -hex 32`
    pub secret: String,

    /// Access token lifetime in seconds
    pub access_ttl_seconds: i64,

    /// Refresh token lifetime in seconds
    pub refresh_ttl_seconds: i64,
}

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSettings {
    /// Global concurrency slot capacity
    pub slots: usize,

    /// Per-user slot cap
    pub user_slots: usize,

    /// Poll interval in milliseconds
    pub poll_interval_ms: u64,

    /// Executions fetched per poll
    pub batch_size: i64,

    /// Startup policy for orphaned executions: `requeue` or `fail`
    pub reap_policy: String,

    /// Per-stream output bound in bytes
    pub max_output_bytes: usize,

    /// Graceful shutdown deadline in seconds
    pub shutdown_grace_seconds: u64,
}

/// Validation bounds and rate limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Case-insensitive substrings rejected in script content
    pub script_deny_list: Vec<String>,

    /// Maximum script size in bytes
    pub max_script_bytes: usize,

    /// Per-identity request budgets, per hour
    pub rate: RateLimitSettings,
}

/// Sliding-window request budgets (per user when authenticated, per IP
/// otherwise)
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimitSettings {
    pub auth_per_hour: u32,
    pub register_per_hour: u32,
    pub refresh_per_hour: u32,
    pub task_ops_per_hour: u32,
    pub task_create_per_hour: u32,
    pub execution_ops_per_hour: u32,
    pub execution_create_per_hour: u32,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        RateLimitSettings {
            auth_per_hour: 10,
            register_per_hour: 5,
            refresh_per_hour: 100,
            task_ops_per_hour: 100,
            task_create_per_hour: 20,
            execution_ops_per_hour: 50,
            execution_create_per_hour: 30,
        }
    }
}

/// Default script deny-list; override with `SCRIPT_DENY_LIST`
pub fn default_deny_list() -> Vec<String> {
    [
        "rm -rf",
        "mkfs",
        "dd if=",
        ":(){",
        "> /dev/sd",
        "shutdown",
        "reboot",
        "sudo ",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_list(key: &str) -> Option<Vec<String>> {
    env::var(key).ok().map(|v| {
        v.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    })
}

impl Config {
    /// Loads configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns an error when `DATABASE_URL` or `JWT_SECRET` is missing, or
    /// when the secret is shorter than 32 bytes.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable is required"))?;

        let jwt_secret = env::var("JWT_SECRET")
            .map_err(|_| anyhow::anyhow!("JWT_SECRET environment variable is required"))?;
        if jwt_secret.len() < 32 {
            anyhow::bail!("JWT_SECRET must be at least 32 characters long");
        }

        let slots = env_parse("WORKER_SLOTS", 10usize);

        Ok(Self {
            api: ApiConfig {
                host: env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env_parse("API_PORT", 8080u16),
                cors_origins: env_list("API_CORS_ORIGINS").unwrap_or_else(|| vec!["*".to_string()]),
                production: env_parse("API_PRODUCTION", false),
            },
            database: DatabaseSettings {
                url: database_url,
                max_connections: env_parse("DATABASE_MAX_CONNECTIONS", 10u32),
            },
            jwt: JwtConfig {
                secret: jwt_secret,
                access_ttl_seconds: env_parse("JWT_ACCESS_TTL_SECONDS", 3600i64),
                refresh_ttl_seconds: env_parse("JWT_REFRESH_TTL_SECONDS", 86400i64),
            },
            worker: WorkerSettings {
                slots,
                user_slots: env_parse("WORKER_USER_SLOTS", slots),
                poll_interval_ms: env_parse("WORKER_POLL_INTERVAL_MS", 1000u64),
                batch_size: env_parse("WORKER_BATCH_SIZE", 10i64),
                reap_policy: env::var("WORKER_REAP_POLICY")
                    .unwrap_or_else(|_| "requeue".to_string()),
                max_output_bytes: env_parse("WORKER_MAX_OUTPUT_BYTES", 64 * 1024usize),
                shutdown_grace_seconds: env_parse("WORKER_SHUTDOWN_GRACE_SECONDS", 30u64),
            },
            limits: LimitsConfig {
                script_deny_list: env_list("SCRIPT_DENY_LIST").unwrap_or_else(default_deny_list),
                max_script_bytes: env_parse("MAX_SCRIPT_BYTES", 64 * 1024usize),
                rate: RateLimitSettings {
                    auth_per_hour: env_parse("RATE_AUTH_PER_HOUR", 10),
                    register_per_hour: env_parse("RATE_REGISTER_PER_HOUR", 5),
                    refresh_per_hour: env_parse("RATE_REFRESH_PER_HOUR", 100),
                    task_ops_per_hour: env_parse("RATE_TASK_OPS_PER_HOUR", 100),
                    task_create_per_hour: env_parse("RATE_TASK_CREATE_PER_HOUR", 20),
                    execution_ops_per_hour: env_parse("RATE_EXECUTION_OPS_PER_HOUR", 50),
                    execution_create_per_hour: env_parse("RATE_EXECUTION_CREATE_PER_HOUR", 30),
                },
            },
        })
    }

    /// Returns the server bind address
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.api.host, self.api.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_deny_list_blocks_the_obvious() {
        let list = default_deny_list();
        assert!(list.iter().any(|s| s == "rm -rf"));
        assert!(list.iter().any(|s| s == "mkfs"));
    }

    #[test]
    fn test_default_rate_limits() {
        let rate = RateLimitSettings::default();
        assert_eq!(rate.register_per_hour, 5);
        assert_eq!(rate.task_create_per_hour, 20);
        assert_eq!(rate.execution_create_per_hour, 30);
    }
}

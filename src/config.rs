// src/config.rs

use std::{env, str::FromStr, time::Duration};

use dotenvy::dotenv;
use url::Url;

use crate::clients::llm::normalize_base_url;

/// Async generation may take a long time on the LLM side.
pub const DEFAULT_GENERATOR_TIMEOUT_SECS: u64 = 60 * 60;
/// Deadline for calls made on the request path (first test, answer keys).
pub const DEFAULT_SYNC_TIMEOUT_SECS: u64 = 20;
pub const DEFAULT_WORKER_CONCURRENCY: usize = 10;
pub const DEFAULT_JOB_MAX_RETRY: u32 = 10;
pub const DEFAULT_JOB_RETENTION_SECS: u64 = 60;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    /// Token lifetime in seconds.
    pub jwt_expiration: u64,
    pub rust_log: String,
    pub bind_addr: String,

    /// Base URL of the generator / answer-key service. Always ends with `/`.
    pub llm_url: Url,

    pub worker_concurrency: usize,
    pub job_max_retry: u32,
    pub job_retention: Duration,
    pub job_backoff_base: Duration,
    pub job_backoff_max: Duration,
    pub worker_poll_interval: Duration,
    pub generator_timeout: Duration,
    pub sync_timeout: Duration,

    /// Optional teacher account created at startup.
    pub teacher_login: Option<String>,
    pub teacher_password: Option<String>,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv().ok();

        let database_url = env::var("DATABASE_URL")
            .expect("DATABASE_URL must be set");

        let jwt_secret = env::var("JWT_SECRET")
            .expect("JWT_SECRET must be set");

        let llm_url = env::var("LLM_URL").expect("LLM_URL must be set");
        let llm_url = normalize_base_url(&llm_url).expect("LLM_URL must be a valid URL");

        let rust_log = env::var("RUST_LOG")
            .unwrap_or_else(|_| "info".to_string());

        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        Self {
            database_url,
            jwt_secret,
            jwt_expiration: parse_var("JWT_EXPIRATION", 86_400),
            rust_log,
            bind_addr,
            llm_url,
            worker_concurrency: parse_var("WORKER_CONCURRENCY", DEFAULT_WORKER_CONCURRENCY).max(1),
            job_max_retry: parse_var("JOB_MAX_RETRY", DEFAULT_JOB_MAX_RETRY),
            job_retention: Duration::from_secs(parse_var(
                "JOB_RETENTION_SECS",
                DEFAULT_JOB_RETENTION_SECS,
            )),
            job_backoff_base: Duration::from_secs(parse_var("JOB_BACKOFF_BASE_SECS", 1)),
            job_backoff_max: Duration::from_secs(parse_var("JOB_BACKOFF_MAX_SECS", 300)),
            worker_poll_interval: Duration::from_millis(parse_var("WORKER_POLL_MS", 500)),
            generator_timeout: Duration::from_secs(parse_var(
                "GENERATOR_TIMEOUT_SECS",
                DEFAULT_GENERATOR_TIMEOUT_SECS,
            )),
            sync_timeout: Duration::from_secs(parse_var(
                "SYNC_TIMEOUT_SECS",
                DEFAULT_SYNC_TIMEOUT_SECS,
            )),
            teacher_login: env::var("TEACHER_LOGIN").ok(),
            teacher_password: env::var("TEACHER_PASSWORD").ok(),
        }
    }
}

/// Reads an optional variable, falling back to `default` when absent or unparsable.
fn parse_var<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("Ignoring invalid value for {}: {:?}", key, raw);
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_var_falls_back_on_missing() {
        assert_eq!(parse_var("PLANDSTU_SURELY_UNSET_VAR", 42u32), 42);
    }
}

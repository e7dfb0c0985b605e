use std::env;
use std::fmt;

/// Where the front-end listens for incoming HTTP connections.
#[derive(Debug, Clone)]
pub enum ListenAddr {
    Tcp(String),
    Unix(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub listen: ListenAddr,
    pub num_workers: usize,
    pub queue_capacity: usize,
    pub postgres_url: String,
    pub postgres_pool_size: usize,
    pub default_processor_url: String,
    pub fallback_processor_url: String,
    pub settle_delay_ms: u64,
    pub upstream_timeout_ms: u64,
}

#[derive(Debug)]
pub struct ConfigError(String);

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "configuration error: {}", self.0)
    }
}

impl std::error::Error for ConfigError {}

fn required(name: &str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError(format!("missing required env var {name}")))
}

fn optional_parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        // GOMAXPROCS is read directly by main.rs to size the tokio
        // runtime's worker thread pool, not part of this struct.
        let listen = match env::var("SOCK") {
            Ok(path) if !path.is_empty() => ListenAddr::Unix(path),
            _ => {
                let addr = env::var("TCP_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
                ListenAddr::Tcp(addr)
            }
        };

        let num_workers = optional_parsed("WORKERS", 8usize).max(1);
        let queue_capacity = optional_parsed("QUEUE_CAPACITY", 1usize << 14);
        let postgres_url = required("POSTGRES_URL")?;
        // A small bounded pool, 16-20 connections, is enough for the
        // workers' write-heavy, short-lived queries.
        let postgres_pool_size = optional_parsed("POSTGRES_POOL_SIZE", 20usize).max(1);
        let default_processor_url = env::var("DEFAULT_PROCESSOR_URL")
            .unwrap_or_else(|_| "http://payment-processor-default:8080".to_string());
        let fallback_processor_url = env::var("FALLBACK_PROCESSOR_URL")
            .unwrap_or_else(|_| "http://payment-processor-fallback:8080".to_string());
        let settle_delay_ms = optional_parsed("SUMMARY_SETTLE_DELAY_MS", 500u64);
        let upstream_timeout_ms = optional_parsed("UPSTREAM_TIMEOUT_MS", 3_000u64);

        Ok(Self {
            listen,
            num_workers,
            queue_capacity,
            postgres_url,
            postgres_pool_size,
            default_processor_url,
            fallback_processor_url,
            settle_delay_ms,
            upstream_timeout_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tcp_is_the_default_listen_mode() {
        // SOCK unset in the test harness environment.
        unsafe {
            env::remove_var("SOCK");
        }
        match Config::from_env() {
            Err(e) => assert!(e.0.contains("POSTGRES_URL")),
            Ok(cfg) => assert!(matches!(cfg.listen, ListenAddr::Tcp(_))),
        }
    }
}

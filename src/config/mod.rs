use std::env;
use std::time::Duration;

pub mod cors;
pub mod security;

pub use cors::create_cors_layer;
pub use security::set_security_headers;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    /// TTL for cart item locks.
    pub cart_lock_ttl: Duration,
    /// Max concurrent ACTIVE locks per session.
    pub session_lock_cap: i64,
    /// TTL for idempotency-key records.
    pub idempotency_ttl: Duration,
    /// Fixed interval between expiry sweep runs.
    pub sweep_interval: Duration,
    /// Prefix stamped in front of every fiscal number.
    pub fiscal_prefix: String,
    /// Zero-padding width of the numeric part of a fiscal number.
    pub fiscal_padding: usize,
    /// Postgres lock_timeout applied while locking the counter row.
    pub fiscal_lock_timeout_ms: u64,
    /// Bounded retry attempts for fiscal number issuance.
    pub fiscal_retry_attempts: u32,
    pub cache_seat_ttl: Duration,
    pub cache_zone_ttl: Duration,
    pub cache_event_ttl: Duration,
}

fn env_secs(key: &str, default: u64) -> Duration {
    Duration::from_secs(
        env::var(key)
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(default),
    )
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost/taquilla".to_string()),
            port: env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3001),
            cart_lock_ttl: env_secs("CART_LOCK_TTL_SECS", 15 * 60),
            session_lock_cap: env::var("SESSION_LOCK_CAP")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
            idempotency_ttl: env_secs("IDEMPOTENCY_TTL_SECS", 60 * 60),
            sweep_interval: env_secs("SWEEP_INTERVAL_SECS", 60),
            fiscal_prefix: env::var("FISCAL_PREFIX").unwrap_or_else(|_| "FAC".to_string()),
            fiscal_padding: env::var("FISCAL_PADDING")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8),
            fiscal_lock_timeout_ms: env::var("FISCAL_LOCK_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(2000),
            fiscal_retry_attempts: env::var("FISCAL_RETRY_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3),
            cache_seat_ttl: env_secs("CACHE_SEAT_TTL_SECS", 5),
            cache_zone_ttl: env_secs("CACHE_ZONE_TTL_SECS", 30),
            cache_event_ttl: env_secs("CACHE_EVENT_TTL_SECS", 120),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        // Clear overrides that another test or the environment may have set
        for key in [
            "CART_LOCK_TTL_SECS",
            "SESSION_LOCK_CAP",
            "IDEMPOTENCY_TTL_SECS",
            "SWEEP_INTERVAL_SECS",
            "FISCAL_PREFIX",
            "FISCAL_PADDING",
        ] {
            std::env::remove_var(key);
        }

        let config = Config::from_env();
        assert_eq!(config.cart_lock_ttl, Duration::from_secs(900));
        assert_eq!(config.idempotency_ttl, Duration::from_secs(3600));
        assert_eq!(config.session_lock_cap, 10);
        assert_eq!(config.fiscal_prefix, "FAC");
        assert_eq!(config.fiscal_padding, 8);
        assert!(config.cache_seat_ttl <= config.cache_zone_ttl);
        assert!(config.cache_zone_ttl <= config.cache_event_ttl);
    }

    #[test]
    fn env_secs_ignores_garbage() {
        std::env::set_var("TEST_SECS_GARBAGE", "not-a-number");
        assert_eq!(env_secs("TEST_SECS_GARBAGE", 42), Duration::from_secs(42));
        std::env::remove_var("TEST_SECS_GARBAGE");
    }
}

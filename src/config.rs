// =============================================================================
// Service configuration — env-loaded, validated once at startup, immutable
// =============================================================================
//
// Unlike a hot-reloadable trading config, this service has nothing to tune at
// runtime: every knob here shapes how the process connects to the world
// (upstream socket, store, listen address) and is fixed for the life of the
// process. Loaded once in `main` and handed out as `Arc<ServiceConfig>`.
//
// =============================================================================

use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("invalid value for {key}: {raw:?}")),
        Err(_) => Ok(default),
    }
}

/// Top-level configuration for the feed service, resolved once from the
/// environment (with `.env` support for local development) and validated
/// eagerly so misconfiguration fails fast at boot rather than mid-stream.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub mongo_url: String,
    pub db_name: String,
    pub rugs_upstream_url: String,
    pub cors_origins: Vec<String>,
    pub listen_address: String,
    pub upstream_max_reconnects: Option<u32>,
    pub store_call_deadline: Duration,
    pub shutdown_drain: Duration,
}

impl ServiceConfig {
    /// Load from the process environment. `dotenv` is applied by the caller
    /// before this runs, matching local-dev convenience without making the
    /// service depend on a file existing in production.
    pub fn load() -> Result<Self> {
        let mongo_url = env::var("MONGO_URL").context("MONGO_URL must be set")?;
        let db_name = env_or("DB_NAME", "rugfeed");
        let rugs_upstream_url = env_or("RUGS_UPSTREAM_URL", "wss://backend.rugs.fun");

        let cors_origins: Vec<String> = env::var("CORS_ORIGINS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        let listen_address = env_or("LISTEN_ADDRESS", "0.0.0.0:8001");

        let upstream_max_reconnects = match env::var("UPSTREAM_MAX_RECONNECTS") {
            Ok(raw) if raw.trim().is_empty() => None,
            Ok(raw) => Some(
                raw.parse()
                    .with_context(|| format!("invalid UPSTREAM_MAX_RECONNECTS: {raw:?}"))?,
            ),
            Err(_) => None,
        };

        let store_call_deadline_ms: u64 = env_parse_or("STORE_CALL_DEADLINE_MS", 5_000)?;
        let shutdown_drain_ms: u64 = env_parse_or("SHUTDOWN_DRAIN_MS", 10_000)?;

        if !rugs_upstream_url.starts_with("ws://") && !rugs_upstream_url.starts_with("wss://") {
            anyhow::bail!("RUGS_UPSTREAM_URL must be a ws:// or wss:// URL, got {rugs_upstream_url:?}");
        }

        let config = Self {
            mongo_url,
            db_name,
            rugs_upstream_url,
            cors_origins,
            listen_address,
            upstream_max_reconnects,
            store_call_deadline: Duration::from_millis(store_call_deadline_ms),
            shutdown_drain: Duration::from_millis(shutdown_drain_ms),
        };

        info!(
            db_name = %config.db_name,
            listen_address = %config.listen_address,
            cors_origins = ?config.cors_origins,
            upstream_max_reconnects = ?config.upstream_max_reconnects,
            "service config loaded"
        );

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_env() {
        for key in [
            "MONGO_URL",
            "DB_NAME",
            "RUGS_UPSTREAM_URL",
            "CORS_ORIGINS",
            "LISTEN_ADDRESS",
            "UPSTREAM_MAX_RECONNECTS",
            "STORE_CALL_DEADLINE_MS",
            "SHUTDOWN_DRAIN_MS",
        ] {
            env::remove_var(key);
        }
    }

    #[test]
    fn missing_required_vars_fail_fast() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        assert!(ServiceConfig::load().is_err());
    }

    #[test]
    fn defaults_fill_optional_fields() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        env::set_var("MONGO_URL", "mongodb://localhost:27017");
        env::set_var("RUGS_UPSTREAM_URL", "wss://backend.rugs.fun");
        let cfg = ServiceConfig::load().unwrap();
        assert_eq!(cfg.db_name, "rugfeed");
        assert_eq!(cfg.listen_address, "0.0.0.0:8001");
        assert!(cfg.cors_origins.is_empty());
        assert_eq!(cfg.upstream_max_reconnects, None);
        assert_eq!(cfg.store_call_deadline, Duration::from_millis(5_000));
        assert_eq!(cfg.shutdown_drain, Duration::from_millis(10_000));
        clear_env();
    }

    #[test]
    fn rugs_upstream_url_defaults_to_production_when_unset() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        env::set_var("MONGO_URL", "mongodb://localhost:27017");
        let cfg = ServiceConfig::load().unwrap();
        assert_eq!(cfg.rugs_upstream_url, "wss://backend.rugs.fun");
        clear_env();
    }

    #[test]
    fn rejects_non_websocket_upstream_url() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        env::set_var("MONGO_URL", "mongodb://localhost:27017");
        env::set_var("RUGS_UPSTREAM_URL", "https://backend.rugs.fun");
        assert!(ServiceConfig::load().is_err());
        clear_env();
    }

    #[test]
    fn parses_comma_separated_cors_origins() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        env::set_var("MONGO_URL", "mongodb://localhost:27017");
        env::set_var("RUGS_UPSTREAM_URL", "wss://backend.rugs.fun");
        env::set_var("CORS_ORIGINS", "https://a.example, https://b.example");
        let cfg = ServiceConfig::load().unwrap();
        assert_eq!(cfg.cors_origins, vec!["https://a.example", "https://b.example"]);
        clear_env();
    }
}

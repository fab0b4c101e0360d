use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

const DEFAULT_CONFIG_FILES: &[&str] = &[
    "parley.toml",
    "config/parley.toml",
    "crates/config/parley.toml",
    "../parley.toml",
    "../config/parley.toml",
    "../crates/config/parley.toml",
];

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    pub http: HttpConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub backplane: BackplaneConfig,
    pub durable_log: DurableLogConfig,
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub address: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: 7070,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://parley.db".to_string(),
            max_connections: 10,
        }
    }
}

/// Redis connection settings shared by the fan-out backplane and the
/// durable log. When `url` is empty the server runs single-process with
/// in-memory fallbacks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    #[serde(default)]
    pub url: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self { url: String::new() }
    }
}

impl RedisConfig {
    pub fn enabled(&self) -> bool {
        !self.url.trim().is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackplaneConfig {
    /// Pub/sub channel all server processes share for room events.
    pub channel: String,
}

impl Default for BackplaneConfig {
    fn default() -> Self {
        Self {
            channel: "parley:rooms".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DurableLogConfig {
    /// Queue topic messages are produced to on the relay path.
    pub topic: String,
    /// Whether this process runs the consumption loop.
    pub run_consumer: bool,
    /// Per-record retry attempts for transient store failures.
    pub store_retry_attempts: u32,
    /// Base backoff between store retries, in milliseconds.
    pub store_retry_backoff_ms: u64,
}

impl Default for DurableLogConfig {
    fn default() -> Self {
        Self {
            topic: "parley:messages".to_string(),
            run_consumer: true,
            store_retry_attempts: 3,
            store_retry_backoff_ms: 250,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Upper bound on room/member directory lookups during admission.
    /// A handshake that cannot be checked in time is refused, not hung.
    pub admission_timeout_seconds: u64,
    /// Capacity of each room's broadcast channel.
    pub room_channel_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            admission_timeout_seconds: 5,
            room_channel_capacity: 256,
        }
    }
}

/// Load the application configuration by combining defaults, files, and
/// environment overrides.
///
/// ```
/// use parley_config::load;
///
/// std::env::remove_var("PARLEY_CONFIG");
///
/// let config = load().expect("configuration should load with defaults");
/// assert!(!config.http.address.is_empty());
/// ```
pub fn load() -> anyhow::Result<AppConfig> {
    let defaults = AppConfig::default();

    let mut builder = config::Config::builder();
    builder = builder
        .set_default("http.address", defaults.http.address.clone())
        .unwrap()
        .set_default("http.port", i64::from(defaults.http.port))
        .unwrap()
        .set_default("database.url", defaults.database.url.clone())
        .unwrap()
        .set_default(
            "database.max_connections",
            i64::from(defaults.database.max_connections),
        )
        .unwrap()
        .set_default("redis.url", defaults.redis.url.clone())
        .unwrap()
        .set_default("backplane.channel", defaults.backplane.channel.clone())
        .unwrap()
        .set_default("durable_log.topic", defaults.durable_log.topic.clone())
        .unwrap()
        .set_default("durable_log.run_consumer", defaults.durable_log.run_consumer)
        .unwrap()
        .set_default(
            "durable_log.store_retry_attempts",
            i64::from(defaults.durable_log.store_retry_attempts),
        )
        .unwrap()
        .set_default(
            "durable_log.store_retry_backoff_ms",
            i64::try_from(defaults.durable_log.store_retry_backoff_ms).unwrap_or(i64::MAX),
        )
        .unwrap()
        .set_default(
            "session.admission_timeout_seconds",
            i64::try_from(defaults.session.admission_timeout_seconds).unwrap_or(i64::MAX),
        )
        .unwrap()
        .set_default(
            "session.room_channel_capacity",
            i64::try_from(defaults.session.room_channel_capacity).unwrap_or(i64::MAX),
        )
        .unwrap();

    let environment_overrides = config::Environment::with_prefix("PARLEY").separator("__");

    let mut config_file_attached = false;

    if let Ok(path) = std::env::var("PARLEY_CONFIG") {
        builder = builder.add_source(config::File::from(PathBuf::from(&path)));
        config_file_attached = true;
        debug!(path, "loading configuration via PARLEY_CONFIG");
    } else if let Ok(cwd) = std::env::current_dir() {
        let fallback = DEFAULT_CONFIG_FILES
            .iter()
            .map(|candidate| cwd.join(candidate))
            .find(|path| path.exists());

        if let Some(path) = fallback {
            debug!(path = %path.display(), "loading configuration file");
            builder = builder.add_source(config::File::from(path));
            config_file_attached = true;
        }
    }

    if !config_file_attached {
        debug!("no configuration file found, relying on defaults and environment overrides");
    }

    builder = builder.add_source(environment_overrides);

    let cfg = builder.build().context("unable to build configuration")?;

    let config = cfg
        .try_deserialize::<AppConfig>()
        .context("invalid configuration")?;

    debug!(?config, "loaded backend configuration");
    Ok(config)
}

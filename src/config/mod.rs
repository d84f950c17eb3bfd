use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

const MIN_SIGNING_KEY_BYTES: usize = 32;
const MAX_TOKEN_TTL_SECS: i64 = 10 * 365 * 24 * 60 * 60;
const MAX_RATE_WINDOW_SECS: i64 = 24 * 60 * 60;
const MAX_IDLE_EVICTION_FACTOR: u32 = 1_000;
const MAX_REUSE_GRACE_SECS: i64 = 60;

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: u32,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Postgres,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub backend: StorageBackend,
    pub url: Option<String>,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub signing_key: String,
    pub access_token_ttl_secs: i64,
    pub refresh_token_ttl_secs: i64,
    pub bcrypt_cost: u32,
    /// Revoke the whole rotation chain when an already-rotated secret is replayed.
    pub revoke_family_on_reuse: bool,
    /// A secret replayed less than this many seconds after it was rotated is
    /// treated as a lost concurrent refresh, not as reuse, and never triggers
    /// family revocation.
    pub reuse_grace_secs: i64,
}

impl AuthConfig {
    pub fn access_token_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.access_token_ttl_secs)
    }

    pub fn refresh_token_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.refresh_token_ttl_secs)
    }

    pub fn reuse_grace(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.reuse_grace_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitSettings {
    pub max_attempts: u32,
    pub window_secs: i64,
    pub protected_paths: Vec<String>,
    /// Honor `X-Forwarded-For`. Only safe behind a proxy that overwrites it.
    pub trust_forwarded_for: bool,
    pub idle_eviction_factor: u32,
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CookieConfig {
    pub name: String,
    pub path: String,
    pub secure: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CorsConfig {
    pub enabled: bool,
    pub allow_any_origin: bool,
    pub allowed_origins: Vec<String>,
    pub max_age: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    pub level: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub environment: String,
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub rate_limit: RateLimitSettings,
    pub cookie: CookieConfig,
    pub cors: CorsConfig,
    pub logging: LoggingConfig,
}

fn with_defaults(
    builder: config::ConfigBuilder<config::builder::DefaultState>,
) -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
    builder
        .set_default("environment", "development")?
        .set_default("server.host", "127.0.0.1")?
        .set_default("server.port", 8080)?
        .set_default("server.workers", num_cpus::get() as i64)?
        .set_default("database.backend", "memory")?
        .set_default("database.max_connections", 5)?
        .set_default("database.acquire_timeout_secs", 5)?
        .set_default("auth.signing_key", "development_signing_key_change_me_0123456789")?
        .set_default("auth.access_token_ttl_secs", 900)?
        .set_default("auth.refresh_token_ttl_secs", 1_209_600)?
        .set_default("auth.bcrypt_cost", bcrypt::DEFAULT_COST as i64)?
        .set_default("auth.revoke_family_on_reuse", false)?
        .set_default("auth.reuse_grace_secs", 5)?
        .set_default("rate_limit.max_attempts", 5)?
        .set_default("rate_limit.window_secs", 60)?
        .set_default(
            "rate_limit.protected_paths",
            vec!["/api/auth/login", "/api/auth/register"],
        )?
        .set_default("rate_limit.trust_forwarded_for", true)?
        .set_default("rate_limit.idle_eviction_factor", 2)?
        .set_default("rate_limit.sweep_interval_secs", 60)?
        .set_default("cookie.name", "refresh_token")?
        .set_default("cookie.path", "/api/auth")?
        .set_default("cookie.secure", false)?
        .set_default("cors.enabled", true)?
        .set_default("cors.allow_any_origin", false)?
        .set_default("cors.allowed_origins", vec!["http://localhost:8080"])?
        .set_default("cors.max_age", 3600)?
        .set_default("logging.level", "info")
}

fn environment_source() -> Environment {
    // E.g., `APP_AUTH__SIGNING_KEY=...` would set `Settings.auth.signing_key`
    Environment::with_prefix("app")
        .separator("__")
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("rate_limit.protected_paths")
        .with_list_parse_key("cors.allowed_origins")
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let settings: Settings = with_defaults(Config::builder())?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            .add_source(environment_source())
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Defaults tuned for tests: in-memory storage and the cheapest bcrypt cost.
    pub fn new_for_test() -> Result<Self, ConfigError> {
        let settings: Settings = with_defaults(Config::builder())?
            .set_override("environment", "test")?
            .set_override("auth.signing_key", "test_signing_key_with_at_least_32_bytes")?
            .set_override("auth.bcrypt_cost", 4)?
            .set_override("database.backend", "memory")?
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.auth.signing_key.len() < MIN_SIGNING_KEY_BYTES {
            return Err(ConfigError::Message(format!(
                "auth.signing_key must be at least {} bytes",
                MIN_SIGNING_KEY_BYTES
            )));
        }
        if self.auth.access_token_ttl_secs <= 0 || self.auth.refresh_token_ttl_secs <= 0 {
            return Err(ConfigError::Message("token TTLs must be positive".into()));
        }
        if self.auth.refresh_token_ttl_secs > MAX_TOKEN_TTL_SECS {
            return Err(ConfigError::Message(format!(
                "auth.refresh_token_ttl_secs must not exceed {}",
                MAX_TOKEN_TTL_SECS
            )));
        }
        if self.auth.access_token_ttl_secs >= self.auth.refresh_token_ttl_secs {
            return Err(ConfigError::Message(
                "auth.access_token_ttl_secs must be shorter than auth.refresh_token_ttl_secs".into(),
            ));
        }
        if self.rate_limit.max_attempts == 0 || self.rate_limit.window_secs <= 0 {
            return Err(ConfigError::Message(
                "rate_limit.max_attempts and rate_limit.window_secs must be positive".into(),
            ));
        }
        if self.rate_limit.window_secs > MAX_RATE_WINDOW_SECS {
            return Err(ConfigError::Message(format!(
                "rate_limit.window_secs must not exceed {}",
                MAX_RATE_WINDOW_SECS
            )));
        }
        if self.rate_limit.idle_eviction_factor > MAX_IDLE_EVICTION_FACTOR {
            return Err(ConfigError::Message(format!(
                "rate_limit.idle_eviction_factor must not exceed {}",
                MAX_IDLE_EVICTION_FACTOR
            )));
        }
        if !(0..=MAX_REUSE_GRACE_SECS).contains(&self.auth.reuse_grace_secs) {
            return Err(ConfigError::Message(format!(
                "auth.reuse_grace_secs must be between 0 and {}",
                MAX_REUSE_GRACE_SECS
            )));
        }
        if self.database.backend == StorageBackend::Postgres
            && self.database.url.as_deref().map_or(true, str::is_empty)
        {
            return Err(ConfigError::Message(
                "database.url is required for the postgres backend".into(),
            ));
        }
        Ok(())
    }
}

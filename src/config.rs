//! Configuration parsing and validation for reqlog.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::Path;
use std::time::Duration;

/// Environment variable consulted when `[database] path` is not configured.
pub const DB_PATH_ENV: &str = "REQLOG_DB_PATH";

/// Environment variable consulted when `[telemetry] api_key` is not configured.
pub const TELEMETRY_KEY_ENV: &str = "REQLOG_TELEMETRY_API_KEY";

/// Location marker for an ephemeral in-memory store.
pub const MEMORY_LOCATION: &str = "memory";

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on (e.g., "127.0.0.1:8080")
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Largest request body the instrumentation layer will buffer
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    /// Cross-origin policy applied to every route
    #[serde(default)]
    pub cors: CorsConfig,
}

fn default_listen() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_max_body_bytes() -> usize {
    1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            max_body_bytes: default_max_body_bytes(),
            cors: CorsConfig::default(),
        }
    }
}

/// Cross-origin resource sharing policy.
///
/// Origin patterns are exact origins or carry a single `*` wildcard, so
/// `https://*` admits any https origin.
#[derive(Debug, Clone, Deserialize)]
pub struct CorsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_cors_origins")]
    pub allow_origins: Vec<String>,
    #[serde(default = "default_cors_methods")]
    pub allow_methods: Vec<String>,
    #[serde(default = "default_cors_headers")]
    pub allow_headers: Vec<String>,
    #[serde(default = "default_true")]
    pub allow_credentials: bool,
    /// How long browsers may cache a preflight answer
    #[serde(default = "default_cors_max_age_secs")]
    pub max_age_secs: u64,
}

fn default_cors_origins() -> Vec<String> {
    vec!["https://*".to_string(), "http://*".to_string()]
}

fn default_cors_methods() -> Vec<String> {
    ["GET", "POST", "PUT", "DELETE", "OPTIONS", "PATCH"]
        .iter()
        .map(|m| m.to_string())
        .collect()
}

fn default_cors_headers() -> Vec<String> {
    ["Accept", "Authorization", "Content-Type", "X-CSRF-Token"]
        .iter()
        .map(|h| h.to_string())
        .collect()
}

fn default_cors_max_age_secs() -> u64 {
    300
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allow_origins: default_cors_origins(),
            allow_methods: default_cors_methods(),
            allow_headers: default_cors_headers(),
            allow_credentials: true,
            max_age_secs: default_cors_max_age_secs(),
        }
    }
}

impl CorsConfig {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }

    /// Whether `origin` matches one of the configured patterns.
    pub fn allows_origin(&self, origin: &str) -> bool {
        self.allow_origins.iter().any(|pattern| match pattern.split_once('*') {
            Some((prefix, suffix)) => {
                origin.len() > prefix.len() + suffix.len()
                    && origin.starts_with(prefix)
                    && origin.ends_with(suffix)
            }
            None => pattern == origin,
        })
    }
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file, or `memory`
    #[serde(default = "default_db_path")]
    pub path: String,
    /// Upper bound on concurrently open read connections
    #[serde(default = "default_read_max_connections")]
    pub read_max_connections: u32,
    /// Maximum time to wait for a pooled connection
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
    /// Maximum time SQLite waits on a locked database file
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// Connections older than this are closed instead of reused
    #[serde(default)]
    pub max_lifetime_secs: Option<u64>,
    /// Connections idle longer than this are closed instead of reused
    #[serde(default)]
    pub idle_timeout_secs: Option<u64>,
}

fn default_db_path() -> String {
    "./data/sqlite.db".to_string()
}

fn default_read_max_connections() -> u32 {
    8
}

fn default_acquire_timeout_ms() -> u64 {
    5_000
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            read_max_connections: default_read_max_connections(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
            busy_timeout_ms: default_busy_timeout_ms(),
            max_lifetime_secs: None,
            idle_timeout_secs: None,
        }
    }
}

impl DatabaseConfig {
    /// Config for an ephemeral in-memory store.
    pub fn memory() -> Self {
        Self {
            path: MEMORY_LOCATION.to_string(),
            ..Self::default()
        }
    }

    /// Config for a store file at `path` with default pool settings.
    pub fn at(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().display().to_string(),
            ..Self::default()
        }
    }

    pub fn is_memory(&self) -> bool {
        self.path == MEMORY_LOCATION
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    pub fn max_lifetime(&self) -> Option<Duration> {
        self.max_lifetime_secs.map(Duration::from_secs)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_secs.map(Duration::from_secs)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Whether to persist request logs to the database
    #[serde(default = "default_true")]
    pub log_requests: bool,
    /// Upper bound on a single request-log insert
    #[serde(default = "default_insert_timeout_ms")]
    pub insert_timeout_ms: u64,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_insert_timeout_ms() -> u64 {
    2_000
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            log_requests: true,
            insert_timeout_ms: default_insert_timeout_ms(),
        }
    }
}

impl LoggingConfig {
    pub fn insert_timeout(&self) -> Duration {
        Duration::from_millis(self.insert_timeout_ms)
    }
}

/// Health reporter thresholds.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_ping_timeout_ms")]
    pub ping_timeout_ms: u64,
    /// Open read connections above this count are reported as heavy load
    #[serde(default = "default_heavy_load")]
    pub heavy_load_open_connections: u32,
    /// Wait events above this count are reported as contention
    #[serde(default = "default_high_wait_count")]
    pub high_wait_count: u64,
}

fn default_ping_timeout_ms() -> u64 {
    1_000
}

fn default_heavy_load() -> u32 {
    40
}

fn default_high_wait_count() -> u64 {
    1_000
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            ping_timeout_ms: default_ping_timeout_ms(),
            heavy_load_open_connections: default_heavy_load(),
            high_wait_count: default_high_wait_count(),
        }
    }
}

impl HealthConfig {
    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }
}

/// External telemetry relay configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TelemetryConfig {
    /// Relay endpoint; when unset no relay is fed
    pub endpoint: Option<String>,
    pub api_key: Option<ApiKey>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// API key wrapper that redacts in Debug/Display/Serialize and zeroizes on drop.
#[derive(Clone)]
pub struct ApiKey(SecretString);

impl ApiKey {
    /// Access the raw key value. Every call site is auditable via `grep expose_secret`.
    pub fn expose_secret(&self) -> &str {
        self.0.expose_secret()
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl std::fmt::Display for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl Serialize for ApiKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("[REDACTED]")
    }
}

impl<'de> serde::Deserialize<'de> for ApiKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(|s| ApiKey(SecretString::from(s)))
    }
}

impl From<String> for ApiKey {
    fn from(s: String) -> Self {
        ApiKey(SecretString::from(s))
    }
}

impl From<&str> for ApiKey {
    fn from(s: &str) -> Self {
        ApiKey(SecretString::from(s))
    }
}

/// Where a configured value came from after env resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueSource {
    /// Literal string in config (no ${} references)
    Literal,
    /// Contained ${VAR} references expanded from environment
    EnvExpanded,
    /// Read from a convention env var (holds var name)
    Convention(String),
    /// Built-in default, or absent
    Default,
}

impl std::fmt::Display for ValueSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueSource::Literal => write!(f, "config-literal"),
            ValueSource::EnvExpanded => write!(f, "env-expanded"),
            ValueSource::Convention(var) => write!(f, "convention ({})", var),
            ValueSource::Default => write!(f, "default"),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("Environment variable '{var}' not set for '{field}': {message}")]
    EnvVar {
        var: String,
        field: String,
        message: String,
    },
}

/// Database section as written in TOML; `path` may hold `${VAR}` references.
#[derive(Deserialize, Default)]
pub struct RawDatabaseConfig {
    path: Option<String>,
    read_max_connections: Option<u32>,
    acquire_timeout_ms: Option<u64>,
    busy_timeout_ms: Option<u64>,
    max_lifetime_secs: Option<u64>,
    idle_timeout_secs: Option<u64>,
}

/// Telemetry section as written in TOML; values may hold `${VAR}` references.
#[derive(Deserialize, Default)]
pub struct RawTelemetryConfig {
    endpoint: Option<String>,
    api_key: Option<String>,
    timeout_ms: Option<u64>,
}

/// Raw configuration deserialized directly from TOML.
#[derive(Deserialize, Default)]
pub struct RawConfig {
    #[serde(default)]
    server: ServerConfig,
    #[serde(default)]
    database: RawDatabaseConfig,
    #[serde(default)]
    logging: LoggingConfig,
    #[serde(default)]
    health: HealthConfig,
    #[serde(default)]
    telemetry: RawTelemetryConfig,
}

/// Sources of the env-resolvable values, for `reqlog check` output.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub database_path: ValueSource,
    pub telemetry_key: ValueSource,
}

/// Expand all `${VAR}` references in a string using a custom lookup function.
///
/// Supports multiple `${VAR}` in one string (e.g., `${DATA_DIR}/${DB_NAME}`).
/// Fails on first missing variable, unclosed `${`, or empty variable name.
fn expand_env_vars_with<F>(input: &str, field: &str, lookup: F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if !input.contains("${") {
        return Ok(input.to_string());
    }

    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];

        let end = after.find('}').ok_or_else(|| ConfigError::EnvVar {
            var: "<unclosed>".to_string(),
            field: field.to_string(),
            message: format!("Unclosed '${{' in config value: {}", input),
        })?;

        let var_name = &after[..end];
        if var_name.is_empty() {
            return Err(ConfigError::EnvVar {
                var: "".to_string(),
                field: field.to_string(),
                message: "Empty variable name in '${}' reference".to_string(),
            });
        }

        let value = lookup(var_name).ok_or_else(|| ConfigError::EnvVar {
            var: var_name.to_string(),
            field: field.to_string(),
            message: format!(
                "Environment variable '{}' is not set (referenced in '{}')",
                var_name, field
            ),
        })?;

        result.push_str(&value);
        rest = &after[end + 1..];
    }

    result.push_str(rest);
    Ok(result)
}

/// Resolve an optional config value: expand `${VAR}`, else fall back to a convention var.
fn resolve_with<F>(
    value: Option<String>,
    field: &str,
    convention_var: &str,
    lookup: &F,
) -> Result<(Option<String>, ValueSource), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match value {
        Some(raw) if raw.contains("${") => {
            let expanded = expand_env_vars_with(&raw, field, lookup)?;
            Ok((Some(expanded), ValueSource::EnvExpanded))
        }
        Some(raw) => Ok((Some(raw), ValueSource::Literal)),
        None => match lookup(convention_var) {
            Some(v) => Ok((Some(v), ValueSource::Convention(convention_var.to_string()))),
            None => Ok((None, ValueSource::Default)),
        },
    }
}

impl Config {
    /// Load configuration from a TOML file, resolving env references.
    pub fn from_file(path: impl AsRef<Path>) -> Result<(Self, Resolution), ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            source: e,
        })?;

        Self::parse_str(&content)
    }

    /// Parse configuration from a TOML string, resolving env references.
    pub fn parse_str(content: &str) -> Result<(Self, Resolution), ConfigError> {
        let raw: RawConfig = toml::from_str(content).map_err(ConfigError::Parse)?;
        Self::from_raw_with(raw, |name| std::env::var(name).ok())
    }

    /// Default configuration with env resolution applied (used when no file exists).
    pub fn from_env() -> Result<(Self, Resolution), ConfigError> {
        Self::from_raw_with(RawConfig::default(), |name| std::env::var(name).ok())
    }

    /// Convert raw config to final config using `lookup` for env access.
    ///
    /// The closure keeps this testable without touching global env state.
    pub fn from_raw_with<F>(raw: RawConfig, lookup: F) -> Result<(Self, Resolution), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let (path, database_path) =
            resolve_with(raw.database.path, "database.path", DB_PATH_ENV, &lookup)?;
        let (api_key, telemetry_key) = resolve_with(
            raw.telemetry.api_key,
            "telemetry.api_key",
            TELEMETRY_KEY_ENV,
            &lookup,
        )?;
        let endpoint = raw
            .telemetry
            .endpoint
            .map(|e| expand_env_vars_with(&e, "telemetry.endpoint", &lookup))
            .transpose()?;

        let defaults = DatabaseConfig::default();
        let config = Config {
            server: raw.server,
            database: DatabaseConfig {
                path: path.unwrap_or(defaults.path),
                read_max_connections: raw
                    .database
                    .read_max_connections
                    .unwrap_or(defaults.read_max_connections),
                acquire_timeout_ms: raw
                    .database
                    .acquire_timeout_ms
                    .unwrap_or(defaults.acquire_timeout_ms),
                busy_timeout_ms: raw
                    .database
                    .busy_timeout_ms
                    .unwrap_or(defaults.busy_timeout_ms),
                max_lifetime_secs: raw.database.max_lifetime_secs,
                idle_timeout_secs: raw.database.idle_timeout_secs,
            },
            logging: raw.logging,
            health: raw.health,
            telemetry: TelemetryConfig {
                endpoint,
                api_key: api_key.map(ApiKey::from),
                timeout_ms: raw.telemetry.timeout_ms,
            },
        };
        config.validate()?;

        Ok((
            config,
            Resolution {
                database_path,
                telemetry_key,
            },
        ))
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.database.path.trim().is_empty() {
            return Err(ConfigError::Validation(
                "database.path must not be empty".to_string(),
            ));
        }
        if self.database.read_max_connections == 0 {
            return Err(ConfigError::Validation(
                "database.read_max_connections must be at least 1".to_string(),
            ));
        }
        if let Some(endpoint) = &self.telemetry.endpoint {
            if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
                return Err(ConfigError::Validation(format!(
                    "telemetry.endpoint '{}' must be an http(s) URL",
                    endpoint
                )));
            }
        }
        for method in &self.server.cors.allow_methods {
            if axum::http::Method::from_bytes(method.as_bytes()).is_err() {
                return Err(ConfigError::Validation(format!(
                    "server.cors.allow_methods: '{}' is not an HTTP method",
                    method
                )));
            }
        }
        for name in &self.server.cors.allow_headers {
            if axum::http::HeaderName::from_bytes(name.as_bytes()).is_err() {
                return Err(ConfigError::Validation(format!(
                    "server.cors.allow_headers: '{}' is not a header name",
                    name
                )));
            }
        }
        let cors = &self.server.cors;
        if cors.allow_credentials
            && (cors.allow_methods.iter().any(|m| m == "*")
                || cors.allow_headers.iter().any(|h| h == "*"))
        {
            return Err(ConfigError::Validation(
                "server.cors: wildcard methods or headers cannot be combined with allow_credentials"
                    .to_string(),
            ));
        }
        for warning in self.warnings() {
            tracing::warn!("{}", warning);
        }

        Ok(())
    }

    /// Settings that are valid but probably not what the operator meant.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.server.max_body_bytes == 0 {
            warnings.push(
                "server.max_body_bytes is 0 - every non-empty request body will be rejected"
                    .to_string(),
            );
        }
        if self.health.heavy_load_open_connections >= self.database.read_max_connections {
            warnings.push(format!(
                "health.heavy_load_open_connections ({}) is not below database.read_max_connections ({}) - heavy load will never be reported",
                self.health.heavy_load_open_connections, self.database.read_max_connections
            ));
        }
        warnings
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
            health: HealthConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

use serde::Deserialize;
use std::net::SocketAddr;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub security: SecurityConfig,
    /// Session token verification
    pub auth: AuthConfig,
    /// Registry, delivery and history settings
    pub push: PushConfig,
    /// FCM web registration settings
    #[serde(default)]
    pub fcm: FcmConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

impl DatabaseConfig {
    pub fn pool_config(&self) -> persistence::db::DatabaseConfig {
        persistence::db::DatabaseConfig {
            url: self.url.clone(),
            max_connections: self.max_connections,
            min_connections: self.min_connections,
            connect_timeout_secs: self.connect_timeout_secs,
            idle_timeout_secs: self.idle_timeout_secs,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

/// How session tokens from the auth service are verified.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// `RS256` (production) or `HS256` (local development)
    #[serde(default = "default_auth_algorithm")]
    pub algorithm: String,

    /// RSA public key in PEM format, for RS256
    #[serde(default)]
    pub public_key: String,

    /// Shared secret, for HS256
    #[serde(default)]
    pub shared_secret: String,

    /// Leeway in seconds for clock skew tolerance
    #[serde(default = "default_auth_leeway")]
    pub leeway_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Fcm,
    Mock,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PushConfig {
    #[serde(default = "default_registry_backend")]
    pub registry_backend: RegistryBackend,

    #[serde(default = "default_provider")]
    pub provider: ProviderKind,

    /// Window within which a repeated fingerprint is a duplicate
    #[serde(default = "default_dedup_window")]
    pub dedup_window_secs: i64,

    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// Directory of the file-backed local store. Empty keeps it in memory.
    #[serde(default)]
    pub local_store_dir: String,

    /// Per-document quota of the local store
    #[serde(default)]
    pub max_document_bytes: Option<usize>,

    /// Bound on every provider and registry call
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout_secs: u64,

    #[serde(default = "default_sse_keepalive")]
    pub sse_keepalive_secs: u64,

    /// Period of the history reload job. 0 disables it.
    #[serde(default = "default_history_resync")]
    pub history_resync_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FcmConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub project_id: String,

    /// Web API key of the Firebase project
    #[serde(default)]
    pub api_key: String,

    /// Firebase web app id
    #[serde(default)]
    pub app_id: String,

    /// Public VAPID key the subscription was created with
    #[serde(default)]
    pub vapid_key: String,

    /// Web-push subscription of this console
    #[serde(default)]
    pub subscription_endpoint: String,

    #[serde(default)]
    pub subscription_p256dh: String,

    #[serde(default)]
    pub subscription_auth: String,

    #[serde(default = "default_fcm_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_fcm_max_retries")]
    pub max_retries: u32,
}

impl Default for FcmConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            project_id: String::new(),
            api_key: String::new(),
            app_id: String::new(),
            vapid_key: String::new(),
            subscription_endpoint: String::new(),
            subscription_p256dh: String::new(),
            subscription_auth: String::new(),
            timeout_ms: default_fcm_timeout_ms(),
            max_retries: default_fcm_max_retries(),
        }
    }
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_request_timeout() -> u64 {
    30
}
fn default_max_connections() -> u32 {
    10
}
fn default_min_connections() -> u32 {
    1
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_idle_timeout() -> u64 {
    600
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "json".to_string()
}
fn default_auth_algorithm() -> String {
    "RS256".to_string()
}
fn default_auth_leeway() -> u64 {
    shared::session_token::DEFAULT_LEEWAY_SECS
}
fn default_registry_backend() -> RegistryBackend {
    RegistryBackend::Postgres
}
fn default_provider() -> ProviderKind {
    ProviderKind::Mock
}
fn default_dedup_window() -> i64 {
    domain::services::DEFAULT_DEDUP_WINDOW_SECS
}
fn default_history_capacity() -> usize {
    domain::services::DEFAULT_HISTORY_CAPACITY
}
fn default_operation_timeout() -> u64 {
    domain::services::DEFAULT_OPERATION_TIMEOUT_SECS
}
fn default_sse_keepalive() -> u64 {
    15
}
fn default_history_resync() -> u64 {
    30
}
fn default_fcm_timeout_ms() -> u64 {
    10000
}
fn default_fcm_max_retries() -> u32 {
    3
}

/// Configuration validation error
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Loading order (later sources override earlier):
    /// 1. config/default.toml - base configuration with defaults
    /// 2. config/local.toml - local overrides (optional, not in git)
    /// 3. Environment variables with MP__ prefix
    pub fn load() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(config::Environment::with_prefix("MP").separator("__"))
            .build()?;

        let cfg: Self = config.try_deserialize()?;
        cfg.validate()
            .map_err(|e| config::ConfigError::Message(e.to_string()))?;
        Ok(cfg)
    }

    /// Load configuration for testing with custom overrides.
    ///
    /// Builds entirely from embedded defaults (memory registry, mock
    /// provider, in-memory local store) so tests need no config files.
    pub fn load_for_test(overrides: &[(&str, &str)]) -> Result<Self, config::ConfigError> {
        let defaults = r#"
            [server]
            host = "127.0.0.1"
            port = 8080
            request_timeout_secs = 30

            [database]
            url = ""
            max_connections = 5
            min_connections = 1
            connect_timeout_secs = 5
            idle_timeout_secs = 600

            [logging]
            level = "info"
            format = "json"

            [security]
            cors_origins = []

            [auth]
            algorithm = "HS256"
            shared_secret = "test_secret_key_for_session_testing_12345"
            leeway_secs = 0

            [push]
            registry_backend = "memory"
            provider = "mock"
            dedup_window_secs = 10
            history_capacity = 100
            local_store_dir = ""
            operation_timeout_secs = 5
            sse_keepalive_secs = 15
            history_resync_secs = 0
        "#;

        let mut builder = config::Config::builder()
            .add_source(config::File::from_str(defaults, config::FileFormat::Toml));

        for (key, value) in overrides {
            builder = builder.set_override(*key, *value)?;
        }

        // Validation is left to the caller so tests can build partial configs
        builder.build()?.try_deserialize()
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.push.registry_backend == RegistryBackend::Postgres && self.database.url.is_empty() {
            return Err(ConfigValidationError::MissingRequired(
                "MP__DATABASE__URL must be set when push.registry_backend is postgres".to_string(),
            ));
        }

        if self.server.port == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "Server port cannot be 0".to_string(),
            ));
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(ConfigValidationError::InvalidValue(
                "min_connections cannot exceed max_connections".to_string(),
            ));
        }

        if self.push.dedup_window_secs <= 0 {
            return Err(ConfigValidationError::InvalidValue(
                "push.dedup_window_secs must be positive".to_string(),
            ));
        }

        if self.push.history_capacity == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "push.history_capacity must be positive".to_string(),
            ));
        }

        if self.push.provider == ProviderKind::Fcm && self.fcm.project_id.is_empty() {
            return Err(ConfigValidationError::MissingRequired(
                "fcm.project_id must be set when push.provider is fcm".to_string(),
            ));
        }

        if self.fcm.max_retries > 10 {
            return Err(ConfigValidationError::InvalidValue(
                "fcm.max_retries cannot exceed 10".to_string(),
            ));
        }

        match self.auth.algorithm.as_str() {
            "RS256" if self.auth.public_key.is_empty() => {
                Err(ConfigValidationError::MissingRequired(
                    "auth.public_key must be set for RS256".to_string(),
                ))
            }
            "HS256" if self.auth.shared_secret.is_empty() => {
                Err(ConfigValidationError::MissingRequired(
                    "auth.shared_secret must be set for HS256".to_string(),
                ))
            }
            "RS256" | "HS256" => Ok(()),
            other => Err(ConfigValidationError::InvalidValue(format!(
                "Unsupported auth.algorithm: {}",
                other
            ))),
        }
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.server.host, self.server.port).parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_load_with_defaults() {
        let config = Config::load_for_test(&[]).expect("Failed to load config");

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.push.registry_backend, RegistryBackend::Memory);
        assert_eq!(config.push.provider, ProviderKind::Mock);
        assert_eq!(config.push.dedup_window_secs, 10);
        assert_eq!(config.push.history_capacity, 100);
        assert!(!config.fcm.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_env_override() {
        let config = Config::load_for_test(&[
            ("server.port", "9000"),
            ("logging.level", "debug"),
            ("push.dedup_window_secs", "30"),
        ])
        .expect("Failed to load config");

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.push.dedup_window_secs, 30);
    }

    #[test]
    fn test_config_validation_postgres_requires_db_url() {
        let config = Config::load_for_test(&[("push.registry_backend", "postgres")])
            .expect("Failed to load config");
        let result = config.validate();
        assert!(result.unwrap_err().to_string().contains("MP__DATABASE__URL"));
    }

    #[test]
    fn test_config_validation_invalid_pool_settings() {
        let config = Config::load_for_test(&[
            ("database.min_connections", "100"),
            ("database.max_connections", "10"),
        ])
        .expect("Failed to load config");

        let result = config.validate();
        assert!(result.unwrap_err().to_string().contains("min_connections"));
    }

    #[test]
    fn test_config_validation_push_limits() {
        let config = Config::load_for_test(&[("push.dedup_window_secs", "0")]).unwrap();
        assert!(config.validate().is_err());

        let config = Config::load_for_test(&[("push.history_capacity", "0")]).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_fcm_retry_limit() {
        let config = Config::load_for_test(&[("fcm.max_retries", "10")]).unwrap();
        assert!(config.validate().is_ok());

        let config = Config::load_for_test(&[("fcm.max_retries", "60")]).unwrap();
        assert!(config
            .validate()
            .unwrap_err()
            .to_string()
            .contains("fcm.max_retries"));
    }

    #[test]
    fn test_config_validation_fcm_requires_project() {
        let config = Config::load_for_test(&[("push.provider", "fcm")]).unwrap();
        assert!(config
            .validate()
            .unwrap_err()
            .to_string()
            .contains("fcm.project_id"));
    }

    #[test]
    fn test_config_validation_auth() {
        let config = Config::load_for_test(&[("auth.algorithm", "RS256")]).unwrap();
        assert!(config.validate().is_err());

        let config = Config::load_for_test(&[("auth.algorithm", "none")]).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_socket_addr() {
        let config = Config::load_for_test(&[("server.port", "3000")]).unwrap();
        assert_eq!(config.socket_addr().unwrap().to_string(), "127.0.0.1:3000");

        let config = Config::load_for_test(&[("server.host", "not a host")]).unwrap();
        assert!(config.socket_addr().is_err());
    }
}

//! Configuration management for Campus services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config.toml, config.yaml)
//! - Default values

use crate::retry::{Delay, RetryPolicy};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Hosted backend configuration
    #[serde(default)]
    pub backend: BackendConfig,

    /// Client-side persisted state
    #[serde(default)]
    pub storage: StorageConfig,

    /// Client token configuration
    #[serde(default)]
    pub auth: AuthConfig,

    /// Identity resolution configuration
    #[serde(default)]
    pub resolver: ResolverConfig,

    /// Demo account configuration
    #[serde(default)]
    pub demo: DemoConfig,

    /// Retry policy for transient backend failures
    #[serde(default)]
    pub retry: RetryConfig,

    /// Teacher roster / student directory lookups
    #[serde(default)]
    pub directory: DirectoryConfig,

    /// Per-client resolver registry
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    /// Base URL of the hosted backend project
    #[serde(default = "default_backend_url")]
    pub url: String,

    /// Public (anon) API key sent with every request
    #[serde(default)]
    pub anon_key: String,

    /// Request timeout in seconds
    #[serde(default = "default_backend_timeout")]
    pub timeout_secs: u64,

    /// Table holding user profiles
    #[serde(default = "default_profile_table")]
    pub profile_table: String,

    /// Table holding teacher role rows
    #[serde(default = "default_teacher_table")]
    pub teacher_table: String,

    /// Table holding student role rows
    #[serde(default = "default_student_table")]
    pub student_table: String,

    /// Buffer size for auth state change notifications
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Store kind: memory, redis
    #[serde(default = "default_storage_kind")]
    pub kind: String,

    /// Redis URL (when kind = redis)
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Key prefix for namespacing
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// TTL of persisted values in seconds
    #[serde(default = "default_storage_ttl")]
    pub ttl_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    /// Secret for signing client tokens
    pub client_token_secret: Option<String>,

    /// Client token lifetime in seconds
    #[serde(default = "default_client_token_expiration")]
    pub client_token_expiration_secs: u64,

    /// Cookie carrying the client token
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,

    /// Route unauthenticated visitors are sent to
    #[serde(default = "default_login_route")]
    pub login_route: String,

    /// Route used when an authenticated user has no dashboard
    #[serde(default = "default_unauthorized_route")]
    pub unauthorized_route: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResolverConfig {
    /// Role strategies tried in order until one resolves
    #[serde(default = "default_strategies")]
    pub strategies: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DemoConfig {
    /// Allow demo (test) identities
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Seed synthetic history rows for demo identities
    #[serde(default = "default_enabled")]
    pub seed_data: bool,

    /// Highest demo account index accepted
    #[serde(default = "default_demo_max_index")]
    pub max_index: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    /// Maximum attempts including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay strategy: fixed, exponential
    #[serde(default = "default_retry_strategy")]
    pub strategy: String,

    /// Base delay in milliseconds
    #[serde(default = "default_retry_delay")]
    pub delay_ms: u64,

    /// Upper bound on a single delay (exponential only)
    #[serde(default = "default_retry_max_delay")]
    pub max_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DirectoryConfig {
    /// Per-attempt timeout for roster lookups in seconds
    #[serde(default = "default_directory_timeout")]
    pub attempt_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegistryConfig {
    /// Evict clients idle for longer than this many seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// How often the idle sweep runs in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    /// Credential requests per second
    #[serde(default = "default_rate_limit")]
    pub requests_per_second: u32,

    /// Burst capacity
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// Enable rate limiting
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_request_timeout() -> u64 { 30 }
fn default_backend_url() -> String { "http://localhost:54321".to_string() }
fn default_backend_timeout() -> u64 { 15 }
fn default_profile_table() -> String { "profiles".to_string() }
fn default_teacher_table() -> String { "teachers".to_string() }
fn default_student_table() -> String { "students".to_string() }
fn default_event_buffer() -> usize { 16 }
fn default_storage_kind() -> String { "memory".to_string() }
fn default_redis_url() -> String { "redis://localhost:6379".to_string() }
fn default_key_prefix() -> String { "campus".to_string() }
fn default_storage_ttl() -> u64 { 60 * 60 * 24 * 30 }
fn default_client_token_expiration() -> u64 { 60 * 60 * 24 * 7 }
fn default_cookie_name() -> String { "campus_client".to_string() }
fn default_login_route() -> String { "/login".to_string() }
fn default_unauthorized_route() -> String { "/unauthorized".to_string() }
fn default_strategies() -> Vec<String> {
    vec![
        "profile_table".to_string(),
        "role_table".to_string(),
        "role_rpc".to_string(),
        "session_metadata".to_string(),
    ]
}
fn default_demo_max_index() -> u32 { 9 }
fn default_max_attempts() -> u32 { 3 }
fn default_retry_strategy() -> String { "fixed".to_string() }
fn default_retry_delay() -> u64 { 1000 }
fn default_retry_max_delay() -> u64 { 8000 }
fn default_directory_timeout() -> u64 { 10 }
fn default_idle_timeout() -> u64 { 60 * 60 }
fn default_sweep_interval() -> u64 { 60 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "campus-portal".to_string() }
fn default_rate_limit() -> u32 { 5 }
fn default_burst() -> u32 { 20 }
fn default_enabled() -> bool { true }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: default_backend_url(),
            anon_key: String::new(),
            timeout_secs: default_backend_timeout(),
            profile_table: default_profile_table(),
            teacher_table: default_teacher_table(),
            student_table: default_student_table(),
            event_buffer: default_event_buffer(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            kind: default_storage_kind(),
            redis_url: default_redis_url(),
            key_prefix: default_key_prefix(),
            ttl_secs: default_storage_ttl(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            client_token_secret: None,
            client_token_expiration_secs: default_client_token_expiration(),
            cookie_name: default_cookie_name(),
            login_route: default_login_route(),
            unauthorized_route: default_unauthorized_route(),
        }
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self { strategies: default_strategies() }
    }
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            seed_data: default_enabled(),
            max_index: default_demo_max_index(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            strategy: default_retry_strategy(),
            delay_ms: default_retry_delay(),
            max_delay_ms: default_retry_max_delay(),
        }
    }
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self { attempt_timeout_secs: default_directory_timeout() }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_idle_timeout(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: default_metrics_port(),
            service_name: default_service_name(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_rate_limit(),
            burst: default_burst(),
            enabled: default_enabled(),
        }
    }
}

impl RetryConfig {
    /// Build the retry policy described by this section
    pub fn policy(&self) -> RetryPolicy {
        let delay = match self.strategy.as_str() {
            "exponential" => Delay::Exponential {
                initial: Duration::from_millis(self.delay_ms),
                max: Duration::from_millis(self.max_delay_ms),
            },
            _ => Delay::Fixed(Duration::from_millis(self.delay_ms)),
        };
        RetryPolicy::new(self.max_attempts, delay)
    }
}

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with APP__ prefix
            // e.g., APP__BACKEND__URL=https://project.example.co
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("resolver.strategies")
                    .try_parsing(true)
            )

            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )
            .build()?;

        config.try_deserialize()
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    /// Get backend request timeout as Duration
    pub fn backend_timeout(&self) -> Duration {
        Duration::from_secs(self.backend.timeout_secs)
    }

    /// Get the per-attempt roster timeout as Duration
    pub fn directory_timeout(&self) -> Duration {
        Duration::from_secs(self.directory.attempt_timeout_secs)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            backend: BackendConfig::default(),
            storage: StorageConfig::default(),
            auth: AuthConfig::default(),
            resolver: ResolverConfig::default(),
            demo: DemoConfig::default(),
            retry: RetryConfig::default(),
            directory: DirectoryConfig::default(),
            registry: RegistryConfig::default(),
            observability: ObservabilityConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.backend.profile_table, "profiles");
        assert_eq!(config.auth.login_route, "/login");
        assert_eq!(config.resolver.strategies[0], "profile_table");
        assert_eq!(config.resolver.strategies.last().map(String::as_str), Some("session_metadata"));
    }

    #[test]
    fn test_default_retry_policy() {
        let policy = AppConfig::default().retry.policy();
        assert_eq!(policy.max_attempts(), 3);
        assert_eq!(policy.delay(), &Delay::Fixed(Duration::from_secs(1)));
    }

    #[test]
    fn test_exponential_retry_policy() {
        let retry = RetryConfig {
            strategy: "exponential".to_string(),
            delay_ms: 100,
            max_delay_ms: 400,
            ..RetryConfig::default()
        };
        assert_eq!(
            retry.policy().delay(),
            &Delay::Exponential {
                initial: Duration::from_millis(100),
                max: Duration::from_millis(400),
            }
        );
    }

    #[test]
    fn test_partial_sections_fill_defaults() {
        let config: AppConfig = serde_json::from_value(serde_json::json!({
            "backend": { "url": "https://school.example.co" },
            "demo": { "enabled": false }
        }))
        .unwrap();
        assert_eq!(config.backend.url, "https://school.example.co");
        assert_eq!(config.backend.teacher_table, "teachers");
        assert!(!config.demo.enabled);
        assert_eq!(config.demo.max_index, 9);
    }
}

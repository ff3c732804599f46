use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

use crate::notification::Priority;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub message: MessageConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub otel: OtelConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Maximum accepted request body in bytes
    #[serde(default = "default_body_limit")]
    pub body_limit: usize,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiConfig {
    pub key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Which built-in adapter the service binary uses
    #[serde(default = "default_gateway_mode")]
    pub mode: String,
    /// Simulated latency for the dry-run adapter
    #[serde(default)]
    pub dry_run_latency_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    /// Maximum gateway calls outstanding per dispatch
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    /// Attempts per batch, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_initial_ms")]
    pub backoff_initial_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "default_backoff_jitter")]
    pub backoff_jitter: f64,
    /// Deadline applied to requests that do not carry one
    #[serde(default)]
    pub default_deadline_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageConfig {
    /// Sound used when the caller sets none; empty means silent
    #[serde(default = "default_sound")]
    pub default_sound: String,
    #[serde(default)]
    pub default_priority: Priority,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// "text" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OtelConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_otel_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_sampling_ratio")]
    pub sampling_ratio: f64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8081
}

fn default_body_limit() -> usize {
    2 * 1024 * 1024 // 2 MiB, room for a few thousand tokens
}

fn default_gateway_mode() -> String {
    "dry_run".to_string()
}

fn default_max_in_flight() -> usize {
    10
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_initial_ms() -> u64 {
    100
}

fn default_backoff_max_ms() -> u64 {
    5_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_backoff_jitter() -> f64 {
    0.1
}

fn default_sound() -> String {
    "default".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_service_name() -> String {
    "push-dispatch-service".to_string()
}

fn default_sampling_ratio() -> f64 {
    1.0
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            // Start with default values
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port() as i64)?
            .set_default("gateway.mode", default_gateway_mode())?
            .set_default("dispatch.max_in_flight", default_max_in_flight() as i64)?
            .set_default("dispatch.max_attempts", default_max_attempts() as i64)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Load from environment variables
            // SERVER__PORT, DISPATCH__MAX_IN_FLIGHT, API__KEY, etc.
            .add_source(
                Environment::default()
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(","),
            );

        builder.build()?.try_deserialize()
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: vec![],
            body_limit: default_body_limit(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            mode: default_gateway_mode(),
            dry_run_latency_ms: 0,
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_in_flight: default_max_in_flight(),
            max_attempts: default_max_attempts(),
            backoff_initial_ms: default_backoff_initial_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            backoff_jitter: default_backoff_jitter(),
            default_deadline_ms: None,
        }
    }
}

impl Default for MessageConfig {
    fn default() -> Self {
        Self {
            default_sound: default_sound(),
            default_priority: Priority::High,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: default_log_format(),
        }
    }
}

impl Default for OtelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_otel_endpoint(),
            service_name: default_service_name(),
            sampling_ratio: default_sampling_ratio(),
        }
    }
}

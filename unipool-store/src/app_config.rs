use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
    #[serde(default)]
    pub business_rules: BusinessRules,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Postgres,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/unipool".to_string(),
            max_connections: default_max_connections(),
            acquire_timeout_seconds: default_acquire_timeout(),
        }
    }
}

fn default_max_connections() -> u32 { 5 }
fn default_acquire_timeout() -> u64 { 3 }

#[derive(Debug, Deserialize, Clone)]
pub struct NotificationConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_push_url")]
    pub push_url: String,
    #[serde(default = "default_push_timeout")]
    pub timeout_seconds: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            push_url: default_push_url(),
            timeout_seconds: default_push_timeout(),
        }
    }
}

fn default_push_url() -> String { "https://exp.host/--/api/v2/push/send".to_string() }
fn default_push_timeout() -> u64 { 10 }

#[derive(Debug, Deserialize, Clone)]
pub struct BusinessRules {
    #[serde(default = "default_max_seats")]
    pub max_seats_per_booking: i32,
    #[serde(default = "default_page_size_limit")]
    pub page_size_limit: u32,
}

impl Default for BusinessRules {
    fn default() -> Self {
        Self {
            max_seats_per_booking: default_max_seats(),
            page_size_limit: default_page_size_limit(),
        }
    }
}

fn default_max_seats() -> i32 { 8 }
fn default_page_size_limit() -> u32 { 100 }

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // Per-environment overrides, optional
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Developer overrides, not checked in
            .add_source(config::File::with_name("config/local").required(false))
            // e.g. `UNIPOOL__DATABASE__URL=postgres://...`
            .add_source(config::Environment::with_prefix("UNIPOOL").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}

use envconfig::Envconfig;
use once_cell::sync::Lazy;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::ops::Deref;
use std::str::FromStr;
use std::time::Duration;

use crate::api::auth::Principal;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlexBool(pub bool);

impl FromStr for FlexBool {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(FlexBool(true)),
            "false" | "0" | "no" | "off" | "" => Ok(FlexBool(false)),
            _ => Err(format!("Invalid boolean value: {}", s)),
        }
    }
}

impl From<FlexBool> for bool {
    fn from(flex: FlexBool) -> Self {
        flex.0
    }
}

impl Deref for FlexBool {
    type Target = bool;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Which identity the admin quota counter is keyed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaSubjectMode {
    Principal,
    /// Degraded mode: count per presented credential instead of per admin.
    Credential,
}

impl FromStr for QuotaSubjectMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "principal" | "admin" => Ok(QuotaSubjectMode::Principal),
            "credential" | "key" => Ok(QuotaSubjectMode::Credential),
            _ => Err(format!("Invalid rate limit subject: {}", s)),
        }
    }
}

/// Static admin directory, parsed from `key=admin_id:scope|scope,key2=...`.
///
/// A key with no scopes after the colon authenticates but can do nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdminKeys(pub HashMap<String, Principal>);

#[derive(Debug, PartialEq, Eq)]
pub enum ParseAdminKeysError {
    MissingSeparator(String),
    EmptyField(String),
    DuplicateKey(String),
}

impl std::fmt::Display for ParseAdminKeysError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseAdminKeysError::MissingSeparator(entry) => {
                write!(f, "Expected key=admin_id:scopes, got: {}", entry)
            }
            ParseAdminKeysError::EmptyField(entry) => write!(f, "Empty key or admin id in: {}", entry),
            ParseAdminKeysError::DuplicateKey(admin) => {
                write!(f, "Admin key configured twice (second for {})", admin)
            }
        }
    }
}

impl std::error::Error for ParseAdminKeysError {}

impl FromStr for AdminKeys {
    type Err = ParseAdminKeysError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut keys = HashMap::new();

        for entry in s.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (api_key, rest) = entry
                .split_once('=')
                .ok_or_else(|| ParseAdminKeysError::MissingSeparator(entry.to_string()))?;
            let (admin_id, scopes) = rest.split_once(':').unwrap_or((rest, ""));

            let api_key = api_key.trim();
            let admin_id = admin_id.trim();
            if api_key.is_empty() || admin_id.is_empty() {
                return Err(ParseAdminKeysError::EmptyField(entry.to_string()));
            }

            let scopes: HashSet<String> = scopes
                .split('|')
                .map(str::trim)
                .filter(|scope| !scope.is_empty())
                .map(str::to_string)
                .collect();

            let principal = Principal::new(admin_id, scopes);
            if keys.insert(api_key.to_string(), principal).is_some() {
                return Err(ParseAdminKeysError::DuplicateKey(admin_id.to_string()));
            }
        }

        Ok(AdminKeys(keys))
    }
}

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    #[envconfig(default = "127.0.0.1:3001")]
    pub address: SocketAddr,

    #[envconfig(default = "redis://localhost:6379/")]
    pub redis_url: String,

    #[envconfig(from = "REDIS_RESPONSE_TIMEOUT_MS", default = "100")]
    pub redis_response_timeout_ms: u64,

    #[envconfig(from = "REDIS_CONNECTION_TIMEOUT_MS", default = "1000")]
    pub redis_connection_timeout_ms: u64,

    #[envconfig(from = "FLAG_NAMESPACE", default = "feature")]
    pub flag_namespace: String,

    #[envconfig(from = "FLAG_SCAN_BATCH_SIZE", default = "100")]
    pub flag_scan_batch_size: usize,

    #[envconfig(from = "ADMIN_RATE_LIMIT_MAX_REQUESTS", default = "30")]
    pub admin_rate_limit_max_requests: u64,

    #[envconfig(from = "ADMIN_RATE_LIMIT_WINDOW_SECS", default = "60")]
    pub admin_rate_limit_window_secs: u64,

    #[envconfig(from = "ADMIN_RATE_LIMIT_KEY_PREFIX", default = "rate_limit:admin:")]
    pub admin_rate_limit_key_prefix: String,

    #[envconfig(from = "ADMIN_RATE_LIMIT_SUBJECT", default = "principal")]
    pub admin_rate_limit_subject: QuotaSubjectMode,

    #[envconfig(from = "ADMIN_API_KEYS", default = "")]
    pub admin_api_keys: AdminKeys,

    #[envconfig(from = "PUBLIC_READS", default = "true")]
    pub public_reads: FlexBool,

    #[envconfig(default = "1000")]
    pub max_concurrency: usize,

    #[envconfig(default = "false")]
    pub enable_metrics: bool,

    #[envconfig(from = "DEBUG", default = "false")]
    pub debug: FlexBool,

    #[envconfig(from = "OTEL_URL")]
    pub otel_url: Option<String>,

    #[envconfig(from = "OTEL_SAMPLING_RATE", default = "1.0")]
    pub otel_sampling_rate: f64,

    #[envconfig(from = "OTEL_SERVICE_NAME", default = "flag-control")]
    pub otel_service_name: String,

    #[envconfig(from = "OTEL_LOG_LEVEL", default = "info")]
    pub otel_log_level: tracing::Level,

    #[envconfig(from = "OTEL_EXPORT_TIMEOUT_SECS", default = "3")]
    pub otel_export_timeout_secs: u64,
}

impl Config {
    pub fn default_test_config() -> Self {
        Self {
            address: SocketAddr::from(([127, 0, 0, 1], 0)),
            redis_url: "redis://localhost:6379/".to_string(),
            redis_response_timeout_ms: 100,
            redis_connection_timeout_ms: 1000,
            flag_namespace: "feature".to_string(),
            flag_scan_batch_size: 100,
            admin_rate_limit_max_requests: 30,
            admin_rate_limit_window_secs: 60,
            admin_rate_limit_key_prefix: "rate_limit:admin:".to_string(),
            admin_rate_limit_subject: QuotaSubjectMode::Principal,
            admin_api_keys: AdminKeys::default(),
            public_reads: FlexBool(true),
            max_concurrency: 1000,
            enable_metrics: false,
            debug: FlexBool(false),
            otel_url: None,
            otel_sampling_rate: 1.0,
            otel_service_name: "flag-control".to_string(),
            otel_log_level: tracing::Level::INFO,
            otel_export_timeout_secs: 3,
        }
    }

    pub fn redis_response_timeout(&self) -> Option<Duration> {
        Some(self.redis_response_timeout_ms)
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    pub fn redis_connection_timeout(&self) -> Option<Duration> {
        Some(self.redis_connection_timeout_ms)
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }
}

pub static DEFAULT_TEST_CONFIG: Lazy<Config> = Lazy::new(Config::default_test_config);

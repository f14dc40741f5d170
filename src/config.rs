//! Configuration types, one per role, read from the environment.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use secrecy::SecretString;

use crate::adapters::{AdapterConfig, Backend};
use crate::error::ConfigError;

/// Default control API address used by workers and the watchdog.
pub const DEFAULT_MANAGER_URL: &str = "http://127.0.0.1:8000";

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_or(key: &str, default: &str) -> String {
    env_opt(key).unwrap_or_else(|| default.to_string())
}

fn env_parse<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_opt(key) {
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
        None => Ok(default),
    }
}

fn env_secs(key: &str, default: u64) -> Result<Duration, ConfigError> {
    let secs: u64 = env_parse(key, default)?;
    if secs == 0 {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "must be greater than zero".into(),
        });
    }
    Ok(Duration::from_secs(secs))
}

fn env_bool(key: &str) -> Result<bool, ConfigError> {
    match env_opt(key).map(|v| v.to_ascii_lowercase()) {
        None => Ok(false),
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(true),
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(false),
        Some(v) => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected a boolean, got {v}"),
        }),
    }
}

/// System-of-record connection settings.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Local path, or `libsql://` / `http(s)://` URL for a remote server.
    pub url: String,
    pub auth_token: Option<SecretString>,
}

impl StoreConfig {
    /// `FLEET_DATABASE_URL` is mandatory.
    pub fn from_env() -> Result<Self, ConfigError> {
        let url = env_opt("FLEET_DATABASE_URL")
            .ok_or_else(|| ConfigError::MissingEnvVar("FLEET_DATABASE_URL".into()))?;
        Ok(Self {
            url,
            auth_token: env_opt("FLEET_DATABASE_TOKEN").map(SecretString::from),
        })
    }
}

/// Control API, leader elector and scheduler settings.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub bind: String,
    /// Identity used as the leadership lease holder.
    pub node_id: String,
    pub leader_poll: Duration,
    pub scheduler_tick: Duration,
    pub scheduler_batch: usize,
    /// External router. `None` means the manager's own `/route`.
    pub router_url: Option<String>,
    pub router_timeout: Duration,
    /// Remote accountant. `None` means score in-process.
    pub accountant_url: Option<String>,
    pub accountant_timeout: Duration,
    pub min_output_length: usize,
    /// JSON capability catalog; the built-in catalog is used when unset.
    pub capabilities_path: Option<PathBuf>,
    pub event_poll: Duration,
    pub cors_origins: Vec<String>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8000".to_string(),
            node_id: default_node_id(),
            leader_poll: Duration::from_secs(5),
            scheduler_tick: Duration::from_secs(2),
            scheduler_batch: 10,
            router_url: None,
            router_timeout: Duration::from_secs(2),
            accountant_url: None,
            accountant_timeout: Duration::from_secs(2),
            min_output_length: crate::governance::scorer::DEFAULT_MIN_LENGTH,
            capabilities_path: None,
            event_poll: Duration::from_millis(2000),
            cors_origins: Vec::new(),
        }
    }
}

impl ManagerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let event_poll_ms: u64 = env_parse("FLEET_EVENT_POLL_MS", 2000)?;
        Ok(Self {
            bind: env_or("FLEET_BIND", &defaults.bind),
            node_id: env_opt("FLEET_NODE_ID").unwrap_or(defaults.node_id),
            leader_poll: env_secs("FLEET_LEADER_POLL_SECS", 5)?,
            scheduler_tick: env_secs("FLEET_SCHEDULER_TICK_SECS", 2)?,
            scheduler_batch: env_parse("FLEET_SCHEDULER_BATCH", defaults.scheduler_batch)?,
            router_url: env_opt("FLEET_ROUTER_URL"),
            router_timeout: env_secs("FLEET_ROUTER_TIMEOUT_SECS", 2)?,
            accountant_url: env_opt("FLEET_ACCOUNTANT_URL"),
            accountant_timeout: defaults.accountant_timeout,
            min_output_length: env_parse("FLEET_MIN_OUTPUT_LENGTH", defaults.min_output_length)?,
            capabilities_path: env_opt("FLEET_CAPABILITIES").map(PathBuf::from),
            event_poll: Duration::from_millis(event_poll_ms.max(1)),
            cors_origins: env_opt("FLEET_CORS_ORIGINS")
                .map(|v| {
                    v.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
        })
    }
}

fn default_node_id() -> String {
    let host = env_or("HOSTNAME", "manager");
    format!("{host}-{}", std::process::id())
}

/// Worker runtime settings.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub manager_url: String,
    /// Identity this worker registers and claims under.
    pub worker_id: String,
    pub sandbox_dir: PathBuf,
    pub poll_interval: Duration,
    /// Ask the API to filter by identity instead of scanning client-side.
    pub server_side_filter: bool,
    pub request_timeout: Duration,
    pub report_timeout: Duration,
    pub adapter: AdapterConfig,
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let backend: Backend = env_parse("FLEET_MODEL_BACKEND", Backend::Stub)?;
        let adapter = AdapterConfig {
            backend,
            ollama_host: env_or("OLLAMA_HOST", "http://localhost:11434"),
            ollama_model: env_or("OLLAMA_MODEL", "llama3"),
            openai_api_key: env_opt("OPENAI_API_KEY").map(SecretString::from),
            openai_model: env_or("OPENAI_MODEL", "gpt-4o-mini"),
            openai_base_url: env_or("OPENAI_BASE_URL", "https://api.openai.com/v1"),
            cli_command: env_or("FLEET_CLI_COMMAND", "echo"),
        };
        Ok(Self {
            manager_url: env_or("FLEET_MANAGER_URL", DEFAULT_MANAGER_URL),
            worker_id: env_or("FLEET_WORKER_ID", "worker_default"),
            sandbox_dir: PathBuf::from(env_or("FLEET_SANDBOX_DIR", "./sandbox")),
            poll_interval: env_secs("FLEET_WORKER_POLL_SECS", 2)?,
            server_side_filter: env_bool("FLEET_SERVER_SIDE_FILTER")?,
            request_timeout: Duration::from_secs(10),
            report_timeout: Duration::from_secs(15),
            adapter,
        })
    }
}

/// Watchdog thresholds.
#[derive(Debug, Clone)]
pub struct WatchdogConfig {
    pub manager_url: String,
    pub interval: Duration,
    /// IN_PROGRESS longer than this is stalled.
    pub stall_after: Duration,
    /// Cost above this within the window is a spike.
    pub cost_threshold: Decimal,
    /// More SUBMITTED jobs than this within the window is elevated.
    pub failure_threshold: i64,
    pub window: Duration,
    pub forward_timeout: Duration,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            manager_url: DEFAULT_MANAGER_URL.to_string(),
            interval: Duration::from_secs(30),
            stall_after: Duration::from_secs(5 * 60),
            cost_threshold: dec!(1.00),
            failure_threshold: 3,
            window: Duration::from_secs(60 * 60),
            forward_timeout: Duration::from_secs(2),
        }
    }
}

impl WatchdogConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            manager_url: env_or("FLEET_MANAGER_URL", DEFAULT_MANAGER_URL),
            interval: env_secs("FLEET_WATCHDOG_INTERVAL_SECS", 30)?,
            ..Self::default()
        })
    }
}

/// Validator cadence.
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    pub interval: Duration,
    pub batch_size: usize,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            batch_size: 10,
        }
    }
}

impl ValidatorConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            interval: env_secs("FLEET_VALIDATOR_INTERVAL_SECS", 10)?,
            ..Self::default()
        })
    }
}

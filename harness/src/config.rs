use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessConfig {
    pub server: ServerConfig,
    #[serde(default)]
    pub waiter: WaiterConfig,
    #[serde(default)]
    pub compose: ComposeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    #[serde(default = "default_server_port")]
    pub port: u16,
    #[serde(default = "default_admin_login")]
    pub admin_login: String,
    #[serde(default = "default_admin_password")]
    pub admin_password: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_server_port() -> u16 {
    8080
}

fn default_admin_login() -> String {
    "admin".to_string()
}

fn default_admin_password() -> String {
    "admin".to_string()
}

fn default_request_timeout() -> u64 {
    10
}

impl ServerConfig {
    /// Base URL of the REST API, without a trailing slash.
    pub fn api_url(&self) -> String {
        format!("http://{}:{}/api", self.host, self.port)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Polling budget shared by the report waiter and the machine state waits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaiterConfig {
    #[serde(default = "default_max_wait")]
    pub max_wait_secs: u64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_report_page_limit")]
    pub report_page_limit: u32,
}

fn default_max_wait() -> u64 {
    120
}

fn default_poll_interval() -> u64 {
    1000
}

fn default_report_page_limit() -> u32 {
    100
}

impl Default for WaiterConfig {
    fn default() -> Self {
        Self {
            max_wait_secs: default_max_wait(),
            poll_interval_ms: default_poll_interval(),
            report_page_limit: default_report_page_limit(),
        }
    }
}

/// Upper bound on any wait budget, one day.
const MAX_WAIT_LIMIT_SECS: u64 = 24 * 60 * 60;

impl WaiterConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_wait_secs > MAX_WAIT_LIMIT_SECS {
            anyhow::bail!(
                "waiter.max_wait_secs = {} exceeds the limit of {}",
                self.max_wait_secs,
                MAX_WAIT_LIMIT_SECS
            );
        }
        if self.poll_interval_ms == 0 {
            anyhow::bail!("waiter.poll_interval_ms must be positive");
        }
        if self.poll_interval_ms > self.max_wait_secs.saturating_mul(1000).max(1000) {
            anyhow::bail!(
                "waiter.poll_interval_ms = {} is longer than the wait budget",
                self.poll_interval_ms
            );
        }
        if self.report_page_limit == 0 {
            anyhow::bail!("waiter.report_page_limit must be positive");
        }
        Ok(())
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComposeConfig {
    #[serde(default = "default_compose_binary")]
    pub binary: Vec<String>,
    #[serde(default)]
    pub project_name: Option<String>,
    #[serde(default)]
    pub compose_files: Vec<PathBuf>,
    #[serde(default)]
    pub project_directory: Option<PathBuf>,
}

fn default_compose_binary() -> Vec<String> {
    vec!["docker".to_string(), "compose".to_string()]
}

impl Default for ComposeConfig {
    fn default() -> Self {
        Self {
            binary: default_compose_binary(),
            project_name: None,
            compose_files: Vec::new(),
            project_directory: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl HarnessConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: HarnessConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config
            .waiter
            .validate()
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        Ok(config)
    }

    pub fn default_config() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: default_server_port(),
                admin_login: default_admin_login(),
                admin_password: default_admin_password(),
                request_timeout_secs: default_request_timeout(),
            },
            waiter: WaiterConfig::default(),
            compose: ComposeConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

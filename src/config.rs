use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_PORT: i64 = 2055;
pub const DEFAULT_SOCKETS: i64 = 1;
pub const DEFAULT_WORKERS: i64 = 2;
pub const DEFAULT_QUEUE_SIZE: i64 = 1_000;

/// Receiver configuration: an ordered list of UDP listeners.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Config {
    // Missing key falls back to the single-endpoint default
    #[serde(default = "default_listeners")]
    pub listeners: Vec<ListenerConfig>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ListenerConfig {
    #[serde(default)]
    pub scheme: String,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub port: i64,
    #[serde(default = "default_sockets")]
    pub sockets: i64,
    #[serde(default = "default_workers")]
    pub workers: i64,
    #[serde(rename = "queueSize", default = "default_queue_size")]
    pub queue_size: i64,
}

/// Flow export protocol family decoded by a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Netflow,
    Sflow,
    /// Generic flow: NetFlow or sFlow, detected per datagram
    Flow,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Netflow => "netflow",
            Scheme::Sflow => "sflow",
            Scheme::Flow => "flow",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scheme {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "netflow" => Ok(Scheme::Netflow),
            "sflow" => Ok(Scheme::Sflow),
            "flow" => Ok(Scheme::Flow),
            _ => Err(ConfigError::ValidationError(
                "scheme must be one of sflow, netflow, or flow".to_string(),
            )),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listeners: default_listeners(),
        }
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            scheme: Scheme::Netflow.as_str().to_string(),
            hostname: String::new(),
            port: DEFAULT_PORT,
            sockets: DEFAULT_SOCKETS,
            workers: DEFAULT_WORKERS,
            queue_size: DEFAULT_QUEUE_SIZE,
        }
    }
}

fn default_listeners() -> Vec<ListenerConfig> {
    vec![ListenerConfig::default()]
}
fn default_sockets() -> i64 {
    DEFAULT_SOCKETS
}
fn default_workers() -> i64 {
    DEFAULT_WORKERS
}
fn default_queue_size() -> i64 {
    DEFAULT_QUEUE_SIZE
}

impl Config {
    /// Load configuration from a YAML file
    pub async fn from_yaml_file(path: &str) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound(path.to_string())
            } else {
                ConfigError::IoError(e.to_string())
            }
        })?;

        Self::from_yaml_str(&content)
    }

    /// Parse configuration from a YAML string (useful for testing)
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let mut config: Config =
            serde_yaml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.apply_defaults();
        config.validate()?;

        Ok(config)
    }

    /// Substitute defaults for values that are corrected rather than rejected.
    ///
    /// Only `queueSize` is treated this way; a non-positive queue size becomes
    /// [`DEFAULT_QUEUE_SIZE`].
    pub fn apply_defaults(&mut self) {
        for listener in &mut self.listeners {
            if listener.queue_size <= 0 {
                listener.queue_size = DEFAULT_QUEUE_SIZE;
            }
        }
    }

    /// Validate every listener, stopping at the first invalid one
    pub fn validate(&self) -> Result<(), ConfigError> {
        for listener in &self.listeners {
            listener.validate()?;
        }
        Ok(())
    }
}

impl ListenerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.scheme()?;

        if self.sockets <= 0 {
            return Err(ConfigError::ValidationError(
                "sockets must be greater than 0".to_string(),
            ));
        }

        if self.workers <= 0 {
            return Err(ConfigError::ValidationError(
                "workers must be greater than 0".to_string(),
            ));
        }

        if self.port <= 0 {
            return Err(ConfigError::ValidationError(
                "port must be greater than 0".to_string(),
            ));
        }

        if self.port > i64::from(u16::MAX) {
            return Err(ConfigError::ValidationError(format!(
                "port must be at most {}",
                u16::MAX
            )));
        }

        Ok(())
    }

    pub fn scheme(&self) -> Result<Scheme, ConfigError> {
        self.scheme.parse()
    }

    /// Host to bind; an empty hostname means every interface
    pub fn bind_host(&self) -> &str {
        if self.hostname.is_empty() {
            "0.0.0.0"
        } else {
            &self.hostname
        }
    }

    /// `hostname:port` as configured, used to label emitted records
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.bind_host(), self.port)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("File not found: {0}")]
    FileNotFound(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
}

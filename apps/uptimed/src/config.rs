use std::time::Duration;
use std::{env, fmt, fs, io, path};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::monitoring::checker::DEFAULT_PROBE_TIMEOUT;
use crate::monitoring::scheduler::DEFAULT_CHECK_INTERVAL;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read {}: {source}", .path.display())]
    ReadFailed { path: path::PathBuf, source: io::Error },
    #[error("failed to write {}: {source}", .path.display())]
    WriteFailed { path: path::PathBuf, source: io::Error },
    #[error("failed to parse {}: {source}", .path.display())]
    ParseFailed { path: path::PathBuf, source: toml::de::Error },
    #[error("failed to serialize config: {0}")]
    SerializeFailed(#[from] toml::ser::Error),
    #[error("no config directory available, set XDG_CONFIG_HOME or HOME")]
    ConfigPathUnavailable,
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub zeromq: ZeroMQ,
    pub database: Database,
    pub monitoring: Monitoring,
    pub client: Client,

    /// Directory of the file this was loaded from; relative paths resolve
    /// against it.
    #[serde(skip)]
    base_dir: Option<path::PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZeroMQ {
    /// Address the daemon binds
    pub bind: String,
    /// Address clients connect to
    pub host: String,
    pub port: u16,
    /// Threads serving client requests
    pub workers: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Database {
    pub path: path::PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Monitoring {
    pub interval_seconds: u64,
    pub timeout_seconds: u64,
    /// Skip certificate and hostname verification so self-signed endpoints
    /// can be watched. Probes then prove reachability, not identity.
    pub accept_invalid_certs: bool,
    /// How long shutdown waits for running probes
    pub drain_timeout_seconds: u64,
    /// How long an add waits for the first check before replying.
    /// Must stay below `client.request_timeout_ms`.
    pub add_probe_budget_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Client {
    pub request_timeout_ms: u64,
    pub reconnect_backoff_ms: u64,
    pub refresh_interval_seconds: u64,
}

impl Default for ZeroMQ {
    fn default() -> Self {
        Self { bind: "127.0.0.1".into(), host: "localhost".into(), port: 5555, workers: 4 }
    }
}

impl Default for Database {
    fn default() -> Self {
        Self { path: "uptimed.db".into() }
    }
}

impl Default for Monitoring {
    fn default() -> Self {
        Self {
            interval_seconds: DEFAULT_CHECK_INTERVAL.as_secs(),
            timeout_seconds: DEFAULT_PROBE_TIMEOUT.as_secs(),
            accept_invalid_certs: true,
            drain_timeout_seconds: 15,
            add_probe_budget_ms: 3000,
        }
    }
}

impl Default for Client {
    fn default() -> Self {
        Self { request_timeout_ms: 5000, reconnect_backoff_ms: 1000, refresh_interval_seconds: 5 }
    }
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

/// Get default config path ($XDG_CONFIG_HOME/uptimed/config.toml or
/// $HOME/.config/...)
fn default_config_path() -> Result<path::PathBuf, Error> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".config")
    } else {
        return Err(Error::ConfigPathUnavailable);
    };

    Ok(path.join("uptimed/config.toml"))
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str, value: &dyn fmt::Display| {
                writeln!(f, "  {:indent$}{}: {}", "", label, value, indent = level * 2)
            }
        };
        let write_title_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str| {
                writeln!(f, "{:indent$}{}", "", label, indent = level * 2)
            }
        };

        let write_title_1 = write_title_indented(1);
        let write_1 = write_indented(1);

        writeln!(f, "Current Configuration:")?;
        write_title_1(f, "ZeroMQ")?;
        write_1(f, "Bind Address", &self.zeromq.bind)?;
        write_1(f, "Client Host", &self.zeromq.host)?;
        write_1(f, "Port", &self.zeromq.port)?;
        write_1(f, "Workers", &self.zeromq.workers)?;

        write_title_1(f, "Database")?;
        write_1(f, "Path", &self.database_path().display())?;

        write_title_1(f, "Monitoring")?;
        write_1(f, "Interval (s)", &self.monitoring.interval_seconds)?;
        write_1(f, "Timeout (s)", &self.monitoring.timeout_seconds)?;
        write_1(f, "Accept Invalid Certs", &self.monitoring.accept_invalid_certs)?;
        write_1(f, "Drain Timeout (s)", &self.monitoring.drain_timeout_seconds)?;
        write_1(f, "Add Probe Budget (ms)", &self.monitoring.add_probe_budget_ms)?;

        write_title_1(f, "Client")?;
        write_1(f, "Request Timeout (ms)", &self.client.request_timeout_ms)?;
        write_1(f, "Reconnect Backoff (ms)", &self.client.reconnect_backoff_ms)?;
        write_1(f, "Refresh Interval (s)", &self.client.refresh_interval_seconds)?;

        Ok(())
    }
}

impl Config {
    /// Generate Config structure from file
    ///
    /// Creates a default config in ~/.config/uptimed/config.toml
    ///  or the specified path, with the name config.toml if one does not exist
    ///
    /// ```rust,ignore
    /// let cfg = config::Config::from_config(None::<&path::Path>)?;
    /// println!("{}", cfg);
    /// ```
    pub fn from_config(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, Error> {
        let config_path: path::PathBuf = if let Some(path) = optional_path {
            normalize_toml_path(path.as_ref())
        } else {
            default_config_path()?
        };

        let mut config = if config_path.exists() {
            let raw_string = fs::read_to_string(&config_path)
                .map_err(|source| Error::ReadFailed { path: config_path.clone(), source })?;
            toml::from_str::<Self>(raw_string.as_str())
                .map_err(|source| Error::ParseFailed { path: config_path.clone(), source })?
        } else {
            let config = Self::default();
            config.write_config(&config_path)?;
            config
        };

        config.validate()?;
        config.base_dir = config_path.parent().map(path::Path::to_path_buf);
        Ok(config)
    }

    /// Serialize and write a config to a file
    pub fn write_config(&self, path: &path::Path) -> Result<(), Error> {
        let config_str: String = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|source| Error::WriteFailed { path: parent.to_path_buf(), source })?;
        }

        fs::write(path, config_str)
            .map_err(|source| Error::WriteFailed { path: path.to_path_buf(), source })
    }

    pub fn validate(&self) -> Result<(), Error> {
        let monitoring = &self.monitoring;
        if monitoring.interval_seconds < 1 {
            return Err(Error::Invalid("monitoring.interval_seconds must be at least 1".into()));
        }
        if monitoring.timeout_seconds < 1 {
            return Err(Error::Invalid("monitoring.timeout_seconds must be at least 1".into()));
        }
        if monitoring.timeout_seconds >= monitoring.interval_seconds {
            return Err(Error::Invalid(format!(
                "monitoring.timeout_seconds ({}) must be shorter than interval_seconds ({})",
                monitoring.timeout_seconds, monitoring.interval_seconds
            )));
        }
        if monitoring.add_probe_budget_ms >= self.client.request_timeout_ms {
            return Err(Error::Invalid(format!(
                "monitoring.add_probe_budget_ms ({}) must be shorter than client.request_timeout_ms ({})",
                monitoring.add_probe_budget_ms, self.client.request_timeout_ms
            )));
        }
        if self.zeromq.workers < 1 {
            return Err(Error::Invalid("zeromq.workers must be at least 1".into()));
        }
        Ok(())
    }

    /// Database file, relative paths taken from the config file's directory
    pub fn database_path(&self) -> path::PathBuf {
        match &self.base_dir {
            Some(base) if self.database.path.is_relative() => base.join(&self.database.path),
            _ => self.database.path.clone(),
        }
    }

    pub fn bind_endpoint(&self) -> String {
        format!("tcp://{}:{}", self.zeromq.bind, self.zeromq.port)
    }

    pub fn client_endpoint(&self) -> String {
        format!("tcp://{}:{}", self.zeromq.host, self.zeromq.port)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.monitoring.interval_seconds)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.monitoring.timeout_seconds)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.monitoring.drain_timeout_seconds)
    }

    pub fn add_probe_budget(&self) -> Duration {
        Duration::from_millis(self.monitoring.add_probe_budget_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.client.request_timeout_ms)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.client.reconnect_backoff_ms)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.client.refresh_interval_seconds)
    }
}

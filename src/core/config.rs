//! Agent configuration (`svcrunner.toml`).
//!
//! Every section is optional. A missing file means defaults, not an error.
//!
//! ```toml
//! [server]
//! port = 9876
//!
//! [paths]
//! base_dir = "/srv/runner"
//!
//! [snapshots]
//! take_command = "vmctl snapshot {name}"
//! ```

use crate::core::error::RunnerError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE_NAME: &str = "svcrunner.toml";
pub const CONFIG_ENV_VAR: &str = "SVCRUNNER_CONFIG";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub paths: PathsConfig,
    pub timeouts: TimeoutConfig,
    pub device: DeviceConfig,
    pub kickstart: KickstartConfig,
    pub snapshots: SnapshotConfig,
    pub maintenance: MaintenanceConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    /// Socket read/write timeout per connection.
    pub io_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 9876,
            io_timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Relative paths below resolve against this directory.
    pub base_dir: PathBuf,
    pub testsuites: PathBuf,
    pub testcases: PathBuf,
    pub results: PathBuf,
    pub installers: PathBuf,
    pub coverage: PathBuf,
    pub uploads: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("."),
            testsuites: PathBuf::from("testsuites"),
            testcases: PathBuf::from("testcases"),
            results: PathBuf::from("results"),
            installers: PathBuf::from("installers"),
            coverage: PathBuf::from("coverage"),
            uploads: PathBuf::from("uploads"),
        }
    }
}

impl PathsConfig {
    pub fn resolve(&self, p: &Path) -> PathBuf {
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.base_dir.join(p)
        }
    }

    pub fn testsuites_dir(&self) -> PathBuf {
        self.resolve(&self.testsuites)
    }

    pub fn testcases_dir(&self) -> PathBuf {
        self.resolve(&self.testcases)
    }

    pub fn results_dir(&self) -> PathBuf {
        self.resolve(&self.results)
    }

    pub fn installers_dir(&self) -> PathBuf {
        self.resolve(&self.installers)
    }

    pub fn coverage_dir(&self) -> PathBuf {
        self.resolve(&self.coverage)
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.resolve(&self.uploads)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub device_command_secs: u64,
    pub case_default_secs: u64,
    /// Pause before snapshot and revert tasks begin.
    pub snapshot_delay_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            device_command_secs: 60,
            case_default_secs: crate::core::suite::DEFAULT_CASE_TIMEOUT_SECS,
            snapshot_delay_ms: 5_000,
        }
    }
}

impl TimeoutConfig {
    pub fn device_command(&self) -> Duration {
        Duration::from_secs(self.device_command_secs)
    }

    pub fn snapshot_delay(&self) -> Duration {
        Duration::from_millis(self.snapshot_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Program used to run command strings, invoked as `<shell> -c <cmd>`.
    pub shell: String,
    /// Prints `[key]: [value]` lines.
    pub properties_command: String,
    /// `{name}` and `{action}` are substituted.
    pub service_command: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            shell: "sh".to_string(),
            properties_command: "getprop".to_string(),
            service_command: "service {name} {action}".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KickstartConfig {
    /// `{url}` is substituted.
    pub install_command: Option<String>,
    /// `{product}` is substituted.
    pub uninstall_command: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    /// `{name}` is substituted.
    pub take_command: Option<String>,
    pub revert_command: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    /// Prints the number of available updates.
    pub search_command: Option<String>,
    /// Prints the number of downloaded updates.
    pub download_command: Option<String>,
    /// Prints `<installed> <failed> <reboot 0|1>`.
    pub install_command: Option<String>,
    pub reboot_command: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    pub fn from_toml(text: &str) -> Result<Self, RunnerError> {
        let config: Config =
            toml::from_str(text).map_err(|e| RunnerError::ConfigError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path`, else `$SVCRUNNER_CONFIG`, else `./svcrunner.toml`.
    /// An explicit path must exist; the fallbacks may be absent.
    pub fn load(path: Option<&Path>) -> Result<Self, RunnerError> {
        if let Some(p) = path {
            let content = fs::read_to_string(p).map_err(|e| {
                RunnerError::ConfigError(format!("cannot read {}: {e}", p.display()))
            })?;
            return Self::from_toml(&content);
        }

        let candidate = std::env::var_os(CONFIG_ENV_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME));
        if candidate.exists() {
            let content = fs::read_to_string(&candidate).map_err(RunnerError::IoError)?;
            return Self::from_toml(&content);
        }

        Ok(Config::default())
    }

    fn validate(&self) -> Result<(), RunnerError> {
        if self.server.io_timeout_secs == 0 {
            return Err(RunnerError::ConfigError(
                "server.io_timeout_secs must be positive".into(),
            ));
        }
        if self.device.shell.trim().is_empty() {
            return Err(RunnerError::ConfigError("device.shell must be set".into()));
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.bind, self.server.port)
    }
}

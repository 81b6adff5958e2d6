//! Session-layer configuration: TOML file + built-in defaults.
//!
//! The timeouts mirror the observed behavior of the debugger protocol: a
//! 5 second response window per command, a 2 second grace period during
//! teardown, and a 30 second idle sweep. All of them are knobs here rather
//! than hard-coded in the session code.

use gdbmux_core::{MuxError, MuxResult};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub registry: RegistrySection,
}

/// `[session]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionSection {
    /// Debugger launch command (program + arguments).
    #[serde(default = "default_command")]
    pub command: Vec<String>,
    /// Response collection window for one command, in seconds.
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
    /// Bounded wait for process exit during close, in seconds.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
    /// Idle-monitor wake interval, in seconds.
    #[serde(default = "default_idle_poll")]
    pub idle_poll_secs: u64,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            command: default_command(),
            command_timeout_secs: default_command_timeout(),
            shutdown_grace_secs: default_shutdown_grace(),
            idle_poll_secs: default_idle_poll(),
        }
    }
}

/// `[registry]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct RegistrySection {
    /// Period of the idle-session sweep, in seconds.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    /// Idle timeout applied when `open` does not specify one, in seconds.
    #[serde(default = "default_idle_timeout")]
    pub default_idle_timeout_secs: u64,
}

impl Default for RegistrySection {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval(),
            default_idle_timeout_secs: default_idle_timeout(),
        }
    }
}

fn default_command() -> Vec<String> {
    vec!["gdb".to_string(), "--interpreter=mi2".to_string()]
}
fn default_command_timeout() -> u64 {
    5
}
fn default_shutdown_grace() -> u64 {
    2
}
fn default_idle_poll() -> u64 {
    10
}
fn default_sweep_interval() -> u64 {
    30
}
fn default_idle_timeout() -> u64 {
    300
}

/// Resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub command: Vec<String>,
    pub command_timeout: Duration,
    pub shutdown_grace: Duration,
    pub idle_poll: Duration,
    pub sweep_interval: Duration,
    pub default_idle_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        ConfigFile::default().into()
    }
}

impl From<ConfigFile> for Config {
    fn from(file: ConfigFile) -> Self {
        Self {
            command: file.session.command,
            command_timeout: Duration::from_secs(file.session.command_timeout_secs),
            shutdown_grace: Duration::from_secs(file.session.shutdown_grace_secs),
            idle_poll: Duration::from_secs(file.session.idle_poll_secs),
            sweep_interval: Duration::from_secs(file.registry.sweep_interval_secs),
            default_idle_timeout: Duration::from_secs(file.registry.default_idle_timeout_secs),
        }
    }
}

impl Config {
    /// Load config from a TOML file, falling back to defaults when the file
    /// is absent or no path is given.
    pub fn load(config_path: Option<&Path>) -> MuxResult<Self> {
        let file_config = if let Some(path) = config_path {
            let expanded = expand_tilde(path);
            if expanded.exists() {
                info!(path = %expanded.display(), "loading config file");
                let content = std::fs::read_to_string(&expanded)?;
                toml::from_str::<ConfigFile>(&content)
                    .map_err(|e| MuxError::Config(format!("config parse error: {e}")))?
            } else {
                info!(path = %expanded.display(), "config file not found, using defaults");
                ConfigFile::default()
            }
        } else {
            ConfigFile::default()
        };

        if file_config.session.command.is_empty() {
            return Err(MuxError::Config("launch command is empty".to_string()));
        }

        Ok(file_config.into())
    }
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_constants() {
        let config = Config::default();
        assert_eq!(config.command, vec!["gdb", "--interpreter=mi2"]);
        assert_eq!(config.command_timeout, Duration::from_secs(5));
        assert_eq!(config.shutdown_grace, Duration::from_secs(2));
        assert_eq!(config.sweep_interval, Duration::from_secs(30));
        assert_eq!(config.default_idle_timeout, Duration::from_secs(300));
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let file: ConfigFile = toml::from_str(
            r#"
            [registry]
            sweep_interval_secs = 5
            "#,
        )
        .unwrap();
        let config: Config = file.into();
        assert_eq!(config.sweep_interval, Duration::from_secs(5));
        assert_eq!(config.command_timeout, Duration::from_secs(5));
        assert_eq!(config.command[0], "gdb");
    }
}

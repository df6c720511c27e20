//! Runner configuration, read from an optional `.altwalker.toml`.
//!
//! Configuration only supplies defaults; command-line flags always win.
//! `ALTWALKER_GRAPHWALKER_HOST` and `ALTWALKER_GRAPHWALKER_PORT` fill in the
//! generator connection when neither the flag nor the file set one.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_FILE: &str = ".altwalker.toml";

pub const ENV_GRAPHWALKER_HOST: &str = "ALTWALKER_GRAPHWALKER_HOST";
pub const ENV_GRAPHWALKER_PORT: &str = "ALTWALKER_GRAPHWALKER_PORT";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RunnerConfig {
    pub graphwalker: GraphWalkerConfig,
    pub executor: ExecutorConfig,
    pub report: ReportConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GraphWalkerConfig {
    /// Connect to a running service instead of spawning one.
    pub host: Option<String>,
    /// Port for a spawned service; 0 asks the OS for a free one.
    pub port: u16,
    pub executable: String,
}

impl Default for GraphWalkerConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: 0,
            executable: crate::graphwalker::DEFAULT_EXECUTABLE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExecutorConfig {
    pub url: Option<String>,
    /// Launch command templates; `{tests}` and `{url}` are substituted.
    pub python_command: Vec<String>,
    pub dotnet_command: Vec<String>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        let launch = crate::executor::ExecutorLaunch::default();
        Self {
            url: None,
            python_command: launch.python_command,
            dotnet_command: launch.dotnet_command,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReportConfig {
    pub file: Option<PathBuf>,
    pub path_file: Option<PathBuf>,
    pub xml_file: Option<PathBuf>,
}

impl RunnerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.graphwalker.executable.trim().is_empty() {
            return Err(anyhow!("graphwalker.executable must not be empty"));
        }
        for (name, command) in [
            ("executor.python_command", &self.executor.python_command),
            ("executor.dotnet_command", &self.executor.dotnet_command),
        ] {
            if command.is_empty() || command[0].trim().is_empty() {
                return Err(anyhow!("{name} must be a non-empty array"));
            }
        }
        Ok(())
    }

    pub fn launch(&self) -> crate::executor::ExecutorLaunch {
        crate::executor::ExecutorLaunch {
            python_command: self.executor.python_command.clone(),
            dotnet_command: self.executor.dotnet_command.clone(),
        }
    }
}

/// Load config from `path`, or from `.altwalker.toml` when no path is given.
/// A missing file yields the defaults; environment fallbacks apply last.
pub fn load_config(path: Option<&Path>) -> Result<RunnerConfig> {
    let default_path = PathBuf::from(DEFAULT_CONFIG_FILE);
    let (path, required) = match path {
        Some(path) => (path, true),
        None => (default_path.as_path(), false),
    };

    let mut config = if path.exists() {
        let contents =
            fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?
    } else if required {
        return Err(anyhow!("config file not found: {}", path.display()));
    } else {
        RunnerConfig::default()
    };

    apply_env(&mut config)?;
    config.validate()?;
    Ok(config)
}

fn apply_env(config: &mut RunnerConfig) -> Result<()> {
    if config.graphwalker.host.is_none() {
        if let Ok(host) = env::var(ENV_GRAPHWALKER_HOST) {
            if !host.is_empty() {
                config.graphwalker.host = Some(host);
            }
        }
    }
    if config.graphwalker.port == 0 {
        if let Ok(port) = env::var(ENV_GRAPHWALKER_PORT) {
            if !port.is_empty() {
                config.graphwalker.port = port
                    .parse()
                    .with_context(|| format!("{ENV_GRAPHWALKER_PORT}={port} is not a port"))?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let config = load_config(None).expect("load");
        assert_eq!(config.graphwalker.port, 0);
        assert_eq!(config.graphwalker.executable, "gw");
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = load_config(Some(&temp.path().join("nope.toml"))).expect_err("should fail");
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn file_values_are_read() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(
            &path,
            r#"
[graphwalker]
port = 9999
executable = "gw2"

[executor]
url = "http://localhost:6000"
"#,
        )
        .expect("write");

        let config = load_config(Some(&path)).expect("load");
        assert_eq!(config.graphwalker.port, 9999);
        assert_eq!(config.graphwalker.executable, "gw2");
        assert_eq!(config.executor.url.as_deref(), Some("http://localhost:6000"));
        // Untouched sections keep their defaults.
        assert!(!config.executor.python_command.is_empty());
    }

    #[test]
    fn empty_launch_command_is_rejected() {
        let mut config = RunnerConfig::default();
        config.executor.python_command = vec![];
        assert!(config.validate().is_err());
    }
}

//! Client configuration loaded from `.procflow/procflow.toml`.
//!
//! Example:
//!
//! ```toml
//! [client]
//! history_capacity = 200
//! default_timeout_secs = 120
//! shell = "/bin/bash"
//! max_buffer = 10485760
//!
//! [[templates]]
//! name = "deploy"
//! command = "./scripts/deploy.sh {{env}}"
//! required = ["env"]
//! timeout_secs = 900
//!
//! [templates.defaults]
//! env = "staging"
//! ```
//!
//! `PROCFLOW_HISTORY_CAPACITY` and `PROCFLOW_SHELL` override the file.

use crate::command::CommandTemplate;
use crate::command::history::DEFAULT_HISTORY_CAPACITY;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Directory holding procflow configuration inside a project.
pub const CONFIG_DIR: &str = ".procflow";
pub const CONFIG_FILE: &str = "procflow.toml";

pub const HISTORY_CAPACITY_ENV: &str = "PROCFLOW_HISTORY_CAPACITY";
pub const SHELL_ENV: &str = "PROCFLOW_SHELL";

/// Contents of `procflow.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcflowToml {
    #[serde(default)]
    pub client: ClientSection,
    #[serde(default)]
    pub templates: Vec<TemplateConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSection {
    /// Maximum number of direct executions kept in history
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// Timeout applied to commands that set none
    #[serde(default)]
    pub default_timeout_secs: Option<u64>,

    /// Shell used when a command enables the shell without naming one
    #[serde(default)]
    pub shell: Option<PathBuf>,

    /// Output limit in bytes applied to commands that set none
    #[serde(default)]
    pub max_buffer: Option<usize>,
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            history_capacity: default_history_capacity(),
            default_timeout_secs: None,
            shell: None,
            max_buffer: None,
        }
    }
}

fn default_history_capacity() -> usize {
    DEFAULT_HISTORY_CAPACITY
}

/// A user template declared in `[[templates]]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateConfig {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub defaults: HashMap<String, String>,
    /// Parameters that must be present and non-blank
    #[serde(default)]
    pub required: Vec<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl TemplateConfig {
    pub fn to_template(&self) -> CommandTemplate {
        let mut template = CommandTemplate::new(&self.command).require(self.required.clone());
        template.description = self.description.clone();
        template.defaults = self.defaults.clone();
        template.timeout = self.timeout_secs.map(Duration::from_secs);
        template.cwd = self.cwd.clone();
        template.env = self.env.clone();
        template
    }
}

/// Resolved settings consumed by `CommandClient::from_config`.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub history_capacity: usize,
    pub default_timeout: Option<Duration>,
    pub shell: Option<PathBuf>,
    pub max_buffer: Option<usize>,
    /// Registered after the built-ins, in file order
    pub templates: Vec<(String, CommandTemplate)>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ProcflowToml::default().resolve_with(|_| None)
    }
}

impl ProcflowToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse procflow.toml")
    }

    /// Load from `<project_dir>/.procflow/procflow.toml`.
    /// Returns default configuration if the file doesn't exist.
    pub fn load_or_default(project_dir: &Path) -> Result<Self> {
        let config_path = project_dir.join(CONFIG_DIR).join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Resolve against the process environment.
    pub fn resolve(&self) -> ClientConfig {
        self.resolve_with(|key| std::env::var(key).ok())
    }

    /// Resolve with `env` standing in for the process environment.
    ///
    /// Unparseable environment values are ignored with a warning.
    pub fn resolve_with(&self, env: impl Fn(&str) -> Option<String>) -> ClientConfig {
        let history_capacity = match env(HISTORY_CAPACITY_ENV) {
            Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
                tracing::warn!(value = %raw, "Ignoring invalid {}", HISTORY_CAPACITY_ENV);
                self.client.history_capacity
            }),
            None => self.client.history_capacity,
        };

        let shell = env(SHELL_ENV)
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from)
            .or_else(|| self.client.shell.clone());

        ClientConfig {
            history_capacity,
            default_timeout: self.client.default_timeout_secs.map(Duration::from_secs),
            shell,
            max_buffer: self.client.max_buffer,
            templates: self
                .templates
                .iter()
                .map(|t| (t.name.clone(), t.to_template()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_when_missing() {
        let dir = tempdir().unwrap();
        let toml = ProcflowToml::load_or_default(dir.path()).unwrap();
        assert_eq!(toml.client.history_capacity, 100);
        assert!(toml.templates.is_empty());

        let config = toml.resolve_with(|_| None);
        assert_eq!(config.history_capacity, 100);
        assert!(config.default_timeout.is_none());
        assert!(config.shell.is_none());
    }

    #[test]
    fn test_parse_full_file() {
        let content = r#"
[client]
history_capacity = 5
default_timeout_secs = 60
shell = "/bin/bash"
max_buffer = 2048

[[templates]]
name = "deploy"
command = "./deploy.sh {{env}} {{version}}"
description = "Deploy a build"
required = ["version"]
timeout_secs = 900
cwd = "/srv/app"

[templates.defaults]
env = "staging"

[templates.env]
DEPLOY_USER = "ci"
"#;
        let toml = ProcflowToml::parse(content).unwrap();
        let config = toml.resolve_with(|_| None);

        assert_eq!(config.history_capacity, 5);
        assert_eq!(config.default_timeout, Some(Duration::from_secs(60)));
        assert_eq!(config.shell, Some(PathBuf::from("/bin/bash")));
        assert_eq!(config.max_buffer, Some(2048));

        let (name, template) = &config.templates[0];
        assert_eq!(name, "deploy");
        assert_eq!(template.timeout, Some(Duration::from_secs(900)));
        assert_eq!(template.cwd, Some(PathBuf::from("/srv/app")));
        assert_eq!(template.env.get("DEPLOY_USER").map(String::as_str), Some("ci"));

        assert!(template.expand("deploy", &HashMap::new()).is_err());
        let params = HashMap::from([("version".to_string(), "1.2.0".to_string())]);
        assert_eq!(
            template.expand("deploy", &params).unwrap(),
            "./deploy.sh staging 1.2.0"
        );
    }

    #[test]
    fn test_load_from_project_dir() {
        let dir = tempdir().unwrap();
        let config_dir = dir.path().join(CONFIG_DIR);
        std::fs::create_dir_all(&config_dir).unwrap();
        std::fs::write(
            config_dir.join(CONFIG_FILE),
            "[client]\nhistory_capacity = 7\n",
        )
        .unwrap();

        let toml = ProcflowToml::load_or_default(dir.path()).unwrap();
        assert_eq!(toml.client.history_capacity, 7);
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        let err = ProcflowToml::parse("[client\nhistory_capacity = ").unwrap_err();
        assert!(err.to_string().contains("procflow.toml"));
    }

    #[test]
    fn test_environment_overrides_file() {
        let toml = ProcflowToml::parse("[client]\nhistory_capacity = 5\nshell = \"/bin/sh\"\n").unwrap();
        let config = toml.resolve_with(|key| match key {
            HISTORY_CAPACITY_ENV => Some("42".to_string()),
            SHELL_ENV => Some("/bin/zsh".to_string()),
            _ => None,
        });
        assert_eq!(config.history_capacity, 42);
        assert_eq!(config.shell, Some(PathBuf::from("/bin/zsh")));

        let config = toml.resolve_with(|key| {
            (key == HISTORY_CAPACITY_ENV).then(|| "lots".to_string())
        });
        assert_eq!(config.history_capacity, 5);
    }
}

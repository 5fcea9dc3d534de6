//! Named, parameterized command strings.
//!
//! A template's command contains `{{key}}` placeholders. Expansion merges the
//! caller's parameters over the template defaults, validates the result, and
//! substitutes every known placeholder textually. Placeholders with no value
//! are left in place.

use super::types::CommandOptions;
use crate::errors::CommandError;
use regex::{Captures, Regex};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

static PLACEHOLDER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z0-9_.-]+)\s*\}\}").expect("placeholder regex is valid")
});

/// Checks the final parameter set; `Err` carries the reason.
pub type TemplateValidator =
    Arc<dyn Fn(&HashMap<String, String>) -> Result<(), String> + Send + Sync>;

#[derive(Clone)]
pub struct CommandTemplate {
    pub command: String,
    pub description: Option<String>,
    pub defaults: HashMap<String, String>,
    /// Options pre-applied to builders created from this template
    pub cwd: Option<PathBuf>,
    pub timeout: Option<Duration>,
    pub env: HashMap<String, String>,
    pub validate: Option<TemplateValidator>,
}

impl CommandTemplate {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            description: None,
            defaults: HashMap::new(),
            cwd: None,
            timeout: None,
            env: HashMap::new(),
            validate: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_default(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.defaults.insert(key.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn in_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_validator(
        mut self,
        validate: impl Fn(&HashMap<String, String>) -> Result<(), String> + Send + Sync + 'static,
    ) -> Self {
        self.validate = Some(Arc::new(validate));
        self
    }

    /// Reject expansion unless every named parameter is present and non-blank.
    pub fn require<S: Into<String>>(self, keys: impl IntoIterator<Item = S>) -> Self {
        let keys: Vec<String> = keys.into_iter().map(Into::into).collect();
        if keys.is_empty() {
            return self;
        }
        self.with_validator(move |params| {
            let missing: Vec<&str> = keys
                .iter()
                .filter(|key| params.get(*key).is_none_or(|v| v.trim().is_empty()))
                .map(String::as_str)
                .collect();
            if missing.is_empty() {
                Ok(())
            } else {
                Err(format!("missing required parameter(s): {}", missing.join(", ")))
            }
        })
    }

    /// Defaults overridden by `params`.
    pub fn merged_params(&self, params: &HashMap<String, String>) -> HashMap<String, String> {
        let mut merged = self.defaults.clone();
        merged.extend(params.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged
    }

    /// Validate and substitute, producing the concrete command string.
    pub fn expand(
        &self,
        name: &str,
        params: &HashMap<String, String>,
    ) -> Result<String, CommandError> {
        let merged = self.merged_params(params);
        if let Some(validate) = &self.validate {
            validate(&merged).map_err(|message| CommandError::TemplateValidation {
                name: name.to_string(),
                message,
            })?;
        }
        Ok(substitute(&self.command, &merged))
    }

    /// The template's default options as a fresh draft.
    pub fn options(&self) -> CommandOptions {
        CommandOptions {
            cwd: self.cwd.clone(),
            timeout: self.timeout,
            env: self.env.clone(),
            ..CommandOptions::default()
        }
    }
}

impl std::fmt::Debug for CommandTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandTemplate")
            .field("command", &self.command)
            .field("description", &self.description)
            .field("defaults", &self.defaults)
            .field("cwd", &self.cwd)
            .field("timeout", &self.timeout)
            .field("env", &self.env)
            .field("validate", &self.validate.is_some())
            .finish()
    }
}

fn substitute(command: &str, params: &HashMap<String, String>) -> String {
    PLACEHOLDER_REGEX
        .replace_all(command, |caps: &Captures| match params.get(&caps[1]) {
            Some(value) => value.clone(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Templates every client starts with.
pub fn builtin_templates() -> Vec<(&'static str, CommandTemplate)> {
    vec![
        (
            "npm-install",
            CommandTemplate::new("npm install {{packages}}")
                .with_description("Install npm dependencies, optionally naming packages")
                .with_default("packages", "")
                .with_timeout(Duration::from_secs(300)),
        ),
        (
            "npm-run",
            CommandTemplate::new("npm run {{script}}")
                .with_description("Run a package.json script")
                .require(["script"])
                .with_timeout(Duration::from_secs(600)),
        ),
        (
            "git-status",
            CommandTemplate::new("git status --porcelain")
                .with_description("Short working tree status")
                .with_timeout(Duration::from_secs(10)),
        ),
        (
            "git-commit",
            CommandTemplate::new(r#"git commit -m "{{message}}""#)
                .with_description("Commit staged changes")
                .require(["message"])
                .with_timeout(Duration::from_secs(30)),
        ),
        (
            "docker-build",
            CommandTemplate::new("docker build -t {{tag}} {{context}}")
                .with_description("Build a docker image")
                .with_default("context", ".")
                .require(["tag"])
                .with_timeout(Duration::from_secs(1800)),
        ),
        (
            "disk-usage",
            CommandTemplate::new("du -sh {{path}}")
                .with_description("Disk usage of a path")
                .with_default("path", ".")
                .with_timeout(Duration::from_secs(30)),
        ),
    ]
}

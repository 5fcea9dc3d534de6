//! Bounded record of direct executions.

use super::types::{CommandOptions, CommandResult, Encoding, ShellMode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// The serializable subset of `CommandOptions` kept in history.
///
/// Callbacks, predicates and stdin contents are never recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafeOptions {
    pub cwd: Option<PathBuf>,
    pub env: HashMap<String, String>,
    #[serde(default, with = "optional_millis")]
    pub timeout: Option<Duration>,
    /// `None` when the shell was disabled, `"default"` or a shell path otherwise
    pub shell: Option<String>,
    pub encoding: Encoding,
}

impl From<&CommandOptions> for SafeOptions {
    fn from(options: &CommandOptions) -> Self {
        let shell = match &options.shell {
            ShellMode::Disabled => None,
            ShellMode::Default => Some("default".to_string()),
            ShellMode::Program(path) => Some(path.display().to_string()),
        };
        Self {
            cwd: options.cwd.clone(),
            env: options.env.clone(),
            timeout: options.timeout,
            shell,
            encoding: options.encoding,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: Uuid,
    pub command: String,
    pub options: SafeOptions,
    pub result: CommandResult,
    pub timestamp: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn new(command: impl Into<String>, options: &CommandOptions, result: CommandResult) -> Self {
        Self {
            id: Uuid::new_v4(),
            command: command.into(),
            options: SafeOptions::from(options),
            result,
            timestamp: Utc::now(),
        }
    }
}

/// FIFO ring buffer; the oldest entry is evicted once capacity is reached.
#[derive(Debug, Clone)]
pub struct CommandHistory {
    entries: VecDeque<HistoryEntry>,
    capacity: usize,
}

impl Default for CommandHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl CommandHistory {
    /// A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn push(&mut self, entry: HistoryEntry) {
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// The most recent `limit` entries (all when `None`), oldest first.
    pub fn recent(&self, limit: Option<usize>) -> Vec<HistoryEntry> {
        let skip = limit.map_or(0, |limit| self.entries.len().saturating_sub(limit));
        self.entries.iter().skip(skip).cloned().collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

mod optional_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}

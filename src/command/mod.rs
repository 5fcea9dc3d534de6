//! Command execution and orchestration.
//!
//! | Module       | Contents                                              |
//! |--------------|-------------------------------------------------------|
//! | `types`      | options, results, callbacks, retry policy             |
//! | `tokenize`   | quote-aware command splitting                         |
//! | `progress`   | `NN%` progress extraction                             |
//! | `strategy`   | `ExecutionStrategy` trait and `ProcessStrategy`       |
//! | `builder`    | `ConfigureCommand` setters and `CommandBuilder`       |
//! | `sequential` | `SequentialBuilder`, pipes and transactions           |
//! | `parallel`   | `ParallelBuilder`                                     |
//! | `template`   | `CommandTemplate` and the built-in templates          |
//! | `history`    | bounded execution history                             |
//! | `client`     | `CommandClient`, the entry point tying it together    |

pub mod builder;
pub mod client;
pub mod history;
pub mod parallel;
pub mod progress;
pub mod sequential;
pub mod strategy;
pub mod template;
pub mod tokenize;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use builder::{CommandBuilder, ConfigureCommand, SKIP_REASON};
pub use client::{BatchOutput, CommandClient, ExecutionMode};
pub use history::{CommandHistory, HistoryEntry, SafeOptions};
pub use parallel::ParallelBuilder;
pub use progress::{NoProgress, PercentExtractor, ProgressExtractor};
pub use sequential::SequentialBuilder;
pub use strategy::{ExecutionStrategy, MAX_BUFFER_MARKER, ProcessStrategy};
pub use template::CommandTemplate;
pub use types::{
    CommandCallbacks, CommandOptions, CommandResult, Encoding, KillSignal, OutputStream,
    ParallelResult, ProgressInfo, RetryOptions, ShellMode,
};

//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants and returns
//! the process exit code:
//!
//! | Module     | Commands handled                  |
//! |------------|-----------------------------------|
//! | `run`      | `Run`, `Exists`                   |
//! | `batch`    | `Parallel`, `Sequence`            |
//! | `template` | `Template`, `Templates`           |
//! | `output`   | shared result rendering           |

pub mod batch;
pub mod output;
pub mod run;
pub mod template;

pub use batch::{cmd_parallel, cmd_sequence};
pub use run::{cmd_exists, cmd_run};
pub use template::{cmd_template, cmd_templates};

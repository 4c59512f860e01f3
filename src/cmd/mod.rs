//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module     | Commands handled                      |
//! |------------|---------------------------------------|
//! | `project`  | `Init`, `Project`                     |
//! | `workflow` | `Workflow`, `Template`                |
//! | `run`      | `Run`, `Executions`, `Resume`         |
//! | `queue`    | `Queue`, `Webhook`                    |
//! | `config`   | `Config`                              |

pub mod config;
pub mod project;
pub mod queue;
pub mod run;
pub mod workflow;

pub use config::cmd_config;
pub use project::{cmd_init, cmd_project};
pub use queue::{cmd_queue, cmd_webhook};
pub use run::{cmd_executions, cmd_resume, cmd_run};
pub use workflow::{cmd_template, cmd_workflow};

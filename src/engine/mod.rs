//! Phase graph execution engine.
//!
//! | Module      | Contents                                   |
//! |-------------|--------------------------------------------|
//! | `execution` | Execution records and `AdvanceOutcome`     |
//! | `executor`  | `PhaseGraphExecutor`, the scheduling loop  |
//! | `task`      | `TaskBody` trait and the task registry     |

mod execution;
mod executor;
pub mod task;

pub use execution::{AdvanceOutcome, Execution, ExecutionStatus};
pub use executor::PhaseGraphExecutor;
pub use task::{NoopTask, RenderTemplateTask, TaskBody, TaskContext, TaskRegistry};

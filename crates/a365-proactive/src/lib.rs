//! Proactive scheduler: on every tick, each registered agent runs its enabled
//! tasks as independent operations (token chain, MCP handshake, tool call).

pub mod recorder;
pub mod scheduler;
pub mod template;

pub use recorder::{InMemoryRecorder, TaskRecorder, TaskRunRecord, TaskStatus};
pub use scheduler::{ProactiveScheduler, TickSummary};
pub use template::{render_arguments, TemplateVars};

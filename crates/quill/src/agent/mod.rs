//! The agent: reason-act loop, permission gate, interrupt controller, and
//! the event surface front ends observe it through.

pub mod events;
pub mod interrupt;
pub mod permissions;
pub mod runner;

pub use events::{AgentEvent, EventHandler, LoggingHandler, NoopHandler};
pub use interrupt::{InterruptController, KeyWatcher};
pub use permissions::{ApprovalRequest, PermissionGate, Prompter};
pub use runner::{Agent, AgentConfig};

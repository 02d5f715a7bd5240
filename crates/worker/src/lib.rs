//! Execution substrate for pipeline stages.
//!
//! Every stage owns a private, ordered [`mailbox`] drained by exactly one
//! [`actor`] task. All cross-stage interaction is an enqueue into the target
//! mailbox; nothing here shares mutable state between actors.

pub mod actor;
mod class;
pub mod mailbox;
mod panic;
mod spawn;

pub use actor::{Actor, ActorContext, ActorExit, ActorFlow, ActorHandle, ActorSpec, ShutdownMode, ShutdownReport, spawn_actor};
pub use class::TaskClass;
pub use mailbox::{MailboxReceiver, MailboxSendError, MailboxSender};
pub use panic::panic_message;
pub use spawn::spawn;

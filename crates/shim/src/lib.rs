//! Supervisor for the pipeline process.
//!
//! Control actions arrive out of band, one per line, and are queued into a
//! single supervising actor that owns the child process.

mod action;
mod config;
mod error;
mod supervisor;

pub use action::ControlAction;
pub use config::{DEFAULT_STOP_TIMEOUT_MS, ShimConfig};
pub use error::ShimError;
pub use supervisor::Supervisor;

//! Transform stages for a streaming telemetry pipeline.
//!
//! A stage receives hierarchical input nodes from upstream producers, keeps a
//! materialized output tree, and publishes incremental updates to attached
//! clients. Each stage runs as an actor on `telemetrify-worker`: its entry
//! points enqueue commands that are processed strictly in order, so no stage
//! state is ever shared or locked.
//!
//! Concrete stages implement [`Transformation`] and are started through a
//! [`TransformCtor`], usually looked up by type name in a
//! [`TransformRegistry`].

mod error;
pub mod example;
mod factory;
mod handle;
mod ids;
pub mod keypath;
mod message;
pub mod node;
mod output;
mod relay;
mod replica;
mod resources;
mod stage;
mod tree;
pub mod update;

pub use error::{ConfigError, DeliveryError, ResourceError, Result, TransformError};
pub use factory::{DEFAULT_MAILBOX_CAPACITY, StageBuilder, TransformCtor, TransformRegistry, check_mailbox_capacity, parse_config};
pub use handle::TransformHandle;
pub use ids::{ClientId, Uid};
pub use keypath::{KeyValue, Keypath, Segment};
pub use message::{ClientCallback, ControlMessage, FlowParams, Message, client_callback};
pub use node::Node;
pub use output::OutputMixin;
pub use replica::Replica;
pub use resources::SharedResources;
pub use stage::{OnClosed, StageState, TransformContext, Transformation};
pub use tree::OutputTree;
pub use update::{OutputUpdate, UpdateBatch, diff};

//! Messages exchanged between a stage and its clients.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::DeliveryError;
use crate::update::UpdateBatch;

/// Opaque per-write metadata (correlation id, ingestion time, ...).
///
/// Stages never interpret it; they pass it unchanged to every publish and
/// downstream write derived from the write that carried it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlowParams(Map<String, Value>);

impl FlowParams {
	pub fn new() -> Self {
		Self::default()
	}

	#[must_use]
	pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
		self.0.insert(key.into(), value.into());
		self
	}

	pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
		self.0.insert(key.into(), value.into())
	}

	pub fn get(&self, key: &str) -> Option<&Value> {
		self.0.get(key)
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}
}

/// Tagged control envelope that does not address the output tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlMessage {
	pub tag: String,
	pub payload: Value,
}

impl ControlMessage {
	pub fn new(tag: impl Into<String>, payload: impl Into<Value>) -> Self {
		Self {
			tag: tag.into(),
			payload: payload.into(),
		}
	}
}

/// What a client callback receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
	/// Incremental change published after a write or `update_output`.
	Update { batch: UpdateBatch, flow: FlowParams },
	/// Full-tree snapshot, always the first message after `attach`.
	Resync { batch: UpdateBatch },
	/// Control message broadcast by the stage's transformation.
	Control(ControlMessage),
}

impl Message {
	/// Update batch carried by this message, if any.
	pub fn batch(&self) -> Option<&UpdateBatch> {
		match self {
			Self::Update { batch, .. } | Self::Resync { batch } => Some(batch),
			Self::Control(_) => None,
		}
	}
}

/// Delivery callback registered by `attach`.
///
/// Called from the producing stage's processing sequence, so it must not
/// block; cross-stage callbacks enqueue into the target's mailbox.
pub type ClientCallback = Arc<dyn Fn(Message) -> Result<(), DeliveryError> + Send + Sync>;

/// Wraps a closure as a [`ClientCallback`].
pub fn client_callback<F>(f: F) -> ClientCallback
where
	F: Fn(Message) -> Result<(), DeliveryError> + Send + Sync + 'static,
{
	Arc::new(f)
}

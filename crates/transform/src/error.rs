//! Error types for the transform-stage protocol.

use thiserror::Error;

use crate::ids::{ClientId, Uid};

/// Errors reported to callers of a stage's entry points and factory.
#[derive(Debug, Error)]
pub enum TransformError {
	/// The stage configuration was malformed.
	#[error(transparent)]
	Config(#[from] ConfigError),

	/// A shared resource required by the stage could not be built.
	#[error("failed to acquire shared resource {key:?}: {source}")]
	ResourceConstruction {
		/// Registry key of the resource.
		key: String,
		/// Underlying registry error.
		#[source]
		source: ResourceError,
	},

	/// `attach` was called with a client id that is already registered.
	#[error("client {0} is already attached")]
	DuplicateClient(ClientId),

	/// The stage no longer accepts this operation.
	#[error("stage {0} is closed")]
	StageClosed(Uid),
}

/// Errors raised while validating a stage configuration node.
#[derive(Debug, Error)]
pub enum ConfigError {
	/// The node does not have the shape this transform type expects.
	#[error("invalid {kind} transform config: {source}")]
	Invalid {
		/// Transform type name.
		kind: &'static str,
		/// Deserialization failure.
		#[source]
		source: serde_json::Error,
	},

	/// The node has the right shape but a field value is unusable.
	#[error("invalid value for {field}: {reason}")]
	InvalidValue {
		/// Offending field.
		field: &'static str,
		/// Why it was rejected.
		reason: String,
	},

	/// No constructor is registered for this transform type.
	#[error("unknown transform type: {0}")]
	UnknownType(String),
}

/// Errors from the shared resources registry.
#[derive(Debug, Clone, Error)]
pub enum ResourceError {
	/// The resource factory failed; nothing was registered.
	#[error("factory for {key:?} failed: {reason}")]
	Construction {
		/// Registry key.
		key: String,
		/// Factory error message.
		reason: String,
	},

	/// The key is registered with an object of a different type.
	#[error("resource {key:?} holds {found}, requested {requested}")]
	TypeMismatch {
		/// Registry key.
		key: String,
		/// Requested type name.
		requested: &'static str,
		/// Registered type name.
		found: &'static str,
	},

	/// The registry is no longer running.
	#[error("shared resources registry is unavailable")]
	Unavailable,
}

/// Failure reported by a client callback during publish fan-out.
///
/// Delivery failures are isolated to the failing client; they never fail
/// the publishing operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
	/// The client is gone; the stage detaches it.
	#[error("client disconnected")]
	Disconnected,

	/// The client's queue is full; this message is lost for that client.
	#[error("client queue is full")]
	Full,

	/// The client refused the message.
	#[error("client rejected message: {0}")]
	Rejected(String),
}

/// Result type for stage operations.
pub type Result<T, E = TransformError> = std::result::Result<T, E>;

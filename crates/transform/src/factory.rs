//! Stage construction: configuration parsing, resource leases, and the
//! registry of transform types.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use serde::de::DeserializeOwned;
use serde_json::Value;
use telemetrify_worker::{ActorSpec, TaskClass, spawn_actor};
use tracing::Span;

use crate::error::{ConfigError, Result, TransformError};
use crate::handle::TransformHandle;
use crate::ids::Uid;
use crate::resources::SharedResources;
use crate::stage::{OnClosed, TransformMixin, Transformation};

/// Mailbox capacity used when a stage config does not set one.
pub const DEFAULT_MAILBOX_CAPACITY: usize = telemetrify_worker::actor::DEFAULT_MAILBOX_CAPACITY;

pub(crate) fn default_mailbox_capacity() -> usize {
	DEFAULT_MAILBOX_CAPACITY
}

/// Constructor for one transform type.
#[async_trait]
pub trait TransformCtor: Send + Sync {
	/// Type name used in pipeline configuration.
	fn kind(&self) -> &'static str;

	/// Validates `config`, acquires shared resources, and starts the stage.
	///
	/// On error nothing is left running and every resource acquired so far
	/// has been released. `on_closed` fires once when the stage finishes
	/// closing. Stage events are emitted inside `log`, or inside a
	/// `transform{kind, uid}` span when none is given.
	async fn create(&self, uid: Uid, config: &Value, resources: &SharedResources, on_closed: OnClosed, log: Option<Span>) -> Result<TransformHandle>;
}

/// Deserializes a stage config node. `null` is treated as an empty object.
pub fn parse_config<T>(kind: &'static str, config: &Value) -> Result<T, ConfigError>
where
	T: DeserializeOwned,
{
	let parsed = match config {
		Value::Null => serde_json::from_value(Value::Object(Default::default())),
		other => T::deserialize(other),
	};
	parsed.map_err(|source| ConfigError::Invalid { kind, source })
}

/// Rejects a zero mailbox capacity.
pub fn check_mailbox_capacity(capacity: usize) -> Result<usize, ConfigError> {
	if capacity == 0 {
		return Err(ConfigError::InvalidValue {
			field: "mailbox-capacity",
			reason: "must be greater than zero".into(),
		});
	}
	Ok(capacity)
}

/// Assembles one stage inside [`TransformCtor::create`].
///
/// Resources acquired through the builder are leased by the stage and
/// released when it closes. If construction is abandoned before
/// [`StageBuilder::spawn`], call [`StageBuilder::abort`] to return them.
pub struct StageBuilder<'a> {
	uid: Uid,
	kind: &'static str,
	resources: &'a SharedResources,
	leases: Vec<String>,
	mailbox_capacity: usize,
	span: Span,
}

impl<'a> StageBuilder<'a> {
	pub fn new(kind: &'static str, uid: Uid, resources: &'a SharedResources, log: Option<Span>) -> Self {
		let span = log.unwrap_or_else(|| tracing::info_span!("transform", kind, %uid));
		Self {
			uid,
			kind,
			resources,
			leases: Vec::new(),
			mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
			span,
		}
	}

	#[must_use]
	pub fn mailbox_capacity(mut self, capacity: usize) -> Self {
		self.mailbox_capacity = capacity;
		self
	}

	/// Acquires a shared resource for the stage being built.
	///
	/// On failure every resource acquired so far is released.
	pub async fn acquire<T, F>(&mut self, key: impl Into<String>, factory: F) -> Result<Arc<T>>
	where
		T: Any + Send + Sync,
		F: FnOnce() -> anyhow::Result<T> + Send + 'static,
	{
		let key = key.into();
		match self.resources.acquire(key.clone(), factory).await {
			Ok(object) => {
				self.leases.push(key);
				Ok(object)
			}
			Err(source) => {
				tracing::warn!(parent: &self.span, uid = %self.uid, %key, error = %source, "transform.resource_failed");
				self.release_leases().await;
				Err(TransformError::ResourceConstruction { key, source })
			}
		}
	}

	/// Releases every resource acquired so far.
	pub async fn abort(mut self) {
		self.release_leases().await;
	}

	/// Starts the stage actor around `transform`.
	pub fn spawn<T>(self, transform: T, on_closed: OnClosed) -> TransformHandle
	where
		T: Transformation,
	{
		tracing::info!(
			parent: &self.span,
			uid = %self.uid,
			kind = self.kind,
			leases = self.leases.len(),
			"transform.created"
		);
		let spec = ActorSpec::new(format!("transform.{}.{}", self.kind, self.uid), TaskClass::Stage).mailbox_capacity(self.mailbox_capacity.max(1));
		let stage = TransformMixin::new(self.uid, self.kind, transform, self.resources.clone(), self.leases, on_closed, self.span);
		TransformHandle::new(self.uid, spawn_actor(spec, stage))
	}

	async fn release_leases(&mut self) {
		for key in std::mem::take(&mut self.leases) {
			if let Err(err) = self.resources.release(&key).await {
				tracing::warn!(parent: &self.span, uid = %self.uid, %key, error = %err, "transform.release_failed");
			}
		}
	}
}

/// Registry of transform constructors keyed by type name.
#[derive(Default)]
pub struct TransformRegistry {
	ctors: FxHashMap<&'static str, Arc<dyn TransformCtor>>,
}

impl TransformRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Registry preloaded with the transform types shipped in this crate.
	pub fn with_builtins() -> Self {
		let mut registry = Self::new();
		registry.register(crate::example::ExampleTransformCtor);
		registry
	}

	/// Registers `ctor`, replacing any previous constructor of the same kind.
	pub fn register(&mut self, ctor: impl TransformCtor + 'static) -> Option<Arc<dyn TransformCtor>> {
		self.ctors.insert(ctor.kind(), Arc::new(ctor))
	}

	pub fn get(&self, kind: &str) -> Option<&Arc<dyn TransformCtor>> {
		self.ctors.get(kind)
	}

	/// Registered type names, sorted.
	pub fn kinds(&self) -> Vec<&'static str> {
		let mut kinds: Vec<_> = self.ctors.keys().copied().collect();
		kinds.sort_unstable();
		kinds
	}

	/// Creates a stage of type `kind`.
	pub async fn create(
		&self,
		kind: &str,
		uid: Uid,
		config: &Value,
		resources: &SharedResources,
		on_closed: OnClosed,
		log: Option<Span>,
	) -> Result<TransformHandle> {
		let Some(ctor) = self.ctors.get(kind) else {
			return Err(ConfigError::UnknownType(kind.to_string()).into());
		};
		ctor.create(uid, config, resources, on_closed, log).await
	}
}

impl std::fmt::Debug for TransformRegistry {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("TransformRegistry").field("kinds", &self.kinds()).finish()
	}
}

#[cfg(test)]
mod tests {
	use serde::Deserialize;
	use serde_json::json;

	use super::*;

	#[derive(Debug, Deserialize, PartialEq)]
	#[serde(deny_unknown_fields, rename_all = "kebab-case")]
	struct Options {
		#[serde(default)]
		label: Option<String>,
		#[serde(default = "default_mailbox_capacity")]
		mailbox_capacity: usize,
	}

	#[test]
	fn null_config_uses_defaults() {
		let options: Options = parse_config("gauge", &Value::Null).unwrap();
		assert_eq!(
			options,
			Options {
				label: None,
				mailbox_capacity: DEFAULT_MAILBOX_CAPACITY
			}
		);
	}

	#[test]
	fn unknown_fields_and_wrong_shapes_are_rejected() {
		let err = parse_config::<Options>("gauge", &json!({"bogus": 1})).unwrap_err();
		assert!(matches!(err, ConfigError::Invalid { kind: "gauge", .. }));
		assert!(err.to_string().contains("bogus"));

		assert!(parse_config::<Options>("gauge", &json!([1, 2])).is_err());
		assert!(parse_config::<Options>("gauge", &json!({"label": 3})).is_err());
	}

	#[test]
	fn zero_mailbox_capacity_is_invalid() {
		assert!(matches!(
			check_mailbox_capacity(0),
			Err(ConfigError::InvalidValue {
				field: "mailbox-capacity",
				..
			})
		));
		assert_eq!(check_mailbox_capacity(8).unwrap(), 8);
	}

	#[tokio::test]
	async fn unknown_kind_is_a_config_error() {
		let registry = TransformRegistry::with_builtins();
		assert_eq!(registry.kinds(), vec!["example"]);

		let resources = SharedResources::new();
		let err = registry
			.create("nope", Uid(1), &Value::Null, &resources, Box::new(|| {}), None)
			.await
			.unwrap_err();
		assert!(matches!(err, TransformError::Config(ConfigError::UnknownType(ref kind)) if kind == "nope"));
	}

	#[tokio::test]
	async fn failed_acquire_releases_earlier_leases() {
		let resources = SharedResources::new();
		let mut builder = StageBuilder::new("gauge", Uid(3), &resources, None);
		builder.acquire("first", || Ok(1u8)).await.unwrap();
		let err = builder.acquire::<u8, _>("second", || anyhow::bail!("offline")).await.unwrap_err();

		assert!(matches!(err, TransformError::ResourceConstruction { ref key, .. } if key == "second"));
		assert_eq!(resources.ref_count("first").await.unwrap(), None);
	}

	#[tokio::test]
	async fn abort_releases_every_lease() {
		let resources = SharedResources::new();
		let mut builder = StageBuilder::new("gauge", Uid(4), &resources, None);
		builder.acquire("left", || Ok(1u8)).await.unwrap();
		builder.acquire("right", || Ok(2u8)).await.unwrap();
		assert_eq!(resources.ref_count("right").await.unwrap(), Some(1));

		builder.abort().await;
		assert_eq!(resources.ref_count("left").await.unwrap(), None);
		assert_eq!(resources.ref_count("right").await.unwrap(), None);
	}
}

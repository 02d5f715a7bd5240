//! Reference-counted registry of objects shared across stages.
//!
//! The registry runs as its own actor: every acquire and release is a
//! command processed in order, which is the single serialization point for
//! cross-stage state. Registration is rare compared to data flow, so the
//! factory runs inline on the registry's sequence.

use std::any::{Any, TypeId, type_name};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use telemetrify_worker::{Actor, ActorContext, ActorFlow, ActorHandle, ActorSpec, TaskClass, panic_message, spawn_actor};
use tokio::sync::oneshot;

use crate::error::ResourceError;

type Object = Arc<dyn Any + Send + Sync>;
type BuildFn = Box<dyn FnOnce() -> anyhow::Result<Object> + Send>;

enum RegistryCmd {
	Acquire {
		key: String,
		type_id: TypeId,
		type_name: &'static str,
		build: BuildFn,
		reply: oneshot::Sender<Result<Object, ResourceError>>,
	},
	Release {
		key: String,
		reply: oneshot::Sender<bool>,
	},
	RefCount {
		key: String,
		reply: oneshot::Sender<Option<usize>>,
	},
}

struct Entry {
	object: Object,
	type_id: TypeId,
	type_name: &'static str,
	refs: usize,
}

#[derive(Default)]
struct Registry {
	entries: FxHashMap<String, Entry>,
}

impl Registry {
	fn acquire(&mut self, key: String, type_id: TypeId, requested: &'static str, build: BuildFn) -> Result<Object, ResourceError> {
		if let Some(entry) = self.entries.get_mut(&key) {
			if entry.type_id != type_id {
				return Err(ResourceError::TypeMismatch {
					key,
					requested,
					found: entry.type_name,
				});
			}
			entry.refs += 1;
			tracing::debug!(%key, refs = entry.refs, "resources.acquired");
			return Ok(Arc::clone(&entry.object));
		}

		let object = match panic::catch_unwind(AssertUnwindSafe(build)) {
			Ok(Ok(object)) => object,
			Ok(Err(err)) => {
				return Err(ResourceError::Construction {
					key,
					reason: format!("{err:#}"),
				});
			}
			Err(payload) => {
				return Err(ResourceError::Construction {
					key,
					reason: format!("factory panicked: {}", panic_message(&*payload)),
				});
			}
		};
		tracing::info!(%key, kind = requested, "resources.created");
		self.entries.insert(
			key,
			Entry {
				object: Arc::clone(&object),
				type_id,
				type_name: requested,
				refs: 1,
			},
		);
		Ok(object)
	}

	fn release(&mut self, key: &str) -> bool {
		let Some(entry) = self.entries.get_mut(key) else {
			tracing::warn!(%key, "resources.release_unknown");
			return false;
		};
		entry.refs -= 1;
		if entry.refs > 0 {
			tracing::debug!(%key, refs = entry.refs, "resources.released");
			return false;
		}
		self.entries.remove(key);
		tracing::info!(%key, "resources.destroyed");
		true
	}
}

#[async_trait]
impl Actor for Registry {
	type Cmd = RegistryCmd;

	async fn handle(&mut self, cmd: Self::Cmd, _ctx: &mut ActorContext<Self::Cmd>) -> Result<ActorFlow, String> {
		match cmd {
			RegistryCmd::Acquire {
				key,
				type_id,
				type_name,
				build,
				reply,
			} => {
				let _ = reply.send(self.acquire(key, type_id, type_name, build));
			}
			RegistryCmd::Release { key, reply } => {
				let _ = reply.send(self.release(&key));
			}
			RegistryCmd::RefCount { key, reply } => {
				let _ = reply.send(self.entries.get(&key).map(|entry| entry.refs));
			}
		}
		Ok(ActorFlow::Continue)
	}
}

/// Cloneable handle to the shared resources registry.
///
/// The registry keeps one strong reference per key; holders of an acquired
/// `Arc` keep the object alive until they drop it, but the registry forgets
/// the key as soon as the last release arrives.
#[derive(Clone)]
pub struct SharedResources {
	actor: Arc<ActorHandle<RegistryCmd>>,
}

impl SharedResources {
	/// Starts a registry. Must be called from within a tokio runtime.
	pub fn new() -> Self {
		let actor = spawn_actor(ActorSpec::new("shared-resources", TaskClass::Coordination), Registry::default());
		Self { actor: Arc::new(actor) }
	}

	/// Returns the object registered under `key`, building it with `factory`
	/// on first use. A failed factory leaves nothing registered.
	pub async fn acquire<T, F>(&self, key: impl Into<String>, factory: F) -> Result<Arc<T>, ResourceError>
	where
		T: Any + Send + Sync,
		F: FnOnce() -> anyhow::Result<T> + Send + 'static,
	{
		let key = key.into();
		let (reply, rx) = oneshot::channel();
		let build: BuildFn = Box::new(move || factory().map(|object| Arc::new(object) as Object));
		self.actor
			.send(RegistryCmd::Acquire {
				key: key.clone(),
				type_id: TypeId::of::<T>(),
				type_name: type_name::<T>(),
				build,
				reply,
			})
			.await
			.map_err(|_| ResourceError::Unavailable)?;
		let object = rx.await.map_err(|_| ResourceError::Unavailable)??;
		object.downcast::<T>().map_err(|_| ResourceError::TypeMismatch {
			key,
			requested: type_name::<T>(),
			found: "another type",
		})
	}

	/// Drops one reference to `key`. Returns true if this destroyed the entry.
	pub async fn release(&self, key: &str) -> Result<bool, ResourceError> {
		let (reply, rx) = oneshot::channel();
		self.actor
			.send(RegistryCmd::Release { key: key.to_string(), reply })
			.await
			.map_err(|_| ResourceError::Unavailable)?;
		rx.await.map_err(|_| ResourceError::Unavailable)
	}

	/// Returns whether `key` is currently registered.
	pub async fn contains(&self, key: &str) -> Result<bool, ResourceError> {
		Ok(self.ref_count(key).await?.is_some())
	}

	/// Current reference count of `key`, `None` if it is not registered.
	pub async fn ref_count(&self, key: &str) -> Result<Option<usize>, ResourceError> {
		let (reply, rx) = oneshot::channel();
		self.actor
			.send(RegistryCmd::RefCount { key: key.to_string(), reply })
			.await
			.map_err(|_| ResourceError::Unavailable)?;
		rx.await.map_err(|_| ResourceError::Unavailable)
	}
}

impl Default for SharedResources {
	fn default() -> Self {
		Self::new()
	}
}

impl std::fmt::Debug for SharedResources {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SharedResources").field("actor", &self.actor.name()).finish()
	}
}

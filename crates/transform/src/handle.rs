use std::sync::Arc;

use parking_lot::Mutex;
use telemetrify_worker::{ActorExit, ActorHandle, MailboxSendError};
use tokio::sync::oneshot;

use crate::error::{DeliveryError, Result, TransformError};
use crate::ids::{ClientId, Uid};
use crate::message::{ClientCallback, FlowParams, Message, client_callback};
use crate::node::Node;
use crate::replica::Replica;
use crate::stage::StageCmd;
use crate::update::UpdateBatch;

struct StageLink {
	actor: ActorHandle<StageCmd>,
}

impl Drop for StageLink {
	fn drop(&mut self) {
		// Queued behind pending work; the actor handle then closes the mailbox.
		let _ = self.actor.try_send(StageCmd::Close);
	}
}

/// Cloneable handle to a running stage.
///
/// Every method enqueues a command; the stage processes them one at a time
/// in the order they were enqueued. Dropping the last clone closes the stage
/// after queued work drains.
#[derive(Clone)]
pub struct TransformHandle {
	uid: Uid,
	link: Arc<StageLink>,
}

impl TransformHandle {
	pub(crate) fn new(uid: Uid, actor: ActorHandle<StageCmd>) -> Self {
		Self {
			uid,
			link: Arc::new(StageLink { actor }),
		}
	}

	pub fn uid(&self) -> Uid {
		self.uid
	}

	pub fn name(&self) -> &str {
		self.link.actor.name()
	}

	/// Registers `callback` under `client`. The callback receives a resync of
	/// the current output before any later update.
	pub async fn attach(&self, client: ClientId, callback: ClientCallback) -> Result<()> {
		let (reply, rx) = oneshot::channel();
		self.enqueue(StageCmd::Attach { client, callback, reply }).await?;
		rx.await.map_err(|_| TransformError::StageClosed(self.uid))?
	}

	/// Removes `client`. Unknown ids and closed stages are ignored.
	pub async fn detach(&self, client: ClientId) -> Result<()> {
		match self.link.actor.send(StageCmd::Detach { client }).await {
			Ok(()) | Err(MailboxSendError::Closed) => Ok(()),
			Err(MailboxSendError::Full) => Err(TransformError::StageClosed(self.uid)),
		}
	}

	/// Feeds one input node from upstream producer `sender`.
	///
	/// Resolves once the stage has processed the write. Transformation
	/// failures are logged by the stage and do not surface here.
	pub async fn write(&self, sender: Uid, node: impl Into<Node>, flow: FlowParams) -> Result<()> {
		let (reply, rx) = oneshot::channel();
		self.enqueue(StageCmd::Write {
			sender,
			node: node.into(),
			flow,
			reply: Some(reply),
		})
		.await?;
		rx.await.map_err(|_| TransformError::StageClosed(self.uid))?
	}

	/// Applies and publishes a batch without a triggering input.
	pub async fn update_output(&self, batch: UpdateBatch) -> Result<()> {
		self.enqueue(StageCmd::UpdateOutput { batch }).await
	}

	/// Requests shutdown. Work already queued is processed first; closing an
	/// already closed stage is a no-op.
	pub async fn close(&self) -> Result<()> {
		match self.link.actor.send(StageCmd::Close).await {
			Ok(()) | Err(MailboxSendError::Closed) => Ok(()),
			Err(MailboxSendError::Full) => Err(TransformError::StageClosed(self.uid)),
		}
	}

	/// Waits for the stage's processing loop to end.
	pub async fn join(&self) -> Option<ActorExit> {
		self.link.actor.join().await
	}

	pub fn is_finished(&self) -> bool {
		self.link.actor.is_finished()
	}

	/// Callback that forwards everything it receives into this stage as
	/// writes from `sender`, keeping a replica of the sender's tree.
	///
	/// The replica turns a resync into a full-tree write and an update into
	/// the resulting tree, so this stage always sees complete input nodes.
	/// Never blocks: a full mailbox reports [`DeliveryError::Full`] and a
	/// closed one [`DeliveryError::Disconnected`].
	pub fn writer(&self, sender: Uid) -> ClientCallback {
		let tx = self.link.actor.sender();
		let replica = Mutex::new(Replica::new());
		client_callback(move |msg: Message| {
			let flow = match &msg {
				Message::Update { flow, .. } => flow.clone(),
				Message::Resync { .. } => FlowParams::default(),
				Message::Control(_) => return Ok(()),
			};
			let node = {
				let mut replica = replica.lock();
				replica.apply(&msg);
				replica.tree().root().clone()
			};
			tx.try_send(StageCmd::Write {
				sender,
				node,
				flow,
				reply: None,
			})
			.map_err(|err| match err {
				MailboxSendError::Full => DeliveryError::Full,
				MailboxSendError::Closed => DeliveryError::Disconnected,
			})
		})
	}

	async fn enqueue(&self, cmd: StageCmd) -> Result<()> {
		self.link.actor.send(cmd).await.map_err(|_| TransformError::StageClosed(self.uid))
	}
}

impl std::fmt::Debug for TransformHandle {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("TransformHandle")
			.field("uid", &self.uid)
			.field("name", &self.name())
			.field("finished", &self.is_finished())
			.finish()
	}
}

//! Generic stage skeleton.
//!
//! A stage is an actor: `attach`, `detach`, `write`, `update_output` and
//! `close` arrive as ordered commands and run one at a time against state
//! that nothing else can reach. The concrete transformation only maps input
//! nodes to update batches.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use telemetrify_worker::{Actor, ActorContext, ActorFlow, MailboxSender, panic_message};
use tokio::sync::oneshot;
use tracing::Span;

use crate::error::{Result, TransformError};
use crate::ids::{ClientId, Uid};
use crate::message::{ClientCallback, ControlMessage, FlowParams, Message};
use crate::node::Node;
use crate::output::OutputMixin;
use crate::relay::Upstream;
use crate::resources::SharedResources;
use crate::tree::OutputTree;
use crate::update::UpdateBatch;

/// Callback fired exactly once when a stage has finished closing.
pub type OnClosed = Box<dyn FnOnce() + Send + 'static>;

/// Domain-specific part of a stage.
///
/// Implementations run on the stage's processing sequence and must not
/// block. Errors and panics are caught by the skeleton and the write is
/// dropped; they never stop the stage.
pub trait Transformation: Send + 'static {
	/// Derives zero or more updates from one input node.
	///
	/// `sender` identifies the upstream producer; merging inputs from
	/// several producers is up to the implementation.
	fn write(&mut self, ctx: &mut TransformContext<'_>, sender: Uid, node: Node, flow: &FlowParams) -> anyhow::Result<UpdateBatch>;

	/// Handles a control message previously raised with [`TransformContext::relay`].
	fn on_control(&mut self, _ctx: &mut TransformContext<'_>, _msg: ControlMessage) {}

	/// Runs once while the stage is closing, after clients are dropped.
	fn on_close(&mut self) {}
}

/// View of the stage handed to a [`Transformation`].
pub struct TransformContext<'a> {
	uid: Uid,
	output: &'a OutputMixin,
	outbox: &'a mut Vec<ControlMessage>,
}

impl<'a> TransformContext<'a> {
	fn new(uid: Uid, output: &'a OutputMixin, outbox: &'a mut Vec<ControlMessage>) -> Self {
		Self { uid, output, outbox }
	}

	pub fn uid(&self) -> Uid {
		self.uid
	}

	/// Current output tree, before this step's updates are applied.
	pub fn output(&self) -> &OutputTree {
		self.output.tree()
	}

	/// Queues a control message back into this stage's own sequence; it is
	/// handed to [`Transformation::on_control`] once the current step ends,
	/// before the next command is taken from the mailbox.
	pub fn relay(&self, msg: ControlMessage) {
		self.output.relay().post(Upstream::Control(msg));
	}

	/// Sends a control message to every attached client once this step's
	/// updates have been published.
	pub fn broadcast(&mut self, msg: ControlMessage) {
		self.outbox.push(msg);
	}
}

/// Commands accepted by a stage's mailbox.
pub(crate) enum StageCmd {
	Attach {
		client: ClientId,
		callback: ClientCallback,
		reply: oneshot::Sender<Result<()>>,
	},
	Detach {
		client: ClientId,
	},
	Write {
		sender: Uid,
		node: Node,
		flow: FlowParams,
		reply: Option<oneshot::Sender<Result<()>>>,
	},
	UpdateOutput {
		batch: UpdateBatch,
	},
	Close,
}

/// Lifecycle of a stage. Only `Active` accepts writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
	Active,
	Closing,
	Closed,
}

/// Stage skeleton wrapping a concrete [`Transformation`].
pub(crate) struct TransformMixin<T> {
	uid: Uid,
	kind: &'static str,
	state: StageState,
	output: OutputMixin,
	transform: T,
	resources: SharedResources,
	leases: Vec<String>,
	on_closed: Option<OnClosed>,
	/// Relayed messages, drained after every command regardless of mailbox capacity.
	upstream: Arc<Mutex<VecDeque<Upstream>>>,
	address: Option<MailboxSender<StageCmd>>,
	span: Span,
}

impl<T> TransformMixin<T>
where
	T: Transformation,
{
	pub(crate) fn new(
		uid: Uid,
		kind: &'static str,
		transform: T,
		resources: SharedResources,
		leases: Vec<String>,
		on_closed: OnClosed,
		span: Span,
	) -> Self {
		Self {
			uid,
			kind,
			state: StageState::Active,
			output: OutputMixin::new(uid, span.clone()),
			transform,
			resources,
			leases,
			on_closed: Some(on_closed),
			upstream: Arc::default(),
			address: None,
			span,
		}
	}

	fn dispatch_attach(&mut self, client: ClientId, callback: ClientCallback) -> Result<()> {
		if self.state != StageState::Active {
			return Err(TransformError::StageClosed(self.uid));
		}
		self.output.attach(client, callback)
	}

	fn write(&mut self, sender: Uid, node: Node, flow: FlowParams) -> Result<()> {
		if self.state != StageState::Active {
			return Err(TransformError::StageClosed(self.uid));
		}

		let mut outbox = Vec::new();
		let outcome = {
			let mut ctx = TransformContext::new(self.uid, &self.output, &mut outbox);
			let transform = &mut self.transform;
			panic::catch_unwind(AssertUnwindSafe(|| transform.write(&mut ctx, sender, node, &flow)))
		};
		match outcome {
			Ok(Ok(batch)) => self.output.apply_and_publish(batch, flow),
			Ok(Err(err)) => {
				tracing::warn!(parent: &self.span, uid = %self.uid, %sender, error = %format!("{err:#}"), "transform.write_failed");
			}
			Err(payload) => {
				tracing::error!(parent: &self.span, uid = %self.uid, %sender, panic = %panic_message(&*payload), "transform.write_panicked");
			}
		}
		self.flush_outbox(outbox);
		Ok(())
	}

	fn update_output(&mut self, batch: UpdateBatch) {
		if self.state != StageState::Active {
			tracing::debug!(parent: &self.span, uid = %self.uid, entries = batch.len(), "transform.update_dropped");
			return;
		}
		self.output.apply_and_publish(batch, FlowParams::default());
	}

	fn on_upstream(&mut self, msg: Upstream) {
		match msg {
			Upstream::ClientFailed { client, error } => {
				if self.output.detach(client) {
					tracing::info!(parent: &self.span, uid = %self.uid, %client, %error, "transform.client_dropped");
				}
			}
			Upstream::Control(msg) => {
				if self.state != StageState::Active {
					return;
				}
				let mut outbox = Vec::new();
				let outcome = {
					let mut ctx = TransformContext::new(self.uid, &self.output, &mut outbox);
					let transform = &mut self.transform;
					panic::catch_unwind(AssertUnwindSafe(|| transform.on_control(&mut ctx, msg)))
				};
				if let Err(payload) = outcome {
					tracing::error!(parent: &self.span, uid = %self.uid, panic = %panic_message(&*payload), "transform.control_panicked");
				}
				self.flush_outbox(outbox);
			}
		}
	}

	fn drain_upstream(&mut self) {
		loop {
			let next = self.upstream.lock().pop_front();
			let Some(msg) = next else {
				break;
			};
			self.on_upstream(msg);
		}
	}

	fn flush_outbox(&self, outbox: Vec<ControlMessage>) {
		for msg in outbox {
			self.output.broadcast(Message::Control(msg));
		}
	}

	/// Runs the shutdown sequence once; later calls are no-ops.
	async fn close(&mut self) {
		if self.state != StageState::Active {
			tracing::debug!(parent: &self.span, uid = %self.uid, state = ?self.state, "transform.close_ignored");
			return;
		}
		self.state = StageState::Closing;
		let detached = self.output.close_all();

		if panic::catch_unwind(AssertUnwindSafe(|| self.transform.on_close())).is_err() {
			tracing::error!(parent: &self.span, uid = %self.uid, "transform.on_close_panicked");
		}

		for key in std::mem::take(&mut self.leases) {
			if let Err(err) = self.resources.release(&key).await {
				tracing::warn!(parent: &self.span, uid = %self.uid, %key, error = %err, "transform.release_failed");
			}
		}

		self.state = StageState::Closed;
		// Anything enqueued from now on is refused at the mailbox.
		if let Some(address) = &self.address {
			address.close();
		}
		tracing::info!(parent: &self.span, uid = %self.uid, kind = self.kind, detached, "transform.closed");

		if let Some(on_closed) = self.on_closed.take()
			&& panic::catch_unwind(AssertUnwindSafe(on_closed)).is_err()
		{
			tracing::error!(parent: &self.span, uid = %self.uid, "transform.on_closed_panicked");
		}
	}
}

#[async_trait]
impl<T> Actor for TransformMixin<T>
where
	T: Transformation,
{
	type Cmd = StageCmd;

	async fn on_start(&mut self, ctx: &mut ActorContext<Self::Cmd>) -> std::result::Result<(), String> {
		let upstream = Arc::clone(&self.upstream);
		// Bound before the first command is processed.
		self.output.relay().bind(move |msg| {
			upstream.lock().push_back(msg);
			true
		});
		self.address = Some(ctx.address());
		Ok(())
	}

	async fn handle(&mut self, cmd: Self::Cmd, _ctx: &mut ActorContext<Self::Cmd>) -> std::result::Result<ActorFlow, String> {
		match cmd {
			StageCmd::Attach { client, callback, reply } => {
				let _ = reply.send(self.dispatch_attach(client, callback));
			}
			StageCmd::Detach { client } => {
				self.output.detach(client);
			}
			StageCmd::Write { sender, node, flow, reply } => {
				let result = self.write(sender, node, flow);
				match reply {
					Some(reply) => {
						let _ = reply.send(result);
					}
					None => {
						if let Err(err) = result {
							tracing::debug!(parent: &self.span, uid = %self.uid, %sender, error = %err, "transform.write_rejected");
						}
					}
				}
			}
			StageCmd::UpdateOutput { batch } => self.update_output(batch),
			StageCmd::Close => self.close().await,
		}
		self.drain_upstream();
		Ok(ActorFlow::Continue)
	}

	async fn on_stop(&mut self, _ctx: &mut ActorContext<Self::Cmd>) {
		// Mailbox dropped or cancelled without an explicit close.
		self.close().await;
	}
}

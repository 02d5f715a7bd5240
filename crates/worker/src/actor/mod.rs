//! Single-consumer actors driven by a private mailbox.
//!
//! An actor processes commands strictly one at a time, in enqueue order.
//! There is no restart: an actor instance owns state (for example a stage's
//! output tree) that a fresh instance could not reconstruct.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::TaskClass;
use crate::mailbox::{self, MailboxReceiver, MailboxSendError, MailboxSender};

/// Default mailbox capacity for actors.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 256;

/// Continuation directive from one command handling step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorFlow {
	/// Continue processing commands.
	Continue,
	/// Stop this actor.
	Stop,
}

/// Why an actor loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActorExit {
	Stopped,
	MailboxClosed,
	Cancelled,
	StartupFailed(String),
	HandlerFailed(String),
	Panicked(String),
}

impl ActorExit {
	pub fn is_failure(&self) -> bool {
		matches!(self, Self::StartupFailed(_) | Self::HandlerFailed(_) | Self::Panicked(_))
	}
}

/// Actor trait executed by [`spawn_actor`].
#[async_trait]
pub trait Actor: Send + 'static {
	type Cmd: Send + 'static;

	/// Runs before the first command is received.
	async fn on_start(&mut self, _ctx: &mut ActorContext<Self::Cmd>) -> Result<(), String> {
		Ok(())
	}

	/// Runs once after the loop ends, whatever the reason.
	async fn on_stop(&mut self, _ctx: &mut ActorContext<Self::Cmd>) {}

	async fn handle(&mut self, cmd: Self::Cmd, ctx: &mut ActorContext<Self::Cmd>) -> Result<ActorFlow, String>;
}

/// Execution context handed to actor callbacks.
pub struct ActorContext<Cmd> {
	name: Arc<str>,
	address: MailboxSender<Cmd>,
	cancel: CancellationToken,
}

impl<Cmd> ActorContext<Cmd> {
	/// Actor name.
	pub fn name(&self) -> &str {
		&self.name
	}

	/// Sender into this actor's own mailbox.
	///
	/// Messages sent here are processed after everything already queued,
	/// never inline.
	pub fn address(&self) -> MailboxSender<Cmd> {
		self.address.clone()
	}

	/// Returns whether immediate shutdown was requested.
	pub fn is_cancelled(&self) -> bool {
		self.cancel.is_cancelled()
	}
}

/// Builder spec for one actor.
#[derive(Debug, Clone)]
pub struct ActorSpec {
	name: String,
	class: TaskClass,
	capacity: usize,
}

impl ActorSpec {
	pub fn new(name: impl Into<String>, class: TaskClass) -> Self {
		Self {
			name: name.into(),
			class,
			capacity: DEFAULT_MAILBOX_CAPACITY,
		}
	}

	/// Sets the mailbox capacity.
	///
	/// # Panics
	///
	/// Panics if `capacity` is zero.
	#[must_use]
	pub fn mailbox_capacity(mut self, capacity: usize) -> Self {
		assert!(capacity > 0, "mailbox capacity must be > 0");
		self.capacity = capacity;
		self
	}
}

/// Shutdown mode for actors.
#[derive(Debug, Clone, Copy)]
pub enum ShutdownMode {
	/// Preempt the current handler and skip queued commands.
	Immediate,
	/// Close the mailbox and let the actor drain it.
	Graceful { timeout: Duration },
}

/// Shutdown outcome for one actor.
#[derive(Debug, Clone)]
pub struct ShutdownReport {
	completed: bool,
	timed_out: bool,
	exit: Option<ActorExit>,
}

impl ShutdownReport {
	pub fn completed(&self) -> bool {
		self.completed
	}

	pub fn timed_out(&self) -> bool {
		self.timed_out
	}

	pub fn exit(&self) -> Option<&ActorExit> {
		self.exit.as_ref()
	}
}

/// Owning handle for one actor. Dropping it closes the mailbox.
pub struct ActorHandle<Cmd>
where
	Cmd: Send + 'static,
{
	name: Arc<str>,
	class: TaskClass,
	tx: MailboxSender<Cmd>,
	cancel: CancellationToken,
	exit: Arc<Mutex<Option<ActorExit>>>,
	done: watch::Receiver<bool>,
}

impl<Cmd> Drop for ActorHandle<Cmd>
where
	Cmd: Send + 'static,
{
	fn drop(&mut self) {
		self.tx.close();
	}
}

impl<Cmd> ActorHandle<Cmd>
where
	Cmd: Send + 'static,
{
	/// Actor name.
	pub fn name(&self) -> &str {
		&self.name
	}

	/// Task class.
	pub const fn class(&self) -> TaskClass {
		self.class
	}

	/// Enqueues one command, waiting for mailbox capacity.
	pub async fn send(&self, cmd: Cmd) -> Result<(), MailboxSendError> {
		self.tx.send(cmd).await
	}

	/// Enqueues one command without waiting.
	pub fn try_send(&self, cmd: Cmd) -> Result<(), MailboxSendError> {
		self.tx.try_send(cmd)
	}

	/// Returns a sender that does not keep the actor handle alive.
	pub fn sender(&self) -> MailboxSender<Cmd> {
		self.tx.clone()
	}

	/// Returns true once the actor loop has ended.
	pub fn is_finished(&self) -> bool {
		*self.done.borrow()
	}

	/// Exit reason, once the loop has ended.
	pub fn exit(&self) -> Option<ActorExit> {
		self.exit.lock().clone()
	}

	/// Waits until the actor loop has ended.
	pub async fn join(&self) -> Option<ActorExit> {
		let mut done = self.done.clone();
		// The sender is dropped when the supervising task ends; treat that as done.
		let _ = done.wait_for(|finished| *finished).await;
		self.exit()
	}

	/// Shuts down this actor.
	pub async fn shutdown(&self, mode: ShutdownMode) -> ShutdownReport {
		match mode {
			ShutdownMode::Immediate => {
				self.cancel.cancel();
				self.tx.close();
				let exit = self.join().await;
				ShutdownReport {
					completed: true,
					timed_out: false,
					exit,
				}
			}
			ShutdownMode::Graceful { timeout } => {
				self.tx.close();
				let completed = tokio::time::timeout(timeout, self.join()).await.is_ok();
				if !completed {
					tracing::warn!(actor = %self.name, "graceful shutdown timed out; cancelling");
					self.cancel.cancel();
				}
				ShutdownReport {
					completed,
					timed_out: !completed,
					exit: self.exit(),
				}
			}
		}
	}
}

/// Spawns an actor with its own mailbox.
///
/// Must be called from within a tokio runtime.
pub fn spawn_actor<A>(spec: ActorSpec, actor: A) -> ActorHandle<A::Cmd>
where
	A: Actor,
{
	let (tx, rx) = mailbox::bounded(spec.capacity);
	let name: Arc<str> = Arc::from(spec.name);
	let class = spec.class;
	let cancel = CancellationToken::new();
	let exit = Arc::new(Mutex::new(None));
	let (done_tx, done_rx) = watch::channel(false);

	let ctx = ActorContext {
		name: Arc::clone(&name),
		address: tx.clone(),
		cancel: cancel.clone(),
	};
	let task_name = Arc::clone(&name);
	let task_exit = Arc::clone(&exit);
	crate::spawn(class, async move {
		let child = crate::spawn(class, run_actor(actor, rx, ctx));
		let reason = match child.await {
			Ok(reason) => reason,
			Err(err) if err.is_panic() => ActorExit::Panicked(crate::panic_message(&*err.into_panic())),
			Err(_) => ActorExit::Cancelled,
		};
		tracing::debug!(actor = %task_name, class = class.as_str(), exit = ?reason, "worker.actor.exit");
		*task_exit.lock() = Some(reason);
		let _ = done_tx.send(true);
	});

	ActorHandle {
		name,
		class,
		tx,
		cancel,
		exit,
		done: done_rx,
	}
}

async fn run_actor<A>(mut actor: A, mut rx: MailboxReceiver<A::Cmd>, mut ctx: ActorContext<A::Cmd>) -> ActorExit
where
	A: Actor,
{
	let cancel = ctx.cancel.clone();

	let started = tokio::select! {
		biased;
		_ = cancel.cancelled() => Err(ActorExit::Cancelled),
		res = actor.on_start(&mut ctx) => res.map_err(ActorExit::StartupFailed),
	};
	if let Err(reason) = started {
		return reason;
	}

	let reason = loop {
		let cmd = tokio::select! {
			biased;
			_ = cancel.cancelled() => break ActorExit::Cancelled,
			msg = rx.recv() => {
				let Some(cmd) = msg else {
					break ActorExit::MailboxClosed;
				};
				cmd
			}
		};

		let flow = tokio::select! {
			biased;
			_ = cancel.cancelled() => break ActorExit::Cancelled,
			res = actor.handle(cmd, &mut ctx) => res,
		};

		match flow {
			Ok(ActorFlow::Continue) => {}
			Ok(ActorFlow::Stop) => break ActorExit::Stopped,
			Err(err) => break ActorExit::HandlerFailed(err),
		}
	};

	// Nothing queued after this point is processed.
	drop(rx);
	actor.on_stop(&mut ctx).await;
	reason
}

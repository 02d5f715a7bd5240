//! Output side of a stage: the output tree plus attached clients.

use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use telemetrify_worker::panic_message;
use tracing::Span;

use crate::error::{DeliveryError, Result, TransformError};
use crate::ids::{ClientId, Uid};
use crate::message::{ClientCallback, FlowParams, Message};
use crate::relay::{Upstream, UpstreamRelay};
use crate::tree::OutputTree;
use crate::update::UpdateBatch;

/// Owns a stage's output tree and client registrations.
///
/// Only the owning stage's processing sequence touches it, so nothing here
/// is locked. Clients are served in id order.
pub struct OutputMixin {
	uid: Uid,
	tree: OutputTree,
	clients: BTreeMap<ClientId, ClientCallback>,
	relay: UpstreamRelay,
	span: Span,
}

impl OutputMixin {
	pub(crate) fn new(uid: Uid, span: Span) -> Self {
		Self {
			uid,
			tree: OutputTree::new(),
			clients: BTreeMap::new(),
			relay: UpstreamRelay::unbound(),
			span,
		}
	}

	pub fn tree(&self) -> &OutputTree {
		&self.tree
	}

	pub fn client_count(&self) -> usize {
		self.clients.len()
	}

	pub fn is_attached(&self, client: ClientId) -> bool {
		self.clients.contains_key(&client)
	}

	pub(crate) fn relay(&self) -> &UpstreamRelay {
		&self.relay
	}

	/// Registers a client and sends it a full resync before anything else.
	pub fn attach(&mut self, client: ClientId, callback: ClientCallback) -> Result<()> {
		if self.clients.contains_key(&client) {
			return Err(TransformError::DuplicateClient(client));
		}
		let batch = self.tree.snapshot();
		tracing::debug!(parent: &self.span, uid = %self.uid, %client, entries = batch.len(), "output.attached");
		self.clients.insert(client, Arc::clone(&callback));
		self.deliver(client, &callback, Message::Resync { batch });
		Ok(())
	}

	/// Removes a client. Unknown ids are ignored; returns whether one was removed.
	pub fn detach(&mut self, client: ClientId) -> bool {
		let removed = self.clients.remove(&client).is_some();
		if removed {
			tracing::debug!(parent: &self.span, uid = %self.uid, %client, "output.detached");
		}
		removed
	}

	/// Applies `batch` to the tree, then hands the same batch to every client.
	///
	/// Empty batches change nothing and are not published.
	pub fn apply_and_publish(&mut self, batch: UpdateBatch, flow: FlowParams) {
		if batch.is_empty() {
			return;
		}
		self.tree.apply(&batch);
		self.broadcast(Message::Update { batch, flow });
	}

	/// Delivers one message to every attached client.
	pub fn broadcast(&self, msg: Message) {
		for (client, callback) in &self.clients {
			self.deliver(*client, callback, msg.clone());
		}
	}

	/// Drops every client without notifying them. Returns how many there were.
	pub fn close_all(&mut self) -> usize {
		let count = self.clients.len();
		self.clients.clear();
		count
	}

	fn deliver(&self, client: ClientId, callback: &ClientCallback, msg: Message) {
		match panic::catch_unwind(AssertUnwindSafe(|| callback(msg))) {
			Ok(Ok(())) => {}
			Ok(Err(error)) => {
				tracing::warn!(parent: &self.span, uid = %self.uid, %client, %error, "output.delivery_failed");
				if error == DeliveryError::Disconnected {
					// Detaching here would mutate the client table mid fan-out.
					self.relay.post(Upstream::ClientFailed { client, error });
				}
			}
			Err(payload) => {
				tracing::error!(
					parent: &self.span,
					uid = %self.uid,
					%client,
					panic = %panic_message(&*payload),
					"output.client_panicked"
				);
			}
		}
	}
}

impl std::fmt::Debug for OutputMixin {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("OutputMixin")
			.field("uid", &self.uid)
			.field("tree", &self.tree)
			.field("clients", &self.clients.keys().collect::<Vec<_>>())
			.field("relay", &self.relay)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use parking_lot::Mutex;
	use pretty_assertions::assert_eq;
	use serde_json::json;

	use super::*;
	use crate::keypath::Keypath;
	use crate::message::client_callback;
	use crate::node::Node;

	type Inbox = Arc<Mutex<Vec<Message>>>;

	fn recorder() -> (ClientCallback, Inbox) {
		let inbox: Inbox = Arc::default();
		let sink = Arc::clone(&inbox);
		let callback = client_callback(move |msg| {
			sink.lock().push(msg);
			Ok(())
		});
		(callback, inbox)
	}

	fn mixin() -> OutputMixin {
		OutputMixin::new(Uid(1), Span::none())
	}

	#[test]
	fn attach_delivers_resync_of_current_tree() {
		let mut output = mixin();
		output.apply_and_publish(UpdateBatch::replace_root(Node::from(json!({"a": 1}))), FlowParams::new());

		let (callback, inbox) = recorder();
		output.attach(ClientId(7), callback).unwrap();

		assert_eq!(
			*inbox.lock(),
			vec![Message::Resync {
				batch: UpdateBatch::replace_root(Node::from(json!({"a": 1})))
			}]
		);
	}

	#[test]
	fn duplicate_attach_is_rejected_without_side_effects() {
		let mut output = mixin();
		let (first, first_inbox) = recorder();
		let (second, second_inbox) = recorder();
		output.attach(ClientId(1), first).unwrap();

		let err = output.attach(ClientId(1), second).unwrap_err();
		assert!(matches!(err, TransformError::DuplicateClient(ClientId(1))));
		assert_eq!(first_inbox.lock().len(), 1);
		assert!(second_inbox.lock().is_empty());
		assert_eq!(output.client_count(), 1);
	}

	#[test]
	fn failing_client_does_not_block_others() {
		let mut output = mixin();
		output.attach(ClientId(1), client_callback(|_| Err(DeliveryError::Rejected("nope".into())))).unwrap();
		output.attach(ClientId(2), client_callback(|_| panic!("client bug"))).unwrap();
		let (callback, inbox) = recorder();
		output.attach(ClientId(3), callback).unwrap();

		let batch = UpdateBatch::new().set(Keypath::path(["a"]), Node::leaf(2));
		output.apply_and_publish(batch.clone(), FlowParams::new());

		assert_eq!(inbox.lock().last(), Some(&Message::Update { batch, flow: FlowParams::new() }));
		assert_eq!(output.client_count(), 3);
	}

	#[test]
	fn disconnected_client_is_reported_through_relay() {
		let mut output = mixin();
		let relayed = Arc::new(Mutex::new(Vec::new()));
		let sink = Arc::clone(&relayed);
		output.relay().bind(move |msg| {
			sink.lock().push(msg);
			true
		});

		output.attach(ClientId(9), client_callback(|_| Err(DeliveryError::Disconnected))).unwrap();
		assert_eq!(
			*relayed.lock(),
			vec![Upstream::ClientFailed {
				client: ClientId(9),
				error: DeliveryError::Disconnected
			}]
		);
		// Still registered until the stage processes the relayed message.
		assert!(output.is_attached(ClientId(9)));
	}

	#[test]
	fn detach_is_idempotent_and_close_all_silences() {
		let mut output = mixin();
		let (callback, inbox) = recorder();
		output.attach(ClientId(1), callback).unwrap();

		assert!(output.detach(ClientId(1)));
		assert!(!output.detach(ClientId(1)));
		assert!(!output.detach(ClientId(42)));

		let (callback, other) = recorder();
		output.attach(ClientId(2), callback).unwrap();
		assert_eq!(output.close_all(), 1);

		output.apply_and_publish(UpdateBatch::new().set(Keypath::path(["z"]), Node::leaf(0)), FlowParams::new());
		assert_eq!(inbox.lock().len(), 1);
		assert_eq!(other.lock().len(), 1);
	}

	#[test]
	fn empty_batches_are_not_published() {
		let mut output = mixin();
		let (callback, inbox) = recorder();
		output.attach(ClientId(1), callback).unwrap();
		output.apply_and_publish(UpdateBatch::new(), FlowParams::new());
		assert_eq!(inbox.lock().len(), 1);
	}
}

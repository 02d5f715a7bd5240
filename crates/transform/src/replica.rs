use crate::message::Message;
use crate::tree::OutputTree;

/// Client-side mirror of a producer's output tree.
///
/// Feeding it every message a client receives reproduces the producer's
/// tree: a resync resets the mirror before applying the snapshot.
#[derive(Debug, Clone, Default)]
pub struct Replica {
	tree: OutputTree,
	resyncs: usize,
	updates: usize,
}

impl Replica {
	pub fn new() -> Self {
		Self::default()
	}

	/// Applies one message; returns false for messages that do not touch the tree.
	pub fn apply(&mut self, msg: &Message) -> bool {
		match msg {
			Message::Update { batch, .. } => {
				self.tree.apply(batch);
				self.updates += 1;
				true
			}
			Message::Resync { batch } => {
				self.tree = OutputTree::new();
				self.tree.apply(batch);
				self.resyncs += 1;
				true
			}
			Message::Control(_) => false,
		}
	}

	pub fn tree(&self) -> &OutputTree {
		&self.tree
	}

	pub fn resyncs(&self) -> usize {
		self.resyncs
	}

	pub fn updates(&self) -> usize {
		self.updates
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;
	use crate::keypath::Keypath;
	use crate::message::{ControlMessage, FlowParams};
	use crate::node::Node;
	use crate::update::UpdateBatch;

	#[test]
	fn resync_discards_stale_state() {
		let mut replica = Replica::new();
		replica.apply(&Message::Update {
			batch: UpdateBatch::new().set(Keypath::path(["stale"]), Node::leaf(1)),
			flow: FlowParams::new(),
		});
		replica.apply(&Message::Resync {
			batch: UpdateBatch::replace_root(Node::from(json!({"fresh": 2}))),
		});
		assert_eq!(replica.tree().to_json(), json!({"fresh": 2}));
		assert_eq!((replica.resyncs(), replica.updates()), (1, 1));
	}

	#[test]
	fn control_messages_leave_tree_alone() {
		let mut replica = Replica::new();
		assert!(!replica.apply(&Message::Control(ControlMessage::new("ack", 1))));
		assert!(replica.tree().is_empty());
	}
}

use serde_json::Value;

use crate::keypath::Keypath;
use crate::node::Node;
use crate::update::{self, UpdateBatch};

/// Materialized output state of a stage.
///
/// The tree only changes through [`OutputTree::apply`], which cannot fail,
/// so a batch is never partially applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputTree {
	root: Node,
}

impl OutputTree {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn from_node(root: Node) -> Self {
		Self { root }
	}

	pub fn root(&self) -> &Node {
		&self.root
	}

	pub fn is_empty(&self) -> bool {
		self.root.is_empty()
	}

	pub fn get(&self, path: &Keypath) -> Option<&Node> {
		self.root.get(path)
	}

	/// Applies every entry of `batch` in order.
	pub fn apply(&mut self, batch: &UpdateBatch) {
		for (path, update) in batch {
			match update {
				Some(node) => self.root.set(path.segments(), node.clone()),
				None => self.root.remove(path.segments()),
			}
		}
	}

	/// Full-tree batch that rebuilds this tree when applied to an empty one.
	pub fn snapshot(&self) -> UpdateBatch {
		update::diff(&Node::empty(), &self.root)
	}

	/// Minimal batch that turns this tree into `target`.
	pub fn diff_to(&self, target: &Node) -> UpdateBatch {
		update::diff(&self.root, target)
	}

	pub fn to_json(&self) -> Value {
		self.root.to_json()
	}
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;
	use proptest::prelude::*;
	use serde_json::json;

	use super::*;

	#[test]
	fn later_entries_override_earlier_ones() {
		let mut tree = OutputTree::new();
		let a = Keypath::path(["a"]);
		tree.apply(&UpdateBatch::new().set(a.clone(), Node::leaf(1)).set(a.clone(), Node::leaf(2)));
		assert_eq!(tree.to_json(), json!({"a": 2}));

		tree.apply(&UpdateBatch::new().remove(a.clone()).set(a.child("b"), Node::leaf(3)));
		assert_eq!(tree.to_json(), json!({"a": {"b": 3}}));
	}

	#[test]
	fn removing_root_clears_everything() {
		let mut tree = OutputTree::from_node(Node::from(json!({"a": {"b": 1}, "c": 2})));
		tree.apply(&UpdateBatch::new().remove(Keypath::root()));
		assert!(tree.is_empty());
	}

	#[test]
	fn removal_takes_descendants_but_not_siblings() {
		let mut tree = OutputTree::from_node(Node::from(json!({"a": {"b": 1, "c": {"d": 2}}, "ab": 3})));
		tree.apply(&UpdateBatch::new().remove(Keypath::path(["a"])));
		assert_eq!(tree.to_json(), json!({"ab": 3}));
		assert_eq!(tree.get(&Keypath::path(["a", "c", "d"])), None);
	}

	#[test]
	fn snapshot_rebuilds_tree() {
		let tree = OutputTree::from_node(Node::from(json!({"x": {"y": [1, 2]}})));
		let mut replica = OutputTree::new();
		replica.apply(&tree.snapshot());
		assert_eq!(replica, tree);
		assert!(OutputTree::new().snapshot().is_empty());
	}

	fn arb_json() -> impl Strategy<Value = Value> {
		let leaf = prop_oneof![any::<bool>().prop_map(Value::from), (0i64..4).prop_map(Value::from), "[xy]".prop_map(Value::from),];
		leaf.prop_recursive(3, 16, 3, |inner| {
			prop::collection::btree_map("[a-d]", inner, 0..4).prop_map(|map| Value::Object(map.into_iter().collect()))
		})
	}

	fn arb_tree() -> impl Strategy<Value = Node> {
		prop::collection::btree_map("[a-d]", arb_json(), 0..4).prop_map(|map| Node::from(Value::Object(map.into_iter().collect())))
	}

	fn arb_path() -> impl Strategy<Value = Keypath> {
		prop::collection::vec("[a-d]", 0..3).prop_map(Keypath::path)
	}

	proptest! {
		/// Applying the diff of two trees to the first yields the second.
		#[test]
		fn prop_diff_converges(old in arb_tree(), new in arb_tree()) {
			let mut tree = OutputTree::from_node(old);
			let batch = tree.diff_to(&new);
			tree.apply(&batch);
			prop_assert_eq!(tree.root(), &new);
		}

		/// Removing a keypath drops it and every descendant, nothing else.
		#[test]
		fn prop_removal_is_prefix_closed(root in arb_tree(), target in arb_path(), other in arb_path()) {
			let before = OutputTree::from_node(root);
			let mut after = before.clone();
			after.apply(&UpdateBatch::new().remove(target.clone()));

			if target.is_prefix_of(&other) {
				prop_assert!(other.is_root() || after.get(&other).is_none());
			} else if !other.is_prefix_of(&target) {
				prop_assert_eq!(after.get(&other), before.get(&other));
			}
		}
	}
}

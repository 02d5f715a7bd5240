//! Output tree nodes.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::keypath::{Keypath, Segment};

/// A node of an output tree: a leaf value or a container of children.
///
/// JSON objects map to containers keyed by name segments; every other JSON
/// value (including arrays) is stored as a leaf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
	Leaf(Value),
	Tree(BTreeMap<Segment, Node>),
}

impl Default for Node {
	fn default() -> Self {
		Self::empty()
	}
}

impl Node {
	/// An empty container.
	pub fn empty() -> Self {
		Self::Tree(BTreeMap::new())
	}

	/// Node for a JSON value. Objects become containers, as with `Node::from`.
	pub fn leaf(value: impl Into<Value>) -> Self {
		Self::from(value.into())
	}

	/// True for a container without children. Leaves are never empty.
	pub fn is_empty(&self) -> bool {
		matches!(self, Self::Tree(children) if children.is_empty())
	}

	pub fn children(&self) -> Option<&BTreeMap<Segment, Node>> {
		match self {
			Self::Tree(children) => Some(children),
			Self::Leaf(_) => None,
		}
	}

	/// Node stored at `path`, relative to this node.
	pub fn get(&self, path: &Keypath) -> Option<&Node> {
		path.segments().iter().try_fold(self, |node, segment| node.children()?.get(segment))
	}

	/// Replaces the subtree at `path`, creating containers along the way.
	///
	/// A leaf found on the way is replaced by a container.
	pub(crate) fn set(&mut self, path: &[Segment], value: Node) {
		let Some((first, rest)) = path.split_first() else {
			*self = value;
			return;
		};
		if let Self::Leaf(_) = self {
			*self = Self::empty();
		}
		if let Self::Tree(children) = self {
			children.entry(first.clone()).or_default().set(rest, value);
		}
	}

	/// Removes the subtree at `path`. Removing the root empties the node.
	pub(crate) fn remove(&mut self, path: &[Segment]) {
		let Some((first, rest)) = path.split_first() else {
			*self = Self::empty();
			return;
		};
		let Self::Tree(children) = self else {
			return;
		};
		if rest.is_empty() {
			children.remove(first);
		} else if let Some(child) = children.get_mut(first) {
			child.remove(rest);
		}
	}

	/// Renders the node as JSON. Key segments become `{k1,k2}` object keys.
	pub fn to_json(&self) -> Value {
		match self {
			Self::Leaf(value) => value.clone(),
			Self::Tree(children) => {
				let map: Map<String, Value> = children.iter().map(|(segment, child)| (segment.to_string(), child.to_json())).collect();
				Value::Object(map)
			}
		}
	}
}

impl From<Value> for Node {
	fn from(value: Value) -> Self {
		match value {
			Value::Object(map) => Self::Tree(map.into_iter().map(|(name, child)| (Segment::Name(name), Node::from(child))).collect()),
			other => Self::Leaf(other),
		}
	}
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;
	use serde_json::json;

	use super::*;

	#[test]
	fn json_objects_become_containers() {
		let node = Node::from(json!({"a": 1, "b": {"c": [1, 2]}}));
		assert_eq!(node.get(&Keypath::path(["a"])), Some(&Node::leaf(1)));
		assert_eq!(node.get(&Keypath::path(["b", "c"])), Some(&Node::leaf(json!([1, 2]))));
		assert_eq!(node.get(&Keypath::path(["a", "x"])), None);
		assert_eq!(node.to_json(), json!({"a": 1, "b": {"c": [1, 2]}}));
	}

	#[test]
	fn leaf_of_object_matches_from_value() {
		let value = json!({"a": {"b": 1}});
		let node = Node::leaf(value.clone());
		assert_eq!(node, Node::from(value));
		assert_eq!(node.get(&Keypath::path(["a", "b"])), Some(&Node::leaf(1)));
	}

	#[test]
	fn set_replaces_leaf_on_the_way() {
		let mut node = Node::from(json!({"a": 1}));
		node.set(Keypath::path(["a", "b"]).segments(), Node::leaf("x"));
		assert_eq!(node.to_json(), json!({"a": {"b": "x"}}));
	}

	#[test]
	fn remove_missing_path_is_noop() {
		let mut node = Node::from(json!({"a": 1}));
		node.remove(Keypath::path(["z", "y"]).segments());
		node.remove(Keypath::path(["a", "y"]).segments());
		assert_eq!(node.to_json(), json!({"a": 1}));
	}

	#[test]
	fn key_segments_render_as_braced_names() {
		let mut node = Node::empty();
		node.set(Keypath::path(["peer"]).key(["10.0.0.1"]).child("state").segments(), Node::leaf("up"));
		assert_eq!(node.to_json(), json!({"peer": {"{10.0.0.1}": {"state": "up"}}}));
	}
}

//! Update batches and tree diffing.

use std::collections::BTreeSet;

use crate::keypath::Keypath;
use crate::node::Node;

/// Value to store at a keypath, or `None` to remove the keypath and
/// everything beneath it.
pub type OutputUpdate = Option<Node>;

/// Ordered batch of changes applied atomically to an output tree.
///
/// Entries apply in order, so a later entry for the same keypath overrides
/// an earlier one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateBatch {
	entries: Vec<(Keypath, OutputUpdate)>,
}

impl UpdateBatch {
	pub fn new() -> Self {
		Self::default()
	}

	/// Batch replacing the whole tree with `node`.
	pub fn replace_root(node: impl Into<Node>) -> Self {
		Self::new().set(Keypath::root(), node)
	}

	/// Appends a set entry.
	#[must_use]
	pub fn set(mut self, path: Keypath, node: impl Into<Node>) -> Self {
		self.entries.push((path, Some(node.into())));
		self
	}

	/// Appends a removal entry.
	#[must_use]
	pub fn remove(mut self, path: Keypath) -> Self {
		self.entries.push((path, None));
		self
	}

	pub fn push(&mut self, path: Keypath, update: OutputUpdate) {
		self.entries.push((path, update));
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	pub fn entries(&self) -> &[(Keypath, OutputUpdate)] {
		&self.entries
	}

	pub fn iter(&self) -> std::slice::Iter<'_, (Keypath, OutputUpdate)> {
		self.entries.iter()
	}
}

impl FromIterator<(Keypath, OutputUpdate)> for UpdateBatch {
	fn from_iter<I: IntoIterator<Item = (Keypath, OutputUpdate)>>(iter: I) -> Self {
		Self {
			entries: iter.into_iter().collect(),
		}
	}
}

impl Extend<(Keypath, OutputUpdate)> for UpdateBatch {
	fn extend<I: IntoIterator<Item = (Keypath, OutputUpdate)>>(&mut self, iter: I) {
		self.entries.extend(iter);
	}
}

impl IntoIterator for UpdateBatch {
	type Item = (Keypath, OutputUpdate);
	type IntoIter = std::vec::IntoIter<(Keypath, OutputUpdate)>;

	fn into_iter(self) -> Self::IntoIter {
		self.entries.into_iter()
	}
}

impl<'a> IntoIterator for &'a UpdateBatch {
	type Item = &'a (Keypath, OutputUpdate);
	type IntoIter = std::slice::Iter<'a, (Keypath, OutputUpdate)>;

	fn into_iter(self) -> Self::IntoIter {
		self.entries.iter()
	}
}

/// Computes the minimal batch that turns `old` into `new`.
///
/// Containers that exist on both sides are compared child by child in
/// segment order; anything else that differs is replaced wholesale. Diffing
/// from an empty tree therefore yields a single root entry (or nothing when
/// `new` is empty too), which is the resync representation.
pub fn diff(old: &Node, new: &Node) -> UpdateBatch {
	let mut batch = UpdateBatch::new();
	let mut path = Keypath::root();
	diff_into(&mut path, old, new, &mut batch);
	batch
}

fn diff_into(path: &mut Keypath, old: &Node, new: &Node, out: &mut UpdateBatch) {
	if old == new {
		return;
	}
	match (old, new) {
		(Node::Tree(old_children), Node::Tree(new_children)) if !old_children.is_empty() => {
			let segments: BTreeSet<_> = old_children.keys().chain(new_children.keys()).collect();
			for segment in segments {
				path.push(segment.clone());
				match (old_children.get(segment), new_children.get(segment)) {
					(Some(old_child), Some(new_child)) => diff_into(path, old_child, new_child, out),
					(Some(_), None) => out.push(path.clone(), None),
					(None, Some(new_child)) => out.push(path.clone(), Some(new_child.clone())),
					(None, None) => {}
				}
				path.pop();
			}
		}
		_ => out.push(path.clone(), Some(new.clone())),
	}
}

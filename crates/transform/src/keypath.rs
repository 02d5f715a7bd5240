//! Hierarchical addresses into an output tree.

use std::fmt;

use smallvec::SmallVec;

/// One value of a list key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyValue {
	Bool(bool),
	Int(i64),
	Str(String),
}

impl fmt::Display for KeyValue {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Bool(value) => write!(f, "{value}"),
			Self::Int(value) => write!(f, "{value}"),
			Self::Str(value) => f.write_str(value),
		}
	}
}

impl From<bool> for KeyValue {
	fn from(value: bool) -> Self {
		Self::Bool(value)
	}
}

impl From<i64> for KeyValue {
	fn from(value: i64) -> Self {
		Self::Int(value)
	}
}

impl From<&str> for KeyValue {
	fn from(value: &str) -> Self {
		Self::Str(value.to_string())
	}
}

impl From<String> for KeyValue {
	fn from(value: String) -> Self {
		Self::Str(value)
	}
}

/// Segment of a keypath: a child name or a list entry key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Segment {
	Name(String),
	Key(SmallVec<[KeyValue; 2]>),
}

impl Segment {
	pub fn name(name: impl Into<String>) -> Self {
		Self::Name(name.into())
	}

	pub fn key<I>(values: I) -> Self
	where
		I: IntoIterator,
		I::Item: Into<KeyValue>,
	{
		Self::Key(values.into_iter().map(Into::into).collect())
	}
}

impl fmt::Display for Segment {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Name(name) => f.write_str(name),
			Self::Key(values) => {
				f.write_str("{")?;
				for (idx, value) in values.iter().enumerate() {
					if idx > 0 {
						f.write_str(",")?;
					}
					write!(f, "{value}")?;
				}
				f.write_str("}")
			}
		}
	}
}

/// Immutable address of a node in an output tree.
///
/// Ordering is lexicographic over segments, so a parent sorts before all of
/// its descendants. The empty keypath is the root and denotes the whole tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Keypath(SmallVec<[Segment; 4]>);

impl Keypath {
	/// The root keypath.
	pub fn root() -> Self {
		Self::default()
	}

	/// Builds a keypath made only of name segments.
	pub fn path<I>(names: I) -> Self
	where
		I: IntoIterator,
		I::Item: Into<String>,
	{
		names.into_iter().map(|name| Segment::Name(name.into())).collect()
	}

	pub fn is_root(&self) -> bool {
		self.0.is_empty()
	}

	pub fn len(&self) -> usize {
		self.0.len()
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	pub fn segments(&self) -> &[Segment] {
		&self.0
	}

	pub fn last(&self) -> Option<&Segment> {
		self.0.last()
	}

	/// Returns this keypath extended by a name segment.
	#[must_use]
	pub fn child(&self, name: impl Into<String>) -> Self {
		let mut path = self.clone();
		path.push(Segment::Name(name.into()));
		path
	}

	/// Returns this keypath extended by a list key segment.
	#[must_use]
	pub fn key<I>(&self, values: I) -> Self
	where
		I: IntoIterator,
		I::Item: Into<KeyValue>,
	{
		let mut path = self.clone();
		path.push(Segment::key(values));
		path
	}

	/// Parent keypath, `None` for the root.
	pub fn parent(&self) -> Option<Self> {
		let (_, parent) = self.0.split_last()?;
		Some(Self(parent.iter().cloned().collect()))
	}

	pub fn push(&mut self, segment: Segment) {
		self.0.push(segment);
	}

	pub fn pop(&mut self) -> Option<Segment> {
		self.0.pop()
	}

	/// True if `self` equals `other` or is one of its ancestors.
	pub fn is_prefix_of(&self, other: &Keypath) -> bool {
		other.0.starts_with(&self.0)
	}

	/// True if `self` is a strict ancestor of `other`.
	pub fn is_ancestor_of(&self, other: &Keypath) -> bool {
		self.len() < other.len() && self.is_prefix_of(other)
	}
}

impl FromIterator<Segment> for Keypath {
	fn from_iter<I: IntoIterator<Item = Segment>>(iter: I) -> Self {
		Self(iter.into_iter().collect())
	}
}

impl From<Vec<Segment>> for Keypath {
	fn from(segments: Vec<Segment>) -> Self {
		Self(SmallVec::from_vec(segments))
	}
}

impl fmt::Display for Keypath {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		if self.is_root() {
			return f.write_str("/");
		}
		for segment in &self.0 {
			if let Segment::Name(_) = segment {
				f.write_str("/")?;
			}
			write!(f, "{segment}")?;
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use proptest::prelude::*;

	use super::*;

	#[test]
	fn display_renders_names_and_keys() {
		let path = Keypath::path(["interfaces", "interface"]).key(["eth0"]).child("mtu");
		assert_eq!(path.to_string(), "/interfaces/interface{eth0}/mtu");
		assert_eq!(Keypath::root().to_string(), "/");
		assert_eq!(Keypath::root().key([KeyValue::Int(1), KeyValue::Bool(true)]).to_string(), "{1,true}");
	}

	#[test]
	fn prefix_and_ancestor() {
		let a = Keypath::path(["a"]);
		let ab = a.child("b");
		let ac = a.child("c");

		assert!(Keypath::root().is_prefix_of(&ab));
		assert!(a.is_prefix_of(&ab));
		assert!(a.is_prefix_of(&a));
		assert!(!a.is_ancestor_of(&a));
		assert!(a.is_ancestor_of(&ab));
		assert!(!ab.is_prefix_of(&ac));
		assert!(!ab.is_prefix_of(&a));
	}

	#[test]
	fn parent_walks_up_to_root() {
		let path = Keypath::path(["a", "b"]);
		let parent = path.parent().unwrap();
		assert_eq!(parent, Keypath::path(["a"]));
		assert_eq!(parent.parent(), Some(Keypath::root()));
		assert_eq!(Keypath::root().parent(), None);
	}

	#[test]
	fn key_segments_distinguish_list_entries() {
		let list = Keypath::path(["peers"]);
		assert_ne!(list.key(["10.0.0.1"]), list.key(["10.0.0.2"]));
		assert_eq!(list.key([KeyValue::Int(7)]), list.key([7i64]));
	}

	fn arb_segment() -> impl Strategy<Value = Segment> {
		prop_oneof![
			"[a-c]{1,2}".prop_map(Segment::Name),
			(0i64..3).prop_map(|value| Segment::key([value])),
		]
	}

	fn arb_keypath() -> impl Strategy<Value = Keypath> {
		prop::collection::vec(arb_segment(), 0..4).prop_map(Keypath::from)
	}

	proptest! {
		/// Ancestors always sort before their descendants.
		#[test]
		fn prop_ancestor_sorts_first(base in arb_keypath(), extra in prop::collection::vec(arb_segment(), 1..3)) {
			let mut descendant = base.clone();
			for segment in extra {
				descendant.push(segment);
			}
			prop_assert!(base.is_ancestor_of(&descendant));
			prop_assert!(base < descendant);
		}

		/// Ordering agrees with element-wise segment comparison.
		#[test]
		fn prop_order_is_lexicographic(a in arb_keypath(), b in arb_keypath()) {
			prop_assert_eq!(a.cmp(&b), a.segments().cmp(b.segments()));
			prop_assert_eq!(a == b, a.segments() == b.segments());
		}
	}
}

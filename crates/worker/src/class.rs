/// Execution classes used for task naming and log filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskClass {
	/// Pipeline stage processing sequences.
	Stage,
	/// Low-frequency coordination units such as the shared resource registry.
	Coordination,
	/// Process supervision loops.
	Supervision,
}

impl TaskClass {
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Stage => "stage",
			Self::Coordination => "coordination",
			Self::Supervision => "supervision",
		}
	}
}

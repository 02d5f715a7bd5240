use std::fmt;
use std::str::FromStr;

use crate::error::ShimError;

/// Out-of-band command for the supervising loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
	/// Start the process unless it is already running.
	Start,
	/// Terminate the process.
	Stop,
	/// Stop, then start.
	Restart,
	/// Stop and end the supervising loop.
	Teardown,
}

impl ControlAction {
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Start => "start",
			Self::Stop => "stop",
			Self::Restart => "restart",
			Self::Teardown => "teardown",
		}
	}
}

impl FromStr for ControlAction {
	type Err = ShimError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim().to_ascii_lowercase().as_str() {
			"start" => Ok(Self::Start),
			"stop" => Ok(Self::Stop),
			"restart" => Ok(Self::Restart),
			"teardown" => Ok(Self::Teardown),
			_ => Err(ShimError::UnknownAction(s.trim().to_string())),
		}
	}
}

impl fmt::Display for ControlAction {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_known_actions_loosely() {
		assert_eq!("start".parse::<ControlAction>().unwrap(), ControlAction::Start);
		assert_eq!("  Restart\n".parse::<ControlAction>().unwrap(), ControlAction::Restart);
		assert_eq!("TEARDOWN".parse::<ControlAction>().unwrap(), ControlAction::Teardown);

		for action in [ControlAction::Start, ControlAction::Stop, ControlAction::Restart, ControlAction::Teardown] {
			assert_eq!(action.to_string().parse::<ControlAction>().unwrap(), action);
		}
	}

	#[test]
	fn rejects_unknown_actions() {
		let err = "reload".parse::<ControlAction>().unwrap_err();
		assert!(matches!(err, ShimError::UnknownAction(ref name) if name == "reload"));
	}
}

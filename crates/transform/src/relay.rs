//! Late-bound relay from the output side back into the owning stage.

use std::sync::OnceLock;

use crate::error::DeliveryError;
use crate::ids::ClientId;
use crate::message::ControlMessage;

/// Message routed back into a stage's own processing sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Upstream {
	/// A client reported it is gone during fan-out.
	ClientFailed { client: ClientId, error: DeliveryError },
	/// Control message raised by the stage's transformation.
	Control(ControlMessage),
}

type RelayTarget = Box<dyn Fn(Upstream) -> bool + Send + Sync>;

/// Relay cell filled exactly once by the owning stage.
///
/// The output side is built before the stage can receive anything, so the
/// target starts empty and is bound before the first command is processed.
/// Posting never calls into the stage inline; the bound target enqueues.
#[derive(Default)]
pub(crate) struct UpstreamRelay {
	target: OnceLock<RelayTarget>,
}

impl UpstreamRelay {
	pub(crate) fn unbound() -> Self {
		Self::default()
	}

	/// Binds the relay target. Returns false if it was already bound.
	pub(crate) fn bind(&self, target: impl Fn(Upstream) -> bool + Send + Sync + 'static) -> bool {
		self.target.set(Box::new(target)).is_ok()
	}

	pub(crate) fn is_bound(&self) -> bool {
		self.target.get().is_some()
	}

	pub(crate) fn post(&self, msg: Upstream) {
		match self.target.get() {
			Some(target) => {
				if !target(msg) {
					tracing::debug!("relay.refused");
				}
			}
			None => tracing::warn!(?msg, "relay.unbound; message dropped"),
		}
	}
}

impl std::fmt::Debug for UpstreamRelay {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("UpstreamRelay").field("bound", &self.is_bound()).finish()
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use parking_lot::Mutex;

	use super::*;

	#[test]
	fn binds_exactly_once() {
		let relay = UpstreamRelay::unbound();
		let seen = Arc::new(Mutex::new(Vec::new()));

		// Posting before binding must not panic or reach anyone.
		relay.post(Upstream::Control(ControlMessage::new("early", 0)));

		let sink = Arc::clone(&seen);
		assert!(relay.bind(move |msg| {
			sink.lock().push(msg);
			true
		}));
		assert!(!relay.bind(|_| true));

		relay.post(Upstream::Control(ControlMessage::new("late", 1)));
		assert_eq!(*seen.lock(), vec![Upstream::Control(ControlMessage::new("late", 1))]);
	}
}

//! Debug session status as seen by a memory view.

use serde::{Deserialize, Serialize};

/// Run state of the debug session a document is bound to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionStatus {
	/// No live session.
	#[default]
	Default,
	/// The debuggee is running; memory reads are not meaningful.
	Busy,
	/// The debuggee is paused; memory can be read.
	Stopped,
}

/// Lifecycle notifications from the debugger integration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
	/// A session started or was discovered already running.
	Started,
	/// The debugger reported a stop.
	Stopped,
	/// The debugger resumed execution.
	Continued,
	/// The session ended.
	Terminated,
}

impl SessionStatus {
	/// Returns the status after `event`.
	///
	/// `Started` and `Continued` both lead to `Busy`; a stop report while no
	/// session is known still counts as `Stopped` since reads become valid.
	#[must_use]
	pub const fn transition(self, event: SessionEvent) -> Self {
		match event {
			SessionEvent::Started | SessionEvent::Continued => Self::Busy,
			SessionEvent::Stopped => Self::Stopped,
			SessionEvent::Terminated => Self::Default,
		}
	}

	/// Returns true if memory reads are meaningful in this state.
	#[must_use]
	pub const fn is_stopped(self) -> bool {
		matches!(self, Self::Stopped)
	}
}

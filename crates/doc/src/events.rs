//! Batched document notifications.
//!
//! Events posted during one scheduling turn are coalesced: a later event of
//! the same kind for the same document replaces the earlier one, and the
//! batch is broadcast in posting order once the current task yields.

use std::sync::Arc;

use indexmap::IndexMap;
use memview_primitives::{Address, DocId, SessionId, SessionStatus};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::trace;

const EVENT_BUFFER: usize = 256;

/// A change observers may react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocEvent {
	/// The registry's current document changed.
	CurrentDoc {
		/// New current document, `None` when the registry emptied.
		doc_id: Option<DocId>,
	},
	/// A document's debug session changed status.
	DebuggerStatus {
		/// Affected document.
		doc_id: DocId,
		/// Bound session.
		session_id: Option<SessionId>,
		/// New status.
		status: SessionStatus,
	},
	/// A document's start address was re-evaluated to a new value.
	BaseAddress {
		/// Affected document.
		doc_id: DocId,
		/// New base address.
		base: Address,
	},
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum EventKind {
	CurrentDoc,
	DebuggerStatus,
	BaseAddress,
}

impl DocEvent {
	fn key(&self) -> (EventKind, Option<DocId>) {
		match self {
			Self::CurrentDoc { .. } => (EventKind::CurrentDoc, None),
			Self::DebuggerStatus { doc_id, .. } => (EventKind::DebuggerStatus, Some(doc_id.clone())),
			Self::BaseAddress { doc_id, .. } => (EventKind::BaseAddress, Some(doc_id.clone())),
		}
	}
}

#[derive(Debug, Default)]
struct Pending {
	events: IndexMap<(EventKind, Option<DocId>), DocEvent>,
	flush_scheduled: bool,
}

#[derive(Debug)]
struct BusInner {
	tx: broadcast::Sender<DocEvent>,
	pending: Mutex<Pending>,
}

/// Broadcast channel for [`DocEvent`]s shared by a registry and its
/// documents.
#[derive(Debug, Clone)]
pub struct EventBus {
	inner: Arc<BusInner>,
}

impl Default for EventBus {
	fn default() -> Self {
		Self::new()
	}
}

impl EventBus {
	/// Creates a bus with no subscribers.
	pub fn new() -> Self {
		let (tx, _) = broadcast::channel(EVENT_BUFFER);
		Self {
			inner: Arc::new(BusInner {
				tx,
				pending: Mutex::new(Pending::default()),
			}),
		}
	}

	/// Returns a receiver for every batch flushed from now on.
	pub fn subscribe(&self) -> broadcast::Receiver<DocEvent> {
		self.inner.tx.subscribe()
	}

	/// Queues `event` for the next flush.
	///
	/// Inside a tokio runtime the flush runs on a spawned task after the
	/// caller yields; without one the event is delivered immediately.
	pub fn post(&self, event: DocEvent) {
		let schedule = {
			let mut pending = self.inner.pending.lock();
			pending.events.insert(event.key(), event);
			!std::mem::replace(&mut pending.flush_scheduled, true)
		};
		if !schedule {
			return;
		}
		match tokio::runtime::Handle::try_current() {
			Ok(handle) => {
				let bus = self.clone();
				handle.spawn(async move {
					tokio::task::yield_now().await;
					bus.flush();
				});
			}
			Err(_) => {
				self.flush();
			}
		}
	}

	/// Delivers every queued event now. Returns how many were sent.
	pub fn flush(&self) -> usize {
		let batch = {
			let mut pending = self.inner.pending.lock();
			pending.flush_scheduled = false;
			std::mem::take(&mut pending.events)
		};
		let count = batch.len();
		for (_, event) in batch {
			// No receivers is not an error; the event is simply dropped.
			let _ = self.inner.tx.send(event);
		}
		if count > 0 {
			trace!(count, "doc events flushed");
		}
		count
	}

	/// Drops every queued event without delivering it.
	pub fn clear(&self) {
		let mut pending = self.inner.pending.lock();
		pending.events.clear();
	}

	/// Returns the number of queued events.
	pub fn pending(&self) -> usize {
		self.inner.pending.lock().events.len()
	}
}

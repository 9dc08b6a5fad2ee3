//! Paged memory cache and document model for debugger memory views.
//!
//! A [`Document`] presents a window `[base, base + max_bytes)` of target
//! memory. Bytes are fetched lazily, one page at a time, through an injected
//! [`MemoryInterface`]; the [`PageStore`] coalesces concurrent reads of the
//! same page onto a single fetch, keeps the previous snapshot of each page for
//! change highlighting, and serves last-known bytes synchronously while a
//! refetch is pending. Local edits live in a sparse overlay on top of the
//! fetched bytes.
//!
//! A [`DocumentRegistry`] owns every open document of one half (host or UI),
//! tracks the current document, and reports changes on a shared [`EventBus`]
//! that batches notifications per scheduling turn.
//!
//! # Concurrency
//!
//! All state is shared through `Arc` and guarded by short `parking_lot`
//! critical sections; no lock is ever held across an `.await`. The only
//! suspension points are page fetches, address re-evaluation and event
//! flushing.

#![warn(missing_docs)]

pub mod document;
pub mod error;
pub mod events;
pub mod memory;
pub mod pages;
pub mod persist;
pub mod registry;

pub use document::{DocByte, Document, DocumentProps};
pub use error::{MemoryError, PageError, PersistError};
pub use events::{DocEvent, EventBus};
pub use memory::{BufferMemory, MemoryInterface, StoppedGate};
pub use pages::{BytePair, PageStore, ValueLookup};
pub use persist::{CURRENT_VERSION, PersistedState};
pub use registry::DocumentRegistry;

/// Which half of the memory view a registry or document lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
	/// Privileged debugger integration; owns the authoritative edit overlay.
	Host,
	/// Renderer; keeps page history for change highlighting.
	Ui,
}

impl Role {
	/// Returns true if pages keep their previous snapshot.
	#[must_use]
	pub const fn keeps_history(self) -> bool {
		matches!(self, Self::Ui)
	}
}

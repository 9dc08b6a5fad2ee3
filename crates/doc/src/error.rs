//! Error types for the memory view core.

use std::path::PathBuf;

use memview_primitives::Address;
use thiserror::Error;

/// Failures reported by a [`MemoryInterface`](crate::MemoryInterface).
///
/// These never escape the page cache; reads turn them into unavailable bytes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryError {
	/// The transport or debugger failed.
	#[error("memory transport failed: {0}")]
	Transport(String),
	/// An address or size expression did not resolve.
	#[error("cannot evaluate {expr:?}: {reason}")]
	Unresolved {
		/// Expression text.
		expr: String,
		/// Debugger explanation.
		reason: String,
	},
	/// The target refused a write.
	#[error("write of {len} bytes at {addr} was rejected")]
	Rejected {
		/// First address written.
		addr: Address,
		/// Number of bytes.
		len: usize,
	},
}

/// Invariant violations inside the page store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PageError {
	/// Attempted to overwrite a byte that has not been fetched.
	#[error("cannot set byte at {addr}: not fetched (window {base}..{max})")]
	Unfetched {
		/// Requested address.
		addr: Address,
		/// Document base address.
		base: Address,
		/// Document end address (exclusive).
		max: Address,
	},
}

/// Failures while saving or loading persisted documents.
#[derive(Debug, Error)]
pub enum PersistError {
	/// Reading or writing the state file failed.
	#[error("I/O error on {path}: {error}")]
	Io {
		/// State file.
		path: PathBuf,
		/// Underlying error.
		error: std::io::Error,
	},
	/// The state file is not valid JSON of the expected shape.
	#[error("invalid persisted state: {0}")]
	Json(#[from] serde_json::Error),
}

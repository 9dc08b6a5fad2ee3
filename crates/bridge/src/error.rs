//! Error types for the bridge.

use memview_primitives::DocId;
use memview_proto::{CodecError, CommandKind};
use thiserror::Error;

/// Failures of a bridge call or pump.
#[derive(Debug, Error)]
pub enum BridgeError {
	/// The peer went away before answering.
	#[error("peer disconnected")]
	Disconnected,
	/// The peer answered with an error.
	#[error("remote error: {0}")]
	Remote(String),
	/// The peer answered with a payload of the wrong shape.
	#[error("unexpected response to {0}")]
	UnexpectedResponse(CommandKind),
	/// The document is not open on this side.
	#[error("unknown document {0}")]
	UnknownDocument(DocId),
	/// The document does not accept edits.
	#[error("document {0} is read-only")]
	Readonly(DocId),
	/// Framing failure on the underlying stream.
	#[error(transparent)]
	Codec(#[from] CodecError),
}

/// Result type for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;

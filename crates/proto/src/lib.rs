//! Wire protocol between the host half (debugger integration) and the UI half
//! (renderer) of a memory view.
//!
//! Every message is an [`Envelope`] `{type, seq, command, body}` encoded as one
//! line of JSON. Envelopes are converted into the typed [`Frame`] union at the
//! codec boundary so dispatch sites match exhaustively on payload variants
//! instead of inspecting untyped bodies.

#![warn(missing_docs)]

pub mod codec;
pub mod frame;
pub mod types;

pub use codec::{CodecError, read_frame, write_frame};
pub use frame::{
	CommandKind, CommandPayload, CounterIdGen, Envelope, Frame, FrameKind, GetMemory,
	GetStartAddress, Notice, ResponsePayload, SaveClientState, SetByte, SetCurrentDoc,
	SettingsChanged,
};
pub use types::{ClientState, DocumentSettings, DocumentSummary, SerializedDocument, SerializedPage};

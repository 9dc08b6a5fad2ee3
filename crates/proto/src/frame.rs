//! Typed frames and their envelope encoding.

use std::fmt;
use std::str::FromStr;

use memview_primitives::{Address, DocId, SessionId, SessionStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::codec::CodecError;
use crate::types::{ClientState, DocumentSettings, SerializedDocument};

/// Simple counter-based sequence generator.
#[derive(Debug, Default, Clone, Copy)]
pub struct CounterIdGen(pub u64);

impl CounterIdGen {
	/// Creates a new counter starting at 1; sequence 0 is reserved for notices.
	#[must_use]
	pub const fn new() -> Self {
		Self(1)
	}

	/// Returns the next sequence number and advances the counter.
	#[allow(clippy::should_implement_trait, reason = "convention")]
	pub fn next(&mut self) -> u64 {
		let id = self.0.max(1);
		self.0 = id + 1;
		id
	}
}

/// Envelope `type` discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameKind {
	/// Request expecting a response with the same `seq`.
	Command,
	/// Reply to a command.
	Response,
	/// Unsolicited host-to-UI notification.
	Notice,
}

/// Envelope `command` discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
	/// Read a range of target memory.
	GetMemory,
	/// Evaluate an address expression in the paused debuggee.
	GetStartAddress,
	/// Fetch every open document.
	GetDocuments,
	/// Mirror a local byte edit.
	SetByte,
	/// Mirror UI-local state.
	SaveClientState,
	/// Mirror a settings change.
	SettingsChanged,
	/// Select the current document.
	SetCurrentDoc,
	/// Session status changed.
	DebuggerStatus,
}

impl CommandKind {
	/// Returns the wire name.
	#[must_use]
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::GetMemory => "GetMemory",
			Self::GetStartAddress => "GetStartAddress",
			Self::GetDocuments => "GetDocuments",
			Self::SetByte => "SetByte",
			Self::SaveClientState => "SaveClientState",
			Self::SettingsChanged => "SettingsChanged",
			Self::SetCurrentDoc => "SetCurrentDoc",
			Self::DebuggerStatus => "DebuggerStatus",
		}
	}
}

impl fmt::Display for CommandKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for CommandKind {
	type Err = CodecError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Ok(match s {
			"GetMemory" => Self::GetMemory,
			"GetStartAddress" => Self::GetStartAddress,
			"GetDocuments" => Self::GetDocuments,
			"SetByte" => Self::SetByte,
			"SaveClientState" => Self::SaveClientState,
			"SettingsChanged" => Self::SettingsChanged,
			"SetCurrentDoc" => Self::SetCurrentDoc,
			"DebuggerStatus" => Self::DebuggerStatus,
			other => return Err(CodecError::UnknownCommand(other.to_string())),
		})
	}
}

/// The untyped wire form of every message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
	/// Message class.
	#[serde(rename = "type")]
	pub kind: FrameKind,
	/// Correlates a response with its command.
	pub seq: u64,
	/// Command name.
	pub command: String,
	/// Command-specific payload.
	#[serde(default, skip_serializing_if = "Value::is_null")]
	pub body: Value,
	/// Failure description on error responses.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
}

/// Body of [`CommandKind::GetMemory`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetMemory {
	/// Document whose session performs the read.
	pub doc_id: DocId,
	/// First address.
	pub addr: Address,
	/// Number of bytes.
	pub count: usize,
}

/// Body of [`CommandKind::GetStartAddress`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetStartAddress {
	/// Document whose session evaluates the expression.
	pub doc_id: DocId,
	/// Expression to evaluate.
	pub expr: String,
	/// Value to report when evaluation is impossible.
	#[serde(rename = "def")]
	pub fallback: String,
}

/// Body of [`CommandKind::SetByte`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetByte {
	/// Edited document.
	pub doc_id: DocId,
	/// Edited address.
	pub addr: Address,
	/// New byte value.
	pub value: u8,
}

/// Body of [`CommandKind::SaveClientState`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveClientState {
	/// Owning document.
	pub doc_id: DocId,
	/// Full replacement state.
	pub state: ClientState,
}

/// Body of [`CommandKind::SettingsChanged`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsChanged {
	/// Changed document.
	pub doc_id: DocId,
	/// Fields to update.
	pub settings: DocumentSettings,
}

/// Body of [`CommandKind::SetCurrentDoc`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetCurrentDoc {
	/// Newly selected document.
	pub doc_id: DocId,
}

/// Typed command payloads.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandPayload {
	/// Read target memory.
	GetMemory(GetMemory),
	/// Evaluate an address expression.
	GetStartAddress(GetStartAddress),
	/// List every document.
	GetDocuments,
	/// Mirror a byte edit.
	SetByte(SetByte),
	/// Mirror UI-local state.
	SaveClientState(SaveClientState),
	/// Mirror a settings change.
	SettingsChanged(SettingsChanged),
	/// Select the current document.
	SetCurrentDoc(SetCurrentDoc),
}

impl CommandPayload {
	/// Returns the wire discriminator.
	#[must_use]
	pub const fn kind(&self) -> CommandKind {
		match self {
			Self::GetMemory(_) => CommandKind::GetMemory,
			Self::GetStartAddress(_) => CommandKind::GetStartAddress,
			Self::GetDocuments => CommandKind::GetDocuments,
			Self::SetByte(_) => CommandKind::SetByte,
			Self::SaveClientState(_) => CommandKind::SaveClientState,
			Self::SettingsChanged(_) => CommandKind::SettingsChanged,
			Self::SetCurrentDoc(_) => CommandKind::SetCurrentDoc,
		}
	}

	fn body(&self) -> Result<Value, CodecError> {
		Ok(match self {
			Self::GetMemory(body) => serde_json::to_value(body)?,
			Self::GetStartAddress(body) => serde_json::to_value(body)?,
			Self::GetDocuments => Value::Null,
			Self::SetByte(body) => serde_json::to_value(body)?,
			Self::SaveClientState(body) => serde_json::to_value(body)?,
			Self::SettingsChanged(body) => serde_json::to_value(body)?,
			Self::SetCurrentDoc(body) => serde_json::to_value(body)?,
		})
	}

	fn from_body(kind: CommandKind, body: Value) -> Result<Self, CodecError> {
		Ok(match kind {
			CommandKind::GetMemory => Self::GetMemory(serde_json::from_value(body)?),
			CommandKind::GetStartAddress => Self::GetStartAddress(serde_json::from_value(body)?),
			CommandKind::GetDocuments => Self::GetDocuments,
			CommandKind::SetByte => Self::SetByte(serde_json::from_value(body)?),
			CommandKind::SaveClientState => Self::SaveClientState(serde_json::from_value(body)?),
			CommandKind::SettingsChanged => Self::SettingsChanged(serde_json::from_value(body)?),
			CommandKind::SetCurrentDoc => Self::SetCurrentDoc(serde_json::from_value(body)?),
			CommandKind::DebuggerStatus => {
				return Err(CodecError::Misplaced {
					kind: FrameKind::Command,
					command: kind,
				});
			}
		})
	}
}

/// Typed response payloads; the variant is implied by the command answered.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponsePayload {
	/// Bytes read, possibly fewer than requested.
	Memory(Vec<u8>),
	/// Evaluated address text.
	StartAddress(String),
	/// Every document, serialized without pages.
	Documents(Vec<SerializedDocument>),
	/// Command applied, nothing to return.
	Ack,
}

impl ResponsePayload {
	fn body(&self) -> Result<Value, CodecError> {
		Ok(match self {
			Self::Memory(bytes) => serde_json::to_value(bytes)?,
			Self::StartAddress(addr) => Value::String(addr.clone()),
			Self::Documents(docs) => serde_json::to_value(docs)?,
			Self::Ack => Value::Null,
		})
	}

	fn from_body(kind: CommandKind, body: Value) -> Result<Self, CodecError> {
		Ok(match kind {
			CommandKind::GetMemory => Self::Memory(serde_json::from_value(body)?),
			CommandKind::GetStartAddress => Self::StartAddress(serde_json::from_value(body)?),
			CommandKind::GetDocuments => Self::Documents(serde_json::from_value(body)?),
			CommandKind::SetByte
			| CommandKind::SaveClientState
			| CommandKind::SettingsChanged
			| CommandKind::SetCurrentDoc => Self::Ack,
			CommandKind::DebuggerStatus => {
				return Err(CodecError::Misplaced {
					kind: FrameKind::Response,
					command: kind,
				});
			}
		})
	}
}

/// Unsolicited host-to-UI notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
	/// A debug session changed run state.
	DebuggerStatus {
		/// Affected session.
		session_id: SessionId,
		/// New status.
		status: SessionStatus,
	},
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DebuggerStatusBody {
	session_id: SessionId,
	status: SessionStatus,
}

/// A decoded message.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
	/// Request from one half to the other.
	Command {
		/// Sequence number echoed by the response.
		seq: u64,
		/// Typed body.
		payload: CommandPayload,
	},
	/// Reply to a command.
	Response {
		/// Sequence number of the answered command.
		seq: u64,
		/// Command answered.
		command: CommandKind,
		/// Result or error description.
		result: Result<ResponsePayload, String>,
	},
	/// Notification.
	Notice {
		/// Sequence number, informational only.
		seq: u64,
		/// Typed body.
		notice: Notice,
	},
}

impl Frame {
	/// Converts the typed frame to its wire envelope.
	pub fn to_envelope(&self) -> Result<Envelope, CodecError> {
		Ok(match self {
			Self::Command { seq, payload } => Envelope {
				kind: FrameKind::Command,
				seq: *seq,
				command: payload.kind().as_str().to_string(),
				body: payload.body()?,
				error: None,
			},
			Self::Response { seq, command, result } => {
				let (body, error) = match result {
					Ok(payload) => (payload.body()?, None),
					Err(message) => (Value::Null, Some(message.clone())),
				};
				Envelope {
					kind: FrameKind::Response,
					seq: *seq,
					command: command.as_str().to_string(),
					body,
					error,
				}
			}
			Self::Notice { seq, notice } => match notice {
				Notice::DebuggerStatus { session_id, status } => Envelope {
					kind: FrameKind::Notice,
					seq: *seq,
					command: CommandKind::DebuggerStatus.as_str().to_string(),
					body: serde_json::to_value(DebuggerStatusBody {
						session_id: session_id.clone(),
						status: *status,
					})?,
					error: None,
				},
			},
		})
	}

	/// Decodes a wire envelope, rejecting unknown or misplaced commands.
	pub fn from_envelope(envelope: Envelope) -> Result<Self, CodecError> {
		let command: CommandKind = envelope.command.parse()?;
		let seq = envelope.seq;
		Ok(match envelope.kind {
			FrameKind::Command => Self::Command {
				seq,
				payload: CommandPayload::from_body(command, envelope.body)?,
			},
			FrameKind::Response => Self::Response {
				seq,
				command,
				result: match envelope.error {
					Some(message) => Err(message),
					None => Ok(ResponsePayload::from_body(command, envelope.body)?),
				},
			},
			FrameKind::Notice => match command {
				CommandKind::DebuggerStatus => {
					let body: DebuggerStatusBody = serde_json::from_value(envelope.body)?;
					Self::Notice {
						seq,
						notice: Notice::DebuggerStatus {
							session_id: body.session_id,
							status: body.status,
						},
					}
				}
				other => {
					return Err(CodecError::Misplaced {
						kind: FrameKind::Notice,
						command: other,
					});
				}
			},
		})
	}

	/// Returns the frame's sequence number.
	#[must_use]
	pub const fn seq(&self) -> u64 {
		match self {
			Self::Command { seq, .. } | Self::Response { seq, .. } | Self::Notice { seq, .. } => *seq,
		}
	}
}

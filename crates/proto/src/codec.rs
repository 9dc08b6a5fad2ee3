//! Line-delimited JSON framing over tokio async IO.

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::frame::{CommandKind, Envelope, Frame, FrameKind};

/// Errors raised while encoding or decoding frames.
#[derive(Debug, Error)]
pub enum CodecError {
	/// Underlying stream failure.
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),
	/// Malformed JSON or body shape.
	#[error("invalid frame: {0}")]
	Json(#[from] serde_json::Error),
	/// The `command` tag names no known command.
	#[error("unknown command: {0:?}")]
	UnknownCommand(String),
	/// A known command appeared in a frame class it never uses.
	#[error("{command} is not valid as a {kind:?} frame")]
	Misplaced {
		/// Frame class.
		kind: FrameKind,
		/// Command tag.
		command: CommandKind,
	},
}

impl CodecError {
	/// Returns true if the stream itself failed, as opposed to one bad frame.
	#[must_use]
	pub const fn is_fatal(&self) -> bool {
		matches!(self, Self::Io(_))
	}
}

/// Reads the next frame, skipping blank lines.
///
/// Returns `Ok(None)` at end of stream.
pub async fn read_frame<R>(input: &mut R) -> Result<Option<Frame>, CodecError>
where
	R: AsyncBufRead + Unpin + Send,
{
	let mut line = String::new();
	loop {
		line.clear();
		if input.read_line(&mut line).await? == 0 {
			return Ok(None);
		}
		if !line.trim().is_empty() {
			break;
		}
	}
	let envelope: Envelope = serde_json::from_str(line.trim())?;
	Frame::from_envelope(envelope).map(Some)
}

/// Writes one frame followed by a newline and flushes.
pub async fn write_frame<W>(output: &mut W, frame: &Frame) -> Result<(), CodecError>
where
	W: AsyncWrite + Unpin + Send,
{
	let mut text = serde_json::to_string(&frame.to_envelope()?)?;
	text.push('\n');
	output.write_all(text.as_bytes()).await?;
	output.flush().await?;
	Ok(())
}

//! Moves frames between a byte stream and a pair of channels.

use memview_proto::{Frame, read_frame, write_frame};
use tokio::io::{AsyncBufRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::{BridgeError, Result};

/// Drives one side of a connection.
///
/// Decoded frames from `input` are sent to `inbound`; frames received on
/// `outbound` are written to `output`. Frames that fail to decode are logged
/// and skipped. Returns when the stream ends, `outbound` closes, `inbound`
/// has no receiver, or the stream fails.
pub async fn run_pump<R, W>(
	mut input: R,
	mut output: W,
	inbound: mpsc::UnboundedSender<Frame>,
	mut outbound: mpsc::UnboundedReceiver<Frame>,
) -> Result<()>
where
	R: AsyncBufRead + Unpin + Send,
	W: AsyncWrite + Unpin + Send,
{
	// Each direction is one long-lived future; `read_frame` is not cancel-safe.
	let reading = async {
		loop {
			match read_frame(&mut input).await {
				Ok(Some(frame)) => {
					if inbound.send(frame).is_err() {
						return Ok::<(), BridgeError>(());
					}
				}
				Ok(None) => {
					debug!("peer closed the stream");
					return Ok(());
				}
				Err(err) if err.is_fatal() => return Err(err.into()),
				Err(err) => warn!(error = %err, "skipping invalid frame"),
			}
		}
	};
	let writing = async {
		while let Some(frame) = outbound.recv().await {
			write_frame(&mut output, &frame).await?;
		}
		Ok::<(), BridgeError>(())
	};

	let ret = tokio::select! {
		ret = reading => ret,
		ret = writing => ret,
	};
	let _ = output.shutdown().await;
	ret
}

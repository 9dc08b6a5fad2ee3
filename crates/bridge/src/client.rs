//! UI-side command issuer with response correlation.

use std::collections::HashMap;
use std::sync::Arc;

use memview_proto::{CommandKind, CommandPayload, CounterIdGen, Frame, ResponsePayload};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

use crate::{BridgeError, Result};

type Reply = Result<ResponsePayload>;

enum Pending {
	/// A caller is waiting for the response.
	Waiter(oneshot::Sender<Reply>),
	/// Fire-and-forget command; the response is dropped silently.
	Discard,
}

struct ClientState {
	ids: CounterIdGen,
	outgoing: HashMap<u64, Pending>,
}

/// Sends commands to the host and routes responses back by `seq`.
///
/// Cheap to clone; clones share the pending table.
#[derive(Clone)]
pub struct UiClient {
	tx: mpsc::UnboundedSender<Frame>,
	state: Arc<Mutex<ClientState>>,
}

impl std::fmt::Debug for UiClient {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("UiClient")
			.field("pending", &self.pending())
			.finish_non_exhaustive()
	}
}

impl UiClient {
	/// Creates a client writing frames to `tx`.
	pub fn new(tx: mpsc::UnboundedSender<Frame>) -> Self {
		Self {
			tx,
			state: Arc::new(Mutex::new(ClientState {
				ids: CounterIdGen::new(),
				outgoing: HashMap::new(),
			})),
		}
	}

	/// Number of commands still awaiting a response.
	pub fn pending(&self) -> usize {
		self.state.lock().outgoing.len()
	}

	fn send(&self, payload: CommandPayload, pending: Pending) -> Result<u64> {
		let seq = {
			let mut state = self.state.lock();
			let seq = state.ids.next();
			state.outgoing.insert(seq, pending);
			seq
		};
		trace!(seq, command = %payload.kind(), "sending command");
		if self.tx.send(Frame::Command { seq, payload }).is_err() {
			self.state.lock().outgoing.remove(&seq);
			return Err(BridgeError::Disconnected);
		}
		Ok(seq)
	}

	/// Sends a command and waits for its response.
	pub async fn call(&self, payload: CommandPayload) -> Result<ResponsePayload> {
		let (reply_tx, reply_rx) = oneshot::channel();
		self.send(payload, Pending::Waiter(reply_tx))?;
		reply_rx.await.map_err(|_| BridgeError::Disconnected)?
	}

	/// Sends a command without waiting; its response is discarded.
	pub fn notify(&self, payload: CommandPayload) -> Result<()> {
		self.send(payload, Pending::Discard).map(|_| ())
	}

	/// Routes a response to whoever issued `seq`.
	///
	/// Responses with an unknown `seq` are logged and dropped.
	pub fn handle_response(&self, seq: u64, command: CommandKind, result: std::result::Result<ResponsePayload, String>) {
		let Some(pending) = self.state.lock().outgoing.remove(&seq) else {
			warn!(seq, %command, "dropping response with unknown seq");
			return;
		};
		match pending {
			Pending::Waiter(reply) => {
				// The result may be ignored; the caller may have given up.
				let _ = reply.send(result.map_err(BridgeError::Remote));
			}
			Pending::Discard => {
				if let Err(error) = result {
					debug!(seq, %command, %error, "fire-and-forget command failed");
				}
			}
		}
	}

	/// Fails every outstanding call with [`BridgeError::Disconnected`].
	pub fn disconnect(&self) {
		let drained: Vec<Pending> = self.state.lock().outgoing.drain().map(|(_, p)| p).collect();
		if !drained.is_empty() {
			debug!(pending = drained.len(), "failing outstanding calls");
		}
		for pending in drained {
			if let Pending::Waiter(reply) = pending {
				let _ = reply.send(Err(BridgeError::Disconnected));
			}
		}
	}
}

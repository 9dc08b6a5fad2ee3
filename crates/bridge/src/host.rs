//! Host-side command dispatch.

use std::sync::Arc;

use memview_doc::{DocEvent, DocumentRegistry};
use memview_primitives::DocId;
use memview_proto::{CommandPayload, CounterIdGen, Frame, Notice, ResponsePayload};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Answers UI commands against the host registry.
#[derive(Debug, Clone)]
pub struct HostEndpoint {
	registry: Arc<DocumentRegistry>,
}

impl HostEndpoint {
	/// Creates an endpoint serving `registry`.
	pub fn new(registry: Arc<DocumentRegistry>) -> Self {
		Self { registry }
	}

	/// Registry this endpoint serves.
	pub fn registry(&self) -> &Arc<DocumentRegistry> {
		&self.registry
	}

	fn document(&self, id: &DocId) -> Result<Arc<memview_doc::Document>, String> {
		self.registry
			.get_document_by_id(id)
			.ok_or_else(|| format!("unknown document {id}"))
	}

	/// Executes one command.
	///
	/// Edits, client state, settings and selection are applied to the host's
	/// mirror of the document; reads go through the host's memory capability.
	pub async fn handle_command(&self, payload: CommandPayload) -> Result<ResponsePayload, String> {
		match payload {
			CommandPayload::GetMemory(req) => {
				let doc = self.document(&req.doc_id)?;
				Ok(ResponsePayload::Memory(doc.get_memory_page(req.addr, req.count).await))
			}
			CommandPayload::GetStartAddress(req) => self
				.registry
				.memory()
				.get_start_address(&req.doc_id, &req.expr, &req.fallback)
				.await
				.map(ResponsePayload::StartAddress)
				.map_err(|err| err.to_string()),
			CommandPayload::GetDocuments => Ok(ResponsePayload::Documents(
				self.registry
					.documents()
					.iter()
					.map(|doc| doc.get_serializable(false))
					.collect(),
			)),
			CommandPayload::SetByte(req) => {
				let doc = self.document(&req.doc_id)?;
				doc.set_byte_local(req.addr, req.value);
				Ok(ResponsePayload::Ack)
			}
			CommandPayload::SaveClientState(req) => {
				self.document(&req.doc_id)?.set_client_state(req.state);
				Ok(ResponsePayload::Ack)
			}
			CommandPayload::SettingsChanged(req) => {
				self.document(&req.doc_id)?.update_settings(req.settings);
				Ok(ResponsePayload::Ack)
			}
			CommandPayload::SetCurrentDoc(req) => {
				self.document(&req.doc_id)?;
				self.registry.set_current_doc(&req.doc_id);
				Ok(ResponsePayload::Ack)
			}
		}
	}

	/// Answers a command frame. Other frames are not expected from the UI and
	/// yield nothing.
	pub async fn handle_frame(&self, frame: Frame) -> Option<Frame> {
		match frame {
			Frame::Command { seq, payload } => {
				let command = payload.kind();
				trace!(seq, %command, "handling command");
				let result = self.handle_command(payload).await;
				if let Err(error) = &result {
					debug!(seq, %command, %error, "command failed");
				}
				Some(Frame::Response { seq, command, result })
			}
			other => {
				warn!(seq = other.seq(), "ignoring non-command frame from ui");
				None
			}
		}
	}

	/// Handles inbound frames in arrival order until either channel closes.
	pub async fn serve(self, mut inbound: mpsc::UnboundedReceiver<Frame>, outbound: mpsc::UnboundedSender<Frame>) {
		while let Some(frame) = inbound.recv().await {
			if let Some(reply) = self.handle_frame(frame).await
				&& outbound.send(reply).is_err()
			{
				break;
			}
		}
		debug!("host endpoint stopped");
	}

	/// Forwards session status changes on the registry's bus to the UI as
	/// `DebuggerStatus` notices.
	///
	/// Several documents of one session report the same change; only the
	/// first of each run of identical statuses is forwarded.
	pub fn forward_notices(&self, outbound: mpsc::UnboundedSender<Frame>) -> JoinHandle<()> {
		let mut events = self.registry.events().subscribe();
		tokio::spawn(async move {
			let mut ids = CounterIdGen::new();
			let mut last = None;
			loop {
				let event = match events.recv().await {
					Ok(event) => event,
					Err(broadcast::error::RecvError::Lagged(skipped)) => {
						warn!(skipped, "notice forwarder lagged");
						continue;
					}
					Err(broadcast::error::RecvError::Closed) => break,
				};
				let DocEvent::DebuggerStatus {
					session_id: Some(session_id),
					status,
					..
				} = event
				else {
					continue;
				};
				let key = (session_id.clone(), status);
				if last.as_ref() == Some(&key) {
					continue;
				}
				last = Some(key);
				let frame = Frame::Notice {
					seq: ids.next(),
					notice: Notice::DebuggerStatus { session_id, status },
				};
				if outbound.send(frame).is_err() {
					break;
				}
			}
		})
	}
}

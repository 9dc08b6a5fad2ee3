//! UI half of a memory view.

use std::sync::Arc;

use memview_doc::{Document, DocumentRegistry, PersistedState, Role};
use memview_primitives::{Address, DocId};
use memview_proto::{
	ClientState, CommandKind, CommandPayload, DocumentSettings, Frame, Notice, ResponsePayload,
	SaveClientState, SetByte, SetCurrentDoc, SettingsChanged,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{BridgeError, Result, UiClient, UiMemoryProxy};

/// Mirror of the host's documents, reading memory through the host.
#[derive(Debug)]
pub struct UiSession {
	client: UiClient,
	registry: DocumentRegistry,
}

impl UiSession {
	/// Creates a session issuing commands through `client`.
	pub fn new(client: UiClient) -> Self {
		let memory = Arc::new(UiMemoryProxy::new(client.clone()));
		Self {
			registry: DocumentRegistry::init(Role::Ui, memory),
			client,
		}
	}

	/// UI registry.
	pub fn registry(&self) -> &DocumentRegistry {
		&self.registry
	}

	/// Command issuer.
	pub fn client(&self) -> &UiClient {
		&self.client
	}

	/// Replaces the local documents with the host's. Returns how many were
	/// mirrored.
	pub async fn attach(&self) -> Result<usize> {
		let docs = match self.client.call(CommandPayload::GetDocuments).await? {
			ResponsePayload::Documents(docs) => docs,
			_ => return Err(BridgeError::UnexpectedResponse(CommandKind::GetDocuments)),
		};
		let restored = self.registry.restore_serializable_all(PersistedState {
			documents: docs,
			..PersistedState::default()
		});
		info!(restored, "attached to host");
		Ok(restored)
	}

	fn document(&self, id: &DocId) -> Result<Arc<Document>> {
		self.registry
			.get_document_by_id(id)
			.ok_or_else(|| BridgeError::UnknownDocument(id.clone()))
	}

	/// Edits one byte locally and mirrors the edit to the host if it changed
	/// anything. Returns whether it did.
	pub fn set_byte(&self, id: &DocId, addr: Address, value: u8) -> Result<bool> {
		let doc = self.document(id)?;
		if doc.is_readonly() {
			return Err(BridgeError::Readonly(id.clone()));
		}
		let old = doc.set_byte_local(addr, value);
		if old == Some(value) {
			return Ok(false);
		}
		self.client.notify(CommandPayload::SetByte(SetByte {
			doc_id: id.clone(),
			addr,
			value,
		}))?;
		Ok(true)
	}

	/// Stores UI-local state and mirrors it to the host.
	pub fn save_client_state(&self, id: &DocId, state: ClientState) -> Result<()> {
		self.document(id)?.set_client_state(state.clone());
		self.client.notify(CommandPayload::SaveClientState(SaveClientState {
			doc_id: id.clone(),
			state,
		}))
	}

	/// Applies a settings change locally and on the host.
	pub fn update_settings(&self, id: &DocId, settings: DocumentSettings) -> Result<()> {
		self.document(id)?.update_settings(settings.clone());
		self.client.notify(CommandPayload::SettingsChanged(SettingsChanged {
			doc_id: id.clone(),
			settings,
		}))
	}

	/// Selects the current document locally and on the host.
	pub fn set_current_doc(&self, id: &DocId) -> Result<()> {
		self.document(id)?;
		if self.registry.set_current_doc(id) {
			self.client.notify(CommandPayload::SetCurrentDoc(SetCurrentDoc { doc_id: id.clone() }))?;
		}
		Ok(())
	}

	/// Handles one frame from the host.
	pub fn handle_frame(&self, frame: Frame) {
		match frame {
			Frame::Response { seq, command, result } => self.client.handle_response(seq, command, result),
			Frame::Notice {
				notice: Notice::DebuggerStatus { session_id, status },
				..
			} => {
				let docs = self.registry.apply_session_notice(&session_id, status);
				debug!(%session_id, ?status, docs = docs.len(), "debugger status applied");
			}
			Frame::Command { seq, payload } => {
				warn!(seq, command = %payload.kind(), "ui does not serve commands");
			}
		}
	}

	/// Handles inbound frames until the channel closes, then fails every
	/// outstanding call.
	pub async fn run(self: Arc<Self>, mut inbound: mpsc::UnboundedReceiver<Frame>) {
		while let Some(frame) = inbound.recv().await {
			self.handle_frame(frame);
		}
		self.client.disconnect();
		debug!("ui session stopped");
	}
}

use async_trait::async_trait;
use memview_doc::{MemoryError, MemoryInterface};
use memview_primitives::{Address, DocId};
use memview_proto::{CommandKind, CommandPayload, GetMemory, GetStartAddress, ResponsePayload};
use tracing::debug;

use crate::{BridgeError, UiClient};

/// Memory capability of the UI half: every read is a command to the host.
#[derive(Debug, Clone)]
pub struct UiMemoryProxy {
	client: UiClient,
}

impl UiMemoryProxy {
	/// Creates a proxy issuing commands through `client`.
	pub fn new(client: UiClient) -> Self {
		Self { client }
	}
}

fn transport(err: BridgeError) -> MemoryError {
	MemoryError::Transport(err.to_string())
}

#[async_trait]
impl MemoryInterface for UiMemoryProxy {
	async fn get_start_address(&self, doc: &DocId, expr: &str, fallback: &str) -> Result<String, MemoryError> {
		let payload = CommandPayload::GetStartAddress(GetStartAddress {
			doc_id: doc.clone(),
			expr: expr.to_string(),
			fallback: fallback.to_string(),
		});
		match self.client.call(payload).await {
			Ok(ResponsePayload::StartAddress(addr)) => Ok(addr),
			Ok(_) => Err(transport(BridgeError::UnexpectedResponse(CommandKind::GetStartAddress))),
			Err(BridgeError::Remote(reason)) => Err(MemoryError::Unresolved {
				expr: expr.to_string(),
				reason,
			}),
			Err(err) => Err(transport(err)),
		}
	}

	async fn get_memory(&self, doc: &DocId, addr: Address, count: usize) -> Result<Vec<u8>, MemoryError> {
		let payload = CommandPayload::GetMemory(GetMemory {
			doc_id: doc.clone(),
			addr,
			count,
		});
		match self.client.call(payload).await.map_err(transport)? {
			ResponsePayload::Memory(bytes) => Ok(bytes),
			_ => Err(transport(BridgeError::UnexpectedResponse(CommandKind::GetMemory))),
		}
	}

	/// The UI never writes target memory; edits are mirrored to the host,
	/// which commits them.
	async fn set_memory(&self, doc: &DocId, addr: Address, bytes: &[u8]) -> Result<bool, MemoryError> {
		debug!(doc_id = %doc, %addr, len = bytes.len(), "ui-side write refused");
		Ok(false)
	}
}

use async_trait::async_trait;
use memview_primitives::{Address, DocId, SessionStatus};
use tokio::sync::watch;

use super::MemoryInterface;
use crate::MemoryError;

/// Serves reads only while the debug session is stopped.
///
/// A running debuggee cannot be read meaningfully, so reads return an empty
/// buffer, writes are refused and expressions evaluate to their fallback
/// without a round-trip.
#[derive(Debug)]
pub struct StoppedGate<M> {
	inner: M,
	status: watch::Receiver<SessionStatus>,
}

impl<M> StoppedGate<M> {
	/// Gates `inner` on the status published through `status`.
	pub fn new(inner: M, status: watch::Receiver<SessionStatus>) -> Self {
		Self { inner, status }
	}

	/// Returns the wrapped capability.
	pub fn inner(&self) -> &M {
		&self.inner
	}

	fn is_stopped(&self) -> bool {
		self.status.borrow().is_stopped()
	}
}

#[async_trait]
impl<M: MemoryInterface> MemoryInterface for StoppedGate<M> {
	async fn get_start_address(&self, doc: &DocId, expr: &str, fallback: &str) -> Result<String, MemoryError> {
		if !self.is_stopped() {
			return Ok(fallback.to_string());
		}
		self.inner.get_start_address(doc, expr, fallback).await
	}

	async fn get_memory(&self, doc: &DocId, addr: Address, count: usize) -> Result<Vec<u8>, MemoryError> {
		if !self.is_stopped() {
			tracing::trace!(doc_id = %doc, %addr, "session not stopped, skipping read");
			return Ok(Vec::new());
		}
		self.inner.get_memory(doc, addr, count).await
	}

	async fn set_memory(&self, doc: &DocId, addr: Address, bytes: &[u8]) -> Result<bool, MemoryError> {
		if !self.is_stopped() {
			return Ok(false);
		}
		self.inner.set_memory(doc, addr, bytes).await
	}
}

//! The memory capability consumed by the cache.
//!
//! Implementations perform the actual round-trip to the target: a debugger
//! adapter on the host half, a protocol proxy on the UI half, or an in-memory
//! buffer in tests and offline tools.

mod buffer;
mod gate;

use async_trait::async_trait;
use memview_primitives::{Address, DocId};

pub use buffer::BufferMemory;
pub use gate::StoppedGate;

use crate::MemoryError;

/// Round-trip access to target memory on behalf of a document.
#[async_trait]
pub trait MemoryInterface: Send + Sync {
	/// Evaluates `expr` in the paused debuggee and returns the resulting
	/// address as decimal or `0x` hexadecimal text.
	///
	/// Implementations return `fallback` when evaluation is not possible in
	/// the current session state.
	async fn get_start_address(&self, doc: &DocId, expr: &str, fallback: &str) -> Result<String, MemoryError>;

	/// Reads up to `count` bytes at `addr`.
	///
	/// Best effort: the result may be shorter than requested, or empty when
	/// the session cannot currently be read.
	async fn get_memory(&self, doc: &DocId, addr: Address, count: usize) -> Result<Vec<u8>, MemoryError>;

	/// Writes `bytes` at `addr`, returning whether the target accepted them.
	async fn set_memory(&self, doc: &DocId, addr: Address, bytes: &[u8]) -> Result<bool, MemoryError>;
}

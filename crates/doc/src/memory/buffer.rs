use std::collections::HashMap;

use async_trait::async_trait;
use memview_primitives::{Address, DocId};
use parking_lot::Mutex;

use super::MemoryInterface;
use crate::MemoryError;

/// A memory image held in a byte buffer.
///
/// Expressions resolve against a symbol table or as numeric literals. Every
/// read is recorded so tests can assert how many round-trips the cache made.
#[derive(Debug)]
pub struct BufferMemory {
	state: Mutex<BufferState>,
}

#[derive(Debug)]
struct BufferState {
	base: Address,
	bytes: Vec<u8>,
	symbols: HashMap<String, u64>,
	fail_reads: bool,
	reads: Vec<(Address, usize)>,
	writes: Vec<(Address, Vec<u8>)>,
}

impl BufferMemory {
	/// Creates an image of `bytes` starting at `base`.
	pub fn new(base: Address, bytes: Vec<u8>) -> Self {
		Self {
			state: Mutex::new(BufferState {
				base,
				bytes,
				symbols: HashMap::new(),
				fail_reads: false,
				reads: Vec::new(),
				writes: Vec::new(),
			}),
		}
	}

	/// Adds a symbol that expressions may name.
	#[must_use]
	pub fn with_symbol(self, name: &str, value: u64) -> Self {
		self.state.lock().symbols.insert(name.to_string(), value);
		self
	}

	/// Replaces the image contents, as if the target ran between two stops.
	pub fn replace_bytes(&self, bytes: Vec<u8>) {
		self.state.lock().bytes = bytes;
	}

	/// Moves the image to a new base address.
	pub fn rebase(&self, base: Address) {
		self.state.lock().base = base;
	}

	/// Makes every subsequent read fail until reset.
	pub fn set_fail_reads(&self, fail: bool) {
		self.state.lock().fail_reads = fail;
	}

	/// Returns a copy of the image.
	pub fn bytes(&self) -> Vec<u8> {
		self.state.lock().bytes.clone()
	}

	/// Returns every `(addr, count)` read request issued so far.
	pub fn reads(&self) -> Vec<(Address, usize)> {
		self.state.lock().reads.clone()
	}

	/// Returns the number of read requests issued so far.
	pub fn read_count(&self) -> usize {
		self.state.lock().reads.len()
	}

	/// Returns every accepted write.
	pub fn writes(&self) -> Vec<(Address, Vec<u8>)> {
		self.state.lock().writes.clone()
	}
}

impl BufferState {
	fn evaluate(&self, expr: &str) -> Option<u64> {
		let expr = expr.trim();
		if let Some(value) = self.symbols.get(expr) {
			return Some(*value);
		}
		expr.parse::<Address>().ok().map(Address::get)
	}
}

#[async_trait]
impl MemoryInterface for BufferMemory {
	async fn get_start_address(&self, _doc: &DocId, expr: &str, fallback: &str) -> Result<String, MemoryError> {
		if expr.trim().is_empty() {
			return Ok(fallback.to_string());
		}
		let state = self.state.lock();
		state
			.evaluate(expr)
			.map(|value| value.to_string())
			.ok_or_else(|| MemoryError::Unresolved {
				expr: expr.to_string(),
				reason: "no symbol in current context".to_string(),
			})
	}

	async fn get_memory(&self, _doc: &DocId, addr: Address, count: usize) -> Result<Vec<u8>, MemoryError> {
		let mut state = self.state.lock();
		state.reads.push((addr, count));
		if state.fail_reads {
			return Err(MemoryError::Transport("read failed".to_string()));
		}
		let Some(offset) = addr.offset_from(state.base).and_then(|o| usize::try_from(o).ok()) else {
			return Ok(Vec::new());
		};
		let start = offset.min(state.bytes.len());
		let end = offset.saturating_add(count).min(state.bytes.len());
		Ok(state.bytes[start..end].to_vec())
	}

	async fn set_memory(&self, _doc: &DocId, addr: Address, bytes: &[u8]) -> Result<bool, MemoryError> {
		let mut state = self.state.lock();
		let Some(offset) = addr.offset_from(state.base).and_then(|o| usize::try_from(o).ok()) else {
			return Ok(false);
		};
		let Some(end) = offset.checked_add(bytes.len()).filter(|end| *end <= state.bytes.len()) else {
			return Ok(false);
		};
		state.bytes[offset..end].copy_from_slice(bytes);
		state.writes.push((addr, bytes.to_vec()));
		Ok(true)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn doc() -> DocId {
		DocId::from("d")
	}

	#[tokio::test]
	async fn reads_are_clipped_to_the_image() {
		let mem = BufferMemory::new(Address(0x100), (0u8..16).collect());
		assert_eq!(mem.get_memory(&doc(), Address(0x10c), 8).await.unwrap(), vec![12, 13, 14, 15]);
		assert!(mem.get_memory(&doc(), Address(0xff), 4).await.unwrap().is_empty());
		assert!(mem.get_memory(&doc(), Address(0x200), 4).await.unwrap().is_empty());
		assert_eq!(mem.read_count(), 3);
	}

	#[tokio::test]
	async fn expressions_resolve_symbols_and_literals() {
		let mem = BufferMemory::new(Address(0), Vec::new()).with_symbol("buf", 0x2000);
		assert_eq!(mem.get_start_address(&doc(), "buf", "0").await.unwrap(), "8192");
		assert_eq!(mem.get_start_address(&doc(), "0x10", "0").await.unwrap(), "16");
		assert_eq!(mem.get_start_address(&doc(), "", "0x40").await.unwrap(), "0x40");
		assert!(matches!(
			mem.get_start_address(&doc(), "missing", "0").await,
			Err(MemoryError::Unresolved { .. })
		));
	}

	#[tokio::test]
	async fn writes_outside_image_are_rejected() {
		let mem = BufferMemory::new(Address(0x100), vec![0; 4]);
		assert!(mem.set_memory(&doc(), Address(0x102), &[1, 2]).await.unwrap());
		assert!(!mem.set_memory(&doc(), Address(0x103), &[1, 2]).await.unwrap());
		assert_eq!(mem.bytes(), vec![0, 0, 1, 2]);
	}
}

//! Per-document page cache.
//!
//! The address window `[base, max)` is split into pages of `page_size` bytes;
//! page `slot` covers `base + slot * page_size`. The page array grows lazily up
//! to the highest slot read and never shrinks while the geometry is unchanged.
//!
//! # Freshness
//!
//! A page is fresh while its `current` bytes reflect the last successful fetch
//! since the store was last marked stale. [`PageStore::mark_all_stale`] keeps
//! the bytes so synchronous reads still answer with last-known values while a
//! refetch is pending.
//!
//! # Single-flight fetches
//!
//! At most one fetch per page address is outstanding. The shared future is
//! registered in `in_flight` before the caller first awaits it, so every
//! concurrent reader of the same page joins the same transport call. Inside a
//! tokio runtime the fetch is also driven by a spawned task, so it completes
//! and updates the store even if every lookup waiting on it is dropped.
//!
//! A fetch installs its bytes only if the page is still stale when it resolves
//! and neither the geometry generation nor the stale epoch it was issued under
//! has moved on. Marking pages stale bumps the epoch and forgets outstanding
//! fetches, so readers arriving afterwards issue a new transport call instead
//! of joining one that may return bytes from before the stop.
//!
//! # History
//!
//! When history is kept (UI half), installing new bytes over a page moves the
//! displaced `current` into `previous` for change highlighting. Only one
//! generation is retained: if the displaced bytes were never read, `previous`
//! is dropped instead, so a page overwritten twice without an intervening read
//! carries no history.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared, join_all};
use memview_primitives::{Address, DocId};
use memview_proto::SerializedPage;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::{MemoryInterface, PageError};

type SharedFetch = Shared<BoxFuture<'static, Option<Arc<[u8]>>>>;

/// State a fetch was issued under; it installs only if both still hold.
#[derive(Debug, Clone, Copy)]
struct Issued {
	generation: u64,
	stale_epoch: u64,
}

/// A byte together with its value before the last refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BytePair {
	/// Latest fetched value, `None` if unavailable.
	pub current: Option<u8>,
	/// Value before the last refresh; equals `current` without history.
	pub previous: Option<u8>,
}

impl BytePair {
	/// Value returned for bytes that are out of bounds or failed to load.
	pub const UNAVAILABLE: Self = Self {
		current: None,
		previous: None,
	};
}

/// Result of [`PageStore::get_value`]: immediate when the page is fresh,
/// otherwise a future resolving once the page has been fetched.
pub enum ValueLookup {
	/// The page was fresh.
	Ready(BytePair),
	/// The page is being fetched.
	Pending(BoxFuture<'static, BytePair>),
}

impl ValueLookup {
	/// Waits for the value.
	pub async fn resolve(self) -> BytePair {
		match self {
			Self::Ready(pair) => pair,
			Self::Pending(fut) => fut.await,
		}
	}

	/// Returns the value if it was available without waiting.
	pub fn ready(&self) -> Option<BytePair> {
		match self {
			Self::Ready(pair) => Some(*pair),
			Self::Pending(_) => None,
		}
	}
}

impl std::fmt::Debug for ValueLookup {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Ready(pair) => f.debug_tuple("Ready").field(pair).finish(),
			Self::Pending(_) => f.write_str("Pending"),
		}
	}
}

#[derive(Debug, Clone, Default)]
struct Page {
	stale: bool,
	current: Vec<u8>,
	previous: Option<Vec<u8>>,
	observed: bool,
}

impl Page {
	fn empty() -> Self {
		Self {
			stale: true,
			..Self::default()
		}
	}

	fn install(&mut self, bytes: Vec<u8>, keep_history: bool) {
		if keep_history && !self.current.is_empty() {
			let displaced = std::mem::take(&mut self.current);
			self.previous = self.observed.then_some(displaced);
		}
		self.current = bytes;
		self.stale = false;
		self.observed = false;
	}

	fn pair(&self, offset: usize) -> BytePair {
		let current = self.current.get(offset).copied();
		let previous = match &self.previous {
			Some(prev) => prev.get(offset).copied().or(current),
			None => current,
		};
		BytePair { current, previous }
	}
}

struct StoreState {
	base: Address,
	max: Address,
	page_size: usize,
	generation: u64,
	stale_epoch: u64,
	ready: bool,
	pages: Vec<Page>,
	in_flight: HashMap<u64, SharedFetch>,
}

impl StoreState {
	/// Returns `(slot, offset in page)` for an address inside the window.
	fn locate(&self, addr: Address) -> Option<(usize, usize)> {
		if addr >= self.max || self.page_size == 0 {
			return None;
		}
		let offset = usize::try_from(addr.offset_from(self.base)?).ok()?;
		Some((offset / self.page_size, offset % self.page_size))
	}

	fn page_addr(&self, slot: usize) -> Address {
		self.base.saturating_add((slot * self.page_size) as u64)
	}

	fn page_len(&self, slot: usize) -> usize {
		let start = self.page_addr(slot);
		let remaining = self.max.get().saturating_sub(start.get());
		usize::try_from(remaining).map_or(self.page_size, |r| r.min(self.page_size))
	}

	fn grow_to(&mut self, slot: usize) {
		if self.pages.len() <= slot {
			self.pages.resize_with(slot + 1, Page::empty);
		}
	}

	/// Marks every page stale and forgets outstanding fetches; they still
	/// resolve for their waiters but no longer install.
	fn invalidate(&mut self) {
		for page in &mut self.pages {
			page.stale = true;
		}
		self.stale_epoch += 1;
		self.in_flight.clear();
	}

	fn pair_at(&mut self, addr: Address) -> Option<BytePair> {
		let (slot, offset) = self.locate(addr)?;
		let page = self.pages.get_mut(slot)?;
		page.observed = true;
		Some(page.pair(offset))
	}
}

struct StoreInner {
	doc_id: DocId,
	memory: Arc<dyn MemoryInterface>,
	keep_history: bool,
	state: Mutex<StoreState>,
}

/// Page cache for one document.
///
/// Cheap to clone; clones share the same pages.
#[derive(Clone)]
pub struct PageStore {
	inner: Arc<StoreInner>,
}

impl std::fmt::Debug for PageStore {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let state = self.inner.state.lock();
		f.debug_struct("PageStore")
			.field("doc_id", &self.inner.doc_id)
			.field("base", &state.base)
			.field("max", &state.max)
			.field("page_size", &state.page_size)
			.field("pages", &state.pages.len())
			.field("in_flight", &state.in_flight.len())
			.finish_non_exhaustive()
	}
}

impl PageStore {
	/// Creates an empty store for the window `[base, max)`.
	pub fn new(
		doc_id: DocId,
		memory: Arc<dyn MemoryInterface>,
		keep_history: bool,
		base: Address,
		max: Address,
		page_size: usize,
	) -> Self {
		Self {
			inner: Arc::new(StoreInner {
				doc_id,
				memory,
				keep_history,
				state: Mutex::new(StoreState {
					base,
					max: max.max(base),
					page_size,
					generation: 0,
					stale_epoch: 0,
					ready: false,
					pages: Vec::new(),
					in_flight: HashMap::new(),
				}),
			}),
		}
	}

	/// Returns the page size in bytes.
	pub fn page_size(&self) -> usize {
		self.inner.state.lock().page_size
	}

	/// Returns the number of allocated pages.
	pub fn len(&self) -> usize {
		self.inner.state.lock().pages.len()
	}

	/// Returns true if no page has been allocated.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Returns the number of fetches currently outstanding.
	pub fn in_flight(&self) -> usize {
		self.inner.state.lock().in_flight.len()
	}

	/// Records whether the owning session has stopped at least once. Until it
	/// has, [`PageStore::load_page`] serves stale pages that still hold bytes.
	pub fn set_ready(&self, ready: bool) {
		self.inner.state.lock().ready = ready;
	}

	/// Discards every page and outstanding fetch and adopts a new geometry.
	///
	/// Fetches issued before the reset resolve without touching the new pages.
	pub fn reset(&self, base: Address, max: Address, page_size: usize) {
		let mut state = self.inner.state.lock();
		state.base = base;
		state.max = max.max(base);
		state.page_size = page_size;
		state.generation += 1;
		state.stale_epoch += 1;
		state.pages.clear();
		state.in_flight.clear();
		debug!(doc_id = %self.inner.doc_id, %base, %max, page_size, "page store reset");
	}

	/// Moves the end of the window, keeping pages; the last page may change
	/// length so everything is marked stale.
	pub fn set_max(&self, max: Address) {
		let mut state = self.inner.state.lock();
		state.max = max.max(state.base);
		state.invalidate();
	}

	/// Returns the last known byte at `addr` without waiting.
	pub fn get_value_sync(&self, addr: Address) -> Option<u8> {
		let state = self.inner.state.lock();
		let (slot, offset) = state.locate(addr)?;
		state.pages.get(slot)?.current.get(offset).copied()
	}

	/// Returns true if the page holding `addr` must be refetched before its
	/// bytes are trusted. Missing pages are stale.
	pub fn is_stale(&self, addr: Address) -> bool {
		let state = self.inner.state.lock();
		state
			.locate(addr)
			.and_then(|(slot, _)| state.pages.get(slot))
			.is_none_or(|page| page.stale)
	}

	/// Returns the byte at `addr` and its value before the last refresh.
	///
	/// Fresh pages answer immediately. Otherwise the page is fetched (joining
	/// an outstanding fetch of the same page if there is one). A failed fetch
	/// resolves to [`BytePair::UNAVAILABLE`] and leaves the page stale.
	pub fn get_value(&self, addr: Address) -> ValueLookup {
		let mut state = self.inner.state.lock();
		let Some((slot, _)) = state.locate(addr) else {
			return ValueLookup::Ready(BytePair::UNAVAILABLE);
		};
		if state.pages.get(slot).is_some_and(|page| !page.stale) {
			return ValueLookup::Ready(state.pair_at(addr).unwrap_or(BytePair::UNAVAILABLE));
		}

		state.grow_to(slot);
		let fetch = self.fetch_slot(&mut state, slot);
		drop(state);

		let store = self.clone();
		ValueLookup::Pending(
			async move {
				match fetch.await {
					Some(bytes) => store.pair_after_fetch(addr, &bytes),
					None => BytePair::UNAVAILABLE,
				}
			}
			.boxed(),
		)
	}

	/// Returns the row containing `addr` without waiting.
	///
	/// The row starts at `addr` rounded down to a multiple of `bytes_per_row`
	/// from the base. Bytes not yet fetched are unavailable.
	pub fn get_row_sync(&self, addr: Address, bytes_per_row: usize) -> Vec<BytePair> {
		let mut state = self.inner.state.lock();
		let bytes_per_row = bytes_per_row.max(1);
		let Some(offset) = addr.offset_from(state.base) else {
			return vec![BytePair::UNAVAILABLE; bytes_per_row];
		};
		let row_start = Address(addr.get() - offset % bytes_per_row as u64);
		(0..bytes_per_row as u64)
			.map(|i| {
				row_start
					.checked_add(i)
					.and_then(|a| state.pair_at(a))
					.unwrap_or(BytePair::UNAVAILABLE)
			})
			.collect()
	}

	/// Installs `bytes` as the current contents of the page holding `addr`.
	pub fn set_page(&self, addr: Address, bytes: Vec<u8>) {
		let mut state = self.inner.state.lock();
		let Some((slot, _)) = state.locate(addr) else {
			return;
		};
		state.grow_to(slot);
		let keep_history = self.inner.keep_history;
		state.pages[slot].install(bytes, keep_history);
	}

	/// Overwrites one already-fetched byte.
	///
	/// Fails if the page holding `addr` has not been fetched far enough; bytes
	/// can only be overwritten once they are known.
	pub fn try_set_value(&self, addr: Address, value: u8) -> Result<(), PageError> {
		let mut state = self.inner.state.lock();
		let (base, max) = (state.base, state.max);
		let unfetched = PageError::Unfetched { addr, base, max };
		let (slot, offset) = state.locate(addr).ok_or_else(|| unfetched.clone())?;
		let byte = state
			.pages
			.get_mut(slot)
			.and_then(|page| page.current.get_mut(offset))
			.ok_or(unfetched)?;
		*byte = value;
		Ok(())
	}

	/// Overwrites one already-fetched byte, ignoring unfetched addresses.
	///
	/// Returns whether the byte was written.
	pub fn set_value(&self, addr: Address, value: u8) -> bool {
		self.try_set_value(addr, value).is_ok()
	}

	/// Marks every page stale, keeping its bytes for synchronous reads.
	pub fn mark_all_stale(&self) {
		let mut state = self.inner.state.lock();
		state.invalidate();
		trace!(doc_id = %self.inner.doc_id, pages = state.pages.len(), "pages marked stale");
	}

	/// Drops every page's previous snapshot.
	pub fn delete_history(&self) {
		let mut state = self.inner.state.lock();
		for page in &mut state.pages {
			page.previous = None;
		}
	}

	/// Refetches every stale page and waits for all of them.
	pub async fn refresh_memory_if_stale(&self) {
		let addrs: Vec<Address> = {
			let state = self.inner.state.lock();
			state
				.pages
				.iter()
				.enumerate()
				.filter(|(_, page)| page.stale)
				.map(|(slot, _)| state.page_addr(slot))
				.collect()
		};
		join_all(addrs.into_iter().map(|addr| self.get_value(addr).resolve())).await;
	}

	/// Returns the fetched bytes of the page starting at `addr`.
	///
	/// A fresh page is returned from the cache. Before the session is ready a
	/// stale page that still holds bytes is returned as well, to avoid showing
	/// blanks before the first stop. Otherwise the bytes are read through the
	/// memory capability and, if `addr` starts a page of this store and the
	/// store was not marked stale meanwhile, installed. Returns an empty buffer
	/// if nothing could be read.
	pub async fn load_page(&self, addr: Address, count: usize) -> Vec<u8> {
		if let Some(bytes) = self.cached_page(addr, count) {
			return bytes;
		}
		let issued = {
			let state = self.inner.state.lock();
			Issued {
				generation: state.generation,
				stale_epoch: state.stale_epoch,
			}
		};
		let bytes = self.read_remote(addr, count).await;
		if !bytes.is_empty() {
			self.install_loaded(addr, &bytes, issued);
		}
		bytes
	}

	/// Serializes every allocated page.
	pub fn to_serialized(&self) -> Vec<SerializedPage> {
		self.inner
			.state
			.lock()
			.pages
			.iter()
			.map(|page| SerializedPage {
				stale: page.stale,
				current: page.current.clone(),
			})
			.collect()
	}

	/// Replaces the pages with previously serialized ones.
	pub fn restore_serialized(&self, pages: Vec<SerializedPage>) {
		let mut state = self.inner.state.lock();
		state.generation += 1;
		state.stale_epoch += 1;
		state.in_flight.clear();
		state.pages = pages
			.into_iter()
			.map(|page| Page {
				stale: page.stale,
				current: page.current,
				previous: None,
				observed: false,
			})
			.collect();
	}

	fn install_loaded(&self, addr: Address, bytes: &[u8], issued: Issued) {
		let mut state = self.inner.state.lock();
		if state.generation != issued.generation || state.stale_epoch != issued.stale_epoch {
			debug!(doc_id = %self.inner.doc_id, %addr, "pages went stale during load, not installing");
			return;
		}
		let Some((slot, 0)) = state.locate(addr) else {
			return;
		};
		state.grow_to(slot);
		let keep_history = self.inner.keep_history;
		state.pages[slot].install(bytes.to_vec(), keep_history);
	}

	fn cached_page(&self, addr: Address, count: usize) -> Option<Vec<u8>> {
		let state = self.inner.state.lock();
		let (slot, offset) = state.locate(addr)?;
		let page = state.pages.get(slot)?;
		let usable = !page.stale || (!state.ready && !page.current.is_empty());
		(usable && offset == 0 && page.current.len() >= count.min(state.page_len(slot)))
			.then(|| page.current.iter().take(count).copied().collect())
	}

	async fn read_remote(&self, addr: Address, count: usize) -> Vec<u8> {
		match self.inner.memory.get_memory(&self.inner.doc_id, addr, count).await {
			Ok(bytes) => bytes,
			Err(err) => {
				warn!(doc_id = %self.inner.doc_id, %addr, count, error = %err, "memory read failed");
				Vec::new()
			}
		}
	}

	/// Returns the outstanding fetch for `slot`, issuing one if needed.
	fn fetch_slot(&self, state: &mut StoreState, slot: usize) -> SharedFetch {
		let page_addr = state.page_addr(slot);
		if let Some(fetch) = state.in_flight.get(&page_addr.get()) {
			trace!(doc_id = %self.inner.doc_id, %page_addr, "joining in-flight fetch");
			return fetch.clone();
		}

		let len = state.page_len(slot);
		let issued = Issued {
			generation: state.generation,
			stale_epoch: state.stale_epoch,
		};
		let store = self.clone();
		debug!(doc_id = %self.inner.doc_id, %page_addr, len, "fetching page");
		let fetch = async move { store.run_fetch(slot, page_addr, len, issued).await }
			.boxed()
			.shared();
		state.in_flight.insert(page_addr.get(), fetch.clone());
		if let Ok(handle) = tokio::runtime::Handle::try_current() {
			let driver = fetch.clone();
			handle.spawn(async move {
				let _ = driver.await;
			});
		}
		fetch
	}

	async fn run_fetch(self, slot: usize, page_addr: Address, len: usize, issued: Issued) -> Option<Arc<[u8]>> {
		let bytes = self.read_remote(page_addr, len).await;

		let mut state = self.inner.state.lock();
		if state.generation != issued.generation {
			debug!(doc_id = %self.inner.doc_id, %page_addr, "discarding fetch from previous geometry");
			return None;
		}
		let current_epoch = state.stale_epoch == issued.stale_epoch;
		if current_epoch {
			state.in_flight.remove(&page_addr.get());
		}
		if bytes.is_empty() {
			debug!(doc_id = %self.inner.doc_id, %page_addr, "fetch returned nothing, page stays stale");
			return None;
		}

		let bytes: Arc<[u8]> = bytes.into();
		if !current_epoch {
			debug!(doc_id = %self.inner.doc_id, %page_addr, "pages went stale during fetch, not installing");
			return Some(bytes);
		}
		let keep_history = self.inner.keep_history;
		state.grow_to(slot);
		let page = &mut state.pages[slot];
		if page.stale {
			page.install(bytes.to_vec(), keep_history);
		}
		Some(bytes)
	}

	fn pair_after_fetch(&self, addr: Address, bytes: &[u8]) -> BytePair {
		let mut state = self.inner.state.lock();
		let fresh = state
			.locate(addr)
			.and_then(|(slot, _)| state.pages.get(slot))
			.is_some_and(|page| !page.stale);
		if fresh
			&& let Some(pair) = state.pair_at(addr)
			&& pair.current.is_some()
		{
			return pair;
		}
		// Not installed (stale again, or the page changed shape); answer from
		// the fetched bytes.
		let current = state
			.locate(addr)
			.and_then(|(_, offset)| bytes.get(offset).copied());
		BytePair {
			current,
			previous: current,
		}
	}
}

#[cfg(test)]
mod tests;

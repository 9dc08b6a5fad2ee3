use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use memview_primitives::{Address, DocId};
use pretty_assertions::assert_eq;
use tokio::sync::Semaphore;

use super::*;
use crate::{BufferMemory, MemoryError, MemoryInterface};

const BASE: Address = Address(0x1000);

fn image(len: usize) -> Vec<u8> {
	(0..len).map(|i| i as u8).collect()
}

fn store_over<M: MemoryInterface + 'static>(mem: &Arc<M>, window: u64, keep_history: bool) -> PageStore {
	let memory: Arc<dyn MemoryInterface> = mem.clone();
	PageStore::new(
		DocId::from("doc"),
		memory,
		keep_history,
		BASE,
		BASE.saturating_add(window),
		64,
	)
}

/// Memory whose reads snapshot the image when issued and then wait for the
/// test to release them, one permit per read.
struct GatedMemory {
	bytes: Mutex<Vec<u8>>,
	calls: AtomicUsize,
	gate: Semaphore,
}

impl GatedMemory {
	fn new(bytes: Vec<u8>) -> Self {
		Self {
			bytes: Mutex::new(bytes),
			calls: AtomicUsize::new(0),
			gate: Semaphore::new(0),
		}
	}

	fn calls(&self) -> usize {
		self.calls.load(Ordering::SeqCst)
	}

	fn replace_bytes(&self, bytes: Vec<u8>) {
		*self.bytes.lock() = bytes;
	}

	/// Lets the `n` oldest parked reads complete.
	fn release(&self, n: usize) {
		self.gate.add_permits(n);
	}

	/// Yields until `n` reads have reached the transport.
	async fn wait_for_calls(&self, n: usize) {
		for _ in 0..100 {
			if self.calls() >= n {
				return;
			}
			tokio::task::yield_now().await;
		}
		panic!("expected {n} transport calls, saw {}", self.calls());
	}
}

#[async_trait]
impl MemoryInterface for GatedMemory {
	async fn get_start_address(&self, _doc: &DocId, _expr: &str, fallback: &str) -> Result<String, MemoryError> {
		Ok(fallback.to_string())
	}

	async fn get_memory(&self, _doc: &DocId, addr: Address, count: usize) -> Result<Vec<u8>, MemoryError> {
		let snapshot: Vec<u8> = {
			let bytes = self.bytes.lock();
			let offset = addr.offset_from(BASE).map_or(bytes.len(), |o| o as usize);
			bytes.iter().skip(offset).take(count).copied().collect()
		};
		self.calls.fetch_add(1, Ordering::SeqCst);
		self.gate
			.acquire()
			.await
			.map_err(|err| MemoryError::Transport(err.to_string()))?
			.forget();
		Ok(snapshot)
	}

	async fn set_memory(&self, _doc: &DocId, _addr: Address, _bytes: &[u8]) -> Result<bool, MemoryError> {
		Ok(false)
	}
}

/// Yields until `done` holds.
async fn settle(mut done: impl FnMut() -> bool) {
	for _ in 0..100 {
		if done() {
			return;
		}
		tokio::task::yield_now().await;
	}
	panic!("store did not settle");
}

#[tokio::test]
async fn concurrent_reads_of_one_page_share_a_fetch() {
	let _ = tracing_subscriber::fmt().with_test_writer().try_init();
	let mem = Arc::new(BufferMemory::new(BASE, image(256)));
	let pages = store_over(&mem, 256, false);

	let a = pages.get_value(Address(0x1001));
	let b = pages.get_value(Address(0x1030));
	assert!(a.ready().is_none());
	assert!(b.ready().is_none());
	assert_eq!(pages.in_flight(), 1);

	let (a, b) = tokio::join!(a.resolve(), b.resolve());
	assert_eq!(a.current, Some(0x01));
	assert_eq!(b.current, Some(0x30));
	assert_eq!(mem.reads(), vec![(BASE, 64)]);
	assert_eq!(pages.in_flight(), 0);
}

#[tokio::test]
async fn reads_of_different_pages_fetch_separately() {
	let mem = Arc::new(BufferMemory::new(BASE, image(256)));
	let pages = store_over(&mem, 256, false);

	let (a, b) = tokio::join!(
		pages.get_value(Address(0x1000)).resolve(),
		pages.get_value(Address(0x1080)).resolve()
	);
	assert_eq!(a.current, Some(0x00));
	assert_eq!(b.current, Some(0x80));
	assert_eq!(mem.read_count(), 2);
	// Intermediate slot is allocated but still unfetched.
	assert_eq!(pages.len(), 3);
	assert!(pages.is_stale(Address(0x1040)));
}

#[tokio::test]
async fn fresh_page_answers_without_waiting() {
	let mem = Arc::new(BufferMemory::new(BASE, image(64)));
	let pages = store_over(&mem, 64, false);

	pages.get_value(Address(0x1000)).resolve().await;
	let lookup = pages.get_value(Address(0x1010));
	assert_eq!(
		lookup.ready(),
		Some(BytePair {
			current: Some(0x10),
			previous: Some(0x10),
		})
	);
	assert_eq!(mem.read_count(), 1);
}

#[tokio::test]
async fn stale_pages_keep_last_known_bytes() {
	let mem = Arc::new(BufferMemory::new(BASE, image(64)));
	let pages = store_over(&mem, 64, false);
	pages.get_value(Address(0x1004)).resolve().await;

	pages.mark_all_stale();
	assert_eq!(pages.get_value_sync(Address(0x1004)), Some(0x04));
	assert!(pages.is_stale(Address(0x1004)));

	mem.replace_bytes(vec![0xaa; 64]);
	let lookup = pages.get_value(Address(0x1004));
	assert!(lookup.ready().is_none());
	assert_eq!(lookup.resolve().await.current, Some(0xaa));
	assert_eq!(mem.read_count(), 2);
	assert!(!pages.is_stale(Address(0x1004)));
}

#[tokio::test]
async fn history_tracks_the_previous_refresh() {
	let mem = Arc::new(BufferMemory::new(BASE, image(64)));
	let pages = store_over(&mem, 64, true);
	pages.get_value(Address(0x1000)).resolve().await;

	let mut next = image(64);
	next[2] = 0xff;
	mem.replace_bytes(next);
	pages.mark_all_stale();

	let changed = pages.get_value(Address(0x1002)).resolve().await;
	assert_eq!(changed, BytePair { current: Some(0xff), previous: Some(0x02) });
	let same = pages.get_value(Address(0x1003)).resolve().await;
	assert_eq!(same, BytePair { current: Some(0x03), previous: Some(0x03) });

	pages.delete_history();
	let cleared = pages.get_value(Address(0x1002)).resolve().await;
	assert_eq!(cleared, BytePair { current: Some(0xff), previous: Some(0xff) });
}

#[tokio::test]
async fn host_side_store_keeps_no_history() {
	let mem = Arc::new(BufferMemory::new(BASE, image(64)));
	let pages = store_over(&mem, 64, false);
	pages.get_value(Address(0x1000)).resolve().await;
	mem.replace_bytes(vec![0; 64]);
	pages.mark_all_stale();

	let pair = pages.get_value(Address(0x1005)).resolve().await;
	assert_eq!(pair, BytePair { current: Some(0), previous: Some(0) });
}

#[test]
fn unread_overwrite_drops_history() {
	let mem = Arc::new(BufferMemory::new(BASE, Vec::new()));
	let pages = store_over(&mem, 64, true);

	pages.set_page(BASE, vec![1; 64]);
	assert_eq!(pages.get_row_sync(BASE, 4)[0].current, Some(1));

	// Observed, so the next install keeps it as history.
	pages.set_page(BASE, vec![2; 64]);
	// Never observed, so a second install leaves no history behind.
	pages.set_page(BASE, vec![3; 64]);
	assert_eq!(
		pages.get_row_sync(BASE, 4)[0],
		BytePair { current: Some(3), previous: Some(3) }
	);
}

#[tokio::test]
async fn failed_fetch_leaves_page_stale_for_retry() {
	let mem = Arc::new(BufferMemory::new(BASE, image(64)));
	let pages = store_over(&mem, 64, false);
	pages.get_value(Address(0x1008)).resolve().await;
	pages.mark_all_stale();

	mem.set_fail_reads(true);
	let failed = pages.get_value(Address(0x1008)).resolve().await;
	assert_eq!(failed, BytePair::UNAVAILABLE);
	assert!(pages.is_stale(Address(0x1008)));
	assert_eq!(pages.get_value_sync(Address(0x1008)), Some(0x08));
	assert_eq!(pages.in_flight(), 0);

	mem.set_fail_reads(false);
	let retried = pages.get_value(Address(0x1008)).resolve().await;
	assert_eq!(retried.current, Some(0x08));
	assert_eq!(mem.read_count(), 3);
}

#[tokio::test]
async fn empty_read_is_not_installed() {
	let mem = Arc::new(BufferMemory::new(Address(0x9000), image(64)));
	let pages = store_over(&mem, 64, false);
	assert_eq!(pages.get_value(Address(0x1000)).resolve().await, BytePair::UNAVAILABLE);
	assert!(pages.is_stale(Address(0x1000)));
}

#[test]
fn out_of_window_reads_are_unavailable() {
	let mem = Arc::new(BufferMemory::new(BASE, image(64)));
	let pages = store_over(&mem, 64, false);
	assert_eq!(pages.get_value(Address(0x0fff)).ready(), Some(BytePair::UNAVAILABLE));
	assert_eq!(pages.get_value(Address(0x1040)).ready(), Some(BytePair::UNAVAILABLE));
	assert_eq!(pages.get_value_sync(Address(0x1040)), None);
	assert_eq!(mem.read_count(), 0);
}

#[tokio::test]
async fn tail_page_is_fetched_short() {
	let mem = Arc::new(BufferMemory::new(BASE, image(100)));
	let pages = store_over(&mem, 100, false);
	let pair = pages.get_value(Address(0x1063)).resolve().await;
	assert_eq!(pair.current, Some(99));
	assert_eq!(mem.reads(), vec![(Address(0x1040), 36)]);
}

#[test]
fn row_reads_round_down_to_row_start() {
	let mem = Arc::new(BufferMemory::new(BASE, Vec::new()));
	let pages = store_over(&mem, 64, false);
	pages.set_page(BASE, image(64));

	let row = pages.get_row_sync(Address(0x1013), 8);
	let values: Vec<Option<u8>> = row.iter().map(|p| p.current).collect();
	assert_eq!(values, (0x10..0x18).map(Some).collect::<Vec<_>>());

	let unfetched = pages.get_row_sync(Address(0x1100), 4);
	assert!(unfetched.iter().all(|p| *p == BytePair::UNAVAILABLE));
}

#[test]
fn only_fetched_bytes_can_be_overwritten() {
	let mem = Arc::new(BufferMemory::new(BASE, Vec::new()));
	let pages = store_over(&mem, 128, false);
	pages.set_page(BASE, vec![0; 16]);

	assert!(pages.set_value(Address(0x1004), 0x44));
	assert_eq!(pages.get_value_sync(Address(0x1004)), Some(0x44));

	assert!(!pages.set_value(Address(0x1010), 1));
	assert_eq!(
		pages.try_set_value(Address(0x1050), 1),
		Err(PageError::Unfetched {
			addr: Address(0x1050),
			base: BASE,
			max: Address(0x1080),
		})
	);
}

#[tokio::test]
async fn reset_discards_in_flight_fetches() {
	let mem = Arc::new(BufferMemory::new(BASE, image(64)));
	let pages = store_over(&mem, 64, false);

	let lookup = pages.get_value(Address(0x1000));
	pages.reset(BASE, BASE.saturating_add(64), 32);
	assert_eq!(pages.in_flight(), 0);

	assert_eq!(lookup.resolve().await, BytePair::UNAVAILABLE);
	assert!(pages.is_empty());
	assert_eq!(pages.page_size(), 32);
}

#[tokio::test]
async fn refresh_fetches_every_stale_page() {
	let mem = Arc::new(BufferMemory::new(BASE, image(192)));
	let pages = store_over(&mem, 192, false);
	pages.get_value(Address(0x1000)).resolve().await;
	pages.get_value(Address(0x1080)).resolve().await;
	pages.mark_all_stale();

	pages.refresh_memory_if_stale().await;
	assert!(!pages.is_stale(Address(0x1000)));
	assert!(!pages.is_stale(Address(0x1040)));
	assert!(!pages.is_stale(Address(0x1080)));
	assert_eq!(mem.read_count(), 5);
}

#[tokio::test]
async fn stale_page_is_served_before_ready() {
	let mem = Arc::new(BufferMemory::new(BASE, image(64)));
	let pages = store_over(&mem, 64, false);
	pages.set_page(BASE, vec![9; 64]);
	pages.mark_all_stale();

	assert_eq!(pages.load_page(BASE, 64).await, vec![9; 64]);
	assert_eq!(mem.read_count(), 0);

	pages.set_ready(true);
	assert_eq!(pages.load_page(BASE, 64).await, image(64));
	assert_eq!(mem.read_count(), 1);
	assert!(!pages.is_stale(BASE));
}

#[test]
fn serialized_pages_restore() {
	let mem = Arc::new(BufferMemory::new(BASE, Vec::new()));
	let pages = store_over(&mem, 128, false);
	pages.set_page(Address(0x1040), vec![5; 64]);

	let saved = pages.to_serialized();
	assert_eq!(saved.len(), 2);
	assert!(saved[0].stale);
	assert!(!saved[1].stale);

	let other = store_over(&mem, 128, false);
	other.restore_serialized(saved);
	assert_eq!(other.get_value_sync(Address(0x1041)), Some(5));
	assert!(other.is_stale(Address(0x1000)));
}

#[tokio::test]
async fn misaligned_loads_are_returned_but_not_cached() {
	let mem = Arc::new(BufferMemory::new(BASE, image(128)));
	let pages = store_over(&mem, 128, false);

	assert_eq!(pages.load_page(Address(0x1020), 4).await, vec![0x20, 0x21, 0x22, 0x23]);
	assert!(pages.is_empty());
	assert!(pages.is_stale(Address(0x1020)));
}

#[tokio::test]
async fn reader_joins_a_suspended_fetch() {
	let mem = Arc::new(GatedMemory::new(image(64)));
	let pages = store_over(&mem, 64, false);

	let first = tokio::spawn(pages.get_value(Address(0x1002)).resolve());
	mem.wait_for_calls(1).await;

	let second = tokio::spawn(pages.get_value(Address(0x1030)).resolve());
	for _ in 0..5 {
		tokio::task::yield_now().await;
	}
	assert_eq!(mem.calls(), 1);
	assert_eq!(pages.in_flight(), 1);

	mem.release(1);
	assert_eq!(first.await.unwrap().current, Some(0x02));
	assert_eq!(second.await.unwrap().current, Some(0x30));
	assert_eq!(mem.calls(), 1);
	assert_eq!(pages.in_flight(), 0);
	assert!(!pages.is_stale(BASE));
}

#[tokio::test]
async fn stop_during_fetch_forces_a_new_fetch() {
	let mem = Arc::new(GatedMemory::new(vec![1; 64]));
	let pages = store_over(&mem, 64, true);
	let addr = Address(0x1004);

	let before = tokio::spawn(pages.get_value(addr).resolve());
	mem.wait_for_calls(1).await;

	// Target runs and stops again while the read is on the wire.
	mem.replace_bytes(vec![2; 64]);
	pages.mark_all_stale();
	assert_eq!(pages.in_flight(), 0);

	let after = tokio::spawn(pages.get_value(addr).resolve());
	mem.wait_for_calls(2).await;

	// The pre-stop read answers its own reader but does not freshen the page.
	mem.release(1);
	assert_eq!(before.await.unwrap().current, Some(1));
	assert!(pages.is_stale(addr));
	assert_eq!(pages.get_value_sync(addr), None);

	mem.release(1);
	assert_eq!(after.await.unwrap(), BytePair { current: Some(2), previous: Some(2) });
	assert!(!pages.is_stale(addr));
	assert_eq!(pages.get_value(addr).ready().map(|pair| pair.current), Some(Some(2)));
	assert_eq!(mem.calls(), 2);
}

#[tokio::test]
async fn set_max_during_fetch_leaves_the_page_stale() {
	let mem = Arc::new(GatedMemory::new(image(128)));
	let pages = store_over(&mem, 32, false);

	let lookup = tokio::spawn(pages.get_value(Address(0x1010)).resolve());
	mem.wait_for_calls(1).await;
	pages.set_max(BASE.saturating_add(128));
	assert_eq!(pages.in_flight(), 0);

	mem.release(1);
	assert_eq!(lookup.await.unwrap().current, Some(0x10));
	// The read was sized for the old window, so nothing is installed.
	assert!(pages.is_stale(Address(0x1010)));

	let refetch = pages.get_value(Address(0x1030));
	assert!(refetch.ready().is_none());
	mem.wait_for_calls(2).await;
	mem.release(1);
	assert_eq!(refetch.resolve().await.current, Some(0x30));
	assert_eq!(mem.calls(), 2);
}

#[tokio::test]
async fn reset_during_fetch_discards_the_result() {
	let mem = Arc::new(GatedMemory::new(image(64)));
	let pages = store_over(&mem, 64, false);

	let lookup = tokio::spawn(pages.get_value(Address(0x1000)).resolve());
	mem.wait_for_calls(1).await;
	pages.reset(BASE, BASE.saturating_add(64), 64);

	mem.release(1);
	assert_eq!(lookup.await.unwrap(), BytePair::UNAVAILABLE);
	assert!(pages.is_empty());
	assert_eq!(pages.in_flight(), 0);
}

#[tokio::test]
async fn dropped_lookup_still_completes_its_fetch() {
	let mem = Arc::new(BufferMemory::new(BASE, image(64)));
	let pages = store_over(&mem, 64, false);

	drop(pages.get_value(Address(0x1008)));
	settle(|| pages.in_flight() == 0).await;

	assert_eq!(mem.read_count(), 1);
	assert!(!pages.is_stale(Address(0x1008)));
	assert_eq!(pages.get_value_sync(Address(0x1008)), Some(0x08));
}

#[tokio::test]
async fn load_during_stop_is_not_installed() {
	let mem = Arc::new(GatedMemory::new(vec![1; 64]));
	let pages = store_over(&mem, 64, false);
	pages.set_ready(true);

	let load = tokio::spawn({
		let pages = pages.clone();
		async move { pages.load_page(BASE, 64).await }
	});
	mem.wait_for_calls(1).await;
	pages.mark_all_stale();

	mem.release(1);
	assert_eq!(load.await.unwrap(), vec![1; 64]);
	assert!(pages.is_stale(BASE));
}

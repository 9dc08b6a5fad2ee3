//! A memory view document.
//!
//! A document owns the address window configuration, a [`PageStore`] holding
//! fetched bytes, a sparse overlay of local edits, UI-local client state, and
//! the association with a debug session used to re-bind after restarts.

use std::collections::BTreeMap;
use std::sync::Arc;

use memview_primitives::{
	Address, CellFormat, DocId, Endian, RowLayout, SessionId, SessionStatus, render_cell,
};
use memview_proto::{ClientState, DocumentSettings, SerializedDocument};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::events::{DocEvent, EventBus};
use crate::pages::{BytePair, PageStore};
use crate::{MemoryError, MemoryInterface, Role};

/// Composite view of one byte as rendered by the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocByte {
	/// Effective value: the local edit if any, else the fetched byte.
	pub cur: Option<u8>,
	/// Fetched value.
	pub orig: Option<u8>,
	/// The page holding the byte needs a refetch.
	pub stale: bool,
	/// The fetched value differs from the one before the last refresh.
	pub changed: bool,
	/// The address lies inside the document window.
	pub in_range: bool,
}

impl DocByte {
	/// Value returned for addresses outside the window.
	pub const OUT_OF_RANGE: Self = Self {
		cur: None,
		orig: None,
		stale: true,
		changed: false,
		in_range: false,
	};

	/// Returns true if a local edit changes this byte.
	pub fn is_modified(&self) -> bool {
		self.cur != self.orig
	}
}

/// Creation parameters for a [`Document`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentProps {
	/// Start address expression.
	pub expr: String,
	/// Window size expression; empty keeps `max_bytes`.
	pub size_expr: String,
	/// Title shown by the UI; defaults to `expr`.
	pub display_name: Option<String>,
	/// Initially resolved start address.
	pub start_address: Address,
	/// Initially resolved window size.
	pub max_bytes: u64,
	/// Cell width.
	pub format: CellFormat,
	/// Byte order.
	pub endian: Endian,
	/// Cells per row.
	pub columns: usize,
	/// Bound debug session.
	pub session_id: Option<SessionId>,
	/// Name of the bound debug session.
	pub session_name: String,
	/// Workspace folder of the bound debug session.
	pub workspace_folder: Option<String>,
	/// Disallow local edits.
	pub is_readonly: bool,
}

impl DocumentProps {
	/// Props for a window of `max_bytes` at `start_address` described by `expr`.
	pub fn new(expr: impl Into<String>, start_address: Address, max_bytes: u64) -> Self {
		Self {
			expr: expr.into(),
			size_expr: String::new(),
			display_name: None,
			start_address,
			max_bytes,
			format: CellFormat::Byte,
			endian: Endian::Little,
			columns: 16,
			session_id: None,
			session_name: String::new(),
			workspace_folder: None,
			is_readonly: false,
		}
	}
}

#[derive(Debug)]
struct DocState {
	session_id: Option<SessionId>,
	session_name: String,
	workspace_folder: Option<String>,
	display_name: String,
	expr: String,
	size_expr: String,
	start_address: Address,
	max_bytes: u64,
	endian: Endian,
	layout: RowLayout,
	modified: BTreeMap<Address, u8>,
	is_readonly: bool,
	is_ready: bool,
	session_status: SessionStatus,
	start_address_stale: bool,
	max_bytes_stale: bool,
	client_state: ClientState,
}

impl DocState {
	fn base(&self) -> Address {
		self.start_address
	}

	fn max(&self) -> Address {
		self.start_address.saturating_add(self.max_bytes)
	}
}

/// One memory view.
pub struct Document {
	id: DocId,
	role: Role,
	memory: Arc<dyn MemoryInterface>,
	pages: PageStore,
	events: EventBus,
	state: RwLock<DocState>,
}

impl std::fmt::Debug for Document {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Document")
			.field("id", &self.id)
			.field("role", &self.role)
			.field("state", &*self.state.read())
			.field("pages", &self.pages)
			.finish_non_exhaustive()
	}
}

impl Document {
	/// Creates a document with no fetched pages.
	pub fn new(id: DocId, role: Role, props: DocumentProps, memory: Arc<dyn MemoryInterface>, events: EventBus) -> Self {
		let layout = RowLayout::new(props.format, props.columns);
		let base = props.start_address;
		let max = base.saturating_add(props.max_bytes);
		let pages = PageStore::new(id.clone(), Arc::clone(&memory), role.keeps_history(), base, max, layout.page_size);
		Self {
			id,
			role,
			memory,
			pages,
			events,
			state: RwLock::new(DocState {
				session_id: props.session_id,
				session_name: props.session_name,
				workspace_folder: props.workspace_folder,
				display_name: props.display_name.unwrap_or_else(|| props.expr.clone()),
				expr: props.expr,
				size_expr: props.size_expr,
				start_address: base,
				max_bytes: props.max_bytes,
				endian: props.endian,
				layout,
				modified: BTreeMap::new(),
				is_readonly: props.is_readonly,
				is_ready: false,
				session_status: SessionStatus::Default,
				start_address_stale: true,
				max_bytes_stale: true,
				client_state: ClientState::new(),
			}),
		}
	}

	/// Rebuilds a document from its serialized form.
	pub fn restore_serializable(
		doc: SerializedDocument,
		role: Role,
		memory: Arc<dyn MemoryInterface>,
		events: EventBus,
	) -> Self {
		let mut props = DocumentProps::new(doc.expr, doc.start_address, doc.max_bytes);
		props.size_expr = doc.size_expr;
		props.display_name = Some(doc.display_name).filter(|name| !name.is_empty());
		props.format = doc.format;
		props.endian = doc.endian;
		props.columns = doc.columns;
		props.session_id = doc.session_id;
		props.session_name = doc.session_name;
		props.workspace_folder = doc.workspace_folder;
		props.is_readonly = doc.is_readonly;

		let this = Self::new(doc.doc_id, role, props, memory, events);
		{
			let mut state = this.state.write();
			state.modified = doc.modified;
			state.is_ready = doc.is_ready;
			state.session_status = doc.session_status;
			state.start_address_stale = doc.start_address_stale;
			state.max_bytes_stale = doc.max_bytes_stale;
			state.client_state = doc.client_state;
		}
		this.pages.set_ready(doc.is_ready);
		if let Some(pages) = doc.pages {
			this.pages.restore_serialized(pages);
		}
		this
	}

	/// Returns the plain-value form, with cached pages if `include_pages`.
	pub fn get_serializable(&self, include_pages: bool) -> SerializedDocument {
		let state = self.state.read();
		SerializedDocument {
			doc_id: self.id.clone(),
			session_id: state.session_id.clone(),
			session_name: state.session_name.clone(),
			workspace_folder: state.workspace_folder.clone(),
			display_name: state.display_name.clone(),
			expr: state.expr.clone(),
			size_expr: state.size_expr.clone(),
			start_address: state.start_address,
			max_bytes: state.max_bytes,
			format: state.layout.format,
			endian: state.endian,
			columns: state.layout.columns,
			modified: state.modified.clone(),
			is_readonly: state.is_readonly,
			is_ready: state.is_ready,
			session_status: state.session_status,
			start_address_stale: state.start_address_stale,
			max_bytes_stale: state.max_bytes_stale,
			client_state: state.client_state.clone(),
			pages: include_pages.then(|| self.pages.to_serialized()),
		}
	}

	/// Returns the document identifier.
	pub fn id(&self) -> &DocId {
		&self.id
	}

	/// Returns which half this document lives in.
	pub fn role(&self) -> Role {
		self.role
	}

	/// Returns the page cache.
	pub fn pages(&self) -> &PageStore {
		&self.pages
	}

	/// First address of the window.
	pub fn base_address(&self) -> Address {
		self.state.read().base()
	}

	/// End of the window (exclusive).
	pub fn max_address(&self) -> Address {
		self.state.read().max()
	}

	/// Current row/page geometry.
	pub fn layout(&self) -> RowLayout {
		self.state.read().layout
	}

	/// Byte order for multi-byte cells.
	pub fn endian(&self) -> Endian {
		self.state.read().endian
	}

	/// Start address expression.
	pub fn expr(&self) -> String {
		self.state.read().expr.clone()
	}

	/// Title shown by the UI.
	pub fn display_name(&self) -> String {
		self.state.read().display_name.clone()
	}

	/// Bound debug session.
	pub fn session_id(&self) -> Option<SessionId> {
		self.state.read().session_id.clone()
	}

	/// Name of the bound debug session.
	pub fn session_name(&self) -> String {
		self.state.read().session_name.clone()
	}

	/// Workspace folder of the bound debug session.
	pub fn workspace_folder(&self) -> Option<String> {
		self.state.read().workspace_folder.clone()
	}

	/// Last known session status.
	pub fn session_status(&self) -> SessionStatus {
		self.state.read().session_status
	}

	/// Whether the session has stopped at least once since binding.
	pub fn is_ready(&self) -> bool {
		self.state.read().is_ready
	}

	/// Whether local edits are disallowed.
	pub fn is_readonly(&self) -> bool {
		self.state.read().is_readonly
	}

	/// Returns true if `addr` lies inside the window.
	pub fn in_range(&self, addr: Address) -> bool {
		let state = self.state.read();
		addr >= state.base() && addr < state.max()
	}

	/// Returns the UI-local state blob.
	pub fn client_state(&self) -> ClientState {
		self.state.read().client_state.clone()
	}

	/// Replaces the UI-local state blob.
	pub fn set_client_state(&self, client_state: ClientState) {
		self.state.write().client_state = client_state;
	}

	/// Returns the start address, re-evaluating its expression first if it is
	/// stale and the session is stopped.
	///
	/// A failed evaluation keeps the cached address; the stale flag is cleared
	/// either way so a bad expression is not retried on every read.
	pub async fn get_start_address(&self) -> Address {
		let (stale, status, expr, current) = {
			let state = self.state.read();
			(state.start_address_stale, state.session_status, state.expr.clone(), state.start_address)
		};
		if !stale || !status.is_stopped() {
			return current;
		}

		let result = self
			.memory
			.get_start_address(&self.id, &expr, &current.to_string())
			.await
			.and_then(|text| parse_address(&expr, &text));
		match result {
			Ok(addr) if addr != current => {
				info!(doc_id = %self.id, %expr, from = %current, to = %addr, "start address moved");
				self.set_addresses(Some(addr), None);
				self.events.post(DocEvent::BaseAddress {
					doc_id: self.id.clone(),
					base: addr,
				});
			}
			Ok(_) => {}
			Err(err) => warn!(doc_id = %self.id, error = %err, "start address evaluation failed"),
		}
		self.state.write().start_address_stale = false;
		self.base_address()
	}

	/// Returns the window size, re-evaluating its expression first if it is
	/// stale and the session is stopped.
	pub async fn get_max_bytes(&self) -> u64 {
		let (stale, status, size_expr, current) = {
			let state = self.state.read();
			(state.max_bytes_stale, state.session_status, state.size_expr.clone(), state.max_bytes)
		};
		if !stale || !status.is_stopped() {
			return current;
		}
		if size_expr.trim().is_empty() {
			self.state.write().max_bytes_stale = false;
			return current;
		}

		let result = self
			.memory
			.get_start_address(&self.id, &size_expr, &current.to_string())
			.await
			.and_then(|text| parse_address(&size_expr, &text));
		match result {
			Ok(size) if size.get() != current => {
				info!(doc_id = %self.id, %size_expr, from = current, to = size.get(), "window size changed");
				self.set_addresses(None, Some(size.get()));
			}
			Ok(_) => {}
			Err(err) => warn!(doc_id = %self.id, error = %err, "size evaluation failed"),
		}
		self.state.write().max_bytes_stale = false;
		self.state.read().max_bytes
	}

	/// Moves the window.
	///
	/// A new base address shifts every page boundary, so the cache is rebuilt;
	/// a size-only change keeps the pages but marks them stale.
	pub fn set_addresses(&self, start: Option<Address>, max_bytes: Option<u64>) {
		let (base_moved, base, max, page_size) = {
			let mut state = self.state.write();
			let old_base = state.start_address;
			if let Some(start) = start {
				state.start_address = start;
			}
			if let Some(max_bytes) = max_bytes {
				state.max_bytes = max_bytes;
			}
			(old_base != state.start_address, state.base(), state.max(), state.layout.page_size)
		};
		if base_moved {
			self.pages.reset(base, max, page_size);
		} else {
			self.pages.set_max(max);
		}
	}

	/// Reads the page of `count` bytes at `addr`, from the cache if it is
	/// fresh. Returns an empty buffer when nothing could be read.
	pub async fn get_memory_page(&self, addr: Address, count: usize) -> Vec<u8> {
		self.pages.load_page(addr, count).await
	}

	/// Returns the rendered view of the byte at `addr`, fetching its page if
	/// needed.
	pub async fn get_current_doc_byte(&self, addr: Address) -> DocByte {
		if !self.in_range(addr) {
			return DocByte::OUT_OF_RANGE;
		}
		let pair = self.pages.get_value(addr).resolve().await;
		self.compose(addr, pair)
	}

	/// Returns the row containing `addr`, fetching its page if needed.
	pub async fn get_current_doc_row(&self, addr: Address) -> Vec<DocByte> {
		if !self.in_range(addr) {
			return vec![DocByte::OUT_OF_RANGE; self.layout().bytes_per_row];
		}
		let _ = self.pages.get_value(addr).resolve().await;
		self.get_current_doc_row_sync(addr)
	}

	/// Returns the row containing `addr` from whatever is cached.
	pub fn get_current_doc_row_sync(&self, addr: Address) -> Vec<DocByte> {
		let bytes_per_row = self.layout().bytes_per_row;
		let row = self.pages.get_row_sync(addr, bytes_per_row);
		let Some(offset) = addr.offset_from(self.base_address()) else {
			return vec![DocByte::OUT_OF_RANGE; bytes_per_row];
		};
		let row_start = Address(addr.get() - offset % bytes_per_row as u64);
		row.into_iter()
			.enumerate()
			.map(|(i, pair)| {
				let a = row_start.saturating_add(i as u64);
				if self.in_range(a) {
					self.compose(a, pair)
				} else {
					DocByte::OUT_OF_RANGE
				}
			})
			.collect()
	}

	/// Renders the row containing `addr` as `address: cells`, fetching its
	/// page if needed. Unavailable bytes render as dashes.
	pub async fn format_row(&self, addr: Address) -> String {
		let row = self.get_current_doc_row(addr).await;
		let (layout, endian, base) = {
			let state = self.state.read();
			(state.layout, state.endian, state.base())
		};
		let offset = addr.offset_from(base).unwrap_or(0);
		let row_start = Address(addr.get() - offset % layout.bytes_per_row as u64);
		let cells: Vec<String> = row
			.chunks(layout.format.bytes())
			.map(|cell| {
				let bytes: Vec<Option<u8>> = cell.iter().map(|b| b.cur).collect();
				let text = render_cell(&bytes, endian);
				if cell.iter().any(DocByte::is_modified) {
					format!("{text}*")
				} else if cell.iter().any(|b| b.changed) {
					format!("{text}!")
				} else {
					format!("{text} ")
				}
			})
			.collect();
		format!("{row_start:#018x}: {}", cells.join(" ").trim_end())
	}

	fn compose(&self, addr: Address, pair: BytePair) -> DocByte {
		let edited = self.state.read().modified.get(&addr).copied();
		DocByte {
			cur: edited.or(pair.current),
			orig: pair.current,
			stale: self.pages.is_stale(addr),
			changed: pair.current != pair.previous,
			in_range: true,
		}
	}

	/// Records a local edit of the byte at `addr`.
	///
	/// Setting a byte back to its fetched value removes the edit. Returns the
	/// effective value before the edit; a result equal to `value` means nothing
	/// changed and the peer half need not be told.
	pub fn set_byte_local(&self, addr: Address, value: u8) -> Option<u8> {
		let fetched = self.pages.get_value_sync(addr);
		let mut state = self.state.write();
		let old = state.modified.get(&addr).copied().or(fetched);
		if fetched == Some(value) {
			state.modified.remove(&addr);
		} else {
			state.modified.insert(addr, value);
		}
		old
	}

	/// Returns true if the document carries local edits.
	pub fn is_modified(&self) -> bool {
		!self.state.read().modified.is_empty()
	}

	/// Returns the addresses of every local edit, ascending.
	pub fn modified_addresses(&self) -> Vec<Address> {
		self.state.read().modified.keys().copied().collect()
	}

	/// Drops every local edit.
	pub fn revert_edits(&self) {
		self.state.write().modified.clear();
	}

	/// Writes local edits to the target, one contiguous run at a time.
	///
	/// Committed bytes are copied into already-fetched pages and leave the
	/// overlay. Stops at the first failing run, keeping it and every later
	/// edit. Returns the number of bytes committed.
	pub async fn commit_edits(&self) -> Result<usize, MemoryError> {
		let edits: Vec<(Address, u8)> = self.state.read().modified.iter().map(|(a, v)| (*a, *v)).collect();
		let mut committed = 0;
		for (start, bytes) in contiguous_runs(&edits) {
			let accepted = self.memory.set_memory(&self.id, start, &bytes).await?;
			if !accepted {
				return Err(MemoryError::Rejected { addr: start, len: bytes.len() });
			}
			let mut state = self.state.write();
			for (i, value) in bytes.iter().enumerate() {
				let addr = start.saturating_add(i as u64);
				self.pages.set_value(addr, *value);
				if state.modified.get(&addr) == Some(value) {
					state.modified.remove(&addr);
				}
			}
			committed += bytes.len();
		}
		debug!(doc_id = %self.id, committed, "edits committed");
		Ok(committed)
	}

	/// Applies a settings change.
	///
	/// A changed address or size expression marks the document stale. Layout
	/// fields are always recomputed; if the page size changes the cache is
	/// rebuilt. Callers must re-render rows from scratch afterwards.
	pub fn update_settings(&self, settings: DocumentSettings) {
		let (expr_changed, relayout) = {
			let mut state = self.state.write();
			let mut expr_changed = false;
			if let Some(expr) = settings.expr
				&& expr != state.expr
			{
				state.expr = expr;
				expr_changed = true;
			}
			if let Some(size_expr) = settings.size_expr
				&& size_expr != state.size_expr
			{
				state.size_expr = size_expr;
				expr_changed = true;
			}
			if let Some(endian) = settings.endian {
				state.endian = endian;
			}
			if let Some(name) = settings.display_name {
				state.display_name = name;
			}
			if let Some(readonly) = settings.is_readonly {
				state.is_readonly = readonly;
			}
			let format = settings.format.unwrap_or(state.layout.format);
			let columns = settings.columns.unwrap_or(state.layout.columns);
			let layout = RowLayout::new(format, columns);
			let relayout = (layout.page_size != state.layout.page_size).then_some((state.base(), state.max(), layout.page_size));
			state.layout = layout;
			if expr_changed {
				state.start_address_stale = true;
				state.max_bytes_stale = true;
			}
			(expr_changed, relayout)
		};
		if let Some((base, max, page_size)) = relayout {
			self.pages.reset(base, max, page_size);
		}
		if expr_changed {
			self.pages.mark_all_stale();
		}
		debug!(doc_id = %self.id, expr_changed, relayout = relayout.is_some(), "settings updated");
	}

	/// Marks the window and every page as needing re-evaluation.
	pub fn mark_as_stale(&self) {
		{
			let mut state = self.state.write();
			state.start_address_stale = true;
			state.max_bytes_stale = true;
		}
		self.pages.mark_all_stale();
	}

	/// Records a new session status.
	///
	/// Entering `Stopped` makes the document ready and stale. Returning to
	/// `Default` (session ended) drops change history. Emits a status event if
	/// the status actually changed.
	pub fn set_session_status(&self, status: SessionStatus) {
		let (old, session_id) = {
			let mut state = self.state.write();
			let old = state.session_status;
			state.session_status = status;
			if old != status {
				state.start_address_stale = true;
				state.max_bytes_stale = true;
			}
			if status == SessionStatus::Stopped {
				state.is_ready = true;
			}
			(old, state.session_id.clone())
		};
		match status {
			SessionStatus::Stopped => {
				self.pages.set_ready(true);
				self.mark_as_stale();
			}
			SessionStatus::Default => self.pages.delete_history(),
			SessionStatus::Busy => {}
		}
		if old != status {
			debug!(doc_id = %self.id, ?old, new = ?status, "session status changed");
			self.events.post(DocEvent::DebuggerStatus {
				doc_id: self.id.clone(),
				session_id,
				status,
			});
		}
	}

	/// Binds the document to another debug session.
	pub fn bind_session(&self, session_id: SessionId, session_name: String, workspace_folder: Option<String>) {
		let mut state = self.state.write();
		state.session_id = Some(session_id);
		state.session_name = session_name;
		state.workspace_folder = workspace_folder;
	}
}

fn parse_address(expr: &str, text: &str) -> Result<Address, MemoryError> {
	text.parse::<Address>().map_err(|err| MemoryError::Unresolved {
		expr: expr.to_string(),
		reason: err.to_string(),
	})
}

/// Groups ascending `(addr, value)` edits into runs of adjacent addresses.
fn contiguous_runs(edits: &[(Address, u8)]) -> Vec<(Address, Vec<u8>)> {
	let mut runs: Vec<(Address, Vec<u8>)> = Vec::new();
	for (addr, value) in edits {
		match runs.last_mut() {
			Some((start, bytes)) if start.checked_add(bytes.len() as u64) == Some(*addr) => bytes.push(*value),
			_ => runs.push((*addr, vec![*value])),
		}
	}
	runs
}

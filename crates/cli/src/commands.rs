//! Subcommand implementations.
//!
//! Every subcommand loads its image into a [`BufferMemory`] and reads it
//! through a document, so output goes through the same page cache, edit
//! overlay and change tracking a debugger view uses.

use std::collections::BTreeSet;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, bail};
use memview_config::Config;
use memview_doc::{BufferMemory, Document, DocumentProps, DocumentRegistry, MemoryInterface, PersistedState, Role};
use memview_primitives::{Address, SessionId};
use memview_proto::DocumentSettings;
use tracing::{debug, info};

use crate::cli::{Command, ViewArgs};

/// Session name every image document is bound to, so documents saved by one
/// run are re-adopted by the next.
const SESSION_NAME: &str = "memview";

/// Runs one subcommand, writing its report to `out`.
pub async fn run(command: Command, config: &Config, state: Option<&Path>, out: &mut impl Write) -> anyhow::Result<()> {
	match command {
		Command::Dump { image, view } => {
			let opened = Opened::load(&image, &view, config, state)?;
			opened.dump(out).await?;
			opened.save(state)
		}
		Command::Poke {
			image,
			addr,
			bytes,
			commit,
			view,
		} => {
			let opened = Opened::load(&image, &view, config, state)?;
			opened.poke(addr, &bytes, out).await?;
			if commit {
				opened.commit(&image, out).await?;
			}
			opened.save(state)
		}
		Command::Diff { before, after, view } => diff(&before, &after, &view, config, out).await,
	}
}

fn read_image(path: &Path) -> anyhow::Result<Vec<u8>> {
	std::fs::read(path).with_context(|| format!("failed to read image {}", path.display()))
}

fn props_for(image: &Path, view: &ViewArgs, config: &Config, len: u64) -> DocumentProps {
	let mut props = DocumentProps::new(view.base.to_string(), view.base, view.len.unwrap_or(len));
	props.display_name = Some(image.display().to_string());
	props.format = view.format.unwrap_or(config.view.format);
	props.columns = view.columns.unwrap_or(config.view.columns);
	props.endian = view.endian.unwrap_or(config.view.endian);
	props.session_name = SESSION_NAME.to_string();
	props.workspace_folder = Some(image.display().to_string());
	props
}

fn fresh_session() -> SessionId {
	SessionId(format!("{SESSION_NAME}-{}", std::process::id()))
}

/// Prints every row of `doc`'s window.
async fn print_rows(doc: &Document, out: &mut impl Write) -> anyhow::Result<()> {
	let step = doc.layout().bytes_per_row as u64;
	let mut addr = doc.base_address();
	while addr < doc.max_address() {
		writeln!(out, "{}", doc.format_row(addr).await)?;
		addr = addr.saturating_add(step);
	}
	Ok(())
}

/// An image opened as a host document.
struct Opened {
	memory: Arc<BufferMemory>,
	registry: DocumentRegistry,
	doc: Arc<Document>,
}

impl Opened {
	/// Loads `image`, restoring saved documents from `state` and reusing the
	/// one that already views this image at this base.
	fn load(image: &Path, view: &ViewArgs, config: &Config, state: Option<&Path>) -> anyhow::Result<Self> {
		let bytes = read_image(image)?;
		let len = bytes.len() as u64;
		let memory = Arc::new(BufferMemory::new(view.base, bytes));
		let shared: Arc<dyn MemoryInterface> = memory.clone();
		let registry = DocumentRegistry::init(Role::Host, shared);

		if let Some(path) = state {
			let saved = PersistedState::load_from_path(path)
				.with_context(|| format!("failed to load state from {}", path.display()))?;
			registry.restore_serializable_all(saved);
		}

		let props = props_for(image, view, config, len);
		let doc = match registry.find_document_if_exists(&props) {
			Some(doc) => {
				debug!(doc_id = %doc.id(), "reusing saved document");
				doc.update_settings(DocumentSettings {
					format: Some(props.format),
					columns: Some(props.columns),
					endian: Some(props.endian),
					..DocumentSettings::default()
				});
				doc.set_addresses(None, Some(props.max_bytes));
				registry.set_current_doc(doc.id());
				doc
			}
			None => registry.create_document(props),
		};

		let session = fresh_session();
		registry.session_started(session.clone(), SESSION_NAME, doc.workspace_folder().as_deref());
		registry.session_stopped(&session);
		Ok(Self { memory, registry, doc })
	}

	async fn dump(&self, out: &mut impl Write) -> anyhow::Result<()> {
		let base = self.doc.get_start_address().await;
		info!(doc_id = %self.doc.id(), %base, max = %self.doc.max_address(), "dumping");
		print_rows(&self.doc, out).await
	}

	/// Records edits in the overlay and prints every touched row.
	async fn poke(&self, addr: Address, bytes: &[u8], out: &mut impl Write) -> anyhow::Result<()> {
		if self.doc.is_readonly() {
			bail!("document {} is read-only", self.doc.display_name());
		}
		let bytes_per_row = self.doc.layout().bytes_per_row as u64;
		let base = self.doc.get_start_address().await;
		let mut rows = BTreeSet::new();
		for (i, value) in bytes.iter().enumerate() {
			let target = addr.saturating_add(i as u64);
			if !self.doc.in_range(target) {
				bail!("address {target} is outside {}..{}", base, self.doc.max_address());
			}
			// Fetch first so writing the current value back is not an edit.
			self.doc.get_current_doc_byte(target).await;
			self.doc.set_byte_local(target, *value);
			let offset = target.offset_from(base).unwrap_or(0);
			rows.insert(target.get() - offset % bytes_per_row);
		}
		for row in rows {
			writeln!(out, "{}", self.doc.format_row(Address(row)).await)?;
		}
		Ok(())
	}

	/// Writes overlay edits to the image file.
	async fn commit(&self, image: &Path, out: &mut impl Write) -> anyhow::Result<()> {
		let committed = self.doc.commit_edits().await.context("failed to commit edits")?;
		std::fs::write(image, self.memory.bytes())
			.with_context(|| format!("failed to write image {}", image.display()))?;
		writeln!(out, "committed {committed} bytes")?;
		Ok(())
	}

	fn save(&self, state: Option<&Path>) -> anyhow::Result<()> {
		let Some(path) = state else {
			return Ok(());
		};
		self.registry
			.store_serializable_all(false)
			.save_to_path(path)
			.with_context(|| format!("failed to save state to {}", path.display()))
	}
}

/// Loads `before`, reads every row, then swaps in `after` across a simulated
/// resume and stop and prints the rows whose bytes changed.
async fn diff(
	before: &Path,
	after: &Path,
	view: &ViewArgs,
	config: &Config,
	out: &mut impl Write,
) -> anyhow::Result<()> {
	let old = read_image(before)?;
	let new = read_image(after)?;
	let len = old.len().max(new.len()) as u64;

	let memory = Arc::new(BufferMemory::new(view.base, old));
	let shared: Arc<dyn MemoryInterface> = memory.clone();
	// Only the UI half keeps the previous snapshot needed for highlighting.
	let registry = DocumentRegistry::init(Role::Ui, shared);
	let mut props = props_for(before, view, config, len);
	props.is_readonly = true;
	let doc = registry.create_document(props);

	let session = fresh_session();
	registry.session_started(session.clone(), SESSION_NAME, doc.workspace_folder().as_deref());
	registry.session_stopped(&session);

	let step = doc.layout().bytes_per_row as u64;
	let window = doc.max_address().get() - doc.base_address().get();
	let rows: Vec<Address> = (0..window.div_ceil(step))
		.map(|i| doc.base_address().saturating_add(i * step))
		.collect();
	for row in &rows {
		doc.get_current_doc_row(*row).await;
	}

	memory.replace_bytes(new);
	registry.session_continued(&session);
	registry.session_stopped(&session);

	let mut changed = 0;
	for row in &rows {
		let bytes = doc.get_current_doc_row(*row).await;
		let count = bytes.iter().filter(|b| b.changed).count();
		if count > 0 {
			changed += count;
			writeln!(out, "{}", doc.format_row(*row).await)?;
		}
	}
	writeln!(out, "{changed} bytes changed")?;
	Ok(())
}

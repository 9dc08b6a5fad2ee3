//! Set of open documents for one half of a memory view.

use std::collections::HashSet;
use std::sync::Arc;

use indexmap::IndexMap;
use memview_primitives::{DocId, SessionEvent, SessionId, SessionStatus};
use memview_proto::DocumentSummary;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::document::{Document, DocumentProps};
use crate::events::{DocEvent, EventBus};
use crate::persist::PersistedState;
use crate::{MemoryInterface, Role};

#[derive(Debug, Default)]
struct RegistryState {
	docs: IndexMap<DocId, Arc<Document>>,
	current: Option<DocId>,
	/// Previously current documents, most recent last. May hold ids of
	/// documents removed since; those are skipped when popped.
	current_stack: Vec<DocId>,
	live_sessions: HashSet<SessionId>,
}

impl RegistryState {
	/// Picks the next current document after `removed` went away.
	fn fallback(&mut self, removed: &DocId) -> Option<DocId> {
		while let Some(id) = self.current_stack.pop() {
			if &id != removed && self.docs.contains_key(&id) {
				return Some(id);
			}
		}
		self.docs.keys().next().cloned()
	}
}

/// Every open document of one half, plus the current-document selection.
///
/// Documents share the registry's [`EventBus`] so a single subscription
/// observes all of them.
pub struct DocumentRegistry {
	role: Role,
	memory: Arc<dyn MemoryInterface>,
	events: EventBus,
	state: Mutex<RegistryState>,
}

impl std::fmt::Debug for DocumentRegistry {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let state = self.state.lock();
		f.debug_struct("DocumentRegistry")
			.field("role", &self.role)
			.field("docs", &state.docs.len())
			.field("current", &state.current)
			.finish_non_exhaustive()
	}
}

impl DocumentRegistry {
	/// Creates an empty registry reading memory through `memory`.
	pub fn init(role: Role, memory: Arc<dyn MemoryInterface>) -> Self {
		Self::with_events(role, memory, EventBus::new())
	}

	/// Creates an empty registry posting to an existing bus.
	pub fn with_events(role: Role, memory: Arc<dyn MemoryInterface>, events: EventBus) -> Self {
		debug!(?role, "document registry initialized");
		Self {
			role,
			memory,
			events,
			state: Mutex::new(RegistryState::default()),
		}
	}

	/// Drops every document and queued event.
	pub fn teardown(&self) {
		let dropped = {
			let mut state = self.state.lock();
			let dropped = state.docs.len();
			*state = RegistryState::default();
			dropped
		};
		self.events.clear();
		debug!(role = ?self.role, dropped, "document registry torn down");
	}

	/// Which half this registry serves.
	pub fn role(&self) -> Role {
		self.role
	}

	/// Bus shared by the registry and its documents.
	pub fn events(&self) -> &EventBus {
		&self.events
	}

	/// Memory capability handed to new documents.
	pub fn memory(&self) -> &Arc<dyn MemoryInterface> {
		&self.memory
	}

	/// Creates a document with a fresh id and makes it current.
	pub fn create_document(&self, props: DocumentProps) -> Arc<Document> {
		let doc = Arc::new(Document::new(
			DocId::generate(),
			self.role,
			props,
			Arc::clone(&self.memory),
			self.events.clone(),
		));
		info!(doc_id = %doc.id(), expr = %doc.expr(), base = %doc.base_address(), "document created");
		self.add_document(Arc::clone(&doc));
		self.set_current_doc(doc.id());
		doc
	}

	/// Builds a document from its serialized form, wired to this registry.
	pub fn restore_document(&self, doc: memview_proto::SerializedDocument) -> Arc<Document> {
		Arc::new(Document::restore_serializable(
			doc,
			self.role,
			Arc::clone(&self.memory),
			self.events.clone(),
		))
	}

	/// Adds a document, replacing any with the same id.
	pub fn add_document(&self, doc: Arc<Document>) {
		let mut state = self.state.lock();
		if state.docs.insert(doc.id().clone(), doc).is_some() {
			warn!("document replaced by one with the same id");
		}
	}

	/// Removes a document. If it was current, the most recent still-open
	/// previous current document takes over, else any remaining document.
	pub fn remove_document(&self, id: &DocId) -> Option<Arc<Document>> {
		let (removed, new_current) = {
			let mut state = self.state.lock();
			let removed = state.docs.shift_remove(id)?;
			let new_current = if state.current.as_ref() == Some(id) {
				let next = state.fallback(id);
				state.current = next.clone();
				Some(next)
			} else {
				None
			};
			(removed, new_current)
		};
		debug!(doc_id = %id, "document removed");
		if let Some(doc_id) = new_current {
			self.events.post(DocEvent::CurrentDoc { doc_id });
		}
		Some(removed)
	}

	/// Makes `id` current. Returns false and changes nothing if `id` is
	/// unknown or already current.
	pub fn set_current_doc(&self, id: &DocId) -> bool {
		{
			let mut state = self.state.lock();
			if !state.docs.contains_key(id) {
				warn!(doc_id = %id, "cannot select unknown document");
				return false;
			}
			if state.current.as_ref() == Some(id) {
				return false;
			}
			if let Some(prior) = state.current.replace(id.clone()) {
				state.current_stack.retain(|entry| entry != &prior && entry != id);
				state.current_stack.push(prior);
			}
		}
		self.events.post(DocEvent::CurrentDoc {
			doc_id: Some(id.clone()),
		});
		true
	}

	/// Returns the current document.
	pub fn current_doc(&self) -> Option<Arc<Document>> {
		let state = self.state.lock();
		state.current.as_ref().and_then(|id| state.docs.get(id)).cloned()
	}

	/// Returns the current document's id.
	pub fn current_doc_id(&self) -> Option<DocId> {
		self.state.lock().current.clone()
	}

	/// Looks a document up by id.
	pub fn get_document_by_id(&self, id: &DocId) -> Option<Arc<Document>> {
		self.state.lock().docs.get(id).cloned()
	}

	/// Returns every document in insertion order.
	pub fn documents(&self) -> Vec<Arc<Document>> {
		self.state.lock().docs.values().cloned().collect()
	}

	/// Returns the number of open documents.
	pub fn len(&self) -> usize {
		self.state.lock().docs.len()
	}

	/// Returns true if no document is open.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Summaries for a document picker.
	pub fn basic_documents_list(&self) -> Vec<DocumentSummary> {
		let (docs, current) = {
			let state = self.state.lock();
			(state.docs.values().cloned().collect::<Vec<_>>(), state.current.clone())
		};
		docs.iter()
			.map(|doc| DocumentSummary {
				doc_id: doc.id().clone(),
				display_name: doc.display_name(),
				session_name: doc.session_name(),
				is_current: current.as_ref() == Some(doc.id()),
				is_modified: doc.is_modified(),
			})
			.collect()
	}

	/// Finds an open document viewing the same expression in the same session
	/// and workspace. Only the host deduplicates views.
	pub fn find_document_if_exists(&self, props: &DocumentProps) -> Option<Arc<Document>> {
		if self.role != Role::Host {
			return None;
		}
		self.documents().into_iter().find(|doc| {
			doc.expr() == props.expr
				&& doc.session_name() == props.session_name
				&& doc.workspace_folder() == props.workspace_folder
		})
	}

	/// Serializes every document.
	pub fn store_serializable_all(&self, include_pages: bool) -> PersistedState {
		let (docs, current) = {
			let state = self.state.lock();
			(state.docs.values().cloned().collect::<Vec<_>>(), state.current.clone())
		};
		PersistedState {
			current,
			documents: docs.iter().map(|doc| doc.get_serializable(include_pages)).collect(),
			..PersistedState::default()
		}
	}

	/// Replaces every document with the persisted set.
	///
	/// A blob of another version resets the registry to empty. Returns the
	/// number of documents restored.
	pub fn restore_serializable_all(&self, persisted: PersistedState) -> usize {
		let docs: Vec<Arc<Document>> = if persisted.is_current() {
			persisted.documents.into_iter().map(|doc| self.restore_document(doc)).collect()
		} else {
			warn!(
				found = persisted.version,
				expected = crate::CURRENT_VERSION,
				"persisted state version mismatch, starting empty"
			);
			Vec::new()
		};

		let current = {
			let mut state = self.state.lock();
			*state = RegistryState::default();
			for doc in docs {
				state.docs.insert(doc.id().clone(), doc);
			}
			let current = persisted
				.current
				.filter(|id| state.docs.contains_key(id))
				.or_else(|| state.docs.keys().next().cloned());
			state.current = current.clone();
			current
		};
		let restored = self.len();
		info!(restored, "documents restored");
		self.events.post(DocEvent::CurrentDoc { doc_id: current });
		restored
	}

	/// Documents bound to `session`.
	fn bound_to(&self, session: &SessionId) -> Vec<Arc<Document>> {
		self.documents()
			.into_iter()
			.filter(|doc| doc.session_id().as_ref() == Some(session))
			.collect()
	}

	fn apply_event(&self, session: &SessionId, event: SessionEvent) -> Vec<DocId> {
		self.bound_to(session)
			.into_iter()
			.map(|doc| {
				doc.set_session_status(doc.session_status().transition(event));
				doc.id().clone()
			})
			.collect()
	}

	/// A debug session started or was discovered.
	///
	/// Documents bound to it become busy. Documents whose session is gone and
	/// whose session name and workspace match are re-bound to it, so views
	/// survive debugger restarts. Returns every affected document.
	pub fn session_started(&self, id: SessionId, name: &str, workspace_folder: Option<&str>) -> Vec<DocId> {
		let live = {
			let mut state = self.state.lock();
			state.live_sessions.insert(id.clone());
			state.live_sessions.clone()
		};

		for doc in self.documents() {
			let orphaned = doc.session_id().is_none_or(|bound| !live.contains(&bound));
			if orphaned && doc.session_name() == name && doc.workspace_folder().as_deref() == workspace_folder {
				info!(doc_id = %doc.id(), session_id = %id, session_name = name, "re-adopting orphaned document");
				doc.bind_session(id.clone(), name.to_string(), workspace_folder.map(str::to_string));
			}
		}
		self.apply_event(&id, SessionEvent::Started)
	}

	/// The debugger reported a stop in `id`.
	pub fn session_stopped(&self, id: &SessionId) -> Vec<DocId> {
		self.apply_event(id, SessionEvent::Stopped)
	}

	/// The debugger resumed `id`.
	pub fn session_continued(&self, id: &SessionId) -> Vec<DocId> {
		self.apply_event(id, SessionEvent::Continued)
	}

	/// `id` ended. Its documents stay open as orphans until a matching session
	/// starts.
	pub fn session_terminated(&self, id: &SessionId) -> Vec<DocId> {
		self.state.lock().live_sessions.remove(id);
		self.apply_event(id, SessionEvent::Terminated)
	}

	/// Applies a session status reported by the peer half to every document
	/// bound to `session`.
	pub fn apply_session_notice(&self, session: &SessionId, status: SessionStatus) -> Vec<DocId> {
		self.bound_to(session)
			.into_iter()
			.map(|doc| {
				doc.set_session_status(status);
				doc.id().clone()
			})
			.collect()
	}
}

//! Versioned blob holding every open document.

use std::path::Path;

use memview_primitives::DocId;
use memview_proto::SerializedDocument;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::PersistError;

/// Version written by this build. Blobs of any other version are discarded.
pub const CURRENT_VERSION: u32 = 1;

/// Persisted document set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedState {
	/// Layout version of the blob.
	pub version: u32,
	/// Current document when saved.
	#[serde(default)]
	pub current: Option<DocId>,
	/// Every document, in registry order.
	#[serde(default)]
	pub documents: Vec<SerializedDocument>,
}

impl Default for PersistedState {
	fn default() -> Self {
		Self {
			version: CURRENT_VERSION,
			current: None,
			documents: Vec::new(),
		}
	}
}

impl PersistedState {
	/// Returns true if the blob was written by a compatible build.
	pub fn is_current(&self) -> bool {
		self.version == CURRENT_VERSION
	}

	/// Writes the blob as JSON.
	pub fn save_to_path(&self, path: &Path) -> Result<(), PersistError> {
		let text = serde_json::to_string_pretty(self)?;
		std::fs::write(path, text).map_err(|error| PersistError::Io {
			path: path.to_path_buf(),
			error,
		})?;
		debug!(path = %path.display(), documents = self.documents.len(), "state saved");
		Ok(())
	}

	/// Reads a blob written by [`save_to_path`](Self::save_to_path).
	///
	/// A missing file yields an empty state.
	pub fn load_from_path(path: &Path) -> Result<Self, PersistError> {
		let text = match std::fs::read_to_string(path) {
			Ok(text) => text,
			Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
			Err(error) => {
				return Err(PersistError::Io {
					path: path.to_path_buf(),
					error,
				});
			}
		};
		Ok(serde_json::from_str(&text)?)
	}
}

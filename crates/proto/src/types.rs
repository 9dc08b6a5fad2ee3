//! Document data shared by both halves and by the persistence layer.

use std::collections::BTreeMap;

use memview_primitives::{Address, CellFormat, DocId, Endian, SessionId, SessionStatus};
use serde::{Deserialize, Serialize};

/// Opaque UI-local key/value state (scroll offset, selection) mirrored
/// between the halves.
pub type ClientState = serde_json::Map<String, serde_json::Value>;

/// Partial update of a document's user-facing settings.
///
/// `None` fields keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DocumentSettings {
	/// Expression producing the start address.
	pub expr: Option<String>,
	/// Expression producing the window size in bytes.
	pub size_expr: Option<String>,
	/// Cell width.
	pub format: Option<CellFormat>,
	/// Byte order for multi-byte cells.
	pub endian: Option<Endian>,
	/// Cells per row.
	pub columns: Option<usize>,
	/// Title shown by the UI.
	pub display_name: Option<String>,
	/// Disallow local edits.
	pub is_readonly: Option<bool>,
}

/// One cached page in a serialized document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedPage {
	/// Whether the page needed a refetch when serialized.
	pub stale: bool,
	/// Bytes of the page, possibly shorter than the page size at the tail.
	pub current: Vec<u8>,
}

/// Plain-value form of a document for persistence and for mirroring to the UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedDocument {
	/// Document identifier.
	pub doc_id: DocId,
	/// Bound debug session, if any.
	#[serde(default)]
	pub session_id: Option<SessionId>,
	/// Name of the bound debug session, used for re-adoption.
	#[serde(default)]
	pub session_name: String,
	/// Workspace folder of the bound debug session.
	#[serde(default)]
	pub workspace_folder: Option<String>,
	/// Title shown by the UI.
	#[serde(default)]
	pub display_name: String,
	/// Start address expression.
	pub expr: String,
	/// Size expression.
	#[serde(default)]
	pub size_expr: String,
	/// Last resolved start address.
	pub start_address: Address,
	/// Last resolved window size in bytes.
	#[serde(with = "u64_string")]
	pub max_bytes: u64,
	/// Cell width.
	#[serde(default)]
	pub format: CellFormat,
	/// Byte order.
	#[serde(default)]
	pub endian: Endian,
	/// Cells per row.
	pub columns: usize,
	/// Local edit overlay.
	#[serde(default)]
	pub modified: BTreeMap<Address, u8>,
	/// Edits disallowed.
	#[serde(default)]
	pub is_readonly: bool,
	/// Session has been stopped at least once since binding.
	#[serde(default)]
	pub is_ready: bool,
	/// Last known session status.
	#[serde(default)]
	pub session_status: SessionStatus,
	/// Start address needs re-evaluation.
	#[serde(default)]
	pub start_address_stale: bool,
	/// Window size needs re-evaluation.
	#[serde(default)]
	pub max_bytes_stale: bool,
	/// UI-local state blob.
	#[serde(default)]
	pub client_state: ClientState,
	/// Cached pages, when requested at serialization time.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub pages: Option<Vec<SerializedPage>>,
}

/// Summary row for a document picker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSummary {
	/// Document identifier.
	pub doc_id: DocId,
	/// Title shown by the UI.
	pub display_name: String,
	/// Name of the bound debug session.
	pub session_name: String,
	/// Whether this is the registry's current document.
	pub is_current: bool,
	/// Whether the document carries unsaved edits.
	pub is_modified: bool,
}

mod u64_string {
	use serde::de::Error as _;
	use serde::{Deserialize, Deserializer, Serializer};

	pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.collect_str(value)
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
		#[derive(Deserialize)]
		#[serde(untagged)]
		enum Repr {
			Text(String),
			Number(u64),
		}

		match Repr::deserialize(deserializer)? {
			Repr::Number(n) => Ok(n),
			Repr::Text(text) => text
				.parse::<memview_primitives::Address>()
				.map(memview_primitives::Address::get)
				.map_err(D::Error::custom),
		}
	}
}

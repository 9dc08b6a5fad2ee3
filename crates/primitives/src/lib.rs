//! Core value types shared by the memory view crates: addresses, document and
//! session identifiers, and the row/page geometry derived from a cell format.

/// Target addresses and their string encoding.
pub mod address;
/// Identifier types for documents and debug sessions.
pub mod ids;
/// Cell formats, endianness and derived row/page geometry.
pub mod layout;
/// Debug session run state.
pub mod session;

pub use address::{Address, ParseError};
pub use ids::{DocId, SessionId};
pub use layout::{CellFormat, Endian, MAX_COLUMNS, ROWS_PER_PAGE, RowLayout, SUB_PAGES_PER_PAGE, render_cell};
pub use session::{SessionEvent, SessionStatus};

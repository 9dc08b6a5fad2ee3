//! Row and page geometry.
//!
//! A document displays `columns` cells per row, each cell `format` bytes wide.
//! Pages are the unit of fetching and always hold [`ROWS_PER_PAGE`] rows, so
//! every row lies entirely inside one page.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::ParseError;

/// Number of rows held by a single page.
pub const ROWS_PER_PAGE: usize = 16;

/// Number of sub-pages a page is split into for incremental rendering.
pub const SUB_PAGES_PER_PAGE: usize = 8;

/// Largest column count a layout accepts.
pub const MAX_COLUMNS: usize = 256;

/// Width of one displayed cell.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum CellFormat {
	/// One byte per cell.
	#[default]
	Byte,
	/// Two bytes per cell.
	Half,
	/// Four bytes per cell.
	Word,
	/// Eight bytes per cell.
	Double,
}

impl CellFormat {
	/// Returns the cell width in bytes.
	#[must_use]
	pub const fn bytes(self) -> usize {
		match self {
			Self::Byte => 1,
			Self::Half => 2,
			Self::Word => 4,
			Self::Double => 8,
		}
	}
}

impl TryFrom<u8> for CellFormat {
	type Error = ParseError;

	fn try_from(value: u8) -> Result<Self, Self::Error> {
		match value {
			1 => Ok(Self::Byte),
			2 => Ok(Self::Half),
			4 => Ok(Self::Word),
			8 => Ok(Self::Double),
			other => Err(ParseError::InvalidFormat(u64::from(other))),
		}
	}
}

impl From<CellFormat> for u8 {
	fn from(format: CellFormat) -> Self {
		match format {
			CellFormat::Byte => 1,
			CellFormat::Half => 2,
			CellFormat::Word => 4,
			CellFormat::Double => 8,
		}
	}
}

impl std::str::FromStr for CellFormat {
	type Err = ParseError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let width: u64 = s
			.trim()
			.trim_end_matches("-byte")
			.parse()
			.map_err(|_| ParseError::InvalidFormat(0))?;
		u8::try_from(width)
			.map_err(|_| ParseError::InvalidFormat(width))
			.and_then(Self::try_from)
	}
}

/// Byte order used when a multi-byte cell is rendered as one value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endian {
	/// Least significant byte at the lowest address.
	#[default]
	Little,
	/// Most significant byte at the lowest address.
	Big,
}

impl std::str::FromStr for Endian {
	type Err = ParseError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim().to_ascii_lowercase().as_str() {
			"little" | "le" => Ok(Self::Little),
			"big" | "be" => Ok(Self::Big),
			_ => Err(ParseError::InvalidEndian(s.to_string())),
		}
	}
}

/// Geometry derived from a cell format and column count.
///
/// Always construct through [`RowLayout::new`] so the derived fields stay
/// consistent with each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowLayout {
	/// Cell width.
	pub format: CellFormat,
	/// Cells per row.
	pub columns: usize,
	/// Bytes per row (`format * columns`).
	pub bytes_per_row: usize,
	/// Bytes per page (`ROWS_PER_PAGE * bytes_per_row`).
	pub page_size: usize,
	/// Bytes per sub-page (`page_size / SUB_PAGES_PER_PAGE`).
	pub sub_page_size: usize,
}

impl RowLayout {
	/// Computes the geometry for `columns` cells of `format` width.
	///
	/// The column count is clamped to `1..=MAX_COLUMNS`; it may come from the
	/// peer half unchecked.
	#[must_use]
	pub fn new(format: CellFormat, columns: usize) -> Self {
		let columns = columns.clamp(1, MAX_COLUMNS);
		let bytes_per_row = format.bytes() * columns;
		let page_size = ROWS_PER_PAGE * bytes_per_row;
		Self {
			format,
			columns,
			bytes_per_row,
			page_size,
			sub_page_size: page_size / SUB_PAGES_PER_PAGE,
		}
	}
}

impl Default for RowLayout {
	fn default() -> Self {
		Self::new(CellFormat::Byte, 16)
	}
}

/// Renders one cell as hexadecimal text.
///
/// `bytes` are in address order; any unavailable byte renders the whole cell
/// as dashes so a missing byte is never mistaken for zero.
#[must_use]
pub fn render_cell(bytes: &[Option<u8>], endian: Endian) -> String {
	if bytes.iter().any(Option::is_none) {
		return "--".repeat(bytes.len());
	}
	let mut out = String::with_capacity(bytes.len() * 2);
	let mut push = |b: &Option<u8>| {
		if let Some(b) = b {
			let _ = write!(out, "{b:02x}");
		}
	};
	match endian {
		Endian::Little => bytes.iter().rev().for_each(&mut push),
		Endian::Big => bytes.iter().for_each(&mut push),
	}
	out
}

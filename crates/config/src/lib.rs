//! Configuration for the memview tools.
//!
//! Configuration is written in TOML. Every key is optional:
//!
//! ```toml
//! [view]
//! format = 4        # cell width in bytes: 1, 2, 4 or 8
//! columns = 8       # cells per row
//! endian = "big"
//!
//! [persist]
//! path = "/tmp/memview-state.json"
//!
//! [log]
//! level = "debug"
//! ```
//!
//! # Configuration Files
//!
//! [`Config::discover`] looks for `$XDG_CONFIG_HOME/memview/config.toml` (or
//! the platform equivalent) and falls back to defaults when it is absent.
//! Command line flags override whatever the file sets.

#![warn(missing_docs)]

pub mod error;

use std::path::{Path, PathBuf};

use memview_primitives::{CellFormat, Endian};
use serde::Deserialize;

pub use error::{ConfigError, Result};

const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Parsed configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
	/// Defaults for new documents.
	pub view: ViewConfig,
	/// Where the document set is saved between runs.
	pub persist: PersistConfig,
	/// Logging options.
	pub log: LogConfig,
}

/// Defaults for new documents.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ViewConfig {
	/// Cell width.
	pub format: CellFormat,
	/// Cells per row.
	pub columns: usize,
	/// Byte order for multi-byte cells.
	pub endian: Endian,
}

impl Default for ViewConfig {
	fn default() -> Self {
		Self {
			format: CellFormat::Byte,
			columns: 16,
			endian: Endian::Little,
		}
	}
}

/// Persistence options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PersistConfig {
	/// State file; unset disables persistence.
	pub path: Option<PathBuf>,
}

/// Logging options.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
	/// Maximum level emitted.
	pub level: String,
}

impl Default for LogConfig {
	fn default() -> Self {
		Self {
			level: "info".to_string(),
		}
	}
}

impl Config {
	/// Parse a TOML string into a [`Config`].
	pub fn parse(input: &str) -> Result<Self> {
		let config: Self = toml::from_str(input)?;
		let level = config.log.level.to_ascii_lowercase();
		if !LEVELS.contains(&level.as_str()) {
			return Err(ConfigError::InvalidLevel(config.log.level));
		}
		Ok(Self {
			log: LogConfig { level },
			..config
		})
	}

	/// Load configuration from a file.
	pub fn load(path: impl AsRef<Path>) -> Result<Self> {
		let path = path.as_ref();
		let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
			path: path.to_path_buf(),
			error: e,
		})?;
		Self::parse(&content)
	}

	/// Loads the user's configuration file, or defaults if there is none.
	pub fn discover() -> Result<Self> {
		match default_path() {
			Some(path) if path.is_file() => Self::load(path),
			_ => Ok(Self::default()),
		}
	}
}

/// Location [`Config::discover`] reads from.
pub fn default_path() -> Option<PathBuf> {
	dirs::config_dir().map(|dir| dir.join("memview").join("config.toml"))
}

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use memview_primitives::{Address, CellFormat, Endian};

#[derive(Parser, Debug)]
#[command(name = "memview")]
#[command(about = "Inspect and patch memory images through the memview document cache")]
#[command(version)]
/// Command-line arguments.
pub struct Cli {
	/// Verbose logging
	#[arg(short, long, global = true)]
	pub verbose: bool,

	/// Configuration file (defaults to the platform config directory)
	#[arg(long, value_name = "PATH", global = true)]
	pub config: Option<PathBuf>,

	/// Save and restore open documents in this file
	#[arg(long, value_name = "PATH", global = true)]
	pub state: Option<PathBuf>,

	/// Subcommand to execute.
	#[command(subcommand)]
	pub command: Command,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
	/// Print the rows of a memory image
	Dump {
		/// Image file
		image: PathBuf,
		/// Window to show.
		#[command(flatten)]
		view: ViewArgs,
	},
	/// Edit bytes of a memory image
	Poke {
		/// Image file
		image: PathBuf,
		/// Address of the first byte
		addr: Address,
		/// Bytes to write, decimal or 0x-prefixed hex
		#[arg(required = true, value_parser = parse_byte)]
		bytes: Vec<u8>,
		/// Write the edits back to the image file
		#[arg(long)]
		commit: bool,
		/// Window to show.
		#[command(flatten)]
		view: ViewArgs,
	},
	/// Show the bytes that differ between two images
	Diff {
		/// Image before the change
		before: PathBuf,
		/// Image after the change
		after: PathBuf,
		/// Window to show.
		#[command(flatten)]
		view: ViewArgs,
	},
}

/// Window and layout options shared by every subcommand.
#[derive(Args, Debug, Clone, Default)]
pub struct ViewArgs {
	/// Address the image is loaded at
	#[arg(long, default_value = "0")]
	pub base: Address,
	/// Bytes to show (defaults to the whole image)
	#[arg(long)]
	pub len: Option<u64>,
	/// Cell width in bytes: 1, 2, 4 or 8
	#[arg(long)]
	pub format: Option<CellFormat>,
	/// Cells per row
	#[arg(long)]
	pub columns: Option<usize>,
	/// Byte order of multi-byte cells: little or big
	#[arg(long)]
	pub endian: Option<Endian>,
}

fn parse_byte(text: &str) -> Result<u8, String> {
	let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
		Some(hex) => u8::from_str_radix(hex, 16),
		None => text.parse(),
	};
	parsed.map_err(|err| format!("invalid byte {text:?}: {err}"))
}

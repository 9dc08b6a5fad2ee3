//! `memview` binary.
//!
//! Opens files as memory images through the memview document cache:
//! - `dump` prints rows in the configured cell format
//! - `poke` edits bytes in the overlay and optionally commits them
//! - `diff` highlights bytes that changed between two images

mod cli;
mod commands;

use anyhow::Context;
use clap::Parser;
use cli::Cli;
use memview_config::Config;
use tracing::{Level, debug};

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
	match &cli.config {
		Some(path) => Config::load(path).with_context(|| format!("failed to load config {}", path.display())),
		None => Config::discover().context("failed to load config"),
	}
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
	let cli = Cli::parse();
	let config = load_config(&cli)?;

	let level = if cli.verbose {
		Level::DEBUG
	} else {
		config.log.level.parse().unwrap_or(Level::INFO)
	};
	let subscriber = tracing_subscriber::fmt()
		.with_max_level(level)
		.with_writer(std::io::stderr)
		.finish();
	tracing::subscriber::set_global_default(subscriber)?;
	debug!(?config, "configuration loaded");

	let state = cli.state.clone().or_else(|| config.persist.path.clone());
	let mut out = std::io::stdout().lock();
	commands::run(cli.command, &config, state.as_deref(), &mut out).await
}

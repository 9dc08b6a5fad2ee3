//! Bridge between the host half and the UI half of a memory view.
//!
//! Both halves keep a mirrored [`DocumentRegistry`](memview_doc::DocumentRegistry).
//! The UI reads memory through a [`UiMemoryProxy`] that turns page fetches into
//! `GetMemory` commands answered by the [`HostEndpoint`]; local edits, client
//! state and settings changes are forwarded fire-and-forget. Session status
//! changes flow back as `DebuggerStatus` notices.
//!
//! Frames travel over any `AsyncBufRead`/`AsyncWrite` pair driven by
//! [`run_pump`].

#![warn(missing_docs)]

pub mod client;
pub mod error;
pub mod host;
pub mod proxy;
pub mod pump;
pub mod session;

pub use client::UiClient;
pub use error::{BridgeError, Result};
pub use host::HostEndpoint;
pub use proxy::UiMemoryProxy;
pub use pump::run_pump;
pub use session::UiSession;

#[cfg(test)]
mod tests;

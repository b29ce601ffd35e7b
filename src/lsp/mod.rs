//! LSP plumbing carried over the session channel
//!
//! Only framing and the shutdown handshake live here; the analysis itself is
//! the R server's business.

pub mod client;
pub mod framing;

pub use client::{LanguageClient, LspClientError};
pub use framing::{LspFraming, LspFramingError};

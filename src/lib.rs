//! Scoped R language server sessions for editor integrations
//!
//! Every open R document maps to a scope: a workspace folder, one stray file,
//! the shared untitled scope or a notebook. Each scope gets its own R
//! language server process, started on first use and stopped once nothing
//! refers to it.

pub mod config;
pub mod controller;
pub mod host;
pub mod io;
pub mod launcher;
pub mod logging;
pub mod lsp;
pub mod registry;
pub mod scope;
pub mod session;

#[cfg(test)]
mod test_utils;

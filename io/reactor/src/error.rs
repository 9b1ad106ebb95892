//! Startup and runtime errors surfaced by the facade.

use std::io;
use thiserror::Error;

/// Errors returned by `Server::new` / `bind` / `run`.
///
/// Connection-level failures are never surfaced here — they reach the
/// application as a single `on_disconnected` with a reason code.
#[derive(Debug, Error)]
pub enum Error {
    /// Socket, pipe or timer fd setup failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// `run` was called before `bind`.
    #[error("server is not bound to a listen address")]
    NotBound,

    /// `run` was called before `set_handler`.
    #[error("no handler installed")]
    NoHandler,

    /// Configuration rejected by validation.
    #[error("invalid configuration: {0}")]
    Config(String),
}

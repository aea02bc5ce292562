//! Server side of blockfetch.
//!
//! [`ChunkService`] answers range and size requests for one file;
//! [`ChunkServer`] exposes it over UDP with one task per datagram.

mod server;
mod service;

pub use server::{ChunkServer, ServerConfig};
pub use service::{ChunkService, ServeError};

/// Errors produced by the chunk server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

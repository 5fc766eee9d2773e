//! # Error Types
//!
//! Purpose: One error enum shared by the codec, the client engine, and the
//! responder server so every layer speaks the same failure vocabulary.
//!
//! ## Design Principles
//! 1. **Per-Command vs Fatal**: `Reply` is a normal per-command outcome;
//!    `Protocol` and `ConnectionLost` mean the stream can no longer be used.
//! 2. **Cheap Fan-Out**: Variants delivered to many waiters at once carry no
//!    heap data so they can be built per waiter.

use std::fmt;
use std::io;

use bytes::Bytes;
use thiserror::Error;

/// Result type used across the workspace.
pub type MuxResult<T> = Result<T, MuxError>;

/// Errors surfaced by the multiplexing client and its codec.
#[derive(Debug, Error)]
pub enum MuxError {
    /// The transport could not be established.
    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// Read or write failure on an open transport.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// The transport closed or faulted while the request was outstanding.
    #[error("connection lost")]
    ConnectionLost,

    /// Reply bytes could not be parsed; framing is no longer trustworthy.
    #[error("protocol error: {0}")]
    Protocol(&'static str),

    /// Well-formed error reply (`-ERR ...`) for this command only.
    #[error("server error: {}", ReplyText(.0))]
    Reply(Bytes),

    /// API misuse, e.g. executing a batch twice.
    #[error("usage error: {0}")]
    Usage(&'static str),

    /// Reply kind did not match what the command expects.
    #[error("unexpected response")]
    UnexpectedResponse,

    /// A caller-level timeout elapsed before the reply arrived.
    #[error("timed out waiting for reply")]
    Timeout,
}

impl MuxError {
    /// Returns true when the error leaves the connection unusable.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MuxError::Io(_) | MuxError::ConnectionLost | MuxError::Protocol(_)
        )
    }
}

struct ReplyText<'a>(&'a Bytes);

impl fmt::Display for ReplyText<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(self.0))
    }
}

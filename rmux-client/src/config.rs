//! Client configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default size of each receive-loop read.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 16 * 1024;

/// Default initial capacity of the outbound buffer.
pub const DEFAULT_WRITE_BUFFER_SIZE: usize = 4 * 1024;

/// Configuration for a multiplexed connection and its TCP factory.
///
/// Every field has a default, so partial JSON such as
/// `{"nodelay": false}` deserializes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Bytes requested from the transport per receive-loop read.
    pub read_buffer_size: usize,
    /// Initial capacity of the outbound buffer.
    pub write_buffer_size: usize,
    /// Optional TCP connect timeout.
    pub connect_timeout: Option<Duration>,
    /// Optional TCP write timeout.
    pub write_timeout: Option<Duration>,
    /// Set `TCP_NODELAY` on new sockets.
    pub nodelay: bool,
    /// Upper bound for async waits; the request itself stays queued.
    pub response_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            write_buffer_size: DEFAULT_WRITE_BUFFER_SIZE,
            connect_timeout: None,
            write_timeout: None,
            nodelay: true,
            response_timeout: None,
        }
    }
}

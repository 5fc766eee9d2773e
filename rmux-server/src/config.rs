//! Responder configuration.

use serde::{Deserialize, Serialize};

/// Settings for the responder binary.
///
/// Loaded from an optional JSON file; missing fields take defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address, e.g. "127.0.0.1:6379".
    pub addr: String,
    /// Initial capacity of each connection's read and reply buffers.
    pub read_buffer_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            addr: "127.0.0.1:6379".to_string(),
            read_buffer_size: 8 * 1024,
        }
    }
}

impl ServerConfig {
    /// Parses a JSON document.
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

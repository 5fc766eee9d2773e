// rmux-common - Shared error type and RESP2 codec for the rmux workspace
//
// Both the multiplexing client and the responder server build on these.

pub mod error;
pub mod resp;

// Re-export for convenience
pub use error::*;
pub use resp::*;

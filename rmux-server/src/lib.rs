//! # rmux Responder
//!
//! Purpose: A small RESP2 server answering PING and ECHO, used as the peer
//! for client integration tests and local throughput runs.
//!
//! ## Design Principles
//! 1. **Task per Connection**: Each client is served by its own tokio task.
//! 2. **Buffer Reuse**: One read buffer and one reply buffer per connection.
//! 3. **Pipelining Friendly**: All replies for one read go out in one write.

mod config;
mod server;

pub use config::ServerConfig;
pub use server::{dispatch_command, dispatch_frame, handle_connection, run};

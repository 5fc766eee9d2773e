//! # rmux Client
//!
//! Purpose: Multiplex many concurrent RESP commands over one connection,
//! with blocking and async call styles and explicit batching.
//!
//! ## Design Principles
//! 1. **Pipelining First**: Commands are written as soon as they are issued;
//!    replies are matched FIFO by a single background reader.
//! 2. **Strategy Pattern**: Any `Transport` works; TCP and in-memory pipes
//!    ship with the crate.
//! 3. **Minimal Allocation**: Frames are encoded into reused buffers and
//!    replies are zero-copy slices of the receive buffer.
//! 4. **Protocol Clarity**: RESP2 is encoded and parsed explicitly in
//!    `rmux-common`.
//!
//! ## Example
//!
//! ```no_run
//! use rmux_client::{ClientConfig, Connection, TcpFactory};
//!
//! let config = ClientConfig::default();
//! let conn = Connection::connect(&TcpFactory::new(&config), "127.0.0.1:6379", config)?;
//! conn.ping()?;
//! for _ in 0..1_000 {
//!     conn.ping_forget()?;
//! }
//! let mut batch = conn.create_batch();
//! batch.ping_forget()?;
//! batch.execute()?;
//! assert_eq!(&conn.echo(b"hello")?[..], b"hello");
//! # Ok::<(), rmux_client::MuxError>(())
//! ```

mod batch;
mod config;
mod connection;
mod pending;
mod stats;
pub mod transport;

pub use batch::Batch;
pub use config::{ClientConfig, DEFAULT_READ_BUFFER_SIZE, DEFAULT_WRITE_BUFFER_SIZE};
pub use connection::{Connection, ConnectionState};
pub use pending::PendingReply;
pub use rmux_common::{MuxError, MuxResult, RespValue};
pub use stats::ConnectionStats;
pub use transport::{TcpFactory, TcpTransport, Transport, TransportFactory, TransportState};

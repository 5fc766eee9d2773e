#![allow(dead_code)]

use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use bytes::BytesMut;
use rmux_client::transport::memory::{self, MemoryTransport};
use rmux_client::transport::write_all;
use rmux_client::{ClientConfig, Connection, TcpFactory, Transport};
use rmux_common::RespDecoder;
use rmux_server::{dispatch_frame, ServerConfig};

/// Starts the tokio responder on a loopback port and returns its address.
pub fn spawn_server() -> String {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let runtime = tokio::runtime::Runtime::new().expect("runtime");
        runtime.block_on(async move {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
                .await
                .expect("bind");
            tx.send(listener.local_addr().expect("addr").to_string())
                .expect("send addr");
            let _ = rmux_server::run(listener, ServerConfig::default()).await;
        });
    });
    rx.recv().expect("server addr")
}

pub fn tcp_connection(addr: &str) -> Connection {
    let config = ClientConfig::default();
    Connection::connect(&TcpFactory::new(&config), addr, config).expect("connect")
}

/// Serves PING/ECHO on the far end of an in-memory pipe until it closes.
pub fn spawn_responder(server: MemoryTransport) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut decoder = RespDecoder::new();
        let mut buf = BytesMut::new();
        let mut out = BytesMut::new();
        let mut chunk = vec![0u8; 16 * 1024];
        loop {
            let n = match server.read(&mut chunk) {
                Ok(0) | Err(_) => return,
                Ok(n) => n,
            };
            buf.extend_from_slice(&chunk[..n]);
            while let Some(frame) = decoder.decode(&mut buf).expect("valid request") {
                dispatch_frame(frame, &mut out);
            }
            if !out.is_empty() {
                if write_all(&server, &out).is_err() {
                    return;
                }
                out.clear();
            }
        }
    })
}

/// In-memory connection backed by a responder thread. The returned transport
/// is the client end, kept for write counting.
pub fn memory_connection(chunk: usize, config: ClientConfig) -> (Connection, Arc<MemoryTransport>) {
    let (client, server) = memory::pair_with_chunk(chunk);
    spawn_responder(server);
    let client = Arc::new(client);
    let conn = Connection::with_transport(client.clone(), config).expect("connection");
    (conn, client)
}

/// In-memory connection whose far end is handed to the test untouched.
pub fn manual_connection(config: ClientConfig) -> (Connection, MemoryTransport) {
    let (client, server) = memory::pair();
    let conn = Connection::with_transport(Arc::new(client), config).expect("connection");
    (conn, server)
}

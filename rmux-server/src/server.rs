//! # TCP Responder
//!
//! Accept RESP2 connections, parse commands, and answer the PING/ECHO
//! command class with minimal overhead. Replies produced for one read are
//! written back with one write, so pipelined clients see few syscalls.

use std::io;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::debug;

use rmux_common::{encode_value, RespDecoder, RespValue};

use crate::config::ServerConfig;

/// Accepts connections forever, serving each on its own task.
pub async fn run(listener: TcpListener, config: ServerConfig) -> io::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        stream.set_nodelay(true)?;
        let read_buffer_size = config.read_buffer_size;
        tokio::spawn(async move {
            debug!(%peer, "client connected");
            match handle_connection(stream, read_buffer_size).await {
                Ok(()) => debug!(%peer, "client disconnected"),
                Err(err) => debug!(%peer, error = %err, "client connection failed"),
            }
        });
    }
}

/// Handles a single TCP client connection.
pub async fn handle_connection(mut stream: TcpStream, read_buffer_size: usize) -> io::Result<()> {
    let mut buffer = BytesMut::with_capacity(read_buffer_size);
    let mut out = BytesMut::with_capacity(read_buffer_size);
    let mut decoder = RespDecoder::new();

    loop {
        let bytes = stream.read_buf(&mut buffer).await?;
        if bytes == 0 {
            break;
        }

        loop {
            match decoder.decode(&mut buffer) {
                Ok(Some(frame)) => dispatch_frame(frame, &mut out),
                Ok(None) => break,
                Err(err) => {
                    debug!(error = %err, "closing client after protocol error");
                    encode_value(&resp_error(b"ERR protocol error"), &mut out);
                    stream.write_all(&out).await?;
                    return Ok(());
                }
            }
        }

        if !out.is_empty() {
            stream.write_all(&out).await?;
            out.clear();
        }
    }

    Ok(())
}

/// Answers one decoded request frame into `out`.
pub fn dispatch_frame(frame: RespValue, out: &mut BytesMut) {
    match command_args(frame) {
        Some(args) => dispatch_command(&args, out),
        None => encode_value(&resp_error(b"ERR invalid command frame"), out),
    }
}

/// Answers one command given as its argument list into `out`.
pub fn dispatch_command(args: &[Bytes], out: &mut BytesMut) {
    let reply = match args.split_first() {
        None => resp_error(b"ERR empty command"),
        Some((cmd, rest)) if eq_ignore_ascii_case(cmd, b"PING") => handle_ping(rest),
        Some((cmd, rest)) if eq_ignore_ascii_case(cmd, b"ECHO") => handle_echo(rest),
        Some(_) => resp_error(b"ERR unknown command"),
    };
    encode_value(&reply, out);
}

fn command_args(frame: RespValue) -> Option<Vec<Bytes>> {
    match frame {
        RespValue::Array(Some(items)) => items
            .into_iter()
            .map(|item| match item {
                RespValue::Bulk(Some(data)) => Some(data),
                _ => None,
            })
            .collect(),
        _ => None,
    }
}

fn handle_ping(args: &[Bytes]) -> RespValue {
    match args {
        [] => RespValue::simple("PONG"),
        [payload] => RespValue::Bulk(Some(payload.clone())),
        _ => resp_error(b"ERR wrong number of arguments for 'ping' command"),
    }
}

fn handle_echo(args: &[Bytes]) -> RespValue {
    match args {
        [payload] => RespValue::Bulk(Some(payload.clone())),
        _ => resp_error(b"ERR wrong number of arguments for 'echo' command"),
    }
}

fn resp_error(message: &'static [u8]) -> RespValue {
    RespValue::Error(Bytes::from_static(message))
}

fn eq_ignore_ascii_case(a: &[u8], b: &[u8]) -> bool {
    a.eq_ignore_ascii_case(b)
}

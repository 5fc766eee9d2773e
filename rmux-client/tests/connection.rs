mod common;

use std::net::TcpListener;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rmux_client::{
    ClientConfig, Connection, ConnectionState, MuxError, RespValue, TcpFactory, Transport,
    TransportFactory, TransportState,
};

use rmux_client::transport::memory::MemoryTransport;

use common::{manual_connection, memory_connection, spawn_server, tcp_connection};

const CORPUS: [&str; 10] = [
    "It was the best of times, it was the worst of times,",
    "it was the age of wisdom, it was the age of foolishness,",
    "it was the epoch of belief, it was the epoch of incredulity,",
    "it was the season of Light, it was the season of Darkness,",
    "it was the spring of hope, it was the winter of despair,",
    "we had everything before us, we had nothing before us,",
    "we were all going direct to Heaven,",
    "we were all going direct the other way--",
    "in short, the period was so far like the present period,",
    "",
];

#[test]
fn blocking_ping_round_trip() {
    let addr = spawn_server();
    let conn = tcp_connection(&addr);
    assert!(conn.is_connected());
    assert_eq!(conn.transport_state(), TransportState::Open);
    conn.ping().expect("ping");
}

#[test]
fn echo_returns_payload_byte_for_byte() {
    let addr = spawn_server();
    let conn = tcp_connection(&addr);

    let all_bytes: Vec<u8> = (0..=255u8).collect();
    let large = vec![b'z'; 1024 * 1024];
    let payloads: [&[u8]; 7] = [
        &b""[..],
        &b"hello"[..],
        &b"a\r\nb"[..],
        &b"\r\n\r\n"[..],
        &b"$-1\r\n"[..],
        &all_bytes,
        &large,
    ];
    for payload in payloads {
        let echoed = conn.echo(payload).expect("echo");
        assert_eq!(&echoed[..], payload);
    }
}

#[test]
fn corpus_echoed_ten_times_in_order() {
    let addr = spawn_server();
    let conn = tcp_connection(&addr);

    let mut received = Vec::new();
    for _ in 0..10 {
        for line in CORPUS {
            let echoed = conn.echo(line.as_bytes()).expect("echo");
            received.push(String::from_utf8(echoed.to_vec()).expect("utf8"));
        }
    }

    let expected: Vec<String> = (0..10)
        .flat_map(|_| CORPUS.iter().map(|line| line.to_string()))
        .collect();
    assert_eq!(received, expected);
}

#[test]
fn blocking_ping_waits_for_pipelined_fire_and_forget() {
    const PIPELINED: u64 = 500_000;

    let addr = spawn_server();
    let conn = tcp_connection(&addr);

    for _ in 1..PIPELINED {
        conn.ping_forget().expect("ping forget");
    }
    conn.ping().expect("final ping");

    let stats = conn.stats();
    assert_eq!(stats.submitted, PIPELINED);
    assert_eq!(stats.completed, PIPELINED);
    assert_eq!(stats.discarded, PIPELINED - 1);
    assert_eq!(stats.in_flight, 0);
}

#[test]
fn mixed_requests_complete_in_enqueue_order() {
    let (conn, _client) = memory_connection(usize::MAX, ClientConfig::default());

    let mut waited = Vec::new();
    for idx in 0..2_000u32 {
        let tag = idx.to_string();
        if idx % 3 == 0 {
            conn.submit_forget(&[b"ECHO", tag.as_bytes()]).expect("forget");
        } else {
            let reply = conn.submit(&[b"ECHO", tag.as_bytes()]).expect("submit");
            waited.push((tag, reply));
        }
    }

    for (tag, reply) in waited {
        assert_eq!(reply.wait().expect("reply"), RespValue::bulk(tag.into_bytes()));
    }
    assert_eq!(conn.stats().completed, 2_000);
}

#[test]
fn concurrent_senders_get_their_own_replies() {
    let addr = spawn_server();
    let conn = Arc::new(tcp_connection(&addr));

    let workers: Vec<_> = (0..8)
        .map(|worker| {
            let conn = conn.clone();
            thread::spawn(move || {
                for idx in 0..500 {
                    let tag = format!("worker-{worker}-{idx}");
                    if idx % 4 == 0 {
                        conn.ping_forget().expect("ping forget");
                    }
                    let echoed = conn.echo(tag.as_bytes()).expect("echo");
                    assert_eq!(&echoed[..], tag.as_bytes());
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().expect("worker");
    }
    conn.ping().expect("ping");
}

#[test]
fn single_byte_reads_and_writes_still_frame_correctly() {
    let (conn, _client) = memory_connection(1, ClientConfig::default());
    conn.ping().expect("ping");
    assert_eq!(&conn.echo(b"split\r\nacross reads").expect("echo")[..], b"split\r\nacross reads");
    for _ in 0..50 {
        conn.ping_forget().expect("ping forget");
    }
    conn.ping().expect("ping");
}

#[test]
fn error_reply_fails_only_its_own_command() {
    let (conn, _client) = memory_connection(usize::MAX, ClientConfig::default());

    let before = conn.submit(&[b"ECHO", b"before"]).expect("submit");
    let failing = conn.submit(&[b"NOPE"]).expect("submit");
    conn.submit_forget(&[b"ALSO-NOPE"]).expect("forget");
    let after = conn.submit(&[b"ECHO", b"after"]).expect("submit");

    assert_eq!(before.wait().expect("before"), RespValue::bulk(&b"before"[..]));
    match failing.wait() {
        Err(MuxError::Reply(message)) => assert!(message.starts_with(b"ERR unknown command")),
        other => panic!("expected reply error, got {other:?}"),
    }
    assert_eq!(after.wait().expect("after"), RespValue::bulk(&b"after"[..]));

    assert!(conn.is_connected());
    assert_eq!(conn.stats().reply_errors, 2);
}

#[test]
fn shutdown_fails_outstanding_requests() {
    let (conn, _server) = manual_connection(ClientConfig::default());

    let replies: Vec<_> = (0..5)
        .map(|_| conn.submit(&[b"PING"]).expect("submit"))
        .collect();
    conn.submit_forget(&[b"PING"]).expect("forget");

    conn.shutdown();
    for reply in replies {
        assert!(matches!(reply.wait(), Err(MuxError::ConnectionLost)));
    }
    assert_eq!(conn.state(), ConnectionState::Disconnected);
    assert_eq!(conn.stats().lost, 6);
    assert_eq!(conn.stats().in_flight, 0);

    assert!(matches!(conn.ping(), Err(MuxError::Usage(_))));
    conn.shutdown();
}

#[test]
fn shutdown_during_concurrent_sends_fails_fast() {
    let addr = spawn_server();
    let conn = Arc::new(tcp_connection(&addr));
    let (tx, rx) = mpsc::channel();

    for worker in 0..6 {
        let conn = conn.clone();
        let tx = tx.clone();
        thread::spawn(move || {
            let mut idx = 0u64;
            let err = loop {
                let result = if idx % 2 == 0 {
                    conn.ping_forget()
                } else {
                    let tag = format!("sender-{worker}-{idx}");
                    conn.echo(tag.as_bytes()).map(|_| ())
                };
                if let Err(err) = result {
                    break err;
                }
                idx += 1;
            };
            let _ = tx.send(err);
        });
    }
    drop(tx);

    while conn.stats().completed < 1_000 {
        thread::yield_now();
    }
    let stopper = {
        let conn = conn.clone();
        thread::spawn(move || conn.shutdown())
    };
    stopper.join().expect("shutdown");

    for _ in 0..6 {
        let err = rx
            .recv_timeout(Duration::from_secs(10))
            .expect("sender stuck after shutdown");
        assert!(
            matches!(err, MuxError::ConnectionLost | MuxError::Usage(_) | MuxError::Io(_)),
            "unexpected error {err:?}"
        );
    }
    assert_eq!(conn.state(), ConnectionState::Disconnected);
    assert_eq!(conn.stats().in_flight, 0);
}

#[test]
fn factory_shutdown_closes_transport() {
    let addr = spawn_server();
    let factory = TcpFactory::default();
    let transport = factory.connect(&addr).expect("connect");
    assert_eq!(transport.state(), TransportState::Open);

    factory.shutdown(&*transport);
    assert_eq!(transport.state(), TransportState::Closed);
    factory.shutdown(&*transport);
    assert_eq!(transport.state(), TransportState::Closed);
}

#[test]
fn peer_close_faults_and_fails_everything() {
    let (conn, server) = manual_connection(ClientConfig::default());

    let replies: Vec<_> = (0..3)
        .map(|_| conn.submit(&[b"PING"]).expect("submit"))
        .collect();
    server.close();

    for reply in replies {
        assert!(matches!(reply.wait(), Err(MuxError::ConnectionLost)));
    }
    assert_eq!(conn.state(), ConnectionState::Faulted);
    assert!(!conn.is_connected());
    assert!(matches!(conn.ping(), Err(MuxError::ConnectionLost)));
}

#[test]
fn malformed_reply_is_fatal() {
    let (conn, server) = manual_connection(ClientConfig::default());

    let reply = conn.submit(&[b"PING"]).expect("submit");
    server.write(b"?garbage\r\n").expect("inject");

    assert!(matches!(reply.wait(), Err(MuxError::ConnectionLost)));
    assert_eq!(conn.state(), ConnectionState::Faulted);
}

#[test]
fn unsolicited_reply_is_fatal() {
    let (conn, server) = manual_connection(ClientConfig::default());
    server.write(b"+PONG\r\n").expect("inject");

    for _ in 0..200 {
        if conn.state() == ConnectionState::Faulted {
            return;
        }
        thread::sleep(Duration::from_millis(5));
    }
    panic!("connection never faulted");
}

/// Writes `reply` once `conn` has exactly one request in flight.
fn answer_when_queued(conn: &Connection, server: &MemoryTransport, reply: &[u8]) {
    for _ in 0..400 {
        if conn.stats().in_flight == 1 {
            server.write(reply).expect("inject");
            return;
        }
        thread::sleep(Duration::from_millis(5));
    }
    panic!("request never queued");
}

#[test]
fn unexpected_reply_kind_is_reported() {
    let (conn, server) = manual_connection(ClientConfig::default());

    thread::scope(|scope| {
        let ping = scope.spawn(|| conn.ping());
        answer_when_queued(&conn, &server, b":1\r\n");
        assert!(matches!(ping.join().expect("ping"), Err(MuxError::UnexpectedResponse)));

        let echo = scope.spawn(|| conn.echo(b"x"));
        answer_when_queued(&conn, &server, b"+x\r\n");
        assert!(matches!(echo.join().expect("echo"), Err(MuxError::UnexpectedResponse)));
    });
    assert!(conn.is_connected());
}

#[test]
fn refused_connect_reports_connect_error() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();
    drop(listener);

    let config = ClientConfig {
        connect_timeout: Some(Duration::from_secs(1)),
        ..ClientConfig::default()
    };
    let result = Connection::connect(&TcpFactory::new(&config), &addr, config);
    assert!(matches!(result, Err(MuxError::Connect { .. })));
}

#[test]
fn config_deserializes_with_defaults() {
    let config: ClientConfig =
        serde_json::from_str(r#"{"read_buffer_size": 1024, "nodelay": false}"#).expect("json");
    assert_eq!(config.read_buffer_size, 1024);
    assert!(!config.nodelay);
    assert_eq!(config.write_buffer_size, ClientConfig::default().write_buffer_size);
    assert_eq!(config.response_timeout, None);
}

#[tokio::test(flavor = "multi_thread")]
async fn async_pipelined_pings_then_awaited_ping() {
    let addr = spawn_server();
    let conn = tcp_connection(&addr);

    for _ in 1..10_000 {
        conn.ping_forget().expect("ping forget");
    }
    conn.ping_async().await.expect("ping");
    assert_eq!(conn.stats().completed, 10_000);

    let echoed = conn.echo_async(b"async payload").await.expect("echo");
    assert_eq!(&echoed[..], b"async payload");
}

#[tokio::test]
async fn async_tasks_share_one_connection() {
    let (conn, _client) = memory_connection(usize::MAX, ClientConfig::default());
    let conn = Arc::new(conn);

    let tasks: Vec<_> = (0..16)
        .map(|task| {
            let conn = conn.clone();
            tokio::spawn(async move {
                for idx in 0..100 {
                    let tag = format!("task-{task}-{idx}");
                    let echoed = conn.echo_async(tag.as_bytes()).await.expect("echo");
                    assert_eq!(&echoed[..], tag.as_bytes());
                }
            })
        })
        .collect();

    for task in tasks {
        task.await.expect("task");
    }
}

#[tokio::test]
async fn timed_out_wait_leaves_request_queued() {
    let config = ClientConfig {
        response_timeout: Some(Duration::from_millis(100)),
        ..ClientConfig::default()
    };
    let (conn, server) = manual_connection(config);

    let result = conn.echo_async(b"slow").await;
    assert!(matches!(result, Err(MuxError::Timeout)));
    assert_eq!(conn.stats().in_flight, 1);

    // The abandoned entry must absorb the first reply, not the next caller.
    server.write(b"$4\r\nslow\r\n+PONG\r\n").expect("inject");
    conn.ping_async().await.expect("ping");
    assert_eq!(conn.stats().in_flight, 0);
}

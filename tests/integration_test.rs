//! Integration tests for connection lifecycle and frame flow
//!
//! These run real sockets on loopback. The channel registry is shared by
//! the whole process, so every test holds `TEST_LOCK` and closes all of
//! its connections before returning; id assertions rely on that.

use groundlink::codec::{encode_frame, MSG_HEARTBEAT};
use groundlink::{Connection, Frame, LinkError, LinkKind};
use parking_lot::Mutex;
use std::net::UdpSocket;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

static TEST_LOCK: Mutex<()> = Mutex::new(());

const RECV_DEADLINE: Duration = Duration::from_secs(10);

fn init_logs() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Encoded heartbeat as it would appear on the wire
fn heartbeat_wire(system_id: u8, component_id: u8, sequence: u8) -> Vec<u8> {
    encode_frame(&Frame::heartbeat(), system_id, component_id, sequence)
        .expect("heartbeat always fits a frame")
        .to_vec()
}

// =============================================================================
// Channel registry behaviour
// =============================================================================

#[test]
fn test_channel_ids_allocate_lowest_free_and_recycle() {
    let _guard = TEST_LOCK.lock();
    init_logs();

    let a = Connection::open_udp("127.0.0.1", 0, None, 1, 1).unwrap();
    let b = Connection::open_udp("127.0.0.1", 0, None, 1, 1).unwrap();
    let c = Connection::open_udp("127.0.0.1", 0, None, 1, 1).unwrap();

    let (id_a, id_b, id_c) = (a.channel(), b.channel(), c.channel());
    assert!(id_a < id_b && id_b < id_c, "fresh ids ascend");

    // Closing the middle connection frees the lowest slot for the next open.
    b.close();
    let d = Connection::open_udp("127.0.0.1", 0, None, 1, 1).unwrap();
    assert_eq!(d.channel(), id_b);

    a.close();
    c.close();
    d.close();
}

#[test]
fn test_failed_open_rolls_back_its_channel_id() {
    let _guard = TEST_LOCK.lock();
    init_logs();

    let first = Connection::open_udp("127.0.0.1", 0, None, 1, 1).unwrap();
    let port = first.local_addr().unwrap().port();

    // Same port again must fail at bind time...
    match Connection::open_udp("127.0.0.1", port, None, 1, 1) {
        Err(LinkError::UdpBind { addr, .. }) => assert_eq!(addr.port(), port),
        other => panic!("expected UdpBind, got {other:?}"),
    }

    // ...and must not leak the id it briefly held.
    let second = Connection::open_udp("127.0.0.1", 0, None, 1, 1).unwrap();
    assert_eq!(second.channel(), first.channel() + 1);

    first.close();
    second.close();
}

#[test]
fn test_drop_closes_and_recycles_the_id() {
    let _guard = TEST_LOCK.lock();
    init_logs();

    let a = Connection::open_udp("127.0.0.1", 0, None, 1, 1).unwrap();
    let id = a.channel();
    drop(a);

    let b = Connection::open_udp("127.0.0.1", 0, None, 1, 1).unwrap();
    assert_eq!(b.channel(), id);
    b.close();
}

// =============================================================================
// Construction failures
// =============================================================================

#[test]
fn test_tcp_listener_port_conflict() {
    let _guard = TEST_LOCK.lock();
    init_logs();

    let server = Connection::open_tcp_server("127.0.0.1", 0, 1, 1).unwrap();
    let port = server.local_addr().unwrap().port();

    match Connection::open_tcp_server("127.0.0.1", port, 1, 1) {
        Err(LinkError::TcpBind { addr, .. }) => assert_eq!(addr.port(), port),
        other => panic!("expected TcpBind, got {other:?}"),
    }

    server.close();
}

#[test]
fn test_tcp_connect_to_closed_port_fails() {
    let _guard = TEST_LOCK.lock();
    init_logs();

    // Grab a free port, then release it before dialing.
    let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = probe.local_addr().unwrap().port();
    drop(probe);

    match Connection::open_tcp_client("127.0.0.1", port, 1, 1) {
        Err(e @ LinkError::TcpConnect { .. }) => assert!(e.is_device_error()),
        other => panic!("expected TcpConnect, got {other:?}"),
    }
}

#[test]
fn test_serial_open_error() {
    let _guard = TEST_LOCK.lock();
    init_logs();

    match Connection::open_serial("/some/magic/not/exist/path", 57_600, 42, 200) {
        Err(e @ LinkError::SerialOpen { .. }) => {
            assert!(e.is_device_error());
        }
        other => panic!("expected SerialOpen, got {other:?}"),
    }
}

// =============================================================================
// Echo flows
// =============================================================================

#[test]
fn test_udp_echo_roundtrip() {
    let _guard = TEST_LOCK.lock();
    init_logs();

    // Dynamic-peer server: answers whoever talked last. The callback keeps
    // a sender, not a connection clone, so no reference cycle forms.
    let server = Connection::open_udp("127.0.0.1", 0, None, 42, 200).unwrap();
    let server_port = server.local_addr().unwrap().port();
    let echo = server.sender();
    server.subscribe(move |frame| {
        let _ = echo.send(&Frame::new(frame.message_id, frame.payload.clone()));
    });

    let client =
        Connection::open_udp("127.0.0.1", 0, Some(("127.0.0.1", server_port)), 2, 241).unwrap();
    let (tx, rx) = mpsc::channel();
    client.subscribe(move |frame| {
        let _ = tx.send(frame.clone());
    });

    client.send(&Frame::heartbeat()).unwrap();
    client.send(&Frame::heartbeat()).unwrap();

    let frame = rx.recv_timeout(RECV_DEADLINE).expect("no echo came back");
    assert_eq!(frame.message_id, MSG_HEARTBEAT);
    assert_eq!(frame.payload.as_ref(), &[0u8; 9][..]);
    // The echo carries the server's identifiers, not the client's.
    assert_eq!(frame.system_id, 42);
    assert_eq!(frame.component_id, 200);

    let client_stats = client.stats();
    assert!(client_stats.tx_frames >= 1);
    assert!(client_stats.rx_frames >= 1);
    assert!(client_stats.tx_bytes > 0);
    assert!(client_stats.rx_bytes > 0);
    assert!(server.stats().rx_frames >= 1);

    client.close();
    server.close();
}

#[test]
fn test_tcp_echo_roundtrip() {
    let _guard = TEST_LOCK.lock();
    init_logs();

    let server = Connection::open_tcp_server("127.0.0.1", 0, 42, 200).unwrap();
    let port = server.local_addr().unwrap().port();
    let echo = server.sender();
    server.subscribe(move |frame| {
        let _ = echo.send(&Frame::new(frame.message_id, frame.payload.clone()));
    });

    let client = Connection::open_tcp_client("127.0.0.1", port, 2, 241).unwrap();
    let (tx, rx) = mpsc::channel();
    client.subscribe(move |frame| {
        let _ = tx.send(frame.clone());
    });

    client.send(&Frame::heartbeat()).unwrap();

    let frame = rx.recv_timeout(RECV_DEADLINE).expect("no echo came back");
    assert_eq!(frame.message_id, MSG_HEARTBEAT);
    assert_eq!(frame.system_id, 42);
    assert_eq!(frame.component_id, 200);

    client.close();
    server.close();
}

#[test]
fn test_outgoing_frames_are_sequence_stamped() {
    let _guard = TEST_LOCK.lock();
    init_logs();

    let receiver = Connection::open_udp("127.0.0.1", 0, None, 1, 1).unwrap();
    let port = receiver.local_addr().unwrap().port();
    let (tx, rx) = mpsc::channel();
    receiver.subscribe(move |frame| {
        let _ = tx.send((frame.sequence, frame.system_id, frame.component_id));
    });

    let sender = Connection::open_udp("127.0.0.1", 0, Some(("127.0.0.1", port)), 7, 42).unwrap();
    for _ in 0..3 {
        sender.send(&Frame::heartbeat()).unwrap();
    }
    // Per-frame identity override shares the same sequence counter.
    sender.send_message(&Frame::heartbeat(), 30, 31).unwrap();

    // Loopback UDP keeps datagram order.
    assert_eq!(rx.recv_timeout(RECV_DEADLINE).unwrap(), (0, 7, 42));
    assert_eq!(rx.recv_timeout(RECV_DEADLINE).unwrap(), (1, 7, 42));
    assert_eq!(rx.recv_timeout(RECV_DEADLINE).unwrap(), (2, 7, 42));
    assert_eq!(rx.recv_timeout(RECV_DEADLINE).unwrap(), (3, 30, 31));

    sender.close();
    receiver.close();
}

// =============================================================================
// Dispatch semantics
// =============================================================================

#[test]
fn test_subscribers_run_in_registration_order() {
    let _guard = TEST_LOCK.lock();
    init_logs();

    let conn = Connection::open_udp("127.0.0.1", 0, None, 1, 1).unwrap();
    let port = conn.local_addr().unwrap().port();

    let order = Arc::new(Mutex::new(Vec::new()));
    let (tx, rx) = mpsc::channel();
    let o1 = order.clone();
    conn.subscribe(move |_| o1.lock().push(1));
    let o2 = order.clone();
    conn.subscribe(move |_| o2.lock().push(2));
    let o3 = order.clone();
    conn.subscribe(move |frame| {
        o3.lock().push(3);
        let _ = tx.send(frame.sequence);
    });

    let sock = UdpSocket::bind("127.0.0.1:0").unwrap();
    sock.send_to(&heartbeat_wire(5, 5, 9), ("127.0.0.1", port))
        .unwrap();

    let sequence = rx.recv_timeout(RECV_DEADLINE).expect("frame not dispatched");
    assert_eq!(sequence, 9);
    assert_eq!(&*order.lock(), &[1, 2, 3]);

    conn.close();
}

#[test]
fn test_close_from_inside_a_callback() {
    let _guard = TEST_LOCK.lock();
    init_logs();

    let conn = Connection::open_udp("127.0.0.1", 0, None, 1, 1).unwrap();
    let port = conn.local_addr().unwrap().port();

    let handle = conn.clone();
    let (tx, rx) = mpsc::channel();
    conn.subscribe(move |_| {
        handle.close();
        let _ = tx.send(());
    });

    let sock = UdpSocket::bind("127.0.0.1:0").unwrap();
    sock.send_to(&heartbeat_wire(1, 1, 0), ("127.0.0.1", port))
        .unwrap();

    rx.recv_timeout(RECV_DEADLINE)
        .expect("callback never ran, close deadlocked?");
    assert!(!conn.is_open());

    // Still idempotent from the outside.
    conn.close();

    match conn.send(&Frame::heartbeat()) {
        Err(LinkError::ChannelClosed { .. }) => {}
        other => panic!("expected ChannelClosed, got {other:?}"),
    }
}

#[test]
fn test_garbage_on_the_wire_is_skipped() {
    let _guard = TEST_LOCK.lock();
    init_logs();

    let conn = Connection::open_udp("127.0.0.1", 0, None, 1, 1).unwrap();
    let port = conn.local_addr().unwrap().port();
    let (tx, rx) = mpsc::channel();
    conn.subscribe(move |frame| {
        let _ = tx.send(frame.sequence);
    });

    let sock = UdpSocket::bind("127.0.0.1:0").unwrap();
    // Noise before a valid frame in the same datagram: the decoder must
    // resync and still deliver the real frame.
    let mut datagram = vec![0x01, 0x02, 0x03, 0x04];
    datagram.extend_from_slice(&heartbeat_wire(1, 1, 77));
    sock.send_to(&datagram, ("127.0.0.1", port)).unwrap();

    assert_eq!(rx.recv_timeout(RECV_DEADLINE).unwrap(), 77);
    assert_eq!(conn.stats().rx_frames, 1);

    conn.close();
}

// =============================================================================
// URL matrix
// =============================================================================

#[test]
fn test_open_url_udp_with_ids() {
    let _guard = TEST_LOCK.lock();
    init_logs();

    let conn = Connection::open_url("udp://127.0.0.1:0@/?ids=2,241").unwrap();
    assert_eq!(conn.kind(), LinkKind::Udp);
    assert_eq!(conn.system_id(), 2);
    assert_eq!(conn.component_id(), 241);
    assert!(conn.local_addr().unwrap().port() != 0);
    conn.close();
}

#[test]
fn test_open_url_udp_requires_at_separator() {
    let _guard = TEST_LOCK.lock();
    init_logs();

    match Connection::open_url("udp://localhost:14550") {
        Err(LinkError::UrlParse { url, .. }) => assert_eq!(url, "udp://localhost:14550"),
        other => panic!("expected UrlParse, got {other:?}"),
    }
}

#[test]
fn test_open_url_tcp_pair_with_default_ids() {
    let _guard = TEST_LOCK.lock();
    init_logs();

    let server = Connection::open_url("tcp-l://127.0.0.1:0").unwrap();
    assert_eq!(server.kind(), LinkKind::TcpServer);
    let port = server.local_addr().unwrap().port();

    let client = Connection::open_url(&format!("tcp://127.0.0.1:{port}")).unwrap();
    assert_eq!(client.kind(), LinkKind::TcpClient);
    // No ?ids= query: the crate defaults apply.
    assert_eq!(client.system_id(), 1);
    assert_eq!(client.component_id(), 240);

    client.close();
    server.close();
}

#[test]
fn test_open_url_serial_invalid_device() {
    let _guard = TEST_LOCK.lock();
    init_logs();

    match Connection::open_url("serial:///some/magic/not/exist/path:57600") {
        Err(LinkError::SerialOpen { path, .. }) => {
            assert_eq!(path, "/some/magic/not/exist/path");
        }
        other => panic!("expected SerialOpen, got {other:?}"),
    }
}

//! Racing dual-stack connect: one winner at most, and connect failure
//! surfaces as a single close with the OS error.

use std::io::ErrorKind;
use std::sync::mpsc::{Sender, channel};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dsock::{DelegateQueue, ReadData, Socket, SocketDelegate, SocketError, Tag};

const TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug)]
enum Ev {
    Connected,
    Read(Vec<u8>),
    Closed(Option<SocketError>),
}

struct Client {
    events: Sender<Ev>,
}

impl SocketDelegate for Client {
    fn on_connect(&self, _socket: &Socket, _host: &str, _port: u16) {
        self.events.send(Ev::Connected).ok();
    }

    fn on_read(&self, _socket: &Socket, data: ReadData, _tag: Tag) {
        self.events.send(Ev::Read(data.bytes().to_vec())).ok();
    }

    fn on_close(&self, _socket: &Socket, error: Option<SocketError>) {
        self.events.send(Ev::Closed(error)).ok();
    }
}

struct EchoServer {
    peers: Mutex<Vec<Socket>>,
}

impl SocketDelegate for EchoServer {
    fn on_accept(&self, _listener: &Socket, peer: Socket) {
        peer.read(0);
        self.peers.lock().unwrap().push(peer);
    }

    fn on_read(&self, socket: &Socket, data: ReadData, _tag: Tag) {
        socket.write(data.bytes().to_vec(), 0);
        socket.read(0);
    }
}

/// A port that had no listener at resolution time.
fn dead_port() -> u16 {
    let probe = std::net::TcpListener::bind("127.0.0.1:0").expect("probe bind");
    let port = probe.local_addr().unwrap().port();
    drop(probe);
    port
}

fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn refused_connection_reports_one_close_and_no_connect() {
    init_logs();
    let queue = DelegateQueue::new("t-refused");
    let (events_tx, events_rx) = channel();
    let client = Arc::new(Client { events: events_tx });

    let socket = Socket::new(&client, &queue);
    socket.connect("127.0.0.1", dead_port()).expect("connect");

    match events_rx.recv_timeout(TIMEOUT).unwrap() {
        Ev::Closed(Some(error)) => {
            assert_eq!(error.io_kind(), Some(ErrorKind::ConnectionRefused));
        }
        other => panic!("expected a refused close first, got {other:?}"),
    }
    assert!(
        events_rx.recv_timeout(Duration::from_millis(500)).is_err(),
        "saw events after the terminal close"
    );
}

#[test]
fn exhausting_both_families_closes_exactly_once() {
    init_logs();
    let queue = DelegateQueue::new("t-exhausted");
    let (events_tx, events_rx) = channel();
    let client = Arc::new(Client { events: events_tx });

    // "localhost" typically resolves to both ::1 and 127.0.0.1; every
    // attempt fails, and the pending-attempt counter must collapse them
    // into one terminal close.
    let socket = Socket::new(&client, &queue);
    socket.connect("localhost", dead_port()).expect("connect");

    match events_rx.recv_timeout(TIMEOUT).unwrap() {
        Ev::Closed(Some(_)) => {}
        other => panic!("expected a failed close, got {other:?}"),
    }
    assert!(
        events_rx.recv_timeout(Duration::from_millis(500)).is_err(),
        "a losing attempt produced a second event"
    );
}

#[test]
fn race_promotes_exactly_one_winner() {
    init_logs();
    let queue = DelegateQueue::new("t-race-winner");
    let (events_tx, events_rx) = channel();
    let server = Arc::new(EchoServer {
        peers: Mutex::new(Vec::new()),
    });
    let client = Arc::new(Client { events: events_tx });

    let listener = Socket::new(&server, &queue);
    listener.listen(0).expect("listen");
    let port = listener.local_addr().unwrap().port();

    let socket = Socket::new(&client, &queue);
    socket.connect("localhost", port).expect("connect");

    match events_rx.recv_timeout(TIMEOUT).unwrap() {
        Ev::Connected => {}
        other => panic!("expected the connect first, got {other:?}"),
    }
    // Give the staggered attempt ample time to land and (wrongly) promote.
    assert!(
        events_rx.recv_timeout(Duration::from_millis(500)).is_err(),
        "a second attempt completed after the winner"
    );

    // The promoted fd is the live one: a round trip works.
    socket.write(b"ping".to_vec(), 1);
    socket.read_exact(4, 2);
    match events_rx.recv_timeout(TIMEOUT).unwrap() {
        Ev::Read(data) => assert_eq!(data, b"ping"),
        other => panic!("expected the echo, got {other:?}"),
    }
}

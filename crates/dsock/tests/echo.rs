//! End-to-end echo: a listener reads best-effort chunks and writes them
//! back; the client gets its bytes back verbatim before any close.

use std::sync::mpsc::{Sender, channel};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dsock::{DelegateQueue, ReadData, Socket, SocketDelegate, SocketError, Tag};

const TIMEOUT: Duration = Duration::from_secs(10);
const PAYLOAD: [u8; 10] = [0, 1, 1, 2, 3, 5, 8, 13, 21, 34];

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

#[derive(Debug)]
enum Ev {
    Echoed(Vec<u8>),
    Closed(bool),
}

struct Client {
    events: Sender<Ev>,
}

impl SocketDelegate for Client {
    fn on_connect(&self, socket: &Socket, _host: &str, _port: u16) {
        socket.write(PAYLOAD.to_vec(), 1);
        socket.read_exact(PAYLOAD.len(), 2);
    }

    fn on_read(&self, _socket: &Socket, data: ReadData, tag: Tag) {
        assert_eq!(tag, 2);
        self.events.send(Ev::Echoed(data.bytes().to_vec())).ok();
    }

    fn on_close(&self, _socket: &Socket, error: Option<SocketError>) {
        self.events.send(Ev::Closed(error.is_some())).ok();
    }
}

#[test]
fn echo_round_trip() {
    let queue = DelegateQueue::new("t-echo");
    let (events_tx, events_rx) = channel();
    let server = Arc::new(EchoServer {
        peers: Mutex::new(Vec::new()),
    });
    let client = Arc::new(Client { events: events_tx });

    let listener = Socket::new(&server, &queue);
    listener.listen(0).expect("listen");
    let port = listener.local_addr().unwrap().port();

    let socket = Socket::new(&client, &queue);
    socket.connect("127.0.0.1", port).expect("connect");

    // The identical bytes come back before any close event.
    match events_rx.recv_timeout(TIMEOUT).unwrap() {
        Ev::Echoed(data) => assert_eq!(data, PAYLOAD),
        other => panic!("expected the echo before any close, got {other:?}"),
    }

    socket.disconnect();
    match events_rx.recv_timeout(TIMEOUT).unwrap() {
        Ev::Closed(errored) => assert!(!errored),
        other => panic!("expected the close, got {other:?}"),
    }
}

//! EOF with an in-flight sized read: the truncated completion carries the
//! bytes transferred so far, followed by exactly one clean close.

use std::sync::mpsc::{Sender, channel};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dsock::{DelegateQueue, ReadData, Socket, SocketDelegate, SocketError, Tag};

const TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug)]
enum Ev {
    Read(Vec<u8>),
    Closed(Option<String>),
}

struct Server {
    events: Sender<Ev>,
    accepted: Mutex<Option<Socket>>,
}

impl SocketDelegate for Server {
    fn on_accept(&self, _listener: &Socket, peer: Socket) {
        peer.read_exact(100, 5);
        self.accepted.lock().unwrap().replace(peer);
    }

    fn on_read(&self, _socket: &Socket, data: ReadData, tag: Tag) {
        assert_eq!(tag, 5);
        self.events.send(Ev::Read(data.bytes().to_vec())).ok();
    }

    fn on_close(&self, _socket: &Socket, error: Option<SocketError>) {
        self.events
            .send(Ev::Closed(error.map(|e| e.to_string())))
            .ok();
    }
}

struct Client;

impl SocketDelegate for Client {
    fn on_connect(&self, socket: &Socket, _host: &str, _port: u16) {
        socket.write(b"ten bytes!".to_vec(), 0);
        // Flush the queued write, then close; the peer sees 10 bytes + EOF.
        socket.disconnect_after_writing();
    }
}

#[test]
fn truncated_sized_read_then_clean_close() {
    let queue = DelegateQueue::new("t-eof");
    let (server_tx, server_rx) = channel();
    let server = Arc::new(Server {
        events: server_tx,
        accepted: Mutex::new(None),
    });
    let client = Arc::new(Client);

    let listener = Socket::new(&server, &queue);
    listener.listen(0).expect("listen");
    let port = listener.local_addr().unwrap().port();
    let client_socket = Socket::new(&client, &queue);
    client_socket.connect("127.0.0.1", port).expect("connect");

    // Exactly one completion with the 10 transferred bytes (not 100), then
    // exactly one close with no error.
    match server_rx.recv_timeout(TIMEOUT).unwrap() {
        Ev::Read(data) => assert_eq!(data, b"ten bytes!"),
        other => panic!("expected the truncated read first, got {other:?}"),
    }
    match server_rx.recv_timeout(TIMEOUT).unwrap() {
        Ev::Closed(error) => assert_eq!(error, None),
        other => panic!("expected the close, got {other:?}"),
    }
    assert!(
        server_rx.recv_timeout(Duration::from_millis(500)).is_err(),
        "saw events after the terminal close"
    );
}

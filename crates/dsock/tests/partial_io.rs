//! Partial-transfer progress reporting on both sides of a large transfer.

use std::sync::mpsc::{Sender, channel};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dsock::{DelegateQueue, ReadData, Socket, SocketDelegate, Tag};

const TIMEOUT: Duration = Duration::from_secs(30);
// Large enough that no single read() or write() call can move it all, even
// with generously autotuned socket buffers.
const LEN: usize = 64 * 1024 * 1024;

#[derive(Debug)]
enum Ev {
    PartialRead(usize),
    Read(usize),
    PartialWrite(usize),
    Wrote,
}

struct Server {
    events: Sender<Ev>,
    accepted: Mutex<Option<Socket>>,
}

impl SocketDelegate for Server {
    fn on_accept(&self, _listener: &Socket, peer: Socket) {
        peer.read_exact(LEN, 0);
        self.accepted.lock().unwrap().replace(peer);
    }

    fn on_partial_read(&self, _socket: &Socket, total: usize, _tag: Tag) {
        self.events.send(Ev::PartialRead(total)).ok();
    }

    fn on_read(&self, _socket: &Socket, data: ReadData, _tag: Tag) {
        self.events.send(Ev::Read(data.len())).ok();
    }
}

struct Client {
    events: Sender<Ev>,
}

impl SocketDelegate for Client {
    fn on_connect(&self, socket: &Socket, _host: &str, _port: u16) {
        socket.write(vec![0x5a; LEN], 1);
    }

    fn on_partial_write(&self, _socket: &Socket, total: usize, _tag: Tag) {
        self.events.send(Ev::PartialWrite(total)).ok();
    }

    fn on_write(&self, _socket: &Socket, tag: Tag) {
        assert_eq!(tag, 1);
        self.events.send(Ev::Wrote).ok();
    }
}

#[test]
fn large_transfer_reports_progress() {
    let queue = DelegateQueue::new("t-partial");
    let (server_tx, server_rx) = channel();
    let (client_tx, client_rx) = channel();
    let server = Arc::new(Server {
        events: server_tx,
        accepted: Mutex::new(None),
    });
    let client = Arc::new(Client { events: client_tx });

    let listener = Socket::new(&server, &queue);
    listener.listen(0).expect("listen");
    let port = listener.local_addr().unwrap().port();
    let client_socket = Socket::new(&client, &queue);
    client_socket.connect("127.0.0.1", port).expect("connect");

    // Writer: at least one strictly-partial progress report, monotonic
    // totals, then the final completion.
    let mut partial_writes = 0;
    let mut last_total = 0;
    loop {
        match client_rx.recv_timeout(TIMEOUT).unwrap() {
            Ev::PartialWrite(total) => {
                assert!(total > 0 && total < LEN, "bad partial write total {total}");
                assert!(total >= last_total, "write progress went backwards");
                last_total = total;
                partial_writes += 1;
            }
            Ev::Wrote => break,
            other => panic!("unexpected client event {other:?}"),
        }
    }
    assert!(partial_writes >= 1, "no partial write progress seen");

    // Reader: same shape, final completion carries the full length.
    let mut partial_reads = 0;
    let mut last_total = 0;
    loop {
        match server_rx.recv_timeout(TIMEOUT).unwrap() {
            Ev::PartialRead(total) => {
                assert!(total > 0 && total < LEN, "bad partial read total {total}");
                assert!(total >= last_total, "read progress went backwards");
                last_total = total;
                partial_reads += 1;
            }
            Ev::Read(len) => {
                assert_eq!(len, LEN);
                break;
            }
            other => panic!("unexpected server event {other:?}"),
        }
    }
    assert!(partial_reads >= 1, "no partial read progress seen");
}

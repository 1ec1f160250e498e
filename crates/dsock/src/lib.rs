//! Event-driven, non-blocking TCP socket engine.
//!
//! `dsock` turns OS readiness notifications into an ordered stream of
//! read/write completions behind a queue-based API: callers say "read N
//! bytes" or "write this buffer" and a delegate receives the completions,
//! instead of anyone doing raw byte-level I/O. It is the primitive a
//! higher-level server or client builds on; the `dsock-echo` crate in this
//! workspace is the canonical consumer.
//!
//! Each socket is driven by a single serialized task: public calls enqueue
//! their effect and return immediately, readiness events and queued
//! operations never interleave concurrently, and completions are delivered
//! FIFO per socket on a caller-supplied [`DelegateQueue`].
//!
//! ```no_run
//! use std::sync::{Arc, Mutex};
//! use dsock::{DelegateQueue, Socket, SocketDelegate, ReadData, Tag};
//!
//! // An echo server: the delegate owns the accepted sockets (dropping the
//! // last handle to a socket closes it).
//! struct Echo {
//!     peers: Mutex<Vec<Socket>>,
//! }
//! impl SocketDelegate for Echo {
//!     fn on_accept(&self, _listener: &Socket, peer: Socket) {
//!         peer.read(0);
//!         self.peers.lock().unwrap().push(peer);
//!     }
//!     fn on_read(&self, socket: &Socket, data: ReadData, _tag: Tag) {
//!         socket.write(data.bytes().to_vec(), 0);
//!         socket.read(0);
//!     }
//! }
//!
//! let delegate = Arc::new(Echo { peers: Mutex::new(Vec::new()) });
//! let queue = DelegateQueue::new("echo-delegate");
//! let listener = Socket::new(&delegate, &queue);
//! listener.listen(4444).expect("listen");
//! ```

mod connect;
mod delegate;
mod error;
mod packet;
mod queue;
mod raw;
mod socket;
mod spawn;
mod state;

pub use connect::{ConnectOptions, ControlChannelProvider, DEFAULT_IPV4_STAGGER};
pub use delegate::{DelegateQueue, SocketDelegate, SpawnFunc};
pub use error::SocketError;
pub use packet::{ReadData, Tag};
pub use socket::{Socket, SocketId};
pub use state::SocketState;

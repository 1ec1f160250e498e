//! Delegate callback surface and the queue completions are delivered on.
//!
//! The engine holds only a [`Weak`] reference to the delegate: callbacks are
//! bound at delivery time, so once the caller drops its `Arc` no further
//! callback can fire into it. Delivery order on one queue is FIFO, which is
//! what preserves read-completion and write-completion ordering per socket.

use std::sync::{Arc, Weak};

use crate::error::SocketError;
use crate::packet::{ReadData, Tag};
use crate::socket::Socket;

/// Callbacks a socket reports its completions through. Every method has a
/// default empty body; implement whichever subset you care about.
pub trait SocketDelegate: Send + Sync {
    /// A read request completed; `data` carries exactly the delivered bytes.
    fn on_read(&self, _socket: &Socket, _data: ReadData, _tag: Tag) {}

    /// A sized read made progress without finishing; `total` is bytes so far.
    fn on_partial_read(&self, _socket: &Socket, _total: usize, _tag: Tag) {}

    /// A write request was fully flushed to the kernel.
    fn on_write(&self, _socket: &Socket, _tag: Tag) {}

    /// A write made progress without finishing; `total` is bytes sent so far.
    fn on_partial_write(&self, _socket: &Socket, _total: usize, _tag: Tag) {}

    /// Terminal: fires exactly once per socket lifetime, with the error that
    /// ended it (`None` for clean EOF or explicit disconnect).
    fn on_close(&self, _socket: &Socket, _error: Option<SocketError>) {}

    /// A client-role socket finished connecting.
    fn on_connect(&self, _socket: &Socket, _host: &str, _port: u16) {}

    /// A listening socket accepted a peer. The new socket is handed over to
    /// the delegate, which owns it from here on.
    fn on_accept(&self, _socket: &Socket, _new_socket: Socket) {}
}

pub type SpawnFunc = Box<dyn FnOnce() + Send>;

/// An ordered delivery context for delegate callbacks: a named thread
/// draining a closure queue. Clone it to share one context between sockets;
/// completions for any one socket stay FIFO.
#[derive(Clone)]
pub struct DelegateQueue {
    tx: flume::Sender<SpawnFunc>,
}

impl DelegateQueue {
    pub fn new(name: &str) -> Self {
        let (tx, rx) = flume::unbounded::<SpawnFunc>();
        std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                while let Ok(func) = rx.recv() {
                    func();
                }
            })
            .expect("failed to spawn delegate queue thread");
        Self { tx }
    }

    /// Enqueue a closure for execution on this queue's thread.
    pub fn dispatch(&self, func: SpawnFunc) {
        self.tx.send(func).ok();
    }
}

/// A socket's link to its delegate: the weak reference plus the queue its
/// callbacks are marshalled onto.
#[derive(Clone)]
pub(crate) struct DelegateHandle {
    pub delegate: Weak<dyn SocketDelegate>,
    pub queue: DelegateQueue,
}

impl DelegateHandle {
    pub fn new(delegate: Weak<dyn SocketDelegate>, queue: DelegateQueue) -> Self {
        Self { delegate, queue }
    }

    /// Queue `func` for delivery; it runs only if the delegate is still
    /// alive at delivery time.
    pub fn notify(&self, func: impl FnOnce(&dyn SocketDelegate) + Send + 'static) {
        let weak = self.delegate.clone();
        self.queue.dispatch(Box::new(move || {
            if let Some(delegate) = weak.upgrade() {
                func(delegate.as_ref());
            }
        }));
    }
}

/// Downgrade helper used by the socket constructors.
pub(crate) fn downgrade<D: SocketDelegate + 'static>(delegate: &Arc<D>) -> Weak<dyn SocketDelegate> {
    let arc: Arc<dyn SocketDelegate> = delegate.clone();
    let weak: Weak<dyn SocketDelegate> = Arc::downgrade(&arc);
    weak
}

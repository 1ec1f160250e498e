//! The socket handle and its serialized state machine.
//!
//! Every [`Socket`] is backed by one task on the engine executor. Public
//! calls send commands onto the socket's channel and return immediately;
//! readiness events and commands are consumed by that single task, so the
//! state machine never sees concurrent mutation. Completion callbacks go out
//! through the socket's [`DelegateQueue`], FIFO per socket.

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::fd::{AsFd, OwnedFd};
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use smol::Async;
use smol::future;

use crate::connect::{self, ConnectOptions, ControlChannelProvider};
use crate::delegate::{DelegateHandle, DelegateQueue, SocketDelegate, downgrade};
use crate::error::SocketError;
use crate::packet::{ReadData, ReadRequest, Tag, WriteRequest};
use crate::queue::RequestQueue;
use crate::raw::{self, RawStream};
use crate::state::{CloseCondition, SocketState};

/// Monotonic per-process socket id, usable as a map key by delegates that
/// track many connections.
pub type SocketId = usize;

static NEXT_SOCKET_ID: AtomicUsize = AtomicUsize::new(0);

pub(crate) enum Command {
    Listener(Async<TcpListener>),
    BeginConnect {
        host: String,
        port: u16,
    },
    Resolved {
        v6: Option<SocketAddr>,
        v4: Option<SocketAddr>,
        stagger: Duration,
    },
    ResolveFailed(SocketError),
    Attempt(io::Result<Async<TcpStream>>),
    /// Adopt a control-channel fd as this socket's stream and announce the
    /// connect.
    Promote {
        fd: OwnedFd,
        name: String,
    },
    /// Adopt an accepted peer fd; already connected, nothing to announce.
    Adopt {
        fd: OwnedFd,
        host: String,
        port: u16,
    },
    Read(ReadRequest),
    Write(WriteRequest),
    Disconnect,
    DisconnectAfter(CloseCondition),
}

struct Shared {
    id: SocketId,
    tx: flume::Sender<Command>,
    state: AtomicU8,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl Shared {
    fn state(&self) -> SocketState {
        SocketState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: SocketState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Claim a lifecycle transition from one of `from` to `to`; returns the
    /// prior state on success so failed setup can restore it.
    fn reserve_state(&self, from: &[SocketState], to: SocketState) -> Result<SocketState, SocketState> {
        for &state in from {
            if self
                .state
                .compare_exchange(state as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Ok(state);
            }
        }
        Err(self.state())
    }
}

/// Handle to one engine socket. Cheap to clone; all clones address the same
/// underlying connection. Dropping the last handle closes the socket.
#[derive(Clone)]
pub struct Socket {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Socket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Socket")
            .field("id", &self.shared.id)
            .field("state", &self.shared.state())
            .finish()
    }
}

impl Socket {
    /// Create a socket reporting to `delegate` on `queue`. The engine keeps
    /// only a weak reference to the delegate.
    pub fn new<D: SocketDelegate + 'static>(delegate: &Arc<D>, queue: &DelegateQueue) -> Socket {
        Socket::with_delegate(downgrade(delegate), queue)
    }

    /// As [`Socket::new`], from an already-downgraded delegate reference.
    pub fn with_delegate(delegate: Weak<dyn SocketDelegate>, queue: &DelegateQueue) -> Socket {
        let (tx, rx) = flume::unbounded();
        let shared = Arc::new(Shared {
            id: NEXT_SOCKET_ID.fetch_add(1, Ordering::Relaxed),
            tx,
            state: AtomicU8::new(SocketState::Initial as u8),
            local_addr: Mutex::new(None),
        });
        let core = SocketCore::new(
            shared.id,
            Arc::downgrade(&shared),
            DelegateHandle::new(delegate, queue.clone()),
        );
        crate::spawn::spawn(core.run(rx)).detach();
        Socket { shared }
    }

    pub fn id(&self) -> SocketId {
        self.shared.id
    }

    /// Snapshot of the lifecycle state. Transitions performed by the socket
    /// task become visible here asynchronously.
    pub fn state(&self) -> SocketState {
        self.shared.state()
    }

    /// The bound address after a successful [`listen`](Socket::listen);
    /// useful with port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.shared.local_addr.lock().unwrap()
    }

    /// Bind a dual-stack listener on `port` and start accepting. Binding is
    /// synchronous; accepted peers arrive via
    /// [`on_accept`](SocketDelegate::on_accept).
    pub fn listen(&self, port: u16) -> Result<(), SocketError> {
        self.shared
            .reserve_state(&[SocketState::Initial], SocketState::Listening)
            .map_err(SocketError::InvalidState)?;
        match connect::bind_listener(port) {
            Ok(listener) => {
                *self.shared.local_addr.lock().unwrap() = listener.get_ref().local_addr().ok();
                self.shared.tx.send(Command::Listener(listener)).ok();
                Ok(())
            }
            Err(err) => {
                if matches!(err, SocketError::Nonblocking(_)) {
                    self.shared.set_state(SocketState::Problematic);
                } else {
                    self.shared.set_state(SocketState::Initial);
                }
                Err(err)
            }
        }
    }

    /// Racing dual-stack connect with default options: IPv6 immediately,
    /// IPv4 after a short stagger, first success wins. Completion arrives
    /// via [`on_connect`](SocketDelegate::on_connect); failure of every
    /// attempt via [`on_close`](SocketDelegate::on_close).
    pub fn connect(&self, host: &str, port: u16) -> Result<(), SocketError> {
        self.connect_with_options(host, port, ConnectOptions::default())
    }

    pub fn connect_with_options(
        &self,
        host: &str,
        port: u16,
        options: ConnectOptions,
    ) -> Result<(), SocketError> {
        self.shared
            .reserve_state(
                &[SocketState::Initial, SocketState::Closed],
                SocketState::Connecting,
            )
            .map_err(SocketError::InvalidState)?;
        self.shared
            .tx
            .send(Command::BeginConnect {
                host: host.to_string(),
                port,
            })
            .ok();
        connect::spawn_resolver(self.shared.tx.clone(), host.to_string(), port, options);
        Ok(())
    }

    /// Connect to a named control channel through `provider`. Negotiation
    /// failures are returned synchronously; the adopted fd then follows the
    /// normal `Connecting → Connected` path with `port` reported as 0.
    pub fn connect_by_name(
        &self,
        provider: &dyn ControlChannelProvider,
        name: &str,
    ) -> Result<(), SocketError> {
        let prior = self
            .shared
            .reserve_state(
                &[SocketState::Initial, SocketState::Closed],
                SocketState::Connecting,
            )
            .map_err(SocketError::InvalidState)?;
        match provider.connect(name) {
            Ok(fd) => {
                self.shared
                    .tx
                    .send(Command::Promote {
                        fd,
                        name: name.to_string(),
                    })
                    .ok();
                Ok(())
            }
            Err(source) => {
                self.shared.set_state(prior);
                Err(SocketError::ControlChannel(source))
            }
        }
    }

    /// Best-effort read: completes after one successful read of whatever is
    /// available. No-op once the socket is closing.
    pub fn read(&self, tag: Tag) {
        self.enqueue_read(ReadRequest::available(tag));
    }

    /// Sized read into an engine-owned buffer; completes once `len` bytes
    /// have accumulated (or the peer closes early, delivering the bytes
    /// transferred so far). `len == 0` behaves like [`read`](Socket::read).
    pub fn read_exact(&self, len: usize, tag: Tag) {
        self.enqueue_read(ReadRequest::sized(len, tag));
    }

    /// Sized read into a caller-owned buffer starting at `offset`. The
    /// buffer rides along and is returned in the completion payload.
    ///
    /// # Panics
    /// If `buffer.len() < offset + len`.
    pub fn read_exact_into(&self, len: usize, buffer: Vec<u8>, offset: usize, tag: Tag) {
        assert!(
            buffer.len() >= offset + len,
            "read buffer too small: {} < {} + {}",
            buffer.len(),
            offset,
            len
        );
        self.enqueue_read(ReadRequest::sized_into(len, buffer, offset, tag));
    }

    fn enqueue_read(&self, request: ReadRequest) {
        if !self.state().is_before_close() {
            return;
        }
        self.shared.tx.send(Command::Read(request)).ok();
    }

    /// Queue `data` for writing. No-op once the socket is closing.
    pub fn write(&self, data: Vec<u8>, tag: Tag) {
        if !self.state().is_before_close() {
            return;
        }
        self.shared
            .tx
            .send(Command::Write(WriteRequest::new(data, tag)))
            .ok();
    }

    /// Close now, discarding queued work. Queued requests never complete;
    /// `on_close` fires exactly once.
    pub fn disconnect(&self) {
        self.shared.tx.send(Command::Disconnect).ok();
    }

    /// Close once every queued read has completed.
    pub fn disconnect_after_reading(&self) {
        self.shared
            .tx
            .send(Command::DisconnectAfter(CloseCondition::AfterReads))
            .ok();
    }

    /// Close once every queued write has been flushed.
    pub fn disconnect_after_writing(&self) {
        self.shared
            .tx
            .send(Command::DisconnectAfter(CloseCondition::AfterWrites))
            .ok();
    }

    /// Close once both queues have drained.
    pub fn disconnect_after_reading_and_writing(&self) {
        self.shared
            .tx
            .send(Command::DisconnectAfter(CloseCondition::AfterBoth))
            .ok();
    }
}

enum Role {
    Idle,
    Listener(Async<TcpListener>),
    Stream(Async<RawStream>),
    Done,
}

enum Wake {
    Cmd(Command),
    HandlesGone,
    Acceptable,
    Readable,
    Writable,
}

enum ReadOutcome {
    Sized(io::Result<usize>),
    Available(io::Result<usize>, Vec<u8>),
    AllocFailed,
}

struct SocketCore {
    id: SocketId,
    shared: Weak<Shared>,
    delegate: DelegateHandle,
    state: SocketState,
    role: Role,
    read_queue: RequestQueue<ReadRequest>,
    write_queue: RequestQueue<WriteRequest>,
    current_read: Option<ReadRequest>,
    current_write: Option<WriteRequest>,
    close_condition: CloseCondition,
    read_armed: bool,
    write_armed: bool,
    accept_armed: bool,
    pending_connects: usize,
    connect_target: Option<(String, u16)>,
    teardown_done: bool,
}

impl SocketCore {
    fn new(id: SocketId, shared: Weak<Shared>, delegate: DelegateHandle) -> Self {
        Self {
            id,
            shared,
            delegate,
            state: SocketState::Initial,
            role: Role::Idle,
            read_queue: RequestQueue::new(),
            write_queue: RequestQueue::new(),
            current_read: None,
            current_write: None,
            close_condition: CloseCondition::None,
            read_armed: false,
            write_armed: false,
            accept_armed: false,
            pending_connects: 0,
            connect_target: None,
            teardown_done: false,
        }
    }

    async fn run(mut self, commands: flume::Receiver<Command>) {
        loop {
            match self.next_wake(&commands).await {
                Wake::Cmd(cmd) => self.handle_command(cmd),
                Wake::HandlesGone => {
                    // Every public handle is gone, so no callback could be
                    // observed; just release the fd.
                    log::trace!("socket {}: all handles dropped", self.id);
                    self.role = Role::Done;
                    return;
                }
                Wake::Acceptable => self.on_acceptable(),
                Wake::Readable => self.on_readable(),
                Wake::Writable => self.on_writable(),
            }
        }
    }

    /// Wait for the next command or armed readiness condition. Commands win
    /// ties; a disarmed condition ("suspended source") is simply not polled,
    /// which is the backpressure mechanism.
    async fn next_wake(&self, commands: &flume::Receiver<Command>) -> Wake {
        let cmd = async {
            match commands.recv_async().await {
                Ok(cmd) => Wake::Cmd(cmd),
                Err(_) => Wake::HandlesGone,
            }
        };
        let acceptable = async {
            match &self.role {
                Role::Listener(listener) if self.accept_armed => {
                    let _ = listener.readable().await;
                    Wake::Acceptable
                }
                _ => future::pending::<Wake>().await,
            }
        };
        let readable = async {
            match &self.role {
                Role::Stream(stream) if self.read_armed => {
                    let _ = stream.readable().await;
                    Wake::Readable
                }
                _ => future::pending::<Wake>().await,
            }
        };
        let writable = async {
            match &self.role {
                Role::Stream(stream) if self.write_armed => {
                    let _ = stream.writable().await;
                    Wake::Writable
                }
                _ => future::pending::<Wake>().await,
            }
        };
        future::or(cmd, future::or(acceptable, future::or(readable, writable))).await
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Listener(listener) => {
                log::debug!(
                    "socket {}: listening on {:?}",
                    self.id,
                    listener.get_ref().local_addr().ok()
                );
                self.role = Role::Listener(listener);
                self.accept_armed = true;
                self.set_state(SocketState::Listening);
            }
            Command::BeginConnect { host, port } => {
                self.reset_for_connect();
                self.connect_target = Some((host, port));
            }
            Command::Resolved { v6, v4, stagger } => self.on_resolved(v6, v4, stagger),
            Command::ResolveFailed(err) => {
                if self.state == SocketState::Connecting {
                    self.teardown(Some(err));
                }
            }
            Command::Attempt(result) => self.on_attempt(result),
            Command::Promote { fd, name } => {
                self.reset_for_connect();
                self.connect_target = Some((name, 0));
                self.install_stream(fd, true);
            }
            Command::Adopt { fd, host, port } => {
                self.reset_for_connect();
                self.connect_target = Some((host, port));
                self.install_stream(fd, false);
            }
            Command::Read(request) => {
                if self.state.is_before_close() {
                    self.read_queue.enqueue(request);
                    self.read_armed = true;
                }
            }
            Command::Write(request) => {
                if self.state.is_before_close() {
                    self.write_queue.enqueue(request);
                    self.write_armed = true;
                }
            }
            Command::Disconnect => {
                if self.state.is_active() || self.state == SocketState::Listening {
                    self.set_state(SocketState::Closing);
                    self.teardown(None);
                }
            }
            Command::DisconnectAfter(condition) => {
                if self.state.is_active() {
                    self.set_state(SocketState::Closing);
                    self.close_condition = condition;
                    // Already drained? Close right away instead of waiting
                    // for a readiness event that may never come.
                    if self.close_condition_met() {
                        self.teardown(None);
                    }
                }
            }
        }
    }

    // ── connect path ────────────────────────────────────────────────

    fn reset_for_connect(&mut self) {
        self.read_queue.clear();
        self.write_queue.clear();
        self.current_read = None;
        self.current_write = None;
        self.close_condition = CloseCondition::None;
        self.read_armed = false;
        self.write_armed = false;
        self.accept_armed = false;
        self.pending_connects = 0;
        self.connect_target = None;
        self.teardown_done = false;
        self.role = Role::Idle;
        self.set_state(SocketState::Connecting);
    }

    fn on_resolved(
        &mut self,
        v6: Option<SocketAddr>,
        v4: Option<SocketAddr>,
        stagger: Duration,
    ) {
        if self.state != SocketState::Connecting {
            return;
        }
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        self.pending_connects = usize::from(v6.is_some()) + usize::from(v4.is_some());
        if self.pending_connects == 0 {
            let host = self
                .connect_target
                .as_ref()
                .map(|(host, _)| host.clone())
                .unwrap_or_default();
            self.teardown(Some(SocketError::NoAddresses(host)));
            return;
        }
        log::trace!(
            "socket {}: racing {} connect attempt(s)",
            self.id,
            self.pending_connects
        );
        if let Some(addr) = v6 {
            connect::spawn_attempt(shared.tx.clone(), addr, None);
        }
        if let Some(addr) = v4 {
            connect::spawn_attempt(shared.tx.clone(), addr, Some(stagger));
        }
    }

    fn on_attempt(&mut self, result: io::Result<Async<TcpStream>>) {
        match result {
            Ok(stream) => {
                if self.state != SocketState::Connecting {
                    // A sibling attempt already won (or the caller moved
                    // on); close the loser.
                    drop(stream);
                    return;
                }
                match stream.into_inner() {
                    Ok(stream) => self.install_stream(OwnedFd::from(stream), true),
                    Err(err) => self.teardown(Some(SocketError::Connect(err))),
                }
            }
            Err(err) => {
                if self.state != SocketState::Connecting {
                    return;
                }
                self.pending_connects = self.pending_connects.saturating_sub(1);
                log::debug!(
                    "socket {}: connect attempt failed ({} left): {err}",
                    self.id,
                    self.pending_connects
                );
                if self.pending_connects == 0 {
                    self.teardown(Some(SocketError::Connect(err)));
                }
            }
        }
    }

    /// Wrap `fd` as this socket's stream, arm both readiness conditions and
    /// move to `Connected`. With `announce`, also deliver `on_connect`.
    fn install_stream(&mut self, fd: OwnedFd, announce: bool) {
        if let Err(err) = raw::set_nonblocking(fd.as_fd()) {
            self.fail_setup(SocketError::Nonblocking(err));
            return;
        }
        if let Err(err) = raw::set_nosigpipe(fd.as_fd()) {
            log::debug!("socket {}: failed to disable SIGPIPE: {err}", self.id);
        }
        let stream = match Async::new(RawStream::new(fd)) {
            Ok(stream) => stream,
            Err(err) => {
                self.fail_setup(SocketError::Nonblocking(err));
                return;
            }
        };
        self.role = Role::Stream(stream);
        self.set_state(SocketState::Connected);
        self.read_armed = true;
        self.write_armed = true;
        if announce {
            if let Some((host, port)) = self.connect_target.clone() {
                log::debug!("socket {}: connected to {host}:{port}", self.id);
                self.notify_connect(host, port);
            }
        }
    }

    /// A required setup step failed; the socket is unusable. `Problematic`
    /// is absorbing, but the terminal close callback still fires.
    fn fail_setup(&mut self, err: SocketError) {
        self.set_state(SocketState::Problematic);
        self.teardown(Some(err));
    }

    // ── accept path ─────────────────────────────────────────────────

    fn on_acceptable(&mut self) {
        let mut accepted = Vec::new();
        {
            let Role::Listener(listener) = &self.role else {
                return;
            };
            let listener = listener.get_ref();
            loop {
                match listener.accept() {
                    Ok(pair) => accepted.push(pair),
                    Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                    Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                    Err(err) => {
                        log::error!("socket {}: accept failed: {err}", self.id);
                        break;
                    }
                }
            }
        }
        for (stream, peer) in accepted {
            self.adopt_child(stream, peer);
        }
        self.accept_armed = true;
    }

    fn adopt_child(&mut self, stream: TcpStream, peer: SocketAddr) {
        let child = Socket::with_delegate(self.delegate.delegate.clone(), &self.delegate.queue);
        log::debug!(
            "socket {}: accepted peer {peer} as socket {}",
            self.id,
            child.id()
        );
        child
            .shared
            .tx
            .send(Command::Adopt {
                fd: OwnedFd::from(stream),
                host: peer.ip().to_string(),
                port: peer.port(),
            })
            .ok();
        self.notify_accept(child);
    }

    // ── read path ───────────────────────────────────────────────────

    fn on_readable(&mut self) {
        let hint = match &self.role {
            Role::Stream(stream) => stream.get_ref().bytes_available().unwrap_or(0),
            _ => return,
        };
        if hint == 0 {
            self.read_eof();
        } else {
            self.service_read(hint);
        }
    }

    fn service_read(&mut self, hint: usize) {
        if self.current_read.is_none() && self.read_queue.is_empty() {
            // Backpressure: nobody wants data; stop listening for readable.
            self.read_armed = false;
            if self.close_condition_met() {
                self.teardown(None);
            }
            return;
        }
        if self.current_read.is_none() {
            self.current_read = self.read_queue.pop_front();
        }
        let Some(mut request) = self.current_read.take() else {
            return;
        };

        let outcome = {
            let Role::Stream(stream) = &self.role else {
                self.current_read = Some(request);
                return;
            };
            let stream = stream.get_ref();
            if request.is_sized() {
                ReadOutcome::Sized(stream.read(request.space_mut()))
            } else {
                let mut buf = Vec::new();
                if buf.try_reserve_exact(hint).is_err() {
                    ReadOutcome::AllocFailed
                } else {
                    buf.resize(hint, 0);
                    let result = stream.read(&mut buf);
                    ReadOutcome::Available(result, buf)
                }
            }
        };

        let mut error: Option<SocketError> = None;
        let mut eof = false;
        match outcome {
            ReadOutcome::AllocFailed => {
                self.teardown(Some(SocketError::BufferAlloc));
                return;
            }
            ReadOutcome::Sized(Ok(0)) => {
                eof = true;
                self.current_read = Some(request);
            }
            ReadOutcome::Sized(Ok(n)) => {
                request.advance(n);
                let tag = request.tag;
                if request.is_full() {
                    self.notify_read(request.into_data(), tag);
                } else {
                    self.notify_partial_read(request.filled(), tag);
                    self.current_read = Some(request);
                }
            }
            ReadOutcome::Sized(Err(err)) if err.kind() == io::ErrorKind::WouldBlock => {
                self.current_read = Some(request);
            }
            ReadOutcome::Sized(Err(err)) => {
                error = Some(SocketError::Read(err));
                self.current_read = Some(request);
            }
            ReadOutcome::Available(Ok(0), _) => {
                eof = true;
                self.current_read = Some(request);
            }
            ReadOutcome::Available(Ok(n), mut buf) => {
                // One-shot: deliver exactly what this read produced.
                buf.truncate(n);
                self.notify_read(ReadData::EngineOwned(buf), request.tag);
            }
            ReadOutcome::Available(Err(err), _) if err.kind() == io::ErrorKind::WouldBlock => {
                self.current_read = Some(request);
            }
            ReadOutcome::Available(Err(err), _) => {
                error = Some(SocketError::Read(err));
                self.current_read = Some(request);
            }
        }

        if self.current_read.is_none() && self.read_queue.is_empty() && self.close_condition_met()
        {
            self.teardown(error.take());
        }

        if eof {
            self.read_eof();
        } else if let Some(err) = error {
            self.teardown(Some(err));
        } else if !self.teardown_done {
            self.read_armed = true;
        }
    }

    /// Peer closed its write side. A truncated sized read still completes
    /// with the bytes transferred so far; then the socket unwinds cleanly.
    fn read_eof(&mut self) {
        if self.teardown_done {
            return;
        }
        log::trace!("socket {}: read EOF", self.id);
        if self.state.is_active() {
            self.set_state(SocketState::ReadEof);
        }
        if let Some(request) = self.current_read.take() {
            if request.is_sized() {
                let tag = request.tag;
                self.notify_read(request.into_data(), tag);
            }
        }
        self.teardown(None);
    }

    // ── write path ──────────────────────────────────────────────────

    fn on_writable(&mut self) {
        self.service_write();
    }

    fn service_write(&mut self) {
        if self.current_write.is_none() && self.write_queue.is_empty() {
            self.write_armed = false;
            if self.close_condition_met() {
                self.teardown(None);
            }
            return;
        }
        if self.current_write.is_none() {
            self.current_write = self.write_queue.pop_front();
        }
        let Some(mut request) = self.current_write.take() else {
            return;
        };

        let result = {
            let Role::Stream(stream) = &self.role else {
                self.current_write = Some(request);
                return;
            };
            stream.get_ref().write(request.remaining())
        };

        let mut error: Option<SocketError> = None;
        match result {
            Ok(0) => {
                self.current_write = Some(request);
            }
            Ok(n) => {
                request.advance(n);
                let tag = request.tag;
                if request.is_done() {
                    self.notify_write(tag);
                } else {
                    self.notify_partial_write(request.sent, tag);
                    self.current_write = Some(request);
                }
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                self.current_write = Some(request);
            }
            Err(err) => {
                error = Some(SocketError::Write(err));
                self.current_write = Some(request);
            }
        }

        if self.current_write.is_none() && self.write_queue.is_empty() && self.close_condition_met()
        {
            self.teardown(error.take());
        }

        if let Some(err) = error {
            self.teardown(Some(err));
        } else if !self.teardown_done {
            self.write_armed = true;
        }
    }

    // ── close path ──────────────────────────────────────────────────

    fn close_condition_met(&self) -> bool {
        let read_idle = self.current_read.is_none() && self.read_queue.is_empty();
        let write_idle = self.current_write.is_none() && self.write_queue.is_empty();
        match self.close_condition {
            CloseCondition::AfterReads => read_idle,
            CloseCondition::AfterWrites => write_idle,
            CloseCondition::AfterBoth => read_idle && write_idle,
            CloseCondition::None => false,
        }
    }

    /// The single unwind path: discard queued work, deregister readiness
    /// sources, close the fd and deliver the terminal close callback.
    /// Runs exactly once no matter which failure or drain path got here.
    fn teardown(&mut self, error: Option<SocketError>) {
        if self.teardown_done {
            return;
        }
        self.teardown_done = true;
        log::debug!("socket {}: closing (error: {error:?})", self.id);
        self.read_queue.clear();
        self.write_queue.clear();
        self.current_read = None;
        self.current_write = None;
        self.read_armed = false;
        self.write_armed = false;
        self.accept_armed = false;
        self.close_condition = CloseCondition::None;
        self.pending_connects = 0;
        if self.state != SocketState::Problematic {
            self.set_state(SocketState::Closing);
        }
        // Dropping the registration deregisters it from the reactor and
        // closes the fd, in that order.
        self.role = Role::Done;
        if self.state != SocketState::Problematic {
            self.set_state(SocketState::Closed);
        }
        self.notify_close(error);
    }

    // ── plumbing ────────────────────────────────────────────────────

    fn set_state(&mut self, state: SocketState) {
        self.state = state;
        if let Some(shared) = self.shared.upgrade() {
            shared.set_state(state);
        }
    }

    fn make_handle(&self) -> Option<Socket> {
        self.shared.upgrade().map(|shared| Socket { shared })
    }

    fn notify_connect(&self, host: String, port: u16) {
        let Some(socket) = self.make_handle() else {
            return;
        };
        self.delegate
            .notify(move |d| d.on_connect(&socket, &host, port));
    }

    fn notify_accept(&self, new_socket: Socket) {
        let Some(socket) = self.make_handle() else {
            return;
        };
        self.delegate
            .notify(move |d| d.on_accept(&socket, new_socket));
    }

    fn notify_read(&self, data: ReadData, tag: Tag) {
        let Some(socket) = self.make_handle() else {
            return;
        };
        self.delegate.notify(move |d| d.on_read(&socket, data, tag));
    }

    fn notify_partial_read(&self, total: usize, tag: Tag) {
        let Some(socket) = self.make_handle() else {
            return;
        };
        self.delegate
            .notify(move |d| d.on_partial_read(&socket, total, tag));
    }

    fn notify_write(&self, tag: Tag) {
        let Some(socket) = self.make_handle() else {
            return;
        };
        self.delegate.notify(move |d| d.on_write(&socket, tag));
    }

    fn notify_partial_write(&self, total: usize, tag: Tag) {
        let Some(socket) = self.make_handle() else {
            return;
        };
        self.delegate
            .notify(move |d| d.on_partial_write(&socket, total, tag));
    }

    fn notify_close(&self, error: Option<SocketError>) {
        let Some(socket) = self.make_handle() else {
            return;
        };
        self.delegate.notify(move |d| d.on_close(&socket, error));
    }
}

//! Connection establishment: dual-stack listening, host resolution, and the
//! staggered dual-stack connect race.
//!
//! Resolution and the individual connect attempts run as their own tasks;
//! every outcome is marshalled back onto the owning socket's command channel
//! so the state machine only ever mutates from its serialized context.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::os::fd::OwnedFd;
use std::time::Duration;

use smol::{Async, Timer};
use socket2::{Domain, Protocol, Type};

use crate::error::SocketError;
use crate::socket::Command;

/// Matches the original backlog; the OS clamps it to `somaxconn` anyway.
const LISTEN_BACKLOG: i32 = 1024;

/// How long the IPv4 attempt waits behind the IPv6 one by default. Prefers
/// IPv6 without penalizing hosts where it is broken.
pub const DEFAULT_IPV4_STAGGER: Duration = Duration::from_millis(20);

/// Knobs for the racing dual-stack connect. The defaults mirror the classic
/// behavior: IPv6 first, IPv4 20ms later, one resolved address per family.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Delay before the IPv4 attempt is issued.
    pub ipv4_stagger: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            ipv4_stagger: DEFAULT_IPV4_STAGGER,
        }
    }
}

/// Collaborator for the "connect by name" strategy: negotiates a connected
/// stream fd for a named platform control channel. The engine adopts the fd
/// and runs it through the same `Connecting → Connected` transition as a
/// direct connect.
pub trait ControlChannelProvider: Send + Sync {
    fn connect(&self, name: &str) -> io::Result<OwnedFd>;
}

/// Bind a dual-stack (IPv6 any-address, mapped IPv4 allowed) listener with
/// address reuse, falling back to plain IPv4 on hosts without IPv6.
pub(crate) fn bind_listener(port: u16) -> Result<Async<TcpListener>, SocketError> {
    let (socket, addr) = match socket2::Socket::new(Domain::IPV6, Type::STREAM, Some(Protocol::TCP))
    {
        Ok(socket) => {
            // Dual-stack where the OS supports flipping it; best effort.
            let _ = socket.set_only_v6(false);
            (socket, SocketAddr::from((Ipv6Addr::UNSPECIFIED, port)))
        }
        Err(_) => {
            let socket = socket2::Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))
                .map_err(SocketError::Socket)?;
            (socket, SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)))
        }
    };
    socket
        .set_reuse_address(true)
        .map_err(SocketError::SocketOption)?;
    socket.bind(&addr.into()).map_err(SocketError::Bind)?;
    socket.listen(LISTEN_BACKLOG).map_err(SocketError::Listen)?;
    let listener: TcpListener = socket.into();
    Async::new(listener).map_err(SocketError::Nonblocking)
}

/// Resolve `host:port` off-thread and report the first address of each
/// family back to the socket task.
pub(crate) fn spawn_resolver(
    tx: flume::Sender<Command>,
    host: String,
    port: u16,
    options: ConnectOptions,
) {
    crate::spawn::spawn(async move {
        let lookup = {
            let host = host.clone();
            smol::unblock(move || {
                (host.as_str(), port)
                    .to_socket_addrs()
                    .map(|addrs| addrs.collect::<Vec<_>>())
            })
            .await
        };
        match lookup {
            Ok(addrs) => {
                let v6 = addrs.iter().copied().find(SocketAddr::is_ipv6);
                let v4 = addrs.iter().copied().find(SocketAddr::is_ipv4);
                log::debug!(
                    "resolved {host}:{port}: v6={v6:?} v4={v4:?} ({} total)",
                    addrs.len()
                );
                tx.send(Command::Resolved {
                    v6,
                    v4,
                    stagger: options.ipv4_stagger,
                })
                .ok();
            }
            Err(source) => {
                tx.send(Command::ResolveFailed(SocketError::Resolve {
                    host,
                    source,
                }))
                .ok();
            }
        }
    })
    .detach();
}

/// One connect attempt, optionally staggered. The reactor's connect path
/// confirms completion with the `SO_ERROR` query rather than trusting bare
/// writability.
pub(crate) fn spawn_attempt(tx: flume::Sender<Command>, addr: SocketAddr, delay: Option<Duration>) {
    crate::spawn::spawn(async move {
        if let Some(delay) = delay {
            Timer::after(delay).await;
        }
        let result = Async::<TcpStream>::connect(addr).await;
        tx.send(Command::Attempt(result)).ok();
    })
    .detach();
}

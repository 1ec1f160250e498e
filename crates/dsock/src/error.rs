//! Error type for socket setup and I/O failures.
//!
//! Setup-time failures (listen/connect/control-channel negotiation) are
//! returned synchronously from the call that triggered them. Failures
//! discovered inside the event-driven I/O path are never thrown back at a
//! caller; they surface exactly once through the terminal
//! [`on_close`](crate::SocketDelegate::on_close) callback.

use std::io;

use thiserror::Error;

use crate::state::SocketState;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum SocketError {
    #[error("failed to set non-blocking mode")]
    Nonblocking(#[source] io::Error),
    #[error("failed to create a socket")]
    Socket(#[source] io::Error),
    #[error("failed to configure a socket option")]
    SocketOption(#[source] io::Error),
    #[error("failed to bind the listener")]
    Bind(#[source] io::Error),
    #[error("failed to listen")]
    Listen(#[source] io::Error),
    #[error("failed to resolve {host}")]
    Resolve {
        host: String,
        #[source]
        source: io::Error,
    },
    #[error("no address of a supported family for {0}")]
    NoAddresses(String),
    #[error("failed to connect")]
    Connect(#[source] io::Error),
    #[error("control channel negotiation failed")]
    ControlChannel(#[source] io::Error),
    #[error("operation not valid in state {0:?}")]
    InvalidState(SocketState),
    #[error("failed to read from the socket")]
    Read(#[source] io::Error),
    #[error("failed to write to the socket")]
    Write(#[source] io::Error),
    #[error("failed to allocate a read buffer")]
    BufferAlloc,
}

impl SocketError {
    /// The OS error class underlying this error, when there is one.
    /// Lets callers match e.g. `ConnectionRefused` without destructuring.
    pub fn io_kind(&self) -> Option<io::ErrorKind> {
        match self {
            SocketError::Nonblocking(e)
            | SocketError::Socket(e)
            | SocketError::SocketOption(e)
            | SocketError::Bind(e)
            | SocketError::Listen(e)
            | SocketError::Resolve { source: e, .. }
            | SocketError::Connect(e)
            | SocketError::ControlChannel(e)
            | SocketError::Read(e)
            | SocketError::Write(e) => Some(e.kind()),
            SocketError::NoAddresses(_)
            | SocketError::InvalidState(_)
            | SocketError::BufferAlloc => None,
        }
    }
}

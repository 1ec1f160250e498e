//! Thin non-blocking wrappers around a raw stream fd.
//!
//! One syscall per call, `EINTR` retried in place, `EWOULDBLOCK` surfaced to
//! the caller as `io::ErrorKind::WouldBlock`. `SIGPIPE` is kept out of the
//! process: writes use `MSG_NOSIGNAL` where the platform has it, and
//! [`set_nosigpipe`] covers Apple targets at setup time.

use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};

/// A connected stream socket owned as a bare fd, registered with the reactor
/// via its [`AsFd`] impl.
#[derive(Debug)]
pub(crate) struct RawStream {
    fd: OwnedFd,
}

impl RawStream {
    pub fn new(fd: OwnedFd) -> Self {
        Self { fd }
    }

    /// One non-blocking read into `buf`. `Ok(0)` means peer EOF.
    pub fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let n = unsafe {
                libc::read(
                    self.fd.as_raw_fd(),
                    buf.as_mut_ptr().cast::<libc::c_void>(),
                    buf.len(),
                )
            };
            if n >= 0 {
                return Ok(n as usize);
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }

    /// One non-blocking write of as much of `buf` as the kernel accepts.
    pub fn write(&self, buf: &[u8]) -> io::Result<usize> {
        loop {
            #[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
            let n = unsafe {
                libc::send(
                    self.fd.as_raw_fd(),
                    buf.as_ptr().cast::<libc::c_void>(),
                    buf.len(),
                    libc::MSG_NOSIGNAL,
                )
            };
            #[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
            let n = unsafe {
                libc::write(
                    self.fd.as_raw_fd(),
                    buf.as_ptr().cast::<libc::c_void>(),
                    buf.len(),
                )
            };
            if n >= 0 {
                return Ok(n as usize);
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }

    /// Kernel-reported bytes currently readable (`FIONREAD`). Zero on a
    /// readable socket means the peer closed.
    pub fn bytes_available(&self) -> io::Result<usize> {
        let mut n: libc::c_int = 0;
        let rc = unsafe { libc::ioctl(self.fd.as_raw_fd(), libc::FIONREAD as _, &mut n) };
        if rc == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(n.max(0) as usize)
    }
}

impl AsFd for RawStream {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl AsRawFd for RawStream {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

/// Put `fd` into non-blocking mode. Failure here leaves a socket unusable
/// (`Problematic`).
pub(crate) fn set_nonblocking(fd: BorrowedFd<'_>) -> io::Result<()> {
    let raw = fd.as_raw_fd();
    let flags = unsafe { libc::fcntl(raw, libc::F_GETFL) };
    if flags == -1 {
        return Err(io::Error::last_os_error());
    }
    let rc = unsafe { libc::fcntl(raw, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if rc == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Suppress `SIGPIPE` delivery for writes on this socket. No-op on platforms
/// where `MSG_NOSIGNAL` already covers it.
#[cfg(any(target_os = "macos", target_os = "ios", target_os = "tvos"))]
pub(crate) fn set_nosigpipe(fd: BorrowedFd<'_>) -> io::Result<()> {
    let one: libc::c_int = 1;
    let rc = unsafe {
        libc::setsockopt(
            fd.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_NOSIGPIPE,
            std::ptr::addr_of!(one).cast::<libc::c_void>(),
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(any(target_os = "macos", target_os = "ios", target_os = "tvos")))]
pub(crate) fn set_nosigpipe(_fd: BorrowedFd<'_>) -> io::Result<()> {
    Ok(())
}

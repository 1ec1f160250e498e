//! Transfer packets: one queued read or write request and its progress.
//!
//! These are plain value structs; a packet has no identity beyond its queue
//! slot. Buffer ownership for read completions is carried explicitly by
//! [`ReadData`] rather than inferred from how the buffer will be freed.

/// Caller-supplied correlation id attached to each request and echoed back
/// in its completion callbacks.
pub type Tag = i64;

/// Payload of a read completion, tagged with who owns the backing buffer.
#[derive(Debug)]
pub enum ReadData {
    /// Buffer allocated by the engine; exactly the bytes read.
    EngineOwned(Vec<u8>),
    /// Caller-supplied buffer handed back; the filled region is
    /// `buffer[offset..offset + len]`.
    CallerOwned {
        buffer: Vec<u8>,
        offset: usize,
        len: usize,
    },
}

impl ReadData {
    /// The bytes this completion delivered.
    pub fn bytes(&self) -> &[u8] {
        match self {
            ReadData::EngineOwned(buf) => buf,
            ReadData::CallerOwned {
                buffer,
                offset,
                len,
            } => &buffer[*offset..*offset + *len],
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ReadData::EngineOwned(buf) => buf.len(),
            ReadData::CallerOwned { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reclaim the full backing buffer (for the caller-owned case this is
    /// the entire buffer that was passed in, not just the filled region).
    pub fn into_buffer(self) -> Vec<u8> {
        match self {
            ReadData::EngineOwned(buf) => buf,
            ReadData::CallerOwned { buffer, .. } => buffer,
        }
    }
}

/// Where a sized read puts its bytes.
pub(crate) enum ReadTarget {
    /// Best-effort: complete after one successful read of any positive size.
    Available,
    /// Fixed length into an engine-owned buffer.
    Sized { buf: Vec<u8>, filled: usize },
    /// Fixed length into a caller-owned buffer starting at `offset`.
    SizedInto {
        buf: Vec<u8>,
        offset: usize,
        requested: usize,
        filled: usize,
    },
}

pub(crate) struct ReadRequest {
    pub target: ReadTarget,
    pub tag: Tag,
}

impl ReadRequest {
    /// Best-effort one-shot read.
    pub fn available(tag: Tag) -> Self {
        Self {
            target: ReadTarget::Available,
            tag,
        }
    }

    /// Sized read into an engine-owned buffer. A zero length degrades to a
    /// best-effort read, matching the public `read(tag)` entry point.
    pub fn sized(len: usize, tag: Tag) -> Self {
        if len == 0 {
            return Self::available(tag);
        }
        Self {
            target: ReadTarget::Sized {
                buf: vec![0; len],
                filled: 0,
            },
            tag,
        }
    }

    /// Sized read into a caller-owned buffer. The caller guarantees
    /// `buf.len() >= offset + len`.
    pub fn sized_into(len: usize, buf: Vec<u8>, offset: usize, tag: Tag) -> Self {
        if len == 0 {
            return Self::available(tag);
        }
        Self {
            target: ReadTarget::SizedInto {
                buf,
                offset,
                requested: len,
                filled: 0,
            },
            tag,
        }
    }

    pub fn is_sized(&self) -> bool {
        !matches!(self.target, ReadTarget::Available)
    }

    /// Bytes transferred so far.
    pub fn filled(&self) -> usize {
        match &self.target {
            ReadTarget::Available => 0,
            ReadTarget::Sized { filled, .. } => *filled,
            ReadTarget::SizedInto { filled, .. } => *filled,
        }
    }

    /// Unfilled remainder of the destination, for the next read call.
    /// Empty for best-effort requests (those allocate per event).
    pub fn space_mut(&mut self) -> &mut [u8] {
        match &mut self.target {
            ReadTarget::Available => &mut [],
            ReadTarget::Sized { buf, filled } => &mut buf[*filled..],
            ReadTarget::SizedInto {
                buf,
                offset,
                requested,
                filled,
            } => &mut buf[*offset + *filled..*offset + *requested],
        }
    }

    pub fn advance(&mut self, n: usize) {
        match &mut self.target {
            ReadTarget::Available => {}
            ReadTarget::Sized { buf, filled } => {
                *filled += n;
                debug_assert!(*filled <= buf.len());
            }
            ReadTarget::SizedInto {
                requested, filled, ..
            } => {
                *filled += n;
                debug_assert!(*filled <= *requested);
            }
        }
    }

    pub fn is_full(&self) -> bool {
        match &self.target {
            ReadTarget::Available => false,
            ReadTarget::Sized { buf, filled } => *filled == buf.len(),
            ReadTarget::SizedInto {
                requested, filled, ..
            } => *filled == *requested,
        }
    }

    /// Convert into the completion payload, truncated to the bytes actually
    /// transferred (relevant when the peer closed mid-request).
    pub fn into_data(self) -> ReadData {
        match self.target {
            ReadTarget::Available => ReadData::EngineOwned(Vec::new()),
            ReadTarget::Sized { mut buf, filled } => {
                buf.truncate(filled);
                ReadData::EngineOwned(buf)
            }
            ReadTarget::SizedInto {
                buf,
                offset,
                filled,
                ..
            } => ReadData::CallerOwned {
                buffer: buf,
                offset,
                len: filled,
            },
        }
    }
}

pub(crate) struct WriteRequest {
    pub buf: Vec<u8>,
    pub sent: usize,
    pub tag: Tag,
}

impl WriteRequest {
    pub fn new(buf: Vec<u8>, tag: Tag) -> Self {
        Self { buf, sent: 0, tag }
    }

    pub fn remaining(&self) -> &[u8] {
        &self.buf[self.sent..]
    }

    pub fn advance(&mut self, n: usize) {
        self.sent += n;
        debug_assert!(self.sent <= self.buf.len());
    }

    pub fn is_done(&self) -> bool {
        self.sent == self.buf.len()
    }
}

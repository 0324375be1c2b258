//! In-memory duplex byte pipe.
//!
//! A [`DuplexChannel`] holds two fixed-capacity endpoints built together. Bytes
//! written on one [`Side`] become pending input for the other side. Nothing in
//! here ever grows: a full endpoint rejects writes and raises its want-write
//! flag, an empty one rejects reads and raises want-read.

use std::fmt;
use std::io::{self, Read, Write};

/// Default capacity of each endpoint in bytes.
pub const DEFAULT_CAPACITY: usize = 32_000;

/// One end of a [`DuplexChannel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// The end the TLS session reads from and writes to.
    Engine,
    /// The end the network I/O layer drains and feeds.
    Network,
}

impl Side {
    /// The opposite end.
    pub fn peer(self) -> Side {
        match self {
            Side::Engine => Side::Network,
            Side::Network => Side::Engine,
        }
    }

    fn index(self) -> usize {
        match self {
            Side::Engine => 0,
            Side::Network => 1,
        }
    }
}

struct Endpoint {
    buf: Box<[u8]>,
    read_offset: usize,
    write_offset: usize,
    want_read: bool,
    want_write: bool,
}

impl Endpoint {
    fn new(capacity: usize) -> Self {
        Endpoint {
            buf: vec![0; capacity].into_boxed_slice(),
            read_offset: 0,
            write_offset: 0,
            want_read: false,
            want_write: false,
        }
    }

    fn pending(&self) -> usize {
        self.write_offset - self.read_offset
    }

    fn free(&self) -> usize {
        self.buf.len() - self.write_offset
    }

    fn compact(&mut self) {
        if self.read_offset == 0 {
            return;
        }
        self.buf.copy_within(self.read_offset..self.write_offset, 0);
        self.write_offset -= self.read_offset;
        self.read_offset = 0;
    }
}

/// Two linked endpoints emulating a bidirectional pipe.
///
/// Both endpoints live in this one value and refer to each other by [`Side`],
/// so there is no shared ownership to manage.
pub struct DuplexChannel {
    ends: [Endpoint; 2],
}

impl DuplexChannel {
    /// Create a pair where each endpoint buffers at most `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        DuplexChannel {
            ends: [Endpoint::new(capacity), Endpoint::new(capacity)],
        }
    }

    /// Capacity of each endpoint.
    pub fn capacity(&self) -> usize {
        self.ends[0].buf.len()
    }

    /// Write `data` from `side` towards its peer.
    ///
    /// Returns the number of bytes accepted, which is less than `data.len()`
    /// when the endpoint runs out of room.
    pub fn write(&mut self, side: Side, data: &[u8]) -> usize {
        if data.is_empty() {
            return 0;
        }

        let end = &mut self.ends[side.index()];
        let free = end.free();
        if free == 0 {
            end.want_write = true;
            return 0;
        }

        let n = free.min(data.len());
        let start = end.write_offset;
        end.buf[start..start + n].copy_from_slice(&data[..n]);
        end.write_offset += n;
        end.want_write = false;
        n
    }

    /// Read into `out` on `side` whatever the peer has written.
    ///
    /// Oldest bytes come first. The want-read flag of `side` is raised when
    /// nothing is pending and only cleared by a read that fills `out` entirely.
    pub fn read(&mut self, side: Side, out: &mut [u8]) -> usize {
        if out.is_empty() {
            return 0;
        }

        let [engine, network] = &mut self.ends;
        let (end, peer) = match side {
            Side::Engine => (engine, network),
            Side::Network => (network, engine),
        };

        let pending = peer.pending();
        if pending == 0 {
            end.want_read = true;
            return 0;
        }

        let n = pending.min(out.len());
        let start = peer.read_offset;
        out[..n].copy_from_slice(&peer.buf[start..start + n]);
        peer.read_offset += n;
        peer.compact();

        if n == out.len() {
            end.want_read = false;
        }
        n
    }

    /// Bytes written by `side` that the peer has not consumed yet.
    pub fn pending(&self, side: Side) -> usize {
        self.ends[side.index()].pending()
    }

    /// Whether the last read on `side` found nothing to read.
    pub fn wants_read(&self, side: Side) -> bool {
        self.ends[side.index()].want_read
    }

    /// Whether the last write on `side` found no room.
    pub fn wants_write(&self, side: Side) -> bool {
        self.ends[side.index()].want_write
    }
}

impl Default for DuplexChannel {
    fn default() -> Self {
        DuplexChannel::new(DEFAULT_CAPACITY)
    }
}

impl fmt::Debug for DuplexChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DuplexChannel")
            .field("capacity", &self.capacity())
            .field("to_network", &self.pending(Side::Engine))
            .field("to_engine", &self.pending(Side::Network))
            .finish()
    }
}

/// The engine side of a channel as a non-blocking byte stream.
///
/// OpenSSL drives this through `Read`/`Write`. An empty or full endpoint is
/// reported as [`io::ErrorKind::WouldBlock`], which the TLS session turns into
/// want-read or want-write.
#[derive(Debug, Default)]
pub struct EngineIo {
    channel: DuplexChannel,
}

impl EngineIo {
    /// Wrap `channel`, reading and writing on its engine side.
    pub fn new(channel: DuplexChannel) -> Self {
        EngineIo { channel }
    }

    /// The wrapped channel.
    pub fn channel(&self) -> &DuplexChannel {
        &self.channel
    }

    /// The wrapped channel, for the network side to feed and drain.
    pub fn channel_mut(&mut self) -> &mut DuplexChannel {
        &mut self.channel
    }
}

impl Read for EngineIo {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        match self.channel.read(Side::Engine, buf) {
            0 => Err(io::ErrorKind::WouldBlock.into()),
            n => Ok(n),
        }
    }
}

impl Write for EngineIo {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        match self.channel.write(Side::Engine, buf) {
            0 => Err(io::ErrorKind::WouldBlock.into()),
            n => Ok(n),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_arrive_in_order() {
        let mut ch = DuplexChannel::new(64);
        let data: Vec<u8> = (0..50).collect();

        assert_eq!(ch.write(Side::Engine, &data), 50);
        assert_eq!(ch.pending(Side::Engine), 50);

        let mut out = [0; 50];
        assert_eq!(ch.read(Side::Network, &mut out), 50);
        assert_eq!(&out[..], &data[..]);
        assert_eq!(ch.pending(Side::Engine), 0);
    }

    #[test]
    fn directions_are_independent() {
        let mut ch = DuplexChannel::new(16);
        ch.write(Side::Engine, b"to net");
        ch.write(Side::Network, b"to engine");

        let mut out = [0; 16];
        let n = ch.read(Side::Engine, &mut out);
        assert_eq!(&out[..n], b"to engine");
        let n = ch.read(Side::Network, &mut out);
        assert_eq!(&out[..n], b"to net");
    }

    #[test]
    fn full_channel_blocks_write() {
        let mut ch = DuplexChannel::new(8);
        assert_eq!(ch.write(Side::Engine, b"0123456789"), 8);
        assert!(!ch.wants_write(Side::Engine));

        assert_eq!(ch.write(Side::Engine, b"x"), 0);
        assert!(ch.wants_write(Side::Engine));

        // Free some room, the next successful write clears the flag.
        let mut out = [0; 3];
        assert_eq!(ch.read(Side::Network, &mut out), 3);
        assert_eq!(ch.write(Side::Engine, b"abcdef"), 3);
        assert!(!ch.wants_write(Side::Engine));

        let mut out = [0; 8];
        assert_eq!(ch.read(Side::Network, &mut out), 8);
        assert_eq!(&out, b"34567abc");
    }

    #[test]
    fn empty_channel_blocks_read() {
        let mut ch = DuplexChannel::new(8);
        let mut out = [0; 4];
        assert_eq!(ch.read(Side::Network, &mut out), 0);
        assert!(ch.wants_read(Side::Network));

        // Partial read leaves the flag raised.
        ch.write(Side::Engine, b"ab");
        assert_eq!(ch.read(Side::Network, &mut out), 2);
        assert!(ch.wants_read(Side::Network));

        // Only a read satisfying the full request clears it.
        ch.write(Side::Engine, b"cdef");
        assert_eq!(ch.read(Side::Network, &mut out), 4);
        assert_eq!(&out, b"cdef");
        assert!(!ch.wants_read(Side::Network));
    }

    #[test]
    fn zero_length_is_noop() {
        let mut ch = DuplexChannel::new(4);
        assert_eq!(ch.write(Side::Engine, b"full"), 4);

        assert_eq!(ch.write(Side::Engine, &[]), 0);
        assert!(!ch.wants_write(Side::Engine));

        assert_eq!(ch.read(Side::Engine, &mut []), 0);
        assert!(!ch.wants_read(Side::Engine));
        assert_eq!(ch.pending(Side::Engine), 4);
    }

    #[test]
    fn read_compacts_and_reclaims_capacity() {
        let mut ch = DuplexChannel::new(6);
        assert_eq!(ch.write(Side::Network, b"abcdef"), 6);

        let mut out = [0; 4];
        assert_eq!(ch.read(Side::Engine, &mut out), 4);
        assert_eq!(ch.pending(Side::Network), 2);

        // The four consumed bytes are usable again.
        assert_eq!(ch.write(Side::Network, b"ghij"), 4);
        let mut out = [0; 6];
        assert_eq!(ch.read(Side::Engine, &mut out), 6);
        assert_eq!(&out, b"efghij");
    }

    #[test]
    fn engine_io_reports_would_block() {
        let mut io = EngineIo::new(DuplexChannel::new(4));

        let mut buf = [0; 4];
        let err = io.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);

        assert_eq!(io.write(b"abcdef").unwrap(), 4);
        let err = io.write(b"g").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);

        assert_eq!(io.read(&mut []).unwrap(), 0);
        assert_eq!(io.write(&[]).unwrap(), 0);

        io.channel_mut().write(Side::Network, b"hi");
        assert_eq!(io.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"hi");
    }
}

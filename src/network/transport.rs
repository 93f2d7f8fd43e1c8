//! Byte transports underneath a [`Session`](super::Session).
//!
//! All operations are non-blocking: a transport with nothing to read, or no
//! room to write, returns [`io::ErrorKind::WouldBlock`].

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::rc::Rc;
use tokio::net::TcpStream;

/// Non-blocking socket operations a session needs.
pub trait Transport {
    /// Receive into `buf`. `Ok(0)` means the peer closed the connection.
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Send from `buf`, returning how many bytes were accepted.
    fn send(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Release the socket. Further calls fail.
    fn close(&mut self);

    /// Remote address, when the transport has one.
    fn peer_addr(&self) -> Option<SocketAddr>;
}

// ============================================================================
// TCP
// ============================================================================

/// A tokio TCP stream driven through its `try_*` methods.
///
/// The stream is shared with the reactor's readiness watcher, which holds
/// the other reference until the session is forgotten.
pub struct TcpTransport {
    stream: Option<Rc<TcpStream>>,
    peer: Option<SocketAddr>,
}

impl TcpTransport {
    pub fn new(stream: Rc<TcpStream>) -> Self {
        let peer = stream.peer_addr().ok();
        Self {
            stream: Some(stream),
            peer,
        }
    }

    fn stream(&self) -> io::Result<&TcpStream> {
        self.stream
            .as_deref()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))
    }
}

impl Transport for TcpTransport {
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream()?.try_read(buf)
    }

    fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream()?.try_write(buf)
    }

    fn close(&mut self) {
        self.stream = None;
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }
}

// ============================================================================
// In-memory pipe
// ============================================================================

#[derive(Debug, Default)]
struct Pipe {
    inbound: VecDeque<u8>,
    outbound: Vec<u8>,
    hung_up: bool,
    closed: bool,
    send_limit: Option<usize>,
}

/// Session side of an in-memory connection.
pub struct MemoryTransport {
    pipe: Rc<RefCell<Pipe>>,
    peer: Option<SocketAddr>,
}

/// Remote side of an in-memory connection: feeds input and collects output.
#[derive(Clone)]
pub struct MemoryPeer {
    pipe: Rc<RefCell<Pipe>>,
}

impl MemoryTransport {
    /// Create a connected pair.
    pub fn pair(peer: Option<SocketAddr>) -> (MemoryTransport, MemoryPeer) {
        let pipe = Rc::new(RefCell::new(Pipe::default()));
        (
            MemoryTransport {
                pipe: Rc::clone(&pipe),
                peer,
            },
            MemoryPeer { pipe },
        )
    }
}

impl Transport for MemoryTransport {
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut pipe = self.pipe.borrow_mut();
        if pipe.closed {
            return Err(io::ErrorKind::NotConnected.into());
        }
        if pipe.inbound.is_empty() {
            return if pipe.hung_up {
                Ok(0)
            } else {
                Err(io::ErrorKind::WouldBlock.into())
            };
        }
        let n = buf.len().min(pipe.inbound.len());
        for (slot, byte) in buf.iter_mut().zip(pipe.inbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut pipe = self.pipe.borrow_mut();
        if pipe.closed || pipe.hung_up {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        let n = pipe.send_limit.map_or(buf.len(), |limit| limit.min(buf.len()));
        if n == 0 && !buf.is_empty() {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        pipe.outbound.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn close(&mut self) {
        self.pipe.borrow_mut().closed = true;
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }
}

impl MemoryPeer {
    /// Make bytes available to the session's next `recv`.
    pub fn push(&self, data: impl AsRef<[u8]>) {
        self.pipe.borrow_mut().inbound.extend(data.as_ref());
    }

    /// Push one line with a CRLF terminator.
    pub fn push_line(&self, line: &str) {
        self.push(format!("{line}\r\n"));
    }

    /// Everything the session has sent so far, drained.
    pub fn take_output(&self) -> String {
        let bytes = std::mem::take(&mut self.pipe.borrow_mut().outbound);
        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// Drained output split into lines.
    pub fn take_lines(&self) -> Vec<String> {
        self.take_output()
            .split(['\r', '\n'])
            .filter(|l| !l.is_empty())
            .map(str::to_owned)
            .collect()
    }

    /// Close the remote end; the session reads EOF once input is drained.
    pub fn hang_up(&self) {
        self.pipe.borrow_mut().hung_up = true;
    }

    /// Limit how many bytes each `send` accepts. `Some(0)` blocks writes.
    pub fn set_send_limit(&self, limit: Option<usize>) {
        self.pipe.borrow_mut().send_limit = limit;
    }

    /// Whether the session closed its side.
    pub fn is_closed(&self) -> bool {
        self.pipe.borrow().closed
    }
}

// ============================================================================
// Null
// ============================================================================

/// Discards output and never produces input. Backs simulated sessions.
#[derive(Debug, Default)]
pub struct NullTransport;

impl Transport for NullTransport {
    fn recv(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(io::ErrorKind::WouldBlock.into())
    }

    fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(buf.len())
    }

    fn close(&mut self) {}

    fn peer_addr(&self) -> Option<SocketAddr> {
        None
    }
}

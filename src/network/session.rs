//! Session: one socket, its two byte queues and its role handler.
//!
//! A session knows how to move bytes and split lines. What a line means is
//! decided by the [`Role`] it carries, dispatched by the bouncer.

use super::queue::ByteQueue;
use super::transport::Transport;
use crate::error::SessionError;
use crate::handlers::{ClientHandler, UpstreamHandler};
use std::fmt;
use std::io;
use std::net::SocketAddr;

/// Bytes requested from the transport per `read`.
pub const RECV_CHUNK: usize = 8192;
/// Upper bound on bytes handed to the transport per `write`.
pub const SEND_CHUNK: usize = 4096;
/// Seconds a killed session may linger to flush its send queue.
pub const LINGER_SECS: i64 = 10;

/// Opaque, never reused session identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Role-specific protocol state.
pub enum Role {
    /// Faces an end-user's IRC client.
    Client(ClientHandler),
    /// Faces the upstream IRC network.
    Upstream(Box<UpstreamHandler>),
    /// Not yet assigned.
    Unknown,
}

/// Role tag without the handler state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoleKind {
    Client,
    Upstream,
    Unknown,
}

impl Role {
    pub fn kind(&self) -> RoleKind {
        match self {
            Role::Client(_) => RoleKind::Client,
            Role::Upstream(_) => RoleKind::Upstream,
            Role::Unknown => RoleKind::Unknown,
        }
    }
}

/// Outcome of one `write` call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteStatus {
    /// Nothing was queued.
    Idle,
    /// Bytes were accepted by the transport.
    Sent(usize),
    /// The transport had no room; retry later.
    Blocked,
    /// The session was shutting down and has now closed its socket.
    Closed,
}

/// Split complete lines out of `data`.
///
/// CR and LF both terminate a line and empty lines are skipped. Returns the
/// lines and the number of bytes they cover; anything after that is a
/// partial line.
pub fn split_lines(data: &[u8]) -> (Vec<&[u8]>, usize) {
    let mut lines = Vec::new();
    let mut start = 0;
    for (i, &b) in data.iter().enumerate() {
        if b == b'\r' || b == b'\n' {
            if i > start {
                lines.push(&data[start..i]);
            }
            start = i + 1;
        }
    }
    (lines, start)
}

/// One live connection.
pub struct Session {
    id: SessionId,
    transport: Box<dyn Transport>,
    sendq: ByteQueue,
    recvq: ByteQueue,
    locked: bool,
    shutting_down: bool,
    closed: bool,
    write_blocked: bool,
    timeout_at: Option<i64>,
    created_at: i64,
    /// Name of the owning user. Non-owning: the user holds the session id.
    pub(crate) owner: Option<String>,
    pub(crate) role: Role,
}

impl Session {
    pub fn new(id: SessionId, transport: Box<dyn Transport>, role: Role, now: i64) -> Self {
        Self {
            id,
            transport,
            sendq: ByteQueue::new(),
            recvq: ByteQueue::new(),
            locked: false,
            shutting_down: false,
            closed: false,
            write_blocked: false,
            timeout_at: None,
            created_at: now,
            owner: None,
            role,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn role(&self) -> &Role {
        &self.role
    }

    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.transport.peer_addr()
    }

    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    pub fn sendq_len(&self) -> usize {
        self.sendq.size()
    }

    pub fn recvq_len(&self) -> usize {
        self.recvq.size()
    }

    /// Receive once. Complete lines are returned unless `dispatch` is false,
    /// in which case they stay buffered.
    pub fn read(&mut self, dispatch: bool) -> Result<Vec<Vec<u8>>, SessionError> {
        let mut buf = [0u8; RECV_CHUNK];
        match self.transport.recv(&mut buf) {
            Ok(0) => {
                self.close();
                Err(SessionError::Closed)
            }
            Ok(n) => {
                self.recvq.append(&buf[..n]);
                Ok(if dispatch { self.take_lines() } else { Vec::new() })
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) => {
                Ok(Vec::new())
            }
            Err(e) => {
                self.close();
                Err(SessionError::Io(e))
            }
        }
    }

    /// Remove and return all complete lines from the receive queue.
    pub fn take_lines(&mut self) -> Vec<Vec<u8>> {
        let (lines, used) = {
            let (lines, used) = split_lines(self.recvq.peek());
            (
                lines.into_iter().map(<[u8]>::to_vec).collect::<Vec<_>>(),
                used,
            )
        };
        self.recvq.consume(used);
        lines
    }

    /// Send at most [`SEND_CHUNK`] bytes from the front of the send queue.
    pub fn write(&mut self) -> Result<WriteStatus, SessionError> {
        if self.closed {
            return Ok(WriteStatus::Closed);
        }
        if self.sendq.is_empty() {
            if self.shutting_down {
                self.close();
                return Ok(WriteStatus::Closed);
            }
            return Ok(WriteStatus::Idle);
        }

        let chunk = self.sendq.size().min(SEND_CHUNK);
        match self.transport.send(&self.sendq.peek()[..chunk]) {
            Ok(n) => {
                self.sendq.consume(n);
                self.write_blocked = false;
                if self.shutting_down && self.sendq.is_empty() {
                    self.close();
                    return Ok(WriteStatus::Closed);
                }
                Ok(WriteStatus::Sent(n))
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) => {
                self.write_blocked = true;
                Ok(WriteStatus::Blocked)
            }
            Err(e) => {
                self.close();
                Err(SessionError::Io(e))
            }
        }
    }

    /// Queue one line; the terminator is added here.
    pub fn queue_line(&mut self, line: &str) {
        self.queue_bytes(line.as_bytes());
    }

    /// Queue raw line bytes (no terminator) plus CRLF.
    pub fn queue_bytes(&mut self, line: &[u8]) {
        if self.locked || self.shutting_down || self.closed {
            return;
        }
        self.sendq.append(line);
        self.sendq.append(b"\r\n");
    }

    /// True iff the send queue is non-empty.
    pub fn has_queued_data(&self) -> bool {
        !self.sendq.is_empty()
    }

    /// Whether the last write hit a full transport.
    pub fn is_write_blocked(&self) -> bool {
        self.write_blocked
    }

    /// Allow another write attempt after a blocked one.
    pub fn unblock(&mut self) {
        self.write_blocked = false;
    }

    /// Stop accepting queued output.
    pub fn lock(&mut self) {
        self.locked = true;
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Queue the role's farewell line, then arm the shutdown linger.
    ///
    /// Returns false when the session was already shutting down. Detaching
    /// from the owner is the caller's job.
    pub fn kill(&mut self, reason: &str, notice_origin: &str, now: i64) -> bool {
        if self.shutting_down || self.closed {
            return false;
        }
        match self.role.kind() {
            RoleKind::Client => {
                self.queue_line(&format!(":{notice_origin} NOTICE * :{reason}"));
            }
            RoleKind::Upstream => self.queue_line(&format!("QUIT :{reason}")),
            RoleKind::Unknown => {}
        }
        self.shutdown(now);
        true
    }

    /// Close once the send queue drains, or after the linger timeout.
    pub fn shutdown(&mut self, now: i64) {
        self.shutting_down = true;
        self.timeout_at = Some(now + LINGER_SECS);
    }

    pub fn set_timeout(&mut self, at: Option<i64>) {
        self.timeout_at = at;
    }

    /// Whether the deadline has passed.
    pub fn timed_out(&self, now: i64) -> bool {
        self.timeout_at.is_some_and(|at| now >= at)
    }

    /// Close the transport immediately.
    pub fn close(&mut self) {
        if !self.closed {
            self.transport.close();
            self.closed = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::transport::MemoryTransport;
    use proptest::prelude::*;

    fn session() -> (Session, crate::network::transport::MemoryPeer) {
        let (transport, peer) = MemoryTransport::pair(None);
        (
            Session::new(SessionId(1), Box::new(transport), Role::Unknown, 0),
            peer,
        )
    }

    fn as_strings(lines: Vec<Vec<u8>>) -> Vec<String> {
        lines
            .into_iter()
            .map(|l| String::from_utf8(l).unwrap())
            .collect()
    }

    #[test]
    fn splits_on_cr_and_lf_and_skips_empty() {
        let (lines, used) = split_lines(b"A\r\nB\n\nC\rpartial");
        assert_eq!(lines, vec![&b"A"[..], &b"B"[..], &b"C"[..]]);
        assert_eq!(used, 8);
    }

    #[test]
    fn keeps_partial_line_between_reads() {
        let (mut s, peer) = session();
        peer.push("NICK bo");
        assert!(s.read(true).unwrap().is_empty());
        peer.push("b\r");
        assert_eq!(as_strings(s.read(true).unwrap()), vec!["NICK bob"]);
        peer.push("\nUSER x\r\n");
        assert_eq!(as_strings(s.read(true).unwrap()), vec!["USER x"]);
        assert_eq!(s.recvq_len(), 0);
    }

    #[test]
    fn suppressed_read_buffers_lines() {
        let (mut s, peer) = session();
        peer.push("PING :a\r\n");
        assert!(s.read(false).unwrap().is_empty());
        assert_eq!(as_strings(s.take_lines()), vec!["PING :a"]);
    }

    #[test]
    fn eof_closes_and_reports() {
        let (mut s, peer) = session();
        peer.hang_up();
        assert!(matches!(s.read(true), Err(SessionError::Closed)));
        assert!(s.is_closed());
        assert!(peer.is_closed());
    }

    #[test]
    fn write_sends_one_chunk_per_call() {
        let (mut s, peer) = session();
        let long = "x".repeat(SEND_CHUNK * 2);
        s.queue_line(&long);
        assert_eq!(s.write().unwrap(), WriteStatus::Sent(SEND_CHUNK));
        assert_eq!(s.write().unwrap(), WriteStatus::Sent(SEND_CHUNK));
        assert_eq!(s.write().unwrap(), WriteStatus::Sent(2));
        assert_eq!(s.write().unwrap(), WriteStatus::Idle);
        assert_eq!(peer.take_output().len(), SEND_CHUNK * 2 + 2);
    }

    #[test]
    fn partial_and_blocked_writes() {
        let (mut s, peer) = session();
        peer.set_send_limit(Some(4));
        s.queue_line("PRIVMSG #a :hi");
        assert_eq!(s.write().unwrap(), WriteStatus::Sent(4));
        peer.set_send_limit(Some(0));
        assert_eq!(s.write().unwrap(), WriteStatus::Blocked);
        assert!(s.is_write_blocked());
        peer.set_send_limit(None);
        assert_eq!(s.write().unwrap(), WriteStatus::Sent(12));
        assert_eq!(peer.take_output(), "PRIVMSG #a :hi\r\n");
    }

    #[test]
    fn locked_and_shutting_down_drop_output() {
        let (mut s, _peer) = session();
        s.lock();
        s.queue_line("lost");
        assert!(!s.has_queued_data());

        let (mut s, _peer) = session();
        s.shutdown(0);
        s.queue_line("lost");
        assert!(!s.has_queued_data());
    }

    #[test]
    fn kill_is_idempotent_and_lingers() {
        let (transport, peer) = MemoryTransport::pair(None);
        let handler = crate::handlers::ClientHandler::new(None);
        let mut s = Session::new(SessionId(2), Box::new(transport), Role::Client(handler), 100);
        assert!(s.kill("bye", "-bnc!bouncer@bnc", 100));
        assert!(!s.kill("again", "-bnc!bouncer@bnc", 100));
        assert!(!s.timed_out(109));
        assert!(s.timed_out(110));
        assert_eq!(s.write().unwrap(), WriteStatus::Closed);
        assert_eq!(peer.take_output(), ":-bnc!bouncer@bnc NOTICE * :bye\r\n");
        assert!(peer.is_closed());
    }

    proptest! {
        #[test]
        fn terminator_split_invariance(
            lines in proptest::collection::vec("[a-zA-Z0-9 :#]{0,20}", 0..12),
            terms in proptest::collection::vec(prop_oneof![Just("\r\n"), Just("\n"), Just("\r")], 12),
            cuts in proptest::collection::vec(0usize..400, 0..8),
        ) {
            let mut wire = String::new();
            for (i, line) in lines.iter().enumerate() {
                wire.push_str(line);
                wire.push_str(terms[i]);
            }
            let bytes = wire.as_bytes();

            let (whole, _) = split_lines(bytes);
            let expected: Vec<Vec<u8>> = whole.into_iter().map(<[u8]>::to_vec).collect();

            let mut cuts: Vec<usize> = cuts.into_iter().map(|c| c.min(bytes.len())).collect();
            cuts.sort_unstable();
            let (mut s, peer) = session();
            let mut got = Vec::new();
            let mut last = 0;
            for cut in cuts.into_iter().chain(std::iter::once(bytes.len())) {
                if cut > last {
                    peer.push(&bytes[last..cut]);
                    got.extend(s.read(true).unwrap());
                    last = cut;
                }
            }
            prop_assert_eq!(got, expected);
        }
    }
}

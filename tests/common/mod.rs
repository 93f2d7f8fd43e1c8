//! Integration test common infrastructure.
//!
//! Drives a [`Bouncer`] directly over in-memory transports: the test plays
//! the reactor, the user's IRC client and the IRC server.

#![allow(dead_code)]

use slbnc::config::{MemoryStorage, ServerConfig};
use slbnc::network::{MemoryPeer, MemoryTransport, SessionId};
use slbnc::security::hash_password;
use slbnc::state::{Bouncer, Request, keys};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

pub const PASSWORD: &str = "hunter22";

/// One end of an in-memory connection, as seen by the test.
pub struct Conn {
    pub id: SessionId,
    pub peer: MemoryPeer,
}

impl Conn {
    /// Lines the bouncer has written so far, drained.
    pub fn lines(&self) -> Vec<String> {
        self.peer.take_lines()
    }
}

pub struct Harness {
    pub bouncer: Bouncer,
    pub now: i64,
}

impl Harness {
    pub fn new() -> Self {
        let now = 1_000_000;
        let bouncer = Bouncer::new(ServerConfig::default(), Box::new(MemoryStorage::new()), now)
            .expect("memory storage never fails");
        Self { bouncer, now }
    }

    /// Create a user with [`PASSWORD`].
    pub fn add_user(&mut self, name: &str, admin: bool) {
        let hash = hash_password(PASSWORD).expect("hash");
        self.bouncer.create_user(name, &hash).expect("create user");
        if admin {
            self.bouncer
                .user_mut(name)
                .expect("user")
                .set_setting(keys::ADMIN, Some("1"))
                .expect("set admin");
        }
    }

    pub fn set(&mut self, user: &str, key: &str, value: &str) {
        self.bouncer
            .user_mut(user)
            .expect("user")
            .set_setting(key, Some(value))
            .expect("set");
    }

    /// A fresh, unregistered client connection.
    pub fn connect_client(&mut self) -> Conn {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 40000);
        let (transport, peer) = MemoryTransport::pair(Some(addr));
        let id = self.bouncer.accept(Box::new(transport), self.now);
        Conn { id, peer }
    }

    /// Connect and log in as `user`. The welcome burst is left unread.
    pub fn login(&mut self, user: &str) -> Conn {
        let conn = self.connect_client();
        self.send(&conn, &format!("PASS {PASSWORD}"));
        self.send(&conn, &format!("NICK {user}"));
        self.send(&conn, &format!("USER {user} 0 * :{user}"));
        assert_eq!(
            self.bouncer.user(user).and_then(|u| u.client()),
            Some(conn.id),
            "login failed"
        );
        conn
    }

    /// Deliver one line to a session and flush everything it caused.
    pub fn send(&mut self, conn: &Conn, line: &str) {
        conn.peer.push_line(line);
        self.bouncer.on_readable(conn.id, self.now);
        self.flush();
    }

    /// Flush until no session has more to send right away.
    pub fn flush(&mut self) {
        for _ in 0..64 {
            if !self.bouncer.flush(self.now).more {
                break;
            }
        }
    }

    /// Advance the clock and run housekeeping.
    pub fn tick(&mut self, secs: i64) {
        self.now += secs;
        self.bouncer.tick(self.now);
        self.flush();
    }

    /// Walk `user` through lookup and connect to an in-memory IRC server.
    /// The registration greeting is left unread.
    pub fn connect_upstream(&mut self, user: &str) -> Conn {
        self.set(user, keys::SERVER, "irc.example.net");
        self.bouncer.jump(user, self.now).expect("jump");
        self.bouncer.tick(self.now);

        let token = self
            .bouncer
            .take_requests()
            .into_iter()
            .find_map(|r| match r {
                Request::ResolveHost { token, .. } => Some(token),
                _ => None,
            })
            .expect("host lookup requested");
        self.bouncer
            .host_resolved(token, Ok(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1))), self.now);
        let connect = self.bouncer.take_requests();
        assert!(matches!(connect.as_slice(), [Request::Connect { .. }]));

        let (transport, peer) = MemoryTransport::pair(None);
        let id = self
            .bouncer
            .upstream_connected(user, Box::new(transport), self.now)
            .expect("upstream wanted");
        // A detached upstream writes at most once a second.
        self.now += 1;
        self.flush();
        Conn { id, peer }
    }

    /// Complete upstream registration: welcome and end of MOTD.
    pub fn register_upstream(&mut self, up: &Conn, nick: &str) {
        self.send(up, &format!(":irc.example.net 001 {nick} :Welcome to ExampleNet {nick}"));
        self.send(up, &format!(":irc.example.net 376 {nick} :End of /MOTD command."));
    }
}

/// Whether any line contains `needle`.
pub fn has(lines: &[String], needle: &str) -> bool {
    lines.iter().any(|l| l.contains(needle))
}

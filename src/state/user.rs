//! Bouncer user: identity, settings and the two session slots.

use crate::config::{ConfigStore, StoreError, UserRecord};
use crate::history::MessageLog;
use crate::network::SessionId;
use crate::security::verify_password;
use std::net::IpAddr;
use tracing::warn;

/// Settings keys: `user.*` in a user's store, `system.*` in the global one.
pub mod keys {
    pub const PASSWORD: &str = "user.password";
    pub const NICK: &str = "user.nick";
    pub const REALNAME: &str = "user.realname";
    pub const SERVER: &str = "user.server";
    pub const PORT: &str = "user.port";
    pub const SERVER_PASSWORD: &str = "user.spass";
    pub const VHOST: &str = "user.ip";
    pub const AWAY_NICK: &str = "user.awaynick";
    pub const AWAY: &str = "user.away";
    pub const CHANNELS: &str = "user.channels";
    pub const ADMIN: &str = "user.admin";
    pub const LOCK: &str = "user.lock";

    pub const SYSTEM_VHOST: &str = "system.ip";
    pub const SYSTEM_MOTD: &str = "system.motd";
}

/// Usernames double as file names and idents.
pub fn is_valid_username(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 32
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// One bouncer account.
///
/// Holds the ids of at most one client and one upstream session; the
/// sessions themselves live in the bouncer's session table.
pub struct User {
    name: String,
    store: Box<dyn ConfigStore>,
    pub(crate) log: MessageLog,
    pub(crate) client: Option<SessionId>,
    pub(crate) upstream: Option<SessionId>,
    /// When to try connecting upstream next.
    pub(crate) reconnect_at: Option<i64>,
    /// A DNS lookup or TCP connect is in flight.
    pub(crate) connecting: bool,
    /// Upstream was closed on request; do not reconnect automatically.
    pub(crate) quitted: bool,
    /// Last client login.
    pub(crate) last_seen: Option<i64>,
}

impl User {
    pub fn new(name: &str, record: UserRecord) -> Self {
        Self {
            name: name.to_string(),
            store: record.store,
            log: record.log,
            client: None,
            upstream: None,
            reconnect_at: None,
            connecting: false,
            quitted: false,
            last_seen: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn client(&self) -> Option<SessionId> {
        self.client
    }

    pub fn upstream(&self) -> Option<SessionId> {
        self.upstream
    }

    pub fn is_attached(&self) -> bool {
        self.client.is_some()
    }

    pub fn log(&self) -> &MessageLog {
        &self.log
    }

    // ------------------------------------------------------------------
    // Settings
    // ------------------------------------------------------------------

    /// Non-empty string setting.
    pub fn setting(&self, key: &str) -> Option<String> {
        self.store.read_string(key).filter(|v| !v.is_empty())
    }

    /// Write a setting, logging failures. The in-memory value is kept even
    /// when persisting fails.
    pub fn set_setting(&mut self, key: &str, value: Option<&str>) -> Result<(), StoreError> {
        self.store.write_string(key, value).inspect_err(|e| {
            warn!(user = %self.name, key, error = %e, "Failed to persist setting");
        })
    }

    /// Preferred nick; defaults to the username.
    pub fn nick(&self) -> String {
        self.setting(keys::NICK).unwrap_or_else(|| self.name.clone())
    }

    pub fn realname(&self) -> String {
        self.setting(keys::REALNAME)
            .unwrap_or_else(|| "slbnc user".to_string())
    }

    pub fn server(&self) -> Option<String> {
        self.setting(keys::SERVER)
    }

    pub fn port(&self, default: u16) -> u16 {
        self.store
            .read_integer(keys::PORT)
            .and_then(|p| u16::try_from(p).ok())
            .filter(|p| *p != 0)
            .unwrap_or(default)
    }

    pub fn server_password(&self) -> Option<String> {
        self.setting(keys::SERVER_PASSWORD)
    }

    /// Local address to bind upstream connections to.
    pub fn vhost(&self) -> Option<IpAddr> {
        self.setting(keys::VHOST).and_then(|v| v.parse().ok())
    }

    pub fn away_nick(&self) -> Option<String> {
        self.setting(keys::AWAY_NICK)
    }

    pub fn away_message(&self) -> Option<String> {
        self.setting(keys::AWAY)
    }

    /// Comma-separated channel list rejoined after connecting.
    pub fn channels(&self) -> Option<String> {
        self.setting(keys::CHANNELS)
    }

    pub fn is_admin(&self) -> bool {
        self.store.read_integer(keys::ADMIN).unwrap_or(0) != 0
    }

    pub fn is_locked(&self) -> bool {
        self.store.read_integer(keys::LOCK).unwrap_or(0) != 0
    }

    /// Check a login password.
    pub fn check_password(&self, password: &str) -> bool {
        self.store
            .read_string(keys::PASSWORD)
            .is_some_and(|stored| verify_password(password, &stored))
    }

    /// Append to the user's log, logging failures.
    pub fn log_message(&mut self, text: &str) {
        if let Err(e) = self.log.append(text) {
            warn!(user = %self.name, error = %e, "Failed to write user log");
        }
    }
}

//! The bouncer context.
//!
//! [`Bouncer`] owns every user and every session and is the only thing the
//! reactor talks to. It never blocks: DNS lookups and TCP connects are
//! pushed as [`Request`]s for the reactor to carry out, and their results
//! come back through [`Bouncer::host_resolved`],
//! [`Bouncer::upstream_connected`] and friends on a later turn of the loop.

use super::user::{User, is_valid_username, keys};
use crate::config::{ConfigStore, ServerConfig, Storage, StoreError};
use crate::error::ControlError;
use crate::handlers::{ClientHandler, CommandTable, ReplyStyle, UpstreamHandler};
use crate::history::MessageLog;
use crate::hooks::{Hook, HookChain, ModuleCatalog};
use crate::network::session::{Role, Session, SessionId};
use crate::network::transport::Transport;
use std::collections::{BTreeMap, HashMap};
use std::net::{IpAddr, SocketAddr};
use std::rc::Rc;
use tracing::{debug, info, warn};

/// Delay before reconnecting after losing the upstream.
pub const RECONNECT_SECS: i64 = 5;
/// Delay before retrying after a failed lookup or connect.
pub const CONNECT_RETRY_SECS: i64 = 60;

/// Work the bouncer needs the reactor to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Resolve an upstream host name; answer with [`Bouncer::host_resolved`].
    ResolveHost { token: u64, host: String },
    /// Open a TCP connection for `user`; answer with
    /// [`Bouncer::upstream_connected`] or [`Bouncer::connect_failed`].
    Connect {
        user: String,
        addr: SocketAddr,
        bind: Option<IpAddr>,
    },
    /// Reverse-resolve a peer address; answer with [`Bouncer::addr_resolved`].
    ResolveAddr { token: u64, ip: IpAddr },
    /// The session is gone; stop watching its socket.
    Forget(SessionId),
}

struct WhoRow {
    name: String,
    admin: bool,
    ip: Option<IpAddr>,
    host: Option<String>,
    upstream: Option<String>,
}

/// An admin `who` waiting for reverse lookups.
struct WhoQuery {
    session: SessionId,
    style: ReplyStyle,
    rows: Vec<WhoRow>,
    pending: usize,
}

pub struct Bouncer {
    pub(crate) settings: ServerConfig,
    storage: Box<dyn Storage>,
    system: Box<dyn ConfigStore>,
    pub(crate) main_log: MessageLog,
    pub(crate) users: BTreeMap<String, User>,
    pub(crate) sessions: BTreeMap<SessionId, Session>,
    next_session: u64,
    pub(crate) hooks: HookChain,
    pub(crate) catalog: ModuleCatalog,
    pub(crate) commands: Rc<CommandTable>,
    requests: Vec<Request>,
    next_token: u64,
    /// Host lookups in flight, by token, with the user they are for.
    resolving: HashMap<u64, String>,
    /// Reverse lookups in flight: token -> (query, row).
    who_lookups: HashMap<u64, (u64, usize)>,
    who_queries: HashMap<u64, WhoQuery>,
    dying: bool,
}

impl Bouncer {
    /// Load every user from `storage`. Users with a server configured are
    /// scheduled to connect on the first tick.
    pub fn new(settings: ServerConfig, mut storage: Box<dyn Storage>, now: i64) -> Result<Self, StoreError> {
        let system = storage.system_store()?;
        let main_log = storage.main_log()?;

        let mut users = BTreeMap::new();
        for name in storage.user_names()? {
            let record = storage.open_user(&name)?;
            let mut user = User::new(&name, record);
            if user.server().is_some() {
                user.reconnect_at = Some(now);
            }
            users.insert(name, user);
        }
        info!(users = users.len(), "Loaded users");

        Ok(Self {
            settings,
            storage,
            system,
            main_log,
            users,
            sessions: BTreeMap::new(),
            next_session: 0,
            hooks: HookChain::new(),
            catalog: ModuleCatalog::builtin(),
            commands: Rc::new(CommandTable::new()),
            requests: Vec::new(),
            next_token: 0,
            resolving: HashMap::new(),
            who_lookups: HashMap::new(),
            who_queries: HashMap::new(),
            dying: false,
        })
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn settings(&self) -> &ServerConfig {
        &self.settings
    }

    pub fn user(&self, name: &str) -> Option<&User> {
        self.users.get(name)
    }

    pub fn user_mut(&mut self, name: &str) -> Option<&mut User> {
        self.users.get_mut(name)
    }

    pub fn users(&self) -> impl Iterator<Item = &User> {
        self.users.values()
    }

    pub fn session(&self, id: SessionId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn hooks(&self) -> &HookChain {
        &self.hooks
    }

    /// Whether `die` was requested.
    pub fn is_dying(&self) -> bool {
        self.dying
    }

    /// `die` was requested and every session has gone away.
    pub fn is_finished(&self) -> bool {
        self.dying && self.sessions.is_empty()
    }

    pub(super) fn next_session_id(&mut self) -> SessionId {
        self.next_session += 1;
        SessionId(self.next_session)
    }

    fn next_token(&mut self) -> u64 {
        self.next_token += 1;
        self.next_token
    }

    /// Drain the requests queued since the last call.
    pub fn take_requests(&mut self) -> Vec<Request> {
        std::mem::take(&mut self.requests)
    }

    pub(crate) fn request(&mut self, request: Request) {
        self.requests.push(request);
    }

    // ------------------------------------------------------------------
    // Users
    // ------------------------------------------------------------------

    /// Create a user whose login password hash is `password_hash`.
    pub fn create_user(&mut self, name: &str, password_hash: &str) -> Result<(), ControlError> {
        if !is_valid_username(name) {
            return Err(ControlError::InvalidUsername);
        }
        if self.users.contains_key(name) {
            return Err(ControlError::UserExists);
        }
        let record = self.storage.open_user(name)?;
        let mut user = User::new(name, record);
        user.set_setting(keys::PASSWORD, Some(password_hash))?;
        self.users.insert(name.to_string(), user);
        info!(user = name, "User created");
        self.main_log(&format!("User {name} created."));
        Ok(())
    }

    /// Close both of a user's sessions and delete its settings and log.
    pub fn remove_user(&mut self, name: &str, now: i64) -> Result<(), ControlError> {
        let (client, upstream) = match self.users.get(name) {
            Some(user) => (user.client, user.upstream),
            None => return Err(ControlError::NoSuchUser),
        };
        // Nothing changes in memory unless the store let go of the user.
        self.storage.remove_user(name)?;
        if let Some(id) = client {
            self.kill_session(id, "Your account has been deleted.", now);
        }
        if let Some(id) = upstream {
            self.kill_session(id, "Account deleted", now);
        }
        self.users.remove(name);
        info!(user = name, "User removed");
        self.main_log(&format!("User {name} deleted."));
        Ok(())
    }

    // ------------------------------------------------------------------
    // Global settings and logs
    // ------------------------------------------------------------------

    pub fn system_setting(&self, key: &str) -> Option<String> {
        self.system.read_string(key).filter(|v| !v.is_empty())
    }

    pub fn set_system_setting(&mut self, key: &str, value: Option<&str>) -> Result<(), StoreError> {
        self.system.write_string(key, value)
    }

    /// Append to the main log, logging failures.
    pub fn main_log(&mut self, text: &str) {
        if let Err(e) = self.main_log.append(text) {
            warn!(error = %e, "Failed to write main log");
        }
    }

    // ------------------------------------------------------------------
    // Modules
    // ------------------------------------------------------------------

    /// Instantiate a catalogued module and append it to the hook chain.
    pub fn load_module(&mut self, name: &str) -> Option<usize> {
        let hook = self.catalog.create(name)?;
        Some(self.add_hook(hook))
    }

    /// Append an interceptor that is not in the catalog.
    pub fn add_hook(&mut self, hook: Box<dyn Hook>) -> usize {
        let name = hook.name();
        let id = self.hooks.push(hook);
        info!(module = name, id, "Module loaded");
        id
    }

    // ------------------------------------------------------------------
    // Sessions and timers
    // ------------------------------------------------------------------

    /// Register a freshly accepted client connection.
    pub fn accept(&mut self, transport: Box<dyn Transport>, now: i64) -> SessionId {
        let id = self.next_session_id();
        let peer = transport.peer_addr();
        let session = Session::new(id, transport, Role::Client(ClientHandler::new(peer)), now);
        self.sessions.insert(id, session);
        info!(session = %id, ?peer, "Client connected");
        id
    }

    /// Once-per-second housekeeping: reap expired sessions, start due
    /// reconnects.
    pub fn tick(&mut self, now: i64) {
        let expired: Vec<SessionId> = self
            .sessions
            .values()
            .filter(|s| s.is_closed() || s.timed_out(now))
            .map(Session::id)
            .collect();
        for id in expired {
            debug!(session = %id, "Session timed out");
            self.destroy_session(id, now);
        }

        if self.dying {
            return;
        }
        let due: Vec<String> = self
            .users
            .values()
            .filter(|u| u.upstream.is_none() && !u.connecting)
            .filter(|u| u.reconnect_at.is_some_and(|at| at <= now))
            .map(|u| u.name().to_string())
            .collect();
        for name in due {
            self.connect_upstream(&name);
        }
    }

    /// Start connecting `name` to its configured server.
    fn connect_upstream(&mut self, name: &str) {
        let token = self.next_token();
        let Some(user) = self.users.get_mut(name) else {
            return;
        };
        user.reconnect_at = None;
        let Some(host) = user.server() else {
            return;
        };
        user.connecting = true;
        info!(user = name, %host, "Resolving upstream server");
        self.resolving.insert(token, name.to_string());
        self.request(Request::ResolveHost { token, host });
    }

    /// Result of a [`Request::ResolveHost`].
    pub fn host_resolved(&mut self, token: u64, result: Result<IpAddr, String>, now: i64) {
        let Some(name) = self.resolving.remove(&token) else {
            return;
        };
        let system_vhost = self
            .system_setting(keys::SYSTEM_VHOST)
            .and_then(|v| v.parse::<IpAddr>().ok());
        let default_port = self.settings.default_port;
        let Some(user) = self.users.get_mut(&name) else {
            return;
        };

        match result {
            Ok(ip) => {
                let addr = SocketAddr::new(ip, user.port(default_port));
                let bind = user.vhost().or(system_vhost);
                debug!(user = %name, %addr, ?bind, "Connecting upstream");
                self.request(Request::Connect { user: name, addr, bind });
            }
            Err(e) => {
                user.connecting = false;
                user.reconnect_at = Some(now + CONNECT_RETRY_SECS);
                warn!(user = %name, error = %e, "Upstream lookup failed");
                self.notice_user(&name, &format!("Cannot resolve IRC server: {e}"));
            }
        }
    }

    /// The TCP connection for `name` is up. Returns the new session id, or
    /// `None` when the connection is no longer wanted.
    pub fn upstream_connected(&mut self, name: &str, transport: Box<dyn Transport>, now: i64) -> Option<SessionId> {
        if self.dying {
            return None;
        }
        let id = self.next_session_id();
        let user = self.users.get_mut(name)?;
        user.connecting = false;
        if user.upstream.is_some() {
            return None;
        }

        let handler = UpstreamHandler::new(&user.nick(), now);
        let password = user.server_password();
        let greeting = handler.greeting(name, &user.realname(), password.as_deref());

        let mut session = Session::new(id, transport, Role::Upstream(Box::new(handler)), now);
        session.owner = Some(name.to_string());
        for line in &greeting {
            session.queue_line(line);
        }
        user.upstream = Some(id);
        let server = user.server().unwrap_or_default();
        self.sessions.insert(id, session);

        info!(session = %id, user = name, %server, "Upstream connected");
        self.notice_user(name, &format!("Connected to {server}, registering."));
        Some(id)
    }

    /// The TCP connect for `name` failed.
    pub fn connect_failed(&mut self, name: &str, error: &str, now: i64) {
        let Some(user) = self.users.get_mut(name) else {
            return;
        };
        user.connecting = false;
        user.reconnect_at = Some(now + CONNECT_RETRY_SECS);
        warn!(user = name, error, "Upstream connect failed");
        self.notice_user(name, &format!("Cannot connect to IRC server: {error}"));
        self.main_log(&format!("{name} could not connect: {error}"));
    }

    /// Drop the current upstream (if any) and reconnect right away.
    pub fn jump(&mut self, name: &str, now: i64) -> Result<(), ControlError> {
        let user = self.users.get_mut(name).ok_or(ControlError::NoSuchUser)?;
        if user.server().is_none() {
            return Err(ControlError::Usage("set server <host> [port]"));
        }
        user.quitted = false;
        if let Some(up) = user.upstream {
            self.kill_session(up, "Changing servers", now);
        }
        if let Some(user) = self.users.get_mut(name) {
            user.reconnect_at = Some(now);
        }
        Ok(())
    }

    /// Stop accepting work and close every session.
    pub fn die(&mut self, by: &str, now: i64) {
        info!(by, "Shutdown requested");
        self.main_log(&format!("Shutdown requested by {by}."));
        self.global_notice("The bouncer is shutting down.");
        self.dying = true;
        let ids: Vec<SessionId> = self.sessions.keys().copied().collect();
        for id in ids {
            self.kill_session(id, "Bouncer shutting down", now);
        }
    }

    // ------------------------------------------------------------------
    // Admin `who`
    // ------------------------------------------------------------------

    /// List users; peer addresses are reverse-resolved before replying.
    pub(crate) fn start_who(&mut self, session: SessionId, style: ReplyStyle) {
        let rows: Vec<WhoRow> = self
            .users
            .values()
            .map(|user| WhoRow {
                name: user.name().to_string(),
                admin: user.is_admin(),
                ip: user
                    .client
                    .and_then(|c| self.sessions.get(&c))
                    .and_then(Session::peer_addr)
                    .map(|a| a.ip()),
                host: None,
                upstream: self
                    .upstream_handler(user.name())
                    .and_then(|up| up.server())
                    .map(str::to_owned),
            })
            .collect();

        let query_id = self.next_token();
        let mut pending = 0;
        for (row, ip) in rows.iter().enumerate().filter_map(|(i, r)| r.ip.map(|ip| (i, ip))) {
            let token = self.next_token();
            self.who_lookups.insert(token, (query_id, row));
            self.requests.push(Request::ResolveAddr { token, ip });
            pending += 1;
        }

        let query = WhoQuery {
            session,
            style,
            rows,
            pending,
        };
        if pending == 0 {
            self.finish_who(query);
        } else {
            self.who_queries.insert(query_id, query);
        }
    }

    /// Result of a [`Request::ResolveAddr`].
    pub fn addr_resolved(&mut self, token: u64, name: Option<String>) {
        let Some((query_id, row)) = self.who_lookups.remove(&token) else {
            return;
        };
        let done = match self.who_queries.get_mut(&query_id) {
            Some(query) => {
                if let Some(r) = query.rows.get_mut(row) {
                    r.host = name;
                }
                query.pending = query.pending.saturating_sub(1);
                query.pending == 0
            }
            None => false,
        };
        if done && let Some(query) = self.who_queries.remove(&query_id) {
            self.finish_who(query);
        }
    }

    fn finish_who(&mut self, query: WhoQuery) {
        for row in &query.rows {
            let from = match (&row.host, row.ip) {
                (Some(host), Some(ip)) => format!("from {host} [{ip}]"),
                (None, Some(ip)) => format!("from {ip}"),
                _ => "detached".to_string(),
            };
            let text = format!(
                "{}{} {from}, upstream {}",
                row.name,
                if row.admin { " (admin)" } else { "" },
                row.upstream.as_deref().unwrap_or("none")
            );
            self.reply(query.session, query.style, &text);
        }
        self.reply(query.session, query.style, "End of user list.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryStorage;
    use crate::security::hash_password;

    fn bouncer() -> Bouncer {
        Bouncer::new(ServerConfig::default(), Box::new(MemoryStorage::new()), 0).unwrap()
    }

    #[test]
    fn create_and_remove_users() {
        let mut b = bouncer();
        let hash = hash_password("secret").unwrap();
        b.create_user("bob", &hash).unwrap();
        assert!(b.user("bob").unwrap().check_password("secret"));
        assert!(matches!(b.create_user("bob", &hash), Err(ControlError::UserExists)));
        assert!(matches!(b.create_user("bad name", &hash), Err(ControlError::InvalidUsername)));
        b.remove_user("bob", 0).unwrap();
        assert!(b.user("bob").is_none());
        assert!(matches!(b.remove_user("bob", 0), Err(ControlError::NoSuchUser)));
    }

    /// Memory storage that refuses to delete anything.
    struct StuckStorage(MemoryStorage);

    impl Storage for StuckStorage {
        fn system_store(&mut self) -> Result<Box<dyn ConfigStore>, StoreError> {
            self.0.system_store()
        }

        fn main_log(&mut self) -> Result<MessageLog, StoreError> {
            self.0.main_log()
        }

        fn user_names(&self) -> Result<Vec<String>, StoreError> {
            self.0.user_names()
        }

        fn open_user(&mut self, name: &str) -> Result<crate::config::UserRecord, StoreError> {
            self.0.open_user(name)
        }

        fn remove_user(&mut self, _name: &str) -> Result<(), StoreError> {
            Err(std::io::Error::from(std::io::ErrorKind::PermissionDenied).into())
        }
    }

    #[test]
    fn failed_removal_keeps_the_user() {
        let storage = StuckStorage(MemoryStorage::new());
        let mut b = Bouncer::new(ServerConfig::default(), Box::new(storage), 0).unwrap();
        b.create_user("bob", &hash_password("secret").unwrap()).unwrap();

        assert!(matches!(b.remove_user("bob", 0), Err(ControlError::Store(_))));
        assert!(b.user("bob").unwrap().check_password("secret"));
    }

    #[test]
    fn tick_starts_due_connects() {
        let mut b = bouncer();
        b.create_user("bob", "x").unwrap();
        let user = b.user_mut("bob").unwrap();
        user.set_setting(keys::SERVER, Some("irc.example.net")).unwrap();
        user.reconnect_at = Some(10);

        b.tick(5);
        assert!(b.take_requests().is_empty());

        b.tick(10);
        let requests = b.take_requests();
        let [Request::ResolveHost { token, host }] = requests.as_slice() else {
            panic!("expected a host lookup, got {requests:?}");
        };
        assert_eq!(host, "irc.example.net");

        b.host_resolved(*token, Ok("127.0.0.1".parse().unwrap()), 11);
        assert_eq!(
            b.take_requests(),
            vec![Request::Connect {
                user: "bob".into(),
                addr: "127.0.0.1:6667".parse().unwrap(),
                bind: None,
            }]
        );
    }

    #[test]
    fn failed_lookup_retries_later() {
        let mut b = bouncer();
        b.create_user("bob", "x").unwrap();
        let user = b.user_mut("bob").unwrap();
        user.set_setting(keys::SERVER, Some("nowhere.invalid")).unwrap();
        user.reconnect_at = Some(0);
        b.tick(0);
        let token = match b.take_requests().as_slice() {
            [Request::ResolveHost { token, .. }] => *token,
            other => panic!("unexpected {other:?}"),
        };
        b.host_resolved(token, Err("NXDOMAIN".into()), 3);
        let user = b.user("bob").unwrap();
        assert!(!user.connecting);
        assert_eq!(user.reconnect_at, Some(3 + CONNECT_RETRY_SECS));
    }

    #[test]
    fn vhost_binds_connect() {
        let mut b = bouncer();
        b.set_system_setting(keys::SYSTEM_VHOST, Some("10.0.0.1")).unwrap();
        b.create_user("bob", "x").unwrap();
        let user = b.user_mut("bob").unwrap();
        user.set_setting(keys::SERVER, Some("irc.example.net")).unwrap();
        user.set_setting(keys::PORT, Some("7000")).unwrap();
        user.reconnect_at = Some(0);
        b.tick(0);
        let token = match b.take_requests().as_slice() {
            [Request::ResolveHost { token, .. }] => *token,
            other => panic!("unexpected {other:?}"),
        };
        b.host_resolved(token, Ok("192.0.2.1".parse().unwrap()), 0);
        assert_eq!(
            b.take_requests(),
            vec![Request::Connect {
                user: "bob".into(),
                addr: "192.0.2.1:7000".parse().unwrap(),
                bind: Some("10.0.0.1".parse().unwrap()),
            }]
        );
    }
}

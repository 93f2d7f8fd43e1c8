//! The relay: binding a user's client and upstream sessions, and moving
//! lines between them.
//!
//! Attach and detach are the only operations that change a user's session
//! slots, and each completes within one call so no half-attached state is
//! ever visible to the next event.

use super::bouncer::{Bouncer, RECONNECT_SECS, Request};
use super::user::keys;
use crate::error::ControlError;
use crate::handlers::synth::{self, isupport_lines};
use crate::handlers::{ClientHandler, ReplyStyle, UpstreamAction, UpstreamCtx, UpstreamHandler};
use crate::hooks::{Direction, HookContext, HookReplies, Verdict};
use crate::network::session::{Role, RoleKind, Session, SessionId};
use crate::network::transport::NullTransport;
use slbnc_proto::LineRef;
use slbnc_proto::response::{RPL_WELCOME, code};
use tracing::{debug, info, warn};

impl Bouncer {
    // ------------------------------------------------------------------
    // Output helpers
    // ------------------------------------------------------------------

    /// Queue a line on any session.
    pub(crate) fn send_to(&mut self, id: SessionId, line: &str) {
        if let Some(session) = self.sessions.get_mut(&id) {
            session.queue_line(line);
        }
    }

    pub(crate) fn send_raw_to(&mut self, id: SessionId, line: &[u8]) {
        if let Some(session) = self.sessions.get_mut(&id) {
            session.queue_bytes(line);
        }
    }

    /// Queue a line on `user`'s upstream, if connected.
    pub(crate) fn send_upstream(&mut self, user: &str, line: &str) {
        self.send_upstream_raw(user, line.as_bytes());
    }

    pub(crate) fn send_upstream_raw(&mut self, user: &str, line: &[u8]) {
        if let Some(id) = self.users.get(user).and_then(|u| u.upstream) {
            self.send_raw_to(id, line);
        }
    }

    pub(crate) fn has_upstream(&self, user: &str) -> bool {
        self.users.get(user).is_some_and(|u| u.upstream.is_some())
    }

    /// Protocol state of `user`'s upstream.
    pub fn upstream_handler(&self, user: &str) -> Option<&UpstreamHandler> {
        let id = self.users.get(user)?.upstream?;
        match &self.sessions.get(&id)?.role {
            Role::Upstream(handler) => Some(handler.as_ref()),
            _ => None,
        }
    }

    fn client_handler(&self, id: SessionId) -> Option<&ClientHandler> {
        match &self.sessions.get(&id)?.role {
            Role::Client(handler) => Some(handler),
            _ => None,
        }
    }

    fn set_client_nick(&mut self, id: SessionId, nick: &str) {
        if let Some(Role::Client(handler)) = self.sessions.get_mut(&id).map(|s| &mut s.role) {
            handler.nick = Some(nick.to_string());
        }
    }

    /// Nick the client on `id` believes it has, or `*`.
    pub(crate) fn client_nick(&self, id: SessionId) -> String {
        self.client_handler(id)
            .and_then(ClientHandler::nick)
            .unwrap_or("*")
            .to_string()
    }

    fn pseudo_origin(&self) -> String {
        let pseudo = &self.settings.pseudo_nick;
        format!("{pseudo}!{pseudo}@{}", self.settings.name)
    }

    /// Reply from the pseudo-nick in the given style.
    pub(crate) fn reply(&mut self, id: SessionId, style: ReplyStyle, text: &str) {
        let verb = match style {
            ReplyStyle::Privmsg => "PRIVMSG",
            ReplyStyle::Notice => "NOTICE",
        };
        let line = format!(":{} {verb} {} :{text}", self.pseudo_origin(), self.client_nick(id));
        self.send_to(id, &line);
    }

    /// Notice to `user`'s attached client; dropped when detached.
    pub(crate) fn notice_user(&mut self, user: &str, text: &str) {
        if let Some(id) = self.users.get(user).and_then(|u| u.client) {
            self.reply(id, ReplyStyle::Notice, text);
        }
    }

    /// Notice every attached client.
    pub fn global_notice(&mut self, text: &str) {
        let clients: Vec<SessionId> = self.users.values().filter_map(|u| u.client).collect();
        for id in clients {
            self.reply(id, ReplyStyle::Notice, text);
        }
    }

    // ------------------------------------------------------------------
    // Hooks
    // ------------------------------------------------------------------

    /// Give the hook chain first refusal on a line and send whatever the
    /// hooks asked for.
    pub(crate) fn offer_hooks(&mut self, direction: Direction, user: &str, nick: &str, line: &LineRef<'_>) -> Verdict {
        let client = self.users.get(user).and_then(|u| u.client);
        let ctx = HookContext {
            user,
            nick,
            attached: client.is_some(),
            line,
        };
        self.run_hooks(direction, &ctx, client)
    }

    /// Offer a line from a client that has not logged in. Hooks see an
    /// empty user and their upstream replies are dropped.
    pub(crate) fn offer_login_hooks(&mut self, id: SessionId, nick: &str, line: &LineRef<'_>) -> Verdict {
        let ctx = HookContext {
            user: "",
            nick,
            attached: false,
            line,
        };
        self.run_hooks(Direction::Outbound, &ctx, Some(id))
    }

    fn run_hooks(&mut self, direction: Direction, ctx: &HookContext<'_, '_>, client: Option<SessionId>) -> Verdict {
        if self.hooks.is_empty() {
            return Verdict::Allow;
        }
        let mut replies = HookReplies::default();
        let verdict = self.hooks.offer(direction, ctx, &mut replies);

        if !ctx.user.is_empty() {
            for line in &replies.upstream {
                self.send_upstream(ctx.user, line);
            }
        }
        if let Some(id) = client {
            for line in &replies.client {
                self.send_to(id, line);
            }
        }
        if verdict == Verdict::Deny {
            debug!(user = ctx.user, ?direction, verb = ctx.line.verb, "Line suppressed by hook");
        }
        verdict
    }

    // ------------------------------------------------------------------
    // Attach / detach
    // ------------------------------------------------------------------

    /// Bind client session `id` to `user`, replacing any previous client.
    pub(crate) fn attach(&mut self, user: &str, id: SessionId, now: i64) {
        let previous = self.users.get(user).and_then(|u| u.client);
        if let Some(old) = previous.filter(|old| *old != id) {
            if let Some(u) = self.users.get_mut(user) {
                u.client = None;
            }
            if let Some(session) = self.sessions.get_mut(&old) {
                session.owner = None;
            }
            info!(user, session = %old, "Replacing attached client");
            self.kill_session(old, "Another client logged in as you.", now);
        }

        let Some(u) = self.users.get_mut(user) else {
            return;
        };
        u.client = Some(id);
        u.last_seen = Some(now);
        if let Some(session) = self.sessions.get_mut(&id) {
            session.owner = Some(user.to_string());
        }
        info!(user, session = %id, "Client attached");

        self.send_burst(user, id);
        self.revert_away(user);
    }

    /// Welcome a freshly attached client with the state it missed.
    fn send_burst(&mut self, user: &str, id: SessionId) {
        let bnc = self.settings.name.clone();
        let client_nick = self.client_nick(id);
        let mut lines = Vec::new();
        let mut ask_upstream = Vec::new();
        let mut network_nick = None;

        match self.upstream_handler(user).filter(|up| up.is_registered()) {
            Some(up) => {
                let srv = up.server().unwrap_or(bnc.as_str()).to_string();
                let nick = up.nick();
                lines.push(format!(
                    ":{srv} {} {client_nick} :Welcome back to slbnc, {nick}",
                    code(RPL_WELCOME)
                ));
                if client_nick != nick {
                    lines.push(format!(":{client_nick} NICK :{nick}"));
                    network_nick = Some(nick.to_string());
                }
                lines.extend(isupport_lines(&srv, nick, up.isupport()));

                let mask = up
                    .self_userhost()
                    .map_or_else(|| format!("{user}@{bnc}"), str::to_owned);
                for channel in up.channels() {
                    let name = &channel.name;
                    lines.push(format!(":{nick}!{mask} JOIN :{name}"));
                    match synth::topic_reply(up, &bnc, name) {
                        Some(topic) => lines.extend(topic),
                        None => ask_upstream.push(format!("TOPIC {name}")),
                    }
                    match synth::names_reply(up, &bnc, name) {
                        Some(names) => lines.extend(names),
                        None => ask_upstream.push(format!("NAMES {name}")),
                    }
                }
            }
            None => {
                lines.push(format!(
                    ":{bnc} {} {client_nick} :Welcome to slbnc, {client_nick}",
                    code(RPL_WELCOME)
                ));
            }
        }

        for line in &lines {
            self.send_to(id, line);
        }
        for line in &ask_upstream {
            self.send_upstream(user, line);
        }
        if let Some(nick) = network_nick {
            self.set_client_nick(id, &nick);
        }

        if !self.has_upstream(user) {
            self.reply(id, ReplyStyle::Notice, "You are not connected to an IRC server.");
        }
        if let Some(motd) = self.system_setting(keys::SYSTEM_MOTD) {
            self.reply(id, ReplyStyle::Notice, &motd);
        }
        if self.users.get(user).is_some_and(|u| !u.log().is_empty()) {
            self.reply(
                id,
                ReplyStyle::Notice,
                "You have new messages. Use /slbnc read to read them.",
            );
        }
    }

    /// Undo what [`Bouncer::detach`] told the network.
    fn revert_away(&mut self, user: &str) {
        if !self.upstream_handler(user).is_some_and(|up| up.is_registered()) {
            return;
        }
        let Some(u) = self.users.get(user) else {
            return;
        };
        let mut lines = Vec::new();
        if u.away_nick().is_some() {
            lines.push(format!("NICK {}", u.nick()));
        }
        if u.away_message().is_some() {
            lines.push("AWAY".to_string());
        }
        for line in &lines {
            self.send_upstream(user, line);
        }
    }

    /// Unbind `user`'s client. The upstream stays as it is, apart from the
    /// configured away nick and message.
    pub(crate) fn detach(&mut self, user: &str) {
        let Some(u) = self.users.get_mut(user) else {
            return;
        };
        u.client = None;
        let mut lines = Vec::new();
        if let Some(nick) = u.away_nick() {
            lines.push(format!("NICK {nick}"));
        }
        if let Some(message) = u.away_message() {
            lines.push(format!("AWAY :{message}"));
        }
        info!(user, "Client detached");

        if self.upstream_handler(user).is_some_and(|up| up.is_registered()) {
            for line in &lines {
                self.send_upstream(user, line);
            }
        }
    }

    // ------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------

    /// Ask a session to leave: farewell line, detach from its user, linger
    /// until flushed. Does not schedule a reconnect.
    pub fn kill_session(&mut self, id: SessionId, reason: &str, now: i64) {
        let origin = self.settings.name.clone();
        let Some(session) = self.sessions.get_mut(&id) else {
            return;
        };
        if !session.kill(reason, &origin, now) {
            return;
        }
        let kind = session.role.kind();
        let owner = session.owner.take();
        debug!(session = %id, reason, "Session killed");

        let Some(owner) = owner else {
            return;
        };
        match kind {
            RoleKind::Client => {
                if self.users.get(&owner).is_some_and(|u| u.client == Some(id)) {
                    self.detach(&owner);
                }
            }
            RoleKind::Upstream => {
                if let Some(u) = self.users.get_mut(&owner).filter(|u| u.upstream == Some(id)) {
                    u.upstream = None;
                }
            }
            RoleKind::Unknown => {}
        }
    }

    /// Remove a session for good. An upstream lost this way schedules a
    /// reconnect unless the user asked to stay offline.
    pub fn destroy_session(&mut self, id: SessionId, now: i64) {
        let Some(mut session) = self.sessions.remove(&id) else {
            return;
        };
        session.close();
        self.request(Request::Forget(id));
        info!(session = %id, "Session closed");

        let Some(owner) = session.owner.take() else {
            return;
        };
        match session.role.kind() {
            RoleKind::Client => {
                if self.users.get(&owner).is_some_and(|u| u.client == Some(id)) {
                    self.detach(&owner);
                }
            }
            RoleKind::Upstream => {
                let dying = self.is_dying();
                let Some(u) = self.users.get_mut(&owner).filter(|u| u.upstream == Some(id)) else {
                    return;
                };
                u.upstream = None;
                if !u.quitted && !dying && u.reconnect_at.is_none() {
                    u.reconnect_at = Some(now + RECONNECT_SECS);
                }
                warn!(user = %owner, session = %id, "Lost upstream connection");
                self.notice_user(&owner, "Lost connection to the IRC server.");
                self.main_log(&format!("{owner} lost the connection to the IRC server."));
            }
            RoleKind::Unknown => {}
        }
    }

    // ------------------------------------------------------------------
    // Upstream lines
    // ------------------------------------------------------------------

    /// State machine first, then hooks, then the relay to the client.
    pub(crate) fn upstream_line(&mut self, id: SessionId, raw: &[u8], now: i64) {
        let text = String::from_utf8_lossy(raw);
        let line = match LineRef::parse(&text) {
            Ok(line) => line,
            Err(e) => {
                debug!(session = %id, error = %e, "Ignoring malformed upstream line");
                return;
            }
        };
        let Some(owner) = self.sessions.get(&id).and_then(|s| s.owner.clone()) else {
            return;
        };
        let Some(user) = self.users.get(&owner) else {
            return;
        };
        let client = user.client;
        let autojoin = user.channels();
        let client_nick = client.map(|c| self.client_nick(c));
        let ctx = UpstreamCtx {
            attached: client.is_some(),
            client_nick: client_nick.as_deref(),
            autojoin: autojoin.as_deref(),
            now,
        };

        let Some(Role::Upstream(up)) = self.sessions.get_mut(&id).map(|s| &mut s.role) else {
            return;
        };
        let feed = up.feed(&line, &ctx);
        let network_nick = up.nick().to_string();
        let server = up.server().unwrap_or("IRC").to_string();
        let channel_list = feed
            .actions
            .contains(&UpstreamAction::ChannelsChanged)
            .then(|| up.channel_list());

        for action in feed.actions {
            match action {
                UpstreamAction::Send(out) => self.send_to(id, &out),
                UpstreamAction::ClientNick { from, to } => {
                    if let Some(c) = client {
                        self.send_to(c, &format!(":{from} NICK :{to}"));
                        self.set_client_nick(c, &to);
                    }
                }
                UpstreamAction::Log(text) => {
                    if let Some(u) = self.users.get_mut(&owner) {
                        u.log_message(&text);
                    }
                }
                UpstreamAction::Notice(text) => match client {
                    Some(c) => self.reply(c, ReplyStyle::Notice, &text),
                    None => {
                        if let Some(u) = self.users.get_mut(&owner) {
                            u.log_message(&text);
                        }
                    }
                },
                UpstreamAction::ChannelsChanged => {
                    let list = channel_list.as_deref().filter(|l| !l.is_empty());
                    if let Some(u) = self.users.get_mut(&owner) {
                        let _ = u.set_setting(keys::CHANNELS, list);
                    }
                }
                UpstreamAction::Reconnect(delay) => {
                    if let Some(u) = self.users.get_mut(&owner) {
                        u.reconnect_at = Some(now + delay);
                    }
                }
                UpstreamAction::NickChanged(nick) => {
                    if let Some(u) = self.users.get_mut(&owner) {
                        let _ = u.set_setting(keys::NICK, Some(&nick));
                    }
                }
                UpstreamAction::Connected => {
                    info!(user = %owner, %server, nick = %network_nick, "Registered with upstream");
                    self.main_log(&format!("{owner} connected to {server} as {network_nick}."));
                    self.notice_user(&owner, &format!("Connected to {server}."));
                }
            }
        }

        let verdict = self.offer_hooks(Direction::Inbound, &owner, &network_nick, &line);
        if !feed.relay || verdict == Verdict::Deny {
            return;
        }
        if let Some(c) = client {
            if line.is("NICK")
                && let (Some(old), Some(new), Some(current)) = (line.source_nick(), line.arg(0), client_nick.as_deref())
                && old == current
            {
                self.set_client_nick(c, new);
            }
            self.send_raw_to(c, raw);
        }
    }

    // ------------------------------------------------------------------
    // SIMUL
    // ------------------------------------------------------------------

    /// Run `line` as if `user`'s client had sent it. Without an attached
    /// client a throwaway session stands in for one.
    pub fn simulate(&mut self, user: &str, line: &str, now: i64) -> Result<(), ControlError> {
        let u = self.users.get(user).ok_or(ControlError::NoSuchUser)?;
        debug!(user, line, "Simulating client line");
        if let Some(id) = u.client {
            self.client_line(id, line.as_bytes(), now);
            return Ok(());
        }

        let mut handler = ClientHandler::new(None);
        handler.nick = Some(u.nick());
        let id = self.next_session_id();
        let mut session = Session::new(id, Box::new(NullTransport), Role::Client(handler), now);
        session.owner = Some(user.to_string());
        self.sessions.insert(id, session);
        self.client_line(id, line.as_bytes(), now);
        if let Some(mut session) = self.sessions.remove(&id) {
            session.close();
        }
        Ok(())
    }
}

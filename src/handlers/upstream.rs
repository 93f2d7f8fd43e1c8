//! Upstream role: the bouncer acting as an IRC client toward the network.
//!
//! [`UpstreamHandler`] is a sans-IO state machine. Each line from the
//! network is fed in; the handler updates its channel/nick/topic/mode cache
//! and returns the [`UpstreamAction`]s the bouncer must carry out, plus
//! whether the line should be relayed to an attached client.

use crate::state::{Channel, Topic};
use slbnc_proto::response::{
    ERR_NICKNAMEINUSE, ERR_NOMOTD, RPL_CHANNELMODEIS, RPL_CREATIONTIME, RPL_ENDOFMOTD,
    RPL_ENDOFNAMES, RPL_ISUPPORT, RPL_NAMREPLY, RPL_NOTOPIC, RPL_TOPIC, RPL_TOPICWHOTIME,
    RPL_VERSION, RPL_WELCOME, RPL_WHOREPLY,
};
use slbnc_proto::{Casemapping, Hostmask, ISupportTable, LineRef};
use std::collections::BTreeMap;
use tracing::debug;

/// Nick collision retries per connection before giving up.
pub const MAX_NICK_RETRIES: u32 = 8;
/// Reconnect delay after an ERROR that mentions throttling.
pub const THROTTLED_RECONNECT_SECS: i64 = 50;
/// Reconnect delay after any other ERROR.
pub const ERROR_RECONNECT_SECS: i64 = 5;

/// What the handler needs to know about the rest of the bouncer.
#[derive(Debug, Clone, Copy)]
pub struct UpstreamCtx<'a> {
    /// A client is attached to the owning user.
    pub attached: bool,
    /// Nick the attached client believes it has.
    pub client_nick: Option<&'a str>,
    /// Persisted channel list to join after the MOTD.
    pub autojoin: Option<&'a str>,
    pub now: i64,
}

/// Side effects requested by the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamAction {
    /// Send a line to the network.
    Send(String),
    /// Tell the attached client its nick changed.
    ClientNick { from: String, to: String },
    /// Append to the user's message log.
    Log(String),
    /// Notify the user through the bouncer's pseudo-nick.
    Notice(String),
    /// The joined channel set changed; persist it.
    ChannelsChanged,
    /// Reconnect after the given number of seconds.
    Reconnect(i64),
    /// Registration finished (end of MOTD).
    Connected,
    /// The network accepted a nick the attached client asked for.
    NickChanged(String),
}

/// Result of feeding one line.
#[derive(Debug)]
pub struct Feed {
    pub actions: Vec<UpstreamAction>,
    /// Whether the line may be relayed to an attached client.
    pub relay: bool,
}

impl Feed {
    fn push(&mut self, action: UpstreamAction) {
        self.actions.push(action);
    }
}

/// Protocol state of one upstream connection.
pub struct UpstreamHandler {
    nick: String,
    desired_nick: String,
    nick_attempts: u32,
    self_userhost: Option<String>,
    server: Option<String>,
    version: Option<String>,
    features: Option<String>,
    isupport: ISupportTable,
    casemap: Casemapping,
    channels: BTreeMap<String, Channel>,
    registered: bool,
    motd_done: bool,
    last_burst: i64,
}

impl UpstreamHandler {
    pub fn new(nick: &str, now: i64) -> Self {
        let isupport = ISupportTable::new();
        let casemap = isupport.casemapping();
        Self {
            nick: nick.to_string(),
            desired_nick: nick.to_string(),
            nick_attempts: 0,
            self_userhost: None,
            server: None,
            version: None,
            features: None,
            isupport,
            casemap,
            channels: BTreeMap::new(),
            registered: false,
            motd_done: false,
            last_burst: now,
        }
    }

    /// Registration lines sent as soon as the connection is up.
    pub fn greeting(&self, username: &str, realname: &str, password: Option<&str>) -> Vec<String> {
        let mut lines = Vec::with_capacity(3);
        if let Some(password) = password {
            lines.push(format!("PASS :{password}"));
        }
        lines.push(format!("NICK {}", self.nick));
        lines.push(format!("USER {username} 0 * :{realname}"));
        lines
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// Nick currently held (or being attempted) on the network.
    pub fn nick(&self) -> &str {
        &self.nick
    }

    /// Server name from the welcome numeric.
    pub fn server(&self) -> Option<&str> {
        self.server.as_deref()
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn features(&self) -> Option<&str> {
        self.features.as_deref()
    }

    pub fn isupport(&self) -> &ISupportTable {
        &self.isupport
    }

    pub fn casemapping(&self) -> Casemapping {
        self.casemap
    }

    /// Own `ident@host`, once seen.
    pub fn self_userhost(&self) -> Option<&str> {
        self.self_userhost.as_deref()
    }

    pub fn is_registered(&self) -> bool {
        self.registered
    }

    pub fn channel(&self, name: &str) -> Option<&Channel> {
        self.channels.get(&self.casemap.fold(name))
    }

    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.channels.values()
    }

    /// Joined channels as a comma-separated list.
    pub fn channel_list(&self) -> String {
        self.channels
            .values()
            .map(|c| c.name.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Whether a throttled flush is allowed at `now`.
    pub fn throttle_ready(&self, now: i64) -> bool {
        now - self.last_burst >= 1
    }

    /// Record a throttled flush.
    pub fn mark_burst(&mut self, now: i64) {
        self.last_burst = now;
    }

    // ------------------------------------------------------------------
    // Line processing
    // ------------------------------------------------------------------

    /// Process one line from the network.
    pub fn feed(&mut self, line: &LineRef<'_>, ctx: &UpstreamCtx<'_>) -> Feed {
        let mut feed = Feed {
            actions: Vec::new(),
            relay: true,
        };

        if let Some(mask) = line.source()
            && let Some(userhost) = mask.userhost()
        {
            self.learn_userhost(mask.nick, &userhost);
        }

        match line.numeric() {
            Some(numeric) => self.on_numeric(numeric, line, ctx, &mut feed),
            None => self.on_verb(line, ctx, &mut feed),
        }
        feed
    }

    fn is_self(&self, nick: &str) -> bool {
        self.casemap.eq(nick, &self.nick)
    }

    fn channel_mut(&mut self, name: &str) -> Option<&mut Channel> {
        let key = self.casemap.fold(name);
        self.channels.get_mut(&key)
    }

    /// Set a nick's host in every channel where it is not yet known.
    fn learn_userhost(&mut self, nick: &str, userhost: &str) {
        let key = self.casemap.fold(nick);
        for channel in self.channels.values_mut() {
            if let Some(entry) = channel.member_mut(&key) {
                entry.learn_userhost(userhost);
            }
        }
        if self.self_userhost.is_none() && self.is_self(nick) {
            self.self_userhost = Some(userhost.to_string());
        }
    }

    fn on_verb(&mut self, line: &LineRef<'_>, ctx: &UpstreamCtx<'_>, feed: &mut Feed) {
        let map = self.casemap;
        let origin = line.source_nick();

        match line.verb.to_ascii_uppercase().as_str() {
            "PING" => {
                feed.relay = false;
                feed.push(UpstreamAction::Send(match line.arg(0) {
                    Some(token) => format!("PONG :{token}"),
                    None => "PONG".to_string(),
                }));
            }
            "ERROR" => {
                let text = line.last().unwrap_or("");
                let delay = if text.to_ascii_lowercase().contains("throttl") {
                    THROTTLED_RECONNECT_SECS
                } else {
                    ERROR_RECONNECT_SECS
                };
                debug!(reason = text, delay, "Upstream sent ERROR");
                feed.push(UpstreamAction::Reconnect(delay));
            }
            "PRIVMSG" => {
                if let (Some(target), Some(text)) = (line.arg(0), line.arg(1))
                    && !ctx.attached
                    && self.is_self(target)
                {
                    let from = line.origin.unwrap_or("?");
                    feed.push(UpstreamAction::Log(format!("{from}: {text}")));
                }
            }
            "JOIN" => {
                let (Some(chan), Some(nick)) = (line.arg(0), origin) else {
                    return;
                };
                if self.is_self(nick) {
                    self.channels
                        .entry(map.fold(chan))
                        .or_insert_with(|| Channel::new(chan));
                    feed.push(UpstreamAction::ChannelsChanged);
                    if !ctx.attached {
                        feed.push(UpstreamAction::Send(format!("MODE {chan}")));
                    }
                } else if let Some(channel) = self.channel_mut(chan) {
                    let entry = channel.add_member(map.fold(nick), nick);
                    if let Some(userhost) = line.source().and_then(|m| m.userhost()) {
                        entry.learn_userhost(&userhost);
                    }
                }
            }
            "PART" => {
                let (Some(chan), Some(nick)) = (line.arg(0), origin) else {
                    return;
                };
                if self.is_self(nick) {
                    if self.channels.remove(&map.fold(chan)).is_some() {
                        feed.push(UpstreamAction::ChannelsChanged);
                    }
                } else if let Some(channel) = self.channel_mut(chan) {
                    channel.remove_member(&map.fold(nick));
                }
            }
            "KICK" => {
                let (Some(chan), Some(victim)) = (line.arg(0), line.arg(1)) else {
                    return;
                };
                if self.is_self(victim) {
                    if self.channels.remove(&map.fold(chan)).is_some() {
                        feed.push(UpstreamAction::ChannelsChanged);
                    }
                    if !ctx.attached {
                        feed.push(UpstreamAction::Send(format!("JOIN {chan}")));
                    }
                } else if let Some(channel) = self.channel_mut(chan) {
                    channel.remove_member(&map.fold(victim));
                }
            }
            "NICK" => {
                let (Some(old), Some(new)) = (origin, line.arg(0)) else {
                    return;
                };
                let old_key = map.fold(old);
                for channel in self.channels.values_mut() {
                    channel.rename_member(&old_key, map.fold(new), new);
                }
                if self.is_self(old) {
                    self.nick = new.to_string();
                    self.desired_nick = new.to_string();
                    // Detached renames are away nicks and collision retries.
                    if ctx.attached {
                        feed.push(UpstreamAction::NickChanged(new.to_string()));
                    }
                }
            }
            "QUIT" => {
                let Some(nick) = origin else {
                    return;
                };
                let key = map.fold(nick);
                for channel in self.channels.values_mut() {
                    channel.remove_member(&key);
                }
            }
            "MODE" => {
                let (Some(target), Some(modes)) = (line.arg(0), line.arg(1)) else {
                    return;
                };
                let key = map.fold(target);
                if let Some(channel) = self.channels.get_mut(&key) {
                    channel.apply_modes(modes, &line.params[2..], &self.isupport);
                }
            }
            "TOPIC" => {
                let Some(chan) = line.arg(0) else {
                    return;
                };
                let text = line.arg(1).unwrap_or("").to_string();
                let set_by = line.origin.map(str::to_owned);
                if let Some(channel) = self.channel_mut(chan) {
                    channel.topic = Some(Topic {
                        text,
                        set_by,
                        set_at: ctx.now,
                    });
                }
            }
            _ => {}
        }
    }

    fn on_numeric(&mut self, numeric: u16, line: &LineRef<'_>, ctx: &UpstreamCtx<'_>, feed: &mut Feed) {
        let map = self.casemap;

        match numeric {
            RPL_WELCOME => {
                if let Some(nick) = line.arg(0) {
                    self.nick = nick.to_string();
                    self.desired_nick = nick.to_string();
                }
                self.server = line.origin.map(str::to_owned);
                self.registered = true;
                self.nick_attempts = 0;
                if ctx.attached
                    && let Some(client_nick) = ctx.client_nick
                    && client_nick != self.nick
                {
                    feed.push(UpstreamAction::ClientNick {
                        from: client_nick.to_string(),
                        to: self.nick.clone(),
                    });
                }
            }
            ERR_NICKNAMEINUSE if !ctx.attached => {
                feed.relay = false;
                if self.nick_attempts < MAX_NICK_RETRIES {
                    self.nick_attempts += 1;
                    self.desired_nick.push('`');
                    if !self.registered {
                        self.nick = self.desired_nick.clone();
                    }
                    feed.push(UpstreamAction::Send(format!("NICK {}", self.desired_nick)));
                } else if self.nick_attempts == MAX_NICK_RETRIES {
                    self.nick_attempts += 1;
                    feed.push(UpstreamAction::Notice(format!(
                        "Nick collision: gave up after {MAX_NICK_RETRIES} attempts. Use /nick to pick another nick."
                    )));
                }
            }
            RPL_ISUPPORT => {
                let mut tokens = line.params.get(1..).unwrap_or(&[]);
                if let Some(last) = tokens.last()
                    && last.contains(' ')
                {
                    tokens = &tokens[..tokens.len() - 1];
                }
                for token in tokens {
                    self.isupport.apply(token);
                }
                let casemap = self.isupport.casemapping();
                if casemap != self.casemap {
                    self.casemap = casemap;
                    let channels = std::mem::take(&mut self.channels);
                    self.channels = channels
                        .into_values()
                        .map(|mut channel| {
                            channel.refold(casemap);
                            (casemap.fold(&channel.name), channel)
                        })
                        .collect();
                }
            }
            RPL_VERSION => {
                if let Some(version) = line.arg(1) {
                    self.version = Some(version.to_string());
                    self.features = line.arg(3).map(str::to_owned);
                }
            }
            RPL_CHANNELMODEIS => {
                let Some(chan) = line.arg(1) else {
                    return;
                };
                let modes = line.arg(2).unwrap_or("+");
                let args = line.params.get(3..).unwrap_or(&[]);
                if let Some(channel) = self.channels.get_mut(&map.fold(chan)) {
                    channel.set_modes(modes, args, &self.isupport);
                }
            }
            RPL_CREATIONTIME => {
                if let (Some(chan), Some(ts)) = (line.arg(1), line.arg(2))
                    && let Some(channel) = self.channel_mut(chan)
                {
                    channel.created = ts.parse().unwrap_or(0);
                }
            }
            RPL_NOTOPIC => {
                if let Some(channel) = line.arg(1).and_then(|chan| self.channel_mut(chan)) {
                    channel.topic = Some(Topic {
                        text: String::new(),
                        set_by: None,
                        set_at: 0,
                    });
                }
            }
            RPL_TOPIC => {
                if let (Some(chan), Some(text)) = (line.arg(1), line.arg(2))
                    && let Some(channel) = self.channel_mut(chan)
                {
                    channel.topic = Some(Topic {
                        text: text.to_string(),
                        set_by: None,
                        set_at: 0,
                    });
                }
            }
            RPL_TOPICWHOTIME => {
                if let (Some(chan), Some(setter), Some(ts)) = (line.arg(1), line.arg(2), line.arg(3))
                    && let Some(channel) = self.channel_mut(chan)
                    && let Some(topic) = channel.topic.as_mut()
                {
                    topic.set_by = Some(setter.to_string());
                    topic.set_at = ts.parse().unwrap_or(0);
                }
            }
            RPL_NAMREPLY => {
                let argc = line.argc();
                if argc < 3 {
                    return;
                }
                let (chan, names) = (line.params[argc - 2], line.params[argc - 1]);
                let key = map.fold(chan);
                let Some(channel) = self.channels.get_mut(&key) else {
                    return;
                };
                let spec = self.isupport.prefix();
                channel.begin_names();
                for token in names.split(' ').filter(|t| !t.is_empty()) {
                    let split = token
                        .find(|c| !spec.prefixes.contains(c))
                        .unwrap_or(token.len());
                    let (flags, rest) = token.split_at(split);
                    if rest.is_empty() {
                        continue;
                    }
                    let mask = Hostmask::parse(rest);
                    let entry = channel.add_member(map.fold(mask.nick), mask.nick);
                    for flag in flags.chars() {
                        entry.add_prefix(flag, &spec);
                    }
                    if let Some(userhost) = mask.userhost() {
                        entry.learn_userhost(&userhost);
                    }
                }
            }
            RPL_ENDOFNAMES => {
                if let Some(channel) = line.arg(1).and_then(|chan| self.channel_mut(chan)) {
                    channel.end_names();
                }
            }
            RPL_WHOREPLY => {
                if let (Some(ident), Some(host), Some(nick)) = (line.arg(2), line.arg(3), line.arg(5)) {
                    self.learn_userhost(nick, &format!("{ident}@{host}"));
                }
            }
            RPL_ENDOFMOTD | ERR_NOMOTD => {
                if self.motd_done {
                    return;
                }
                self.motd_done = true;
                if let Some(channels) = ctx.autojoin.filter(|c| !c.is_empty()) {
                    feed.push(UpstreamAction::Send(format!("JOIN {channels}")));
                }
                feed.push(UpstreamAction::Connected);
            }
            _ => {}
        }
    }
}

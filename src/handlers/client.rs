//! Client role: the bouncer emulating an IRC server to the user's client.
//!
//! Every line is first offered to the hook chain. Before login only
//! NICK/PASS/USER/PING/QUIT are understood. Once the three credentials are
//! in, the session is checked against the user store and attached. After
//! that, lines are either answered locally (bouncer commands, SYNTH, WHOIS
//! of the pseudo-nick) or forwarded verbatim upstream.

use super::bnc::ReplyStyle;
use super::synth::SynthKind;
use crate::error::CommandError;
use crate::hooks::{Direction, Verdict};
use crate::network::SessionId;
use crate::network::session::Role;
use crate::state::{Bouncer, keys};
use slbnc_proto::response::{RPL_ENDOFWHOIS, RPL_WHOISSERVER, RPL_WHOISUSER, code};
use slbnc_proto::{LineRef, tokenize};
use std::net::SocketAddr;
use tracing::{debug, info, warn};

/// Registration state of one client connection.
#[derive(Debug, Default)]
pub struct ClientHandler {
    /// Nick the client currently believes it has.
    pub(crate) nick: Option<String>,
    password: Option<String>,
    username: Option<String>,
    peer: Option<SocketAddr>,
}

impl ClientHandler {
    pub fn new(peer: Option<SocketAddr>) -> Self {
        Self {
            peer,
            ..Self::default()
        }
    }

    pub fn nick(&self) -> Option<&str> {
        self.nick.as_deref()
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Whether NICK, PASS and USER have all been received.
    fn ready(&self) -> bool {
        self.nick.is_some() && self.password.is_some() && self.username.is_some()
    }
}

type RegResult = Result<(), CommandError>;

impl Bouncer {
    fn client_handler_mut(&mut self, id: SessionId) -> Option<&mut ClientHandler> {
        match self.sessions.get_mut(&id).map(|s| &mut s.role) {
            Some(Role::Client(handler)) => Some(handler),
            _ => None,
        }
    }

    /// Handle one line from a client session.
    pub(crate) fn client_line(&mut self, id: SessionId, raw: &[u8], now: i64) {
        let text = String::from_utf8_lossy(raw);
        let line = match LineRef::parse(&text) {
            Ok(line) => line,
            Err(e) => {
                debug!(session = %id, error = %e, "Ignoring malformed client line");
                return;
            }
        };

        let owner = self.sessions.get(&id).and_then(|s| s.owner.clone());
        let nick = self.client_nick(id);
        let verdict = match owner.as_deref() {
            Some(user) => self.offer_hooks(Direction::Outbound, user, &nick, &line),
            None => self.offer_login_hooks(id, &nick, &line),
        };
        if verdict == Verdict::Deny {
            return;
        }

        match owner {
            None => {
                let result = self.client_register(id, &line, now);
                if let Err(e) = result {
                    let nick = self.client_nick(id);
                    let reply = e.to_irc_reply(&self.settings.name, &nick);
                    self.send_to(id, &reply);
                }
            }
            Some(user) => self.client_command(id, &user, &nick, raw, &line, now),
        }
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    fn client_register(&mut self, id: SessionId, line: &LineRef<'_>, now: i64) -> RegResult {
        let server = self.settings.name.clone();
        let Some(handler) = self.client_handler_mut(id) else {
            return Ok(());
        };

        match line.verb.to_ascii_uppercase().as_str() {
            "NICK" => {
                let nick = line.arg(0).ok_or(CommandError::NoNicknameGiven)?;
                let first = handler.nick.replace(nick.to_string()).is_none();
                if first {
                    self.send_to(
                        id,
                        &format!(":{server} NOTICE {nick} :*** Welcome to slbnc. Log in with PASS and USER."),
                    );
                }
            }
            "PASS" => {
                let password = line
                    .arg(0)
                    .ok_or_else(|| CommandError::NeedMoreParams("PASS".into()))?;
                handler.password = Some(password.to_string());
            }
            "USER" => {
                if handler.username.is_some() {
                    return Err(CommandError::AlreadyRegistered);
                }
                if handler.password.is_none() {
                    self.kill_session(id, "Use PASS first.", now);
                    return Ok(());
                }
                let username = line
                    .arg(0)
                    .ok_or_else(|| CommandError::NeedMoreParams("USER".into()))?;
                handler.username = Some(username.to_string());
            }
            "PING" => {
                let token = line.arg(0).unwrap_or(server.as_str()).to_string();
                self.send_to(id, &format!(":{server} PONG {server} :{token}"));
                return Ok(());
            }
            "QUIT" => {
                self.kill_session(id, "Bye.", now);
                return Ok(());
            }
            _ => return Err(CommandError::NotRegistered),
        }

        self.try_login(id, now);
        Ok(())
    }

    /// Check credentials once all three registration commands are in.
    fn try_login(&mut self, id: SessionId, now: i64) {
        let Some(handler) = self.client_handler_mut(id) else {
            return;
        };
        if !handler.ready() {
            return;
        }
        let username = handler.username.clone().unwrap_or_default();
        let password = handler.password.take().unwrap_or_default();
        let peer = handler.peer;

        let accepted = self
            .users
            .get(&username)
            .is_some_and(|user| !user.is_locked() && user.check_password(&password));

        if accepted {
            info!(session = %id, user = %username, ?peer, "Client logged in");
            self.attach(&username, id, now);
        } else {
            warn!(session = %id, user = %username, ?peer, "Login failed");
            let from = peer.map_or_else(|| "unknown".to_string(), |p| p.ip().to_string());
            self.main_log(&format!("Failed login for {username} from {from}"));
            self.kill_session(id, "Unknown user or wrong password.", now);
        }
    }

    // ------------------------------------------------------------------
    // Authenticated commands
    // ------------------------------------------------------------------

    fn client_command(
        &mut self,
        id: SessionId,
        user: &str,
        nick: &str,
        raw: &[u8],
        line: &LineRef<'_>,
        now: i64,
    ) {
        let pseudo = self.settings.pseudo_nick.clone();
        let verb = line.verb.to_ascii_uppercase();
        match verb.as_str() {
            "QUIT" => {
                self.kill_session(id, "Goodbye. Your IRC connection stays up.", now);
            }
            "NICK" => match line.arg(0) {
                Some(new) => self.client_nick_change(id, user, new, raw),
                None => {
                    let reply = CommandError::NoNicknameGiven.to_irc_reply(&self.settings.name, nick);
                    self.send_to(id, &reply);
                }
            },
            "PASS" | "USER" => {
                let reply = CommandError::AlreadyRegistered.to_irc_reply(&self.settings.name, nick);
                self.send_to(id, &reply);
            }
            "WHOIS" if line.last().is_some_and(|t| t.eq_ignore_ascii_case(&pseudo)) => {
                self.whois_pseudo(id, nick);
            }
            "PERROR" => match line.arg(0) {
                Some(reason) => {
                    if let Some(up) = self.users.get(user).and_then(|u| u.upstream) {
                        self.kill_session(up, reason, now);
                    }
                    if let Some(u) = self.users.get_mut(user) {
                        u.quitted = true;
                    }
                }
                None => self.reply(id, ReplyStyle::Notice, "Syntax: PERROR <reason>"),
            },
            "SIMUL" if self.users.get(user).is_some_and(|u| u.is_admin()) => {
                let mut args = vec!["simul"];
                args.extend(line.params.iter().copied());
                self.run_command(id, user, ReplyStyle::Notice, &args, now);
            }
            "SLBNC" => {
                let args: Vec<&str> = line.params.iter().copied().collect();
                self.run_command(id, user, ReplyStyle::Notice, &args, now);
            }
            "PRIVMSG" if line.arg(0).is_some_and(|t| t.eq_ignore_ascii_case(&pseudo)) => {
                let text = line.arg(1).unwrap_or("");
                let args: Vec<&str> = tokenize(text).into_iter().collect();
                self.run_command(id, user, ReplyStyle::Privmsg, &args, now);
            }
            "SYNTH" => match line.arg(0).and_then(SynthKind::parse) {
                Some(kind) => self.synth(id, user, kind, line.arg(1)),
                None => self.reply(
                    id,
                    ReplyStyle::Notice,
                    "Syntax: SYNTH <mode|topic|names|version> [channel]",
                ),
            },
            "MODE" | "TOPIC" | "NAMES" if line.argc() == 1 => {
                if let Some(kind) = SynthKind::parse(&verb) {
                    self.synth(id, user, kind, line.arg(0));
                }
            }
            "VERSION" if line.argc() == 0 => self.synth(id, user, SynthKind::Version, None),
            _ => self.send_upstream_raw(user, raw),
        }
    }

    /// NICK after login: tell the network, and echo it back ourselves when
    /// there is no network to do so. A registered network's own echo is what
    /// gets the nick stored.
    fn client_nick_change(&mut self, id: SessionId, user: &str, new: &str, raw: &[u8]) {
        let registered = self.upstream_handler(user).is_some_and(|up| up.is_registered());
        let old = self
            .client_handler_mut(id)
            .and_then(|h| h.nick.replace(new.to_string()));

        if !registered {
            if let Some(u) = self.users.get_mut(user) {
                let _ = u.set_setting(keys::NICK, Some(new));
            }
            if let Some(old) = old.filter(|old| old != new) {
                self.send_to(id, &format!(":{old} NICK :{new}"));
            }
        }
        self.send_upstream_raw(user, raw);
    }

    fn whois_pseudo(&mut self, id: SessionId, nick: &str) {
        let srv = self.settings.name.clone();
        let pseudo = self.settings.pseudo_nick.clone();
        let lines = [
            format!(
                ":{srv} {} {nick} {pseudo} {pseudo} {srv} * :slbnc control interface",
                code(RPL_WHOISUSER)
            ),
            format!(
                ":{srv} {} {nick} {pseudo} {srv} :slbnc {}",
                code(RPL_WHOISSERVER),
                env!("CARGO_PKG_VERSION")
            ),
            format!(":{srv} {} {nick} {pseudo} :End of /WHOIS list.", code(RPL_ENDOFWHOIS)),
        ];
        for line in &lines {
            self.send_to(id, line);
        }
    }
}

//! SYNTH: replies built from the upstream cache instead of asking the network.
//!
//! Each builder returns `None` when the cache cannot answer, in which case
//! the request is forwarded upstream and the network's reply flows back
//! through the relay.

use super::upstream::UpstreamHandler;
use crate::network::SessionId;
use crate::state::Bouncer;
use slbnc_proto::ISupportTable;
use slbnc_proto::response::{
    RPL_CHANNELMODEIS, RPL_CREATIONTIME, RPL_ENDOFNAMES, RPL_ISUPPORT, RPL_NAMREPLY, RPL_NOTOPIC,
    RPL_TOPIC, RPL_TOPICWHOTIME, RPL_VERSION, code,
};
use tracing::debug;

/// Longest run of names packed into one 353 line.
const NAMES_CHUNK: usize = 400;
/// ISUPPORT tokens per 005 line.
const ISUPPORT_PER_LINE: usize = 11;

/// What a SYNTH request asks for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SynthKind {
    Mode,
    Topic,
    Names,
    Version,
}

impl SynthKind {
    pub fn parse(word: &str) -> Option<Self> {
        match word.to_ascii_lowercase().as_str() {
            "mode" => Some(Self::Mode),
            "topic" => Some(Self::Topic),
            "names" => Some(Self::Names),
            "version" => Some(Self::Version),
            _ => None,
        }
    }

    /// The plain command sent upstream when the cache cannot answer.
    pub fn fallback(self, target: Option<&str>) -> String {
        let verb = match self {
            Self::Mode => "MODE",
            Self::Topic => "TOPIC",
            Self::Names => "NAMES",
            Self::Version => "VERSION",
        };
        match target {
            Some(target) => format!("{verb} {target}"),
            None => verb.to_string(),
        }
    }
}

fn origin(up: &UpstreamHandler, fallback: &str) -> String {
    up.server().unwrap_or(fallback).to_string()
}

/// 324 and, when known, 329.
pub fn mode_reply(up: &UpstreamHandler, server: &str, chan: &str) -> Option<Vec<String>> {
    let channel = up.channel(chan).filter(|c| c.modes_known())?;
    let srv = origin(up, server);
    let nick = up.nick();
    let mut lines = vec![format!(
        ":{srv} {} {nick} {} {}",
        code(RPL_CHANNELMODEIS),
        channel.name,
        channel.mode_string()
    )];
    if channel.created != 0 {
        lines.push(format!(
            ":{srv} {} {nick} {} {}",
            code(RPL_CREATIONTIME),
            channel.name,
            channel.created
        ));
    }
    Some(lines)
}

/// 332/333, or 331 when the topic is known to be empty.
pub fn topic_reply(up: &UpstreamHandler, server: &str, chan: &str) -> Option<Vec<String>> {
    let channel = up.channel(chan)?;
    let topic = channel.topic.as_ref()?;
    let srv = origin(up, server);
    let nick = up.nick();
    if topic.text.is_empty() {
        return Some(vec![format!(
            ":{srv} {} {nick} {} :No topic is set.",
            code(RPL_NOTOPIC),
            channel.name
        )]);
    }
    let mut lines = vec![format!(
        ":{srv} {} {nick} {} :{}",
        code(RPL_TOPIC),
        channel.name,
        topic.text
    )];
    if let Some(setter) = &topic.set_by {
        lines.push(format!(
            ":{srv} {} {nick} {} {setter} {}",
            code(RPL_TOPICWHOTIME),
            channel.name,
            topic.set_at
        ));
    }
    Some(lines)
}

/// 353 lines followed by 366, once a full name list has been seen.
pub fn names_reply(up: &UpstreamHandler, server: &str, chan: &str) -> Option<Vec<String>> {
    let channel = up.channel(chan).filter(|c| c.has_names())?;
    let srv = origin(up, server);
    let nick = up.nick();
    let symbol = if channel.has_mode('s') {
        '@'
    } else if channel.has_mode('p') {
        '*'
    } else {
        '='
    };
    let head = format!(":{srv} {} {nick} {symbol} {} :", code(RPL_NAMREPLY), channel.name);

    let mut lines = Vec::new();
    let mut names = String::new();
    for member in channel.members() {
        if !names.is_empty() {
            names.push(' ');
        }
        names.extend(member.highest_prefix());
        names.push_str(&member.nick);
        if names.len() > NAMES_CHUNK {
            lines.push(format!("{head}{names}"));
            names.clear();
        }
    }
    if !names.is_empty() {
        lines.push(format!("{head}{names}"));
    }
    lines.push(format!(
        ":{srv} {} {nick} {} :End of /NAMES list.",
        code(RPL_ENDOFNAMES),
        channel.name
    ));
    Some(lines)
}

/// 005 lines advertising `table`.
pub fn isupport_lines(srv: &str, nick: &str, table: &ISupportTable) -> Vec<String> {
    table
        .tokens()
        .chunks(ISUPPORT_PER_LINE)
        .map(|tokens| {
            format!(
                ":{srv} {} {nick} {} :are supported by this server",
                code(RPL_ISUPPORT),
                tokens.join(" ")
            )
        })
        .collect()
}

/// 351 plus the ISUPPORT table, once the server has told us its version.
pub fn version_reply(up: &UpstreamHandler, server: &str) -> Option<Vec<String>> {
    let version = up.version()?;
    let srv = origin(up, server);
    let nick = up.nick();
    let mut lines = vec![format!(
        ":{srv} {} {nick} {version} {srv} :{}",
        code(RPL_VERSION),
        up.features().unwrap_or("")
    )];
    lines.extend(isupport_lines(&srv, nick, up.isupport()));
    Some(lines)
}

/// Build the cached reply for `kind`.
pub fn build(
    up: &UpstreamHandler,
    server: &str,
    kind: SynthKind,
    target: Option<&str>,
) -> Option<Vec<String>> {
    match (kind, target) {
        (SynthKind::Mode, Some(chan)) => mode_reply(up, server, chan),
        (SynthKind::Topic, Some(chan)) => topic_reply(up, server, chan),
        (SynthKind::Names, Some(chan)) => names_reply(up, server, chan),
        (SynthKind::Version, _) => version_reply(up, server),
        _ => None,
    }
}

impl Bouncer {
    /// Answer a SYNTH request for the client `session` of `user`, falling
    /// back to asking the network.
    pub(crate) fn synth(&mut self, session: SessionId, user: &str, kind: SynthKind, target: Option<&str>) {
        let lines = self
            .upstream_handler(user)
            .and_then(|up| build(up, &self.settings.name, kind, target));
        match lines {
            Some(lines) => {
                debug!(%session, ?kind, target, "Answering from cache");
                for line in lines {
                    self.send_to(session, &line);
                }
            }
            None => self.send_upstream(user, &kind.fallback(target)),
        }
    }
}

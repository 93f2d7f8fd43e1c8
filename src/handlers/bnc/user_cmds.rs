//! Commands every user may run.

use super::{Command, Context, HandlerResult};
use crate::error::ControlError;
use crate::security::hash_password;
use crate::state::keys;
use std::net::IpAddr;
use std::rc::Rc;

/// Minimum length of a login password.
pub(super) const MIN_PASSWORD_LEN: usize = 6;

/// Shared password policy for `set password` and `adduser`.
pub(super) fn check_password_policy(password: &str) -> Result<(), ControlError> {
    if password.len() < MIN_PASSWORD_LEN || password.chars().any(char::is_whitespace) {
        return Err(ControlError::WeakPassword);
    }
    Ok(())
}

pub struct HelpCommand;

impl Command for HelpCommand {
    fn handle(&self, ctx: &mut Context<'_>, _args: &[&str]) -> HandlerResult {
        let table = Rc::clone(&ctx.bouncer.commands);
        let admin = ctx.is_admin();
        ctx.reply("Available commands:");
        for (name, spec) in table.visible(admin) {
            let line = if spec.synopsis.is_empty() {
                format!("  {name}")
            } else {
                format!("  {name} {}", spec.synopsis)
            };
            ctx.reply(&line);
        }
        Ok(())
    }
}

const SET_USAGE: &str = "set [server|realname|nick|awaynick|away|vhost|spass|password] [value]";

/// Settings shown and written by `set`, with their store keys.
const TEXT_SETTINGS: &[(&str, &str)] = &[
    ("realname", keys::REALNAME),
    ("nick", keys::NICK),
    ("awaynick", keys::AWAY_NICK),
    ("away", keys::AWAY),
    ("spass", keys::SERVER_PASSWORD),
];

pub struct SetCommand;

impl SetCommand {
    fn show(ctx: &mut Context<'_>, name: &str) {
        let default_port = ctx.bouncer.settings.default_port;
        let Some(user) = ctx.user() else {
            return;
        };
        let value = match name {
            "server" => user
                .server()
                .map(|host| format!("{host}:{}", user.port(default_port))),
            "vhost" => user.setting(keys::VHOST),
            "spass" => user.server_password().map(|_| "(hidden)".to_string()),
            _ => TEXT_SETTINGS
                .iter()
                .find(|(n, _)| *n == name)
                .and_then(|(_, key)| user.setting(key)),
        };
        let text = format!("{name} = {}", value.as_deref().unwrap_or("(unset)"));
        ctx.reply(&text);
    }
}

impl Command for SetCommand {
    fn handle(&self, ctx: &mut Context<'_>, args: &[&str]) -> HandlerResult {
        let Some((name, value)) = args.split_first() else {
            for name in ["server", "vhost"]
                .into_iter()
                .chain(TEXT_SETTINGS.iter().map(|(n, _)| *n))
            {
                Self::show(ctx, name);
            }
            return Ok(());
        };
        let name = name.to_ascii_lowercase();

        if name == "password" {
            let [password] = value else {
                return Err(ControlError::WeakPassword);
            };
            check_password_policy(password)?;
            let hash = hash_password(password).map_err(|e| ControlError::Hash(e.to_string()))?;
            if let Some(user) = ctx.user_mut() {
                user.set_setting(keys::PASSWORD, Some(&hash))?;
            }
            ctx.reply("Password changed.");
            return Ok(());
        }

        if value.is_empty() {
            if name == "server" || name == "vhost" || TEXT_SETTINGS.iter().any(|(n, _)| *n == name) {
                Self::show(ctx, &name);
                return Ok(());
            }
            return Err(ControlError::Usage(SET_USAGE));
        }

        match name.as_str() {
            "server" => {
                let port = match value.get(1) {
                    Some(port) => Some(
                        port.parse::<u16>()
                            .map_err(|_| ControlError::Usage("set server <host> [port]"))?,
                    ),
                    None => None,
                };
                if let Some(user) = ctx.user_mut() {
                    user.set_setting(keys::SERVER, Some(value[0]))?;
                    match port {
                        Some(port) => user.set_setting(keys::PORT, Some(&port.to_string()))?,
                        None => user.set_setting(keys::PORT, None)?,
                    }
                }
                ctx.reply("Server changed. Use jump to reconnect.");
            }
            "vhost" => {
                let ip: IpAddr = value[0]
                    .parse()
                    .map_err(|_| ControlError::Usage("set vhost <ip address>"))?;
                if let Some(user) = ctx.user_mut() {
                    user.set_setting(keys::VHOST, Some(&ip.to_string()))?;
                }
                ctx.reply("Virtual host changed. Use jump to reconnect.");
            }
            other => {
                let Some((_, key)) = TEXT_SETTINGS.iter().find(|(n, _)| *n == other) else {
                    return Err(ControlError::Usage(SET_USAGE));
                };
                let text = value.join(" ");
                if let Some(user) = ctx.user_mut() {
                    user.set_setting(key, Some(&text))?;
                }
                ctx.reply(&format!("{other} changed."));
            }
        }
        Ok(())
    }
}

pub struct StatusCommand;

impl Command for StatusCommand {
    fn handle(&self, ctx: &mut Context<'_>, _args: &[&str]) -> HandlerResult {
        let now = ctx.now;
        let mut lines = Vec::new();
        {
            let bouncer = &*ctx.bouncer;
            let Some(user) = bouncer.user(ctx.user) else {
                return Err(ControlError::NoSuchUser);
            };
            lines.push(format!(
                "User {}{}",
                user.name(),
                if user.is_admin() { " (administrator)" } else { "" }
            ));

            match (user.upstream(), bouncer.upstream_handler(ctx.user)) {
                (Some(id), Some(up)) => {
                    if up.is_registered() {
                        lines.push(format!(
                            "Connected to {} as {}.",
                            up.server().unwrap_or("?"),
                            up.nick()
                        ));
                    } else {
                        lines.push("Registering with the IRC server.".to_string());
                    }
                    let channels = up.channel_list();
                    lines.push(format!(
                        "Channels: {}",
                        if channels.is_empty() { "none" } else { channels.as_str() }
                    ));
                    if let Some(session) = bouncer.session(id) {
                        lines.push(format!("Send queue: {} bytes.", session.sendq_len()));
                    }
                }
                _ if user.connecting => lines.push("Connecting.".to_string()),
                _ => match user.reconnect_at {
                    Some(at) if at > now => {
                        lines.push(format!("Not connected. Next attempt in {}s.", at - now));
                    }
                    _ => lines.push("Not connected.".to_string()),
                },
            }

            let messages = user.log().lines().map(|l| l.len()).unwrap_or(0);
            lines.push(format!("{messages} stored messages."));
        }
        for line in &lines {
            ctx.reply(line);
        }
        Ok(())
    }
}

pub struct JumpCommand;

impl Command for JumpCommand {
    fn handle(&self, ctx: &mut Context<'_>, _args: &[&str]) -> HandlerResult {
        let user = ctx.user.to_string();
        ctx.bouncer.jump(&user, ctx.now)?;
        ctx.reply("Reconnecting.");
        Ok(())
    }
}

pub struct ReadCommand;

impl Command for ReadCommand {
    fn handle(&self, ctx: &mut Context<'_>, _args: &[&str]) -> HandlerResult {
        let lines = match ctx.user() {
            Some(user) => user
                .log()
                .lines()
                .map_err(|e| ControlError::Store(e.into()))?,
            None => return Err(ControlError::NoSuchUser),
        };
        if lines.is_empty() {
            ctx.reply("You have no messages.");
            return Ok(());
        }
        for line in &lines {
            ctx.reply(line);
        }
        ctx.reply("End of messages. Use erase to delete them.");
        Ok(())
    }
}

pub struct EraseCommand;

impl Command for EraseCommand {
    fn handle(&self, ctx: &mut Context<'_>, _args: &[&str]) -> HandlerResult {
        if let Some(user) = ctx.user_mut() {
            user.log
                .clear()
                .map_err(|e| ControlError::Store(e.into()))?;
        }
        ctx.reply("Messages erased.");
        Ok(())
    }
}

pub struct DirectCommand;

impl Command for DirectCommand {
    fn handle(&self, ctx: &mut Context<'_>, args: &[&str]) -> HandlerResult {
        if args.is_empty() {
            return Err(ControlError::Usage("direct <raw line>"));
        }
        if !ctx.bouncer.has_upstream(ctx.user) {
            return Err(ControlError::NotConnected);
        }
        let raw = args.join(" ");
        let user = ctx.user.to_string();
        ctx.bouncer.send_upstream(&user, &raw);
        Ok(())
    }
}

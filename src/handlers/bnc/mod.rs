//! Bouncer control commands.
//!
//! Reached through `/slbnc <command>` (replies as NOTICE) or
//! `/msg -slbnc <command>` (replies as PRIVMSG). The [`CommandTable`] maps a
//! lowercase name to its handler and whether it needs administrator rights.

mod admin_cmds;
mod user_cmds;

use crate::error::ControlError;
use crate::network::SessionId;
use crate::state::{Bouncer, User};
use std::collections::BTreeMap;
use std::rc::Rc;
use tracing::{Level, debug, span};

/// How replies to a control command are delivered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplyStyle {
    /// Invoked via `PRIVMSG -slbnc`.
    Privmsg,
    /// Invoked via the `SLBNC` verb.
    Notice,
}

impl ReplyStyle {
    /// Pointer printed for unknown commands.
    fn help_hint(self, pseudo: &str) -> String {
        match self {
            ReplyStyle::Privmsg => format!("Unknown command. Try /msg {pseudo} help"),
            ReplyStyle::Notice => "Unknown command. Try /slbnc help".to_string(),
        }
    }
}

/// What a command handler gets to work with.
pub struct Context<'a> {
    pub bouncer: &'a mut Bouncer,
    /// Invoking user.
    pub user: &'a str,
    /// Session replies go to.
    pub session: SessionId,
    pub style: ReplyStyle,
    pub now: i64,
}

impl Context<'_> {
    pub fn reply(&mut self, text: &str) {
        self.bouncer.reply(self.session, self.style, text);
    }

    pub fn user(&self) -> Option<&User> {
        self.bouncer.user(self.user)
    }

    pub fn user_mut(&mut self) -> Option<&mut User> {
        self.bouncer.user_mut(self.user)
    }

    pub fn is_admin(&self) -> bool {
        self.user().is_some_and(User::is_admin)
    }
}

pub type HandlerResult = Result<(), ControlError>;

/// A control command.
pub trait Command {
    fn handle(&self, ctx: &mut Context<'_>, args: &[&str]) -> HandlerResult;
}

/// Table entry.
pub struct CommandSpec {
    pub admin: bool,
    /// Argument summary shown by `help`.
    pub synopsis: &'static str,
    handler: Box<dyn Command>,
}

/// Flat name -> handler table.
pub struct CommandTable {
    commands: BTreeMap<&'static str, CommandSpec>,
}

impl CommandTable {
    /// Table with every built-in command registered.
    pub fn new() -> Self {
        let mut table = Self {
            commands: BTreeMap::new(),
        };

        // User commands
        table.register("help", false, "", Box::new(user_cmds::HelpCommand));
        table.register("set", false, "[setting] [value]", Box::new(user_cmds::SetCommand));
        table.register("status", false, "", Box::new(user_cmds::StatusCommand));
        table.register("jump", false, "", Box::new(user_cmds::JumpCommand));
        table.register("read", false, "", Box::new(user_cmds::ReadCommand));
        table.register("erase", false, "", Box::new(user_cmds::EraseCommand));
        table.register("direct", false, "<raw line>", Box::new(user_cmds::DirectCommand));

        // Administrator commands
        table.register("adduser", true, "<name> <password>", Box::new(admin_cmds::AddUserCommand));
        table.register("deluser", true, "<name>", Box::new(admin_cmds::DelUserCommand));
        table.register("who", true, "", Box::new(admin_cmds::WhoCommand));
        table.register("lsmod", true, "", Box::new(admin_cmds::LsmodCommand));
        table.register("insmod", true, "<module>", Box::new(admin_cmds::InsmodCommand));
        table.register("rmmod", true, "<id>", Box::new(admin_cmds::RmmodCommand));
        table.register("simul", true, "<user> <line>", Box::new(admin_cmds::SimulCommand));
        table.register("global", true, "<text>", Box::new(admin_cmds::GlobalCommand));
        table.register("kill", true, "<user>", Box::new(admin_cmds::KillCommand));
        table.register("disconnect", true, "<user>", Box::new(admin_cmds::DisconnectCommand));
        table.register("gvhost", true, "[ip]", Box::new(admin_cmds::GvhostCommand));
        table.register("motd", true, "[text]", Box::new(admin_cmds::MotdCommand));
        table.register("playmainlog", true, "", Box::new(admin_cmds::PlayMainLogCommand));
        table.register("erasemainlog", true, "", Box::new(admin_cmds::EraseMainLogCommand));
        table.register("die", true, "", Box::new(admin_cmds::DieCommand));

        table
    }

    fn register(&mut self, name: &'static str, admin: bool, synopsis: &'static str, handler: Box<dyn Command>) {
        self.commands.insert(
            name,
            CommandSpec {
                admin,
                synopsis,
                handler,
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<&CommandSpec> {
        self.commands.get(name.to_ascii_lowercase().as_str())
    }

    /// `(name, spec)` pairs visible to a user with the given rights.
    pub fn visible(&self, admin: bool) -> impl Iterator<Item = (&'static str, &CommandSpec)> {
        self.commands
            .iter()
            .filter(move |(_, spec)| admin || !spec.admin)
            .map(|(name, spec)| (*name, spec))
    }

    /// Run `args[0]` with the rest as its arguments.
    pub fn dispatch(&self, ctx: &mut Context<'_>, args: &[&str]) {
        let admin = ctx.is_admin();
        let found = args
            .split_first()
            .and_then(|(name, rest)| self.get(name).map(|spec| (name, spec, rest)))
            .filter(|(_, spec, _)| admin || !spec.admin);

        let Some((name, spec, rest)) = found else {
            let hint = ctx.style.help_hint(&ctx.bouncer.settings.pseudo_nick);
            ctx.reply(&hint);
            return;
        };

        let _span = span!(Level::DEBUG, "bnc.command", command = %name, user = ctx.user).entered();
        if let Err(e) = spec.handler.handle(ctx, rest) {
            debug!(command = %name, error = %e, "Control command failed");
            ctx.reply(&e.to_string());
        }
    }
}

impl Default for CommandTable {
    fn default() -> Self {
        Self::new()
    }
}

impl Bouncer {
    /// Run a control command on behalf of `user`, replying to `session`.
    pub(crate) fn run_command(&mut self, session: SessionId, user: &str, style: ReplyStyle, args: &[&str], now: i64) {
        let table = Rc::clone(&self.commands);
        let mut ctx = Context {
            bouncer: self,
            user,
            session,
            style,
            now,
        };
        table.dispatch(&mut ctx, args);
    }
}

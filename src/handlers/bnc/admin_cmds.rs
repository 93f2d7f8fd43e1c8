//! Administrator commands, plus `motd` whose write half needs the admin flag.

use super::user_cmds::check_password_policy;
use super::{Command, Context, HandlerResult};
use crate::error::ControlError;
use crate::security::hash_password;
use crate::state::{is_valid_username, keys};
use std::net::IpAddr;

pub struct AddUserCommand;

impl Command for AddUserCommand {
    fn handle(&self, ctx: &mut Context<'_>, args: &[&str]) -> HandlerResult {
        let [name, password] = args else {
            return Err(ControlError::Usage("adduser <name> <password>"));
        };
        if !is_valid_username(name) {
            return Err(ControlError::InvalidUsername);
        }
        if ctx.bouncer.user(name).is_some() {
            return Err(ControlError::UserExists);
        }
        check_password_policy(password)?;
        let hash = hash_password(password).map_err(|e| ControlError::Hash(e.to_string()))?;
        ctx.bouncer.create_user(name, &hash)?;
        ctx.reply(&format!("User {name} created."));
        Ok(())
    }
}

pub struct DelUserCommand;

impl Command for DelUserCommand {
    fn handle(&self, ctx: &mut Context<'_>, args: &[&str]) -> HandlerResult {
        let [name] = args else {
            return Err(ControlError::Usage("deluser <name>"));
        };
        let name = name.to_string();
        // Reply first: deleting yourself closes the session replies go to.
        ctx.reply(&format!("Deleting user {name}."));
        ctx.bouncer.remove_user(&name, ctx.now)?;
        Ok(())
    }
}

pub struct WhoCommand;

impl Command for WhoCommand {
    fn handle(&self, ctx: &mut Context<'_>, _args: &[&str]) -> HandlerResult {
        ctx.bouncer.start_who(ctx.session, ctx.style);
        Ok(())
    }
}

pub struct LsmodCommand;

impl Command for LsmodCommand {
    fn handle(&self, ctx: &mut Context<'_>, _args: &[&str]) -> HandlerResult {
        let loaded = ctx.bouncer.hooks.list();
        let available: Vec<&str> = ctx.bouncer.catalog.names().collect();
        if loaded.is_empty() {
            ctx.reply("No modules loaded.");
        }
        for (id, name) in loaded {
            ctx.reply(&format!("{id}: {name}"));
        }
        ctx.reply(&format!("Available modules: {}", available.join(", ")));
        Ok(())
    }
}

pub struct InsmodCommand;

impl Command for InsmodCommand {
    fn handle(&self, ctx: &mut Context<'_>, args: &[&str]) -> HandlerResult {
        let [name] = args else {
            return Err(ControlError::Usage("insmod <module>"));
        };
        match ctx.bouncer.load_module(name) {
            Some(id) => ctx.reply(&format!("Module {name} loaded as {id}.")),
            None => ctx.reply(&format!("There is no module named {name}.")),
        }
        Ok(())
    }
}

pub struct RmmodCommand;

impl Command for RmmodCommand {
    fn handle(&self, ctx: &mut Context<'_>, args: &[&str]) -> HandlerResult {
        let id = args
            .first()
            .and_then(|id| id.parse::<usize>().ok())
            .ok_or(ControlError::Usage("rmmod <id>"))?;
        if ctx.bouncer.hooks.remove(id) {
            ctx.reply(&format!("Module {id} unloaded."));
        } else {
            ctx.reply(&format!("No module with id {id} is loaded."));
        }
        Ok(())
    }
}

pub struct SimulCommand;

impl Command for SimulCommand {
    fn handle(&self, ctx: &mut Context<'_>, args: &[&str]) -> HandlerResult {
        let Some((target, line)) = args.split_first().filter(|(_, rest)| !rest.is_empty()) else {
            return Err(ControlError::Usage("simul <user> <line>"));
        };
        let line = line.join(" ");
        ctx.bouncer.simulate(target, &line, ctx.now)?;
        Ok(())
    }
}

pub struct GlobalCommand;

impl Command for GlobalCommand {
    fn handle(&self, ctx: &mut Context<'_>, args: &[&str]) -> HandlerResult {
        if args.is_empty() {
            return Err(ControlError::Usage("global <text>"));
        }
        ctx.bouncer.global_notice(&args.join(" "));
        Ok(())
    }
}

pub struct KillCommand;

impl Command for KillCommand {
    fn handle(&self, ctx: &mut Context<'_>, args: &[&str]) -> HandlerResult {
        let [target] = args else {
            return Err(ControlError::Usage("kill <user>"));
        };
        ctx.bouncer.simulate(target, "QUIT", ctx.now)?;
        ctx.reply(&format!("Client of {target} killed."));
        Ok(())
    }
}

pub struct DisconnectCommand;

impl Command for DisconnectCommand {
    fn handle(&self, ctx: &mut Context<'_>, args: &[&str]) -> HandlerResult {
        let [target] = args else {
            return Err(ControlError::Usage("disconnect <user>"));
        };
        ctx.bouncer.simulate(target, "PERROR :Requested.", ctx.now)?;
        ctx.reply(&format!("{target} disconnected from IRC."));
        Ok(())
    }
}

pub struct GvhostCommand;

impl Command for GvhostCommand {
    fn handle(&self, ctx: &mut Context<'_>, args: &[&str]) -> HandlerResult {
        match args.first() {
            None => {
                let current = ctx.bouncer.system_setting(keys::SYSTEM_VHOST);
                ctx.reply(&format!(
                    "Global virtual host: {}",
                    current.as_deref().unwrap_or("(unset)")
                ));
            }
            Some(value) => {
                let ip: IpAddr = value
                    .parse()
                    .map_err(|_| ControlError::Usage("gvhost <ip address>"))?;
                ctx.bouncer
                    .set_system_setting(keys::SYSTEM_VHOST, Some(&ip.to_string()))?;
                ctx.reply("Global virtual host changed.");
            }
        }
        Ok(())
    }
}

pub struct MotdCommand;

impl Command for MotdCommand {
    fn handle(&self, ctx: &mut Context<'_>, args: &[&str]) -> HandlerResult {
        if args.is_empty() {
            let motd = ctx.bouncer.system_setting(keys::SYSTEM_MOTD);
            ctx.reply(motd.as_deref().unwrap_or("There is no message of the day."));
            return Ok(());
        }
        ctx.bouncer
            .set_system_setting(keys::SYSTEM_MOTD, Some(&args.join(" ")))?;
        ctx.reply("Message of the day changed.");
        Ok(())
    }
}

pub struct PlayMainLogCommand;

impl Command for PlayMainLogCommand {
    fn handle(&self, ctx: &mut Context<'_>, _args: &[&str]) -> HandlerResult {
        let lines = ctx
            .bouncer
            .main_log
            .lines()
            .map_err(|e| ControlError::Store(e.into()))?;
        if lines.is_empty() {
            ctx.reply("The main log is empty.");
            return Ok(());
        }
        for line in &lines {
            ctx.reply(line);
        }
        ctx.reply("End of main log.");
        Ok(())
    }
}

pub struct EraseMainLogCommand;

impl Command for EraseMainLogCommand {
    fn handle(&self, ctx: &mut Context<'_>, _args: &[&str]) -> HandlerResult {
        ctx.bouncer
            .main_log
            .clear()
            .map_err(|e| ControlError::Store(e.into()))?;
        ctx.reply("Main log erased.");
        Ok(())
    }
}

pub struct DieCommand;

impl Command for DieCommand {
    fn handle(&self, ctx: &mut Context<'_>, _args: &[&str]) -> HandlerResult {
        let by = ctx.user.to_string();
        ctx.bouncer.die(&by, ctx.now);
        Ok(())
    }
}

//! Unified error handling for slbnc.
//!
//! Each layer has its own error enum: transport failures end a session,
//! protocol errors become numeric replies, and control-command errors are
//! reported back to the user in the invocation's reply style.

use slbnc_proto::response::{
    self, ERR_ALREADYREGISTRED, ERR_NEEDMOREPARAMS, ERR_NONICKNAMEGIVEN, ERR_NOTREGISTERED,
};
use thiserror::Error;

use crate::config::StoreError;

// ============================================================================
// Session Errors (transport)
// ============================================================================

/// A session's socket can no longer be used. The session must be destroyed.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("connection closed by peer")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ============================================================================
// Protocol Errors (client registration and command syntax)
// ============================================================================

/// Malformed or out-of-order client commands. The session stays open.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("{0}: not enough parameters")]
    NeedMoreParams(String),

    #[error("no nickname given")]
    NoNicknameGiven,

    #[error("already registered")]
    AlreadyRegistered,

    #[error("not registered")]
    NotRegistered,
}

impl CommandError {
    /// Numeric reply code for this error.
    pub fn numeric(&self) -> u16 {
        match self {
            Self::NeedMoreParams(_) => ERR_NEEDMOREPARAMS,
            Self::NoNicknameGiven => ERR_NONICKNAMEGIVEN,
            Self::AlreadyRegistered => ERR_ALREADYREGISTRED,
            Self::NotRegistered => ERR_NOTREGISTERED,
        }
    }

    /// Render as a numeric line from `server` to `nick`.
    pub fn to_irc_reply(&self, server: &str, nick: &str) -> String {
        let code = response::code(self.numeric());
        match self {
            Self::NeedMoreParams(cmd) => {
                format!(":{server} {code} {nick} {cmd} :Not enough parameters")
            }
            Self::NoNicknameGiven => format!(":{server} {code} {nick} :No nickname given"),
            Self::AlreadyRegistered => {
                format!(":{server} {code} {nick} :You may not reregister")
            }
            Self::NotRegistered => format!(":{server} {code} {nick} :You have not registered"),
        }
    }
}

// ============================================================================
// Control Errors (bouncer commands)
// ============================================================================

/// Failures of bouncer control commands. The `Display` text is what the user
/// sees.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("Syntax: {0}")]
    Usage(&'static str),

    #[error("There is no such user.")]
    NoSuchUser,

    #[error("The user already exists.")]
    UserExists,

    #[error("Invalid username. Use letters, digits, '-' and '_' only.")]
    InvalidUsername,

    #[error("Password must be at least 6 characters long and must not contain spaces.")]
    WeakPassword,

    #[error("You're not connected to an IRC server.")]
    NotConnected,

    #[error("Could not store password: {0}")]
    Hash(String),

    #[error("Could not save settings: {0}")]
    Store(#[from] StoreError),
}

//! Message logs.
//!
//! Each user has a log that collects private messages received while no
//! client was attached; the bouncer itself keeps a main log of logins,
//! connects and administrative actions.

use thiserror::Error;

mod log;

pub use log::MessageLog;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

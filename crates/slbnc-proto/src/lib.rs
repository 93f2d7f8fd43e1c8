//! Protocol primitives for the slbnc IRC bouncer.
//!
//! Nothing in this crate performs I/O. It provides:
//!
//! - [`LineRef`]: zero-copy tokenizer for a single IRC line
//! - [`tokenize`]: the same parameter splitter, for bouncer control commands
//! - [`Hostmask`]: `nick!user@host` origins
//! - [`Casemapping`]: case-insensitive keys for nicks and channels
//! - [`ISupportTable`]: the server-advertised feature table (numeric 005)
//! - [`response`]: numeric reply codes the bouncer emits or tracks

pub mod casemap;
pub mod error;
pub mod isupport;
pub mod line;
pub mod prefix;
pub mod response;

pub use casemap::Casemapping;
pub use error::ParseError;
pub use isupport::{ChanModes, ISupportTable, ModeKind, PrefixSpec};
pub use line::{tokenize, LineRef, Params, MAX_PARAMS};
pub use prefix::Hostmask;

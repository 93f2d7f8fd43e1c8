//! Role handlers.
//!
//! A session carries either a [`ClientHandler`] (the bouncer emulating a
//! server toward the user's IRC client) or an [`UpstreamHandler`] (the
//! bouncer emulating a client toward the network). Client lines are
//! dispatched by the bouncer through `client.rs`; upstream lines go through
//! the sans-IO state machine in `upstream.rs`.
//!
//! Bouncer control commands (`/slbnc help`, `/msg -slbnc status`, ...) live
//! in [`bnc`].

pub mod bnc;
mod client;
pub mod synth;
pub mod upstream;

pub use bnc::{CommandTable, ReplyStyle};
pub use client::ClientHandler;
pub use upstream::{Feed, UpstreamAction, UpstreamCtx, UpstreamHandler};

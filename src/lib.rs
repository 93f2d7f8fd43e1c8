//! slbnc - Straylight IRC Bouncer
//!
//! Keeps users connected to their IRC servers while their own clients come
//! and go, replaying channel state on reattach.

pub mod config;
pub mod error;
pub mod handlers;
pub mod history;
pub mod hooks;
pub mod network;
pub mod security;
pub mod state;

//! Bouncer state: users, the channels their upstreams are in, and the
//! [`Bouncer`] context tying sessions to users.

mod bouncer;
mod channel;
mod pump;
mod relay;
mod user;

pub use bouncer::{Bouncer, CONNECT_RETRY_SECS, RECONNECT_SECS, Request};
pub use channel::{Channel, NickEntry, Topic};
pub use pump::FlushReport;
pub use user::{User, is_valid_username, keys};

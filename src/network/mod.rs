//! Network layer.
//!
//! - [`queue`]: block-growing byte buffer
//! - [`transport`]: non-blocking byte transports (TCP, in-memory, null)
//! - [`session`]: one connection with its queues and role
//! - [`reactor`]: the single-threaded event loop

pub mod queue;
pub mod reactor;
pub mod session;
pub mod transport;

pub use queue::ByteQueue;
pub use reactor::{Reactor, unix_now};
pub use session::{Role, RoleKind, Session, SessionId, WriteStatus, split_lines};
pub use transport::{MemoryPeer, MemoryTransport, NullTransport, TcpTransport, Transport};

//! Moving bytes: read readiness in, queued output out.

use super::bouncer::Bouncer;
use crate::network::session::{Role, RoleKind, SessionId, WriteStatus};
use tracing::{debug, trace};

/// Outcome of one [`Bouncer::flush`] pass.
#[derive(Debug, Default)]
pub struct FlushReport {
    /// Some session still has output it may send right away.
    pub more: bool,
    /// Sessions whose transport is full; wait for writability.
    pub blocked: Vec<SessionId>,
}

impl Bouncer {
    /// The socket of `id` is readable: read once and dispatch whole lines in
    /// order. A session that starts shutting down stops dispatching.
    pub fn on_readable(&mut self, id: SessionId, now: i64) {
        let Some(session) = self.sessions.get_mut(&id) else {
            return;
        };
        let dispatch = !session.is_shutting_down();
        match session.read(dispatch) {
            Ok(lines) => {
                for line in lines {
                    if !self.sessions.get(&id).is_some_and(|s| !s.is_shutting_down()) {
                        break;
                    }
                    self.dispatch_line(id, &line, now);
                }
            }
            Err(e) => {
                debug!(session = %id, error = %e, "Read failed");
                self.destroy_session(id, now);
            }
        }
    }

    /// Hand one line to the session's role.
    pub fn dispatch_line(&mut self, id: SessionId, raw: &[u8], now: i64) {
        let Some(kind) = self.sessions.get(&id).map(|s| s.role().kind()) else {
            return;
        };
        trace!(session = %id, line = %String::from_utf8_lossy(raw), "<-");
        match kind {
            RoleKind::Client => self.client_line(id, raw, now),
            RoleKind::Upstream => self.upstream_line(id, raw, now),
            RoleKind::Unknown => {}
        }
    }

    /// The socket of `id` can take more bytes.
    pub fn on_writable(&mut self, id: SessionId) {
        if let Some(session) = self.sessions.get_mut(&id) {
            session.unblock();
        }
    }

    /// Whether `id` may write at `now`. An upstream whose user has no
    /// client attached sends at most one chunk per second.
    fn throttled(&self, id: SessionId, now: i64) -> bool {
        let Some(session) = self.sessions.get(&id) else {
            return false;
        };
        let Role::Upstream(up) = session.role() else {
            return false;
        };
        let attached = session
            .owner()
            .and_then(|owner| self.users.get(owner))
            .is_some_and(|u| u.client.is_some());
        !attached && !up.throttle_ready(now)
    }

    /// Give every session with queued output one write.
    pub fn flush(&mut self, now: i64) -> FlushReport {
        let mut report = FlushReport::default();
        let ids: Vec<SessionId> = self.sessions.keys().copied().collect();

        for id in ids {
            if self.throttled(id, now) {
                continue;
            }
            let Some(session) = self.sessions.get_mut(&id) else {
                continue;
            };
            if session.is_write_blocked() {
                continue;
            }
            match session.write() {
                Ok(WriteStatus::Idle) => {}
                Ok(WriteStatus::Sent(_)) => {
                    let left = session.has_queued_data();
                    let detached_upstream = match &session.role {
                        Role::Upstream(_) => !session
                            .owner()
                            .and_then(|owner| self.users.get(owner))
                            .is_some_and(|u| u.client.is_some()),
                        _ => false,
                    };
                    if detached_upstream {
                        if let Role::Upstream(up) = &mut session.role {
                            up.mark_burst(now);
                        }
                    } else if left {
                        report.more = true;
                    }
                }
                Ok(WriteStatus::Blocked) => report.blocked.push(id),
                Ok(WriteStatus::Closed) => self.destroy_session(id, now),
                Err(e) => {
                    debug!(session = %id, error = %e, "Write failed");
                    self.destroy_session(id, now);
                }
            }
        }
        report
    }
}

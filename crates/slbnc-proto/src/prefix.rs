//! Message origins.

/// An origin of the form `nick!user@host`, or a bare server name.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Hostmask<'a> {
    /// Nick, or the whole origin when it carries no `!`/`@`.
    pub nick: &'a str,
    /// Ident part, when present.
    pub user: Option<&'a str>,
    /// Host part, when present.
    pub host: Option<&'a str>,
}

impl<'a> Hostmask<'a> {
    /// Split an origin. Never fails: missing parts are `None`.
    pub fn parse(origin: &'a str) -> Self {
        let (front, host) = match origin.split_once('@') {
            Some((front, host)) => (front, Some(host)),
            None => (origin, None),
        };
        let (nick, user) = match front.split_once('!') {
            Some((nick, user)) => (nick, Some(user)),
            None => (front, None),
        };
        Hostmask { nick, user, host }
    }

    /// `user@host` when both halves are known.
    pub fn userhost(&self) -> Option<String> {
        match (self.user, self.host) {
            (Some(user), Some(host)) => Some(format!("{user}@{host}")),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_mask() {
        let mask = Hostmask::parse("alice!ali@example.org");
        assert_eq!(mask.nick, "alice");
        assert_eq!(mask.user, Some("ali"));
        assert_eq!(mask.host, Some("example.org"));
        assert_eq!(mask.userhost().as_deref(), Some("ali@example.org"));
    }

    #[test]
    fn server_name() {
        let mask = Hostmask::parse("irc.example.org");
        assert_eq!(mask.nick, "irc.example.org");
        assert_eq!(mask.userhost(), None);
    }

    #[test]
    fn nick_and_host_without_user() {
        let mask = Hostmask::parse("bob@host");
        assert_eq!(mask.nick, "bob");
        assert_eq!(mask.user, None);
        assert_eq!(mask.userhost(), None);
    }
}

//! Channel state cached by an upstream session.

use slbnc_proto::{Casemapping, ISupportTable, ModeKind, PrefixSpec};
use std::collections::BTreeMap;

/// Channel topic with metadata.
///
/// An empty `text` means the network reported that no topic is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topic {
    pub text: String,
    pub set_by: Option<String>,
    pub set_at: i64,
}

/// One member of a tracked channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NickEntry {
    pub nick: String,
    /// Status prefix symbols held, highest rank first (e.g. `@+`).
    pub prefixes: String,
    /// `ident@host`, learned from the first origin seen for this nick.
    pub userhost: Option<String>,
}

impl NickEntry {
    pub fn new(nick: &str) -> Self {
        Self {
            nick: nick.to_string(),
            prefixes: String::new(),
            userhost: None,
        }
    }

    /// Highest-ranked prefix symbol held.
    pub fn highest_prefix(&self) -> Option<char> {
        self.prefixes.chars().next()
    }

    /// Grant a prefix symbol, keeping rank order.
    pub fn add_prefix(&mut self, prefix: char, spec: &PrefixSpec<'_>) {
        if self.prefixes.contains(prefix) {
            return;
        }
        self.prefixes.push(prefix);
        let mut symbols: Vec<char> = self.prefixes.chars().collect();
        symbols.sort_by_key(|c| spec.rank(*c).unwrap_or(usize::MAX));
        self.prefixes = symbols.into_iter().collect();
    }

    /// Revoke a prefix symbol.
    pub fn remove_prefix(&mut self, prefix: char) {
        self.prefixes.retain(|c| c != prefix);
    }

    /// Record the hostmask unless one is already known.
    pub fn learn_userhost(&mut self, userhost: &str) {
        if self.userhost.is_none() {
            self.userhost = Some(userhost.to_string());
        }
    }
}

/// A channel the bouncer's user is currently in.
#[derive(Debug, Clone)]
pub struct Channel {
    pub name: String,
    /// Creation timestamp; 0 until numeric 329 arrives.
    pub created: i64,
    /// `None` until the network tells us anything about the topic.
    pub topic: Option<Topic>,
    modes: BTreeMap<char, Option<String>>,
    modes_known: bool,
    members: BTreeMap<String, NickEntry>,
    names_loaded: bool,
    names_receiving: bool,
}

impl Channel {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            created: 0,
            topic: None,
            modes: BTreeMap::new(),
            modes_known: false,
            members: BTreeMap::new(),
            names_loaded: false,
            names_receiving: false,
        }
    }

    // ------------------------------------------------------------------
    // Membership
    // ------------------------------------------------------------------

    /// Add `nick` under `key` if absent and return its entry.
    pub fn add_member(&mut self, key: String, nick: &str) -> &mut NickEntry {
        self.members
            .entry(key)
            .or_insert_with(|| NickEntry::new(nick))
    }

    pub fn remove_member(&mut self, key: &str) -> Option<NickEntry> {
        self.members.remove(key)
    }

    pub fn member(&self, key: &str) -> Option<&NickEntry> {
        self.members.get(key)
    }

    pub fn member_mut(&mut self, key: &str) -> Option<&mut NickEntry> {
        self.members.get_mut(key)
    }

    /// Move an entry to a new key and display nick.
    pub fn rename_member(&mut self, old_key: &str, new_key: String, new_nick: &str) -> bool {
        match self.members.remove(old_key) {
            Some(mut entry) => {
                entry.nick = new_nick.to_string();
                self.members.insert(new_key, entry);
                true
            }
            None => false,
        }
    }

    pub fn members(&self) -> impl Iterator<Item = &NickEntry> {
        self.members.values()
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Start of a 353 burst. A burst after a completed one replaces the list.
    pub fn begin_names(&mut self) {
        if !self.names_receiving {
            if self.names_loaded {
                self.members.clear();
                self.names_loaded = false;
            }
            self.names_receiving = true;
        }
    }

    /// Numeric 366 seen.
    pub fn end_names(&mut self) {
        self.names_receiving = false;
        self.names_loaded = true;
    }

    /// Whether the member list is complete enough to answer NAMES locally.
    pub fn has_names(&self) -> bool {
        self.names_loaded
    }

    /// Re-key members after the network changed its case mapping.
    pub fn refold(&mut self, map: Casemapping) {
        let members = std::mem::take(&mut self.members);
        self.members = members
            .into_values()
            .map(|entry| (map.fold(&entry.nick), entry))
            .collect();
    }

    // ------------------------------------------------------------------
    // Modes
    // ------------------------------------------------------------------

    /// Whether a full mode snapshot (numeric 324) has been seen.
    pub fn modes_known(&self) -> bool {
        self.modes_known
    }

    /// Whether a simple (non-list, non-status) mode is set.
    pub fn has_mode(&self, mode: char) -> bool {
        self.modes.contains_key(&mode)
    }

    /// Replace the mode set with a 324 snapshot.
    pub fn set_modes(&mut self, modes: &str, args: &[&str], isupport: &ISupportTable) {
        self.modes.clear();
        self.apply_modes(modes, args, isupport);
        self.modes_known = true;
    }

    /// Apply a MODE change. Status modes update member prefixes, list modes
    /// only consume their argument.
    pub fn apply_modes(&mut self, modes: &str, args: &[&str], isupport: &ISupportTable) {
        let spec = isupport.prefix();
        let map = isupport.casemapping();
        let mut args = args.iter().copied();
        let mut adding = true;

        for mode in modes.chars() {
            match mode {
                '+' => adding = true,
                '-' => adding = false,
                _ => {
                    let arg = if isupport.requires_parameter(mode, adding) {
                        args.next()
                    } else {
                        None
                    };
                    match isupport.mode_kind(mode) {
                        Some(ModeKind::Prefix) => {
                            let (Some(nick), Some(prefix)) = (arg, spec.prefix_for_mode(mode)) else {
                                continue;
                            };
                            if let Some(entry) = self.members.get_mut(&map.fold(nick)) {
                                if adding {
                                    entry.add_prefix(prefix, &spec);
                                } else {
                                    entry.remove_prefix(prefix);
                                }
                            }
                        }
                        Some(ModeKind::List) => {}
                        _ if adding => {
                            self.modes.insert(mode, arg.map(str::to_owned));
                        }
                        _ => {
                            self.modes.remove(&mode);
                        }
                    }
                }
            }
        }
    }

    /// Modes as a 324 parameter string, e.g. `+knt secret`.
    pub fn mode_string(&self) -> String {
        let mut letters = String::from("+");
        let mut params = Vec::new();
        for (mode, param) in &self.modes {
            letters.push(*mode);
            if let Some(p) = param {
                params.push(p.as_str());
            }
        }
        if params.is_empty() {
            letters
        } else {
            format!("{} {}", letters, params.join(" "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(nick: &str) -> String {
        Casemapping::Rfc1459.fold(nick)
    }

    #[test]
    fn prefixes_stay_rank_ordered() {
        let spec = PrefixSpec::DEFAULT;
        let mut entry = NickEntry::new("bob");
        entry.add_prefix('+', &spec);
        entry.add_prefix('@', &spec);
        entry.add_prefix('@', &spec);
        assert_eq!(entry.prefixes, "@+");
        assert_eq!(entry.highest_prefix(), Some('@'));
        entry.remove_prefix('@');
        assert_eq!(entry.highest_prefix(), Some('+'));
    }

    #[test]
    fn userhost_is_never_overwritten() {
        let mut entry = NickEntry::new("bob");
        entry.learn_userhost("b@one");
        entry.learn_userhost("b@two");
        assert_eq!(entry.userhost.as_deref(), Some("b@one"));
    }

    #[test]
    fn mode_changes_track_flags_and_members() {
        let isupport = ISupportTable::new();
        let mut chan = Channel::new("#x");
        chan.add_member(key("Alice"), "Alice");

        chan.set_modes("+ntk", &["key"], &isupport);
        assert_eq!(chan.mode_string(), "+knt key");
        assert!(chan.modes_known());

        chan.apply_modes("+o-k+b+l", &["alice", "key", "*!*@bad", "10"], &isupport);
        assert_eq!(chan.member(&key("ALICE")).unwrap().prefixes, "@");
        assert_eq!(chan.mode_string(), "+lnt 10");

        chan.apply_modes("-lo", &["Alice"], &isupport);
        assert_eq!(chan.mode_string(), "+nt");
        assert_eq!(chan.member(&key("alice")).unwrap().prefixes, "");
    }

    #[test]
    fn names_refresh_replaces_members() {
        let mut chan = Channel::new("#x");
        chan.begin_names();
        chan.add_member(key("a"), "a");
        chan.begin_names();
        chan.add_member(key("b"), "b");
        chan.end_names();
        assert_eq!(chan.member_count(), 2);

        chan.begin_names();
        chan.add_member(key("c"), "c");
        chan.end_names();
        assert_eq!(chan.member_count(), 1);
        assert!(chan.has_names());
    }

    #[test]
    fn rename_moves_entry() {
        let mut chan = Channel::new("#x");
        chan.add_member(key("old"), "old").learn_userhost("u@h");
        assert!(chan.rename_member(&key("OLD"), key("New"), "New"));
        let entry = chan.member(&key("new")).unwrap();
        assert_eq!(entry.nick, "New");
        assert_eq!(entry.userhost.as_deref(), Some("u@h"));
        assert!(!chan.rename_member("ghost", key("x"), "x"));
    }
}

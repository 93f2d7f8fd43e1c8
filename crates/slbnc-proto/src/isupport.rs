//! The ISUPPORT (numeric 005) feature table.
//!
//! An upstream session owns one [`ISupportTable`], seeded with conservative
//! defaults and overwritten token by token as the network advertises its
//! real values. Mode and prefix questions asked while tracking channel
//! state are answered from here.

use crate::casemap::Casemapping;
use std::collections::BTreeMap;

/// Seeded `CHANMODES` value.
pub const DEFAULT_CHANMODES: &str = "b,k,l,imnpst";
/// Seeded `CHANTYPES` value.
pub const DEFAULT_CHANTYPES: &str = "#&";
/// Seeded `PREFIX` value.
pub const DEFAULT_PREFIX: &str = "(ohv)@%+";

/// How a channel mode letter consumes parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModeKind {
    /// Membership status mode from `PREFIX` (always takes a nick).
    Prefix,
    /// Type A: list mode, parameter on set and unset.
    List,
    /// Type B: parameter on set and unset.
    Always,
    /// Type C: parameter only when set.
    OnSet,
    /// Type D: never takes a parameter.
    Never,
}

/// Parsed `PREFIX` value, e.g. `(ohv)@%+`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PrefixSpec<'a> {
    /// Status mode letters, highest rank first.
    pub modes: &'a str,
    /// Matching prefix symbols, same order.
    pub prefixes: &'a str,
}

impl PrefixSpec<'static> {
    /// Value used when the network sends an unparsable `PREFIX`.
    pub const DEFAULT: PrefixSpec<'static> = PrefixSpec {
        modes: "ohv",
        prefixes: "@%+",
    };
}

impl<'a> PrefixSpec<'a> {
    /// Parse `(modes)prefixes`. Both halves must be present and the same length.
    pub fn parse(value: &'a str) -> Option<Self> {
        let inner = value.strip_prefix('(')?;
        let (modes, prefixes) = inner.split_once(')')?;
        if modes.chars().count() != prefixes.chars().count() {
            return None;
        }
        Some(PrefixSpec { modes, prefixes })
    }

    /// Prefix symbol granted by a status mode (`o` → `@`).
    pub fn prefix_for_mode(&self, mode: char) -> Option<char> {
        self.modes
            .chars()
            .position(|c| c == mode)
            .and_then(|i| self.prefixes.chars().nth(i))
    }

    /// Status mode behind a prefix symbol (`@` → `o`).
    pub fn mode_for_prefix(&self, prefix: char) -> Option<char> {
        self.prefixes
            .chars()
            .position(|c| c == prefix)
            .and_then(|i| self.modes.chars().nth(i))
    }

    /// Rank of a prefix symbol; 0 is the highest.
    pub fn rank(&self, prefix: char) -> Option<usize> {
        self.prefixes.chars().position(|c| c == prefix)
    }
}

/// Parsed `CHANMODES` value split into its A/B/C/D groups.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChanModes<'a> {
    /// List modes.
    pub a: &'a str,
    /// Always-parameter modes.
    pub b: &'a str,
    /// Parameter-on-set modes.
    pub c: &'a str,
    /// Flag modes.
    pub d: &'a str,
}

impl<'a> ChanModes<'a> {
    /// Parse `A,B,C,D`. Networks that send fewer groups get their last group
    /// treated as flag modes, so `b,l,ntis` reads as A=`b`, B=`l`, D=`ntis`.
    pub fn parse(value: &'a str) -> Self {
        let groups: Vec<&'a str> = value.splitn(4, ',').collect();
        match *groups.as_slice() {
            [a, b, c, d] => ChanModes { a, b, c, d },
            [a, b, d] => ChanModes { a, b, c: "", d },
            [a, d] => ChanModes { a, b: "", c: "", d },
            [d] => ChanModes { d, ..Default::default() },
            _ => ChanModes::default(),
        }
    }

    /// Classification of a letter, if it appears in any group.
    pub fn kind(&self, mode: char) -> Option<ModeKind> {
        if self.a.contains(mode) {
            Some(ModeKind::List)
        } else if self.b.contains(mode) {
            Some(ModeKind::Always)
        } else if self.c.contains(mode) {
            Some(ModeKind::OnSet)
        } else if self.d.contains(mode) {
            Some(ModeKind::Never)
        } else {
            None
        }
    }
}

/// Feature name → optional value, keyed case-insensitively.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ISupportTable {
    entries: BTreeMap<String, Option<String>>,
}

impl Default for ISupportTable {
    fn default() -> Self {
        let mut table = ISupportTable {
            entries: BTreeMap::new(),
        };
        table.set("CHANMODES", Some(DEFAULT_CHANMODES));
        table.set("CHANTYPES", Some(DEFAULT_CHANTYPES));
        table.set("PREFIX", Some(DEFAULT_PREFIX));
        table
    }
}

impl ISupportTable {
    /// Table holding only the seeded defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite one feature.
    pub fn set(&mut self, key: &str, value: Option<&str>) {
        self.entries
            .insert(key.to_ascii_uppercase(), value.map(str::to_owned));
    }

    /// Apply one advertised token: `KEY`, `KEY=VALUE` or `-KEY`.
    pub fn apply(&mut self, token: &str) {
        if token.is_empty() {
            return;
        }
        if let Some(key) = token.strip_prefix('-') {
            self.entries.remove(&key.to_ascii_uppercase());
            return;
        }
        match token.split_once('=') {
            Some((key, value)) => self.set(key, Some(value)),
            None => self.set(token, None),
        }
    }

    /// `Some(None)` for a bare feature, `Some(Some(v))` for a valued one.
    pub fn get(&self, key: &str) -> Option<Option<&str>> {
        self.entries
            .get(&key.to_ascii_uppercase())
            .map(|v| v.as_deref())
    }

    /// Value of a feature, when present and valued.
    pub fn value(&self, key: &str) -> Option<&str> {
        self.get(key).flatten()
    }

    /// Number of features.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Features rendered back into wire tokens, sorted by key.
    pub fn tokens(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|(key, value)| match value.as_deref() {
                Some(v) if !v.is_empty() => format!("{key}={v}"),
                _ => key.clone(),
            })
            .collect()
    }

    /// Current `PREFIX`, falling back to the default on a malformed value.
    pub fn prefix(&self) -> PrefixSpec<'_> {
        self.value("PREFIX")
            .and_then(PrefixSpec::parse)
            .unwrap_or(PrefixSpec::DEFAULT)
    }

    /// Current `CHANMODES`.
    pub fn chanmodes(&self) -> ChanModes<'_> {
        ChanModes::parse(self.value("CHANMODES").unwrap_or(""))
    }

    /// Current `CHANTYPES`.
    pub fn chantypes(&self) -> &str {
        self.value("CHANTYPES").unwrap_or(DEFAULT_CHANTYPES)
    }

    /// Folding rule from `CASEMAPPING`.
    pub fn casemapping(&self) -> Casemapping {
        self.value("CASEMAPPING")
            .map(Casemapping::from_token)
            .unwrap_or_default()
    }

    /// Whether `name` starts with one of the channel type characters.
    pub fn is_channel(&self, name: &str) -> bool {
        name.chars()
            .next()
            .is_some_and(|c| self.chantypes().contains(c))
    }

    /// Whether the letter is listed in `CHANMODES`.
    pub fn is_chan_mode(&self, mode: char) -> bool {
        self.chanmodes().kind(mode).is_some()
    }

    /// Whether the letter is a `PREFIX` status mode.
    pub fn is_nick_mode(&self, mode: char) -> bool {
        self.prefix().modes.contains(mode)
    }

    /// Whether the character is a `PREFIX` symbol.
    pub fn is_nick_prefix(&self, prefix: char) -> bool {
        self.prefix().prefixes.contains(prefix)
    }

    /// Prefix symbol for a status mode.
    pub fn prefix_for_chan_mode(&self, mode: char) -> Option<char> {
        self.prefix().prefix_for_mode(mode)
    }

    /// Status mode for a prefix symbol.
    pub fn mode_for_prefix(&self, prefix: char) -> Option<char> {
        self.prefix().mode_for_prefix(prefix)
    }

    /// Classify a channel mode letter. Status modes take precedence.
    pub fn mode_kind(&self, mode: char) -> Option<ModeKind> {
        if self.is_nick_mode(mode) {
            Some(ModeKind::Prefix)
        } else {
            self.chanmodes().kind(mode)
        }
    }

    /// Whether changing `mode` in the given direction consumes an argument.
    pub fn requires_parameter(&self, mode: char, adding: bool) -> bool {
        match self.mode_kind(mode) {
            Some(ModeKind::Prefix | ModeKind::List | ModeKind::Always) => true,
            Some(ModeKind::OnSet) => adding,
            Some(ModeKind::Never) | None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_seeded() {
        let table = ISupportTable::new();
        assert_eq!(table.value("CHANTYPES"), Some("#&"));
        assert!(table.is_nick_prefix('%'));
        assert!(table.is_channel("#rust"));
        assert!(!table.is_channel("rust"));
    }

    #[test]
    fn advertised_tokens_overwrite() {
        let mut table = ISupportTable::new();
        table.apply("CHANMODES=b,l,ntis");
        table.apply("PREFIX=(ohv)@%+");
        assert!(table.is_chan_mode('b'));
        assert!(table.is_nick_prefix('@'));
        assert_eq!(table.prefix_for_chan_mode('o'), Some('@'));
        assert!(!table.is_chan_mode('k'));
    }

    #[test]
    fn three_group_chanmodes() {
        let modes = ChanModes::parse("b,l,ntis");
        assert_eq!(modes.kind('b'), Some(ModeKind::List));
        assert_eq!(modes.kind('l'), Some(ModeKind::Always));
        assert_eq!(modes.kind('n'), Some(ModeKind::Never));
    }

    #[test]
    fn parameter_rules() {
        let mut table = ISupportTable::new();
        table.apply("CHANMODES=beI,k,l,imnpst");
        table.apply("PREFIX=(qaohv)~&@%+");
        assert!(table.requires_parameter('q', true));
        assert!(table.requires_parameter('b', false));
        assert!(table.requires_parameter('k', false));
        assert!(table.requires_parameter('l', true));
        assert!(!table.requires_parameter('l', false));
        assert!(!table.requires_parameter('m', true));
        assert_eq!(table.mode_for_prefix('~'), Some('q'));
        assert_eq!(table.prefix().rank('@'), Some(2));
    }

    #[test]
    fn bare_and_negated_tokens() {
        let mut table = ISupportTable::new();
        table.apply("EXCEPTS");
        table.apply("NETWORK=Example");
        assert_eq!(table.get("excepts"), Some(None));
        table.apply("-NETWORK");
        assert_eq!(table.get("NETWORK"), None);
    }

    #[test]
    fn malformed_prefix_falls_back() {
        let mut table = ISupportTable::new();
        table.apply("PREFIX=(ov)@");
        assert_eq!(table.prefix(), PrefixSpec::DEFAULT);
    }

    #[test]
    fn tokens_render_sorted() {
        let mut table = ISupportTable::new();
        table.apply("SAFELIST");
        table.apply("CASEMAPPING=ascii");
        let tokens = table.tokens();
        assert_eq!(tokens[0], "CASEMAPPING=ascii");
        assert!(tokens.contains(&"SAFELIST".to_string()));
        assert_eq!(table.casemapping(), Casemapping::Ascii);
    }
}

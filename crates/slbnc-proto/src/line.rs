//! Zero-copy tokenizer for a single IRC line.
//!
//! ```text
//! [@tags] [:origin] <verb> [param ...] [:trailing]
//! ```
//!
//! At most 14 middle parameters are split on spaces. The 15th parameter
//! takes the remainder of the line verbatim, and a parameter starting with
//! `:` always takes the remainder without its colon.

use crate::error::ParseError;
use crate::prefix::Hostmask;
use nom::{
    bytes::complete::take_while1,
    character::complete::{char, space0},
    combinator::opt,
    sequence::{preceded, terminated},
    IResult,
};
use smallvec::SmallVec;

/// Maximum number of parameters on one line.
pub const MAX_PARAMS: usize = 15;

/// Parameter list backed by inline storage for the common case.
pub type Params<'a> = SmallVec<[&'a str; MAX_PARAMS]>;

fn parse_tags(input: &str) -> IResult<&str, &str> {
    preceded(char('@'), take_while1(|c| c != ' '))(input)
}

fn parse_origin(input: &str) -> IResult<&str, &str> {
    preceded(char(':'), take_while1(|c| c != ' '))(input)
}

/// Verbs are not validated beyond "non-empty run of non-space": unknown
/// client commands are relayed upstream untouched.
fn parse_verb(input: &str) -> IResult<&str, &str> {
    take_while1(|c| c != ' ')(input)
}

type Header<'a> = (Option<&'a str>, Option<&'a str>, &'a str);

fn parse_header(input: &str) -> IResult<&str, Header<'_>> {
    let (input, tags) = opt(terminated(parse_tags, space0))(input)?;
    let (input, origin) = opt(terminated(parse_origin, space0))(input)?;
    let (input, verb) = parse_verb(input)?;
    Ok((input, (tags, origin, verb)))
}

fn split_params(input: &str) -> Params<'_> {
    let mut params = Params::new();
    let mut rest = input.trim_start_matches(' ');

    while !rest.is_empty() {
        if let Some(trailing) = rest.strip_prefix(':') {
            params.push(trailing);
            break;
        }
        if params.len() == MAX_PARAMS - 1 {
            params.push(rest);
            break;
        }
        match rest.find(' ') {
            Some(end) => {
                params.push(&rest[..end]);
                rest = rest[end..].trim_start_matches(' ');
            }
            None => {
                params.push(rest);
                break;
            }
        }
    }

    params
}

/// Split a bouncer control command (`set realname :Some Name`) into tokens
/// using the wire-format parameter rules.
pub fn tokenize(text: &str) -> Params<'_> {
    split_params(text)
}

/// A parsed line borrowing from its source text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LineRef<'a> {
    /// Raw IRCv3 tag block without the leading `@`.
    pub tags: Option<&'a str>,
    /// Message origin without the leading `:`.
    pub origin: Option<&'a str>,
    /// Verb or three-digit numeric, as sent.
    pub verb: &'a str,
    /// Parameters, trailing included.
    pub params: Params<'a>,
}

impl<'a> LineRef<'a> {
    /// Tokenize one line. Trailing CR/LF characters are ignored.
    pub fn parse(line: &'a str) -> Result<Self, ParseError> {
        let start = line.len() - line.trim_start_matches(' ').len();
        let body = line[start..].trim_end_matches(['\r', '\n']);
        if body.trim_end_matches(' ').is_empty() {
            return Err(ParseError::Empty);
        }

        match parse_header(body) {
            Ok((rest, (tags, origin, verb))) => Ok(LineRef {
                tags,
                origin,
                verb,
                params: split_params(rest),
            }),
            Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => Err(ParseError::MissingVerb {
                position: start + body.len() - e.input.len(),
            }),
            Err(nom::Err::Incomplete(_)) => Err(ParseError::MissingVerb {
                position: line.len(),
            }),
        }
    }

    /// Parameter at `index`, if present.
    #[inline]
    pub fn arg(&self, index: usize) -> Option<&'a str> {
        self.params.get(index).copied()
    }

    /// Number of parameters.
    #[inline]
    pub fn argc(&self) -> usize {
        self.params.len()
    }

    /// The final parameter, which carries free text for most verbs.
    pub fn last(&self) -> Option<&'a str> {
        self.params.last().copied()
    }

    /// Case-insensitive verb comparison.
    #[inline]
    pub fn is(&self, verb: &str) -> bool {
        self.verb.eq_ignore_ascii_case(verb)
    }

    /// The numeric code when the verb is exactly three digits.
    pub fn numeric(&self) -> Option<u16> {
        if self.verb.len() == 3 && self.verb.bytes().all(|b| b.is_ascii_digit()) {
            self.verb.parse().ok()
        } else {
            None
        }
    }

    /// Origin split into its hostmask parts.
    pub fn source(&self) -> Option<Hostmask<'a>> {
        self.origin.map(Hostmask::parse)
    }

    /// Nick (or server name) part of the origin.
    pub fn source_nick(&self) -> Option<&'a str> {
        self.source().map(|mask| mask.nick)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parses_origin_verb_and_trailing() {
        let line = LineRef::parse(":alice!a@host PRIVMSG #rust :hello there\r\n").unwrap();
        assert_eq!(line.origin, Some("alice!a@host"));
        assert_eq!(line.verb, "PRIVMSG");
        assert_eq!(line.params.as_slice(), &["#rust", "hello there"]);
        assert_eq!(line.source_nick(), Some("alice"));
    }

    #[test]
    fn parses_tags_before_origin() {
        let line = LineRef::parse("@time=2024-01-01T00:00:00Z :srv NOTICE * :hi").unwrap();
        assert_eq!(line.tags, Some("time=2024-01-01T00:00:00Z"));
        assert_eq!(line.origin, Some("srv"));
        assert!(line.is("notice"));
    }

    #[test]
    fn collapses_repeated_spaces() {
        let line = LineRef::parse("MODE   #chan    +o   bob").unwrap();
        assert_eq!(line.params.as_slice(), &["#chan", "+o", "bob"]);
    }

    #[test]
    fn empty_trailing_is_kept() {
        let line = LineRef::parse("TOPIC #chan :").unwrap();
        assert_eq!(line.params.as_slice(), &["#chan", ""]);
    }

    #[test]
    fn fifteenth_parameter_takes_the_rest() {
        let raw = "CMD 1 2 3 4 5 6 7 8 9 10 11 12 13 14 fifteen and more";
        let line = LineRef::parse(raw).unwrap();
        assert_eq!(line.argc(), MAX_PARAMS);
        assert_eq!(line.arg(13), Some("14"));
        assert_eq!(line.arg(14), Some("fifteen and more"));
    }

    #[test]
    fn numeric_detection() {
        assert_eq!(LineRef::parse(":srv 005 me A B :x").unwrap().numeric(), Some(5));
        assert_eq!(LineRef::parse(":srv 433 * nick :in use").unwrap().numeric(), Some(433));
        assert_eq!(LineRef::parse("PING :x").unwrap().numeric(), None);
        assert_eq!(LineRef::parse("1234 x").unwrap().numeric(), None);
    }

    #[test]
    fn rejects_blank_and_verbless_lines() {
        assert_eq!(LineRef::parse("   \r\n"), Err(ParseError::Empty));
        assert!(matches!(
            LineRef::parse(":origin.only"),
            Err(ParseError::MissingVerb { .. })
        ));
    }

    #[test]
    fn tokenize_control_commands() {
        let args = tokenize("set realname :Bob The Builder");
        assert_eq!(args.as_slice(), &["set", "realname", "Bob The Builder"]);
        assert!(tokenize("").is_empty());
        assert_eq!(tokenize("  help ").as_slice(), &["help"]);
    }

    proptest! {
        #[test]
        fn never_exceeds_param_limit(s in "[ -~]{0,200}") {
            if let Ok(line) = LineRef::parse(&s) {
                prop_assert!(line.argc() <= MAX_PARAMS);
                prop_assert!(!line.verb.is_empty());
            }
        }
    }
}

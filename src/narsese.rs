//! Narsese-style wire codec.
//!
//! Two kinds of text travel over the wire:
//! - judgments: `<{subject} --> [predicate]>. %f;c%`
//! - bare action tokens: `^up`, `^down`, `^hold` (plus registered aliases)
//!
//! A datagram may carry several parts joined by [`SEPARATOR`].

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::DecodeError;

pub const SEPARATOR: char = '|';

/// Confidence attached to intent statements and quality judgments.
pub const INTENT_CONFIDENCE: f64 = 0.9;

/// Truth assumed for a judgment sent without a `%f;c%` suffix.
pub const DEFAULT_TRUTH: Truth = Truth {
    frequency: 1.0,
    confidence: INTENT_CONFIDENCE,
};

/// Status line the perception sender uses when it has nothing to report.
pub const CONNECTION_FAILED: &str = "CONNECTION FAILED";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Truth {
    /// Degree of truth, 0.0-1.0
    pub frequency: f64,
    /// Evidential reliability, 0.0-1.0
    pub confidence: f64,
}

impl Truth {
    pub fn new(frequency: f64, confidence: f64) -> Self {
        Self {
            frequency: frequency.clamp(0.0, 1.0),
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    fn parse(raw: &str) -> Result<Self, DecodeError> {
        let invalid = || DecodeError::InvalidTruth(raw.to_string());
        let inner = raw
            .strip_prefix('%')
            .and_then(|s| s.strip_suffix('%'))
            .ok_or_else(invalid)?;
        let (f, c) = inner.split_once(';').ok_or_else(invalid)?;
        let frequency: f64 = f.trim().parse().map_err(|_| invalid())?;
        let confidence: f64 = c.trim().parse().map_err(|_| invalid())?;
        let unit = 0.0..=1.0;
        if !unit.contains(&frequency) || !unit.contains(&confidence) {
            return Err(invalid());
        }
        Ok(Self {
            frequency,
            confidence,
        })
    }
}

impl fmt::Display for Truth {
    // f64 Display is the shortest round-trip decimal and never uses exponents.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{};{}%", self.frequency, self.confidence)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Judgment {
    pub subject: String,
    pub predicate: String,
    pub truth: Truth,
}

impl Judgment {
    /// Terms are trimmed; an empty term or one carrying `{}[]<>` or the
    /// separator would not survive encoding and is rejected.
    pub fn new(
        subject: impl Into<String>,
        predicate: impl Into<String>,
        truth: Truth,
    ) -> Result<Self, DecodeError> {
        Ok(Self {
            subject: checked_term(subject.into())?,
            predicate: checked_term(predicate.into())?,
            truth,
        })
    }

    /// Built-in terms only.
    pub(crate) fn fixed(subject: &'static str, predicate: &'static str, truth: Truth) -> Self {
        debug_assert!(valid_term(subject) && valid_term(predicate));
        Self {
            subject: subject.to_string(),
            predicate: predicate.to_string(),
            truth,
        }
    }
}

fn checked_term(term: String) -> Result<String, DecodeError> {
    let trimmed = term.trim();
    if !valid_term(trimmed) {
        return Err(DecodeError::MalformedStatement {
            text: term,
            reason: "empty or invalid term",
        });
    }
    Ok(trimmed.to_string())
}

impl fmt::Display for Judgment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{{{}}} --> [{}]>. {}", self.subject, self.predicate, self.truth)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionToken {
    Up,
    Down,
    Hold,
}

impl ActionToken {
    pub const ALL: [ActionToken; 3] = [ActionToken::Up, ActionToken::Down, ActionToken::Hold];

    pub fn name(&self) -> &'static str {
        match self {
            ActionToken::Up => "up",
            ActionToken::Down => "down",
            ActionToken::Hold => "hold",
        }
    }

    /// Operator form sent back to the environment.
    pub fn wire(&self) -> &'static str {
        match self {
            ActionToken::Up => "^up",
            ActionToken::Down => "^down",
            ActionToken::Hold => "^hold",
        }
    }
}

impl fmt::Display for ActionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire())
    }
}

/// One decoded message part.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Judgment(Judgment),
    Action(ActionToken),
}

pub fn encode(judgment: &Judgment) -> String {
    judgment.to_string()
}

/// `<{up} --> [on]>. %1;0.9%` and friends.
pub fn encode_intent(token: ActionToken) -> String {
    encode(&intent_judgment(token))
}

pub fn intent_judgment(token: ActionToken) -> Judgment {
    Judgment::fixed(token.name(), "on", Truth::new(1.0, INTENT_CONFIDENCE))
}

pub fn join_message<S: AsRef<str>>(parts: &[S]) -> String {
    let mut out = String::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            out.push(SEPARATOR);
        }
        out.push_str(part.as_ref());
    }
    out
}

pub fn split_message(text: &str) -> Vec<&str> {
    text.split(SEPARATOR)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect()
}

/// Decoder carrying the token alias table.
#[derive(Debug, Clone)]
pub struct Codec {
    aliases: HashMap<String, ActionToken>,
}

impl Default for Codec {
    fn default() -> Self {
        let mut codec = Self {
            aliases: HashMap::new(),
        };
        for token in ActionToken::ALL {
            codec.add_alias(token.wire(), token);
            codec.add_alias(token.name(), token);
        }
        codec
    }
}

impl Codec {
    /// Codec that only knows the aliases given (wire forms included if listed).
    pub fn empty() -> Self {
        Self {
            aliases: HashMap::new(),
        }
    }

    pub fn with_alias(mut self, alias: &str, token: ActionToken) -> Self {
        self.add_alias(alias, token);
        self
    }

    pub fn add_alias(&mut self, alias: &str, token: ActionToken) {
        self.aliases.insert(alias.trim().to_string(), token);
    }

    pub fn resolve(&self, alias: &str) -> Option<ActionToken> {
        self.aliases.get(alias.trim()).copied()
    }

    pub fn decode(&self, text: &str) -> Result<Statement, DecodeError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(DecodeError::Empty);
        }
        if text.starts_with('<') {
            return parse_judgment(text).map(Statement::Judgment);
        }
        self.resolve(text)
            .map(Statement::Action)
            .ok_or_else(|| DecodeError::UnknownToken(text.to_string()))
    }

    /// Decode a part that must be a judgment.
    pub fn decode_judgment(&self, text: &str) -> Result<Judgment, DecodeError> {
        match self.decode(text)? {
            Statement::Judgment(j) => Ok(j),
            Statement::Action(_) => Err(DecodeError::NotAJudgment(text.trim().to_string())),
        }
    }

    pub fn decode_message(&self, text: &str) -> Result<Vec<Statement>, DecodeError> {
        split_message(text).into_iter().map(|p| self.decode(p)).collect()
    }
}

fn parse_judgment(text: &str) -> Result<Judgment, DecodeError> {
    let malformed = |reason: &'static str| DecodeError::MalformedStatement {
        text: text.to_string(),
        reason,
    };

    let rest = text
        .strip_prefix("<{")
        .ok_or_else(|| malformed("expected '<{'"))?;
    let (subject, rest) = rest
        .split_once('}')
        .ok_or_else(|| malformed("unterminated subject"))?;
    let rest = rest
        .trim_start()
        .strip_prefix("-->")
        .ok_or_else(|| malformed("expected '-->'"))?;
    let rest = rest
        .trim_start()
        .strip_prefix('[')
        .ok_or_else(|| malformed("expected '['"))?;
    let (predicate, rest) = rest
        .split_once("]>")
        .ok_or_else(|| malformed("unterminated predicate"))?;
    let rest = rest
        .strip_prefix('.')
        .ok_or_else(|| malformed("expected '.' punctuation"))?;

    let truth_text = rest.trim();
    let truth = if truth_text.is_empty() {
        DEFAULT_TRUTH
    } else {
        Truth::parse(truth_text)?
    };

    Judgment::new(subject, predicate, truth).map_err(|_| malformed("empty or invalid term"))
}

fn valid_term(term: &str) -> bool {
    !term.is_empty()
        && !term
            .chars()
            .any(|c| matches!(c, '{' | '}' | '[' | ']' | '<' | '>' | SEPARATOR))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn good(f: f64) -> Judgment {
        Judgment::new("SELF", "good", Truth::new(f, 0.9)).unwrap()
    }

    #[test]
    fn encodes_judgment() {
        assert_eq!(encode(&good(0.95)), "<{SELF} --> [good]>. %0.95;0.9%");
        assert_eq!(encode(&good(1.0)), "<{SELF} --> [good]>. %1;0.9%");
    }

    #[test]
    fn encodes_small_values_without_exponent() {
        let s = encode(&good(0.0000001));
        assert!(s.contains("0.0000001"), "{}", s);
        assert!(!s.contains('e'));
    }

    #[test]
    fn encodes_intents() {
        assert_eq!(encode_intent(ActionToken::Up), "<{up} --> [on]>. %1;0.9%");
        assert_eq!(encode_intent(ActionToken::Down), "<{down} --> [on]>. %1;0.9%");
        assert_eq!(encode_intent(ActionToken::Hold), "<{hold} --> [on]>. %1;0.9%");
    }

    #[test]
    fn round_trip_preserves_truth() {
        let codec = Codec::default();
        for (f, c) in [(0.0, 0.0), (0.123456789, 0.9), (1.0, 1.0), (0.5, 0.333333333)] {
            let j = Judgment::new("SELF", "good", Truth::new(f, c)).unwrap();
            let decoded = codec.decode_judgment(&encode(&j)).unwrap();
            assert_eq!(decoded.subject, "SELF");
            assert_eq!(decoded.predicate, "good");
            assert!((decoded.truth.frequency - f).abs() < 1e-6);
            assert!((decoded.truth.confidence - c).abs() < 1e-6);
        }
    }

    #[test]
    fn decodes_tokens_and_aliases() {
        let codec = Codec::default();
        assert_eq!(codec.decode("^up").unwrap(), Statement::Action(ActionToken::Up));
        assert_eq!(codec.decode(" down ").unwrap(), Statement::Action(ActionToken::Down));
        assert_eq!(codec.decode("^hold").unwrap(), Statement::Action(ActionToken::Hold));

        let extended = Codec::default().with_alias("raise", ActionToken::Up);
        assert_eq!(extended.decode("raise").unwrap(), Statement::Action(ActionToken::Up));
    }

    #[test]
    fn terms_that_cannot_round_trip_are_rejected() {
        for bad in ["a|b", "a}b", "[x]", "<x", "x>", "{x", "", "   "] {
            assert!(
                matches!(
                    Judgment::new(bad, "good", DEFAULT_TRUTH),
                    Err(DecodeError::MalformedStatement { .. })
                ),
                "{:?}",
                bad
            );
            assert!(Judgment::new("SELF", bad, DEFAULT_TRUTH).is_err(), "{:?}", bad);
        }
        let j = Judgment::new(" a b ", "good", DEFAULT_TRUTH).unwrap();
        assert_eq!(j.subject, "a b");
        assert_eq!(Codec::default().decode_judgment(&encode(&j)).unwrap(), j);
    }

    #[test]
    fn unknown_token_is_rejected() {
        let err = Codec::default().decode("^sideways").unwrap_err();
        assert_eq!(err, DecodeError::UnknownToken("^sideways".to_string()));
    }

    #[test]
    fn missing_truth_uses_default() {
        let j = Codec::default().decode_judgment("<{SELF} --> [good]>.").unwrap();
        assert_eq!(j.truth, DEFAULT_TRUTH);
    }

    #[test]
    fn malformed_statements() {
        let codec = Codec::default();
        for text in [
            "<SELF --> [good]>. %1;0.9%",
            "<{SELF} -> [good]>. %1;0.9%",
            "<{SELF} --> good>. %1;0.9%",
            "<{SELF} --> [good]> %1;0.9%",
            "<{} --> [good]>. %1;0.9%",
        ] {
            assert!(
                matches!(codec.decode(text), Err(DecodeError::MalformedStatement { .. })),
                "{}",
                text
            );
        }
    }

    #[test]
    fn invalid_truth_values() {
        let codec = Codec::default();
        for text in [
            "<{SELF} --> [good]>. %1.5;0.9%",
            "<{SELF} --> [good]>. %abc;0.9%",
            "<{SELF} --> [good]>. %1%",
            "<{SELF} --> [good]>. 1;0.9",
        ] {
            assert!(
                matches!(codec.decode(text), Err(DecodeError::InvalidTruth(_))),
                "{}",
                text
            );
        }
    }

    #[test]
    fn token_on_judgment_path_is_rejected() {
        let err = Codec::default().decode_judgment("^up").unwrap_err();
        assert!(matches!(err, DecodeError::NotAJudgment(_)));
    }

    #[test]
    fn join_and_split() {
        let msg = join_message(&["<{up} --> [on]>. %1;0.9%", "<{SELF} --> [good]>. %0.5;0.9%"]);
        assert_eq!(msg, "<{up} --> [on]>. %1;0.9%|<{SELF} --> [good]>. %0.5;0.9%");
        let parts = split_message(&msg);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0], "<{up} --> [on]>. %1;0.9%");
        assert!(split_message("").is_empty());
        assert_eq!(split_message("^up||"), vec!["^up"]);
    }

    #[test]
    fn decodes_multi_part_message() {
        let stmts = Codec::default()
            .decode_message("<{down} --> [on]>. %1;0.9%|<{SELF} --> [good]>. %0.8;0.9%")
            .unwrap();
        assert_eq!(stmts.len(), 2);
        match &stmts[1] {
            Statement::Judgment(j) => assert!((j.truth.frequency - 0.8).abs() < 1e-12),
            other => panic!("unexpected {:?}", other),
        }
    }
}

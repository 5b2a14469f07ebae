//! Dot-separated subjects and NATS-style wildcard patterns.
//!
//! A subject is a non-empty sequence of tokens such as
//! `objects.alice.updated`. Patterns may use `*` to match exactly one token
//! and `>` (last token only) to match one or more remaining tokens.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{EventError, EventResult};

const SEPARATOR: char = '.';
const ONE: &str = "*";
const REST: &str = ">";

fn check_token(token: &str) -> Result<(), &'static str> {
    if token.is_empty() {
        return Err("empty token");
    }
    if token.chars().any(char::is_whitespace) {
        return Err("whitespace in token");
    }
    Ok(())
}

/// A concrete subject an event is published on.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Subject(String);

impl Subject {
    pub fn new(subject: impl Into<String>) -> EventResult<Self> {
        let subject = subject.into();
        let invalid = |reason: &str| EventError::InvalidSubject {
            subject: subject.clone(),
            reason: reason.into(),
        };
        for token in subject.split(SEPARATOR) {
            check_token(token).map_err(invalid)?;
            if token == ONE || token == REST {
                return Err(invalid("wildcards are only allowed in patterns"));
            }
        }
        Ok(Self(subject))
    }

    /// Join already-valid tokens. Callers guarantee the tokens carry no
    /// separators or wildcards.
    pub(crate) fn from_tokens(tokens: &[&str]) -> Self {
        Self(tokens.join("."))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.0.split(SEPARATOR)
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Subject {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Subject {
    type Error = EventError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Subject> for String {
    fn from(subject: Subject) -> Self {
        subject.0
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum Token {
    Literal(String),
    One,
    Rest,
}

/// A subscription pattern over subjects.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SubjectPattern {
    raw: String,
    tokens: Vec<Token>,
}

impl SubjectPattern {
    pub fn new(pattern: impl Into<String>) -> EventResult<Self> {
        let raw = pattern.into();
        let invalid = |reason: &str| EventError::InvalidPattern {
            pattern: raw.clone(),
            reason: reason.into(),
        };
        let parts: Vec<&str> = raw.split(SEPARATOR).collect();
        let mut tokens = Vec::with_capacity(parts.len());
        for (i, part) in parts.iter().enumerate() {
            check_token(part).map_err(invalid)?;
            tokens.push(match *part {
                ONE => Token::One,
                REST if i + 1 == parts.len() => Token::Rest,
                REST => return Err(invalid("`>` must be the last token")),
                literal => Token::Literal(literal.to_string()),
            });
        }
        Ok(Self { raw, tokens })
    }

    /// Pattern matching every subject.
    pub fn all() -> Self {
        Self {
            raw: REST.into(),
            tokens: vec![Token::Rest],
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn matches(&self, subject: &Subject) -> bool {
        let mut subject_tokens = subject.tokens();
        for token in &self.tokens {
            match token {
                Token::Rest => return subject_tokens.next().is_some(),
                Token::One => {
                    if subject_tokens.next().is_none() {
                        return false;
                    }
                }
                Token::Literal(literal) => {
                    if subject_tokens.next() != Some(literal.as_str()) {
                        return false;
                    }
                }
            }
        }
        subject_tokens.next().is_none()
    }
}

impl fmt::Display for SubjectPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for SubjectPattern {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subject(s: &str) -> Subject {
        Subject::new(s).unwrap()
    }

    fn pattern(s: &str) -> SubjectPattern {
        SubjectPattern::new(s).unwrap()
    }

    #[test]
    fn subjects_reject_wildcards_and_empty_tokens() {
        assert!(Subject::new("objects.alice.created").is_ok());
        assert!(Subject::new("objects.*.created").is_err());
        assert!(Subject::new("objects..created").is_err());
        assert!(Subject::new("").is_err());
        assert!(Subject::new("objects.al ice").is_err());
    }

    #[test]
    fn literal_patterns_match_exactly() {
        let p = pattern("transform.completed");
        assert!(p.matches(&subject("transform.completed")));
        assert!(!p.matches(&subject("transform.failed")));
        assert!(!p.matches(&subject("transform.completed.extra")));
        assert!(!p.matches(&subject("transform")));
    }

    #[test]
    fn star_matches_one_token() {
        let p = pattern("objects.*.updated");
        assert!(p.matches(&subject("objects.alice.updated")));
        assert!(!p.matches(&subject("objects.alice.created")));
        assert!(!p.matches(&subject("objects.updated")));
    }

    #[test]
    fn rest_matches_one_or_more_trailing_tokens() {
        let p = pattern("objects.alice.>");
        assert!(p.matches(&subject("objects.alice.created")));
        assert!(p.matches(&subject("objects.alice.a.b")));
        assert!(!p.matches(&subject("objects.alice")));
        assert!(!p.matches(&subject("objects.bob.created")));
        assert!(SubjectPattern::all().matches(&subject("anything")));
    }

    #[test]
    fn rest_must_be_last() {
        assert!(SubjectPattern::new("objects.>.created").is_err());
        assert!(SubjectPattern::new("objects..>").is_err());
    }

    #[test]
    fn subject_serde_validates() {
        let json = serde_json::to_string(&subject("a.b")).unwrap();
        assert_eq!(json, "\"a.b\"");
        assert!(serde_json::from_str::<Subject>("\"a.*\"").is_err());
    }
}

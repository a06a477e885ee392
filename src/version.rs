//! Revision ordering and dynamic revision matching.
//!
//! Revisions are split into numeric and alphabetic tokens; `.`, `-`, `_` and `+`
//! only separate tokens. Tokens are compared pairwise:
//! * two numbers compare numerically,
//! * a number is greater than a word,
//! * two words compare by qualifier rank (`dev` < `alpha` < `beta` < `milestone` < `rc`
//!   < unknown words < `final`), then case-insensitively.
//!
//! When one revision runs out of tokens, the longer one is greater if its next token is
//! a number or a release qualifier (`1.0.1` > `1.0`, `1.0-final` > `1.0`) and smaller
//! otherwise (`1.0-rc1` < `1.0`). Revisions equal under these rules are ordered by their
//! raw text, so the order is total.

use std::{cmp::Ordering, fmt::Debug};

pub trait RevisionComparator: Send + Sync + Debug {
    fn compare(&self, left: &str, right: &str) -> Ordering;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultRevisionComparator;

impl RevisionComparator for DefaultRevisionComparator {
    fn compare(&self, left: &str, right: &str) -> Ordering {
        let left_tokens = tokens(left);
        let right_tokens = tokens(right);
        for (l, r) in left_tokens.iter().zip(right_tokens.iter()) {
            let ordering = l.cmp_token(r);
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        let common = left_tokens.len().min(right_tokens.len());
        let ordering = match (left_tokens.get(common), right_tokens.get(common)) {
            (Some(extra), None) => extra.against_nothing(),
            (None, Some(extra)) => extra.against_nothing().reverse(),
            _ => Ordering::Equal,
        };
        ordering.then_with(|| left.cmp(right))
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Token<'a> {
    Number(&'a str),
    Word(&'a str),
}

impl Token<'_> {
    fn cmp_token(&self, other: &Token) -> Ordering {
        match (self, other) {
            (Token::Number(l), Token::Number(r)) => compare_numbers(l, r),
            (Token::Number(_), Token::Word(_)) => Ordering::Greater,
            (Token::Word(_), Token::Number(_)) => Ordering::Less,
            (Token::Word(l), Token::Word(r)) => qualifier_rank(l)
                .cmp(&qualifier_rank(r))
                .then_with(|| l.to_ascii_lowercase().cmp(&r.to_ascii_lowercase())),
        }
    }

    /// How this token orders a revision against one that has no token left.
    fn against_nothing(&self) -> Ordering {
        match self {
            Token::Number(_) => Ordering::Greater,
            Token::Word(word) if qualifier_rank(word) > 0 => Ordering::Greater,
            Token::Word(_) => Ordering::Less,
        }
    }
}

fn tokens(revision: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut start = None;
    let mut numeric = false;
    for (index, c) in revision.char_indices() {
        if !c.is_alphanumeric() {
            if let Some(begin) = start.take() {
                tokens.push(token(&revision[begin..index], numeric));
            }
            continue;
        }
        let digit = c.is_ascii_digit();
        match start {
            Some(begin) if digit != numeric => {
                tokens.push(token(&revision[begin..index], numeric));
                start = Some(index);
            }
            Some(_) => {}
            None => start = Some(index),
        }
        numeric = digit;
    }
    if let Some(begin) = start {
        tokens.push(token(&revision[begin..], numeric));
    }
    tokens
}

fn token(text: &str, numeric: bool) -> Token<'_> {
    if numeric {
        Token::Number(text)
    } else {
        Token::Word(text)
    }
}

fn compare_numbers(left: &str, right: &str) -> Ordering {
    let left = left.trim_start_matches('0');
    let right = right.trim_start_matches('0');
    left.len().cmp(&right.len()).then_with(|| left.cmp(right))
}

fn qualifier_rank(word: &str) -> i8 {
    match word.to_ascii_lowercase().as_str() {
        "dev" | "snapshot" => -5,
        "alpha" | "a" => -4,
        "beta" | "b" => -3,
        "milestone" | "m" => -2,
        "rc" | "cr" => -1,
        "final" | "ga" | "release" => 1,
        _ => 0,
    }
}

/// Statuses known to dynamic revisions, from least to most mature.
pub const STATUSES: [&str; 3] = ["integration", "milestone", "release"];

fn status_rank(status: &str) -> usize {
    STATUSES
        .iter()
        .position(|known| *known == status)
        .unwrap_or(0)
}

/// How a requested revision selects among the available ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevisionMatcher {
    Exact(String),
    /// `latest.<status>`: the highest revision whose status is at least `<status>`.
    Latest { status: String },
    /// `1.+`: the highest revision starting with `1.`.
    Prefix(String),
}

impl RevisionMatcher {
    pub fn parse(revision: &str) -> Self {
        if let Some(status) = revision.strip_prefix("latest.") {
            RevisionMatcher::Latest {
                status: status.to_string(),
            }
        } else if let Some(prefix) = revision.strip_suffix('+') {
            RevisionMatcher::Prefix(prefix.to_string())
        } else {
            RevisionMatcher::Exact(revision.to_string())
        }
    }

    pub fn is_dynamic(&self) -> bool {
        !matches!(self, RevisionMatcher::Exact(_))
    }

    /// Whether a revision can be selected from its name alone.
    pub fn accepts_revision(&self, revision: &str) -> bool {
        match self {
            RevisionMatcher::Exact(exact) => exact == revision,
            RevisionMatcher::Latest { .. } => true,
            RevisionMatcher::Prefix(prefix) => revision.starts_with(prefix.as_str()),
        }
    }

    pub fn accepts(&self, revision: &str, status: &str) -> bool {
        match self {
            RevisionMatcher::Latest { status: wanted } => {
                status_rank(status) >= status_rank(wanted)
            }
            _ => self.accepts_revision(revision),
        }
    }
}

pub fn is_dynamic(revision: &str) -> bool {
    RevisionMatcher::parse(revision).is_dynamic()
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    fn sorted(revisions: &[&str]) -> Vec<String> {
        let comparator = DefaultRevisionComparator;
        let mut revisions: Vec<String> = revisions.iter().map(|r| r.to_string()).collect();
        revisions.sort_by(|l, r| comparator.compare(l, r));
        revisions
    }

    #[test]
    fn numeric_parts_compare_numerically() {
        assert_eq!(
            sorted(&["1.10", "1.9", "1.2.3", "1.2", "0.9"]),
            vec!["0.9", "1.2", "1.2.3", "1.9", "1.10"]
        );
    }

    #[test]
    fn qualifiers_are_ranked() {
        assert_eq!(
            sorted(&["1.0", "1.0-rc1", "1.0-dev", "1.0-beta2", "1.0-final", "1.0-alpha"]),
            vec!["1.0-dev", "1.0-alpha", "1.0-beta2", "1.0-rc1", "1.0", "1.0-final"]
        );
    }

    #[test]
    fn numbers_beat_words() {
        let comparator = DefaultRevisionComparator;
        assert_eq!(comparator.compare("1.0.1", "1.0.beta"), Ordering::Greater);
    }

    #[test]
    fn order_is_total() {
        let comparator = DefaultRevisionComparator;
        assert_eq!(comparator.compare("1.0", "1.00"), "1.0".cmp("1.00"));
        assert_eq!(comparator.compare("2.0", "2.0"), Ordering::Equal);
        assert_ne!(comparator.compare("1.0", "1-0"), Ordering::Equal);
    }

    #[test]
    fn parse_matchers() {
        assert_eq!(
            RevisionMatcher::parse("latest.integration"),
            RevisionMatcher::Latest {
                status: "integration".to_string()
            }
        );
        assert_eq!(
            RevisionMatcher::parse("1.+"),
            RevisionMatcher::Prefix("1.".to_string())
        );
        assert!(!is_dynamic("1.0"));
        assert!(is_dynamic("latest.release"));
    }

    #[test]
    fn latest_matcher_checks_status() {
        let matcher = RevisionMatcher::parse("latest.milestone");
        assert!(matcher.accepts("2.0", "release"));
        assert!(matcher.accepts("2.0", "milestone"));
        assert!(!matcher.accepts("2.0", "integration"));
    }

    #[test]
    fn prefix_matcher_checks_revision() {
        let matcher = RevisionMatcher::parse("1.+");
        assert!(matcher.accepts("1.4", "integration"));
        assert!(!matcher.accepts("2.0", "release"));
    }
}

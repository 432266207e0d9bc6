//! Pattern detectors for PII entity classes.
//!
//! Classes are claimed in a fixed priority order: a span taken by an earlier
//! class is never offered to a later one, so card numbers are never re-read
//! as phone numbers and street addresses are never re-read as names.
//! Existing substitution tokens are claimed before any class runs, which makes
//! masking already-masked text a no-op.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// PII entity classes, declared in detection priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PiiKind {
    CreditCard,
    Ssn,
    Email,
    Phone,
    Address,
    Name,
}

impl PiiKind {
    /// Detection priority, highest first
    pub const PRIORITY: [PiiKind; 6] = [
        PiiKind::CreditCard,
        PiiKind::Ssn,
        PiiKind::Email,
        PiiKind::Phone,
        PiiKind::Address,
        PiiKind::Name,
    ];

    /// Label used inside substitution tokens
    pub fn label(&self) -> &'static str {
        match self {
            Self::CreditCard => "CARD",
            Self::Ssn => "SSN",
            Self::Email => "EMAIL",
            Self::Phone => "PHONE",
            Self::Address => "ADDRESS",
            Self::Name => "NAME",
        }
    }

    fn pattern(&self) -> &'static str {
        match self {
            // 4-4-4-4 and 4-6-5 groupings with one consistent separator, or a bare run
            Self::CreditCard => {
                r"\b(?:\d{4}-\d{4}-\d{4}-\d{1,4}|\d{4} \d{4} \d{4} \d{1,4}|\d{4}-\d{6}-\d{5}|\d{4} \d{6} \d{5}|\d{13,16})\b"
            }
            Self::Ssn => r"\b\d{3}-\d{2}-\d{4}\b",
            Self::Email => r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}",
            Self::Phone => r"(?:\+\d{1,3}[-.\s]?)?\(?\d{3}\)?[-.\s]?\d{3}[-.\s]?\d{4}\b",
            Self::Address => {
                r"\b\d+\s+[A-Za-z\s]+?(?:Street|St|Avenue|Ave|Road|Rd|Boulevard|Blvd|Lane|Ln|Drive|Dr|Court|Ct|Circle|Cir|Way|Place|Pl)\b"
            }
            Self::Name => r"\b[A-Z][a-z]+(?:[ \t]+[A-Z][a-z]+)+\b",
        }
    }
}

impl std::fmt::Display for PiiKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Shape of every substitution token the masker emits
pub(crate) const TOKEN_PATTERN: &str =
    r"\[(?:CARD:\*{4}-\*{4}-\*{4}-\d{0,4}|SSN|EMAIL|PHONE|ADDRESS|NAME):[A-Z]{8}\]";

/// Compiled token matcher
pub(crate) fn token_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(TOKEN_PATTERN).expect("token pattern is valid"))
}

fn compiled_rules() -> &'static [(PiiKind, Regex)] {
    static RULES: OnceLock<Vec<(PiiKind, Regex)>> = OnceLock::new();
    RULES.get_or_init(|| {
        PiiKind::PRIORITY
            .iter()
            .map(|kind| {
                let regex = Regex::new(kind.pattern()).expect("PII pattern is valid");
                (*kind, regex)
            })
            .collect()
    })
}

/// A detected PII span
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PiiSpan {
    pub kind: PiiKind,
    /// Start byte offset
    pub start: usize,
    /// End byte offset (exclusive)
    pub end: usize,
    pub value: String,
}

/// Stateless detector over the built-in entity classes
#[derive(Debug, Clone, Copy, Default)]
pub struct PiiDetector;

impl PiiDetector {
    pub fn new() -> Self {
        Self
    }

    /// Find non-overlapping PII spans, sorted by start offset
    pub fn detect(&self, text: &str) -> Vec<PiiSpan> {
        let mut claimed: Vec<(usize, usize)> = token_regex()
            .find_iter(text)
            .map(|m| (m.start(), m.end()))
            .collect();
        let mut spans = Vec::new();

        for (kind, regex) in compiled_rules() {
            for m in regex.find_iter(text) {
                let (start, end) = (m.start(), m.end());
                if claimed.iter().any(|&(s, e)| start < e && s < end) {
                    continue;
                }
                claimed.push((start, end));
                spans.push(PiiSpan {
                    kind: *kind,
                    start,
                    end,
                    value: m.as_str().to_string(),
                });
            }
        }

        spans.sort_by_key(|s| s.start);
        spans
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(text: &str) -> Vec<PiiKind> {
        PiiDetector::new().detect(text).into_iter().map(|s| s.kind).collect()
    }

    #[test]
    fn test_detect_each_class() {
        assert_eq!(kinds("SSN 123-45-6789 here"), vec![PiiKind::Ssn]);
        assert_eq!(kinds("mail a@b.com now"), vec![PiiKind::Email]);
        assert_eq!(kinds("call 555-123-4567"), vec![PiiKind::Phone]);
        assert_eq!(kinds("card 4111 1111 1111 1111"), vec![PiiKind::CreditCard]);
        assert_eq!(kinds("at 42 Main Street"), vec![PiiKind::Address]);
        assert_eq!(kinds("ask John Smith"), vec![PiiKind::Name]);
    }

    #[test]
    fn test_card_claimed_before_phone() {
        let spans = PiiDetector::new().detect("4111-1111-1111-1234");
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].kind, PiiKind::CreditCard);
        assert_eq!(spans[0].value, "4111-1111-1111-1234");
    }

    #[test]
    fn test_address_claimed_before_name() {
        let spans = PiiDetector::new().detect("I live at 221 Baker Street today");
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].kind, PiiKind::Address);
        assert_eq!(spans[0].value, "221 Baker Street");
    }

    #[test]
    fn test_spans_sorted_and_disjoint() {
        let text = "Jane Doe, jane@example.com, 123-45-6789";
        let spans = PiiDetector::new().detect(text);
        assert_eq!(spans.len(), 3);
        for pair in spans.windows(2) {
            assert!(pair[0].end <= pair[1].start);
        }
        assert_eq!(&text[spans[1].start..spans[1].end], "jane@example.com");
    }

    #[test]
    fn test_existing_tokens_are_ignored() {
        let text = "[EMAIL:ABCDEFGH] and [CARD:****-****-****-1234:QWERTYUI]";
        assert!(PiiDetector::new().detect(text).is_empty());
    }

    #[test]
    fn test_plain_text_has_no_pii() {
        assert!(PiiDetector::new().detect("hello, how are you today?").is_empty());
    }

    #[test]
    fn test_adjacent_phones_are_not_a_card() {
        let spans = PiiDetector::new().detect("555-123-4567 555-765-4321");
        assert_eq!(spans.len(), 2);
        assert!(spans.iter().all(|s| s.kind == PiiKind::Phone));
        assert_eq!(spans[0].value, "555-123-4567");
        assert_eq!(spans[1].value, "555-765-4321");
    }

    #[test]
    fn test_card_groupings() {
        for card in ["4111111111111111", "3782 822463 10005", "3782-822463-10005"] {
            let spans = PiiDetector::new().detect(card);
            assert_eq!(spans.len(), 1, "{}", card);
            assert_eq!(spans[0].kind, PiiKind::CreditCard);
            assert_eq!(spans[0].value, card);
        }
        // Mixed separators are not one card
        assert!(!kinds("4111-1111 1111-1111").contains(&PiiKind::CreditCard));
    }
}

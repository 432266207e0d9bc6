//! Reversible substitution of PII with session-scoped tokens.
//!
//! Token shape is `[KIND:XXXXXXXX]`; card numbers keep their last four digits
//! visible as `[CARD:****-****-****-1234:XXXXXXXX]`. The eight-letter suffix is
//! derived from a per-session salt, so one value maps to one token inside a
//! session and to unrelated tokens in any other session.

use std::collections::HashMap;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tracing::warn;

use super::detector::{token_regex, PiiDetector, PiiKind, PiiSpan};
use super::session::SessionStore;
use crate::error::SessionNotFoundError;

/// Upper bound on collision retries for one `mask` call
const MAX_ASSIGN_ROUNDS: u32 = 16;

const SUFFIX_LEN: usize = 8;

/// One substituted entity (never carries the original value)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskedEntity {
    pub kind: PiiKind,
    pub token: String,
}

/// Outcome of [`PiiMasker::mask`]
#[derive(Debug, Clone, Default)]
pub struct MaskReport {
    pub text: String,
    pub entities: Vec<MaskedEntity>,
    /// False when the token map could not be written; tokens are then unresolvable
    pub stored: bool,
}

/// Outcome of [`PiiMasker::unmask`]
#[derive(Debug, Clone, Default)]
pub struct UnmaskReport {
    pub text: String,
    /// Token occurrences replaced by their original value
    pub restored: usize,
    /// Distinct tokens left in place, in order of first appearance
    pub unresolved: Vec<String>,
}

/// Masks and unmasks text against a [`SessionStore`]
#[derive(Clone)]
pub struct PiiMasker {
    detector: PiiDetector,
    store: Arc<dyn SessionStore>,
}

impl PiiMasker {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self {
            detector: PiiDetector::new(),
            store,
        }
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Replace every detected PII span with a token.
    ///
    /// The session is created on first use. All mappings produced by one call
    /// are written as a single batch. If the batch cannot be stored the text
    /// is still masked, so original values never leave in clear text.
    ///
    /// Text already shaped like a token is left alone, even when the caller
    /// typed it. A literal token this session issued earlier is therefore
    /// restored to its value by [`unmask`](Self::unmask); tokens from other
    /// sessions stay unresolved.
    pub async fn mask(&self, session_id: &str, text: &str) -> MaskReport {
        let spans = self.detector.detect(text);
        if spans.is_empty() {
            return MaskReport {
                text: text.to_string(),
                entities: Vec::new(),
                stored: true,
            };
        }

        let (assigned, stored) = match self.assign_tokens(session_id, &spans).await {
            Ok(assigned) => (assigned, true),
            Err(fallback) => (fallback, false),
        };

        let mut out = String::with_capacity(text.len());
        let mut entities = Vec::with_capacity(spans.len());
        let mut cursor = 0;
        for span in &spans {
            let token = &assigned[&(span.kind, span.value.clone())];
            out.push_str(&text[cursor..span.start]);
            out.push_str(token);
            cursor = span.end;
            entities.push(MaskedEntity {
                kind: span.kind,
                token: token.clone(),
            });
        }
        out.push_str(&text[cursor..]);

        MaskReport {
            text: out,
            entities,
            stored,
        }
    }

    /// Replace every token known to the session with its original value.
    ///
    /// Unknown tokens and unknown sessions leave the text as is; both are
    /// reported as unresolved and logged.
    pub async fn unmask(&self, session_id: &str, text: &str) -> UnmaskReport {
        let matches: Vec<(usize, usize)> = token_regex()
            .find_iter(text)
            .map(|m| (m.start(), m.end()))
            .collect();
        if matches.is_empty() {
            return UnmaskReport {
                text: text.to_string(),
                ..Default::default()
            };
        }

        let mut resolved: HashMap<&str, Option<String>> = HashMap::new();
        let mut session_missing = false;
        for &(start, end) in &matches {
            let token = &text[start..end];
            if resolved.contains_key(token) {
                continue;
            }
            let value = if session_missing {
                None
            } else {
                match self.store.get(session_id, token).await {
                    Ok(value) => value,
                    Err(SessionNotFoundError { .. }) => {
                        session_missing = true;
                        warn!(session_id, "Unmask against unknown session");
                        None
                    }
                }
            };
            resolved.insert(token, value);
        }

        let mut report = UnmaskReport::default();
        let mut out = String::with_capacity(text.len());
        let mut cursor = 0;
        for &(start, end) in &matches {
            let token = &text[start..end];
            out.push_str(&text[cursor..start]);
            match resolved.get(token).and_then(|v| v.as_deref()) {
                Some(original) => {
                    out.push_str(original);
                    report.restored += 1;
                }
                None => {
                    out.push_str(token);
                    if !report.unresolved.iter().any(|t| t == token) {
                        report.unresolved.push(token.to_string());
                    }
                }
            }
            cursor = end;
        }
        out.push_str(&text[cursor..]);
        report.text = out;

        if !report.unresolved.is_empty() {
            warn!(
                session_id,
                unresolved = report.unresolved.len(),
                "Tokens left unresolved after unmask"
            );
        }
        report
    }

    /// Pick a token for every distinct (kind, value) and store the batch.
    ///
    /// On failure the assignment is still returned as `Err` so the caller can
    /// substitute without storing.
    async fn assign_tokens(
        &self,
        session_id: &str,
        spans: &[PiiSpan],
    ) -> Result<HashMap<(PiiKind, String), String>, HashMap<(PiiKind, String), String>> {
        let mut salt = None;
        for _ in 0..2 {
            self.store.ensure(session_id).await;
            if let Ok(s) = self.store.salt(session_id).await {
                salt = Some(s);
                break;
            }
        }
        let Some(salt) = salt else {
            warn!(session_id, "Session vanished while masking");
            return Err(assign_round(&local_salt(), spans, &HashMap::new()));
        };

        let mut attempts: HashMap<(PiiKind, String), u32> = HashMap::new();
        let mut round = 0;
        loop {
            let assigned = assign_round(&salt, spans, &attempts);
            let entries: Vec<(String, String)> = assigned
                .iter()
                .map(|((_, value), token)| (token.clone(), value.clone()))
                .collect();

            let conflicts = match self.store.put_all(session_id, &entries).await {
                Ok(conflicts) => conflicts,
                Err(_) => {
                    warn!(session_id, "Session vanished while masking");
                    return Err(assigned);
                }
            };
            if conflicts.is_empty() {
                return Ok(assigned);
            }

            round += 1;
            if round >= MAX_ASSIGN_ROUNDS {
                warn!(session_id, "Token collisions not resolved, mappings not stored");
                return Err(assigned);
            }
            for (key, token) in &assigned {
                if conflicts.contains(token) {
                    *attempts.entry(key.clone()).or_insert(0) += 1;
                }
            }
        }
    }
}

/// Derive tokens for one attempt, bumping values that collide inside the batch
fn assign_round(
    salt: &str,
    spans: &[PiiSpan],
    attempts: &HashMap<(PiiKind, String), u32>,
) -> HashMap<(PiiKind, String), String> {
    let mut assigned: HashMap<(PiiKind, String), String> = HashMap::new();
    let mut owners: HashMap<String, String> = HashMap::new();

    for span in spans {
        let key = (span.kind, span.value.clone());
        if assigned.contains_key(&key) {
            continue;
        }
        let mut attempt = attempts.get(&key).copied().unwrap_or(0);
        let token = loop {
            let candidate = derive_token(salt, span.kind, &span.value, attempt);
            match owners.get(&candidate) {
                Some(owner) if owner != &span.value => attempt += 1,
                _ => break candidate,
            }
        };
        owners.insert(token.clone(), span.value.clone());
        assigned.insert(key, token);
    }
    assigned
}

fn derive_token(salt: &str, kind: PiiKind, value: &str, attempt: u32) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update([0x1f]);
    hasher.update(kind.label().as_bytes());
    hasher.update([0x1f]);
    hasher.update(value.as_bytes());
    hasher.update(attempt.to_le_bytes());
    let digest = hasher.finalize();

    let suffix: String = digest
        .iter()
        .take(SUFFIX_LEN)
        .map(|b| char::from(b'A' + b % 26))
        .collect();

    match kind {
        PiiKind::CreditCard => format!("[CARD:****-****-****-{}:{}]", last_four(value), suffix),
        _ => format!("[{}:{}]", kind.label(), suffix),
    }
}

fn last_four(value: &str) -> String {
    let digits: Vec<char> = value.chars().filter(|c| c.is_ascii_digit()).collect();
    digits[digits.len().saturating_sub(4)..].iter().collect()
}

fn local_salt() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

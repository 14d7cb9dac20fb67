//! Self-correcting extraction of a ranked entity list from model output.
//!
//! The model is asked for a plain comma-separated line. Its answer is
//! validated token by token; a rejected answer triggers a repair request
//! that names the violation, up to a fixed number of attempts. The result is
//! always a bracketed list string, either the curated names or
//! [`CURATION_FAILED`].

use std::fmt;

use tracing::{debug, info, instrument, warn};

use exposecast_llm::{TextModel, prompts};

/// Output returned when no attempt produced a valid list.
pub const CURATION_FAILED: &str = "[Error: curation failed]";

/// Characters no curated name may contain.
const DISALLOWED: &[char] = &['[', ']', '\'', '"', '<', '>', '{', '}'];

const MIN_TOKEN_CHARS: usize = 2;

/// Why a model answer was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    Empty,
    TooShort(String),
    DisallowedChar { token: String, found: char },
    IrregularSpacing(String),
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("the answer was empty"),
            Self::TooShort(token) => write!(
                f,
                "entry \"{token}\" is shorter than {MIN_TOKEN_CHARS} characters"
            ),
            Self::DisallowedChar { token, found } => write!(
                f,
                "entry \"{token}\" contains the forbidden character '{found}'"
            ),
            Self::IrregularSpacing(token) => write!(
                f,
                "entry \"{token}\" contains double spaces, tabs or line breaks"
            ),
        }
    }
}

/// Pick the top `limit` entities from `entities` (names joined by `"; "`).
///
/// Makes at most `attempts` model calls. Never fails: exhausted attempts
/// yield [`CURATION_FAILED`].
#[instrument(skip_all, fields(limit = limit, attempts = attempts))]
pub async fn curate_top_entities(
    model: &dyn TextModel,
    entities: &str,
    limit: usize,
    attempts: u32,
) -> String {
    let mut violation: Option<Violation> = None;

    for attempt in 1..=attempts.max(1) {
        let repair = violation.as_ref().map(ToString::to_string);
        let prompt = prompts::curation(entities, limit, repair.as_deref());
        let raw = model.complete(&prompt.system, &prompt.user).await;

        match validate_entity_list(&raw, limit) {
            Ok(names) => {
                info!(attempt, curated = names.len(), "curation accepted");
                return format!("[{}]", names.join(", "));
            }
            Err(v) => {
                warn!(attempt, violation = %v, "curation answer rejected");
                violation = Some(v);
            }
        }
    }

    CURATION_FAILED.to_string()
}

/// Validate a comma-separated answer, keeping at most `limit` names.
pub fn validate_entity_list(raw: &str, limit: usize) -> Result<Vec<String>, Violation> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(Violation::Empty);
    }

    let tokens: Vec<&str> = trimmed.split(',').map(str::trim).collect();
    if tokens.len() > limit {
        debug!(received = tokens.len(), limit, "truncating curated list");
    }

    tokens
        .into_iter()
        .take(limit)
        .map(|token| {
            if token.chars().count() < MIN_TOKEN_CHARS {
                return Err(Violation::TooShort(token.to_string()));
            }
            if let Some(found) = token.chars().find(|c| DISALLOWED.contains(c)) {
                return Err(Violation::DisallowedChar {
                    token: token.to_string(),
                    found,
                });
            }
            if token.contains("  ") || token.chars().any(|c| c.is_whitespace() && c != ' ') {
                return Err(Violation::IrregularSpacing(token.to_string()));
            }
            Ok(token.to_string())
        })
        .collect()
}

/// Split a bracketed list string into its trimmed, non-empty entries.
///
/// The outer bracket pair is optional.
pub fn split_bracketed(list: &str) -> Vec<String> {
    let inner = list.trim();
    let inner = inner.strip_prefix('[').unwrap_or(inner);
    let inner = inner.strip_suffix(']').unwrap_or(inner);

    inner
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(String::from)
        .collect()
}

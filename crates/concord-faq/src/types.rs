use serde::{Deserialize, Serialize};

/// A support knowledge-base entry (§3.1 FAQ). Only `verified` entries
/// participate in retrieval; unverified entries are candidates awaiting
/// review, typically generated from a closed escalation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaqRecord {
    pub id: i64,
    pub question: String,
    pub answer: String,
    pub category: String,
    pub source: String,
    pub protocol: String,
    pub verified: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// Fields accepted when creating a FAQ. `verified` defaults to `false` —
/// most FAQs start as candidates (e.g. generated from an escalation) and
/// are promoted explicitly.
#[derive(Debug, Clone)]
pub struct FaqCreate {
    pub question: String,
    pub answer: String,
    pub category: String,
    pub source: String,
    pub protocol: String,
    pub verified: bool,
}

/// Patch applied by `update`. `None` fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct FaqUpdate {
    pub question: Option<String>,
    pub answer: Option<String>,
    pub category: Option<String>,
    pub protocol: Option<String>,
    pub verified: Option<bool>,
}

/// How FAQ ids are rendered into a slug for document references. Defaults
/// to `AlwaysId`, which never attempts to guess whether a caller-supplied
/// identifier "looks like" a UUID — that heuristic is opt-in only (Open
/// Question decision, see DESIGN.md).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FaqSlugStrategy {
    #[default]
    AlwaysId,
    SkipUuidLike,
}

impl FaqSlugStrategy {
    /// `natural_id` is the document's own external identifier, if it has
    /// one — not the FAQ's category. `SkipUuidLike` falls back to the
    /// slugified title when that identifier is missing or UUID-shaped.
    pub fn slug_for(&self, id: i64, natural_id: Option<&str>, title: &str) -> String {
        match self {
            FaqSlugStrategy::AlwaysId => format!("faq:{id}"),
            FaqSlugStrategy::SkipUuidLike => match natural_id {
                Some(natural_id) if !looks_like_uuid(natural_id) => format!("faq:{natural_id}"),
                _ => format!("faq:{}", slugify(title)),
            },
        }
    }
}

fn looks_like_uuid(s: &str) -> bool {
    let parts: Vec<&str> = s.split('-').collect();
    parts.len() == 5
        && [8, 4, 4, 4, 12].iter().zip(parts.iter()).all(|(len, part)| {
            part.len() == *len && part.chars().all(|c| c.is_ascii_hexdigit())
        })
}

fn slugify(text: &str) -> String {
    text.trim()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join("-")
        .to_lowercase()
}

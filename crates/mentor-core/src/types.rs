use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A scored topical tag attached to an advisor (an OpenAlex-style concept).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConceptTag {
    /// External concept identifier.
    #[serde(default)]
    pub id: String,
    /// Human-readable concept name.
    pub display_name: String,
    /// Concept hierarchy level (0 = broadest).
    #[serde(default)]
    pub level: i64,
    /// Relevance of the concept to the advisor, in [0, 1].
    #[serde(default)]
    pub score: f64,
}

/// A matchable advisor record. The external identifier is the primary key
/// and is immutable once assigned; `embedding` is `None` until the sync
/// pipeline computes it and always has the configured dimension otherwise.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Advisor {
    /// Stable external identifier (e.g. `A5023888391`).
    pub id: String,
    pub name: String,
    pub display_name: Option<String>,
    /// Weak reference to the advisor's institution, by identifier only.
    pub institution_id: Option<String>,
    pub works_count: i64,
    pub cited_by_count: i64,
    pub h_index: i64,
    pub i10_index: i64,
    /// Scored research concepts, most relevant first.
    pub concepts: Vec<ConceptTag>,
    /// Derived textual summary used as embedding input.
    pub research_summary: Option<String>,
    pub orcid: Option<String>,
    pub homepage_url: Option<String>,
    /// Embedding of `research_summary`, dimension D when present.
    pub embedding: Option<Vec<f32>>,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

/// An institution referenced by advisors.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Institution {
    /// Stable external identifier.
    pub id: String,
    pub name: String,
    pub display_name: Option<String>,
    pub country_code: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub region: Option<String>,
    /// Institution type: "education", "company", etc.
    pub kind: Option<String>,
    pub homepage_url: Option<String>,
    pub ror_id: Option<String>,
    pub works_count: i64,
}

/// The query subject of a match request: a candidate's profile.
///
/// `resume_embedding` caches the vector derived from the profile's text at
/// the time it was computed; staleness after later profile edits is
/// tolerated rather than auto-invalidated.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    pub full_name: Option<String>,
    pub field_of_study: Option<String>,
    pub research_interests: Vec<String>,
    pub resume_text: Option<String>,
    pub resume_embedding: Option<Vec<f32>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    /// Create an empty profile with a fresh identifier.
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            full_name: None,
            field_of_study: None,
            research_interests: Vec::new(),
            resume_text: None,
            resume_embedding: None,
            created_at: now,
            updated_at: now,
        }
    }
}

impl Default for Profile {
    fn default() -> Self {
        Self::new()
    }
}

/// Attribute filters applied to match and search results.
///
/// Each field is independently optional; all present fields are combined
/// with logical AND. `concepts` matches when the advisor carries any of the
/// listed tags (case-insensitive containment).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MatchFilters {
    /// Substring match on the institution name.
    pub university: Option<String>,
    /// Substring match on the institution country.
    pub country: Option<String>,
    /// Substring match on the institution city.
    pub city: Option<String>,
    /// Any-of containment match on the advisor's concept tags.
    #[serde(default)]
    pub concepts: Vec<String>,
    /// Minimum number of published works.
    pub min_works_count: Option<i64>,
    /// Minimum citation count.
    pub min_citations: Option<i64>,
}

impl MatchFilters {
    /// True when no filter field is set.
    pub fn is_empty(&self) -> bool {
        self.university.is_none()
            && self.country.is_none()
            && self.city.is_none()
            && self.concepts.is_empty()
            && self.min_works_count.is_none()
            && self.min_citations.is_none()
    }
}

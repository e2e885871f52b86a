//! Match orchestration: ranked, filtered, explained advisor matches.
//!
//! MatchEngine combines the embedding provider (to embed profiles and
//! queries), the vector index (candidate generation), and the advisor
//! repository (attribute filtering and detail hydration). Candidates are
//! over-fetched to survive filtering attrition, re-ranked by similarity,
//! and annotated with human-readable explanations.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use mentor_core::error::MentorError;
use mentor_core::types::{Advisor, MatchFilters, Profile};
use mentor_storage::{AdvisorRepository, Database, ProfileRepository};

use crate::embedding::{DynEmbeddingProvider, EmbeddingProvider};
use crate::index::{SearchHit, VectorIndex};

/// Why an advisor matched a profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchExplanation {
    /// Similarity score the match was ranked by.
    pub similarity_score: f32,
    /// Case-insensitive overlap between profile interests and advisor tags.
    pub matching_concepts: Vec<String>,
    /// Shared salient terms between the profile's resume text and the
    /// advisor's research summary, capped at 10.
    pub common_keywords: Vec<String>,
}

/// One ranked result. `score` is absent on filter-only retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvisorMatch {
    pub advisor: Advisor,
    pub institution_name: Option<String>,
    pub score: Option<f32>,
    pub explanation: Option<MatchExplanation>,
}

/// Result of a `find_matches` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchReport {
    pub profile_id: Uuid,
    pub matches: Vec<AdvisorMatch>,
    pub total_matches: usize,
    pub processing_time_ms: f64,
}

/// Result of a `search` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchReport {
    pub advisors: Vec<AdvisorMatch>,
    pub total_count: usize,
    pub query_time_ms: f64,
}

/// Orchestrates matching and search over the advisor corpus.
///
/// Uses dynamic dispatch (`Box<dyn DynEmbeddingProvider>`) so that
/// production code can supply `OnnxEmbeddingProvider` while tests use
/// `MockEmbedding`.
pub struct MatchEngine {
    index: VectorIndex,
    advisors: AdvisorRepository,
    profiles: ProfileRepository,
    embedder: Box<dyn DynEmbeddingProvider>,
}

impl MatchEngine {
    /// Create a new engine over a shared index, database, and provider.
    pub fn new(
        index: VectorIndex,
        db: Arc<Database>,
        embedder: impl EmbeddingProvider + 'static,
    ) -> Self {
        Self::new_dyn(index, db, Box::new(embedder))
    }

    /// Create a new engine from a pre-boxed dynamic embedding provider.
    pub fn new_dyn(
        index: VectorIndex,
        db: Arc<Database>,
        embedder: Box<dyn DynEmbeddingProvider>,
    ) -> Self {
        Self {
            index,
            advisors: AdvisorRepository::new(Arc::clone(&db)),
            profiles: ProfileRepository::new(db),
            embedder,
        }
    }

    /// Find ranked advisor matches for a stored profile.
    ///
    /// Fails with `NotFound` when the profile is absent and
    /// `NoEmbeddableContent` when it has no text to embed. An empty index
    /// or a candidate set emptied by filters yields an empty report, which
    /// is a valid outcome rather than an error.
    pub async fn find_matches(
        &self,
        profile_id: Uuid,
        filters: Option<&MatchFilters>,
        top_k: usize,
    ) -> Result<MatchReport, MentorError> {
        let started = Instant::now();

        let profile = self
            .profiles
            .find_by_id(profile_id)?
            .ok_or_else(|| MentorError::NotFound(format!("Profile {}", profile_id)))?;

        let embedding = self.profile_embedding(&profile).await?;

        // Over-fetch to survive filtering attrition.
        let hits = self.index.search(&embedding, top_k * 2)?;
        let matches = self.attach_and_rank(hits, filters, 0, top_k, Some(&profile))?;

        Ok(MatchReport {
            profile_id,
            total_matches: matches.len(),
            matches,
            processing_time_ms: started.elapsed().as_secs_f64() * 1000.0,
        })
    }

    /// Search advisors by a free-form query with optional filters.
    ///
    /// With a non-empty query string this runs the same ranking machinery
    /// as `find_matches`; without one it degrades to attribute-filter-only
    /// retrieval with no similarity scores.
    pub async fn search(
        &self,
        query: Option<&str>,
        filters: Option<&MatchFilters>,
        limit: usize,
        offset: u64,
    ) -> Result<SearchReport, MentorError> {
        let started = Instant::now();

        let advisors = match query.map(str::trim).filter(|q| !q.is_empty()) {
            Some(q) => {
                let query_vec = self.embedder.encode_boxed(q).await?;
                let hits = self.index.search(&query_vec, limit * 2)?;
                self.attach_and_rank(hits, filters, offset, limit, None)?
            }
            None => self
                .advisors
                .list_filtered(None, filters, offset, limit as u64)?
                .into_iter()
                .map(|detail| AdvisorMatch {
                    advisor: detail.advisor,
                    institution_name: detail.institution_name,
                    score: None,
                    explanation: None,
                })
                .collect(),
        };

        Ok(SearchReport {
            total_count: advisors.len(),
            advisors,
            query_time_ms: started.elapsed().as_secs_f64() * 1000.0,
        })
    }

    /// Resolve the profile's embedding: cached value if present, else
    /// derived from its text fields in priority order (resume text, joined
    /// interests, field of study).
    ///
    /// A newly derived embedding is cached onto the profile best-effort; a
    /// failed cache write is logged and never fails the request.
    async fn profile_embedding(&self, profile: &Profile) -> Result<Vec<f32>, MentorError> {
        if let Some(ref cached) = profile.resume_embedding {
            return Ok(cached.clone());
        }

        let mut parts: Vec<String> = Vec::new();
        if let Some(ref resume) = profile.resume_text {
            if !resume.trim().is_empty() {
                parts.push(resume.clone());
            }
        }
        if !profile.research_interests.is_empty() {
            parts.push(profile.research_interests.join(" "));
        }
        if let Some(ref field) = profile.field_of_study {
            if !field.trim().is_empty() {
                parts.push(field.clone());
            }
        }

        if parts.is_empty() {
            return Err(MentorError::NoEmbeddableContent);
        }

        let combined = parts.join(" ");
        let embedding = self.embedder.encode_boxed(&combined).await?;

        if let Err(e) = self.profiles.set_resume_embedding(profile.id, &embedding) {
            warn!(profile_id = %profile.id, error = %e, "Failed to cache profile embedding");
        }

        Ok(embedding)
    }

    /// Hydrate and filter candidates from the store, attach similarity
    /// scores, sort descending, truncate, and (optionally) explain.
    fn attach_and_rank(
        &self,
        hits: Vec<SearchHit>,
        filters: Option<&MatchFilters>,
        skip: u64,
        limit: usize,
        explain_for: Option<&Profile>,
    ) -> Result<Vec<AdvisorMatch>, MentorError> {
        if hits.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = hits.iter().map(|h| h.advisor_id.clone()).collect();
        let scores: HashMap<&str, f32> = hits
            .iter()
            .map(|h| (h.advisor_id.as_str(), h.score))
            .collect();

        let details = self
            .advisors
            .list_filtered(Some(&ids), filters, skip, limit as u64)?;

        let mut matches: Vec<AdvisorMatch> = details
            .into_iter()
            .map(|detail| {
                let score = scores
                    .get(detail.advisor.id.as_str())
                    .copied()
                    .unwrap_or(0.0);
                AdvisorMatch {
                    advisor: detail.advisor,
                    institution_name: detail.institution_name,
                    score: Some(score),
                    explanation: None,
                }
            })
            .collect();

        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches.truncate(limit);

        if let Some(profile) = explain_for {
            for m in &mut matches {
                let score = m.score.unwrap_or(0.0);
                m.explanation = Some(explain(profile, &m.advisor, score));
            }
        }

        Ok(matches)
    }

    /// Get a handle to the underlying vector index.
    pub fn index(&self) -> &VectorIndex {
        &self.index
    }
}

/// Build the explanation for one profile/advisor pair.
fn explain(profile: &Profile, advisor: &Advisor, score: f32) -> MatchExplanation {
    let mut matching_concepts = Vec::new();
    if !profile.research_interests.is_empty() && !advisor.concepts.is_empty() {
        let interests: HashSet<String> = profile
            .research_interests
            .iter()
            .map(|i| i.to_lowercase())
            .collect();
        let mut common: Vec<String> = advisor
            .concepts
            .iter()
            .map(|c| c.display_name.to_lowercase())
            .filter(|name| interests.contains(name))
            .collect();
        common.sort();
        common.dedup();
        matching_concepts = common;
    }

    let common_keywords = match (&profile.resume_text, &advisor.research_summary) {
        (Some(resume), Some(summary)) => shared_keywords(resume, summary),
        _ => Vec::new(),
    };

    MatchExplanation {
        similarity_score: score,
        matching_concepts,
        common_keywords,
    }
}

/// Salient terms appearing in both texts: case-insensitive word tokens of
/// at least four letters, in first-text order, capped at 10.
fn shared_keywords(text1: &str, text2: &str) -> Vec<String> {
    let re = token_regex();
    let lower1 = text1.to_lowercase();
    let lower2 = text2.to_lowercase();

    let tokens2: HashSet<&str> = re.find_iter(&lower2).map(|m| m.as_str()).collect();

    let mut seen = HashSet::new();
    let mut common = Vec::new();
    for m in re.find_iter(&lower1) {
        let token = m.as_str();
        if tokens2.contains(token) && seen.insert(token) {
            common.push(token.to_string());
            if common.len() >= 10 {
                break;
            }
        }
    }
    common
}

fn token_regex() -> &'static Regex {
    static TOKEN_RE: OnceLock<Regex> = OnceLock::new();
    TOKEN_RE.get_or_init(|| Regex::new(r"\b[a-z]{4,}\b").expect("token pattern is valid"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use mentor_core::types::{ConceptTag, Institution};
    use mentor_storage::InstitutionRepository;

    use crate::embedding::MockEmbedding;

    const DIM: usize = 8;

    struct Harness {
        db: Arc<Database>,
        index: VectorIndex,
        embedder: MockEmbedding,
        engine: MatchEngine,
    }

    fn make_harness() -> Harness {
        let db = Arc::new(Database::in_memory().unwrap());
        let index = VectorIndex::new(DIM);
        let embedder = MockEmbedding::with_dimension(DIM);
        let engine = MatchEngine::new(index.clone(), Arc::clone(&db), embedder.clone());
        Harness {
            db,
            index,
            embedder,
            engine,
        }
    }

    async fn seed_advisor(
        h: &Harness,
        id: &str,
        summary: &str,
        concepts: &[&str],
        cited_by_count: i64,
        institution_id: Option<&str>,
    ) {
        let embedding = h.embedder.encode(summary).await.unwrap();
        let now = Utc::now();
        let advisor = Advisor {
            id: id.to_string(),
            name: format!("Advisor {}", id),
            display_name: Some(format!("Advisor {}", id)),
            institution_id: institution_id.map(String::from),
            works_count: 25,
            cited_by_count,
            h_index: 10,
            i10_index: 12,
            concepts: concepts
                .iter()
                .map(|name| ConceptTag {
                    id: String::new(),
                    display_name: name.to_string(),
                    level: 1,
                    score: 0.5,
                })
                .collect(),
            research_summary: Some(summary.to_string()),
            orcid: None,
            homepage_url: None,
            embedding: Some(embedding.clone()),
            created_at: now,
            last_updated: now,
        };
        AdvisorRepository::new(Arc::clone(&h.db))
            .upsert(&advisor)
            .unwrap();
        h.index.add(id, embedding).unwrap();
    }

    fn seed_profile(h: &Harness, profile: &Profile) {
        ProfileRepository::new(Arc::clone(&h.db))
            .create(profile)
            .unwrap();
    }

    #[tokio::test]
    async fn test_find_matches_profile_not_found() {
        let h = make_harness();
        let result = h.engine.find_matches(Uuid::new_v4(), None, 10).await;
        assert!(matches!(result, Err(MentorError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_find_matches_unembeddable_profile() {
        let h = make_harness();
        let profile = Profile::new();
        seed_profile(&h, &profile);

        let result = h.engine.find_matches(profile.id, None, 10).await;
        assert!(matches!(result, Err(MentorError::NoEmbeddableContent)));
    }

    #[tokio::test]
    async fn test_find_matches_empty_index_is_valid() {
        let h = make_harness();
        let mut profile = Profile::new();
        profile.resume_text = Some("deep learning for protein folding".to_string());
        seed_profile(&h, &profile);

        let report = h.engine.find_matches(profile.id, None, 10).await.unwrap();
        assert_eq!(report.total_matches, 0);
        assert!(report.matches.is_empty());
    }

    #[tokio::test]
    async fn test_find_matches_ranks_by_similarity() {
        let h = make_harness();
        seed_advisor(&h, "A1", "reinforcement learning and control", &[], 100, None).await;
        seed_advisor(&h, "A2", "medieval literature studies", &[], 100, None).await;

        let mut profile = Profile::new();
        profile.resume_text = Some("reinforcement learning and control".to_string());
        seed_profile(&h, &profile);

        let report = h.engine.find_matches(profile.id, None, 10).await.unwrap();
        assert_eq!(report.total_matches, 2);
        assert_eq!(report.matches[0].advisor.id, "A1");
        // Identical text embeds identically: distance 0, score exactly 1.0.
        assert_eq!(report.matches[0].score, Some(1.0));
        assert!(report.matches[0].score > report.matches[1].score);
        assert!(report.processing_time_ms >= 0.0);
    }

    #[tokio::test]
    async fn test_find_matches_truncates_to_top_k() {
        let h = make_harness();
        for i in 0..5 {
            seed_advisor(&h, &format!("A{}", i), &format!("topic number {}", i), &[], 10, None)
                .await;
        }

        let mut profile = Profile::new();
        profile.resume_text = Some("topic number 1".to_string());
        seed_profile(&h, &profile);

        let report = h.engine.find_matches(profile.id, None, 2).await.unwrap();
        assert_eq!(report.matches.len(), 2);
    }

    #[tokio::test]
    async fn test_find_matches_never_violates_filters() {
        let h = make_harness();
        seed_advisor(&h, "A1", "systems research", &[], 5000, None).await;
        seed_advisor(&h, "A2", "systems research and networking", &[], 10, None).await;

        let mut profile = Profile::new();
        profile.resume_text = Some("systems research".to_string());
        seed_profile(&h, &profile);

        let filters = MatchFilters {
            min_citations: Some(1000),
            ..Default::default()
        };
        let report = h
            .engine
            .find_matches(profile.id, Some(&filters), 10)
            .await
            .unwrap();

        assert_eq!(report.total_matches, 1);
        for m in &report.matches {
            assert!(m.advisor.cited_by_count >= 1000);
        }
    }

    #[tokio::test]
    async fn test_find_matches_filters_by_institution() {
        let h = make_harness();
        InstitutionRepository::new(Arc::clone(&h.db))
            .create(&Institution {
                id: "I1".to_string(),
                name: "ETH Zurich".to_string(),
                country: Some("Switzerland".to_string()),
                ..Default::default()
            })
            .unwrap();
        seed_advisor(&h, "A1", "robot locomotion", &[], 100, Some("I1")).await;
        seed_advisor(&h, "A2", "robot locomotion", &[], 100, None).await;

        let mut profile = Profile::new();
        profile.resume_text = Some("robot locomotion".to_string());
        seed_profile(&h, &profile);

        let filters = MatchFilters {
            university: Some("zurich".to_string()),
            ..Default::default()
        };
        let report = h
            .engine
            .find_matches(profile.id, Some(&filters), 10)
            .await
            .unwrap();
        assert_eq!(report.total_matches, 1);
        assert_eq!(report.matches[0].advisor.id, "A1");
        assert_eq!(
            report.matches[0].institution_name.as_deref(),
            Some("ETH Zurich")
        );
    }

    #[tokio::test]
    async fn test_find_matches_caches_derived_embedding() {
        let h = make_harness();
        seed_advisor(&h, "A1", "graph algorithms", &[], 100, None).await;

        let mut profile = Profile::new();
        profile.resume_text = Some("graph algorithms".to_string());
        seed_profile(&h, &profile);

        h.engine.find_matches(profile.id, None, 10).await.unwrap();

        let stored = ProfileRepository::new(Arc::clone(&h.db))
            .find_by_id(profile.id)
            .unwrap()
            .unwrap();
        let cached = stored.resume_embedding.unwrap();
        assert_eq!(cached, h.embedder.encode("graph algorithms").await.unwrap());
    }

    #[tokio::test]
    async fn test_find_matches_uses_cached_embedding() {
        let h = make_harness();
        seed_advisor(&h, "A1", "quantum error correction", &[], 100, None).await;

        // Cached vector equals A1's embedding; resume text would not.
        let mut profile = Profile::new();
        profile.resume_text = Some("something unrelated entirely".to_string());
        profile.resume_embedding =
            Some(h.embedder.encode("quantum error correction").await.unwrap());
        seed_profile(&h, &profile);

        let report = h.engine.find_matches(profile.id, None, 1).await.unwrap();
        assert_eq!(report.matches[0].score, Some(1.0));
    }

    #[tokio::test]
    async fn test_explanation_concept_overlap() {
        let h = make_harness();
        seed_advisor(&h, "A1", "natural language processing", &["NLP", "Vision"], 100, None)
            .await;

        let mut profile = Profile::new();
        profile.research_interests = vec!["nlp".to_string(), "robotics".to_string()];
        seed_profile(&h, &profile);

        let report = h.engine.find_matches(profile.id, None, 10).await.unwrap();
        let explanation = report.matches[0].explanation.as_ref().unwrap();
        assert_eq!(explanation.matching_concepts, vec!["nlp".to_string()]);
    }

    #[tokio::test]
    async fn test_explanation_common_keywords() {
        let h = make_harness();
        seed_advisor(
            &h,
            "A1",
            "Research on distributed consensus protocols and replication",
            &[],
            100,
            None,
        )
        .await;

        let mut profile = Profile::new();
        profile.resume_text =
            Some("Worked on consensus protocols and distributed storage".to_string());
        seed_profile(&h, &profile);

        let report = h.engine.find_matches(profile.id, None, 10).await.unwrap();
        let explanation = report.matches[0].explanation.as_ref().unwrap();
        assert!(explanation
            .common_keywords
            .contains(&"consensus".to_string()));
        assert!(explanation
            .common_keywords
            .contains(&"distributed".to_string()));
        assert!(explanation.common_keywords.len() <= 10);
    }

    #[tokio::test]
    async fn test_search_semantic_attaches_scores() {
        let h = make_harness();
        seed_advisor(&h, "A1", "compiler optimization passes", &[], 100, None).await;
        seed_advisor(&h, "A2", "marine biology of coral reefs", &[], 100, None).await;

        let report = h
            .engine
            .search(Some("compiler optimization passes"), None, 10, 0)
            .await
            .unwrap();
        assert_eq!(report.total_count, 2);
        assert_eq!(report.advisors[0].advisor.id, "A1");
        assert_eq!(report.advisors[0].score, Some(1.0));
        assert!(report.advisors[0].explanation.is_none());
    }

    #[tokio::test]
    async fn test_search_without_query_is_filter_only() {
        let h = make_harness();
        seed_advisor(&h, "A1", "astro", &[], 5000, None).await;
        seed_advisor(&h, "A2", "astro", &[], 10, None).await;

        let filters = MatchFilters {
            min_citations: Some(100),
            ..Default::default()
        };
        let report = h.engine.search(None, Some(&filters), 10, 0).await.unwrap();
        assert_eq!(report.total_count, 1);
        assert_eq!(report.advisors[0].advisor.id, "A1");
        assert!(report.advisors[0].score.is_none());
    }

    #[tokio::test]
    async fn test_search_blank_query_is_filter_only() {
        let h = make_harness();
        seed_advisor(&h, "A1", "astro", &[], 100, None).await;

        let report = h.engine.search(Some("   "), None, 10, 0).await.unwrap();
        assert_eq!(report.total_count, 1);
        assert!(report.advisors[0].score.is_none());
    }

    #[test]
    fn test_shared_keywords_caps_at_ten() {
        let text = "alpha bravo charlie delta echos foxtrot golfs hotel india juliet kilos lima";
        let keywords = shared_keywords(text, text);
        assert_eq!(keywords.len(), 10);
        assert_eq!(keywords[0], "alpha");
    }

    #[test]
    fn test_shared_keywords_ignores_short_tokens() {
        let keywords = shared_keywords("the cat sat on a mat with rust", "rust cat mat the");
        assert_eq!(keywords, vec!["rust".to_string()]);
    }
}

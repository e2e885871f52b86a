//! Feed sync pipeline: pull advisor records from an external bibliographic
//! feed, normalize into advisor + institution rows, compute embeddings, and
//! keep the vector index in step with the relational store.
//!
//! The pipeline is the only writer of new vectors. Pagination and rate
//! limiting toward the external source belong to the `SourceFeed`
//! implementation; the pipeline consumes pages until the feed stops
//! returning a continuation cursor.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use mentor_core::error::MentorError;
use mentor_core::types::{Advisor, ConceptTag, Institution};
use mentor_storage::{AdvisorRepository, Database, InstitutionRepository};

use crate::embedding::EmbeddingProvider;
use crate::index::VectorIndex;

/// Weak reference to an institution carried on an author record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstitutionRef {
    pub id: String,
    pub display_name: Option<String>,
}

/// Reputation statistics carried on an author record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SummaryStats {
    #[serde(default)]
    pub h_index: i64,
    #[serde(default)]
    pub i10_index: i64,
}

/// One advisor record as delivered by the feed, already normalized to bare
/// identifiers by the feed adapter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthorRecord {
    pub id: String,
    pub display_name: String,
    pub institution: Option<InstitutionRef>,
    #[serde(default)]
    pub works_count: i64,
    #[serde(default)]
    pub cited_by_count: i64,
    pub summary_stats: Option<SummaryStats>,
    #[serde(default)]
    pub concepts: Vec<ConceptTag>,
    pub orcid: Option<String>,
    pub homepage_url: Option<String>,
}

/// Detailed institution record fetched on first sight of a reference.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstitutionRecord {
    pub id: String,
    pub display_name: String,
    pub country_code: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub region: Option<String>,
    pub kind: Option<String>,
    pub homepage_url: Option<String>,
    pub ror_id: Option<String>,
    #[serde(default)]
    pub works_count: i64,
}

/// One page of feed results.
#[derive(Debug, Clone, Default)]
pub struct FeedPage {
    pub records: Vec<AuthorRecord>,
    pub next_cursor: Option<String>,
}

/// Cursor-paginated source of advisor records.
///
/// `next_page` with `None` starts a listing; the returned cursor, when
/// present, continues it. Transport-level failures surface as `Upstream`
/// errors and abort the current sync run.
pub trait SourceFeed: Send + Sync {
    /// Fetch the next page of author records for one institution.
    fn next_page(
        &self,
        institution_ror: &str,
        cursor: Option<&str>,
    ) -> impl std::future::Future<Output = Result<FeedPage, MentorError>> + Send;

    /// Fetch the detailed record for an institution.
    fn institution(
        &self,
        id: &str,
    ) -> impl std::future::Future<Output = Result<InstitutionRecord, MentorError>> + Send;
}

/// Outcome of processing one feed record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SyncOutcome {
    Created,
    Updated,
}

/// Counters for one sync pass. Failed records are logged and skipped; they
/// count as neither created nor updated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSummary {
    pub created: u64,
    pub updated: u64,
    pub failed: u64,
}

/// Number of concepts stored per advisor.
const STORED_CONCEPTS: usize = 10;

/// Number of concepts included in the research summary.
const SUMMARY_CONCEPTS: usize = 5;

/// The feed sync pipeline.
///
/// For each record: ensure the referenced institution exists (fetching its
/// details on first sight), derive the research summary, request an
/// embedding, upsert the advisor row, and append the embedding to the
/// vector index. After a full pass the index is persisted to its paired
/// files.
pub struct SyncPipeline<E: EmbeddingProvider, F: SourceFeed> {
    index: VectorIndex,
    advisors: AdvisorRepository,
    institutions: InstitutionRepository,
    embedder: E,
    feed: F,
    vectors_path: PathBuf,
    mapping_path: PathBuf,
}

impl<E: EmbeddingProvider, F: SourceFeed> SyncPipeline<E, F> {
    pub fn new(
        index: VectorIndex,
        db: Arc<Database>,
        embedder: E,
        feed: F,
        vectors_path: PathBuf,
        mapping_path: PathBuf,
    ) -> Self {
        Self {
            index,
            advisors: AdvisorRepository::new(Arc::clone(&db)),
            institutions: InstitutionRepository::new(db),
            embedder,
            feed,
            vectors_path,
            mapping_path,
        }
    }

    /// Sync every advisor of one institution, identified by its ROR id.
    ///
    /// Records are processed independently: a single-record failure is
    /// logged with the record's identifier and counted, without aborting
    /// the batch. A transport-level feed failure aborts the run.
    pub async fn sync_institution(&self, institution_ror: &str) -> Result<SyncSummary, MentorError> {
        let mut summary = SyncSummary::default();
        let mut cursor: Option<String> = None;

        loop {
            let page = self.feed.next_page(institution_ror, cursor.as_deref()).await?;

            for record in page.records {
                let record_id = record.id.clone();
                match self.process_record(record).await {
                    Ok(SyncOutcome::Created) => summary.created += 1,
                    Ok(SyncOutcome::Updated) => summary.updated += 1,
                    Err(e) => {
                        error!(advisor_id = %record_id, error = %e, "Failed to process feed record");
                        summary.failed += 1;
                    }
                }
            }

            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        self.index.persist(&self.vectors_path, &self.mapping_path)?;

        info!(
            institution_ror,
            created = summary.created,
            updated = summary.updated,
            failed = summary.failed,
            "Sync pass complete"
        );
        Ok(summary)
    }

    async fn process_record(&self, record: AuthorRecord) -> Result<SyncOutcome, MentorError> {
        let institution_id = match &record.institution {
            Some(reference) => {
                self.ensure_institution(reference).await?;
                Some(reference.id.clone())
            }
            None => None,
        };

        let summary_text = research_summary(&record);
        let embedding = self.embedder.encode(&summary_text).await?;

        let mut concepts = record.concepts;
        concepts.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        concepts.truncate(STORED_CONCEPTS);

        let stats = record.summary_stats.unwrap_or_default();
        let now = Utc::now();
        let advisor = Advisor {
            id: record.id,
            name: record.display_name.clone(),
            display_name: Some(record.display_name),
            institution_id,
            works_count: record.works_count,
            cited_by_count: record.cited_by_count,
            h_index: stats.h_index,
            i10_index: stats.i10_index,
            concepts,
            research_summary: Some(summary_text),
            orcid: record.orcid,
            homepage_url: record.homepage_url,
            embedding: Some(embedding.clone()),
            created_at: now,
            last_updated: now,
        };

        let created = self.advisors.upsert(&advisor)?;
        self.index.add(&advisor.id, embedding)?;

        Ok(if created {
            SyncOutcome::Created
        } else {
            SyncOutcome::Updated
        })
    }

    /// Create the referenced institution if it has not been seen yet,
    /// fetching its detailed record from the feed. Idempotent.
    async fn ensure_institution(&self, reference: &InstitutionRef) -> Result<(), MentorError> {
        if self.institutions.find_by_id(&reference.id)?.is_some() {
            return Ok(());
        }

        let record = self.feed.institution(&reference.id).await?;
        self.institutions.create(&Institution {
            id: record.id,
            name: record.display_name.clone(),
            display_name: Some(record.display_name),
            country_code: record.country_code,
            country: record.country,
            city: record.city,
            region: record.region,
            kind: record.kind,
            homepage_url: record.homepage_url,
            ror_id: record.ror_id,
            works_count: record.works_count,
        })?;
        Ok(())
    }

    /// Get a handle to the underlying vector index.
    pub fn index(&self) -> &VectorIndex {
        &self.index
    }
}

/// Derive the deterministic research summary embedded for an advisor.
///
/// Join order is fixed: name, then "Research areas: " plus the top concepts
/// by score, then "Institution: " plus the institution name. Parts whose
/// source field is absent are omitted.
pub fn research_summary(record: &AuthorRecord) -> String {
    let mut parts: Vec<String> = Vec::new();

    if !record.display_name.is_empty() {
        parts.push(record.display_name.clone());
    }

    if !record.concepts.is_empty() {
        let mut ranked: Vec<&ConceptTag> = record.concepts.iter().collect();
        ranked.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let names: Vec<&str> = ranked
            .iter()
            .take(SUMMARY_CONCEPTS)
            .map(|c| c.display_name.as_str())
            .collect();
        parts.push(format!("Research areas: {}", names.join(", ")));
    }

    if let Some(name) = record
        .institution
        .as_ref()
        .and_then(|i| i.display_name.as_deref())
    {
        parts.push(format!("Institution: {}", name));
    }

    parts.join(". ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use crate::embedding::MockEmbedding;

    const DIM: usize = 8;

    /// In-memory feed serving preconfigured pages, one per cursor step.
    struct MockFeed {
        pages: Vec<FeedPage>,
        institutions: HashMap<String, InstitutionRecord>,
        institution_fetches: Arc<Mutex<u64>>,
    }

    impl MockFeed {
        fn new(pages: Vec<FeedPage>) -> Self {
            Self {
                pages,
                institutions: HashMap::new(),
                institution_fetches: Arc::new(Mutex::new(0)),
            }
        }

        fn with_institution(mut self, record: InstitutionRecord) -> Self {
            self.institutions.insert(record.id.clone(), record);
            self
        }
    }

    impl SourceFeed for MockFeed {
        async fn next_page(
            &self,
            _institution_ror: &str,
            cursor: Option<&str>,
        ) -> Result<FeedPage, MentorError> {
            let page_number: usize = match cursor {
                None => 0,
                Some(c) => c
                    .parse()
                    .map_err(|_| MentorError::Upstream("bad cursor".to_string()))?,
            };
            self.pages
                .get(page_number)
                .cloned()
                .ok_or_else(|| MentorError::Upstream("page out of range".to_string()))
        }

        async fn institution(&self, id: &str) -> Result<InstitutionRecord, MentorError> {
            let mut fetches = self.institution_fetches.lock().unwrap();
            *fetches += 1;
            self.institutions
                .get(id)
                .cloned()
                .ok_or_else(|| MentorError::Upstream(format!("unknown institution {}", id)))
        }
    }

    fn make_record(id: &str, name: &str) -> AuthorRecord {
        AuthorRecord {
            id: id.to_string(),
            display_name: name.to_string(),
            works_count: 42,
            cited_by_count: 300,
            summary_stats: Some(SummaryStats {
                h_index: 11,
                i10_index: 9,
            }),
            concepts: vec![
                ConceptTag {
                    id: "C1".to_string(),
                    display_name: "Machine learning".to_string(),
                    level: 1,
                    score: 0.9,
                },
                ConceptTag {
                    id: "C2".to_string(),
                    display_name: "Optimization".to_string(),
                    level: 2,
                    score: 0.4,
                },
            ],
            ..Default::default()
        }
    }

    fn make_pipeline(
        feed: MockFeed,
        dir: &tempfile::TempDir,
    ) -> (
        SyncPipeline<MockEmbedding, MockFeed>,
        Arc<Database>,
        VectorIndex,
    ) {
        let db = Arc::new(Database::in_memory().unwrap());
        let index = VectorIndex::new(DIM);
        let pipeline = SyncPipeline::new(
            index.clone(),
            Arc::clone(&db),
            MockEmbedding::with_dimension(DIM),
            feed,
            dir.path().join("index.bin"),
            dir.path().join("mapping.json"),
        );
        (pipeline, db, index)
    }

    #[tokio::test]
    async fn test_sync_creates_then_updates() {
        let dir = tempfile::tempdir().unwrap();

        // Same record twice: created on the first pass, updated on the second.
        let feed = MockFeed::new(vec![FeedPage {
            records: vec![make_record("A1", "Grace Hopper")],
            next_cursor: None,
        }]);
        let (pipeline, db, index) = make_pipeline(feed, &dir);

        let first = pipeline.sync_institution("ror1").await.unwrap();
        assert_eq!(first, SyncSummary { created: 1, updated: 0, failed: 0 });

        let second = pipeline.sync_institution("ror1").await.unwrap();
        assert_eq!(second, SyncSummary { created: 0, updated: 1, failed: 0 });

        // Exactly one row in the store; the index holds two slots but only
        // the latest one is live.
        assert_eq!(AdvisorRepository::new(db).count().unwrap(), 1);
        assert_eq!(index.len(), 2);
        assert_eq!(index.live_len(), 1);
    }

    #[tokio::test]
    async fn test_sync_follows_cursor_chain() {
        let dir = tempfile::tempdir().unwrap();
        let feed = MockFeed::new(vec![
            FeedPage {
                records: vec![make_record("A1", "One")],
                next_cursor: Some("1".to_string()),
            },
            FeedPage {
                records: vec![make_record("A2", "Two"), make_record("A3", "Three")],
                next_cursor: None,
            },
        ]);
        let (pipeline, db, _) = make_pipeline(feed, &dir);

        let summary = pipeline.sync_institution("ror1").await.unwrap();
        assert_eq!(summary.created, 3);
        assert_eq!(AdvisorRepository::new(db).count().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_sync_fetches_unseen_institution_once() {
        let dir = tempfile::tempdir().unwrap();

        let mut first = make_record("A1", "One");
        first.institution = Some(InstitutionRef {
            id: "I1".to_string(),
            display_name: Some("Stanford University".to_string()),
        });
        let mut second = make_record("A2", "Two");
        second.institution = first.institution.clone();

        let feed = MockFeed::new(vec![FeedPage {
            records: vec![first, second],
            next_cursor: None,
        }])
        .with_institution(InstitutionRecord {
            id: "I1".to_string(),
            display_name: "Stanford University".to_string(),
            country: Some("United States".to_string()),
            city: Some("Stanford".to_string()),
            kind: Some("education".to_string()),
            ..Default::default()
        });

        let fetches = Arc::clone(&feed.institution_fetches);
        let (pipeline, db, _) = make_pipeline(feed, &dir);
        let summary = pipeline.sync_institution("ror1").await.unwrap();
        assert_eq!(summary.created, 2);

        // The detail fetch happened only for the first sighting.
        assert_eq!(*fetches.lock().unwrap(), 1);

        let institutions = InstitutionRepository::new(db);
        assert_eq!(institutions.count().unwrap(), 1);
        let stored = institutions.find_by_id("I1").unwrap().unwrap();
        assert_eq!(stored.city.as_deref(), Some("Stanford"));
    }

    #[tokio::test]
    async fn test_sync_counts_failed_records_and_continues() {
        let dir = tempfile::tempdir().unwrap();

        // The middle record has no embeddable content at all: empty name,
        // no concepts, no institution. Its summary is empty, the provider
        // rejects it, and the batch continues.
        let empty = AuthorRecord {
            id: "A2".to_string(),
            ..Default::default()
        };
        let feed = MockFeed::new(vec![FeedPage {
            records: vec![make_record("A1", "One"), empty, make_record("A3", "Three")],
            next_cursor: None,
        }]);
        let (pipeline, db, _) = make_pipeline(feed, &dir);

        let summary = pipeline.sync_institution("ror1").await.unwrap();
        assert_eq!(summary, SyncSummary { created: 2, updated: 0, failed: 1 });
        assert_eq!(AdvisorRepository::new(db).count().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_sync_aborts_on_transport_failure() {
        let dir = tempfile::tempdir().unwrap();

        // The cursor points past the last configured page, so the second
        // fetch fails at the transport level.
        let feed = MockFeed::new(vec![FeedPage {
            records: vec![make_record("A1", "One")],
            next_cursor: Some("9".to_string()),
        }]);
        let (pipeline, _, _) = make_pipeline(feed, &dir);

        let result = pipeline.sync_institution("ror1").await;
        assert!(matches!(result, Err(MentorError::Upstream(_))));
    }

    #[tokio::test]
    async fn test_sync_persists_index_after_pass() {
        let dir = tempfile::tempdir().unwrap();
        let feed = MockFeed::new(vec![FeedPage {
            records: vec![make_record("A1", "One")],
            next_cursor: None,
        }]);
        let (pipeline, _, _) = make_pipeline(feed, &dir);

        pipeline.sync_institution("ror1").await.unwrap();

        let loaded =
            VectorIndex::load(&dir.path().join("index.bin"), &dir.path().join("mapping.json"))
                .unwrap();
        assert_eq!(loaded.len(), 1);
    }

    #[tokio::test]
    async fn test_sync_stores_summary_and_stats() {
        let dir = tempfile::tempdir().unwrap();
        let feed = MockFeed::new(vec![FeedPage {
            records: vec![make_record("A1", "Grace Hopper")],
            next_cursor: None,
        }]);
        let (pipeline, db, _) = make_pipeline(feed, &dir);
        pipeline.sync_institution("ror1").await.unwrap();

        let detail = AdvisorRepository::new(db).find_by_id("A1").unwrap().unwrap();
        assert_eq!(detail.advisor.h_index, 11);
        assert_eq!(detail.advisor.i10_index, 9);
        assert_eq!(
            detail.advisor.research_summary.as_deref(),
            Some("Grace Hopper. Research areas: Machine learning, Optimization")
        );
        assert!(detail.advisor.embedding.is_some());
    }

    #[test]
    fn test_research_summary_full_record() {
        let mut record = make_record("A1", "Grace Hopper");
        record.institution = Some(InstitutionRef {
            id: "I1".to_string(),
            display_name: Some("Yale University".to_string()),
        });
        assert_eq!(
            research_summary(&record),
            "Grace Hopper. Research areas: Machine learning, Optimization. Institution: Yale University"
        );
    }

    #[test]
    fn test_research_summary_orders_concepts_by_score() {
        let mut record = make_record("A1", "X");
        record.concepts = (0..8)
            .map(|i| ConceptTag {
                id: format!("C{}", i),
                display_name: format!("Concept{}", i),
                level: 1,
                score: i as f64 / 10.0,
            })
            .collect();
        let summary = research_summary(&record);
        // Top five by score, highest first.
        assert_eq!(
            summary,
            "X. Research areas: Concept7, Concept6, Concept5, Concept4, Concept3"
        );
    }

    #[test]
    fn test_research_summary_omits_absent_parts() {
        let record = AuthorRecord {
            id: "A1".to_string(),
            display_name: "Solo Name".to_string(),
            ..Default::default()
        };
        assert_eq!(research_summary(&record), "Solo Name");

        let record = AuthorRecord {
            id: "A1".to_string(),
            ..Default::default()
        };
        assert_eq!(research_summary(&record), "");
    }
}

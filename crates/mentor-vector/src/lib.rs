//! Mentor vector crate - embedding providers, the advisor vector index,
//! the match orchestrator, and the feed sync pipeline.
//!
//! Provides exact nearest-neighbor search over advisor embeddings with a
//! stable slot-to-identifier mapping, an embedding provider trait with ONNX
//! and mock implementations, ranked/filtered/explained matching, and the
//! ingestion pipeline that keeps the relational store and the index in step.

pub mod embedding;
pub mod index;
pub mod matcher;
pub mod sync;

pub use embedding::{DynEmbeddingProvider, EmbeddingProvider, MockEmbedding, OnnxEmbeddingProvider};
pub use index::{SearchHit, VectorIndex};
pub use matcher::{AdvisorMatch, MatchEngine, MatchExplanation, MatchReport, SearchReport};
pub use sync::{
    AuthorRecord, FeedPage, InstitutionRecord, InstitutionRef, SourceFeed, SummaryStats,
    SyncPipeline, SyncSummary,
};

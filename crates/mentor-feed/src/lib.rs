//! Mentor feed crate - OpenAlex adapter for the sync pipeline.
//!
//! Implements the `SourceFeed` port over the OpenAlex REST API: cursor
//! pagination, the polite-pool `mailto` parameter, field projection, and
//! normalization of the wire format into the pipeline's record shapes.

pub mod openalex;

pub use openalex::OpenAlexFeed;

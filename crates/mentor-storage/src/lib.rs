//! Mentor storage crate - SQLite system of record for advisors,
//! institutions, and candidate profiles.
//!
//! Provides a WAL-mode SQLite database with versioned migrations and
//! repository implementations. The matching engine treats this crate as the
//! system of record; the vector index is rebuilt from it.

pub mod db;
pub mod migrations;
pub mod repository;

pub use db::Database;
pub use repository::{AdvisorDetail, AdvisorRepository, InstitutionRepository, ProfileRepository};

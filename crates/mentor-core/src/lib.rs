//! Mentor core crate - shared types, errors, and configuration.
//!
//! Defines the advisor/institution/profile entity shapes, the workspace-wide
//! error enum, and the TOML configuration loaded by the `mentor` binary.

pub mod config;
pub mod error;
pub mod types;

pub use config::MentorConfig;
pub use error::{MentorError, Result};
pub use types::{Advisor, ConceptTag, Institution, MatchFilters, Profile};

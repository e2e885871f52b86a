//! Repository implementations for SQLite-backed persistence.
//!
//! Provides AdvisorRepository, InstitutionRepository, and ProfileRepository
//! that operate on the Database struct using raw SQL. Advisor concepts and
//! embeddings are stored as JSON text columns.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::types::Value;
use rusqlite::OptionalExtension;
use uuid::Uuid;

use mentor_core::error::MentorError;
use mentor_core::types::{Advisor, Institution, MatchFilters, Profile};

use crate::db::Database;

/// An advisor row hydrated with its institution name.
#[derive(Debug, Clone)]
pub struct AdvisorDetail {
    pub advisor: Advisor,
    pub institution_name: Option<String>,
}

/// Repository for advisor records. The system of record for the matching
/// engine; the vector index is derived from the embeddings stored here.
pub struct AdvisorRepository {
    db: Arc<Database>,
}

impl AdvisorRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a new advisor or update every mutable field of an existing
    /// one. The identifier itself is never overwritten.
    ///
    /// Returns `true` when a new row was created, `false` on update. The
    /// whole check-and-write runs under one connection lock hold.
    pub fn upsert(&self, advisor: &Advisor) -> Result<bool, MentorError> {
        let concepts_json = serde_json::to_string(&advisor.concepts)?;
        let embedding_json = advisor
            .embedding
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        self.db.with_conn(|conn| {
            let exists: bool = conn
                .query_row(
                    "SELECT EXISTS(SELECT 1 FROM advisors WHERE id = ?1)",
                    rusqlite::params![advisor.id],
                    |row| row.get(0),
                )
                .map_err(|e| MentorError::Storage(e.to_string()))?;

            if exists {
                conn.execute(
                    "UPDATE advisors SET
                        name = ?2, display_name = ?3, institution_id = ?4,
                        works_count = ?5, cited_by_count = ?6, h_index = ?7,
                        i10_index = ?8, concepts = ?9, research_summary = ?10,
                        orcid = ?11, homepage_url = ?12, embedding = ?13,
                        last_updated = strftime('%s', 'now')
                     WHERE id = ?1",
                    rusqlite::params![
                        advisor.id,
                        advisor.name,
                        advisor.display_name,
                        advisor.institution_id,
                        advisor.works_count,
                        advisor.cited_by_count,
                        advisor.h_index,
                        advisor.i10_index,
                        concepts_json,
                        advisor.research_summary,
                        advisor.orcid,
                        advisor.homepage_url,
                        embedding_json,
                    ],
                )
                .map_err(|e| MentorError::Storage(format!("Failed to update advisor: {}", e)))?;
            } else {
                conn.execute(
                    "INSERT INTO advisors (
                        id, name, display_name, institution_id, works_count,
                        cited_by_count, h_index, i10_index, concepts,
                        research_summary, orcid, homepage_url, embedding,
                        created_at, last_updated
                     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13,
                               strftime('%s', 'now'), strftime('%s', 'now'))",
                    rusqlite::params![
                        advisor.id,
                        advisor.name,
                        advisor.display_name,
                        advisor.institution_id,
                        advisor.works_count,
                        advisor.cited_by_count,
                        advisor.h_index,
                        advisor.i10_index,
                        concepts_json,
                        advisor.research_summary,
                        advisor.orcid,
                        advisor.homepage_url,
                        embedding_json,
                    ],
                )
                .map_err(|e| MentorError::Storage(format!("Failed to insert advisor: {}", e)))?;
            }

            Ok(!exists)
        })
    }

    /// Find an advisor by its external identifier.
    pub fn find_by_id(&self, id: &str) -> Result<Option<AdvisorDetail>, MentorError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "{} WHERE a.id = ?1",
                    ADVISOR_SELECT
                ))
                .map_err(|e| MentorError::Storage(e.to_string()))?;

            let result = stmt
                .query_row(rusqlite::params![id], |row| Ok(row_to_advisor_detail(row)))
                .optional()
                .map_err(|e| MentorError::Storage(e.to_string()))?;

            match result {
                Some(detail) => Ok(Some(detail?)),
                None => Ok(None),
            }
        })
    }

    /// List advisors, optionally restricted to a candidate id set and
    /// filtered by attributes.
    ///
    /// Filter semantics: substring match on institution name/country/city,
    /// minimum thresholds on works and citation counts, and any-of
    /// containment on concept tags. All present filter fields are combined
    /// with AND. Result order is store-defined (by identifier); callers
    /// re-rank by similarity where applicable.
    pub fn list_filtered(
        &self,
        ids: Option<&[String]>,
        filters: Option<&MatchFilters>,
        skip: u64,
        limit: u64,
    ) -> Result<Vec<AdvisorDetail>, MentorError> {
        let mut sql = String::from(ADVISOR_SELECT);
        sql.push_str(" WHERE 1 = 1");
        let mut params: Vec<Value> = Vec::new();

        if let Some(ids) = ids {
            if ids.is_empty() {
                return Ok(Vec::new());
            }
            let placeholders = vec!["?"; ids.len()].join(", ");
            sql.push_str(&format!(" AND a.id IN ({})", placeholders));
            params.extend(ids.iter().map(|id| Value::Text(id.clone())));
        }

        if let Some(filters) = filters {
            if let Some(ref university) = filters.university {
                sql.push_str(" AND i.name LIKE ?");
                params.push(Value::Text(format!("%{}%", university)));
            }
            if let Some(ref country) = filters.country {
                sql.push_str(" AND i.country LIKE ?");
                params.push(Value::Text(format!("%{}%", country)));
            }
            if let Some(ref city) = filters.city {
                sql.push_str(" AND i.city LIKE ?");
                params.push(Value::Text(format!("%{}%", city)));
            }
            if let Some(min_works) = filters.min_works_count {
                sql.push_str(" AND a.works_count >= ?");
                params.push(Value::Integer(min_works));
            }
            if let Some(min_citations) = filters.min_citations {
                sql.push_str(" AND a.cited_by_count >= ?");
                params.push(Value::Integer(min_citations));
            }
            if !filters.concepts.is_empty() {
                let clauses = vec!["a.concepts LIKE ?"; filters.concepts.len()].join(" OR ");
                sql.push_str(&format!(" AND ({})", clauses));
                params.extend(
                    filters
                        .concepts
                        .iter()
                        .map(|c| Value::Text(format!("%{}%", c))),
                );
            }
        }

        sql.push_str(" ORDER BY a.id LIMIT ? OFFSET ?");
        params.push(Value::Integer(limit as i64));
        params.push(Value::Integer(skip as i64));

        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| MentorError::Storage(e.to_string()))?;

            let rows = stmt
                .query_map(rusqlite::params_from_iter(params.iter()), |row| {
                    Ok(row_to_advisor_detail(row))
                })
                .map_err(|e| MentorError::Storage(e.to_string()))?;

            let mut details = Vec::new();
            for row in rows {
                let detail = row.map_err(|e| MentorError::Storage(e.to_string()))??;
                details.push(detail);
            }
            Ok(details)
        })
    }

    /// Stream every `(advisor id, embedding)` pair with a stored embedding,
    /// ordered by identifier. Used to rebuild the vector index from the
    /// system of record.
    pub fn embedded(&self) -> Result<Vec<(String, Vec<f32>)>, MentorError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, embedding FROM advisors
                     WHERE embedding IS NOT NULL
                     ORDER BY id",
                )
                .map_err(|e| MentorError::Storage(e.to_string()))?;

            let rows = stmt
                .query_map([], |row| {
                    let id: String = row.get(0)?;
                    let embedding_json: String = row.get(1)?;
                    Ok((id, embedding_json))
                })
                .map_err(|e| MentorError::Storage(e.to_string()))?;

            let mut pairs = Vec::new();
            for row in rows {
                let (id, embedding_json) =
                    row.map_err(|e| MentorError::Storage(e.to_string()))?;
                let embedding: Vec<f32> = serde_json::from_str(&embedding_json)?;
                pairs.push((id, embedding));
            }
            Ok(pairs)
        })
    }

    /// Count stored advisors.
    pub fn count(&self) -> Result<u64, MentorError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM advisors", [], |row| row.get(0))
                .map_err(|e| MentorError::Storage(e.to_string()))?;
            Ok(count as u64)
        })
    }
}

/// Shared SELECT with institution hydration.
const ADVISOR_SELECT: &str = "SELECT a.id, a.name, a.display_name, a.institution_id,
        a.works_count, a.cited_by_count, a.h_index, a.i10_index,
        a.concepts, a.research_summary, a.orcid, a.homepage_url,
        a.embedding, a.created_at, a.last_updated, i.name
 FROM advisors a
 LEFT JOIN institutions i ON a.institution_id = i.id";

fn row_to_advisor_detail(row: &rusqlite::Row<'_>) -> Result<AdvisorDetail, MentorError> {
    let storage = |e: rusqlite::Error| MentorError::Storage(e.to_string());

    let concepts_json: String = row.get(8).map_err(storage)?;
    let embedding_json: Option<String> = row.get(12).map_err(storage)?;

    let advisor = Advisor {
        id: row.get(0).map_err(storage)?,
        name: row.get(1).map_err(storage)?,
        display_name: row.get(2).map_err(storage)?,
        institution_id: row.get(3).map_err(storage)?,
        works_count: row.get(4).map_err(storage)?,
        cited_by_count: row.get(5).map_err(storage)?,
        h_index: row.get(6).map_err(storage)?,
        i10_index: row.get(7).map_err(storage)?,
        concepts: serde_json::from_str(&concepts_json)?,
        research_summary: row.get(9).map_err(storage)?,
        orcid: row.get(10).map_err(storage)?,
        homepage_url: row.get(11).map_err(storage)?,
        embedding: embedding_json
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?,
        created_at: epoch_to_datetime(row.get(13).map_err(storage)?),
        last_updated: epoch_to_datetime(row.get(14).map_err(storage)?),
    };

    Ok(AdvisorDetail {
        advisor,
        institution_name: row.get(15).map_err(storage)?,
    })
}

fn epoch_to_datetime(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_else(Utc::now)
}

/// Repository for institutions.
pub struct InstitutionRepository {
    db: Arc<Database>,
}

impl InstitutionRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Find an institution by its external identifier.
    pub fn find_by_id(&self, id: &str) -> Result<Option<Institution>, MentorError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, name, display_name, country_code, country, city,
                            region, kind, homepage_url, ror_id, works_count
                     FROM institutions WHERE id = ?1",
                )
                .map_err(|e| MentorError::Storage(e.to_string()))?;

            stmt.query_row(rusqlite::params![id], |row| {
                Ok(Institution {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    display_name: row.get(2)?,
                    country_code: row.get(3)?,
                    country: row.get(4)?,
                    city: row.get(5)?,
                    region: row.get(6)?,
                    kind: row.get(7)?,
                    homepage_url: row.get(8)?,
                    ror_id: row.get(9)?,
                    works_count: row.get(10)?,
                })
            })
            .optional()
            .map_err(|e| MentorError::Storage(e.to_string()))
        })
    }

    /// Create an institution. Idempotent: an existing row with the same
    /// identifier is left untouched.
    pub fn create(&self, institution: &Institution) -> Result<(), MentorError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO institutions (
                    id, name, display_name, country_code, country, city,
                    region, kind, homepage_url, ror_id, works_count
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                rusqlite::params![
                    institution.id,
                    institution.name,
                    institution.display_name,
                    institution.country_code,
                    institution.country,
                    institution.city,
                    institution.region,
                    institution.kind,
                    institution.homepage_url,
                    institution.ror_id,
                    institution.works_count,
                ],
            )
            .map_err(|e| MentorError::Storage(format!("Failed to create institution: {}", e)))?;
            Ok(())
        })
    }

    /// Count stored institutions.
    pub fn count(&self) -> Result<u64, MentorError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM institutions", [], |row| row.get(0))
                .map_err(|e| MentorError::Storage(e.to_string()))?;
            Ok(count as u64)
        })
    }
}

/// Repository for candidate profiles.
pub struct ProfileRepository {
    db: Arc<Database>,
}

impl ProfileRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Store a new profile.
    pub fn create(&self, profile: &Profile) -> Result<(), MentorError> {
        let interests_json = serde_json::to_string(&profile.research_interests)?;
        let embedding_json = profile
            .resume_embedding
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO profiles (
                    id, full_name, field_of_study, research_interests,
                    resume_text, resume_embedding, created_at, updated_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    profile.id.to_string(),
                    profile.full_name,
                    profile.field_of_study,
                    interests_json,
                    profile.resume_text,
                    embedding_json,
                    profile.created_at.timestamp(),
                    profile.updated_at.timestamp(),
                ],
            )
            .map_err(|e| MentorError::Storage(format!("Failed to create profile: {}", e)))?;
            Ok(())
        })
    }

    /// Find a profile by identifier.
    pub fn find_by_id(&self, id: Uuid) -> Result<Option<Profile>, MentorError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, full_name, field_of_study, research_interests,
                            resume_text, resume_embedding, created_at, updated_at
                     FROM profiles WHERE id = ?1",
                )
                .map_err(|e| MentorError::Storage(e.to_string()))?;

            let result = stmt
                .query_row(rusqlite::params![id.to_string()], |row| {
                    Ok(row_to_profile(row))
                })
                .optional()
                .map_err(|e| MentorError::Storage(e.to_string()))?;

            match result {
                Some(profile) => Ok(Some(profile?)),
                None => Ok(None),
            }
        })
    }

    /// Cache a derived resume embedding onto a profile.
    ///
    /// This is the documented best-effort write issued from the match path;
    /// callers log failures and continue.
    pub fn set_resume_embedding(&self, id: Uuid, embedding: &[f32]) -> Result<(), MentorError> {
        let embedding_json = serde_json::to_string(embedding)?;
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE profiles
                 SET resume_embedding = ?2, updated_at = strftime('%s', 'now')
                 WHERE id = ?1",
                rusqlite::params![id.to_string(), embedding_json],
            )
            .map_err(|e| MentorError::Storage(format!("Failed to cache embedding: {}", e)))?;
            Ok(())
        })
    }
}

fn row_to_profile(row: &rusqlite::Row<'_>) -> Result<Profile, MentorError> {
    let storage = |e: rusqlite::Error| MentorError::Storage(e.to_string());

    let id_str: String = row.get(0).map_err(storage)?;
    let interests_json: String = row.get(3).map_err(storage)?;
    let embedding_json: Option<String> = row.get(5).map_err(storage)?;

    Ok(Profile {
        id: Uuid::parse_str(&id_str)
            .map_err(|e| MentorError::Storage(format!("Invalid profile id: {}", e)))?,
        full_name: row.get(1).map_err(storage)?,
        field_of_study: row.get(2).map_err(storage)?,
        research_interests: serde_json::from_str(&interests_json)?,
        resume_text: row.get(4).map_err(storage)?,
        resume_embedding: embedding_json
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?,
        created_at: epoch_to_datetime(row.get(6).map_err(storage)?),
        updated_at: epoch_to_datetime(row.get(7).map_err(storage)?),
    })
}

//! OpenAlex client implementing the `SourceFeed` port.
//!
//! The adapter owns every protocol concern: URL construction, cursor
//! handling (OpenAlex uses `cursor=*` to open a listing), the inter-page
//! delay, and stripping the `https://openalex.org/` prefix so the pipeline
//! sees bare identifiers. Non-success responses and undecodable payloads
//! surface as `Upstream` errors.

use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use mentor_core::config::FeedConfig;
use mentor_core::error::MentorError;
use mentor_core::types::ConceptTag;
use mentor_vector::sync::{
    AuthorRecord, FeedPage, InstitutionRecord, InstitutionRef, SourceFeed, SummaryStats,
};

const ID_PREFIX: &str = "https://openalex.org/";

/// Fields requested from the authors listing.
const AUTHOR_SELECT: &str = "id,display_name,last_known_institution,works_count,\
cited_by_count,summary_stats,concepts,orcid,homepage";

/// OpenAlex-backed feed.
pub struct OpenAlexFeed {
    client: reqwest::Client,
    base_url: String,
    mailto: Option<String>,
    per_page: u32,
    page_delay: Duration,
}

impl OpenAlexFeed {
    pub fn new(config: &FeedConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            mailto: config.mailto.clone(),
            per_page: config.per_page,
            page_delay: Duration::from_millis(config.page_delay_ms),
        }
    }
}

impl SourceFeed for OpenAlexFeed {
    async fn next_page(
        &self,
        institution_ror: &str,
        cursor: Option<&str>,
    ) -> Result<FeedPage, MentorError> {
        // Rate limiting between successive pages; the opening request goes
        // out immediately.
        if cursor.is_some() {
            tokio::time::sleep(self.page_delay).await;
        }

        let url = format!("{}/authors", self.base_url);
        let mut query: Vec<(&str, String)> = vec![
            (
                "filter",
                format!("last_known_institution.ror:{}", institution_ror),
            ),
            ("per-page", self.per_page.to_string()),
            ("select", AUTHOR_SELECT.to_string()),
            ("cursor", cursor.unwrap_or("*").to_string()),
        ];
        if let Some(ref mailto) = self.mailto {
            query.push(("mailto", mailto.clone()));
        }

        let response = self
            .client
            .get(&url)
            .query(&query)
            .send()
            .await
            .map_err(|e| MentorError::Upstream(format!("OpenAlex request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(MentorError::Upstream(format!(
                "OpenAlex returned {} for {}",
                status, url
            )));
        }

        let body: AuthorsResponse = response
            .json()
            .await
            .map_err(|e| MentorError::Upstream(format!("OpenAlex payload: {}", e)))?;

        debug!(
            institution_ror,
            records = body.results.len(),
            has_next = body.meta.next_cursor.is_some(),
            "Fetched authors page"
        );

        Ok(FeedPage {
            records: body.results.into_iter().map(map_author).collect(),
            next_cursor: body.meta.next_cursor,
        })
    }

    async fn institution(&self, id: &str) -> Result<InstitutionRecord, MentorError> {
        let url = format!("{}/institutions/{}", self.base_url, id);
        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(ref mailto) = self.mailto {
            query.push(("mailto", mailto.clone()));
        }

        let response = self
            .client
            .get(&url)
            .query(&query)
            .send()
            .await
            .map_err(|e| MentorError::Upstream(format!("OpenAlex request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(MentorError::Upstream(format!(
                "OpenAlex returned {} for {}",
                status, url
            )));
        }

        let raw: RawInstitution = response
            .json()
            .await
            .map_err(|e| MentorError::Upstream(format!("OpenAlex payload: {}", e)))?;

        Ok(map_institution(raw))
    }
}

fn strip_id(id: &str) -> String {
    id.trim_start_matches(ID_PREFIX).to_string()
}

fn map_author(raw: RawAuthor) -> AuthorRecord {
    AuthorRecord {
        id: strip_id(&raw.id),
        display_name: raw.display_name,
        institution: raw.last_known_institution.map(|inst| InstitutionRef {
            id: strip_id(&inst.id),
            display_name: inst.display_name,
        }),
        works_count: raw.works_count,
        cited_by_count: raw.cited_by_count,
        summary_stats: raw.summary_stats.map(|stats| SummaryStats {
            h_index: stats.h_index,
            i10_index: stats.i10_index,
        }),
        concepts: raw
            .concepts
            .into_iter()
            .map(|c| ConceptTag {
                id: strip_id(&c.id),
                display_name: c.display_name,
                level: c.level,
                score: c.score,
            })
            .collect(),
        orcid: raw.orcid,
        homepage_url: raw.homepage,
    }
}

fn map_institution(raw: RawInstitution) -> InstitutionRecord {
    let geo = raw.geo.unwrap_or_default();
    InstitutionRecord {
        id: strip_id(&raw.id),
        display_name: raw.display_name.unwrap_or_default(),
        country_code: raw.country_code,
        country: raw.country,
        city: geo.city,
        region: geo.region,
        kind: raw.kind,
        homepage_url: raw.homepage_url,
        ror_id: raw.ror,
        works_count: raw.works_count,
    }
}

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct AuthorsResponse {
    #[serde(default)]
    meta: PageMeta,
    #[serde(default)]
    results: Vec<RawAuthor>,
}

#[derive(Debug, Default, Deserialize)]
struct PageMeta {
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawAuthor {
    id: String,
    display_name: String,
    last_known_institution: Option<RawInstitutionRef>,
    #[serde(default)]
    works_count: i64,
    #[serde(default)]
    cited_by_count: i64,
    summary_stats: Option<RawSummaryStats>,
    #[serde(default)]
    concepts: Vec<RawConcept>,
    orcid: Option<String>,
    homepage: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawInstitutionRef {
    id: String,
    display_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawSummaryStats {
    #[serde(default)]
    h_index: i64,
    #[serde(default)]
    i10_index: i64,
}

#[derive(Debug, Deserialize)]
struct RawConcept {
    #[serde(default)]
    id: String,
    display_name: String,
    #[serde(default)]
    level: i64,
    #[serde(default)]
    score: f64,
}

#[derive(Debug, Deserialize)]
struct RawInstitution {
    id: String,
    display_name: Option<String>,
    country_code: Option<String>,
    country: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    homepage_url: Option<String>,
    ror: Option<String>,
    #[serde(default)]
    works_count: i64,
    geo: Option<RawGeo>,
}

#[derive(Debug, Default, Deserialize)]
struct RawGeo {
    city: Option<String>,
    region: Option<String>,
}

//! Core data models for the space biology explorer
//!
//! This module contains the records served by the upstream clients and the
//! offline catalogue: publications, knowledge gaps, data integrations and
//! quotes, plus the query parameters publication searches are keyed on.

pub mod catalog;
pub mod chat;
pub mod extract;
pub mod gemini;
pub mod quotes;

pub use catalog::Catalog;
pub use chat::{ChatError, ChatMessage, ChatRole, ChatSession};
pub use gemini::{
    DataIntegrationSource, GeminiClient, KnowledgeGapSource, PublicationDetailsSource,
    PublicationSource,
};
pub use quotes::QuoteSource;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::query::QueryParams;

/// A research publication
///
/// Field names follow the upstream JSON (`camelCase`, `abstract`,
/// `relatedStudies`), so records from the generative-text API and the local
/// catalogue deserialize the same way.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Publication {
    /// Stable identifier; derived from immutable fields when the source has none
    #[serde(default)]
    pub id: String,
    pub title: String,
    pub category: String,
    #[serde(default)]
    pub subcategory: String,
    #[serde(default)]
    pub year: u16,
    #[serde(default, rename = "abstract", skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authors: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub journal: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub osdr_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_book_id: Option<String>,
    #[serde(
        default,
        rename = "relatedStudies",
        alias = "relatedIds",
        skip_serializing_if = "Option::is_none"
    )]
    pub related_ids: Option<Vec<String>>,
    #[serde(default, rename = "isViewed", skip_serializing_if = "Option::is_none")]
    pub viewed: Option<bool>,
}

impl Publication {
    /// Fills a missing id and the optional display fields
    ///
    /// Mirrors what the catalogue guarantees, so callers never have to
    /// special-case live versus local records.
    pub fn normalized(mut self) -> Self {
        if self.id.trim().is_empty() {
            self.id = derive_id(&self.title, self.year, self.doi.as_deref());
        }
        if self.summary.as_deref().map_or(true, |s| s.trim().is_empty()) {
            self.summary = Some("No abstract available.".to_string());
        }
        if self.authors.as_ref().map_or(true, |a| a.is_empty()) {
            self.authors = Some(vec!["Unknown Author".to_string()]);
        }
        if self.journal.is_none() {
            self.journal = Some("Unknown Journal".to_string());
        }
        if self.doi.is_none() {
            self.doi = Some("10.0000/unknown".to_string());
        }
        if self.related_ids.is_none() {
            self.related_ids = Some(Vec::new());
        }
        self
    }

    /// Case-insensitive match used by the offline catalogue
    ///
    /// The text matches title or category; the category filter matches the
    /// category. Empty inputs match everything.
    pub fn matches(&self, query: &PublicationQuery) -> bool {
        let text = query.text.trim().to_lowercase();
        let title = self.title.to_lowercase();
        let category = self.category.to_lowercase();

        let matches_text = text.is_empty() || title.contains(&text) || category.contains(&text);
        let matches_category = query
            .category
            .as_deref()
            .map(|c| c.trim().to_lowercase())
            .filter(|c| !c.is_empty())
            .map_or(true, |c| category.contains(&c));

        matches_text && matches_category
    }

    pub fn is_viewed(&self) -> bool {
        self.viewed.unwrap_or(false)
    }
}

/// Derives a stable publication id from immutable fields
///
/// The same title, year and DOI always produce the same id.
pub fn derive_id(title: &str, year: u16, doi: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(title.trim().to_lowercase().as_bytes());
    hasher.update([0x1f]);
    hasher.update(year.to_string().as_bytes());
    hasher.update([0x1f]);
    hasher.update(doi.unwrap_or_default().trim().as_bytes());
    let digest = hasher.finalize();
    format!("pub-{}", &hex::encode(digest)[..16])
}

/// Returns the first `limit` viewed publications
pub fn recently_viewed(publications: &[Publication], limit: usize) -> Vec<Publication> {
    publications
        .iter()
        .filter(|p| p.is_viewed())
        .take(limit)
        .cloned()
        .collect()
}

/// Search text plus optional category filter
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct PublicationQuery {
    pub text: String,
    pub category: Option<String>,
}

impl PublicationQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            category: None,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }
}

impl QueryParams for PublicationQuery {
    fn cache_key(&self) -> String {
        format!(
            "{}_{}",
            normalize_key_part(&self.text),
            normalize_key_part(self.category.as_deref().unwrap_or_default())
        )
    }
}

/// Lookup of a single publication
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct PublicationRef {
    pub id: String,
    /// Title hint given to the generative-text API
    pub title: Option<String>,
}

impl QueryParams for PublicationRef {
    fn cache_key(&self) -> String {
        normalize_key_part(&self.id)
    }
}

/// Lowercases, trims and collapses whitespace to underscores
fn normalize_key_part(part: &str) -> String {
    part.split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join("_")
}

/// Priority of a knowledge gap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Priority {
    High,
    Medium,
    Low,
}

/// An under-researched area
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeGap {
    pub id: String,
    pub title: String,
    pub category: String,
    pub priority: Priority,
    #[serde(default)]
    pub related_publications: u32,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_research: Option<Vec<String>>,
}

/// Connection state of an external data repository
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntegrationStatus {
    Connected,
    Available,
    Error,
}

/// An external data repository the explorer can draw from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataIntegration {
    pub id: String,
    pub name: String,
    pub full_name: String,
    pub description: String,
    pub status: IntegrationStatus,
    #[serde(default)]
    pub datasets: u32,
    #[serde(default)]
    pub last_sync: Option<String>,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_endpoint: Option<String>,
}

/// A short quotation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    #[serde(alias = "_id")]
    pub id: String,
    pub content: String,
    pub author: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Quote {
    /// Author name suitable for display
    pub fn display_author(&self) -> &str {
        let author = self.author.trim();
        if author.is_empty() || author.eq_ignore_ascii_case("unknown") {
            "Anonymous"
        } else {
            author
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn publication(title: &str, category: &str) -> Publication {
        Publication {
            id: String::new(),
            title: title.to_string(),
            category: category.to_string(),
            subcategory: String::new(),
            year: 2020,
            summary: None,
            authors: None,
            journal: None,
            doi: None,
            osdr_id: None,
            task_book_id: None,
            related_ids: None,
            viewed: None,
        }
    }

    #[test]
    fn test_derive_id_is_deterministic() {
        let a = derive_id("Bone loss in microgravity", 2013, Some("10.1234/x"));
        let b = derive_id("Bone loss in microgravity", 2013, Some("10.1234/x"));
        let c = derive_id("Bone loss in microgravity", 2014, Some("10.1234/x"));

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("pub-"));
        assert_eq!(a.len(), "pub-".len() + 16);
    }

    #[test]
    fn test_normalized_fills_missing_fields() {
        let p = publication("Root growth", "Plant biology").normalized();

        assert_eq!(p.id, derive_id("Root growth", 2020, None));
        assert_eq!(p.summary.as_deref(), Some("No abstract available."));
        assert_eq!(p.authors, Some(vec!["Unknown Author".to_string()]));
        assert_eq!(p.journal.as_deref(), Some("Unknown Journal"));
        assert_eq!(p.doi.as_deref(), Some("10.0000/unknown"));
        assert_eq!(p.related_ids, Some(vec![]));
    }

    #[test]
    fn test_normalized_keeps_existing_id() {
        let mut p = publication("Root growth", "Plant biology");
        p.id = "7".to_string();
        assert_eq!(p.normalized().id, "7");
    }

    #[test]
    fn test_matches_text_against_title_and_category() {
        let p = publication("Root growth movements", "Plant biology");

        assert!(p.matches(&PublicationQuery::new("")));
        assert!(p.matches(&PublicationQuery::new("ROOT")));
        assert!(p.matches(&PublicationQuery::new("plant")));
        assert!(!p.matches(&PublicationQuery::new("radiation")));
    }

    #[test]
    fn test_matches_category_filter() {
        let p = publication("Root growth movements", "Plant biology");

        assert!(p.matches(&PublicationQuery::new("root").with_category("plant biology")));
        assert!(!p.matches(&PublicationQuery::new("root").with_category("Bone biology")));
        assert!(p.matches(&PublicationQuery::new("").with_category("  ")));
    }

    #[test]
    fn test_cache_key_normalizes_parameters() {
        let a = PublicationQuery::new("  Bone   Loss ").with_category("Bone biology");
        let b = PublicationQuery::new("bone loss").with_category("BONE BIOLOGY");

        assert_eq!(a.cache_key(), b.cache_key());
        assert_eq!(a.cache_key(), "bone_loss_bone_biology");
        assert_eq!(PublicationQuery::default().cache_key(), "_");
    }

    #[test]
    fn test_publication_deserializes_upstream_field_names() {
        let json = r#"{
            "id": "4",
            "title": "AtRabD2b and AtRabD2c",
            "category": "Plant biology",
            "subcategory": "reproduction",
            "year": 2011,
            "abstract": "Study of Rab GTPases.",
            "relatedStudies": ["6", "7"],
            "osdrId": "OSDR-126",
            "isViewed": true
        }"#;

        let p: Publication = serde_json::from_str(json).unwrap();
        assert_eq!(p.summary.as_deref(), Some("Study of Rab GTPases."));
        assert_eq!(p.related_ids, Some(vec!["6".to_string(), "7".to_string()]));
        assert_eq!(p.osdr_id.as_deref(), Some("OSDR-126"));
        assert!(p.is_viewed());
    }

    #[test]
    fn test_recently_viewed_takes_viewed_only() {
        let mut a = publication("A", "x");
        a.viewed = Some(true);
        let b = publication("B", "x");
        let mut c = publication("C", "x");
        c.viewed = Some(true);

        let recent = recently_viewed(&[a, b, c], 5);
        let titles: Vec<_> = recent.iter().map(|p| p.title.as_str()).collect();
        assert_eq!(titles, vec!["A", "C"]);
    }

    #[test]
    fn test_quote_display_author() {
        let mut quote = Quote {
            id: "q".into(),
            content: "c".into(),
            author: "unknown".into(),
            tags: vec![],
        };
        assert_eq!(quote.display_author(), "Anonymous");
        quote.author = "Carl Sagan".into();
        assert_eq!(quote.display_author(), "Carl Sagan");
    }

    #[test]
    fn test_integration_status_lowercase() {
        let status: IntegrationStatus = serde_json::from_str("\"connected\"").unwrap();
        assert_eq!(status, IntegrationStatus::Connected);
    }
}

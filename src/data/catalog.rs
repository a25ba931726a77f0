//! Offline catalogue used as the fallback for every generative-text domain
//!
//! Bundled into the binary, so it is always available without a network.

use chrono::{Datelike, NaiveDate};
use serde::Deserialize;

use super::{DataIntegration, KnowledgeGap, Publication, PublicationQuery, Quote};
use crate::fetch::SourceError;

const CATALOG_JSON: &str = include_str!("catalog.json");

/// Local publications, gaps, integrations and quotes
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Catalog {
    pub publications: Vec<Publication>,
    pub knowledge_gaps: Vec<KnowledgeGap>,
    pub data_integrations: Vec<DataIntegration>,
    pub quotes: Vec<Quote>,
}

impl Catalog {
    /// Loads the bundled catalogue
    pub fn load() -> Result<Self, SourceError> {
        Self::from_json(CATALOG_JSON)
    }

    pub fn from_json(json: &str) -> Result<Self, SourceError> {
        serde_json::from_str(json)
            .map_err(|e| SourceError::Parse(format!("offline catalogue is corrupt: {}", e)))
    }

    /// Publications matching `query`, with optional fields filled in
    pub fn search(&self, query: &PublicationQuery) -> Vec<Publication> {
        self.publications
            .iter()
            .filter(|p| p.matches(query))
            .cloned()
            .map(Publication::normalized)
            .collect()
    }

    /// A single publication by id
    pub fn publication(&self, id: &str) -> Option<Publication> {
        self.publications
            .iter()
            .find(|p| p.id == id)
            .cloned()
            .map(Publication::normalized)
    }

    /// Picks a quote that stays the same for a whole day
    pub fn quote_for(&self, date: NaiveDate) -> Option<&Quote> {
        if self.quotes.is_empty() {
            return None;
        }
        let index = date.ordinal0() as usize % self.quotes.len();
        self.quotes.get(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundled_catalogue_loads() {
        let catalog = Catalog::load().unwrap();
        assert_eq!(catalog.publications.len(), 10);
        assert_eq!(catalog.knowledge_gaps.len(), 4);
        assert_eq!(catalog.data_integrations.len(), 4);
        assert_eq!(catalog.quotes.len(), 5);
    }

    #[test]
    fn test_catalogue_ids_are_unique() {
        let catalog = Catalog::load().unwrap();
        let mut ids: Vec<_> = catalog.publications.iter().map(|p| &p.id).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), catalog.publications.len());
    }

    #[test]
    fn test_search_filters_by_category() {
        let catalog = Catalog::load().unwrap();
        let results = catalog.search(&PublicationQuery::new("").with_category("Plant biology"));

        assert_eq!(results.len(), 4);
        assert!(results.iter().all(|p| p.category == "Plant biology"));
    }

    #[test]
    fn test_search_matches_title_text() {
        let catalog = Catalog::load().unwrap();
        let results = catalog.search(&PublicationQuery::new("cardiovascular"));

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "8");
    }

    #[test]
    fn test_search_with_no_match_is_empty() {
        let catalog = Catalog::load().unwrap();
        assert!(catalog.search(&PublicationQuery::new("zebrafish")).is_empty());
    }

    #[test]
    fn test_publication_lookup_is_normalized() {
        let catalog = Catalog::load().unwrap();
        let p = catalog.publication("2").unwrap();

        assert_eq!(p.task_book_id, None);
        assert!(p.summary.is_some());
        assert!(catalog.publication("999").is_none());
    }

    #[test]
    fn test_quote_for_is_stable_per_day() {
        let catalog = Catalog::load().unwrap();
        let day = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();

        assert_eq!(catalog.quote_for(day).unwrap().id, "fallback-1");
        assert_eq!(catalog.quote_for(day), catalog.quote_for(day));
        let next = day.succ_opt().unwrap();
        assert_eq!(catalog.quote_for(next).unwrap().id, "fallback-2");
    }

    #[test]
    fn test_corrupt_catalogue_is_parse_error() {
        let err = Catalog::from_json("{").unwrap_err();
        assert!(matches!(err, SourceError::Parse(_)));
    }
}

//! Generative-text API client and the data sources built on it
//!
//! Publication searches, publication details, knowledge gaps and data
//! integrations are all generated by prompting the model for JSON. Each
//! domain is exposed as a `DataSource` whose fallback is the offline catalogue.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::extract::extract_json;
use super::{
    Catalog, DataIntegration, KnowledgeGap, Publication, PublicationQuery, PublicationRef,
};
use crate::config::Config;
use crate::fetch::{DataSource, SourceError};

/// Base URL for the generative-text REST API
const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'a str,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

impl GenerateResponse {
    fn into_text(self) -> Option<String> {
        self.candidates
            .into_iter()
            .next()?
            .content?
            .parts
            .into_iter()
            .next()
            .map(|p| p.text)
            .filter(|t| !t.trim().is_empty())
    }
}

/// Client for the generative-text REST API
#[derive(Debug, Clone)]
pub struct GeminiClient {
    http_client: Client,
    api_key: Option<String>,
    model: String,
    /// Base URL for the API (allows override for testing)
    base_url: String,
}

impl GeminiClient {
    pub fn new(api_key: Option<String>, model: impl Into<String>) -> Self {
        Self {
            http_client: Client::new(),
            api_key,
            model: model.into(),
            base_url: GEMINI_BASE_URL.to_string(),
        }
    }

    /// Client for `config`; offline mode drops the key so every call is unavailable
    pub fn from_config(config: &Config) -> Self {
        let api_key = if config.offline {
            None
        } else {
            config.gemini_api_key.clone()
        };
        Self::new(api_key, config.gemini_model.clone())
    }

    /// Overrides the API base URL
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Fails fast when there are no credentials to call the API with
    pub fn check_available(&self) -> Result<(), SourceError> {
        if self.has_api_key() {
            Ok(())
        } else {
            Err(SourceError::Unavailable("GEMINI_API_KEY is not set".to_string()))
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }

    /// Sends a single-turn prompt and returns the model's text
    pub async fn generate(&self, prompt: &str) -> Result<String, SourceError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| SourceError::Unavailable("GEMINI_API_KEY is not set".to_string()))?;

        let body = GenerateRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![Part { text: prompt }],
            }],
        };

        debug!(model = %self.model, prompt_len = prompt.len(), "generate request");
        let response = self
            .http_client
            .post(self.endpoint())
            .header("x-goog-api-key", api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(SourceError::Upstream {
                status: status.as_u16(),
                message,
            });
        }

        let text = response.text().await?;
        let parsed: GenerateResponse = serde_json::from_str(&text)?;
        parsed
            .into_text()
            .ok_or_else(|| SourceError::Parse("response contained no text".to_string()))
    }
}

/// Drops records whose id was already seen, keeping the first
fn dedupe_by_id(publications: Vec<Publication>) -> Vec<Publication> {
    let mut seen = HashSet::new();
    publications
        .into_iter()
        .filter(|p| seen.insert(p.id.clone()))
        .collect()
}

fn search_prompt(query: &PublicationQuery, limit: usize) -> String {
    format!(
        "Generate {limit} realistic space biology research publications based on the following criteria:\n\
         - Search query: \"{text}\"\n\
         - Category filter: \"{category}\"\n\n\
         Each publication must include: id (string), title, category (one of \"Space biology\", \
         \"Plant biology\", \"Radiation biology\", \"Bone biology\", \"Mechanobiology\", \
         \"Human health\", \"Mars research\", \"COVID-19\"), subcategory, year (2010-2024), \
         abstract (2-3 sentences), authors (2-4 names), journal, doi, optional osdrId, optional \
         taskBookId, relatedStudies (2-3 ids) and isViewed (boolean).\n\n\
         Return only a JSON array of publications.",
        text = query.text.trim(),
        category = query.category.as_deref().unwrap_or_default().trim(),
    )
}

fn details_prompt(reference: &PublicationRef) -> String {
    format!(
        "Generate detailed information for a space biology research publication with:\n\
         - ID: \"{id}\"\n\
         - Title: \"{title}\"\n\n\
         Provide id, title, category, subcategory, year, a 4-5 sentence abstract, authors, \
         journal, doi, osdrId and taskBookId if applicable, and 3-5 relatedStudies ids.\n\n\
         Return only a single JSON object.",
        id = reference.id,
        title = reference.title.as_deref().unwrap_or_default(),
    )
}

const KNOWLEDGE_GAPS_PROMPT: &str = "Identify 8-12 current knowledge gaps in space biology \
research that NASA should prioritize. For each gap provide: id, title, category, priority \
(High/Medium/Low), relatedPublications (count), description, and optional suggestedResearch \
(array of strings). Return only a JSON array.";

const DATA_INTEGRATIONS_PROMPT: &str = "Describe NASA space biology data integration sources \
(NASA OSDR, GeneLab, NASA Task Book, PubMed Central, ESA Life Sciences Data, JAXA Biological \
Research Data). For each provide: id, name, fullName, description, status \
(connected/available/error), datasets (count), lastSync (string or null), url and optional \
apiEndpoint. Return only a JSON array.";

/// Publication search backed by the generative-text API
#[derive(Debug, Clone)]
pub struct PublicationSource {
    client: GeminiClient,
    catalog: Arc<Catalog>,
    limit: usize,
}

impl PublicationSource {
    pub fn new(client: GeminiClient, catalog: Arc<Catalog>, limit: usize) -> Self {
        Self {
            client,
            catalog,
            limit,
        }
    }
}

#[async_trait]
impl DataSource for PublicationSource {
    type Query = PublicationQuery;
    type Output = Vec<Publication>;

    fn name(&self) -> &str {
        "publications"
    }

    async fn probe(&self) -> Result<(), SourceError> {
        self.client.check_available()
    }

    async fn fetch(&self, query: &PublicationQuery) -> Result<Vec<Publication>, SourceError> {
        let text = self.client.generate(&search_prompt(query, self.limit)).await?;
        let publications: Vec<Publication> = extract_json(&text)?;
        Ok(dedupe_by_id(
            publications
                .into_iter()
                .map(Publication::normalized)
                .collect(),
        ))
    }

    fn fallback(&self, query: &PublicationQuery) -> Result<Vec<Publication>, SourceError> {
        Ok(self.catalog.search(query))
    }
}

/// Single publication lookup backed by the generative-text API
#[derive(Debug, Clone)]
pub struct PublicationDetailsSource {
    client: GeminiClient,
    catalog: Arc<Catalog>,
}

impl PublicationDetailsSource {
    pub fn new(client: GeminiClient, catalog: Arc<Catalog>) -> Self {
        Self { client, catalog }
    }
}

#[async_trait]
impl DataSource for PublicationDetailsSource {
    type Query = PublicationRef;
    type Output = Publication;

    fn name(&self) -> &str {
        "publication-details"
    }

    async fn probe(&self) -> Result<(), SourceError> {
        self.client.check_available()
    }

    async fn fetch(&self, reference: &PublicationRef) -> Result<Publication, SourceError> {
        let text = self.client.generate(&details_prompt(reference)).await?;
        let mut publication: Publication = extract_json(&text)?;
        // The caller's id is authoritative
        publication.id = reference.id.clone();
        Ok(publication.normalized())
    }

    fn fallback(&self, reference: &PublicationRef) -> Result<Publication, SourceError> {
        self.catalog
            .publication(&reference.id)
            .ok_or_else(|| SourceError::NotFound("Publication not found".to_string()))
    }
}

/// Knowledge gap listing backed by the generative-text API
#[derive(Debug, Clone)]
pub struct KnowledgeGapSource {
    client: GeminiClient,
    catalog: Arc<Catalog>,
}

impl KnowledgeGapSource {
    pub fn new(client: GeminiClient, catalog: Arc<Catalog>) -> Self {
        Self { client, catalog }
    }
}

#[async_trait]
impl DataSource for KnowledgeGapSource {
    type Query = ();
    type Output = Vec<KnowledgeGap>;

    fn name(&self) -> &str {
        "knowledge-gaps"
    }

    async fn probe(&self) -> Result<(), SourceError> {
        self.client.check_available()
    }

    async fn fetch(&self, _query: &()) -> Result<Vec<KnowledgeGap>, SourceError> {
        let text = self.client.generate(KNOWLEDGE_GAPS_PROMPT).await?;
        Ok(extract_json(&text)?)
    }

    fn fallback(&self, _query: &()) -> Result<Vec<KnowledgeGap>, SourceError> {
        Ok(self.catalog.knowledge_gaps.clone())
    }
}

/// Data integration status backed by the generative-text API
#[derive(Debug, Clone)]
pub struct DataIntegrationSource {
    client: GeminiClient,
    catalog: Arc<Catalog>,
}

impl DataIntegrationSource {
    pub fn new(client: GeminiClient, catalog: Arc<Catalog>) -> Self {
        Self { client, catalog }
    }
}

#[async_trait]
impl DataSource for DataIntegrationSource {
    type Query = ();
    type Output = Vec<DataIntegration>;

    fn name(&self) -> &str {
        "data-integrations"
    }

    async fn probe(&self) -> Result<(), SourceError> {
        self.client.check_available()
    }

    async fn fetch(&self, _query: &()) -> Result<Vec<DataIntegration>, SourceError> {
        let text = self.client.generate(DATA_INTEGRATIONS_PROMPT).await?;
        Ok(extract_json(&text)?)
    }

    fn fallback(&self, _query: &()) -> Result<Vec<DataIntegration>, SourceError> {
        Ok(self.catalog.data_integrations.clone())
    }
}

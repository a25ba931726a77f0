//! Conversational assistant over the generative-text API
//!
//! A session keeps a bounded history and sends it along with each message.
//! When the API is unavailable a keyword-matched canned reply is served and
//! the reply is flagged as degraded.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{GeminiClient, Publication};
use crate::fetch::{FallbackFetcher, FetchError, Fetched, SourceError};

/// Author of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

impl ChatRole {
    fn label(self) -> &'static str {
        match self {
            ChatRole::User => "USER",
            ChatRole::Assistant => "AI",
        }
    }
}

/// A single turn in a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Errors from sending a chat message
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Message is empty")]
    EmptyMessage,

    #[error(transparent)]
    Fetch(#[from] FetchError),
}

/// Publication a session is focused on
#[derive(Debug, Clone, PartialEq)]
struct PublicationContext {
    title: String,
    summary: String,
}

/// A conversation, either general or about one publication
#[derive(Debug, Clone)]
pub struct ChatSession {
    client: GeminiClient,
    context: Option<PublicationContext>,
    history: Vec<ChatMessage>,
    max_history: usize,
}

impl ChatSession {
    /// Open-ended space biology conversation
    pub fn general(client: GeminiClient, max_history: usize) -> Self {
        Self {
            client,
            context: None,
            history: Vec::new(),
            max_history,
        }
    }

    /// Conversation about a single publication, opened with a greeting
    pub fn for_publication(client: GeminiClient, publication: &Publication, max_history: usize) -> Self {
        let mut session = Self {
            client,
            context: Some(PublicationContext {
                title: publication.title.clone(),
                summary: publication.summary.clone().unwrap_or_default(),
            }),
            history: Vec::new(),
            max_history,
        };
        session.push(ChatMessage::new(
            ChatRole::Assistant,
            format!(
                "Hello! I'm ready to discuss \"{}\". Ask me about its findings, methods, knowledge gaps or future applications.",
                publication.title
            ),
        ));
        session
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }

    /// Sends `message` and records both turns
    pub async fn send(
        &mut self,
        fetcher: &FallbackFetcher,
        message: &str,
    ) -> Result<Fetched<ChatMessage>, ChatError> {
        let message = message.trim();
        if message.is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        let prompt = self.prompt(message);
        let fallback = canned_reply(self.context.is_some(), message, &self.history);
        self.push(ChatMessage::new(ChatRole::User, message));

        let client = &self.client;
        let reply = fetcher
            .fetch(
                "chat",
                || client.generate(&prompt),
                || Ok::<_, SourceError>(fallback),
            )
            .await?;

        let reply = reply.map(|text| ChatMessage::new(ChatRole::Assistant, text.trim()));
        self.push(reply.value.clone());
        Ok(reply)
    }

    fn push(&mut self, message: ChatMessage) {
        self.history.push(message);
        if self.history.len() > self.max_history {
            let excess = self.history.len() - self.max_history;
            self.history.drain(..excess);
        }
    }

    fn prompt(&self, message: &str) -> String {
        let history = self
            .history
            .iter()
            .filter(|m| !m.content.trim().is_empty())
            .map(|m| format!("{}: {}", m.role.label(), m.content))
            .collect::<Vec<_>>()
            .join("\n");

        match &self.context {
            Some(ctx) => format!(
                "You are an AI assistant specialized in space biology research. You're discussing the publication:\n\
                 Title: \"{}\"\nAbstract: \"{}\"\n\n\
                 Conversation history:\n{}\n\n\
                 User's current message: \"{}\"\n\n\
                 Provide a helpful, scientifically accurate response about this publication. \
                 Be conversational but informative.",
                ctx.title, ctx.summary, history, message
            ),
            None => format!(
                "You are an AI assistant specialized in NASA space biology research.\n\n\
                 FULL CONVERSATION HISTORY:\n{}\n\n\
                 CURRENT USER MESSAGE: \"{}\"\n\n\
                 Use the conversation history for context, be scientifically accurate and \
                 conversational, and reference NASA research where relevant.",
                history, message
            ),
        }
    }
}

const PUBLICATION_REPLIES: &[(&[&str], &str)] = &[
    (
        &["findings"],
        "The main findings show significant physiological adaptations to microgravity conditions. The study tracked key biomarkers and identified important changes in cellular processes that could impact long-duration spaceflight missions.",
    ),
    (
        &["methods", "methodology"],
        "The research methodology involved controlled experiments with proper statistical analysis. The study design included appropriate controls and followed established protocols for space biology research.",
    ),
    (
        &["gaps"],
        "Key knowledge gaps identified include long-term effects, individual variation in responses, and optimal countermeasure protocols. Further research is needed to address these limitations.",
    ),
    (
        &["future", "applications"],
        "These findings have important implications for future space missions and could inform the development of countermeasures for astronaut health during long-duration flights.",
    ),
];

const PUBLICATION_DEFAULT: &str = "This research contributes valuable insights to our understanding of space biology. Is there a specific aspect you'd like to explore further?";

const GENERAL_REPLIES: &[(&[&str], &str)] = &[
    (
        &["space biology"],
        "Space biology is the study of how living organisms respond to and survive in the space environment. It covers microgravity effects, radiation exposure, and the adaptation of plants, animals and humans to spaceflight.",
    ),
    (
        &["microgravity", "weightless"],
        "Microgravity affects biological systems at cellular and systemic levels. Plants show altered gravitropism, bones lose 1-2% density per month, and postural muscles atrophy.",
    ),
    (
        &["mars", "red planet"],
        "Mars research is critical for future human missions. Key challenges include 38% gravity, radiation from cosmic rays and solar events, isolation, and closed-loop life support.",
    ),
    (
        &["plant", "vegetation", "agriculture"],
        "Plant research in space supports food production, oxygen generation and CO2 removal. Key experiments include VEGGIE and the Advanced Plant Habitat.",
    ),
    (
        &["health", "astronaut"],
        "Human health in space faces bone loss, muscle atrophy, cardiovascular deconditioning, radiation exposure and immune changes. NASA develops exercise, nutrition and monitoring countermeasures.",
    ),
    (
        &["radiation", "cosmic"],
        "Space radiation comes from galactic cosmic rays, solar particle events and trapped belts. Effects include DNA damage and increased cancer risk.",
    ),
    (
        &["bone", "muscle"],
        "Astronauts lose 1-2% bone density per month in weight-bearing bones. Countermeasures include resistive exercise, bisphosphonates and nutritional interventions.",
    ),
];

const GENERAL_DEFAULT: &str = "That's an excellent question about space biology! NASA conducts extensive research on how living organisms adapt to the space environment. Would you like to explore a specific aspect in more detail?";

/// Offline reply chosen by keyword
fn canned_reply(about_publication: bool, message: &str, history: &[ChatMessage]) -> String {
    let lower = message.to_lowercase();
    let (table, default) = if about_publication {
        (PUBLICATION_REPLIES, PUBLICATION_DEFAULT)
    } else {
        (GENERAL_REPLIES, GENERAL_DEFAULT)
    };

    let reply = table
        .iter()
        .find(|(keywords, _)| keywords.iter().any(|k| lower.contains(k)))
        .map_or(default, |&(_, reply)| reply);

    if !about_publication && reply == GENERAL_DEFAULT && history.len() > 2 {
        format!("Building on our conversation: {}", reply)
    } else {
        reply.to_string()
    }
}

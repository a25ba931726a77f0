//! Space biology explorer data layer
//!
//! Expiring cache, fallback-aware fetching, persisted favorites and debounced
//! query coordination over the generative-text and quotes APIs.

pub mod cache;
pub mod cli;
pub mod config;
pub mod data;
pub mod favorites;
pub mod fetch;
pub mod query;
pub mod service;
pub mod storage;

//! Fallback-aware fetching from unreliable upstream services
//!
//! Every upstream is treated the same way: an optional availability probe,
//! a time-bounded primary call, and a local fallback that guarantees a usable
//! answer when the primary is down, slow or returns garbage.

mod fallback;
mod source;

pub use fallback::{FallbackFetcher, FetchError, Fetched};
pub use source::{DataSource, SourceError};

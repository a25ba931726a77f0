//! In-memory response cache with per-entry time-to-live
//!
//! Entries are checked lazily when read, so correctness does not depend on
//! background timers or on the process staying awake for the whole TTL.

mod expiring;

pub use expiring::ExpiringCache;

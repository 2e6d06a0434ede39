//! Deduplicating store for free-text recording submissions.
//!
//! Listens arrive with whatever title, artist credit and release a client
//! happened to send. This crate assigns each distinct triplet (compared
//! case-insensitively) a stable identifier, and maps identifiers back to the
//! stored triplets.
//!
//! # Architecture
//! - [`Database`] owns the SQLite connection pool and runs the embedded
//!   migrations. Create one at startup.
//! - [`Store`] is built from a [`Database`] and exposes the two operations:
//!   [`Store::submit_batch`] (get-or-create, all-or-nothing per batch) and
//!   [`Store::lookup_batch`] (reverse lookup in caller order).
//!
//! A unique index over the case-folded triplet is the only arbiter between
//! concurrent writers. A batch that loses the race is rolled back and retried
//! as a whole, up to [`SubmitConfig::max_attempts`](msid_config::SubmitConfig)
//! times.

mod db;
pub mod error;
mod models;
mod retry;
mod store;

pub use crate::db::Database;
pub use crate::models::{Entry, Submission};
pub use crate::store::Store;

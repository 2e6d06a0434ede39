//! Store Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};
use exn::ResultExt;

/// A store error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Extended SQLite result code for a write attempted from a read snapshot
/// that another connection has since committed over.
const SQLITE_BUSY_SNAPSHOT: &str = "517";

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Connectivity, I/O or SQL failure. Propagated as-is, never retried here.
    #[display("database error")]
    Database,
    #[display("database migration error")]
    Migration,
    /// A submission is missing a required field. Nothing was written; fix the
    /// input before submitting again.
    #[display("bad submission data: {_0}")]
    BadData(#[error(not(source))] &'static str),
    /// Another writer inserted the same triplet first. Absorbed by the retry
    /// loop in [`Store::submit_batch`](crate::Store::submit_batch).
    #[display("lost insert race to a concurrent writer")]
    ConstraintRace,
    /// Every attempt at a batch lost an insert race. Nothing was committed.
    #[display("failed to add submissions after {_0} attempts")]
    ErrorAdding(#[error(not(source))] u32),
    /// A stored row could not be converted into a model.
    #[display("invalid stored data: {_0}")]
    InvalidData(#[error(not(source))] &'static str),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConstraintRace)
    }

    /// Classify a driver error: losing a race for a new triplet is expected,
    /// everything else is a plain database failure.
    pub(crate) fn from_sqlx(err: &sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db) if db.is_unique_violation() => Self::ConstraintRace,
            sqlx::Error::Database(db) if db.code().as_deref() == Some(SQLITE_BUSY_SNAPSHOT) => Self::ConstraintRace,
            _ => Self::Database,
        }
    }
}

/// Raise driver errors into the store's error tree with their classified kind.
pub(crate) trait SqlxResultExt<T> {
    fn or_classify(self) -> Result<T>;
}
impl<T> SqlxResultExt<T> for sqlx::Result<T> {
    #[track_caller]
    fn or_classify(self) -> Result<T> {
        match self {
            Ok(value) => Ok(value),
            Err(err) => {
                let kind = ErrorKind::from_sqlx(&err);
                Err(err).or_raise(|| kind)
            },
        }
    }
}

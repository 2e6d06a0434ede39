//! Get-or-create store for recording submissions.
//!
//! Every distinct (title, artist credit, release) triplet, compared
//! case-insensitively, is assigned exactly one identifier the first time it is
//! seen. Each batch takes SQLite's write lock when its transaction begins, so
//! concurrent batches queue behind one another. The unique index over the
//! case-folded triplet is the final arbiter: a writer that still loses the
//! race has its whole batch rolled back and retried, at which point the
//! lookup finds the winner's row.

use crate::Database;
use crate::error::{ErrorKind, Result, SqlxResultExt};
use crate::models::{Entry, EntryRow, Submission, Triplet, TripletKey};
use crate::retry;
use exn::ResultExt;
use msid_config::SubmitConfig;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use std::collections::{HashMap, HashSet};
use std::num::NonZeroU32;
use tracing::instrument;
use uuid::Uuid;

/// SQLite's default ceiling on bound parameters in a single statement.
const LOOKUP_CHUNK_SIZE: usize = 32_766;
const LOOKUP_BY_IDS: &str = r#"SELECT id, recording, artist_credit, "release" FROM submissions WHERE id IN ("#;

/// Check for an already stored entry before a batch inserts a triplet.
pub(crate) trait Lookup: Sync {
    fn existing(
        &self,
        conn: &mut SqliteConnection,
        key: &TripletKey,
    ) -> impl Future<Output = Result<Option<Entry>>> + Send;
}

/// Lookup by the case-folded triplet, inside the batch's transaction.
struct ByTriplet;
impl Lookup for ByTriplet {
    async fn existing(&self, conn: &mut SqliteConnection, key: &TripletKey) -> Result<Option<Entry>> {
        Store::find_by_key(conn, key).await
    }
}

/// Handle for submitting and looking up recordings.
///
/// Cheap to clone; clones share the underlying connection pool.
#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
    max_attempts: NonZeroU32,
}
impl From<&Database> for Store {
    fn from(db: &Database) -> Self {
        Self::new(db.pool().clone(), &SubmitConfig::default())
    }
}
impl Store {
    pub fn new(pool: SqlitePool, config: &SubmitConfig) -> Self {
        Self { pool, max_attempts: config.max_attempts }
    }

    /// Override how many times a batch is attempted before giving up.
    pub fn with_max_attempts(mut self, max_attempts: NonZeroU32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    // =========================================================================
    // Submit
    // =========================================================================

    /// Assign an identifier to every submission, creating entries for
    /// triplets that have not been seen before.
    ///
    /// Returns one [`Entry`] per submission, in the same order. Submitting the
    /// same triplet twice (in one batch or across batches) returns the same
    /// identifier both times.
    ///
    /// The whole batch runs in a single transaction: either every submission
    /// is stored, or nothing is.
    ///
    /// # Errors
    /// - [`ErrorKind::BadData`] if any submission lacks a title or artist
    ///   credit; checked before touching the database.
    /// - [`ErrorKind::ErrorAdding`] if concurrent writers won the insert race
    ///   on every attempt.
    /// - [`ErrorKind::Database`] for any other database failure.
    #[instrument(skip_all, fields(submissions = submissions.len()))]
    pub async fn submit_batch(&self, submissions: &[Submission]) -> Result<Vec<Entry>> {
        let triplets = submissions.iter().map(Submission::triplet).collect::<Result<Vec<_>>>()?;
        self.submit_with(&triplets, &ByTriplet).await
    }

    async fn submit_with(&self, triplets: &[Triplet<'_>], lookup: &impl Lookup) -> Result<Vec<Entry>> {
        if triplets.is_empty() {
            return Ok(Vec::new());
        }
        retry::with_retries(self.max_attempts, move |_| self.insert_all_in_transaction(triplets, lookup)).await
    }

    async fn insert_all_in_transaction(&self, triplets: &[Triplet<'_>], lookup: &impl Lookup) -> Result<Vec<Entry>> {
        // Take the write lock up front. A deferred transaction that reads
        // first cannot wait for it later: SQLite fails the upgrade with
        // SQLITE_BUSY without consulting the busy timeout.
        let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await.or_classify()?;
        let mut entries = Vec::with_capacity(triplets.len());
        for triplet in triplets {
            entries.push(Self::get_or_create(&mut tx, triplet, lookup).await?);
        }
        // Dropping the transaction without committing rolls it back.
        tx.commit().await.or_classify()?;
        Ok(entries)
    }

    /// Return the entry for a triplet, inserting it if it doesn't exist.
    ///
    /// Racy on its own: a concurrent writer can insert the same triplet
    /// between the lookup and the insert, which fails the insert with
    /// [`ErrorKind::ConstraintRace`] for the caller to retry.
    async fn get_or_create(conn: &mut SqliteConnection, triplet: &Triplet<'_>, lookup: &impl Lookup) -> Result<Entry> {
        let key = triplet.key();
        if let Some(entry) = lookup.existing(&mut *conn, &key).await? {
            return Ok(entry);
        }
        let id = Uuid::new_v4();
        let row: EntryRow = sqlx::query_as(include_str!("../queries/insert_submission.sql"))
            .bind(id.to_string())
            .bind(triplet.recording)
            .bind(triplet.artist_credit)
            .bind(triplet.release)
            .bind(key.recording.as_str())
            .bind(key.artist_credit.as_str())
            .bind(key.release.as_str())
            .fetch_one(&mut *conn)
            .await
            .or_classify()?;
        tracing::debug!(%id, "Created entry for new submission");
        Entry::try_from(row)
    }

    // =========================================================================
    // Get/Fetch
    // =========================================================================

    /// Get the existing entry for a submission's triplet, without creating
    /// one.
    pub async fn find(&self, submission: &Submission) -> Result<Option<Entry>> {
        let key = submission.triplet()?.key();
        Self::find_by_key(&self.pool, &key).await
    }

    async fn find_by_key<'c, E>(executor: E, key: &TripletKey) -> Result<Option<Entry>>
    where
        E: sqlx::Executor<'c, Database = Sqlite>,
    {
        let row: Option<EntryRow> = sqlx::query_as(include_str!("../queries/find_by_triplet.sql"))
            .bind(key.recording.as_str())
            .bind(key.artist_credit.as_str())
            .bind(key.release.as_str())
            .fetch_optional(executor)
            .await
            .or_classify()?;
        row.map(Entry::try_from).transpose()
    }

    /// Get the entries for a list of identifiers.
    ///
    /// The result follows the order of `ids`. Identifiers with no entry are
    /// left out, and an identifier given more than once appears once per
    /// occurrence. The number of queries does not grow with the number of
    /// identifiers.
    #[instrument(skip_all, fields(ids = ids.len()))]
    pub async fn lookup_batch(&self, ids: &[Uuid]) -> Result<Vec<Entry>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut seen = HashSet::with_capacity(ids.len());
        let unique: Vec<&Uuid> = ids.iter().filter(|id| seen.insert(*id)).collect();

        let mut found = HashMap::with_capacity(unique.len());
        for chunk in unique.chunks(LOOKUP_CHUNK_SIZE) {
            let mut query = QueryBuilder::<Sqlite>::new(LOOKUP_BY_IDS);
            let mut separated = query.separated(", ");
            for id in chunk {
                separated.push_bind(id.to_string());
            }
            separated.push_unseparated(")");
            let rows: Vec<EntryRow> = query.build_query_as().fetch_all(&self.pool).await.or_classify()?;
            for row in rows {
                let entry = Entry::try_from(row)?;
                found.insert(entry.id, entry);
            }
        }
        tracing::debug!(requested = unique.len(), found = found.len(), "Looked up entries");

        Ok(ids.iter().filter_map(|id| found.get(id).cloned()).collect())
    }

    // =========================================================================
    // Counts
    // =========================================================================

    /// Count the total number of stored entries.
    pub async fn count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(include_str!("../queries/count_submissions.sql"))
            .fetch_one(&self.pool)
            .await
            .or_classify()?;
        u64::try_from(count).or_raise(|| ErrorKind::InvalidData("entry count"))
    }
}

//! Ordered queue engine
//!
//! Every mutation runs inside one SQLite transaction ([`QueueTx`]). Active
//! entries (no `dequeued_at`) always hold exactly the positions `0..k`.
//! `position` is UNIQUE in the schema, so renumbering moves one row at a time,
//! starting from the end nearest the free slot, and a row that is being moved
//! is first parked on its sentinel position (`-id`).
//!
//! A [`QueueTx`] that has seen a failed mutation refuses to commit, so a
//! partially applied enqueue, move or removal can never persist.
//!
//! Units of work are serialized: [`QueueStore::begin`] waits until the
//! previous [`QueueTx`] is committed or dropped. Every mutation reads before
//! it writes, and SQLite cannot upgrade a deferred read snapshot once another
//! connection has committed. The store assumes it is the only writer to its
//! database file.

pub mod scheduler;
pub mod slug;
pub mod stats;

use jukebox_common::db::{dequeued_position, QueueEntry, Song};
use jukebox_common::{time, Error, Result};
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

pub use scheduler::{FifoPolicy, SchedulingPolicy};
pub use slug::SlugAllocator;
pub use stats::QueueStats;

const ENTRY_SELECT: &str = r#"
    SELECT q.id, q.user_id, q.position, q.slug, q.queued_at, q.dequeued_at, q.started_at,
           s.url, s.title, s.duration, s.thumbnail
    FROM queue q
    JOIN songs s ON s.url = q.song_url
"#;

/// An entry taken off the queue together with what follows it
#[derive(Debug, Clone)]
pub struct DequeuedBatch {
    pub current: QueueEntry,
    pub upcoming: Vec<QueueEntry>,
}

/// Handle on the persistent queue
#[derive(Clone)]
pub struct QueueStore {
    pool: SqlitePool,
    policy: Arc<dyn SchedulingPolicy>,
    slugs: Arc<SlugAllocator>,
    units: Arc<Mutex<()>>,
}

impl QueueStore {
    /// Store with FIFO scheduling and the built-in slug words
    pub fn new(pool: SqlitePool) -> Self {
        Self::with_policy(pool, Arc::new(FifoPolicy), SlugAllocator::new())
    }

    pub fn with_policy(
        pool: SqlitePool,
        policy: Arc<dyn SchedulingPolicy>,
        slugs: SlugAllocator,
    ) -> Self {
        info!("Queue store using '{}' scheduling", policy.name());
        Self {
            pool,
            policy,
            slugs: Arc::new(slugs),
            units: Arc::new(Mutex::new(())),
        }
    }

    /// Start a unit of work, waiting for the one in progress to finish
    ///
    /// Holding a [`QueueTx`] while calling another method of the same store
    /// waits forever.
    pub async fn begin(&self) -> Result<QueueTx<'static>> {
        let turn = Arc::clone(&self.units).lock_owned().await;
        Ok(QueueTx {
            tx: self.pool.begin().await?,
            _turn: turn,
            policy: Arc::clone(&self.policy),
            slugs: Arc::clone(&self.slugs),
            poisoned: false,
        })
    }

    pub async fn enqueue(&self, song: &Song, user_id: &str) -> Result<QueueEntry> {
        let mut tx = self.begin().await?;
        let entry = tx.enqueue(song, user_id).await?;
        tx.commit().await?;
        Ok(entry)
    }

    pub async fn dequeue(&self) -> Result<Option<QueueEntry>> {
        let mut tx = self.begin().await?;
        let entry = tx.dequeue().await?;
        tx.commit().await?;
        Ok(entry)
    }

    /// Dequeue and read the next `upcoming` active entries in one unit of work
    pub async fn dequeue_with_upcoming(&self, upcoming: i64) -> Result<Option<DequeuedBatch>> {
        let mut tx = self.begin().await?;
        let batch = match tx.dequeue().await? {
            Some(current) => Some(DequeuedBatch {
                current,
                upcoming: tx.find_active(upcoming, 0).await?,
            }),
            None => None,
        };
        tx.commit().await?;
        Ok(batch)
    }

    pub async fn move_entry(&self, id: i64, new_position: i64) -> Result<QueueEntry> {
        let mut tx = self.begin().await?;
        let entry = tx.move_entry(id, new_position).await?;
        tx.commit().await?;
        Ok(entry)
    }

    pub async fn remove(&self, id: i64) -> Result<QueueEntry> {
        let mut tx = self.begin().await?;
        let entry = tx.remove(id).await?;
        tx.commit().await?;
        Ok(entry)
    }

    pub async fn swap(&self, id: i64, song: &Song) -> Result<QueueEntry> {
        let mut tx = self.begin().await?;
        let entry = tx.swap(id, song).await?;
        tx.commit().await?;
        Ok(entry)
    }

    pub async fn mark_started(&self, id: i64) -> Result<QueueEntry> {
        let mut tx = self.begin().await?;
        let entry = tx.mark_started(id).await?;
        tx.commit().await?;
        Ok(entry)
    }

    pub async fn purge_user(&self, user_id: &str) -> Result<Vec<QueueEntry>> {
        let mut tx = self.begin().await?;
        let removed = tx.purge_user(user_id).await?;
        tx.commit().await?;
        Ok(removed)
    }

    pub async fn find_by_id(&self, id: i64) -> Result<Option<QueueEntry>> {
        self.begin().await?.find_by_id(id).await
    }

    pub async fn find_by_slug(&self, slug: &str) -> Result<Option<QueueEntry>> {
        self.begin().await?.find_by_slug(slug).await
    }

    pub async fn find_by_user(&self, user_id: &str) -> Result<Vec<QueueEntry>> {
        self.begin().await?.find_by_user(user_id).await
    }

    pub async fn find_active(&self, limit: i64, offset: i64) -> Result<Vec<QueueEntry>> {
        self.begin().await?.find_active(limit, offset).await
    }

    pub async fn count_active(&self) -> Result<i64> {
        self.begin().await?.count_active().await
    }

    pub async fn count_active_by_user(&self, user_id: &str) -> Result<i64> {
        self.begin().await?.count_active_by_user(user_id).await
    }

    pub async fn duration_until(&self, entry: &QueueEntry) -> Result<i64> {
        self.begin().await?.duration_until(entry).await
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        self.begin().await?.stats().await
    }
}

/// One atomic unit of work over the queue
///
/// Dropping without [`commit`](QueueTx::commit) rolls everything back.
pub struct QueueTx<'c> {
    tx: Transaction<'c, Sqlite>,
    policy: Arc<dyn SchedulingPolicy>,
    slugs: Arc<SlugAllocator>,
    poisoned: bool,
    _turn: OwnedMutexGuard<()>,
}

impl<'c> QueueTx<'c> {
    /// Commit the unit of work
    ///
    /// Fails, rolling back, if any mutation inside it failed.
    pub async fn commit(self) -> Result<()> {
        if self.poisoned {
            self.tx.rollback().await?;
            return Err(Error::Internal(
                "Unit of work aborted after a failed mutation".to_string(),
            ));
        }
        self.tx.commit().await?;
        Ok(())
    }

    pub async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }

    fn guard<T>(&mut self, result: Result<T>) -> Result<T> {
        if result.is_err() {
            self.poisoned = true;
        }
        result
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    /// Upsert `song` into the catalog and place a new entry for `user_id`
    /// where the scheduling policy asks
    pub async fn enqueue(&mut self, song: &Song, user_id: &str) -> Result<QueueEntry> {
        let result = self.enqueue_inner(song, user_id).await;
        self.guard(result)
    }

    async fn enqueue_inner(&mut self, song: &Song, user_id: &str) -> Result<QueueEntry> {
        self.upsert_song(song).await?;

        let tail = self.max_position().await?.map_or(0, |max| max + 1);
        let slugs = Arc::clone(&self.slugs);
        let slug = slugs.next_slug(self).await?;

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO queue (user_id, song_url, position, slug, queued_at)
            VALUES (?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(user_id)
        .bind(&song.url)
        .bind(tail)
        .bind(&slug)
        .bind(time::now())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| conflict(e, "enqueue"))?;

        let candidate = self.require(id).await?;
        let policy = Arc::clone(&self.policy);
        let desired = policy.position(self, &candidate).await?;
        if desired < 0 || desired > tail {
            return Err(Error::Validation(format!(
                "Scheduling policy '{}' returned position {} outside [0, {}]",
                policy.name(),
                desired,
                tail
            )));
        }

        if desired != tail {
            self.set_position(id, dequeued_position(id)).await?;
            // Open a slot at `desired`, highest row first
            for p in (desired..tail).rev() {
                self.shift(p, p + 1).await?;
            }
            self.set_position(id, desired).await?;
        }

        let entry = self.require(id).await?;
        policy.on_enqueued(self, &entry).await?;

        info!(
            "Enqueued '{}' as {} (id {}) at position {} for {}",
            entry.title, entry.slug, entry.id, entry.position, entry.user_id
        );
        Ok(entry)
    }

    /// Take the entry at position 0 off the queue
    pub async fn dequeue(&mut self) -> Result<Option<QueueEntry>> {
        let result = self.dequeue_inner().await;
        self.guard(result)
    }

    async fn dequeue_inner(&mut self) -> Result<Option<QueueEntry>> {
        let head: Option<QueueEntry> = sqlx::query_as(&format!(
            "{ENTRY_SELECT} WHERE q.dequeued_at IS NULL AND q.position = 0"
        ))
        .fetch_optional(&mut *self.tx)
        .await?;

        let Some(head) = head else {
            return Ok(None);
        };

        sqlx::query("UPDATE queue SET dequeued_at = ?, position = ? WHERE id = ?")
            .bind(time::now())
            .bind(dequeued_position(head.id))
            .bind(head.id)
            .execute(&mut *self.tx)
            .await?;

        // Close the gap at 0, lowest row first
        let remaining = self.count_active().await?;
        for p in 1..=remaining {
            self.shift(p, p - 1).await?;
        }

        let entry = self.require(head.id).await?;
        let policy = Arc::clone(&self.policy);
        policy.on_dequeued(self, &entry).await?;

        info!("Dequeued '{}' ({}), {} remaining", entry.title, entry.slug, remaining);
        Ok(Some(entry))
    }

    /// Move an active entry to `new_position`, shifting the entries between
    pub async fn move_entry(&mut self, id: i64, new_position: i64) -> Result<QueueEntry> {
        let result = self.move_inner(id, new_position).await;
        self.guard(result)
    }

    async fn move_inner(&mut self, id: i64, new_position: i64) -> Result<QueueEntry> {
        let entry = self.require(id).await?;
        if !entry.is_active() {
            return Err(Error::InvalidState(format!(
                "Entry {} has already been dequeued",
                entry.slug
            )));
        }

        let max = self.max_position().await?.unwrap_or(0);
        if new_position < 0 || new_position > max {
            return Err(Error::Validation(format!(
                "Position {} outside [0, {}]",
                new_position, max
            )));
        }

        let current = entry.position;
        if new_position == current {
            return Ok(entry);
        }

        self.set_position(id, dequeued_position(id)).await?;
        if new_position < current {
            for p in (new_position..current).rev() {
                self.shift(p, p + 1).await?;
            }
        } else {
            for p in current + 1..=new_position {
                self.shift(p, p - 1).await?;
            }
        }
        self.set_position(id, new_position).await?;

        info!("Moved {} from {} to {}", entry.slug, current, new_position);
        self.require(id).await
    }

    /// Delete an entry, active or historical
    pub async fn remove(&mut self, id: i64) -> Result<QueueEntry> {
        let result = self.remove_inner(id).await;
        self.guard(result)
    }

    async fn remove_inner(&mut self, id: i64) -> Result<QueueEntry> {
        let entry = self.require(id).await?;

        sqlx::query("DELETE FROM queue WHERE id = ?")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;

        if entry.is_active() {
            let remaining = self.count_active().await?;
            for p in entry.position + 1..=remaining {
                self.shift(p, p - 1).await?;
            }
        }

        info!("Removed {} (id {})", entry.slug, entry.id);
        Ok(entry)
    }

    /// Point an active entry at different content, keeping its position
    pub async fn swap(&mut self, id: i64, song: &Song) -> Result<QueueEntry> {
        let result = self.swap_inner(id, song).await;
        self.guard(result)
    }

    async fn swap_inner(&mut self, id: i64, song: &Song) -> Result<QueueEntry> {
        let entry = self.require(id).await?;
        if !entry.is_active() {
            return Err(Error::InvalidState(format!(
                "Entry {} has already been dequeued",
                entry.slug
            )));
        }

        self.upsert_song(song).await?;
        sqlx::query("UPDATE queue SET song_url = ? WHERE id = ?")
            .bind(&song.url)
            .bind(id)
            .execute(&mut *self.tx)
            .await?;

        info!("Swapped {} from '{}' to '{}'", entry.slug, entry.title, song.title);
        self.require(id).await
    }

    /// Record the start time of a dequeued entry (once)
    pub async fn mark_started(&mut self, id: i64) -> Result<QueueEntry> {
        let result = self.mark_started_inner(id).await;
        self.guard(result)
    }

    async fn mark_started_inner(&mut self, id: i64) -> Result<QueueEntry> {
        let entry = self.require(id).await?;
        if entry.is_active() {
            return Err(Error::InvalidState(format!(
                "Entry {} has not been dequeued",
                entry.slug
            )));
        }
        if entry.started_at.is_some() {
            return Err(Error::InvalidState(format!(
                "Entry {} already started",
                entry.slug
            )));
        }

        sqlx::query("UPDATE queue SET started_at = ? WHERE id = ? AND started_at IS NULL")
            .bind(time::now())
            .bind(id)
            .execute(&mut *self.tx)
            .await?;

        self.require(id).await
    }

    /// Remove every active entry submitted by `user_id`
    pub async fn purge_user(&mut self, user_id: &str) -> Result<Vec<QueueEntry>> {
        let result = self.purge_user_inner(user_id).await;
        self.guard(result)
    }

    async fn purge_user_inner(&mut self, user_id: &str) -> Result<Vec<QueueEntry>> {
        let mut active: Vec<QueueEntry> = self
            .find_by_user(user_id)
            .await?
            .into_iter()
            .filter(QueueEntry::is_active)
            .collect();
        // Highest first keeps the number of shifted rows down
        active.sort_by(|a, b| b.position.cmp(&a.position));

        let mut removed = Vec::with_capacity(active.len());
        for entry in active {
            removed.push(self.remove_inner(entry.id).await?);
        }

        info!("Purged {} entries for {}", removed.len(), user_id);
        Ok(removed)
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub async fn find_by_id(&mut self, id: i64) -> Result<Option<QueueEntry>> {
        let entry = sqlx::query_as(&format!("{ENTRY_SELECT} WHERE q.id = ?"))
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(entry)
    }

    /// Active entry holding `slug`
    pub async fn find_by_slug(&mut self, slug: &str) -> Result<Option<QueueEntry>> {
        let slug = slug::validate_slug(slug)?;
        let entry = sqlx::query_as(&format!(
            "{ENTRY_SELECT} WHERE q.slug = ? AND q.dequeued_at IS NULL"
        ))
        .bind(slug)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(entry)
    }

    /// Every entry, active or historical, submitted by `user_id`
    pub async fn find_by_user(&mut self, user_id: &str) -> Result<Vec<QueueEntry>> {
        let entries = sqlx::query_as(&format!("{ENTRY_SELECT} WHERE q.user_id = ? ORDER BY q.id"))
            .bind(user_id)
            .fetch_all(&mut *self.tx)
            .await?;
        Ok(entries)
    }

    /// Active entries by ascending position
    pub async fn find_active(&mut self, limit: i64, offset: i64) -> Result<Vec<QueueEntry>> {
        let entries = sqlx::query_as(&format!(
            "{ENTRY_SELECT} WHERE q.dequeued_at IS NULL ORDER BY q.position LIMIT ? OFFSET ?"
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(entries)
    }

    pub async fn count_active(&mut self) -> Result<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM queue WHERE dequeued_at IS NULL")
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(count)
    }

    pub async fn count_active_by_user(&mut self, user_id: &str) -> Result<i64> {
        let count = sqlx::query_scalar(
            "SELECT COUNT(*) FROM queue WHERE dequeued_at IS NULL AND user_id = ?",
        )
        .bind(user_id)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(count)
    }

    /// Highest active position, `None` when the queue is empty
    pub async fn max_position(&mut self) -> Result<Option<i64>> {
        let max = sqlx::query_scalar("SELECT MAX(position) FROM queue WHERE dequeued_at IS NULL")
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(max)
    }

    /// Seconds of content queued ahead of `entry`
    pub async fn duration_until(&mut self, entry: &QueueEntry) -> Result<i64> {
        let total = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(s.duration), 0)
            FROM queue q
            JOIN songs s ON s.url = q.song_url
            WHERE q.dequeued_at IS NULL
              AND q.position < (SELECT position FROM queue WHERE id = ? AND dequeued_at IS NULL)
            "#,
        )
        .bind(entry.id)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(total)
    }

    pub async fn stats(&mut self) -> Result<QueueStats> {
        let (enqueued_count, enqueued_duration_total): (i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*), COALESCE(SUM(s.duration), 0)
            FROM queue q JOIN songs s ON s.url = q.song_url
            WHERE q.dequeued_at IS NULL
            "#,
        )
        .fetch_one(&mut *self.tx)
        .await?;

        let (dequeued_count, dequeued_duration_total): (i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*), COALESCE(SUM(s.duration), 0)
            FROM queue q JOIN songs s ON s.url = q.song_url
            WHERE q.dequeued_at IS NOT NULL
            "#,
        )
        .fetch_one(&mut *self.tx)
        .await?;

        let waits: Vec<(chrono::DateTime<chrono::Utc>, chrono::DateTime<chrono::Utc>)> =
            sqlx::query_as(
                r#"
                SELECT dequeued_at, started_at FROM queue
                WHERE dequeued_at IS NOT NULL AND started_at IS NOT NULL
                "#,
            )
            .fetch_all(&mut *self.tx)
            .await?;
        let samples: Vec<f64> = waits
            .into_iter()
            .map(|(dequeued, started)| time::seconds_between(dequeued, started))
            .collect();
        let (wait_mean_secs, wait_std_dev_secs) = stats::mean_and_std_dev(&samples);

        Ok(QueueStats {
            dequeued_count,
            dequeued_duration_total,
            enqueued_count,
            enqueued_duration_total,
            wait_mean_secs,
            wait_std_dev_secs,
        })
    }

    /// Active slugs equal to `word` or shaped like `word-...`
    pub async fn active_slug_variants(&mut self, word: &str) -> Result<Vec<String>> {
        let slugs = sqlx::query_scalar(
            r#"
            SELECT slug FROM queue
            WHERE dequeued_at IS NULL AND (slug = ? OR slug LIKE ?)
            "#,
        )
        .bind(word)
        .bind(format!("{}-%", word))
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(slugs)
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    async fn require(&mut self, id: i64) -> Result<QueueEntry> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Queue entry {}", id)))
    }

    async fn upsert_song(&mut self, song: &Song) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO songs (url, title, duration, thumbnail)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (url) DO UPDATE SET
                title = excluded.title,
                duration = excluded.duration,
                thumbnail = excluded.thumbnail
            "#,
        )
        .bind(&song.url)
        .bind(&song.title)
        .bind(song.duration)
        .bind(&song.thumbnail)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn set_position(&mut self, id: i64, position: i64) -> Result<()> {
        sqlx::query("UPDATE queue SET position = ? WHERE id = ?")
            .bind(position)
            .bind(id)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| conflict(e, "set position"))?;
        Ok(())
    }

    /// Move the single active row at `from` to `to`; `to` must be free
    async fn shift(&mut self, from: i64, to: i64) -> Result<()> {
        debug!("Shifting position {} -> {}", from, to);
        sqlx::query("UPDATE queue SET position = ? WHERE position = ? AND dequeued_at IS NULL")
            .bind(to)
            .bind(from)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| conflict(e, "shift"))?;
        Ok(())
    }
}

/// Constraint violations surface as validation failures
fn conflict(e: sqlx::Error, operation: &str) -> Error {
    let err = Error::Database(e);
    if err.is_unique_violation() {
        Error::Validation(format!("Conflicting queue state during {}: {}", operation, err))
    } else {
        err
    }
}

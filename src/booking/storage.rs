use crate::booking::types::{Booking, BookingId, BookingStatus, NotificationEvent};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionError,
    TransactionResult,
};
use sled::Transactional;
use tracing::debug;

/// Durable booking records.
///
/// The conditional status updates are the only mutation path after creation. They are
/// the synchronization point between redelivered copies of the same processing
/// message: exactly one caller observes `Some`, every later caller observes `None`.
#[async_trait]
pub trait BookingStore: Send + Sync {
    async fn create(&self, booking: &Booking) -> Result<BookingId>;

    async fn get_by_id(&self, id: BookingId) -> Result<Option<Booking>>;

    /// Moves a `pending` booking to `status`. Returns `None` when the booking is
    /// missing or no longer pending.
    async fn update_status_if_pending(
        &self,
        id: BookingId,
        status: BookingStatus,
        processing_error: Option<String>,
    ) -> Result<Option<Booking>>;

    /// Same transition as `update_status_if_pending`, with `event` queued in the
    /// notification outbox in the same write. Nothing is queued when the booking
    /// was not pending.
    async fn resolve_and_notify(
        &self,
        id: BookingId,
        status: BookingStatus,
        processing_error: Option<String>,
        event: &NotificationEvent,
    ) -> Result<Option<Booking>>;

    /// Outbox entries queued at or before `queued_before`, oldest first
    async fn unsent_notifications(
        &self,
        queued_before: DateTime<Utc>,
    ) -> Result<Vec<NotificationEvent>>;

    /// Drops the outbox entry for `id` once its event reached the broker
    async fn mark_notification_sent(&self, id: BookingId) -> Result<()>;

    /// All bookings, newest first
    async fn list(&self) -> Result<Vec<Booking>>;

    async fn pending_created_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Booking>>;
}

/// Outbox value. Stored as JSON since the event skips absent fields, which bincode
/// cannot read back.
#[derive(Debug, Serialize, Deserialize)]
struct OutboxRecord {
    event: NotificationEvent,
    queued_at: DateTime<Utc>,
}

type TransitionResult = ConflictableTransactionResult<Option<Booking>, anyhow::Error>;

pub struct SledBookingStore {
    db: sled::Db,
    bookings: sled::Tree,
    notification_outbox: sled::Tree,
}

impl SledBookingStore {
    pub fn open(db_path: &str) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = std::path::Path::new(db_path).parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create database directory: {}", parent.display())
            })?;
        }

        let db = sled::open(db_path)
            .with_context(|| format!("Failed to open sled database at: {}", db_path))?;

        let bookings = db
            .open_tree("bookings")
            .context("Failed to open bookings tree")?;
        let notification_outbox = db
            .open_tree("notification_outbox")
            .context("Failed to open notification_outbox tree")?;

        Ok(SledBookingStore {
            db,
            bookings,
            notification_outbox,
        })
    }

    fn decode(value: &[u8]) -> Result<Booking> {
        bincode::deserialize(value).context("Failed to deserialize booking")
    }

    fn scan(&self) -> Result<Vec<Booking>> {
        self.bookings
            .iter()
            .values()
            .map(|value| {
                let value = value.context("Failed to read from bookings tree")?;
                Self::decode(&value)
            })
            .collect()
    }

    /// fsync on the blocking pool so the calling task's worker thread stays free
    async fn flush(&self, after: &str) -> Result<()> {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || db.flush())
            .await
            .context("sled flush task panicked")?
            .with_context(|| format!("Failed to flush sled DB after {after}"))?;
        Ok(())
    }

    /// Pending-only transition of the booking, plus the optional outbox value, in a
    /// single sled transaction over both trees
    async fn transition(
        &self,
        id: BookingId,
        status: BookingStatus,
        processing_error: Option<String>,
        outbox_value: Option<Vec<u8>>,
    ) -> Result<Option<Booking>> {
        if status.is_pending() {
            bail!("Booking {} cannot transition back to pending", id);
        }

        let key: &[u8] = id.as_bytes();
        let result: TransactionResult<Option<Booking>, anyhow::Error> = (
            &self.bookings,
            &self.notification_outbox,
        )
            .transaction(|(bookings, outbox)| -> TransitionResult {
                let Some(current) = bookings.get(key)? else {
                    return Ok(None);
                };

                let mut booking =
                    Self::decode(&current).map_err(ConflictableTransactionError::Abort)?;
                if !booking.status.is_pending() {
                    return Ok(None);
                }

                booking.status = status;
                booking.processing_error = processing_error.clone();
                let next = bincode::serialize(&booking).map_err(|e| {
                    ConflictableTransactionError::Abort(
                        anyhow::Error::from(e).context("Failed to serialize updated booking"),
                    )
                })?;

                bookings.insert(key, next)?;
                if let Some(value) = &outbox_value {
                    outbox.insert(key, value.clone())?;
                }
                Ok(Some(booking))
            });

        let updated = result.map_err(|e| match e {
            TransactionError::Abort(err) => err,
            TransactionError::Storage(err) => {
                anyhow::Error::from(err).context("Failed to update booking")
            }
        })?;

        match &updated {
            Some(_) => {
                self.flush("status update").await?;
                debug!(
                    booking_id = %id,
                    status = %status,
                    notification_queued = outbox_value.is_some(),
                    "Booking status updated"
                );
            }
            None => debug!(booking_id = %id, "Booking missing or already resolved"),
        }
        Ok(updated)
    }
}

#[async_trait]
impl BookingStore for SledBookingStore {
    async fn create(&self, booking: &Booking) -> Result<BookingId> {
        let value = bincode::serialize(booking).context("Failed to serialize booking")?;

        let inserted = self
            .bookings
            .compare_and_swap(booking.id.as_bytes(), None as Option<&[u8]>, Some(value))
            .context("Failed to insert booking")?;
        if inserted.is_err() {
            bail!("Booking {} already exists", booking.id);
        }

        // Durable before the processing request goes out
        self.flush("booking insert").await?;

        debug!(booking_id = %booking.id, "Booking persisted");
        Ok(booking.id)
    }

    async fn get_by_id(&self, id: BookingId) -> Result<Option<Booking>> {
        match self.bookings.get(id.as_bytes())? {
            Some(value) => Ok(Some(Self::decode(&value)?)),
            None => Ok(None),
        }
    }

    async fn update_status_if_pending(
        &self,
        id: BookingId,
        status: BookingStatus,
        processing_error: Option<String>,
    ) -> Result<Option<Booking>> {
        self.transition(id, status, processing_error, None).await
    }

    async fn resolve_and_notify(
        &self,
        id: BookingId,
        status: BookingStatus,
        processing_error: Option<String>,
        event: &NotificationEvent,
    ) -> Result<Option<Booking>> {
        let record = OutboxRecord {
            event: event.clone(),
            queued_at: Utc::now(),
        };
        let value = serde_json::to_vec(&record).context("Failed to serialize notification")?;
        self.transition(id, status, processing_error, Some(value)).await
    }

    async fn unsent_notifications(
        &self,
        queued_before: DateTime<Utc>,
    ) -> Result<Vec<NotificationEvent>> {
        let mut due = Vec::new();

        for value in self.notification_outbox.iter().values() {
            let value = value.context("Failed to read from notification_outbox tree")?;
            let record: OutboxRecord =
                serde_json::from_slice(&value).context("Failed to deserialize notification")?;
            if record.queued_at <= queued_before {
                due.push(record);
            }
        }

        due.sort_by_key(|r| r.queued_at);

        debug!(count = due.len(), "Retrieved unsent notifications");
        Ok(due.into_iter().map(|r| r.event).collect())
    }

    async fn mark_notification_sent(&self, id: BookingId) -> Result<()> {
        let removed = self
            .notification_outbox
            .remove(id.as_bytes())
            .context("Failed to remove notification")?;
        if removed.is_some() {
            self.flush("notification removal").await?;
            debug!(booking_id = %id, "Notification cleared from outbox");
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Booking>> {
        let mut bookings = self.scan()?;
        bookings.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(bookings)
    }

    async fn pending_created_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Booking>> {
        let mut pending: Vec<Booking> = self
            .scan()?
            .into_iter()
            .filter(|b| b.status.is_pending() && b.created_at < cutoff)
            .collect();
        pending.sort_by_key(|b| b.created_at);

        debug!(count = pending.len(), "Retrieved stale pending bookings");
        Ok(pending)
    }
}

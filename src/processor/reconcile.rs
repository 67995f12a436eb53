use crate::booking::{BookingId, BookingStore};
use crate::broker::MessagePublisher;
use crate::ingestion::publish_processing_request;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Re-publishes processing requests for bookings stuck in `pending`.
///
/// Covers the window where ingestion persisted a booking but could not reach the
/// broker. Duplicates are harmless: the processor skips non-pending bookings.
pub struct Reconciler {
    store: Arc<dyn BookingStore>,
    publisher: Arc<dyn MessagePublisher>,
    stale_after: Duration,
    republished: Mutex<HashMap<BookingId, DateTime<Utc>>>,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn BookingStore>,
        publisher: Arc<dyn MessagePublisher>,
        stale_after: Duration,
    ) -> Self {
        Reconciler {
            store,
            publisher,
            stale_after,
            republished: Mutex::new(HashMap::new()),
        }
    }

    pub fn stale_after(&self) -> Duration {
        self.stale_after
    }

    /// Sweeps every `every` until the task is dropped
    pub async fn run(&self, every: Duration) -> Result<()> {
        info!(
            stale_after_secs = self.stale_after.as_secs(),
            "Reconciler started"
        );

        let mut interval = tokio::time::interval(every);

        loop {
            interval.tick().await;

            match self.sweep().await {
                Ok(0) => {}
                Ok(count) => info!(count, "Re-published stale pending bookings"),
                Err(e) => error!("Error in reconciler sweep: {:?}", e),
            }
        }
    }

    /// One pass. A booking is re-published at most once per `stale_after` window.
    pub async fn sweep(&self) -> Result<usize> {
        let now = Utc::now();
        let window = chrono::Duration::from_std(self.stale_after)
            .context("Reconcile window out of range")?;
        let Some(cutoff) = now.checked_sub_signed(window) else {
            debug!("Reconcile window reaches before the earliest timestamp, nothing is stale");
            return Ok(0);
        };
        let stale = self.store.pending_created_before(cutoff).await?;

        let mut republished = self.republished.lock().await;
        republished.retain(|id, _| stale.iter().any(|b| b.id == *id));

        let mut count = 0;
        for booking in &stale {
            if let Some(last) = republished.get(&booking.id) {
                if now - *last < window {
                    debug!(booking_id = %booking.id, "Recently re-published, skipping");
                    continue;
                }
            }

            match publish_processing_request(self.publisher.as_ref(), booking).await {
                Ok(()) => {
                    warn!(
                        booking_id = %booking.id,
                        created_at = %booking.created_at,
                        "Booking still pending, processing request re-published"
                    );
                    republished.insert(booking.id, now);
                    count += 1;
                }
                Err(e) => {
                    // Broker is likely down; the next tick tries again
                    warn!(booking_id = %booking.id, "Failed to re-publish: {:#}", e);
                    break;
                }
            }
        }

        Ok(count)
    }
}

use crate::booking::{BookingStore, NotificationEvent};
use crate::broker::topology::BOOKING_NOTIFICATIONS;
use crate::broker::{Destination, Envelope, MessagePublisher};
use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Publishes a queued outcome and clears its outbox entry. On error the entry stays
/// for [`OutboxRelay`].
pub async fn deliver_notification(
    store: &dyn BookingStore,
    publisher: &dyn MessagePublisher,
    event: &NotificationEvent,
) -> Result<()> {
    publisher
        .publish(
            &Destination::exchange(BOOKING_NOTIFICATIONS),
            Envelope::json(event)?.with_message_id(event.booking_id.to_string()),
        )
        .await
        .context("Failed to publish booking outcome")?;

    store
        .mark_notification_sent(event.booking_id)
        .await
        .context("Failed to clear sent notification")
}

/// Publishes outcomes that were committed but never reached the broker.
///
/// Only entries older than `grace` are picked up, leaving fresh ones to the
/// processor that queued them.
pub struct OutboxRelay {
    store: Arc<dyn BookingStore>,
    publisher: Arc<dyn MessagePublisher>,
    grace: Duration,
}

impl OutboxRelay {
    pub fn new(
        store: Arc<dyn BookingStore>,
        publisher: Arc<dyn MessagePublisher>,
        grace: Duration,
    ) -> Self {
        OutboxRelay {
            store,
            publisher,
            grace,
        }
    }

    /// Drains every `every` until the task is dropped
    pub async fn run(&self, every: Duration) -> Result<()> {
        info!(grace_secs = self.grace.as_secs(), "Outbox relay started");

        let mut interval = tokio::time::interval(every);

        loop {
            interval.tick().await;

            match self.drain().await {
                Ok(0) => {}
                Ok(count) => info!(count, "Published queued booking outcomes"),
                Err(e) => error!("Error in outbox relay: {:?}", e),
            }
        }
    }

    /// One pass over the outbox. Stops at the first publish failure.
    pub async fn drain(&self) -> Result<usize> {
        let grace = chrono::Duration::from_std(self.grace).context("Outbox grace out of range")?;
        let Some(queued_before) = Utc::now().checked_sub_signed(grace) else {
            return Ok(0);
        };

        let due = self.store.unsent_notifications(queued_before).await?;
        debug!(count = due.len(), "Outbox entries due");

        let mut count = 0;
        for event in &due {
            match deliver_notification(self.store.as_ref(), self.publisher.as_ref(), event).await {
                Ok(()) => {
                    info!(
                        booking_id = %event.booking_id,
                        status = %event.status,
                        "Queued booking outcome published"
                    );
                    count += 1;
                }
                Err(e) => {
                    warn!(booking_id = %event.booking_id, "Outbox publish failed: {:#}", e);
                    break;
                }
            }
        }

        Ok(count)
    }
}

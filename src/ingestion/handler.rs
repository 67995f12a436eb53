use crate::booking::{Booking, BookingDraft, BookingStore, ProcessingMessage, ValidationError};
use crate::broker::topology::BOOKING_REQUESTS;
use crate::broker::{Destination, Envelope, MessagePublisher};
use anyhow::{Context, Result};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("failed to persist booking: {0:#}")]
    Store(anyhow::Error),
}

/// Sends the processing request for `booking` to `booking_requests`
pub async fn publish_processing_request(
    publisher: &dyn MessagePublisher,
    booking: &Booking,
) -> Result<()> {
    let envelope = Envelope::json(&ProcessingMessage::from(booking))?
        .with_message_id(booking.id.to_string());

    publisher
        .publish(&Destination::queue(BOOKING_REQUESTS), envelope)
        .await
        .with_context(|| format!("Failed to publish processing request for {}", booking.id))
}

/// Accepts booking requests: persist as `pending`, then hand off for processing
pub struct IngestionHandler {
    store: Arc<dyn BookingStore>,
    publisher: Arc<dyn MessagePublisher>,
}

impl IngestionHandler {
    pub fn new(store: Arc<dyn BookingStore>, publisher: Arc<dyn MessagePublisher>) -> Self {
        IngestionHandler { store, publisher }
    }

    pub fn store(&self) -> &Arc<dyn BookingStore> {
        &self.store
    }

    /// Creates the booking and queues it.
    ///
    /// Only validation and persistence failures surface. Once the booking is stored
    /// it is returned even if the broker is unreachable; the reconciler picks it up.
    pub async fn submit(&self, draft: BookingDraft) -> Result<Booking, IngestError> {
        let booking = Booking::pending(draft.validate()?);

        self.store
            .create(&booking)
            .await
            .map_err(IngestError::Store)?;

        info!(
            booking_id = %booking.id,
            date = %booking.date,
            "Booking persisted as pending"
        );

        match publish_processing_request(self.publisher.as_ref(), &booking).await {
            Ok(()) => info!(booking_id = %booking.id, "Processing request published"),
            Err(e) => warn!(
                booking_id = %booking.id,
                "Processing request not published, left for reconciliation: {:#}",
                e
            ),
        }

        Ok(booking)
    }
}

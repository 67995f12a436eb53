use crate::booking::{BookingId, BookingStatus, BookingStore, NotificationEvent, ProcessingMessage};
use crate::broker::topology::BOOKING_RETRY;
use crate::broker::{Destination, Envelope, MessageHandler, MessagePublisher, Outcome};
use crate::processor::decision::{AvailabilityPolicy, ProcessingDelay};
use crate::processor::outbox::deliver_notification;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    /// Retry-queue round trips before a failing request is resolved as rejected
    pub max_retries: u32,
    pub delay: ProcessingDelay,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        ProcessorSettings {
            max_retries: 3,
            delay: ProcessingDelay::between_ms(2000, 5000),
        }
    }
}

/// How a processing request was resolved without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// This delivery moved the booking out of `pending`
    Committed(BookingStatus),
    /// No booking with that id; it cannot appear later
    NotFound,
    /// Booking was already resolved before this delivery looked at it
    AlreadyProcessed(BookingStatus),
    /// Another delivery resolved the booking while this one was deciding
    LostRace,
}

/// Consumes `booking_requests`.
///
/// Per delivery: parse, look up, skip unless `pending`, decide, wait out the
/// processing delay, commit together with the outcome's outbox entry, publish the
/// outcome. Failures go to `booking_retry` until `max_retries` is reached, after
/// which the booking is rejected with the error attached. Every delivery ends acknowledged except when
/// the retry publish itself fails.
pub struct BookingProcessor {
    store: Arc<dyn BookingStore>,
    publisher: Arc<dyn MessagePublisher>,
    policy: Arc<dyn AvailabilityPolicy>,
    settings: ProcessorSettings,
}

impl BookingProcessor {
    pub fn new(
        store: Arc<dyn BookingStore>,
        publisher: Arc<dyn MessagePublisher>,
        policy: Arc<dyn AvailabilityPolicy>,
        settings: ProcessorSettings,
    ) -> Self {
        BookingProcessor {
            store,
            publisher,
            policy,
            settings,
        }
    }

    pub async fn process(&self, message: &Envelope) -> Result<Disposition> {
        let request: ProcessingMessage = serde_json::from_slice(&message.payload)
            .context("Malformed processing message")?;
        let booking_id = request.id;

        info!(
            booking_id = %booking_id,
            retry_count = message.retry_count,
            "Processing booking request"
        );

        let Some(booking) = self.store.get_by_id(booking_id).await? else {
            warn!(booking_id = %booking_id, "Booking not found, dropping request");
            return Ok(Disposition::NotFound);
        };

        if !booking.status.is_pending() {
            warn!(
                booking_id = %booking_id,
                status = %booking.status,
                "Booking already processed, skipping redelivery"
            );
            return Ok(Disposition::AlreadyProcessed(booking.status));
        }

        let decision = self
            .policy
            .decide(&booking)
            .await
            .context("Availability decision failed")?;

        let delay = self.settings.delay.sample();
        if !delay.is_zero() {
            info!(booking_id = %booking_id, delay_ms = delay.as_millis() as u64, "Simulating processing delay");
            tokio::time::sleep(delay).await;
        }

        let event = NotificationEvent {
            status: decision,
            ..NotificationEvent::outcome(&booking)
        };
        if self
            .store
            .resolve_and_notify(booking_id, decision, None, &event)
            .await
            .context("Failed to commit booking decision")?
            .is_none()
        {
            warn!(booking_id = %booking_id, "Booking resolved concurrently by another delivery");
            return Ok(Disposition::LostRace);
        }

        info!(booking_id = %booking_id, status = %decision, "Booking resolved");
        self.announce(&event).await;
        Ok(Disposition::Committed(decision))
    }

    /// The outcome is already in the outbox, so a failed publish is left to the relay
    async fn announce(&self, event: &NotificationEvent) {
        if let Err(e) =
            deliver_notification(self.store.as_ref(), self.publisher.as_ref(), event).await
        {
            warn!(
                booking_id = %event.booking_id,
                error = %format!("{e:#}"),
                "Booking outcome left in the outbox"
            );
        }
    }

    async fn handle_failure(&self, message: &Envelope, err: anyhow::Error) -> Outcome {
        let retry_count = message.retry_count;

        if retry_count < self.settings.max_retries {
            warn!(
                retry_count,
                max_retries = self.settings.max_retries,
                error = %format!("{err:#}"),
                "Booking request failed, scheduling retry {}/{}",
                retry_count + 1,
                self.settings.max_retries
            );

            return match self
                .publisher
                .publish(&Destination::queue(BOOKING_RETRY), message.retried())
                .await
            {
                Ok(()) => Outcome::Ack,
                Err(publish_err) => {
                    error!(
                        error = %format!("{publish_err:#}"),
                        "Could not park request on the retry queue, handing it back"
                    );
                    Outcome::Retry
                }
            };
        }

        error!(
            retry_count,
            error = %format!("{err:#}"),
            "Max retries reached, rejecting booking"
        );
        self.fail_terminally(message, &err).await;
        Outcome::Ack
    }

    /// Best effort: the message is acknowledged whatever happens here
    async fn fail_terminally(&self, message: &Envelope, err: &anyhow::Error) {
        let Some(booking_id) = booking_id_of(message) else {
            error!(payload = %message.payload_str(), "Unidentifiable request dropped");
            return;
        };

        let attempts = message.retry_count + 1;
        let event = NotificationEvent::terminal_failure(
            booking_id,
            format!("processing failed after {attempts} attempts"),
        );

        match self
            .store
            .resolve_and_notify(
                booking_id,
                BookingStatus::Rejected,
                Some(format!("{err:#}")),
                &event,
            )
            .await
        {
            Ok(Some(_)) => self.announce(&event).await,
            Ok(None) => {
                warn!(booking_id = %booking_id, "Booking missing or already resolved, nothing to reject");
            }
            Err(update_err) => {
                error!(
                    booking_id = %booking_id,
                    error = %format!("{update_err:#}"),
                    "Failed to mark booking as rejected"
                );
            }
        }
    }
}

/// Pulls the booking id out of a payload that may not parse as a full request
fn booking_id_of(message: &Envelope) -> Option<BookingId> {
    if let Ok(request) = serde_json::from_slice::<ProcessingMessage>(&message.payload) {
        return Some(request.id);
    }
    let value: serde_json::Value = serde_json::from_slice(&message.payload).ok()?;
    value
        .get("id")
        .or_else(|| value.get("_id"))
        .and_then(|id| id.as_str())
        .and_then(|id| id.parse().ok())
}

#[async_trait]
impl MessageHandler for BookingProcessor {
    async fn handle(&self, message: &Envelope) -> Outcome {
        match self.process(message).await {
            Ok(_) => Outcome::Ack,
            Err(err) => self.handle_failure(message, err).await,
        }
    }
}

use crate::booking::NotificationEvent;
use crate::broker::topology::NotificationQueues;
use crate::broker::{Destination, Envelope, MessageHandler, MessagePublisher, Outcome};
use crate::notifier::delivery::NotificationChannel;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Consumes one notification queue bound to `booking_notifications`.
///
/// A failed delivery is parked on the group's retry queue at most `max_retries`
/// times. After that, and for payloads that do not parse at all, the message is
/// rejected without requeue so the broker moves it to the dead-letter queue.
pub struct NotificationWorker {
    channel: Arc<dyn NotificationChannel>,
    publisher: Arc<dyn MessagePublisher>,
    queues: NotificationQueues,
    max_retries: u32,
}

impl NotificationWorker {
    pub fn new(
        channel: Arc<dyn NotificationChannel>,
        publisher: Arc<dyn MessagePublisher>,
        queues: NotificationQueues,
        max_retries: u32,
    ) -> Self {
        NotificationWorker {
            channel,
            publisher,
            queues,
            max_retries,
        }
    }

    pub fn queues(&self) -> &NotificationQueues {
        &self.queues
    }
}

#[async_trait]
impl MessageHandler for NotificationWorker {
    async fn handle(&self, message: &Envelope) -> Outcome {
        let event: NotificationEvent = match serde_json::from_slice(&message.payload) {
            Ok(event) => event,
            Err(e) => {
                error!(
                    queue = %self.queues.queue,
                    payload = %message.payload_str(),
                    "Unreadable notification, dead-lettering: {}",
                    e
                );
                return Outcome::Reject;
            }
        };

        info!(
            booking_id = %event.booking_id,
            status = %event.status,
            retry_count = message.retry_count,
            "Notification received"
        );

        let err = match self.channel.deliver(&event).await {
            Ok(()) => return Outcome::Ack,
            Err(err) => err,
        };

        if message.retry_count >= self.max_retries {
            error!(
                booking_id = %event.booking_id,
                retry_count = message.retry_count,
                "Notification undeliverable, dead-lettering: {:#}",
                err
            );
            return Outcome::Reject;
        }

        warn!(
            booking_id = %event.booking_id,
            "Delivery failed, scheduling retry {}/{}: {:#}",
            message.retry_count + 1,
            self.max_retries,
            err
        );

        match self
            .publisher
            .publish(&Destination::queue(&self.queues.retry_queue), message.retried())
            .await
        {
            Ok(()) => Outcome::Ack,
            Err(publish_err) => {
                error!(
                    booking_id = %event.booking_id,
                    "Could not park notification on {}, handing it back: {:#}",
                    self.queues.retry_queue,
                    publish_err
                );
                Outcome::Retry
            }
        }
    }
}

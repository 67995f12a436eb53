use crate::broker::connection::{BrokerManager, Connector};
use crate::broker::types::{Envelope, MessageHandler, Outcome};
use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Settles one delivery with the broker
#[async_trait]
pub trait Acker: Send + Sync {
    async fn ack(&self) -> Result<()>;

    /// Negative acknowledgement; the broker redelivers the message
    async fn requeue(&self) -> Result<()>;

    /// Negative acknowledgement without requeue; the queue's dead-letter route applies
    async fn discard(&self) -> Result<()>;
}

pub struct Delivery {
    pub envelope: Envelope,
    pub acker: Box<dyn Acker>,
}

pub type DeliveryStream = BoxStream<'static, Result<Delivery>>;

/// A link that can subscribe to a queue
#[async_trait]
pub trait Subscribe: Send + Sync {
    /// The stream ends when the subscription or the link behind it goes away
    async fn subscribe(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream>;
}

/// Applies a handler's verdict to the delivery it was given
pub async fn settle(acker: &dyn Acker, outcome: Outcome) -> Result<()> {
    match outcome {
        Outcome::Ack => acker.ack().await,
        Outcome::Retry => acker.requeue().await,
        Outcome::Reject => acker.discard().await,
    }
}

/// Consumes `queue` forever, one delivery at a time.
///
/// Every delivery goes through `handler`, whose [`Outcome`] is applied before the
/// next one is taken. When the stream ends the link is reported lost and the loop
/// re-subscribes on the next session.
pub async fn consume<C, H>(
    manager: Arc<BrokerManager<C>>,
    queue: &str,
    handler: Arc<H>,
) -> Result<()>
where
    C: Connector,
    C::Link: Subscribe,
    H: MessageHandler + ?Sized,
{
    let consumer_tag = format!("{queue}-{}", uuid::Uuid::new_v4());
    let reconnect_delay = manager.policy().reconnect_delay;

    loop {
        let session = match manager.connect().await {
            Ok(session) => session,
            Err(err) => {
                error!(queue, error = %format!("{err:#}"), "Cannot consume without a broker link");
                tokio::time::sleep(reconnect_delay).await;
                continue;
            }
        };

        let mut deliveries = match session.link.subscribe(queue, &consumer_tag).await {
            Ok(deliveries) => deliveries,
            Err(err) => {
                warn!(queue, error = %format!("{err:#}"), "Subscription failed");
                manager.mark_lost(session.generation, "subscription failed");
                tokio::time::sleep(reconnect_delay).await;
                continue;
            }
        };

        info!(queue, generation = session.generation, "Consuming");

        while let Some(delivery) = deliveries.next().await {
            let delivery = match delivery {
                Ok(delivery) => delivery,
                Err(err) => {
                    warn!(queue, error = %format!("{err:#}"), "Delivery stream failed");
                    break;
                }
            };

            let outcome = handler.handle(&delivery.envelope).await;

            if let Err(err) = settle(delivery.acker.as_ref(), outcome).await {
                // Unsettled deliveries go back to the queue when the channel closes
                warn!(queue, error = %format!("{err:#}"), ?outcome, "Failed to settle delivery");
                break;
            }
        }

        manager.mark_lost(session.generation, "consumer stream ended");
        tokio::time::sleep(reconnect_delay).await;
    }
}

use crate::booking::{BookingStore, SledBookingStore};
use crate::broker::amqp::{AmqpConnector, AmqpManager, AmqpPublisher};
use crate::broker::topology::{Topology, BOOKING_REQUESTS};
use crate::broker::{consume, BrokerManager, MessagePublisher};
use crate::config::Config;
use crate::ingestion::{api, IngestionHandler};
use crate::notifier::{NotificationWorker, SimulatedEmail};
use crate::processor::{BookingProcessor, OutboxRelay, RandomAvailability, Reconciler};
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

const OUTBOX_RELAY_INTERVAL: Duration = Duration::from_secs(2);
/// Outcomes younger than this are still the processor's to publish
const OUTBOX_GRACE: Duration = Duration::from_secs(5);

/// Opens a broker connection for one component. Exhausting the connect attempts
/// at startup is fatal.
async fn connected_manager(config: &Config, topology: Topology) -> Result<Arc<AmqpManager>> {
    let manager = BrokerManager::new(
        AmqpConnector::new(config.amqp_url.clone(), topology),
        config.reconnect.clone(),
    )?;
    manager
        .connect()
        .await
        .context("Could not reach the broker at startup")?;
    Ok(manager)
}

/// HTTP API, booking processors, the outbox relay and the reconciliation sweep in one
/// process
pub async fn run_server(config: Config) -> Result<()> {
    info!(
        store_path = %config.store_path,
        workers = config.workers,
        "Starting booking server"
    );

    let store: Arc<dyn BookingStore> = Arc::new(
        SledBookingStore::open(&config.store_path).context("Failed to open booking store")?,
    );

    let api_manager = connected_manager(&config, Topology::booking()).await?;
    let api_publisher: Arc<dyn MessagePublisher> = Arc::new(AmqpPublisher::new(api_manager));
    let handler = Arc::new(IngestionHandler::new(store.clone(), api_publisher.clone()));

    for worker in 0..config.workers {
        let manager = connected_manager(&config, Topology::booking()).await?;
        let processor = Arc::new(BookingProcessor::new(
            store.clone(),
            Arc::new(AmqpPublisher::new(manager.clone())),
            Arc::new(RandomAvailability::new(config.confirm_probability)),
            config.processor_settings(),
        ));

        tokio::spawn(async move {
            info!(worker, "Booking processor started");
            if let Err(e) = consume(manager, BOOKING_REQUESTS, processor).await {
                error!(worker, "Booking processor stopped: {:?}", e);
            }
        });
    }

    let relay = OutboxRelay::new(store.clone(), api_publisher.clone(), OUTBOX_GRACE);
    tokio::spawn(async move {
        if let Err(e) = relay.run(OUTBOX_RELAY_INTERVAL).await {
            error!("Outbox relay stopped: {:?}", e);
        }
    });

    if let Some(stale_after) = config.reconcile_after {
        let reconciler = Reconciler::new(store.clone(), api_publisher, stale_after);
        tokio::spawn(async move {
            // Sweep a few times per window so a booking never waits much past it
            let every = (reconciler.stale_after() / 4).max(Duration::from_secs(1));
            if let Err(e) = reconciler.run(every).await {
                error!("Reconciler stopped: {:?}", e);
            }
        });
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));

    tokio::select! {
        _ = api::serve(handler, addr) => {}
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for shutdown signal")?;
            info!("Shutdown signal received, stopping server");
        }
    }

    Ok(())
}

/// Notification fanout consumer
pub async fn run_notifier(config: Config) -> Result<()> {
    let queues = config.notification_queues();
    info!(queue = %queues.queue, "Starting notification worker");

    let manager = connected_manager(
        &config,
        Topology::booking().with_notification_consumer(&queues),
    )
    .await?;

    let worker = Arc::new(NotificationWorker::new(
        Arc::new(SimulatedEmail::new(config.email_latency)),
        Arc::new(AmqpPublisher::new(manager.clone())),
        queues.clone(),
        config.max_retries,
    ));

    tokio::select! {
        result = consume(manager, &queues.queue, worker) => {
            result.context("Notification consumer stopped")?;
        }
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for shutdown signal")?;
            info!("Shutdown signal received, stopping notifier");
        }
    }

    Ok(())
}

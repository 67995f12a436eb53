// End-to-end pipeline run against the in-process broker: ingestion → processor →
// fanout → notifier, moving messages between components by hand.

use booking_pipeline::booking::{BookingDraft, BookingStatus, BookingStore, SledBookingStore};
use booking_pipeline::broker::memory::MemoryBroker;
use booking_pipeline::broker::topology::{
    NotificationQueues, BOOKING_NOTIFICATIONS, BOOKING_REQUESTS, BOOKING_RETRY,
};
use booking_pipeline::broker::{Destination, MessageHandler, Outcome};
use booking_pipeline::ingestion::IngestionHandler;
use booking_pipeline::notifier::{NotificationWorker, SimulatedEmail};
use booking_pipeline::processor::{
    BookingProcessor, FixedAvailability, OutboxRelay, ProcessingDelay, ProcessorSettings,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn draft(name: &str) -> BookingDraft {
    BookingDraft {
        patient_name: Some(name.to_string()),
        patient_email: Some(format!("{}@example.com", name.to_lowercase())),
        date: Some("2026-11-20T10:00:00Z".to_string()),
    }
}

struct Pipeline {
    store: Arc<SledBookingStore>,
    broker: MemoryBroker,
    ingestion: IngestionHandler,
    processor: BookingProcessor,
    notifier: NotificationWorker,
    _temp_dir: TempDir,
}

fn pipeline(decision: BookingStatus) -> Pipeline {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("bookings.db");
    let store = Arc::new(SledBookingStore::open(db_path.to_str().unwrap()).unwrap());
    let broker = MemoryBroker::new();

    let ingestion = IngestionHandler::new(store.clone(), Arc::new(broker.clone()));
    let processor = BookingProcessor::new(
        store.clone(),
        Arc::new(broker.clone()),
        Arc::new(FixedAvailability(decision)),
        ProcessorSettings {
            max_retries: 3,
            delay: ProcessingDelay::none(),
        },
    );
    let notifier = NotificationWorker::new(
        Arc::new(SimulatedEmail::new(Duration::ZERO)),
        Arc::new(broker.clone()),
        NotificationQueues::named("email_notifications"),
        3,
    );

    Pipeline {
        store,
        broker,
        ingestion,
        processor,
        notifier,
        _temp_dir: temp_dir,
    }
}

#[tokio::test]
async fn test_booking_flows_from_request_to_notification() {
    let p = pipeline(BookingStatus::Confirmed);

    let booking = p.ingestion.submit(draft("Ines")).await.unwrap();
    assert_eq!(booking.status, BookingStatus::Pending);

    let requests = p.broker.take(&Destination::queue(BOOKING_REQUESTS));
    assert_eq!(requests.len(), 1);
    assert_eq!(p.processor.handle(&requests[0]).await, Outcome::Ack);

    let stored = p.store.get_by_id(booking.id).await.unwrap().unwrap();
    assert_eq!(stored.status, BookingStatus::Confirmed);

    let events = p.broker.take(&Destination::exchange(BOOKING_NOTIFICATIONS));
    assert_eq!(events.len(), 1);
    assert_eq!(p.notifier.handle(&events[0]).await, Outcome::Ack);

    assert!(p.broker.is_empty());
}

#[tokio::test]
async fn test_duplicate_delivery_yields_single_notification() {
    let p = pipeline(BookingStatus::Rejected);

    let booking = p.ingestion.submit(draft("Omar")).await.unwrap();
    let request = p
        .broker
        .take(&Destination::queue(BOOKING_REQUESTS))
        .remove(0);

    // At-least-once: the broker hands the same request over three times
    for _ in 0..3 {
        assert_eq!(p.processor.handle(&request).await, Outcome::Ack);
    }

    let stored = p.store.get_by_id(booking.id).await.unwrap().unwrap();
    assert_eq!(stored.status, BookingStatus::Rejected);
    assert_eq!(
        p.broker
            .published_to(&Destination::exchange(BOOKING_NOTIFICATIONS))
            .len(),
        1
    );
    assert!(p.broker.published_to(&Destination::queue(BOOKING_RETRY)).is_empty());
}

#[tokio::test]
async fn test_many_bookings_resolve_independently() {
    let p = pipeline(BookingStatus::Confirmed);

    let mut ids = Vec::new();
    for name in ["Ana", "Ben", "Cai", "Dee"] {
        ids.push(p.ingestion.submit(draft(name)).await.unwrap().id);
    }

    for request in p.broker.take(&Destination::queue(BOOKING_REQUESTS)) {
        assert_eq!(p.processor.handle(&request).await, Outcome::Ack);
    }

    for id in &ids {
        let stored = p.store.get_by_id(*id).await.unwrap().unwrap();
        assert_eq!(stored.status, BookingStatus::Confirmed);
    }
    assert_eq!(
        p.broker
            .take(&Destination::exchange(BOOKING_NOTIFICATIONS))
            .len(),
        ids.len()
    );
    assert_eq!(p.store.list().await.unwrap().len(), ids.len());
}

#[tokio::test]
async fn test_outcome_reaches_notifier_after_fanout_outage() {
    let p = pipeline(BookingStatus::Confirmed);
    let relay = OutboxRelay::new(p.store.clone(), Arc::new(p.broker.clone()), Duration::ZERO);

    let booking = p.ingestion.submit(draft("Yara")).await.unwrap();
    let request = p
        .broker
        .take(&Destination::queue(BOOKING_REQUESTS))
        .remove(0);

    let fanout = Destination::exchange(BOOKING_NOTIFICATIONS);
    p.broker.fail_destination(fanout.clone());
    assert_eq!(p.processor.handle(&request).await, Outcome::Ack);
    assert_eq!(relay.drain().await.unwrap(), 0);

    let stored = p.store.get_by_id(booking.id).await.unwrap().unwrap();
    assert_eq!(stored.status, BookingStatus::Confirmed);
    assert!(p.broker.is_empty());

    p.broker.heal();
    assert_eq!(relay.drain().await.unwrap(), 1);
    assert_eq!(relay.drain().await.unwrap(), 0);

    let events = p.broker.take(&fanout);
    assert_eq!(events.len(), 1);
    assert_eq!(p.notifier.handle(&events[0]).await, Outcome::Ack);
    assert!(p.broker.is_empty());
}

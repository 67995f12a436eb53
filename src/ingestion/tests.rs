use super::api::routes;
use super::*;
use crate::booking::{
    Booking, BookingDraft, BookingId, BookingStatus, BookingStore, NotificationEvent,
    ProcessingMessage, SledBookingStore,
};
use crate::broker::memory::MemoryBroker;
use crate::broker::topology::BOOKING_REQUESTS;
use crate::broker::Destination;
use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tempfile::TempDir;
use warp::http::StatusCode;

fn create_test_store() -> (TempDir, Arc<SledBookingStore>) {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("bookings.db");
    let store = Arc::new(SledBookingStore::open(db_path.to_str().unwrap()).unwrap());
    (temp_dir, store)
}

fn draft() -> BookingDraft {
    BookingDraft {
        patient_name: Some("Lin".to_string()),
        patient_email: Some("lin@example.com".to_string()),
        date: Some("2026-07-01T08:15:00Z".to_string()),
    }
}

/// Store whose disk is gone
struct BrokenStore;

#[async_trait]
impl BookingStore for BrokenStore {
    async fn create(&self, _booking: &Booking) -> Result<BookingId> {
        bail!("disk full")
    }

    async fn get_by_id(&self, _id: BookingId) -> Result<Option<Booking>> {
        bail!("disk full")
    }

    async fn update_status_if_pending(
        &self,
        _id: BookingId,
        _status: BookingStatus,
        _processing_error: Option<String>,
    ) -> Result<Option<Booking>> {
        bail!("disk full")
    }

    async fn resolve_and_notify(
        &self,
        _id: BookingId,
        _status: BookingStatus,
        _processing_error: Option<String>,
        _event: &NotificationEvent,
    ) -> Result<Option<Booking>> {
        bail!("disk full")
    }

    async fn unsent_notifications(
        &self,
        _queued_before: DateTime<Utc>,
    ) -> Result<Vec<NotificationEvent>> {
        bail!("disk full")
    }

    async fn mark_notification_sent(&self, _id: BookingId) -> Result<()> {
        bail!("disk full")
    }

    async fn list(&self) -> Result<Vec<Booking>> {
        bail!("disk full")
    }

    async fn pending_created_before(&self, _cutoff: DateTime<Utc>) -> Result<Vec<Booking>> {
        bail!("disk full")
    }
}

#[tokio::test]
async fn test_submit_persists_pending_and_publishes_request() {
    let (_temp_dir, store) = create_test_store();
    let broker = MemoryBroker::new();
    let handler = IngestionHandler::new(store.clone(), Arc::new(broker.clone()));

    let booking = handler.submit(draft()).await.unwrap();

    assert_eq!(booking.status, BookingStatus::Pending);
    let stored = store.get_by_id(booking.id).await.unwrap().unwrap();
    assert_eq!(stored, booking);

    let requests = broker.take(&Destination::queue(BOOKING_REQUESTS));
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].retry_count, 0);
    assert_eq!(requests[0].message_id, Some(booking.id.to_string()));
    let message: ProcessingMessage = serde_json::from_slice(&requests[0].payload).unwrap();
    assert_eq!(message, ProcessingMessage::from(&booking));
    assert!(broker.is_empty());
}

#[tokio::test]
async fn test_submit_rejects_invalid_draft_without_side_effects() {
    let (_temp_dir, store) = create_test_store();
    let broker = MemoryBroker::new();
    let handler = IngestionHandler::new(store.clone(), Arc::new(broker.clone()));

    let err = handler
        .submit(BookingDraft {
            patient_email: None,
            ..draft()
        })
        .await
        .unwrap_err();

    assert!(matches!(err, IngestError::Validation(_)));
    assert!(store.list().await.unwrap().is_empty());
    assert!(broker.is_empty());
}

#[tokio::test]
async fn test_submit_survives_broker_outage() {
    let (_temp_dir, store) = create_test_store();
    let broker = MemoryBroker::new();
    broker.fail_destination(Destination::queue(BOOKING_REQUESTS));
    let handler = IngestionHandler::new(store.clone(), Arc::new(broker.clone()));

    let booking = handler.submit(draft()).await.unwrap();

    let stored = store.get_by_id(booking.id).await.unwrap().unwrap();
    assert_eq!(stored.status, BookingStatus::Pending);
    assert!(broker.is_empty());
}

#[tokio::test]
async fn test_submit_reports_store_failure() {
    let broker = MemoryBroker::new();
    let handler = IngestionHandler::new(Arc::new(BrokenStore), Arc::new(broker.clone()));

    let err = handler.submit(draft()).await.unwrap_err();

    assert!(matches!(err, IngestError::Store(_)));
    assert!(err.to_string().contains("disk full"));
    assert!(broker.is_empty());
}

#[tokio::test]
async fn test_http_book_then_fetch() {
    let (_temp_dir, store) = create_test_store();
    let broker = MemoryBroker::new();
    let api = routes(Arc::new(IngestionHandler::new(
        store.clone(),
        Arc::new(broker.clone()),
    )));

    let response = warp::test::request()
        .method("POST")
        .path("/book")
        .header("content-type", "application/json")
        .json(&serde_json::json!({
            "patientName": "Lin",
            "patientEmail": "lin@example.com",
            "date": "2026-07-01T08:15:00Z",
        }))
        .reply(&api)
        .await;

    assert_eq!(response.status(), StatusCode::CREATED);
    let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(body["booking"]["status"], "pending");
    assert_eq!(body["booking"]["patientName"], "Lin");
    assert!(body["booking"].get("patientEmail").is_none());
    let id = body["booking"]["id"].as_str().unwrap().to_string();
    assert_eq!(broker.len(), 1);

    let response = warp::test::request()
        .method("GET")
        .path(&format!("/booking/{id}"))
        .reply(&api)
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(body["id"], id.as_str());
    assert_eq!(body["patientEmail"], "lin@example.com");
    assert_eq!(body["status"], "pending");
    assert!(body.get("createdAt").is_some());
    assert!(body.get("processingError").is_none());
}

#[tokio::test]
async fn test_http_book_validation_error_is_400() {
    let (_temp_dir, store) = create_test_store();
    let api = routes(Arc::new(IngestionHandler::new(
        store,
        Arc::new(MemoryBroker::new()),
    )));

    let response = warp::test::request()
        .method("POST")
        .path("/book")
        .header("content-type", "application/json")
        .json(&serde_json::json!({ "patientName": "Lin" }))
        .reply(&api)
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
    assert!(body["message"].as_str().unwrap().contains("required"));
}

#[tokio::test]
async fn test_http_store_failure_is_500() {
    let api = routes(Arc::new(IngestionHandler::new(
        Arc::new(BrokenStore),
        Arc::new(MemoryBroker::new()),
    )));

    let response = warp::test::request()
        .method("POST")
        .path("/book")
        .header("content-type", "application/json")
        .json(&serde_json::json!({
            "patientName": "Lin",
            "patientEmail": "lin@example.com",
            "date": "2026-07-01",
        }))
        .reply(&api)
        .await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_http_unknown_or_malformed_id_is_404() {
    let (_temp_dir, store) = create_test_store();
    let api = routes(Arc::new(IngestionHandler::new(
        store,
        Arc::new(MemoryBroker::new()),
    )));

    for path in [
        format!("/booking/{}", uuid::Uuid::new_v4()),
        "/booking/not-a-uuid".to_string(),
    ] {
        let response = warp::test::request().path(&path).reply(&api).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{path}");
    }
}

#[tokio::test]
async fn test_http_list_is_newest_first() {
    let (_temp_dir, store) = create_test_store();
    let handler = Arc::new(IngestionHandler::new(
        store.clone(),
        Arc::new(MemoryBroker::new()),
    ));

    let first = handler.submit(draft()).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let second = handler.submit(draft()).await.unwrap();

    let api = routes(handler);
    let response = warp::test::request().path("/bookings").reply(&api).await;

    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(body["count"], 2);
    assert_eq!(body["bookings"][0]["id"], second.id.to_string());
    assert_eq!(body["bookings"][1]["id"], first.id.to_string());
    assert!(body["bookings"][0].get("createdAt").is_some());
}

#[tokio::test]
async fn test_http_health() {
    let (_temp_dir, store) = create_test_store();
    let api = routes(Arc::new(IngestionHandler::new(
        store,
        Arc::new(MemoryBroker::new()),
    )));

    let response = warp::test::request().path("/health").reply(&api).await;

    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(
        body,
        serde_json::json!({ "status": "ok", "service": "booking-pipeline" })
    );
}

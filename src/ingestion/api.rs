use crate::booking::{Booking, BookingDraft, BookingId};
use crate::ingestion::handler::{IngestError, IngestionHandler};
use serde::Serialize;
use serde_json::json;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

/// Row in `GET /bookings` and the `booking` object of `POST /book`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BookingSummary<'a> {
    id: String,
    patient_name: &'a str,
    date: String,
    status: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    created_at: Option<String>,
}

impl<'a> BookingSummary<'a> {
    fn of(booking: &'a Booking) -> Self {
        BookingSummary {
            id: booking.id.to_string(),
            patient_name: &booking.patient_name,
            date: booking.date.to_rfc3339(),
            status: booking.status.as_str(),
            created_at: None,
        }
    }

    fn listed(booking: &'a Booking) -> Self {
        BookingSummary {
            created_at: Some(booking.created_at.to_rfc3339()),
            ..BookingSummary::of(booking)
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BookingView<'a> {
    id: String,
    patient_name: &'a str,
    patient_email: &'a str,
    date: String,
    status: &'a str,
    created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    processing_error: Option<&'a str>,
}

impl<'a> From<&'a Booking> for BookingView<'a> {
    fn from(booking: &'a Booking) -> Self {
        BookingView {
            id: booking.id.to_string(),
            patient_name: &booking.patient_name,
            patient_email: &booking.patient_email,
            date: booking.date.to_rfc3339(),
            status: booking.status.as_str(),
            created_at: booking.created_at.to_rfc3339(),
            processing_error: booking.processing_error.as_deref(),
        }
    }
}

fn message(text: &str, status: StatusCode) -> warp::reply::WithStatus<warp::reply::Json> {
    warp::reply::with_status(warp::reply::json(&json!({ "message": text })), status)
}

/// All HTTP routes of the ingestion service
pub fn routes(
    handler: Arc<IngestionHandler>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let with_handler = warp::any().map(move || handler.clone());

    let health_route = warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .map(|| {
            warp::reply::json(&json!({
                "status": "ok",
                "service": "booking-pipeline"
            }))
        });

    let book_route = warp::path("book")
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::json::<BookingDraft>())
        .and(with_handler.clone())
        .and_then(create_booking);

    let get_route = warp::path!("booking" / String)
        .and(warp::get())
        .and(with_handler.clone())
        .and_then(get_booking);

    let list_route = warp::path("bookings")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_handler)
        .and_then(list_bookings);

    health_route.or(book_route).or(get_route).or(list_route)
}

async fn create_booking(
    draft: BookingDraft,
    handler: Arc<IngestionHandler>,
) -> Result<impl Reply, Infallible> {
    let reply = match handler.submit(draft).await {
        Ok(booking) => warp::reply::with_status(
            warp::reply::json(&json!({
                "message": "Booking created",
                "booking": BookingSummary::of(&booking),
            })),
            StatusCode::CREATED,
        ),
        Err(IngestError::Validation(e)) => message(&e.to_string(), StatusCode::BAD_REQUEST),
        Err(e) => {
            error!("Failed to create booking: {}", e);
            message("Failed to process the request", StatusCode::INTERNAL_SERVER_ERROR)
        }
    };
    Ok(reply)
}

async fn get_booking(id: String, handler: Arc<IngestionHandler>) -> Result<impl Reply, Infallible> {
    let Ok(id) = id.parse::<BookingId>() else {
        return Ok(message("Booking not found", StatusCode::NOT_FOUND));
    };

    let reply = match handler.store().get_by_id(id).await {
        Ok(Some(booking)) => warp::reply::with_status(
            warp::reply::json(&BookingView::from(&booking)),
            StatusCode::OK,
        ),
        Ok(None) => message("Booking not found", StatusCode::NOT_FOUND),
        Err(e) => {
            error!(booking_id = %id, "Failed to load booking: {:?}", e);
            message("Failed to process the request", StatusCode::INTERNAL_SERVER_ERROR)
        }
    };
    Ok(reply)
}

async fn list_bookings(handler: Arc<IngestionHandler>) -> Result<impl Reply, Infallible> {
    let reply = match handler.store().list().await {
        Ok(bookings) => {
            let rows: Vec<_> = bookings.iter().map(BookingSummary::listed).collect();
            warp::reply::with_status(
                warp::reply::json(&json!({ "count": rows.len(), "bookings": rows })),
                StatusCode::OK,
            )
        }
        Err(e) => {
            error!("Failed to list bookings: {:?}", e);
            message("Failed to process the request", StatusCode::INTERNAL_SERVER_ERROR)
        }
    };
    Ok(reply)
}

/// Serves the API until the returned future is dropped
pub async fn serve(handler: Arc<IngestionHandler>, addr: SocketAddr) {
    info!("API listening on http://{}", addr);
    info!("  POST /book");
    info!("  GET  /booking/:id");
    info!("  GET  /bookings");
    info!("  GET  /health");

    warp::serve(routes(handler)).run(addr).await;
}

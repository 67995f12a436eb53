use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

pub type BookingId = Uuid;

/// Booking lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Rejected,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Rejected => "rejected",
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, BookingStatus::Pending)
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Booking record as held by the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub id: BookingId,
    pub patient_name: String,
    pub patient_email: String,
    pub date: DateTime<Utc>,
    pub status: BookingStatus,
    pub processing_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Booking {
    pub fn pending(request: NewBooking) -> Self {
        Booking {
            id: Uuid::new_v4(),
            patient_name: request.patient_name,
            patient_email: request.patient_email,
            date: request.date,
            status: BookingStatus::Pending,
            processing_error: None,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ValidationError(pub String);

/// Unvalidated booking intent as received from a caller
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingDraft {
    pub patient_name: Option<String>,
    pub patient_email: Option<String>,
    pub date: Option<String>,
}

/// A draft that passed validation
#[derive(Debug, Clone, PartialEq)]
pub struct NewBooking {
    pub patient_name: String,
    pub patient_email: String,
    pub date: DateTime<Utc>,
}

impl BookingDraft {
    pub fn validate(self) -> Result<NewBooking, ValidationError> {
        let present = |value: Option<String>| value.filter(|v| !v.trim().is_empty());

        let (Some(patient_name), Some(patient_email), Some(date)) = (
            present(self.patient_name),
            present(self.patient_email),
            present(self.date),
        ) else {
            return Err(ValidationError(
                "patientName, patientEmail and date are required".to_string(),
            ));
        };

        let date = parse_date(date.trim())
            .ok_or_else(|| ValidationError(format!("date is not a valid timestamp: {date}")))?;

        Ok(NewBooking {
            patient_name,
            patient_email,
            date,
        })
    }
}

fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(date) = DateTime::parse_from_rfc3339(raw) {
        return Some(date.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|day| day.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Payload of a message on `booking_requests` / `booking_retry`.
///
/// Snapshot of the booking at ingestion time. The retry count travels in the
/// message headers, never in here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingMessage {
    #[serde(alias = "_id")]
    pub id: BookingId,
    pub patient_name: String,
    pub patient_email: String,
    pub date: DateTime<Utc>,
    pub status: BookingStatus,
}

impl From<&Booking> for ProcessingMessage {
    fn from(booking: &Booking) -> Self {
        ProcessingMessage {
            id: booking.id,
            patient_name: booking.patient_name.clone(),
            patient_email: booking.patient_email.clone(),
            date: booking.date,
            status: booking.status,
        }
    }
}

/// Booking outcome broadcast on the `booking_notifications` exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEvent {
    pub booking_id: BookingId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_email: Option<String>,
    pub status: BookingStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl NotificationEvent {
    pub fn outcome(booking: &Booking) -> Self {
        NotificationEvent {
            booking_id: booking.id,
            patient_name: Some(booking.patient_name.clone()),
            patient_email: Some(booking.patient_email.clone()),
            status: booking.status,
            date: Some(booking.date),
            error: None,
        }
    }

    pub fn terminal_failure(booking_id: BookingId, error: impl Into<String>) -> Self {
        NotificationEvent {
            booking_id,
            patient_name: None,
            patient_email: None,
            status: BookingStatus::Rejected,
            date: None,
            error: Some(error.into()),
        }
    }
}

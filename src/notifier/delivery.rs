use crate::booking::{BookingStatus, NotificationEvent};
use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{info, warn};

/// Something that can tell a patient about their booking
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn deliver(&self, event: &NotificationEvent) -> Result<()>;
}

/// Rendered e-mail
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Writes the e-mail to the log instead of sending it
pub struct SimulatedEmail {
    latency: Duration,
}

impl SimulatedEmail {
    pub fn new(latency: Duration) -> Self {
        SimulatedEmail { latency }
    }
}

impl Default for SimulatedEmail {
    fn default() -> Self {
        SimulatedEmail::new(Duration::from_secs(1))
    }
}

/// `None` when the event carries no recipient (terminal processing failures)
pub fn build_email(event: &NotificationEvent) -> Option<Email> {
    let to = event.patient_email.clone()?;
    let name = event.patient_name.as_deref().unwrap_or("patient");
    let when = event
        .date
        .map(|date| date.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| "the requested date".to_string());

    let (subject, details) = match event.status {
        BookingStatus::Confirmed => (
            "Your appointment is confirmed",
            format!(
                "Your appointment on {when} has been CONFIRMED.\n\
                 Please arrive 15 minutes before the scheduled time."
            ),
        ),
        BookingStatus::Rejected => (
            "Your appointment could not be booked",
            format!(
                "We are sorry, your appointment on {when} has been REJECTED.\n\
                 Please try booking another available slot."
            ),
        ),
        BookingStatus::Pending => (
            "Your appointment request was received",
            format!("Your appointment request for {when} is being processed."),
        ),
    };

    let body = format!("Dear {name},\n\n{details}\n\nThank you for trusting our clinic.");

    Some(Email {
        to,
        subject: subject.to_string(),
        body,
    })
}

#[async_trait]
impl NotificationChannel for SimulatedEmail {
    async fn deliver(&self, event: &NotificationEvent) -> Result<()> {
        let Some(email) = build_email(event) else {
            warn!(
                booking_id = %event.booking_id,
                status = %event.status,
                error = event.error.as_deref().unwrap_or(""),
                "No recipient on notification, nothing to send"
            );
            return Ok(());
        };

        tokio::time::sleep(self.latency).await;

        let body_preview: String = email.body.chars().take(100).collect();
        info!(
            booking_id = %event.booking_id,
            to = %email.to,
            subject = %email.subject,
            "SIMULATED_EMAIL booking_id={} to={} subject=\"{}\" body_preview=\"{}\"",
            event.booking_id,
            email.to,
            email.subject,
            body_preview.escape_debug()
        );

        Ok(())
    }
}

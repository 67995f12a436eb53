use crate::booking::{Booking, BookingStatus};
use anyhow::Result;
use async_trait::async_trait;
use rand::Rng;
use std::time::Duration;

/// Decides whether a pending booking can be honoured
#[async_trait]
pub trait AvailabilityPolicy: Send + Sync {
    /// Returns `Confirmed` or `Rejected`
    async fn decide(&self, booking: &Booking) -> Result<BookingStatus>;
}

/// Biased coin flip
pub struct RandomAvailability {
    confirm_probability: f64,
}

impl RandomAvailability {
    pub fn new(confirm_probability: f64) -> Self {
        RandomAvailability {
            confirm_probability: confirm_probability.clamp(0.0, 1.0),
        }
    }
}

impl Default for RandomAvailability {
    fn default() -> Self {
        RandomAvailability::new(0.7)
    }
}

#[async_trait]
impl AvailabilityPolicy for RandomAvailability {
    async fn decide(&self, _booking: &Booking) -> Result<BookingStatus> {
        let available = rand::thread_rng().gen_bool(self.confirm_probability);
        Ok(if available {
            BookingStatus::Confirmed
        } else {
            BookingStatus::Rejected
        })
    }
}

/// Always answers the same
pub struct FixedAvailability(pub BookingStatus);

#[async_trait]
impl AvailabilityPolicy for FixedAvailability {
    async fn decide(&self, _booking: &Booking) -> Result<BookingStatus> {
        Ok(self.0)
    }
}

/// Simulated downstream latency, drawn uniformly from `[min, max]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessingDelay {
    pub min: Duration,
    pub max: Duration,
}

impl ProcessingDelay {
    pub fn none() -> Self {
        ProcessingDelay {
            min: Duration::ZERO,
            max: Duration::ZERO,
        }
    }

    pub fn between_ms(min: u64, max: u64) -> Self {
        ProcessingDelay {
            min: Duration::from_millis(min),
            max: Duration::from_millis(max),
        }
    }

    pub fn sample(&self) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        let min = self.min.as_millis() as u64;
        let max = self.max.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_stays_within_bounds() {
        let delay = ProcessingDelay::between_ms(20, 50);
        for _ in 0..200 {
            let sample = delay.sample();
            assert!(sample >= Duration::from_millis(20) && sample <= Duration::from_millis(50));
        }
        assert_eq!(ProcessingDelay::none().sample(), Duration::ZERO);
        assert_eq!(ProcessingDelay::between_ms(30, 10).sample(), Duration::from_millis(30));
    }

    #[test]
    fn random_policy_extremes_are_deterministic() {
        let booking = crate::booking::Booking::pending(crate::booking::NewBooking {
            patient_name: "A".into(),
            patient_email: "a@x.com".into(),
            date: chrono::Utc::now(),
        });
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();

        let always = RandomAvailability::new(1.0);
        let never = RandomAvailability::new(0.0);
        for _ in 0..20 {
            assert_eq!(
                runtime.block_on(always.decide(&booking)).unwrap(),
                BookingStatus::Confirmed
            );
            assert_eq!(
                runtime.block_on(never.decide(&booking)).unwrap(),
                BookingStatus::Rejected
            );
        }
    }
}

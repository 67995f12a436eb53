pub mod decision;
pub mod outbox;
pub mod reconcile;
pub mod worker;

pub use decision::{AvailabilityPolicy, FixedAvailability, ProcessingDelay, RandomAvailability};
pub use outbox::{deliver_notification, OutboxRelay};
pub use reconcile::Reconciler;
pub use worker::{BookingProcessor, Disposition, ProcessorSettings};

pub mod delivery;
pub mod worker;

pub use delivery::{build_email, Email, NotificationChannel, SimulatedEmail};
pub use worker::NotificationWorker;

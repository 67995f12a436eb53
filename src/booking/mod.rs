pub mod storage;
pub mod types;

pub use storage::{BookingStore, SledBookingStore};
pub use types::{
    Booking, BookingDraft, BookingId, BookingStatus, NewBooking, NotificationEvent,
    ProcessingMessage, ValidationError,
};

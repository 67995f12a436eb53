pub mod api;
pub mod handler;

pub use handler::{publish_processing_request, IngestError, IngestionHandler};

#[cfg(test)]
mod tests;

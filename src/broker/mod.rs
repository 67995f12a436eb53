pub mod amqp;
pub mod connection;
pub mod consumer;
pub mod memory;
pub mod topology;
pub mod types;

pub use connection::{BrokerManager, Connector, LinkLost, ReconnectPolicy, Session};
pub use consumer::{consume, Acker, Delivery, DeliveryStream, Subscribe};
pub use types::{Destination, Envelope, MessageHandler, MessagePublisher, Outcome};

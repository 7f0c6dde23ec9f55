//! NATS message surface: inbound requests and outbound events

pub mod publisher;
pub mod subscriber;

pub use publisher::NatsPublisher;
pub use subscriber::{handle_request, NatsSubscriber, Reply};

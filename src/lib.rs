//! Async STOMP client with multi-host failover.
//!
//! The entry point is [`Connection`]: give it a [`FailoverConfig`] listing
//! one or more brokers and it maintains a single live session across them,
//! reconnecting with exponential backoff and replaying subscriptions when
//! a broker goes away. [`StompCodec`] and [`Frame`] are exposed for
//! callers that want the wire layer without the connection machinery.

pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod frame;
pub mod subscription;

mod failover;
mod parser;
mod transport;

pub use codec::StompCodec;
pub use config::{FailoverConfig, HostSpec, uncamelize};
pub use connection::{Connection, ConnectionListener, UnreceiveOptions};
pub use error::StompError;
pub use frame::Frame;
pub use subscription::Subscription;

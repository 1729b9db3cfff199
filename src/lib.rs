#![doc(html_root_url = "https://docs.rs/lockstep/latest")]
//! Public API for the `lockstep` library.
//!
//! This crate is a blocking AMQP 0-9-1 client driver: channels multiplexed
//! over one connection, request/reply correlation by method type, publisher
//! confirms, and consumer callbacks, all driven by polling from a single
//! calling thread. The frame-level engine is pluggable through the
//! [`transport::Transport`] trait.

pub mod channel;
pub mod config;
pub mod connection;
mod dispatch;
pub mod error;
/// Result type alias re-exported for convenience when working with the
/// driver APIs.
pub use error::Result;
pub mod message;
pub mod method;
pub mod metrics;
pub mod timers;
pub mod transport;

pub use channel::{Channel, ChannelState};
pub use config::Tuning;
pub use connection::{Connection, ConnectionState};
pub use error::{CloseReason, Error};
pub use message::{Delivery, GetMessage, PublishOutcome, ReturnedMessage};
pub use metrics::{
    CHANNELS_OPEN, DISCARDED_METHODS_TOTAL, Direction, FORCED_DRAINS_TOTAL, IO_TIMEOUTS_TOTAL,
    METHODS_TOTAL,
};
pub use method::{Content, Method, MethodKind, Properties};
pub use timers::TimeoutId;
pub use transport::{Capabilities, Inbound, IoStatus, Transport, TransportError};

//! Utilities for driving a [`lockstep::Connection`] against an in-memory
//! broker during tests.
//!
//! [`open_broker`] connects a driver to a [`FakeBroker`] that answers
//! lifecycle and topology methods, keeps per-queue backlogs, and records
//! everything the driver sends for assertions.
//!
//! ```rust
//! use lockstep::method::QueueDeclare;
//! use lockstep_testing::open_broker;
//!
//! let (connection, broker) = open_broker();
//! let channel = connection.open_channel(None).expect("open channel");
//! channel
//!     .queue_declare(QueueDeclare {
//!         queue: "jobs".into(),
//!         ..QueueDeclare::default()
//!     })
//!     .expect("declare queue");
//! assert_eq!(broker.queue_len("jobs"), Some(0));
//! ```

pub mod broker;
pub mod logging;
pub mod metrics;

pub use broker::{FakeBroker, SentMethod, open_broker, open_broker_with, session};
pub use logging::{LoggerHandle, logger};
pub use metrics::{Snapshot, capture_metrics, counter_total, gauge_value};

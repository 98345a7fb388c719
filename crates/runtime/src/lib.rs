//! USB portal runtime - bus connection, request correlation, and cancellation
//!
//! This crate provides the low-level plumbing for talking to the
//! `org.freedesktop.portal.Usb` broker:
//!
//! - **Bus facade**: the [`Bus`] trait every call and subscription goes through
//! - **Connection**: zbus-backed bus with reply correlation and signal fan-out
//! - **Requests**: [`Correlator`] matching one call to its later `Response` signal
//! - **Cancellation**: [`CancelLink`] turning a token into a best-effort `Close`
//! - **Tokens**: injectable handle-token generation
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐
//! │  usbportal   │  Portal, Usb operations, sessions
//! └──────┬───────┘
//!        │ Correlator / Bus
//! ┌──────▼───────┐
//! │   runtime    │  This crate
//! │  ┌────────┐  │
//! │  │Request │  │  Response correlation, cancel links
//! │  └────────┘  │
//! │  ┌────────┐  │
//! │  │  Conn  │  │  Reply serials, signal routing
//! │  └────────┘  │
//! └──────┬───────┘
//!        │ zbus
//!     D-Bus daemon ── portal broker
//! ```

pub mod bus;
pub mod cancel;
pub mod connection;
pub mod error;
#[cfg(any(test, feature = "testing"))]
pub mod fake_bus;
pub mod request;
pub mod token;

pub use bus::{Broker, Bus, BusFuture, SignalRule, SignalSubscription, SubscriptionId};
pub use cancel::CancelLink;
pub use connection::Connection;
pub use error::{Error, Result};
pub use request::{Correlator, PendingRequest};
pub use token::{RandomTokens, SequentialTokens, TokenGenerator};
pub use tokio_util::sync::CancellationToken;
pub use zbus;

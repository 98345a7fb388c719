//! Wire types for the USB device portal protocol.
//!
//! This crate contains the D-Bus names and payload shapes used to talk to the
//! portal broker's `org.freedesktop.portal.Usb` interface. These types are the
//! "protocol layer": they describe how data looks on the wire and nothing else.
//!
//! # Design Philosophy
//!
//! Types in this crate are:
//! - **Pure data**: No behavior beyond encoding/decoding and small conversions
//! - **1:1 with the broker**: Signatures match the broker's introspection exactly
//! - **Stable**: Changes only when the wire protocol changes
//!
//! The request/response orchestration lives in `usbportal-runtime`, and the
//! ergonomic client API in `usbportal`.

pub mod events;
pub mod names;
pub mod options;
pub mod paths;
pub mod types;

pub use events::*;
pub use names::*;
pub use options::*;
pub use paths::*;
pub use types::*;

/// Re-exported so downstream crates agree on one `zvariant` version.
pub use zvariant;

//! Async client for the XDG desktop portal USB interface.
//!
//! Sandboxed applications use the portal to find USB devices, get file
//! descriptors for them after the user agrees, and watch devices come and go.
//!
//! # Quick Start
//!
//! ```ignore
//! use usbportal::{DeviceSpec, Portal, PortalConfig};
//!
//! let portal = Portal::connect(PortalConfig::default()).await?;
//! let usb = portal.usb();
//!
//! let devices = usb.enumerate_devices().await?;
//! let specs: Vec<_> = devices.iter().map(|d| DeviceSpec::new(&d.id, true)).collect();
//!
//! let request = usb.acquire_devices(None, &specs, None).await?;
//! for device in usb.finish_acquire_devices(request).await? {
//!     println!("{}: {:?}", device.id, device.fd());
//! }
//! ```
//!
//! # Sessions
//!
//! [`UsbSession`] delivers device hotplug events as [`DeviceEventBatch`]es
//! through a stream, a waiter, or a callback. The broker broadcasts every
//! batch to every session, so each receiver picks an [`EventScope`]: its own
//! session's batches or all of them. Dropping the session unsubscribes.
//!
//! # Cancellation
//!
//! Request-style operations accept a [`CancellationToken`]. Cancelling
//! resolves the operation with [`Error::Cancelled`] and sends the broker a
//! best-effort `Close` for the pending request.

pub mod events;
pub mod parent;
pub mod portal;
pub mod session;
pub mod usb;

pub use events::{DeviceEvent, DeviceEventBatch, DeviceEventStream, DeviceEventWaiter, EventScope, EventSubscription};
pub use parent::{ExportFuture, Parent, WindowIdentifier};
pub use portal::{BusKind, Portal, PortalConfig};
pub use session::{Session, SessionState};
pub use usb::{AcquiredDevice, AcquisitionRequest, DeviceOutcome, Usb, UsbDevice, UsbSession};
pub use usbportal_protocol::{DeviceEventKind, DeviceInfo, DeviceSpec};
pub use usbportal_runtime::{
	CancellationToken, Error, RandomTokens, Result, SequentialTokens, TokenGenerator,
};

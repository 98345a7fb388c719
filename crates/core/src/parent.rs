//! Caller identity for broker dialogs.
//!
//! The broker may show a permission dialog for [`Usb::acquire_devices`]. A
//! [`Parent`] exports the caller's window into the identity handle the broker
//! uses to attach that dialog.
//!
//! [`Usb::acquire_devices`]: crate::Usb::acquire_devices

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use usbportal_runtime::Result;

/// Boxed future returned by [`Parent::export`].
pub type ExportFuture<'a> = Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>>;

/// Something that can be exported as a window identity handle.
///
/// Toolkit integrations implement this to hand out a fresh handle (for
/// example an `xdg_foreign` export on Wayland) each time it is asked.
pub trait Parent: Send + Sync {
	fn export(&self) -> ExportFuture<'_>;
}

/// Window identifier in the portal's `parent_window` string format.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum WindowIdentifier {
	/// X11 window id, formatted as `x11:<hex>`.
	X11(u32),
	/// Handle already exported through `xdg_foreign`, formatted as `wayland:<handle>`.
	Wayland(String),
	/// No parent window.
	#[default]
	None,
}

impl fmt::Display for WindowIdentifier {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			WindowIdentifier::X11(xid) => write!(f, "x11:{xid:x}"),
			WindowIdentifier::Wayland(handle) => write!(f, "wayland:{handle}"),
			WindowIdentifier::None => Ok(()),
		}
	}
}

impl Parent for WindowIdentifier {
	fn export(&self) -> ExportFuture<'_> {
		let handle = self.to_string();
		Box::pin(async move { Ok(handle) })
	}
}

/// Resolves the identity handle for an optional parent.
pub(crate) async fn identity_handle(parent: Option<&dyn Parent>) -> Result<String> {
	match parent {
		Some(parent) => parent.export().await,
		None => Ok(String::new()),
	}
}

//! Well-known bus names, object paths, interfaces and members.

/// Well-known bus name of the portal broker.
pub const PORTAL_BUS_NAME: &str = "org.freedesktop.portal.Desktop";

/// Object path every portal interface is exported on.
pub const PORTAL_OBJECT_PATH: &str = "/org/freedesktop/portal/desktop";

/// USB portal interface.
pub const USB_INTERFACE: &str = "org.freedesktop.portal.Usb";

/// Interface implemented by per-call request objects.
pub const REQUEST_INTERFACE: &str = "org.freedesktop.portal.Request";

/// Interface implemented by session objects.
pub const SESSION_INTERFACE: &str = "org.freedesktop.portal.Session";

/// Prefix of request object paths, followed by `<sender>/<token>`.
pub const REQUEST_PATH_PREFIX: &str = "/org/freedesktop/portal/desktop/request/";

/// Prefix of session object paths, followed by `<sender>/<token>`.
pub const SESSION_PATH_PREFIX: &str = "/org/freedesktop/portal/desktop/session/";

/// Method names on [`USB_INTERFACE`].
pub mod method {
	pub const CREATE_SESSION: &str = "CreateSession";
	pub const ENUMERATE_DEVICES: &str = "EnumerateDevices";
	pub const ACQUIRE_DEVICES: &str = "AcquireDevices";
	pub const ACQUIRE_DEVICES_FINISH: &str = "AcquireDevicesFinish";
	pub const RELEASE_DEVICES: &str = "ReleaseDevices";
	/// Shared by [`REQUEST_INTERFACE`](super::REQUEST_INTERFACE) and
	/// [`SESSION_INTERFACE`](super::SESSION_INTERFACE).
	pub const CLOSE: &str = "Close";
}

/// Signal names.
pub mod signal {
	/// Emitted on a request path once the broker has an answer.
	pub const RESPONSE: &str = "Response";
	/// Broadcast on [`USB_INTERFACE`](super::USB_INTERFACE) for every session.
	pub const DEVICE_EVENTS: &str = "DeviceEvents";
	/// Emitted on a session path when the broker closes the session.
	pub const CLOSED: &str = "Closed";
}

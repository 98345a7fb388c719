//! Option dictionaries (`a{sv}`) passed to broker methods.
//!
//! Every struct here serializes as a vardict: `None` fields are left out of
//! the dictionary entirely, matching how the broker expects optional keys.

use std::collections::HashMap;

use zvariant::{DeserializeDict, SerializeDict, Type, Value};

/// Options for `CreateSession`.
#[derive(Debug, Clone, Default, PartialEq, Eq, SerializeDict, DeserializeDict, Type)]
#[zvariant(signature = "dict")]
pub struct CreateSessionOptions {
	/// Token the broker uses to derive the session object path.
	pub session_handle_token: Option<String>,
}

impl CreateSessionOptions {
	pub fn with_token(token: impl Into<String>) -> Self {
		Self {
			session_handle_token: Some(token.into()),
		}
	}
}

/// Options for `AcquireDevices`.
#[derive(Debug, Clone, Default, PartialEq, Eq, SerializeDict, DeserializeDict, Type)]
#[zvariant(signature = "dict")]
pub struct AcquireDevicesOptions {
	/// Token the broker uses to derive the request object path.
	pub handle_token: Option<String>,
}

impl AcquireDevicesOptions {
	pub fn with_token(token: impl Into<String>) -> Self {
		Self {
			handle_token: Some(token.into()),
		}
	}
}

/// Per-device access options inside an `AcquireDevices` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, SerializeDict, DeserializeDict, Type)]
#[zvariant(signature = "dict")]
pub struct DeviceAccessOptions {
	/// Whether the device should be opened read-write.
	pub writable: Option<bool>,
}

/// An empty vardict, for methods whose options are currently unused
/// (`EnumerateDevices`, `AcquireDevicesFinish`).
pub type EmptyOptions = HashMap<&'static str, Value<'static>>;

/// Returns an [`EmptyOptions`] dictionary.
pub fn empty_options() -> EmptyOptions {
	HashMap::new()
}

//! Device payloads exchanged with the broker.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use zvariant::{DeserializeDict, OwnedFd, OwnedValue, SerializeDict, Type};

use crate::options::DeviceAccessOptions;

/// A caller's request to acquire one device.
///
/// Immutable value type: build it with [`DeviceSpec::new`] and hand a slice of
/// them to the acquisition flow.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceSpec {
	id: String,
	writable: bool,
}

impl DeviceSpec {
	pub fn new(id: impl Into<String>, writable: bool) -> Self {
		Self {
			id: id.into(),
			writable,
		}
	}

	/// Broker-assigned device identifier.
	pub fn id(&self) -> &str {
		&self.id
	}

	pub fn writable(&self) -> bool {
		self.writable
	}

	/// Encodes as the `(s a{sv})` entry of `AcquireDevices`.
	pub fn to_wire(&self) -> (String, DeviceAccessOptions) {
		(
			self.id.clone(),
			DeviceAccessOptions {
				writable: Some(self.writable),
			},
		)
	}

	/// Decodes an `(s a{sv})` entry. A missing `writable` key means read-only.
	pub fn from_wire((id, options): (String, DeviceAccessOptions)) -> Self {
		Self {
			id,
			writable: options.writable.unwrap_or(false),
		}
	}
}

/// Per-device result dictionary, as carried by `Response` and
/// `AcquireDevicesFinish`.
///
/// Every key is optional on the wire; a missing `success` is a failure.
#[derive(Debug, Default, SerializeDict, DeserializeDict, Type)]
#[zvariant(signature = "dict")]
pub struct DeviceResult {
	pub success: Option<bool>,
	/// File descriptor for the opened device node (`h`).
	pub fd: Option<OwnedFd>,
	pub error: Option<String>,
}

impl DeviceResult {
	pub fn succeeded(fd: OwnedFd) -> Self {
		Self {
			success: Some(true),
			fd: Some(fd),
			error: None,
		}
	}

	pub fn failed(message: impl Into<String>) -> Self {
		Self {
			success: Some(false),
			fd: None,
			error: Some(message.into()),
		}
	}

	pub fn is_success(&self) -> bool {
		self.success.unwrap_or(false)
	}
}

/// Device description returned by `EnumerateDevices` and carried by
/// `DeviceEvents`.
#[derive(Debug, Default, SerializeDict, DeserializeDict, Type)]
#[zvariant(signature = "dict")]
pub struct DeviceInfo {
	/// Identifier of the parent device, if the broker exposes it.
	pub parent: Option<String>,
	pub readable: Option<bool>,
	pub writable: Option<bool>,
	/// Path of the device node, e.g. `/dev/bus/usb/001/004`.
	#[zvariant(rename = "device-file")]
	pub device_file: Option<String>,
	/// Raw udev properties.
	pub properties: Option<HashMap<String, OwnedValue>>,
}

impl DeviceInfo {
	/// Looks up a udev property as a string.
	pub fn property(&self, key: &str) -> Option<String> {
		let value: &zvariant::Value<'_> = self.properties.as_ref()?.get(key)?;
		<&str>::try_from(value).ok().map(str::to_owned)
	}
}

/// Status code of a `Response` signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseStatus {
	/// `0`: the request succeeded.
	Success,
	/// `1`: the user or broker cancelled the request.
	Cancelled,
	/// Any other code: the request failed.
	Other(u32),
}

impl From<u32> for ResponseStatus {
	fn from(code: u32) -> Self {
		match code {
			0 => ResponseStatus::Success,
			1 => ResponseStatus::Cancelled,
			other => ResponseStatus::Other(other),
		}
	}
}

impl From<ResponseStatus> for u32 {
	fn from(status: ResponseStatus) -> Self {
		match status {
			ResponseStatus::Success => 0,
			ResponseStatus::Cancelled => 1,
			ResponseStatus::Other(code) => code,
		}
	}
}

/// Argument tuple of `AcquireDevices`: `(s a(sa{sv}) a{sv})`.
pub type AcquireDevicesArgs = (
	String,
	Vec<(String, DeviceAccessOptions)>,
	crate::options::AcquireDevicesOptions,
);

/// Body of the `Response` signal for an acquisition request: `(u a(sa{sv}))`.
#[derive(Debug, Serialize, Deserialize, Type)]
pub struct AcquireResponse {
	pub status: u32,
	pub results: Vec<(String, DeviceResult)>,
}

impl AcquireResponse {
	pub fn status(&self) -> ResponseStatus {
		ResponseStatus::from(self.status)
	}
}

/// Reply of `AcquireDevicesFinish`: `(a(sa{sv}) b)`.
///
/// The broker streams results: each reply usually carries a single entry and
/// `finished` flips to `true` on the last one.
#[derive(Debug, Serialize, Deserialize, Type)]
pub struct FinishReply {
	pub results: Vec<(String, DeviceResult)>,
	pub finished: bool,
}

/// One entry of the `EnumerateDevices` reply: `(s a{sv})`.
pub type EnumeratedDevice = (String, DeviceInfo);

//! Payload of the broadcast `DeviceEvents` signal.

use std::fmt;

use serde::{Deserialize, Serialize};
use zvariant::{OwnedObjectPath, Type};

use crate::types::DeviceInfo;

/// What happened to a device.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DeviceEventKind {
	Add,
	Change,
	Remove,
	/// A kind this client does not know about; kept verbatim.
	Other(String),
}

impl DeviceEventKind {
	pub fn parse(kind: &str) -> Self {
		match kind {
			"add" => DeviceEventKind::Add,
			"change" => DeviceEventKind::Change,
			"remove" => DeviceEventKind::Remove,
			other => DeviceEventKind::Other(other.to_string()),
		}
	}

	pub fn as_str(&self) -> &str {
		match self {
			DeviceEventKind::Add => "add",
			DeviceEventKind::Change => "change",
			DeviceEventKind::Remove => "remove",
			DeviceEventKind::Other(kind) => kind,
		}
	}
}

impl fmt::Display for DeviceEventKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// One `(s s a{sv})` entry of `DeviceEvents`: device id, event kind, device
/// properties.
pub type RawDeviceEvent = (String, String, DeviceInfo);

/// Body of `DeviceEvents`: `(o a(ssa{sv}))`.
///
/// The signal is broadcast for all sessions; `session` names the one the
/// broker addressed it to.
#[derive(Debug, Serialize, Deserialize, Type)]
pub struct DeviceEventsBody {
	pub session: OwnedObjectPath,
	pub events: Vec<RawDeviceEvent>,
}

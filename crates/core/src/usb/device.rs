//! Device records returned by USB operations.

use std::os::fd::{AsFd, BorrowedFd};

use usbportal_protocol::zvariant::OwnedFd;
use usbportal_protocol::{DeviceInfo, DeviceResult};

/// A device reported by `EnumerateDevices`.
#[derive(Debug)]
pub struct UsbDevice {
	pub id: String,
	pub info: DeviceInfo,
}

impl UsbDevice {
	/// Udev property of the device, if present and a string.
	pub fn property(&self, key: &str) -> Option<String> {
		self.info.property(key)
	}

	pub fn device_file(&self) -> Option<&str> {
		self.info.device_file.as_deref()
	}
}

/// Outcome of acquiring one device.
#[derive(Debug)]
pub enum DeviceOutcome {
	/// Open file descriptor for the device node.
	Success(OwnedFd),
	/// Broker-supplied reason the device could not be opened.
	Failure(String),
}

/// One device from an acquisition, identified by the id it was requested with.
#[derive(Debug)]
pub struct AcquiredDevice {
	pub id: String,
	pub outcome: DeviceOutcome,
}

impl AcquiredDevice {
	/// Decodes one `(id, {success, fd, error})` entry.
	///
	/// An entry claiming success without a file descriptor is a failure.
	pub fn from_result(id: String, result: DeviceResult) -> Self {
		let outcome = match (result.is_success(), result.fd) {
			(true, Some(fd)) => DeviceOutcome::Success(fd),
			(true, None) => DeviceOutcome::Failure("broker reported success without a file descriptor".to_string()),
			(false, _) => DeviceOutcome::Failure(result.error.unwrap_or_default()),
		};
		Self { id, outcome }
	}

	/// Decodes a success-only entry, as the `Response` signal is read:
	/// failed entries yield `None`.
	pub(crate) fn granted(id: String, result: DeviceResult) -> Option<Self> {
		if !result.is_success() {
			return None;
		}
		let fd = result.fd?;
		Some(Self {
			id,
			outcome: DeviceOutcome::Success(fd),
		})
	}

	pub fn is_success(&self) -> bool {
		matches!(self.outcome, DeviceOutcome::Success(_))
	}

	pub fn fd(&self) -> Option<BorrowedFd<'_>> {
		match &self.outcome {
			DeviceOutcome::Success(fd) => Some(fd.as_fd()),
			DeviceOutcome::Failure(_) => None,
		}
	}

	pub fn error(&self) -> Option<&str> {
		match &self.outcome {
			DeviceOutcome::Success(_) => None,
			DeviceOutcome::Failure(message) => Some(message),
		}
	}

	/// Takes ownership of the file descriptor.
	pub fn into_fd(self) -> Option<OwnedFd> {
		match self.outcome {
			DeviceOutcome::Success(fd) => Some(fd),
			DeviceOutcome::Failure(_) => None,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn open_fd() -> OwnedFd {
		let file = tempfile::tempfile().unwrap();
		OwnedFd::from(std::os::fd::OwnedFd::from(file))
	}

	#[test]
	fn failure_keeps_broker_message() {
		let device = AcquiredDevice::from_result("B".into(), DeviceResult::failed("permission denied"));
		assert!(!device.is_success());
		assert_eq!(device.error(), Some("permission denied"));
		assert!(device.fd().is_none());
	}

	#[test]
	fn success_without_fd_is_a_failure() {
		let result = DeviceResult {
			success: Some(true),
			fd: None,
			error: None,
		};
		let device = AcquiredDevice::from_result("A".into(), result);
		assert!(!device.is_success());
		assert!(AcquiredDevice::granted("A".into(), DeviceResult::default()).is_none());
	}

	#[test]
	fn success_carries_the_fd() {
		let device = AcquiredDevice::from_result("A".into(), DeviceResult::succeeded(open_fd()));
		assert!(device.is_success());
		assert!(device.fd().is_some());
		assert!(device.into_fd().is_some());
	}
}

//! `org.freedesktop.portal.Usb` operations.
//!
//! [`Usb::create_session`] and [`Usb::acquire_devices`] are request-style
//! operations that can be cancelled; the rest are plain method calls that
//! wait for their reply before returning.

mod acquire;
mod device;
mod finish;
pub(crate) mod session;

use usbportal_protocol::names::{USB_INTERFACE, method};
use usbportal_protocol::zvariant::OwnedObjectPath;
use usbportal_protocol::{CreateSessionOptions, DeviceSpec, EnumeratedDevice, empty_options, session_path};
use usbportal_runtime::{CancellationToken, Error, Result};

pub use acquire::AcquisitionRequest;
pub use device::{AcquiredDevice, DeviceOutcome, UsbDevice};
pub use session::UsbSession;

use crate::parent::Parent;
use crate::portal::Portal;

/// USB operations on a [`Portal`].
#[derive(Debug, Clone, Copy)]
pub struct Usb<'a> {
	portal: &'a Portal,
}

impl<'a> Usb<'a> {
	pub(crate) fn new(portal: &'a Portal) -> Self {
		Self { portal }
	}

	/// Creates a session that receives device events.
	///
	/// Cancelling abandons the call locally; no request object exists, so
	/// nothing is sent to the broker.
	pub async fn create_session(&self, cancel: Option<&CancellationToken>) -> Result<UsbSession> {
		let token = self.portal.next_token();
		let expected = self.portal.bus().unique_name().map(|sender| session_path(&sender, &token));
		let options = CreateSessionOptions::with_token(token);
		let call = self
			.portal
			.broker()
			.method_call(USB_INTERFACE, method::CREATE_SESSION, &(options,))?;

		let reply = self.portal.correlator().call(call, cancel).await?;
		let path: OwnedObjectPath = reply
			.body()
			.deserialize()
			.map_err(|e| Error::Protocol(format!("malformed CreateSession reply: {e}")))?;

		if let Some(Ok(expected)) = expected {
			if expected != path {
				tracing::warn!(
					expected = expected.as_str(),
					actual = path.as_str(),
					"Broker returned an unexpected session path, using the returned one"
				);
			}
		}

		UsbSession::new(self.portal, path.as_str())
	}

	/// Lists the devices the broker lets this application see.
	pub async fn enumerate_devices(&self) -> Result<Vec<UsbDevice>> {
		let call = self
			.portal
			.broker()
			.method_call(USB_INTERFACE, method::ENUMERATE_DEVICES, &(empty_options(),))?;

		let reply = self.portal.bus().call(call).await?;
		let (devices,): (Vec<EnumeratedDevice>,) = reply
			.body()
			.deserialize()
			.map_err(|e| Error::Protocol(format!("malformed EnumerateDevices reply: {e}")))?;

		tracing::debug!(count = devices.len(), "Enumerated USB devices");
		Ok(devices.into_iter().map(|(id, info)| UsbDevice { id, info }).collect())
	}

	/// Asks the broker for access to `devices`.
	///
	/// With a `parent`, its window is exported first so the broker can attach
	/// its permission dialog. The returned request is redeemed with
	/// [`finish_acquire_devices`](Self::finish_acquire_devices).
	///
	/// # Errors
	///
	/// - [`Error::Cancelled`] if `cancel` fires or the user dismisses the dialog
	/// - [`Error::OperationFailed`] for any other non-success status
	pub async fn acquire_devices(
		&self,
		parent: Option<&dyn Parent>,
		devices: &[DeviceSpec],
		cancel: Option<&CancellationToken>,
	) -> Result<AcquisitionRequest> {
		acquire::AcquireFlow::new(self.portal).run(parent, devices, cancel).await
	}

	/// Polls `AcquireDevicesFinish` until the broker reports completion.
	///
	/// Consumes the request: a finished acquisition cannot be polled again.
	pub async fn finish_acquire_devices(&self, request: AcquisitionRequest) -> Result<Vec<AcquiredDevice>> {
		finish::finish(self.portal, request).await
	}

	/// Gives up access to previously acquired devices.
	pub async fn release_devices<S: AsRef<str>>(&self, ids: &[S]) -> Result<()> {
		let ids: Vec<&str> = ids.iter().map(AsRef::as_ref).collect();
		let call = self
			.portal
			.broker()
			.method_call(USB_INTERFACE, method::RELEASE_DEVICES, &(ids,))?;

		self.portal.bus().call(call).await?;
		Ok(())
	}
}

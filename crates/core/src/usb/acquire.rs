//! Device acquisition: identity export, `AcquireDevices`, `Response`.
//!
//! ```text
//! AwaitingIdentity ──► Calling ──► AwaitingResponse ──┬─► Succeeded
//!                                                     ├─► Cancelled
//!                                                     └─► Failed
//! ```

use usbportal_protocol::names::{USB_INTERFACE, method};
use usbportal_protocol::{AcquireDevicesArgs, AcquireDevicesOptions, AcquireResponse, DeviceSpec, ResponseStatus, request_path};
use usbportal_runtime::zbus::Message;
use usbportal_runtime::{CancellationToken, Error, Result};

use super::device::AcquiredDevice;
use crate::parent::{Parent, identity_handle};
use crate::portal::Portal;

/// Step of an acquisition in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AcquireState {
	AwaitingIdentity,
	Calling,
	AwaitingResponse,
	Succeeded,
	Cancelled,
	Failed,
}

/// Handle to an accepted acquisition, redeemed with
/// [`Usb::finish_acquire_devices`](crate::Usb::finish_acquire_devices).
///
/// `granted` holds the devices the `Response` signal reported as opened.
/// Entries the broker marked as failed are not included; their details are
/// only available from the finish loop.
#[derive(Debug)]
pub struct AcquisitionRequest {
	path: String,
	granted: Vec<AcquiredDevice>,
}

impl AcquisitionRequest {
	/// Wraps a request path obtained elsewhere.
	pub fn from_path(path: impl Into<String>) -> Self {
		Self {
			path: path.into(),
			granted: Vec::new(),
		}
	}

	/// Broker-side request object path.
	pub fn path(&self) -> &str {
		&self.path
	}

	pub fn granted(&self) -> &[AcquiredDevice] {
		&self.granted
	}

	pub fn take_granted(&mut self) -> Vec<AcquiredDevice> {
		std::mem::take(&mut self.granted)
	}
}

pub(crate) struct AcquireFlow<'a> {
	portal: &'a Portal,
	state: AcquireState,
}

impl<'a> AcquireFlow<'a> {
	pub(crate) fn new(portal: &'a Portal) -> Self {
		Self {
			portal,
			state: AcquireState::AwaitingIdentity,
		}
	}

	pub(crate) async fn run(
		mut self,
		parent: Option<&dyn Parent>,
		devices: &[DeviceSpec],
		cancel: Option<&CancellationToken>,
	) -> Result<AcquisitionRequest> {
		let result = self.drive(parent, devices, cancel).await;
		match &result {
			Ok(_) => self.transition(AcquireState::Succeeded),
			Err(e) if e.is_cancelled() => self.transition(AcquireState::Cancelled),
			Err(e) => {
				tracing::debug!(error = %e, "Acquire flow failed");
				self.transition(AcquireState::Failed);
			}
		}
		result
	}

	async fn drive(
		&mut self,
		parent: Option<&dyn Parent>,
		devices: &[DeviceSpec],
		cancel: Option<&CancellationToken>,
	) -> Result<AcquisitionRequest> {
		let handle = match cancel {
			Some(token) => tokio::select! {
				biased;
				handle = identity_handle(parent) => handle?,
				_ = token.cancelled() => {
					return Err(Error::Cancelled("acquire USB devices cancelled while exporting parent".to_string()));
				}
			},
			None => identity_handle(parent).await?,
		};
		self.transition(AcquireState::Calling);

		let sender = self.portal.sender()?;
		let token = self.portal.next_token();
		let path = request_path(&sender, &token)?;

		let args: AcquireDevicesArgs = (
			handle,
			devices.iter().map(DeviceSpec::to_wire).collect(),
			AcquireDevicesOptions::with_token(token),
		);
		let call = self
			.portal
			.broker()
			.method_call(USB_INTERFACE, method::ACQUIRE_DEVICES, &args)?;

		self.transition(AcquireState::AwaitingResponse);
		let granted = self
			.portal
			.correlator()
			.request(call, path.as_str(), cancel, decode_response)
			.await?;

		Ok(AcquisitionRequest {
			path: path.to_string(),
			granted,
		})
	}

	fn transition(&mut self, next: AcquireState) {
		tracing::debug!(from = ?self.state, to = ?next, "Acquire flow");
		self.state = next;
	}
}

fn decode_response(signal: Message) -> Result<Vec<AcquiredDevice>> {
	let response: AcquireResponse = signal
		.body()
		.deserialize()
		.map_err(|e| Error::Protocol(format!("malformed Response signal: {e}")))?;

	match response.status() {
		ResponseStatus::Success => Ok(response
			.results
			.into_iter()
			.filter_map(|(id, result)| AcquiredDevice::granted(id, result))
			.collect()),
		ResponseStatus::Cancelled => Err(Error::Cancelled("acquire USB devices cancelled".to_string())),
		ResponseStatus::Other(code) => Err(Error::OperationFailed(format!(
			"acquire USB devices failed (status {code})"
		))),
	}
}

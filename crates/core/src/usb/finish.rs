//! `AcquireDevicesFinish` polling.
//!
//! The broker hands out acquired devices one reply at a time. The loop keeps
//! calling until a reply sets `finished`; any failed call aborts the whole
//! loop and the devices collected so far are dropped. Replies are expected to
//! carry one device each until the last; other counts are accepted and
//! logged.

use usbportal_protocol::names::{USB_INTERFACE, method};
use usbportal_protocol::{FinishReply, empty_options};
use usbportal_runtime::{Error, Result};

use super::acquire::AcquisitionRequest;
use super::device::AcquiredDevice;
use crate::portal::Portal;

pub(crate) async fn finish(portal: &Portal, request: AcquisitionRequest) -> Result<Vec<AcquiredDevice>> {
	let path = request.path();
	let mut devices = Vec::new();
	let mut polls = 0usize;

	loop {
		let call = portal.broker().method_call(
			USB_INTERFACE,
			method::ACQUIRE_DEVICES_FINISH,
			&(path, empty_options()),
		)?;
		let reply = portal.bus().call(call).await?;
		let FinishReply { results, finished } = reply
			.body()
			.deserialize()
			.map_err(|e| Error::Protocol(format!("malformed AcquireDevicesFinish reply: {e}")))?;
		polls += 1;

		if !finished && results.len() != 1 {
			tracing::warn!(
				path,
				poll = polls,
				entries = results.len(),
				"AcquireDevicesFinish reply without exactly one device"
			);
		}

		devices.extend(
			results
				.into_iter()
				.map(|(id, result)| AcquiredDevice::from_result(id, result)),
		);

		if finished {
			break;
		}
	}

	tracing::debug!(path, polls, devices = devices.len(), "Acquisition finished");
	Ok(devices)
}

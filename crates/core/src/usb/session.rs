//! USB monitoring session.
//!
//! A [`UsbSession`] owns its generic [`Session`] and is registered on it
//! through a weak back-reference. At construction it subscribes to the
//! broker's `DeviceEvents` signal. That signal is broadcast for every session
//! on the connection; every delivery method takes an [`EventScope`] choosing
//! between this session's batches and all of them.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::mpsc;
use usbportal_protocol::names::{USB_INTERFACE, signal};
use usbportal_runtime::zbus::Message;
use usbportal_runtime::{Bus, Error, Result, SignalRule, SubscriptionId};

use crate::events::{
	DeviceEventBatch, DeviceEventHub, DeviceEventStream, DeviceEventWaiter, EventScope, EventSubscription,
};
use crate::portal::Portal;
use crate::session::Session;

/// State reachable from the generic session's back-reference.
pub(crate) struct UsbSessionShared {
	events: DeviceEventHub,
}

/// Long-lived session delivering USB device events.
pub struct UsbSession {
	shared: Arc<UsbSessionShared>,
	session: Arc<Session>,
	bus: Arc<dyn Bus>,
	subscription: Option<SubscriptionId>,
}

impl UsbSession {
	pub(crate) fn new(portal: &Portal, path: &str) -> Result<Self> {
		let session = Session::new(Arc::clone(portal.bus()), portal.broker().clone(), path)?;
		let shared = Arc::new(UsbSessionShared {
			events: DeviceEventHub::new(path, portal.config().event_capacity),
		});
		session.attach_usb_session(&shared);

		let subscription = portal
			.bus()
			.subscribe(SignalRule::new(USB_INTERFACE, signal::DEVICE_EVENTS))?;
		tokio::spawn(forward_device_events(subscription.signals, Arc::downgrade(&shared)));

		tracing::debug!(path, subscription = subscription.id, "USB session created");

		Ok(Self {
			shared,
			session,
			bus: Arc::clone(portal.bus()),
			subscription: Some(subscription.id),
		})
	}

	/// Broker-side session path.
	pub fn path(&self) -> &str {
		self.session.path()
	}

	/// The generic session this USB session owns.
	pub fn session(&self) -> &Arc<Session> {
		&self.session
	}

	/// Closes the session on the broker. Does not tear down this handle.
	pub async fn close(&self) -> Result<()> {
		self.session.close().await
	}

	/// Stream of every batch in `scope` received from now on.
	pub fn device_events(&self, scope: EventScope) -> DeviceEventStream {
		self.shared.events.stream(scope)
	}

	/// Registers a one-shot waiter immediately; await it with [`DeviceEventWaiter::wait`].
	pub fn device_event_waiter<F>(&self, scope: EventScope, predicate: F, timeout: Duration) -> DeviceEventWaiter
	where
		F: Fn(&DeviceEventBatch) -> bool + Send + Sync + 'static,
	{
		self.shared.events.waiter(scope, predicate, timeout)
	}

	/// Waits for the next batch in `scope` matching `predicate`.
	///
	/// # Errors
	///
	/// - [`Error::Timeout`] if nothing matches within `timeout`
	/// - [`Error::ChannelClosed`] if the session is torn down first
	pub async fn wait_for_device_event<F>(
		&self,
		scope: EventScope,
		predicate: F,
		timeout: Duration,
	) -> Result<DeviceEventBatch>
	where
		F: Fn(&DeviceEventBatch) -> bool + Send + Sync + 'static,
	{
		self.device_event_waiter(scope, predicate, timeout).wait().await
	}

	/// Calls `handler` for each batch in `scope` until the returned
	/// subscription is dropped.
	pub fn on_device_event<F>(&self, scope: EventScope, handler: F) -> EventSubscription
	where
		F: Fn(DeviceEventBatch) + Send + Sync + 'static,
	{
		self.shared.events.spawn_handler(scope, handler)
	}

	/// Unsubscribes from `DeviceEvents` and detaches from the generic session.
	///
	/// # Errors
	///
	/// [`Error::InvalidState`] if the generic session was disposed first.
	pub fn teardown(mut self) -> Result<()> {
		self.release()
	}

	fn release(&mut self) -> Result<()> {
		let Some(id) = self.subscription.take() else {
			return Ok(());
		};

		if !self.bus.unsubscribe(id) {
			tracing::warn!(path = self.session.path(), subscription = id, "DeviceEvents subscription already gone");
		}

		if self.session.is_disposed() {
			tracing::error!(
				path = self.session.path(),
				"Generic session disposed before its USB session"
			);
			return Err(Error::InvalidState(format!(
				"session {} disposed before its USB session",
				self.session.path()
			)));
		}

		self.session.detach_usb_session();
		tracing::debug!(path = self.session.path(), "USB session torn down");
		Ok(())
	}
}

impl Drop for UsbSession {
	fn drop(&mut self) {
		// Violations are already logged by release().
		let _ = self.release();
	}
}

impl std::fmt::Debug for UsbSession {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("UsbSession")
			.field("path", &self.session.path())
			.field("subscription", &self.subscription)
			.finish()
	}
}

async fn forward_device_events(mut signals: mpsc::UnboundedReceiver<Message>, shared: Weak<UsbSessionShared>) {
	while let Some(signal) = signals.recv().await {
		let Some(shared) = shared.upgrade() else {
			break;
		};

		match DeviceEventBatch::decode(&signal) {
			Ok(batch) => {
				tracing::debug!(
					session = batch.session_path(),
					events = batch.len(),
					"Device events"
				);
				shared.events.publish(batch);
			}
			Err(e) => {
				tracing::warn!("Malformed DeviceEvents signal (ignored): {}", e);
			}
		}
	}
}

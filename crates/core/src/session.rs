//! Generic portal session.
//!
//! A [`Session`] mirrors an `org.freedesktop.portal.Session` object on the
//! broker. It watches the object's `Closed` signal, so a session the broker
//! ends on its own moves to [`SessionState::Closed`] without a local call.
//!
//! Interface-specific sessions such as [`UsbSession`] own one and register
//! themselves through a non-owning back-reference, so the generic session can
//! tell when it is being destroyed out of order.
//!
//! [`UsbSession`]: crate::UsbSession

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use usbportal_protocol::names::{SESSION_INTERFACE, method};
use usbportal_runtime::zbus::Message;
use usbportal_runtime::{Broker, Bus, Error, Result, SignalRule, SubscriptionId};

use crate::usb::session::UsbSessionShared;

/// Lifecycle of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
	Active,
	/// Closed locally through [`Session::close`] or by the broker.
	Closed,
	/// Destroyed locally; the handle is unusable.
	Disposed,
}

pub struct Session {
	path: String,
	bus: Arc<dyn Bus>,
	broker: Broker,
	state: Mutex<SessionState>,
	closed_subscription: Mutex<Option<SubscriptionId>>,
	usb_session: Mutex<Weak<UsbSessionShared>>,
}

impl Session {
	/// Creates the handle and starts watching the broker's `Closed` signal.
	pub(crate) fn new(bus: Arc<dyn Bus>, broker: Broker, path: impl Into<String>) -> Result<Arc<Self>> {
		let path = path.into();
		let subscription = bus.subscribe(SignalRule::session_closed(&path))?;

		let session = Arc::new(Self {
			path,
			bus,
			broker,
			state: Mutex::new(SessionState::Active),
			closed_subscription: Mutex::new(Some(subscription.id)),
			usb_session: Mutex::new(Weak::new()),
		});
		tokio::spawn(watch_closed(subscription.signals, Arc::downgrade(&session)));

		Ok(session)
	}

	/// Broker-side object path of this session.
	pub fn path(&self) -> &str {
		&self.path
	}

	pub fn state(&self) -> SessionState {
		*self.state.lock()
	}

	pub fn is_disposed(&self) -> bool {
		self.state() == SessionState::Disposed
	}

	/// Returns true while a USB session is attached to this session.
	pub fn has_usb_session(&self) -> bool {
		self.usb_session.lock().strong_count() > 0
	}

	/// Asks the broker to close the session. Closing a closed session is a no-op.
	///
	/// # Errors
	///
	/// [`Error::InvalidState`] if the session was disposed.
	pub async fn close(&self) -> Result<()> {
		match self.state() {
			SessionState::Disposed => {
				return Err(Error::InvalidState(format!("session {} already disposed", self.path)));
			}
			SessionState::Closed => return Ok(()),
			SessionState::Active => {}
		}

		let call = self
			.broker
			.method_call_at(&self.path, SESSION_INTERFACE, method::CLOSE, &())?;
		self.bus.call(call).await?;

		if self.mark_closed() {
			tracing::debug!(path = %self.path, "Session closed");
		}
		Ok(())
	}

	/// Destroys the local handle and stops watching for `Closed`.
	///
	/// # Errors
	///
	/// [`Error::InvalidState`] if a USB session still depends on this one;
	/// the session is disposed regardless and the USB session loses its
	/// back-reference.
	pub fn dispose(&self) -> Result<()> {
		*self.state.lock() = SessionState::Disposed;
		self.stop_watching();

		let orphaned = std::mem::take(&mut *self.usb_session.lock());
		if orphaned.strong_count() > 0 {
			tracing::error!(
				path = %self.path,
				"Session disposed while its USB session is still alive"
			);
			return Err(Error::InvalidState(format!(
				"session {} disposed before its USB session",
				self.path
			)));
		}

		tracing::debug!(path = %self.path, "Session disposed");
		Ok(())
	}

	pub(crate) fn attach_usb_session(&self, usb_session: &Arc<UsbSessionShared>) {
		*self.usb_session.lock() = Arc::downgrade(usb_session);
	}

	pub(crate) fn detach_usb_session(&self) {
		*self.usb_session.lock() = Weak::new();
	}

	/// Active -> Closed. Returns false if the session had already left `Active`.
	fn mark_closed(&self) -> bool {
		let mut state = self.state.lock();
		if *state != SessionState::Active {
			return false;
		}
		*state = SessionState::Closed;
		true
	}

	fn stop_watching(&self) {
		let Some(id) = self.closed_subscription.lock().take() else {
			return;
		};
		if !self.bus.unsubscribe(id) {
			tracing::warn!(path = %self.path, subscription = id, "Closed subscription already gone");
		}
	}
}

impl Drop for Session {
	fn drop(&mut self) {
		self.stop_watching();
	}
}

impl std::fmt::Debug for Session {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Session")
			.field("path", &self.path)
			.field("state", &self.state())
			.field("has_usb_session", &self.has_usb_session())
			.finish()
	}
}

async fn watch_closed(mut signals: mpsc::UnboundedReceiver<Message>, session: Weak<Session>) {
	while signals.recv().await.is_some() {
		let Some(session) = session.upgrade() else {
			break;
		};
		if session.mark_closed() {
			tracing::debug!(path = %session.path, "Session closed by broker");
		}
	}
}

#[cfg(test)]
mod tests {
	use usbportal_protocol::names::USB_INTERFACE;
	use usbportal_protocol::zvariant::Value;
	use usbportal_runtime::fake_bus::{CallOutcome, FakeBusBuilder, FakeBusController};

	use super::*;

	const PATH: &str = "/org/freedesktop/portal/desktop/session/1_42/portal0";

	fn emit_closed(controller: &FakeBusController, path: &str, interface: &str) -> usize {
		let details: std::collections::HashMap<&str, Value<'_>> = std::collections::HashMap::new();
		controller.emit_signal(path, interface, "Closed", &(details,))
	}

	async fn settle_until(session: &Session, state: SessionState) {
		for _ in 0..100 {
			if session.state() == state {
				return;
			}
			tokio::task::yield_now().await;
		}
	}

	#[tokio::test]
	async fn close_is_sent_once() {
		let (bus, controller) = FakeBusBuilder::new().build();
		controller.on_call("Close", |call, _| CallOutcome::ok(call));
		let session = Session::new(bus, Broker::default(), PATH).unwrap();

		session.close().await.unwrap();
		session.close().await.unwrap();

		let closes = controller.calls_to("Close");
		assert_eq!(closes.len(), 1);
		assert_eq!(closes[0].header().path().map(|p| p.as_str()), Some(PATH));
		assert_eq!(
			closes[0].header().interface().map(|i| i.as_str()),
			Some(SESSION_INTERFACE)
		);
		assert_eq!(session.state(), SessionState::Closed);
	}

	#[tokio::test]
	async fn disposed_session_refuses_close() {
		let (bus, controller) = FakeBusBuilder::new().build();
		let session = Session::new(bus, Broker::default(), PATH).unwrap();

		session.dispose().unwrap();
		let err = session.close().await.unwrap_err();

		assert!(err.is_invalid_state());
		assert!(controller.calls().is_empty());
	}

	#[tokio::test]
	async fn broker_closed_signal_closes_the_session() {
		let (bus, controller) = FakeBusBuilder::new().build();
		let session = Session::new(bus, Broker::default(), PATH).unwrap();

		assert_eq!(emit_closed(&controller, PATH, SESSION_INTERFACE), 1);
		settle_until(&session, SessionState::Closed).await;
		assert_eq!(session.state(), SessionState::Closed);

		// Already closed by the broker: no Close call goes out.
		session.close().await.unwrap();
		assert!(controller.calls().is_empty());
	}

	#[tokio::test]
	async fn closed_signal_for_another_path_is_ignored() {
		let (bus, controller) = FakeBusBuilder::new().build();
		let session = Session::new(bus, Broker::default(), PATH).unwrap();

		let other = "/org/freedesktop/portal/desktop/session/1_42/portal1";
		assert_eq!(emit_closed(&controller, other, SESSION_INTERFACE), 0);
		assert_eq!(emit_closed(&controller, PATH, USB_INTERFACE), 0);
		assert_eq!(session.state(), SessionState::Active);
	}

	#[tokio::test]
	async fn dispose_and_drop_stop_watching_once() {
		let (bus, controller) = FakeBusBuilder::new().build();
		let session = Session::new(bus, Broker::default(), PATH).unwrap();
		assert_eq!(controller.active_subscriptions(), 1);

		session.dispose().unwrap();
		assert_eq!(controller.active_subscriptions(), 0);

		drop(session);
		assert_eq!(controller.unsubscribe_count(), 1);
		assert_eq!(controller.redundant_unsubscribes(), 0);
		assert_eq!(emit_closed(&controller, PATH, SESSION_INTERFACE), 0);
	}
}

//! zbus-backed [`Bus`] implementation.
//!
//! One [`Connection`] wraps one shared `zbus::Connection`. All method calls and
//! signal subscriptions are multiplexed over it:
//!
//! - outgoing calls register a reply callback keyed by serial before sending
//! - a single dispatch loop ([`Connection::run`]) reads every incoming message
//!   and hands it to the [`Router`]
//! - messages nobody waits for are logged at debug level and dropped

mod router;

use std::sync::Arc;

use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use usbportal_protocol::names::{REQUEST_INTERFACE, SESSION_INTERFACE, USB_INTERFACE};
use zbus::message::Type as MessageType;
use zbus::{MatchRule, Message, MessageStream};

use crate::bus::{Bus, BusFuture, SignalRule, SignalSubscription, SubscriptionId};
use crate::error::{Error, Result};

pub(crate) use router::Router;

/// Shared connection to the bus the portal broker lives on.
pub struct Connection {
	inner: zbus::Connection,
	router: Arc<Router>,
	stream: Mutex<Option<MessageStream>>,
}

impl Connection {
	/// Connects to the session bus and registers match rules for portal signals.
	pub async fn session() -> Result<Arc<Self>> {
		let conn = zbus::Connection::session().await?;
		Self::with_portal_match_rules(conn).await
	}

	/// Connects to the system bus and registers match rules for portal signals.
	pub async fn system() -> Result<Arc<Self>> {
		let conn = zbus::Connection::system().await?;
		Self::with_portal_match_rules(conn).await
	}

	/// Wraps an existing zbus connection as-is.
	///
	/// No match rules are added; the caller is responsible for making sure
	/// the signals it subscribes to are routed to this connection.
	pub fn from_zbus(inner: zbus::Connection) -> Arc<Self> {
		// The stream must exist before the first call so no reply is missed.
		let stream = MessageStream::from(&inner);
		Arc::new(Self {
			inner,
			router: Arc::new(Router::new()),
			stream: Mutex::new(Some(stream)),
		})
	}

	async fn with_portal_match_rules(inner: zbus::Connection) -> Result<Arc<Self>> {
		let connection = Self::from_zbus(inner);
		let dbus = zbus::fdo::DBusProxy::new(&connection.inner).await?;

		for interface in [REQUEST_INTERFACE, SESSION_INTERFACE, USB_INTERFACE] {
			let rule = MatchRule::builder()
				.msg_type(MessageType::Signal)
				.interface(interface)?
				.build();
			dbus.add_match_rule(rule).await.map_err(zbus::Error::from)?;
			tracing::debug!(interface, "Added signal match rule");
		}

		Ok(connection)
	}

	/// Returns the underlying zbus connection.
	pub fn zbus(&self) -> &zbus::Connection {
		&self.inner
	}

	/// Runs the message dispatch loop until the connection closes.
	///
	/// A read error ends the loop: the socket is unusable after one. Pending
	/// calls then fail with [`Error::Transport`] and subscriptions are dropped.
	///
	/// Only the first call does anything; later calls log and return.
	pub async fn run(self: &Arc<Self>) {
		let Some(mut stream) = self.stream.lock().take() else {
			tracing::error!("Dispatch loop already running for this connection");
			return;
		};

		while let Some(next) = stream.next().await {
			match next {
				Ok(message) => {
					self.router.route(message);
				}
				Err(e) => {
					tracing::error!("Failed to read message from bus: {}", e);
					break;
				}
			}
		}

		tracing::debug!("Bus connection closed, failing pending calls");
		self.router.close();
	}

	/// Starts [`run`](Self::run) on the current tokio runtime.
	pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
		let connection = Arc::clone(self);
		tokio::spawn(async move { connection.run().await })
	}
}

impl Bus for Connection {
	fn unique_name(&self) -> Option<String> {
		self.inner.unique_name().map(|name| name.to_string())
	}

	fn call(&self, call: Message) -> BusFuture<'_, Message> {
		Box::pin(async move {
			let serial = call.primary_header().serial_num().get();
			let reply = self.router.expect_reply(serial);

			{
				let header = call.header();
				tracing::debug!(
					serial,
					path = header.path().map(|p| p.as_str()).unwrap_or(""),
					member = header.member().map(|m| m.as_str()).unwrap_or(""),
					"Sending method call"
				);
			}

			self.inner.send(&call).await.map_err(|e| {
				tracing::error!("Failed to send method call: {}", e);
				Error::from(e)
			})?;

			reply.await
		})
	}

	fn send(&self, message: Message) -> BusFuture<'_, ()> {
		Box::pin(async move {
			self.inner.send(&message).await?;
			Ok(())
		})
	}

	fn subscribe(&self, rule: SignalRule) -> Result<SignalSubscription> {
		Ok(self.router.subscribe(rule))
	}

	fn unsubscribe(&self, id: SubscriptionId) -> bool {
		self.router.unsubscribe(id)
	}
}

impl std::fmt::Debug for Connection {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Connection")
			.field("unique_name", &self.unique_name())
			.field("pending_calls", &self.router.pending_calls())
			.field("subscriptions", &self.router.subscription_count())
			.finish()
	}
}

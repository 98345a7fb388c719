//! Bus facade: the seam between request orchestration and the D-Bus transport.
//!
//! Everything above this module talks to the broker through [`Bus`]. The real
//! implementation is [`Connection`](crate::Connection); tests use
//! [`FakeBus`](crate::fake_bus::FakeBus).
//!
//! Method calls and signals travel as [`zbus::Message`] so payloads are encoded
//! exactly as they go on the wire, whichever implementation carries them.

use std::future::Future;
use std::pin::Pin;

use serde::Serialize;
use tokio::sync::mpsc;
use usbportal_protocol::names::{
	PORTAL_BUS_NAME, PORTAL_OBJECT_PATH, REQUEST_INTERFACE, SESSION_INTERFACE, method, signal,
};
use zbus::Message;
use zbus::message::{Flags, Type as MessageType};
use zbus::zvariant::DynamicType;

use crate::error::Result;

/// Identifier of a signal subscription on a [`Bus`].
pub type SubscriptionId = u64;

/// Boxed future returned by [`Bus`] methods.
pub type BusFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Shared bus connection used for every call and subscription.
///
/// Implementations multiplex all traffic over one connection; nothing here is
/// per-request.
pub trait Bus: Send + Sync {
	/// Unique name of this connection on the bus (e.g. `:1.42`), if any.
	fn unique_name(&self) -> Option<String>;

	/// Sends a method call and resolves with the method-return message.
	///
	/// D-Bus error replies resolve to [`Error::Remote`](crate::Error::Remote).
	fn call(&self, call: Message) -> BusFuture<'_, Message>;

	/// Sends a message without waiting for any reply.
	fn send(&self, message: Message) -> BusFuture<'_, ()>;

	/// Registers a signal subscription.
	///
	/// Registration is synchronous: once this returns, matching signals are
	/// queued on the returned receiver even if nobody polls it yet.
	fn subscribe(&self, rule: SignalRule) -> Result<SignalSubscription>;

	/// Removes a subscription. Returns `false` if `id` was not subscribed.
	fn unsubscribe(&self, id: SubscriptionId) -> bool;
}

/// Filter selecting which signals a subscription receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalRule {
	pub interface: String,
	pub member: String,
	/// Object path to match; `None` receives the signal from every path.
	pub path: Option<String>,
}

impl SignalRule {
	pub fn new(interface: impl Into<String>, member: impl Into<String>) -> Self {
		Self {
			interface: interface.into(),
			member: member.into(),
			path: None,
		}
	}

	pub fn with_path(mut self, path: impl Into<String>) -> Self {
		self.path = Some(path.into());
		self
	}

	/// `org.freedesktop.portal.Request::Response` on one request path.
	pub fn response(path: &str) -> Self {
		Self::new(REQUEST_INTERFACE, signal::RESPONSE).with_path(path)
	}

	/// `org.freedesktop.portal.Session::Closed` on one session path.
	pub fn session_closed(path: &str) -> Self {
		Self::new(SESSION_INTERFACE, signal::CLOSED).with_path(path)
	}

	/// Returns true if `message` is a signal this rule selects.
	pub fn matches(&self, message: &Message) -> bool {
		if message.message_type() != MessageType::Signal {
			return false;
		}

		let header = message.header();
		let interface_ok = header.interface().map(|i| i.as_str()) == Some(self.interface.as_str());
		let member_ok = header.member().map(|m| m.as_str()) == Some(self.member.as_str());
		let path_ok = match &self.path {
			Some(path) => header.path().map(|p| p.as_str()) == Some(path.as_str()),
			None => true,
		};

		interface_ok && member_ok && path_ok
	}
}

/// A live signal subscription.
#[derive(Debug)]
pub struct SignalSubscription {
	pub id: SubscriptionId,
	pub signals: mpsc::UnboundedReceiver<Message>,
}

/// Address of the portal broker, used to build outgoing messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Broker {
	bus_name: String,
	object_path: String,
}

impl Default for Broker {
	fn default() -> Self {
		Self::new(PORTAL_BUS_NAME, PORTAL_OBJECT_PATH)
	}
}

impl Broker {
	pub fn new(bus_name: impl Into<String>, object_path: impl Into<String>) -> Self {
		Self {
			bus_name: bus_name.into(),
			object_path: object_path.into(),
		}
	}

	pub fn bus_name(&self) -> &str {
		&self.bus_name
	}

	pub fn object_path(&self) -> &str {
		&self.object_path
	}

	/// Builds a method call on the broker's main object.
	pub fn method_call<B>(&self, interface: &str, member: &str, body: &B) -> Result<Message>
	where
		B: Serialize + DynamicType,
	{
		self.method_call_at(&self.object_path, interface, member, body)
	}

	/// Builds a method call on an arbitrary broker object (request, session).
	pub fn method_call_at<B>(&self, path: &str, interface: &str, member: &str, body: &B) -> Result<Message>
	where
		B: Serialize + DynamicType,
	{
		let message = Message::method(path, member)?
			.destination(self.bus_name.as_str())?
			.interface(interface)?
			.build(body)?;
		Ok(message)
	}

	/// Builds the fire-and-forget `Request.Close` call for a request path.
	pub fn close_request(&self, path: &str) -> Result<Message> {
		let message = Message::method(path, method::CLOSE)?
			.destination(self.bus_name.as_str())?
			.interface(REQUEST_INTERFACE)?
			.with_flags(Flags::NoReplyExpected)?
			.build(&())?;
		Ok(message)
	}
}

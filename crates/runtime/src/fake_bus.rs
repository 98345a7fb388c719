//! In-memory [`Bus`] for unit and integration tests.
//!
//! Replays broker behaviour without a D-Bus daemon: method calls are answered
//! by per-member handlers, signals are injected through the controller and
//! routed exactly like the real connection routes them.
//!
//! # Example
//!
//! ```ignore
//! let (bus, controller) = FakeBusBuilder::new().build();
//! controller.on_call("AcquireDevices", |call, ctl| {
//!     ctl.emit_signal(PATH, REQUEST_INTERFACE, "Response", &(0u32, results()));
//!     CallOutcome::reply_path(call, PATH)
//! });
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;
use serde::Serialize;
use zbus::Message;
use zbus::zvariant::{DynamicType, ObjectPath};

use crate::bus::{Bus, BusFuture, SignalRule, SignalSubscription, SubscriptionId};
use crate::connection::Router;
use crate::error::{Error, Result};

const DEFAULT_UNIQUE_NAME: &str = ":1.42";
const FAILED: &str = "org.freedesktop.DBus.Error.Failed";

/// How the fake broker answers one method call.
#[derive(Debug)]
pub enum CallOutcome {
	/// Method-return message.
	Reply(Message),
	/// D-Bus error reply.
	Error { name: String, message: String },
	/// The bus itself failed.
	Transport(String),
	/// Never answers.
	Hang,
}

impl CallOutcome {
	/// Method return carrying `body`.
	pub fn reply<B>(call: &Message, body: &B) -> Self
	where
		B: Serialize + DynamicType,
	{
		match Message::method_reply(call).and_then(|builder| builder.build(body)) {
			Ok(reply) => CallOutcome::Reply(reply),
			Err(e) => CallOutcome::error(FAILED, &e.to_string()),
		}
	}

	/// Method return carrying a single object path (`o`).
	pub fn reply_path(call: &Message, path: &str) -> Self {
		match ObjectPath::try_from(path) {
			Ok(path) => Self::reply(call, &path),
			Err(e) => CallOutcome::error(FAILED, &e.to_string()),
		}
	}

	/// Empty method return.
	pub fn ok(call: &Message) -> Self {
		Self::reply(call, &())
	}

	pub fn error(name: &str, message: &str) -> Self {
		CallOutcome::Error {
			name: name.to_string(),
			message: message.to_string(),
		}
	}
}

type CallHandler = Arc<dyn Fn(&Message, &FakeBusController) -> CallOutcome + Send + Sync>;

struct FakeState {
	unique_name: Option<String>,
	router: Router,
	handlers: Mutex<HashMap<String, CallHandler>>,
	calls: Mutex<Vec<Message>>,
	sent: Mutex<Vec<Message>>,
	unsubscribes: AtomicUsize,
	redundant_unsubscribes: AtomicUsize,
	fail_sends: AtomicBool,
}

/// Builder for [`FakeBus`] instances.
pub struct FakeBusBuilder {
	unique_name: Option<String>,
}

impl FakeBusBuilder {
	pub fn new() -> Self {
		Self {
			unique_name: Some(DEFAULT_UNIQUE_NAME.to_string()),
		}
	}

	/// Overrides the connection's unique name (`None` for an anonymous bus).
	pub fn unique_name(mut self, name: Option<&str>) -> Self {
		self.unique_name = name.map(str::to_string);
		self
	}

	/// Builds the bus and a controller sharing its state.
	pub fn build(self) -> (Arc<FakeBus>, FakeBusController) {
		let state = Arc::new(FakeState {
			unique_name: self.unique_name,
			router: Router::new(),
			handlers: Mutex::new(HashMap::new()),
			calls: Mutex::new(Vec::new()),
			sent: Mutex::new(Vec::new()),
			unsubscribes: AtomicUsize::new(0),
			redundant_unsubscribes: AtomicUsize::new(0),
			fail_sends: AtomicBool::new(false),
		});

		let bus = Arc::new(FakeBus {
			state: Arc::clone(&state),
		});
		(bus, FakeBusController { state })
	}
}

impl Default for FakeBusBuilder {
	fn default() -> Self {
		Self::new()
	}
}

/// The bus side handed to the code under test.
pub struct FakeBus {
	state: Arc<FakeState>,
}

impl FakeBus {
	fn controller(&self) -> FakeBusController {
		FakeBusController {
			state: Arc::clone(&self.state),
		}
	}
}

impl Bus for FakeBus {
	fn unique_name(&self) -> Option<String> {
		self.state.unique_name.clone()
	}

	fn call(&self, call: Message) -> BusFuture<'_, Message> {
		Box::pin(async move {
			self.state.calls.lock().push(call.clone());

			let member = call.header().member().map(|m| m.to_string()).unwrap_or_default();
			let handler = self.state.handlers.lock().get(&member).cloned();
			let outcome = match handler {
				Some(handler) => handler(&call, &self.controller()),
				None => CallOutcome::error(
					"org.freedesktop.DBus.Error.UnknownMethod",
					&format!("no fake handler for {member}"),
				),
			};

			match outcome {
				CallOutcome::Reply(reply) => Ok(reply),
				CallOutcome::Error { name, message } => Err(Error::Remote { name, message }),
				CallOutcome::Transport(message) => Err(Error::Transport(message)),
				CallOutcome::Hang => std::future::pending().await,
			}
		})
	}

	fn send(&self, message: Message) -> BusFuture<'_, ()> {
		Box::pin(async move {
			if self.state.fail_sends.load(Ordering::SeqCst) {
				return Err(Error::Transport("fake bus refuses to send".to_string()));
			}
			self.state.sent.lock().push(message);
			Ok(())
		})
	}

	fn subscribe(&self, rule: SignalRule) -> Result<SignalSubscription> {
		Ok(self.state.router.subscribe(rule))
	}

	fn unsubscribe(&self, id: SubscriptionId) -> bool {
		self.state.unsubscribes.fetch_add(1, Ordering::SeqCst);
		let removed = self.state.router.unsubscribe(id);
		if !removed {
			self.state.redundant_unsubscribes.fetch_add(1, Ordering::SeqCst);
		}
		removed
	}
}

/// Scripts the fake broker and inspects traffic.
#[derive(Clone)]
pub struct FakeBusController {
	state: Arc<FakeState>,
}

impl FakeBusController {
	/// Answers every call to `member` with `handler`, replacing any previous one.
	pub fn on_call<F>(&self, member: &str, handler: F)
	where
		F: Fn(&Message, &FakeBusController) -> CallOutcome + Send + Sync + 'static,
	{
		self.state.handlers.lock().insert(member.to_string(), Arc::new(handler));
	}

	/// Routes `signal` to matching subscriptions. Returns how many received it.
	pub fn emit(&self, signal: Message) -> usize {
		self.state.router.route(signal)
	}

	/// Builds and routes a signal.
	pub fn emit_signal<B>(&self, path: &str, interface: &str, member: &str, body: &B) -> usize
	where
		B: Serialize + DynamicType,
	{
		match Message::signal(path, interface, member).and_then(|builder| builder.build(body)) {
			Ok(signal) => self.emit(signal),
			Err(e) => {
				tracing::error!("Failed to build fake signal {interface}.{member}: {}", e);
				0
			}
		}
	}

	/// Every method call issued so far, in order.
	pub fn calls(&self) -> Vec<Message> {
		self.state.calls.lock().clone()
	}

	pub fn calls_to(&self, member: &str) -> Vec<Message> {
		filter_member(&self.state.calls.lock(), member)
	}

	/// Every fire-and-forget message sent so far, in order.
	pub fn sent(&self) -> Vec<Message> {
		self.state.sent.lock().clone()
	}

	pub fn sent_to(&self, member: &str) -> Vec<Message> {
		filter_member(&self.state.sent.lock(), member)
	}

	/// Makes [`Bus::send`] fail.
	pub fn fail_sends(&self, fail: bool) {
		self.state.fail_sends.store(fail, Ordering::SeqCst);
	}

	pub fn active_subscriptions(&self) -> usize {
		self.state.router.subscription_count()
	}

	/// Total `unsubscribe` calls, including redundant ones.
	pub fn unsubscribe_count(&self) -> usize {
		self.state.unsubscribes.load(Ordering::SeqCst)
	}

	/// `unsubscribe` calls for ids that were not subscribed.
	pub fn redundant_unsubscribes(&self) -> usize {
		self.state.redundant_unsubscribes.load(Ordering::SeqCst)
	}
}

impl std::fmt::Debug for FakeBusController {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("FakeBusController")
			.field("calls", &self.state.calls.lock().len())
			.field("sent", &self.state.sent.lock().len())
			.field("subscriptions", &self.active_subscriptions())
			.finish()
	}
}

fn filter_member(messages: &[Message], member: &str) -> Vec<Message> {
	messages
		.iter()
		.filter(|m| m.header().member().map(|n| n.as_str()) == Some(member))
		.cloned()
		.collect()
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::bus::Broker;
	use usbportal_protocol::names::USB_INTERFACE;

	#[tokio::test]
	async fn unscripted_call_fails_with_unknown_method() {
		let (bus, _controller) = FakeBusBuilder::new().build();
		let call = Broker::default().method_call(USB_INTERFACE, "EnumerateDevices", &()).unwrap();

		let err = bus.call(call).await.unwrap_err();
		assert_eq!(err.error_name(), Some("org.freedesktop.DBus.Error.UnknownMethod"));
	}

	#[tokio::test]
	async fn redundant_unsubscribe_is_counted() {
		let (bus, controller) = FakeBusBuilder::new().build();
		let sub = bus.subscribe(SignalRule::new(USB_INTERFACE, "DeviceEvents")).unwrap();

		assert!(bus.unsubscribe(sub.id));
		assert!(!bus.unsubscribe(sub.id));
		assert_eq!(controller.unsubscribe_count(), 2);
		assert_eq!(controller.redundant_unsubscribes(), 1);
	}
}

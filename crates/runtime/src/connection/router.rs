//! Reply correlation and signal fan-out.
//!
//! The [`Router`] owns the two tables a bus connection needs:
//! - pending method calls keyed by serial, each completed through a oneshot
//! - signal subscriptions keyed by [`SubscriptionId`], each fed through an mpsc
//!
//! [`Router::route`] is fed every incoming message by the dispatch loop.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use zbus::Message;
use zbus::message::Type as MessageType;

use crate::bus::{SignalRule, SignalSubscription, SubscriptionId};
use crate::error::{Error, Result};

/// Pending method calls keyed by the call's serial number.
type CallbackMap = Arc<DashMap<u32, oneshot::Sender<Result<Message>>>>;

struct Subscriber {
	rule: SignalRule,
	tx: mpsc::UnboundedSender<Message>,
}

/// RAII guard ensuring callback cleanup when a reply future is dropped.
struct CancelGuard {
	serial: u32,
	callbacks: CallbackMap,
	completed: bool,
}

impl CancelGuard {
	fn new(serial: u32, callbacks: CallbackMap) -> Self {
		Self {
			serial,
			callbacks,
			completed: false,
		}
	}

	fn complete(&mut self) {
		self.completed = true;
	}
}

impl Drop for CancelGuard {
	fn drop(&mut self) {
		if self.completed {
			return;
		}

		if self.callbacks.remove(&self.serial).is_some() {
			tracing::debug!(serial = self.serial, "CancelGuard: removed orphaned callback");
		}
	}
}

/// Future resolving with the reply to one method call.
pub(crate) struct ReplyFuture {
	rx: oneshot::Receiver<Result<Message>>,
	guard: CancelGuard,
}

impl Future for ReplyFuture {
	type Output = Result<Message>;

	fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		match Pin::new(&mut self.rx).poll(cx) {
			Poll::Ready(result) => {
				self.guard.complete();
				Poll::Ready(result.map_err(|_| Error::ChannelClosed).and_then(|r| r))
			}
			Poll::Pending => Poll::Pending,
		}
	}
}

#[derive(Default)]
pub(crate) struct Router {
	callbacks: CallbackMap,
	subscriptions: DashMap<SubscriptionId, Subscriber>,
	next_subscription: AtomicU64,
}

impl Router {
	pub(crate) fn new() -> Self {
		Self::default()
	}

	/// Registers interest in the reply to the call with `serial`.
	///
	/// Must be called before the call is sent so a fast reply is not lost.
	pub(crate) fn expect_reply(&self, serial: u32) -> ReplyFuture {
		let (tx, rx) = oneshot::channel();
		self.callbacks.insert(serial, tx);

		ReplyFuture {
			rx,
			guard: CancelGuard::new(serial, Arc::clone(&self.callbacks)),
		}
	}

	pub(crate) fn subscribe(&self, rule: SignalRule) -> SignalSubscription {
		let id = self.next_subscription.fetch_add(1, Ordering::SeqCst) + 1;
		let (tx, signals) = mpsc::unbounded_channel();

		tracing::debug!(
			id,
			interface = %rule.interface,
			member = %rule.member,
			path = rule.path.as_deref().unwrap_or("*"),
			"Subscribed to signal"
		);

		self.subscriptions.insert(id, Subscriber { rule, tx });
		SignalSubscription { id, signals }
	}

	pub(crate) fn unsubscribe(&self, id: SubscriptionId) -> bool {
		let removed = self.subscriptions.remove(&id).is_some();
		if removed {
			tracing::debug!(id, "Unsubscribed from signal");
		}
		removed
	}

	pub(crate) fn subscription_count(&self) -> usize {
		self.subscriptions.len()
	}

	pub(crate) fn pending_calls(&self) -> usize {
		self.callbacks.len()
	}

	/// Dispatches one incoming message. Returns how many waiters received it.
	pub(crate) fn route(&self, message: Message) -> usize {
		match message.message_type() {
			MessageType::MethodReturn | MessageType::Error => self.route_reply(message),
			MessageType::Signal => self.route_signal(message),
			MessageType::MethodCall => {
				tracing::debug!("Incoming method call (ignored)");
				0
			}
		}
	}

	/// Fails every pending call; used when the connection goes away.
	pub(crate) fn close(&self) {
		let serials: Vec<u32> = self.callbacks.iter().map(|entry| *entry.key()).collect();
		for serial in serials {
			if let Some((_, tx)) = self.callbacks.remove(&serial) {
				let _ = tx.send(Err(Error::Transport("bus connection closed".to_string())));
			}
		}
		self.subscriptions.clear();
	}

	fn route_reply(&self, message: Message) -> usize {
		let Some(serial) = message.header().reply_serial() else {
			tracing::debug!("Reply without reply serial (ignored)");
			return 0;
		};

		let Some((_, callback)) = self.callbacks.remove(&serial.get()) else {
			tracing::debug!(serial = serial.get(), "Reply for unknown call (ignored)");
			return 0;
		};

		let result = if message.message_type() == MessageType::Error {
			Err(remote_error(&message))
		} else {
			Ok(message)
		};

		let _ = callback.send(result);
		1
	}

	fn route_signal(&self, message: Message) -> usize {
		let mut delivered = 0;
		for entry in self.subscriptions.iter() {
			if entry.rule.matches(&message) && entry.tx.send(message.clone()).is_ok() {
				delivered += 1;
			}
		}

		if delivered == 0 {
			let header = message.header();
			tracing::debug!(
				path = header.path().map(|p| p.as_str()).unwrap_or(""),
				member = header.member().map(|m| m.as_str()).unwrap_or(""),
				"Signal with no subscriber (ignored)"
			);
		}
		delivered
	}
}

/// Converts a D-Bus error reply into [`Error::Remote`].
fn remote_error(message: &Message) -> Error {
	let name = message
		.header()
		.error_name()
		.map(|n| n.to_string())
		.unwrap_or_else(|| "org.freedesktop.DBus.Error.Failed".to_string());
	let message = message.body().deserialize::<String>().unwrap_or_default();
	Error::Remote { name, message }
}

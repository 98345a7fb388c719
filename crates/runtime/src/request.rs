//! Request correlation: one broker call completed by a later `Response`
//! signal on a caller-derived request path.
//!
//! # Lifecycle
//!
//! 1. Subscribe to `org.freedesktop.portal.Request::Response` on the path
//! 2. Issue the initiating call (its reply only acknowledges the path)
//! 3. Wait for the first of: the signal, a call failure, cancellation
//! 4. Tear down (unsubscribe, disconnect the cancel link) exactly once
//! 5. Hand the outcome to the caller
//!
//! Subscribing before the call means a broker that answers faster than
//! the method reply cannot be missed.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use zbus::Message;
use zbus::zvariant::OwnedObjectPath;

use crate::bus::{Broker, Bus, SignalRule, SubscriptionId};
use crate::cancel::CancelLink;
use crate::error::{Error, Result};

/// Issues broker calls over a shared [`Bus`].
#[derive(Clone)]
pub struct Correlator {
	bus: Arc<dyn Bus>,
	broker: Broker,
}

impl Correlator {
	pub fn new(bus: Arc<dyn Bus>, broker: Broker) -> Self {
		Self { bus, broker }
	}

	pub fn bus(&self) -> &Arc<dyn Bus> {
		&self.bus
	}

	pub fn broker(&self) -> &Broker {
		&self.broker
	}

	/// Runs one request whose result arrives as a `Response` signal on `path`.
	///
	/// `decode` turns the signal into the operation's result. It runs after
	/// teardown, so nothing it does can race the subscription.
	pub async fn request<T, F>(
		&self,
		call: Message,
		path: &str,
		cancel: Option<&CancellationToken>,
		decode: F,
	) -> Result<T>
	where
		F: FnOnce(Message) -> Result<T>,
	{
		if cancel.is_some_and(CancellationToken::is_cancelled) {
			return Err(Error::Cancelled(format!("request {path} cancelled before it started")));
		}

		let link = match cancel {
			Some(token) => Some(CancelLink::for_request(token.clone(), Arc::clone(&self.bus), &self.broker, path)?),
			None => None,
		};

		let mut pending = PendingRequest::begin(Arc::clone(&self.bus), path, link)?;
		let outcome = pending.complete(call).await;
		pending.teardown();

		decode(outcome?)
	}

	/// Issues a plain method call that can be abandoned through `cancel`.
	///
	/// No `Close` is sent: there is no request object to close.
	pub async fn call(&self, call: Message, cancel: Option<&CancellationToken>) -> Result<Message> {
		let Some(token) = cancel else {
			return self.bus.call(call).await;
		};

		let mut link = CancelLink::local(token.clone());
		tokio::select! {
			biased;
			reply = self.bus.call(call) => {
				link.disconnect();
				reply
			}
			_ = token.cancelled() => Err(link.fire().await),
		}
	}
}

impl std::fmt::Debug for Correlator {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Correlator").field("broker", &self.broker).finish()
	}
}

/// State of one outstanding request.
///
/// [`teardown`](Self::teardown) is idempotent and also runs on drop, so a
/// future dropped mid-flight leaves no subscription behind.
pub struct PendingRequest {
	bus: Arc<dyn Bus>,
	path: String,
	subscription: Option<SubscriptionId>,
	signals: mpsc::UnboundedReceiver<Message>,
	cancel_link: Option<CancelLink>,
}

impl PendingRequest {
	/// Subscribes to `Response` on `path`.
	pub fn begin(bus: Arc<dyn Bus>, path: &str, cancel_link: Option<CancelLink>) -> Result<Self> {
		let subscription = bus.subscribe(SignalRule::response(path))?;
		tracing::debug!(path, subscription = subscription.id, "Request pending");

		Ok(Self {
			bus,
			path: path.to_string(),
			subscription: Some(subscription.id),
			signals: subscription.signals,
			cancel_link,
		})
	}

	pub fn path(&self) -> &str {
		&self.path
	}

	/// Issues `call` and waits for the first terminal event.
	///
	/// A signal and a cancellation observed together resolve with the signal.
	pub async fn complete(&mut self, call: Message) -> Result<Message> {
		let bus = &self.bus;
		let path = self.path.as_str();
		let signals = &mut self.signals;

		let work = async {
			let reply = bus.call(call).await?;
			check_request_path(&reply, path);

			signals.recv().await.ok_or_else(|| {
				Error::Transport(format!("signal subscription for {path} closed before Response"))
			})
		};

		match self.cancel_link.as_mut() {
			Some(link) => {
				// Borrow the token only for the race, then fire with the link itself.
				let cancelled = {
					let link_ref: &CancelLink = link;
					tokio::select! {
						biased;
						result = work => Some(result),
						_ = link_ref.cancelled() => None,
					}
				};
				match cancelled {
					Some(result) => result,
					None => Err(link.fire().await),
				}
			}
			None => work.await,
		}
	}

	/// Unsubscribes and disconnects the cancel link. Later calls do nothing.
	pub fn teardown(&mut self) {
		let Some(id) = self.subscription.take() else {
			return;
		};

		if !self.bus.unsubscribe(id) {
			tracing::warn!(path = %self.path, subscription = id, "Response subscription already gone");
		}
		if let Some(mut link) = self.cancel_link.take() {
			link.disconnect();
		}
		self.signals.close();
		tracing::debug!(path = %self.path, "Request torn down");
	}
}

impl Drop for PendingRequest {
	fn drop(&mut self) {
		self.teardown();
	}
}

impl std::fmt::Debug for PendingRequest {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("PendingRequest")
			.field("path", &self.path)
			.field("subscription", &self.subscription)
			.field("cancel_link", &self.cancel_link)
			.finish()
	}
}

fn check_request_path(reply: &Message, expected: &str) {
	match reply.body().deserialize::<OwnedObjectPath>() {
		Ok(actual) if actual.as_str() == expected => {}
		Ok(actual) => {
			tracing::warn!(
				expected,
				actual = actual.as_str(),
				"Broker returned a different request path, keeping the precomputed one"
			);
		}
		Err(e) => {
			tracing::debug!(expected, "Reply carries no request path: {}", e);
		}
	}
}

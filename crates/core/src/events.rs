//! Device-event delivery for USB sessions.
//!
//! The broker broadcasts `DeviceEvents` to every session on a connection and
//! names the addressed session inside the payload. Each receiver picks an
//! [`EventScope`]: only batches for its own session, or everything the
//! connection hears.
//!
//! - [`DeviceEventStream`] - ordered batches, skipping over lag
//! - [`DeviceEventWaiter`] - first batch matching a predicate, with timeout
//! - [`EventSubscription`] - callback handler that stops when dropped
//!
//! Waiters are completed before streams are fed, so a waiter registered
//! ahead of a batch always receives it even if every stream is lagging.

use std::sync::Arc;
use std::time::Duration;

use futures_util::Stream;
use parking_lot::Mutex;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use usbportal_protocol::{DeviceEventKind, DeviceEventsBody, DeviceInfo};
use usbportal_runtime::zbus::Message;
use usbportal_runtime::{Error, Result};

/// One device change reported by the broker.
#[derive(Debug)]
pub struct DeviceEvent {
	pub id: String,
	pub kind: DeviceEventKind,
	pub info: DeviceInfo,
}

/// Events delivered together in one `DeviceEvents` signal.
#[derive(Debug, Clone)]
pub struct DeviceEventBatch {
	session: Arc<str>,
	events: Arc<[DeviceEvent]>,
}

impl DeviceEventBatch {
	pub(crate) fn decode(signal: &Message) -> Result<Self> {
		let body: DeviceEventsBody = signal
			.body()
			.deserialize()
			.map_err(|e| Error::Protocol(format!("malformed DeviceEvents signal: {e}")))?;
		let events: Vec<DeviceEvent> = body
			.events
			.into_iter()
			.map(|(id, kind, info)| DeviceEvent {
				id,
				kind: DeviceEventKind::parse(&kind),
				info,
			})
			.collect();

		Ok(Self {
			session: Arc::from(body.session.as_str()),
			events: events.into(),
		})
	}

	/// Session path the broker addressed this batch to.
	pub fn session_path(&self) -> &str {
		&self.session
	}

	pub fn is_for(&self, session_path: &str) -> bool {
		&*self.session == session_path
	}

	pub fn events(&self) -> &[DeviceEvent] {
		&self.events
	}

	pub fn len(&self) -> usize {
		self.events.len()
	}

	pub fn is_empty(&self) -> bool {
		self.events.is_empty()
	}
}

/// Which `DeviceEvents` batches a receiver gets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EventScope {
	/// Only batches addressed to the receiving session.
	#[default]
	Session,
	/// Every batch on the connection, whichever session it names.
	All,
}

/// Scope resolved against one session path.
#[derive(Clone)]
struct Filter {
	own_session: Option<Arc<str>>,
}

impl Filter {
	fn accepts(&self, batch: &DeviceEventBatch) -> bool {
		match &self.own_session {
			Some(path) => batch.is_for(path),
			None => true,
		}
	}
}

type Predicate = Box<dyn Fn(&DeviceEventBatch) -> bool + Send + Sync>;

struct Waiter {
	filter: Filter,
	predicate: Predicate,
	tx: oneshot::Sender<DeviceEventBatch>,
}

/// Fans decoded batches out to one session's waiters, streams and handlers.
pub(crate) struct DeviceEventHub {
	session: Arc<str>,
	tx: broadcast::Sender<DeviceEventBatch>,
	waiters: Mutex<Vec<Waiter>>,
}

impl DeviceEventHub {
	pub(crate) fn new(session: &str, capacity: usize) -> Self {
		let (tx, _) = broadcast::channel(capacity.max(1));
		Self {
			session: Arc::from(session),
			tx,
			waiters: Mutex::new(Vec::new()),
		}
	}

	fn filter(&self, scope: EventScope) -> Filter {
		Filter {
			own_session: match scope {
				EventScope::Session => Some(Arc::clone(&self.session)),
				EventScope::All => None,
			},
		}
	}

	pub(crate) fn publish(&self, batch: DeviceEventBatch) {
		{
			let mut waiters = self.waiters.lock();
			let pending = std::mem::take(&mut *waiters);
			for waiter in pending {
				if waiter.tx.is_closed() {
					continue;
				}
				if waiter.filter.accepts(&batch) && (waiter.predicate)(&batch) {
					let _ = waiter.tx.send(batch.clone());
				} else {
					waiters.push(waiter);
				}
			}
		}
		let _ = self.tx.send(batch);
	}

	pub(crate) fn stream(&self, scope: EventScope) -> DeviceEventStream {
		DeviceEventStream {
			rx: self.tx.subscribe(),
			filter: self.filter(scope),
		}
	}

	pub(crate) fn waiter<F>(&self, scope: EventScope, predicate: F, timeout: Duration) -> DeviceEventWaiter
	where
		F: Fn(&DeviceEventBatch) -> bool + Send + Sync + 'static,
	{
		let (tx, rx) = oneshot::channel();
		self.waiters.lock().push(Waiter {
			filter: self.filter(scope),
			predicate: Box::new(predicate),
			tx,
		});
		DeviceEventWaiter { rx, timeout }
	}

	pub(crate) fn spawn_handler<F>(&self, scope: EventScope, handler: F) -> EventSubscription
	where
		F: Fn(DeviceEventBatch) + Send + Sync + 'static,
	{
		let mut stream = self.stream(scope);
		let task = tokio::spawn(async move {
			while let Some(batch) = stream.recv().await {
				handler(batch);
			}
		});
		EventSubscription { task: Some(task) }
	}

	#[cfg(test)]
	fn waiter_count(&self) -> usize {
		self.waiters.lock().len()
	}
}

/// Ordered device-event batches for one session.
///
/// Returns `None` once the session is torn down.
pub struct DeviceEventStream {
	rx: broadcast::Receiver<DeviceEventBatch>,
	filter: Filter,
}

impl DeviceEventStream {
	pub async fn recv(&mut self) -> Option<DeviceEventBatch> {
		loop {
			match self.rx.recv().await {
				Ok(batch) if self.filter.accepts(&batch) => return Some(batch),
				Ok(_) => {}
				Err(broadcast::error::RecvError::Lagged(missed)) => {
					tracing::warn!(missed, "Device event receiver lagged, batches dropped");
				}
				Err(broadcast::error::RecvError::Closed) => return None,
			}
		}
	}

	/// Adapts the receiver into a [`Stream`].
	pub fn into_stream(self) -> impl Stream<Item = DeviceEventBatch> + Send {
		futures_util::stream::unfold(self, |mut events| async move {
			let batch = events.recv().await?;
			Some((batch, events))
		})
	}
}

/// Pending capture of the first matching batch.
///
/// The waiter is registered when created, so batches arriving before
/// [`wait`](Self::wait) is awaited are not missed.
pub struct DeviceEventWaiter {
	rx: oneshot::Receiver<DeviceEventBatch>,
	timeout: Duration,
}

impl DeviceEventWaiter {
	/// # Errors
	///
	/// - [`Error::Timeout`] if no matching batch arrives in time
	/// - [`Error::ChannelClosed`] if the session went away first
	pub async fn wait(self) -> Result<DeviceEventBatch> {
		match tokio::time::timeout(self.timeout, self.rx).await {
			Ok(Ok(batch)) => Ok(batch),
			Ok(Err(_)) => Err(Error::ChannelClosed),
			Err(_) => Err(Error::Timeout(format!(
				"no matching device event within {:?}",
				self.timeout
			))),
		}
	}
}

/// Running callback handler. Dropping it stops the handler.
pub struct EventSubscription {
	task: Option<JoinHandle<()>>,
}

impl EventSubscription {
	/// Stops the handler; equivalent to dropping the subscription.
	pub fn unsubscribe(mut self) {
		self.stop();
	}

	fn stop(&mut self) {
		if let Some(task) = self.task.take() {
			task.abort();
		}
	}
}

impl Drop for EventSubscription {
	fn drop(&mut self) {
		self.stop();
	}
}

impl std::fmt::Debug for EventSubscription {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("EventSubscription")
			.field("active", &self.task.as_ref().is_some_and(|t| !t.is_finished()))
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::{AtomicUsize, Ordering};

	use futures_util::StreamExt;

	use super::*;

	const OWN: &str = "/org/freedesktop/portal/desktop/session/1_42/portal0";
	const OTHER: &str = "/org/freedesktop/portal/desktop/session/1_42/portal9";

	fn batch(session: &str, ids: &[&str]) -> DeviceEventBatch {
		let events: Vec<DeviceEvent> = ids
			.iter()
			.map(|id| DeviceEvent {
				id: id.to_string(),
				kind: DeviceEventKind::Add,
				info: DeviceInfo::default(),
			})
			.collect();
		DeviceEventBatch {
			session: Arc::from(session),
			events: events.into(),
		}
	}

	#[tokio::test]
	async fn session_scope_skips_other_sessions() {
		let hub = DeviceEventHub::new(OWN, 8);
		let mut own = hub.stream(EventScope::Session);
		let mut all = hub.stream(EventScope::All);

		hub.publish(batch(OTHER, &["x"]));
		hub.publish(batch(OWN, &["a"]));

		assert_eq!(own.recv().await.unwrap().events()[0].id, "a");
		assert_eq!(all.recv().await.unwrap().session_path(), OTHER);
		assert_eq!(all.recv().await.unwrap().session_path(), OWN);
	}

	#[tokio::test]
	async fn waiter_respects_scope_and_predicate() {
		let hub = DeviceEventHub::new(OWN, 8);
		let waiter = hub.waiter(EventScope::Session, |b| b.len() == 2, Duration::from_secs(5));

		hub.publish(batch(OTHER, &["x", "y"]));
		hub.publish(batch(OWN, &["a"]));
		assert_eq!(hub.waiter_count(), 1);
		hub.publish(batch(OWN, &["a", "b"]));

		let got = waiter.wait().await.unwrap();
		assert!(got.is_for(OWN));
		assert_eq!(got.len(), 2);
		assert_eq!(hub.waiter_count(), 0);
	}

	#[tokio::test]
	async fn abandoned_waiters_are_pruned() {
		let hub = DeviceEventHub::new(OWN, 8);
		drop(hub.waiter(EventScope::All, |_| false, Duration::from_secs(5)));

		hub.publish(batch(OWN, &["a"]));
		assert_eq!(hub.waiter_count(), 0);
	}

	#[tokio::test]
	async fn lagging_stream_resumes_with_newest_batches() {
		let hub = DeviceEventHub::new(OWN, 2);
		let mut stream = hub.stream(EventScope::All);

		for id in ["0", "1", "2", "3", "4"] {
			hub.publish(batch(OWN, &[id]));
		}

		assert_eq!(stream.recv().await.unwrap().events()[0].id, "3");
		assert_eq!(stream.recv().await.unwrap().events()[0].id, "4");
	}

	#[tokio::test]
	async fn stream_ends_when_hub_is_dropped() {
		let hub = DeviceEventHub::new(OWN, 4);
		let stream = hub.stream(EventScope::Session).into_stream();

		hub.publish(batch(OWN, &["7"]));
		drop(hub);

		let batches: Vec<DeviceEventBatch> = stream.collect().await;
		assert_eq!(batches.len(), 1);
	}

	#[tokio::test]
	async fn waiter_times_out() {
		let hub = DeviceEventHub::new(OWN, 4);
		let waiter = hub.waiter(EventScope::Session, |_| true, Duration::from_millis(10));

		hub.publish(batch(OTHER, &["x"]));
		assert!(matches!(waiter.wait().await, Err(Error::Timeout(_))));
	}

	#[tokio::test]
	async fn dropped_subscription_stops_the_handler() {
		let hub = DeviceEventHub::new(OWN, 4);
		let calls = Arc::new(AtomicUsize::new(0));
		let counter = Arc::clone(&calls);
		let subscription = hub.spawn_handler(EventScope::All, move |_| {
			counter.fetch_add(1, Ordering::SeqCst);
		});

		hub.publish(batch(OWN, &["a"]));
		for _ in 0..100 {
			if calls.load(Ordering::SeqCst) == 1 {
				break;
			}
			tokio::task::yield_now().await;
		}
		assert_eq!(calls.load(Ordering::SeqCst), 1);

		drop(subscription);
		tokio::task::yield_now().await;
		hub.publish(batch(OWN, &["b"]));
		for _ in 0..10 {
			tokio::task::yield_now().await;
		}
		assert_eq!(calls.load(Ordering::SeqCst), 1);
	}
}

//! USB session lifecycle and device-event delivery.

mod common;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{SESSION_PATH, fake_portal};
use usbportal::{CancellationToken, DeviceEventKind, DeviceInfo, EventScope, SessionState};
use usbportal_protocol::names::{SESSION_INTERFACE, USB_INTERFACE};
use usbportal_protocol::zvariant::{ObjectPath, Value};
use usbportal_protocol::{CreateSessionOptions, DeviceEventsBody};
use usbportal_runtime::fake_bus::{CallOutcome, FakeBusController};

const OTHER_SESSION: &str = "/org/freedesktop/portal/desktop/session/1_42/portal99";

fn script_create_session(controller: &FakeBusController) {
	controller.on_call("CreateSession", |call, _| CallOutcome::reply_path(call, SESSION_PATH));
	controller.on_call("Close", |call, _| CallOutcome::ok(call));
}

fn device_events(session: &str, events: Vec<(&str, &str)>) -> DeviceEventsBody {
	DeviceEventsBody {
		session: ObjectPath::try_from(session).expect("valid session path").into(),
		events: events
			.into_iter()
			.map(|(id, kind)| {
				let info = DeviceInfo {
					device_file: Some(format!("/dev/bus/usb/001/{id}")),
					..DeviceInfo::default()
				};
				(id.to_string(), kind.to_string(), info)
			})
			.collect(),
	}
}

#[tokio::test]
async fn create_session_sends_a_token_and_links_both_sessions() -> anyhow::Result<()> {
	let (portal, controller) = fake_portal();
	script_create_session(&controller);

	let usb_session = portal.usb().create_session(None).await?;

	assert_eq!(usb_session.path(), SESSION_PATH);
	assert!(usb_session.session().has_usb_session());
	// DeviceEvents for the USB session, Closed for the generic one.
	assert_eq!(controller.active_subscriptions(), 2);

	let (options,): (CreateSessionOptions,) = controller.calls_to("CreateSession")[0].body().deserialize()?;
	assert_eq!(options.session_handle_token.as_deref(), Some("portal0"));
	Ok(())
}

#[tokio::test]
async fn device_events_reach_waiters_and_streams() -> anyhow::Result<()> {
	let (portal, controller) = fake_portal();
	script_create_session(&controller);
	let usb_session = portal.usb().create_session(None).await?;

	let mut stream = usb_session.device_events(EventScope::Session);
	let waiter = usb_session.device_event_waiter(EventScope::Session, |batch| !batch.is_empty(), Duration::from_secs(5));

	let delivered = controller.emit_signal(
		"/org/freedesktop/portal/desktop",
		USB_INTERFACE,
		"DeviceEvents",
		&device_events(SESSION_PATH, vec![("7", "add"), ("8", "remove")]),
	);
	assert_eq!(delivered, 1);

	let batch = waiter.wait().await?;
	assert!(batch.is_for(SESSION_PATH));
	assert_eq!(batch.len(), 2);
	assert_eq!(batch.events()[0].id, "7");
	assert_eq!(batch.events()[0].kind, DeviceEventKind::Add);
	assert_eq!(batch.events()[0].info.device_file.as_deref(), Some("/dev/bus/usb/001/7"));
	assert_eq!(batch.events()[1].kind, DeviceEventKind::Remove);

	let streamed = stream.recv().await.expect("stream open");
	assert_eq!(streamed.session_path(), SESSION_PATH);
	Ok(())
}

#[tokio::test]
async fn all_scope_sees_other_sessions_and_session_scope_does_not() -> anyhow::Result<()> {
	let (portal, controller) = fake_portal();
	script_create_session(&controller);
	let usb_session = portal.usb().create_session(None).await?;

	let mut own = usb_session.device_events(EventScope::Session);
	let everything = usb_session.device_event_waiter(EventScope::All, |_| true, Duration::from_secs(5));
	let own_only = usb_session.device_event_waiter(EventScope::Session, |_| true, Duration::from_millis(50));

	controller.emit_signal(
		"/org/freedesktop/portal/desktop",
		USB_INTERFACE,
		"DeviceEvents",
		&device_events(OTHER_SESSION, vec![("9", "change")]),
	);

	let batch = everything.wait().await?;
	assert!(!batch.is_for(usb_session.path()));
	assert_eq!(batch.events()[0].kind, DeviceEventKind::Change);

	assert!(matches!(own_only.wait().await, Err(usbportal::Error::Timeout(_))));

	controller.emit_signal(
		"/org/freedesktop/portal/desktop",
		USB_INTERFACE,
		"DeviceEvents",
		&device_events(SESSION_PATH, vec![("3", "add")]),
	);
	let next = own.recv().await.expect("stream open");
	assert!(next.is_for(SESSION_PATH));
	assert_eq!(next.events()[0].id, "3");
	Ok(())
}

#[tokio::test]
async fn callback_handler_runs_until_unsubscribed() -> anyhow::Result<()> {
	let (portal, controller) = fake_portal();
	script_create_session(&controller);
	let usb_session = portal.usb().create_session(None).await?;

	let seen = Arc::new(Mutex::new(Vec::new()));
	let sink = Arc::clone(&seen);
	let subscription = usb_session.on_device_event(EventScope::Session, move |batch| {
		let ids = batch.events().iter().map(|e| e.id.clone());
		sink.lock().unwrap().extend(ids);
	});

	let waiter = usb_session.device_event_waiter(EventScope::Session, |_| true, Duration::from_secs(5));
	controller.emit_signal(
		"/org/freedesktop/portal/desktop",
		USB_INTERFACE,
		"DeviceEvents",
		&device_events(SESSION_PATH, vec![("1", "add")]),
	);
	waiter.wait().await?;

	for _ in 0..100 {
		if !seen.lock().unwrap().is_empty() {
			break;
		}
		tokio::time::sleep(Duration::from_millis(1)).await;
	}
	assert_eq!(*seen.lock().unwrap(), vec!["1".to_string()]);

	subscription.unsubscribe();
	Ok(())
}

#[tokio::test]
async fn close_delegates_to_the_generic_session() -> anyhow::Result<()> {
	let (portal, controller) = fake_portal();
	script_create_session(&controller);
	let usb_session = portal.usb().create_session(None).await?;

	usb_session.close().await?;

	let closes = controller.calls_to("Close");
	assert_eq!(closes.len(), 1);
	assert_eq!(closes[0].header().path().map(|p| p.to_string()).as_deref(), Some(SESSION_PATH));
	assert_eq!(usb_session.session().state(), SessionState::Closed);

	// Closing does not unsubscribe; teardown does.
	assert_eq!(controller.active_subscriptions(), 2);
	Ok(())
}

#[tokio::test]
async fn teardown_unsubscribes_once_and_detaches() -> anyhow::Result<()> {
	let (portal, controller) = fake_portal();
	script_create_session(&controller);
	let usb_session = portal.usb().create_session(None).await?;
	let session = Arc::clone(usb_session.session());

	usb_session.teardown()?;

	// Only the generic session's Closed watch is left.
	assert_eq!(controller.active_subscriptions(), 1);
	assert_eq!(controller.unsubscribe_count(), 1);
	assert!(!session.has_usb_session());

	session.dispose()?;
	assert_eq!(controller.active_subscriptions(), 0);
	assert_eq!(controller.unsubscribe_count(), 2);
	assert_eq!(controller.redundant_unsubscribes(), 0);
	Ok(())
}

#[tokio::test]
async fn dropping_the_session_unsubscribes() -> anyhow::Result<()> {
	let (portal, controller) = fake_portal();
	script_create_session(&controller);
	let usb_session = portal.usb().create_session(None).await?;

	drop(usb_session);

	assert_eq!(controller.active_subscriptions(), 0);
	assert_eq!(controller.unsubscribe_count(), 2);
	assert_eq!(controller.redundant_unsubscribes(), 0);
	Ok(())
}

#[tokio::test]
async fn disposing_the_generic_session_first_is_reported() -> anyhow::Result<()> {
	let (portal, controller) = fake_portal();
	script_create_session(&controller);
	let usb_session = portal.usb().create_session(None).await?;

	let err = usb_session.session().dispose().unwrap_err();
	assert!(err.is_invalid_state());

	let err = usb_session.teardown().unwrap_err();
	assert!(err.is_invalid_state());

	// Each subscription is still removed exactly once.
	assert_eq!(controller.active_subscriptions(), 0);
	assert_eq!(controller.unsubscribe_count(), 2);
	assert_eq!(controller.redundant_unsubscribes(), 0);
	Ok(())
}

#[tokio::test]
async fn stream_ends_after_teardown() -> anyhow::Result<()> {
	let (portal, controller) = fake_portal();
	script_create_session(&controller);
	let usb_session = portal.usb().create_session(None).await?;

	let mut stream = usb_session.device_events(EventScope::All);
	usb_session.teardown()?;

	let next = tokio::time::timeout(Duration::from_secs(5), stream.recv()).await?;
	assert!(next.is_none());
	Ok(())
}

#[tokio::test]
async fn cancelled_create_session_sends_nothing_to_close() {
	let (portal, controller) = fake_portal();
	controller.on_call("CreateSession", |_, _| CallOutcome::Hang);

	let token = CancellationToken::new();
	let canceller = token.clone();
	tokio::spawn(async move {
		tokio::task::yield_now().await;
		canceller.cancel();
	});

	let err = portal.usb().create_session(Some(&token)).await.unwrap_err();

	assert!(err.is_cancelled());
	assert!(controller.sent().is_empty());
	assert_eq!(controller.active_subscriptions(), 0);
}

#[tokio::test]
async fn broker_closing_the_session_is_observed() -> anyhow::Result<()> {
	let (portal, controller) = fake_portal();
	script_create_session(&controller);
	let usb_session = portal.usb().create_session(None).await?;

	let details: HashMap<&str, Value<'_>> = HashMap::new();
	let delivered = controller.emit_signal(SESSION_PATH, SESSION_INTERFACE, "Closed", &(details,));
	assert_eq!(delivered, 1);

	for _ in 0..100 {
		if usb_session.session().state() == SessionState::Closed {
			break;
		}
		tokio::task::yield_now().await;
	}
	assert_eq!(usb_session.session().state(), SessionState::Closed);

	// Closing again locally is a no-op.
	usb_session.close().await?;
	assert!(controller.calls_to("Close").is_empty());
	Ok(())
}

#[tokio::test]
async fn unexpected_session_path_is_used_as_returned() -> anyhow::Result<()> {
	let (portal, controller) = fake_portal();
	controller.on_call("CreateSession", |call, _| CallOutcome::reply_path(call, OTHER_SESSION));

	let usb_session = portal.usb().create_session(None).await?;
	assert_eq!(usb_session.path(), OTHER_SESSION);

	let waiter = usb_session.device_event_waiter(EventScope::Session, |_| true, Duration::from_secs(5));
	controller.emit_signal(
		"/org/freedesktop/portal/desktop",
		USB_INTERFACE,
		"DeviceEvents",
		&device_events(OTHER_SESSION, vec![("5", "add")]),
	);
	assert!(waiter.wait().await?.is_for(OTHER_SESSION));
	Ok(())
}

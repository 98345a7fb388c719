//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::fs::File;
use std::os::unix::fs::MetadataExt;
use std::sync::Once;

use usbportal::{Portal, PortalConfig, SequentialTokens};
use usbportal_protocol::DeviceResult;
use usbportal_protocol::zvariant::OwnedFd;
use usbportal_runtime::fake_bus::{FakeBusBuilder, FakeBusController};

/// Request path of the first request on a fresh fixture portal.
pub const FIRST_REQUEST: &str = "/org/freedesktop/portal/desktop/request/1_42/portal0";

pub const SESSION_PATH: &str = "/org/freedesktop/portal/desktop/session/1_42/portal0";

static TRACING: Once = Once::new();

pub fn init_tracing() {
	TRACING.call_once(|| {
		let _ = tracing_subscriber::fmt()
			.with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
			.with_test_writer()
			.try_init();
	});
}

/// Portal on a fake bus named `:1.42` with deterministic tokens.
pub fn fake_portal() -> (Portal, FakeBusController) {
	init_tracing();
	let (bus, controller) = FakeBusBuilder::new().build();
	let portal = Portal::with_bus(bus, PortalConfig::default()).with_tokens(SequentialTokens::new());
	(portal, controller)
}

/// A fresh temporary file standing in for a device node.
pub fn device_file() -> File {
	tempfile::tempfile().expect("create temp file")
}

pub fn fd_for(file: &File) -> OwnedFd {
	let dup = file.try_clone().expect("dup temp file");
	OwnedFd::from(std::os::fd::OwnedFd::from(dup))
}

pub fn success(file: &File) -> DeviceResult {
	DeviceResult::succeeded(fd_for(file))
}

/// True if `fd` refers to the same open file as `file`.
pub fn same_file(fd: std::os::fd::BorrowedFd<'_>, file: &File) -> bool {
	let owned = fd.try_clone_to_owned().expect("dup received fd");
	let received = File::from(owned);
	let a = received.metadata().expect("stat received fd");
	let b = file.metadata().expect("stat temp file");
	a.dev() == b.dev() && a.ino() == b.ino()
}

//! Object path construction for request and session handles.
//!
//! The broker derives the path of a request (or session) object from the
//! caller's unique bus name and a caller-chosen token, so the client can
//! compute the path *before* issuing the call and subscribe to it first.

use zvariant::OwnedObjectPath;

use crate::names::{REQUEST_PATH_PREFIX, SESSION_PATH_PREFIX};

/// Converts a unique bus name into the path element the broker uses.
///
/// The leading `:` is stripped and every `.` becomes `_`, so `:1.42`
/// turns into `1_42`.
pub fn sender_path_component(unique_name: &str) -> String {
	unique_name
		.strip_prefix(':')
		.unwrap_or(unique_name)
		.replace('.', "_")
}

/// Builds `/org/freedesktop/portal/desktop/request/<sender>/<token>`.
pub fn request_path(unique_name: &str, token: &str) -> zvariant::Result<OwnedObjectPath> {
	handle_path(REQUEST_PATH_PREFIX, unique_name, token)
}

/// Builds `/org/freedesktop/portal/desktop/session/<sender>/<token>`.
pub fn session_path(unique_name: &str, token: &str) -> zvariant::Result<OwnedObjectPath> {
	handle_path(SESSION_PATH_PREFIX, unique_name, token)
}

fn handle_path(prefix: &str, unique_name: &str, token: &str) -> zvariant::Result<OwnedObjectPath> {
	let path = format!("{prefix}{}/{token}", sender_path_component(unique_name));
	OwnedObjectPath::try_from(path)
}

//! Error types for the portal runtime.

use thiserror::Error;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while talking to the portal broker.
#[derive(Debug, Error)]
pub enum Error {
	/// The bus connection failed or a message could not be delivered.
	#[error("Transport error: {0}")]
	Transport(String),

	/// Error raised by the D-Bus library (connection, encoding, decoding).
	#[error("Bus error: {0}")]
	Bus(#[from] zbus::Error),

	/// The broker answered a method call with a D-Bus error reply.
	#[error("{name}: {message}")]
	Remote {
		/// D-Bus error name (e.g., "org.freedesktop.DBus.Error.AccessDenied")
		name: String,
		/// Human-readable message from the error reply body
		message: String,
	},

	/// The operation was cancelled locally or by the broker.
	#[error("Cancelled: {0}")]
	Cancelled(String),

	/// The broker reported a non-zero, non-cancel status.
	#[error("Operation failed: {0}")]
	OperationFailed(String),

	/// Lifecycle-order violation between paired objects.
	#[error("Invalid state: {0}")]
	InvalidState(String),

	/// The broker sent something that does not match the protocol.
	#[error("Protocol error: {0}")]
	Protocol(String),

	/// Channel closed unexpectedly.
	#[error("Channel closed unexpectedly")]
	ChannelClosed,

	/// Timeout waiting for an event.
	#[error("Timeout: {0}")]
	Timeout(String),
}

impl From<zbus::zvariant::Error> for Error {
	fn from(err: zbus::zvariant::Error) -> Self {
		Error::Bus(zbus::Error::Variant(err))
	}
}

impl Error {
	/// Returns the D-Bus error name if this is a Remote error.
	pub fn error_name(&self) -> Option<&str> {
		match self {
			Error::Remote { name, .. } => Some(name),
			_ => None,
		}
	}

	/// Returns true for failures of the bus itself or of a method call,
	/// as opposed to outcomes reported through a `Response` signal.
	pub fn is_transport(&self) -> bool {
		matches!(
			self,
			Error::Transport(_) | Error::Bus(_) | Error::Remote { .. } | Error::ChannelClosed
		)
	}

	/// Returns true if this is a cancellation.
	pub fn is_cancelled(&self) -> bool {
		matches!(self, Error::Cancelled(_))
	}

	/// Returns true if this is a lifecycle-order violation.
	pub fn is_invalid_state(&self) -> bool {
		matches!(self, Error::InvalidState(_))
	}
}

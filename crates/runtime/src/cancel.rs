//! Cancellation bridge between a caller's [`CancellationToken`] and a
//! pending broker request.
//!
//! When the token fires, the bridge sends one best-effort
//! `org.freedesktop.portal.Request.Close` for the request path and the
//! pending operation resolves [`Error::Cancelled`]. Close failures are
//! logged and discarded.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use zbus::Message;

use crate::bus::{Broker, Bus};
use crate::error::{Error, Result};

struct CloseTarget {
	bus: Arc<dyn Bus>,
	path: String,
	message: Message,
}

/// Link from a cancellation token to one pending operation.
pub struct CancelLink {
	token: CancellationToken,
	close: Option<CloseTarget>,
	linked: bool,
}

impl CancelLink {
	/// Links `token` to the request object at `path`.
	///
	/// The `Close` message is built up front so firing cannot fail.
	pub fn for_request(token: CancellationToken, bus: Arc<dyn Bus>, broker: &Broker, path: &str) -> Result<Self> {
		let message = broker.close_request(path)?;
		Ok(Self {
			token,
			close: Some(CloseTarget {
				bus,
				path: path.to_string(),
				message,
			}),
			linked: true,
		})
	}

	/// Links `token` to an operation with no broker-side request object.
	///
	/// Firing only resolves the operation locally.
	pub fn local(token: CancellationToken) -> Self {
		Self {
			token,
			close: None,
			linked: true,
		}
	}

	pub fn is_cancelled(&self) -> bool {
		self.linked && self.token.is_cancelled()
	}

	/// Completes when the token is cancelled. Never completes once disconnected.
	pub async fn cancelled(&self) {
		if !self.linked {
			return std::future::pending().await;
		}
		self.token.cancelled().await
	}

	/// Runs the cancellation side effects and returns the error the
	/// operation resolves with.
	///
	/// Sends at most one `Close` per link, and none once disconnected.
	pub async fn fire(&mut self) -> Error {
		if !self.linked {
			return Error::Cancelled("operation cancelled".to_string());
		}
		self.linked = false;

		match self.close.take() {
			Some(target) => {
				tracing::debug!(path = %target.path, "Cancelling request, sending Close");
				if let Err(e) = target.bus.send(target.message).await {
					tracing::debug!(path = %target.path, "Close failed (ignored): {}", e);
				}
				Error::Cancelled(format!("request {} cancelled", target.path))
			}
			None => Error::Cancelled("operation cancelled".to_string()),
		}
	}

	/// Detaches the link without side effects. Returns `false` if it was
	/// already fired or disconnected.
	pub fn disconnect(&mut self) -> bool {
		if !self.linked {
			return false;
		}
		self.linked = false;
		self.close = None;
		true
	}
}

impl std::fmt::Debug for CancelLink {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("CancelLink")
			.field("linked", &self.linked)
			.field("path", &self.close.as_ref().map(|c| c.path.as_str()))
			.field("cancelled", &self.token.is_cancelled())
			.finish()
	}
}

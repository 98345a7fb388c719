//! Client entry point and configuration.

use std::sync::Arc;

use serde::Deserialize;
use tokio::task::JoinHandle;
use usbportal_protocol::names::{PORTAL_BUS_NAME, PORTAL_OBJECT_PATH};
use usbportal_runtime::{Broker, Bus, Connection, Correlator, Error, RandomTokens, Result, TokenGenerator};

use crate::usb::Usb;

/// Which message bus the broker lives on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
	#[default]
	Session,
	System,
}

/// Portal client configuration.
///
/// Every field has a default, so a configuration file only needs the
/// values it changes.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PortalConfig {
	pub bus: BusKind,
	/// Well-known name of the broker.
	pub bus_name: String,
	/// Object implementing `org.freedesktop.portal.Usb`.
	pub object_path: String,
	/// Buffer size of each session's device-event channel.
	pub event_capacity: usize,
}

impl Default for PortalConfig {
	fn default() -> Self {
		Self {
			bus: BusKind::Session,
			bus_name: PORTAL_BUS_NAME.to_string(),
			object_path: PORTAL_OBJECT_PATH.to_string(),
			event_capacity: 64,
		}
	}
}

impl PortalConfig {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn bus(mut self, bus: BusKind) -> Self {
		self.bus = bus;
		self
	}

	pub fn bus_name(mut self, name: impl Into<String>) -> Self {
		self.bus_name = name.into();
		self
	}

	pub fn object_path(mut self, path: impl Into<String>) -> Self {
		self.object_path = path.into();
		self
	}

	pub fn event_capacity(mut self, capacity: usize) -> Self {
		self.event_capacity = capacity;
		self
	}

	pub(crate) fn broker(&self) -> Broker {
		Broker::new(self.bus_name.as_str(), self.object_path.as_str())
	}
}

/// Aborts the connection's dispatch loop once the last [`Portal`] clone is gone.
struct DispatchTask(JoinHandle<()>);

impl Drop for DispatchTask {
	fn drop(&mut self) {
		self.0.abort();
	}
}

/// Handle to the desktop portal.
///
/// Cheap to clone; all clones share one bus connection.
#[derive(Clone)]
pub struct Portal {
	bus: Arc<dyn Bus>,
	correlator: Correlator,
	tokens: Arc<dyn TokenGenerator>,
	config: PortalConfig,
	_dispatch: Option<Arc<DispatchTask>>,
}

impl Portal {
	/// Connects to the configured bus and starts dispatching its messages.
	pub async fn connect(config: PortalConfig) -> Result<Self> {
		let connection = match config.bus {
			BusKind::Session => Connection::session().await?,
			BusKind::System => Connection::system().await?,
		};
		let dispatch = connection.spawn();

		tracing::debug!(
			unique_name = connection.unique_name().as_deref().unwrap_or(""),
			bus_name = %config.bus_name,
			"Connected to portal bus"
		);

		let mut portal = Self::with_bus(connection, config);
		portal._dispatch = Some(Arc::new(DispatchTask(dispatch)));
		Ok(portal)
	}

	/// Uses an existing bus. The caller keeps it dispatching.
	pub fn with_bus(bus: Arc<dyn Bus>, config: PortalConfig) -> Self {
		let correlator = Correlator::new(Arc::clone(&bus), config.broker());
		Self {
			bus,
			correlator,
			tokens: Arc::new(RandomTokens),
			config,
			_dispatch: None,
		}
	}

	/// Replaces the handle-token generator.
	pub fn with_tokens(mut self, tokens: impl TokenGenerator + 'static) -> Self {
		self.tokens = Arc::new(tokens);
		self
	}

	/// USB device operations.
	pub fn usb(&self) -> Usb<'_> {
		Usb::new(self)
	}

	pub fn config(&self) -> &PortalConfig {
		&self.config
	}

	pub(crate) fn bus(&self) -> &Arc<dyn Bus> {
		&self.bus
	}

	pub(crate) fn correlator(&self) -> &Correlator {
		&self.correlator
	}

	pub(crate) fn broker(&self) -> &Broker {
		self.correlator.broker()
	}

	pub(crate) fn next_token(&self) -> String {
		self.tokens.next_token()
	}

	/// This connection's unique name, which request paths are derived from.
	pub(crate) fn sender(&self) -> Result<String> {
		self.bus
			.unique_name()
			.ok_or_else(|| Error::Transport("bus connection has no unique name".to_string()))
	}
}

impl std::fmt::Debug for Portal {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Portal")
			.field("unique_name", &self.bus.unique_name())
			.field("config", &self.config)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults_point_at_the_desktop_portal() {
		let config = PortalConfig::default();
		assert_eq!(config.bus, BusKind::Session);
		assert_eq!(config.bus_name, "org.freedesktop.portal.Desktop");
		assert_eq!(config.object_path, "/org/freedesktop/portal/desktop");
		assert_eq!(config.event_capacity, 64);
	}

	#[test]
	fn partial_config_keeps_defaults() {
		let config: PortalConfig = serde_json::from_str(r#"{"bus": "system", "event_capacity": 8}"#).unwrap();
		assert_eq!(config.bus, BusKind::System);
		assert_eq!(config.event_capacity, 8);
		assert_eq!(config.bus_name, PORTAL_BUS_NAME);
	}

	#[test]
	fn builder_setters() {
		let config = PortalConfig::new()
			.bus_name("org.example.TestPortal")
			.object_path("/org/example/portal")
			.event_capacity(4);

		let broker = config.broker();
		assert_eq!(broker.bus_name(), "org.example.TestPortal");
		assert_eq!(broker.object_path(), "/org/example/portal");
	}
}

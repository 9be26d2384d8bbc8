//! Contract between the core and the underlying radio stack.
//!
//! The stack is driven through [`RadioLink`] and answers through
//! [`RadioEvent`]s delivered to the coordinator on the stack's single
//! notification context. A real stack implements the trait over actual
//! radio hardware; tests implement it over recorded calls and hand-fed
//! events.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::model::{Advertisement, CharacteristicRef, ServiceRef};

/// Radio power state as the coordinator tracks it.
///
/// Every underlying stack state other than powered-on collapses to
/// `Inactive`; scanning and connection require `Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PowerState {
    /// Radio ready for scanning and connection
    Active,
    /// Radio off, unauthorized, resetting, or unknown
    Inactive,
}

impl Default for PowerState {
    fn default() -> Self {
        PowerState::Inactive
    }
}

/// Scan parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanOptions {
    /// Only report peripherals advertising one of these services
    pub service_filter: Option<Vec<Uuid>>,
    /// Re-deliver discovery events for already-seen peripherals
    pub allow_duplicates: bool,
}

impl ScanOptions {
    /// Restrict the scan to peripherals advertising the given services.
    pub fn with_service_filter(mut self, services: Vec<Uuid>) -> Self {
        self.service_filter = Some(services);
        self
    }

    /// Deliver repeat discovery events for already-seen peripherals.
    pub fn with_allow_duplicates(mut self, allow: bool) -> Self {
        self.allow_duplicates = allow;
        self
    }
}

/// Connection parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectOptions {
    /// Ask the stack to surface an alert if the link drops while the
    /// application is backgrounded
    pub notify_on_disconnect: bool,
}

impl ConnectOptions {
    /// Request a disconnect notification from the stack.
    pub fn with_notify_on_disconnect(mut self, notify: bool) -> Self {
        self.notify_on_disconnect = notify;
        self
    }
}

/// A service as reported by a discovery response, before it becomes an
/// owned domain record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceInfo {
    /// Service UUID, when the stack could produce one
    pub id: Option<Uuid>,
    /// Stack-provided description string
    pub description: String,
}

/// A characteristic as reported by a discovery response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacteristicInfo {
    /// Characteristic UUID, when the stack could produce one
    pub id: Option<Uuid>,
    /// Stack-provided description string
    pub description: String,
}

impl From<ServiceInfo> for crate::model::Service {
    fn from(info: ServiceInfo) -> Self {
        Self {
            id: info.id,
            description: info.description,
            characteristics: Vec::new(),
        }
    }
}

impl From<CharacteristicInfo> for crate::model::Characteristic {
    fn from(info: CharacteristicInfo) -> Self {
        Self {
            id: info.id,
            description: info.description,
            value: None,
        }
    }
}

/// Asynchronous radio/transport failure delivered alongside an event.
///
/// The core forwards these to observers untouched and never retries;
/// retry policy belongs to the application.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum RadioError {
    #[error("Connect failed: {0}")]
    ConnectFailed(String),
    #[error("Discovery failed: {0}")]
    DiscoveryFailed(String),
    #[error("Read failed: {0}")]
    ReadFailed(String),
    #[error("Radio stack error: {0}")]
    Stack(String),
}

/// Raw events produced by the radio stack on its notification context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RadioEvent {
    /// Radio power state changed
    PowerStateChanged { state: PowerState },
    /// A peripheral advertisement was seen
    PeripheralDiscovered {
        id: Uuid,
        name: Option<String>,
        advertisement: Advertisement,
        rssi: i16,
    },
    /// A connect attempt completed
    PeripheralConnected { id: Uuid },
    /// The link dropped, a cancel completed, or a connect attempt failed
    PeripheralDisconnected {
        id: Uuid,
        error: Option<RadioError>,
    },
    /// A discover-services request completed
    ServicesDiscovered {
        id: Uuid,
        services: Vec<ServiceInfo>,
        error: Option<RadioError>,
    },
    /// A discover-characteristics request completed
    CharacteristicsDiscovered {
        service: ServiceRef,
        characteristics: Vec<CharacteristicInfo>,
        error: Option<RadioError>,
    },
    /// A read completed or a notification arrived
    ValueUpdated {
        characteristic: CharacteristicRef,
        value: Option<Vec<u8>>,
        error: Option<RadioError>,
    },
    /// The stack declared previously discovered services stale
    ServicesInvalidated { id: Uuid, services: Vec<Uuid> },
}

impl fmt::Display for RadioEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RadioEvent::PowerStateChanged { state } => {
                write!(f, "PowerStateChanged {{ state: {:?} }}", state)
            }
            RadioEvent::PeripheralDiscovered { id, name, rssi, .. } => write!(
                f,
                "PeripheralDiscovered {{ id: {}, name: {:?}, rssi: {} }}",
                id, name, rssi
            ),
            RadioEvent::PeripheralConnected { id } => {
                write!(f, "PeripheralConnected {{ id: {} }}", id)
            }
            RadioEvent::PeripheralDisconnected { id, error } => write!(
                f,
                "PeripheralDisconnected {{ id: {}, error: {} }}",
                id,
                error.as_ref().map_or("none".to_string(), |e| e.to_string())
            ),
            RadioEvent::ServicesDiscovered { id, services, .. } => write!(
                f,
                "ServicesDiscovered {{ id: {}, count: {} }}",
                id,
                services.len()
            ),
            RadioEvent::CharacteristicsDiscovered {
                service,
                characteristics,
                ..
            } => write!(
                f,
                "CharacteristicsDiscovered {{ service: {}, count: {} }}",
                service,
                characteristics.len()
            ),
            RadioEvent::ValueUpdated { characteristic, .. } => {
                write!(f, "ValueUpdated {{ characteristic: {} }}", characteristic)
            }
            RadioEvent::ServicesInvalidated { id, services } => write!(
                f,
                "ServicesInvalidated {{ id: {}, count: {} }}",
                id,
                services.len()
            ),
        }
    }
}

/// Capability interface the core requires from the radio stack.
///
/// Every command is fire-and-forget: completion or failure surfaces later
/// as a [`RadioEvent`], never as a return value. The `Result` covers only
/// submission failures inside the stack itself. Usage gating (connection
/// state, registry membership) happens in the coordinator before any of
/// these is called.
#[async_trait]
pub trait RadioLink: Send + Sync {
    /// Current radio power state.
    async fn power_state(&self) -> PowerState;

    /// Start (or restart, with new parameters) an advertisement scan.
    async fn start_scan(&self, options: &ScanOptions) -> Result<(), RadioError>;

    /// Stop scanning; a no-op when no scan is running.
    async fn stop_scan(&self) -> Result<(), RadioError>;

    /// Initiate a connection to a discovered peripheral.
    async fn connect(&self, id: Uuid, options: &ConnectOptions) -> Result<(), RadioError>;

    /// Tear down a connection or abandon an in-flight attempt.
    async fn cancel_connection(&self, id: Uuid) -> Result<(), RadioError>;

    /// Request service discovery on a connected peripheral.
    async fn discover_services(&self, id: Uuid, filter: Option<&[Uuid]>)
        -> Result<(), RadioError>;

    /// Request characteristic discovery on a discovered service.
    async fn discover_characteristics(
        &self,
        service: ServiceRef,
        filter: Option<&[Uuid]>,
    ) -> Result<(), RadioError>;

    /// Request a value read on a discovered characteristic.
    async fn read_value(&self, characteristic: CharacteristicRef) -> Result<(), RadioError>;
}

//! Domain records for the discovered GATT object graph.
//!
//! Ownership is strictly tree-shaped: a `Peripheral` owns its `Service`s,
//! a `Service` owns its `Characteristic`s. Records are created by the
//! coordinator when stack events first mention an identifier and are handed
//! to observers as cloned snapshots.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

use crate::peripheral::ConnectionState;

/// Advertisement payload carried by a discovery event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Advertisement {
    /// Local name broadcast in the advertisement, if any
    pub local_name: Option<String>,
    /// Service UUIDs listed in the advertisement
    pub service_uuids: Vec<Uuid>,
    /// Manufacturer-specific data keyed by company identifier
    pub manufacturer_data: HashMap<u16, Vec<u8>>,
    /// Per-service advertisement data
    pub service_data: HashMap<Uuid, Vec<u8>>,
    /// Advertised transmit power level in dBm
    pub tx_power_level: Option<i8>,
}

/// One discovered/connectable radio endpoint.
///
/// Owned exclusively by the coordinator's registry; the identifier is stable
/// for the process lifetime of the discovery (until `forget`).
#[derive(Debug, Clone)]
pub struct Peripheral {
    /// Stable identifier assigned by the radio stack
    pub id: Uuid,
    /// Human-readable name, refreshed whenever a discovery event carries one
    pub name: Option<String>,
    /// Last observed signal strength in dBm
    pub rssi: Option<i16>,
    /// Connection lifecycle state
    pub state: ConnectionState,
    /// Discovered services, in discovery order, deduplicated by identifier
    pub services: Vec<Service>,
    /// Read requests issued but not yet answered by a value-updated event
    pub(crate) pending_reads: Vec<CharacteristicRef>,
}

impl Peripheral {
    /// Create a minimal record for a newly seen identifier.
    pub(crate) fn new(id: Uuid) -> Self {
        Self {
            id,
            name: None,
            rssi: None,
            state: ConnectionState::Disconnected,
            services: Vec::new(),
            pending_reads: Vec::new(),
        }
    }

    /// Resolve a service reference against this record.
    ///
    /// Returns `None` when the reference targets another peripheral or an
    /// index that no discovery has produced yet.
    pub fn service(&self, service: ServiceRef) -> Option<&Service> {
        if service.peripheral != self.id {
            return None;
        }
        self.services.get(service.index)
    }

    /// Resolve a characteristic reference against this record.
    pub fn characteristic(&self, characteristic: CharacteristicRef) -> Option<&Characteristic> {
        self.service(characteristic.service)?
            .characteristics
            .get(characteristic.index)
    }

    /// Read requests still awaiting a value-updated event.
    pub fn pending_reads(&self) -> &[CharacteristicRef] {
        &self.pending_reads
    }
}

impl PartialEq for Peripheral {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Peripheral {}

/// One GATT service exposed by a peripheral.
#[derive(Debug, Clone)]
pub struct Service {
    /// Service UUID; absent is a valid, observable condition
    pub id: Option<Uuid>,
    /// Stack-provided description string
    pub description: String,
    /// Discovered characteristics, in discovery order
    pub characteristics: Vec<Characteristic>,
}

impl Service {
    /// Whether two services name the same entity by identifier.
    ///
    /// Records with absent identifiers are never the same entity; their only
    /// usable reference is structural position within the parent.
    pub fn same_identity(&self, other: &Service) -> bool {
        matches!((self.id, other.id), (Some(a), Some(b)) if a == b)
    }
}

/// One GATT characteristic within a service.
#[derive(Debug, Clone)]
pub struct Characteristic {
    /// Characteristic UUID; absent is a valid, observable condition
    pub id: Option<Uuid>,
    /// Stack-provided description string
    pub description: String,
    /// Latest value bytes; absent until a read or notification completes
    pub value: Option<Vec<u8>>,
}

impl Characteristic {
    /// Byte count of the latest value, if one has arrived.
    pub fn byte_count(&self) -> Option<usize> {
        self.value.as_ref().map(Vec::len)
    }
}

/// Position-based reference to a service on a peripheral.
///
/// Index paths are the reference currency of the capability interface:
/// service identifiers may be absent, so references fall back to discovery
/// order within the parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceRef {
    /// Owning peripheral identifier
    pub peripheral: Uuid,
    /// Position within the peripheral's services, in discovery order
    pub index: usize,
}

impl ServiceRef {
    /// Create a reference to the `index`-th discovered service.
    pub fn new(peripheral: Uuid, index: usize) -> Self {
        Self { peripheral, index }
    }

    /// Reference a characteristic within this service.
    pub fn characteristic(self, index: usize) -> CharacteristicRef {
        CharacteristicRef {
            service: self,
            index,
        }
    }
}

impl fmt::Display for ServiceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/service[{}]", self.peripheral, self.index)
    }
}

/// Position-based reference to a characteristic within a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CharacteristicRef {
    /// Owning service reference
    pub service: ServiceRef,
    /// Position within the service's characteristics, in discovery order
    pub index: usize,
}

impl fmt::Display for CharacteristicRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/characteristic[{}]", self.service, self.index)
    }
}

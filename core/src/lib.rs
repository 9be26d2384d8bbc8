//! BlueCentral core — central-role GATT client abstraction.
//!
//! Models the discovery-and-connection lifecycle of BLE peripherals
//! (advertisement scan → connect → service discovery → characteristic
//! discovery → value read/notify) independently of any concrete radio
//! stack. The stack plugs in behind the [`RadioLink`] capability trait and
//! feeds [`RadioEvent`]s to [`Central::handle_event`]; application code
//! registers observers on the [`EventRouter`] and queries registry
//! snapshots synchronously. The whole core is testable without radio
//! hardware.

pub mod capability;
pub mod central;
pub mod model;
pub mod peripheral;
pub mod router;

pub use capability::{
    CharacteristicInfo, ConnectOptions, PowerState, RadioError, RadioEvent, RadioLink,
    ScanOptions, ServiceInfo,
};
pub use central::{Central, CentralError};
pub use model::{
    Advertisement, Characteristic, CharacteristicRef, Peripheral, Service, ServiceRef,
};
pub use peripheral::{ConnectionEvent, ConnectionState};
pub use router::EventRouter;

//! Central coordinator: scan/connect lifecycle, power-state tracking, and
//! the peripheral registry.
//!
//! The coordinator is the sole writer of domain state. Commands flow out
//! through the [`RadioLink`] after synchronous usage gating; stack events
//! flow back in through [`Central::handle_event`], which resolves
//! identities against the registry, runs the connection state machine, and
//! only then dispatches observers with the post-transition snapshot.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::capability::{
    ConnectOptions, PowerState, RadioError, RadioEvent, RadioLink, ScanOptions,
};
use crate::model::{Characteristic, CharacteristicRef, Peripheral, Service, ServiceRef};
use crate::peripheral::{ConnectionEvent, ConnectionState};
use crate::router::EventRouter;

/// Usage errors, returned synchronously from coordinator operations.
///
/// Always recoverable by correcting call order; never logged as system
/// faults. Radio failures travel inside events instead.
#[derive(Debug, Clone, Error)]
pub enum CentralError {
    #[error("Radio is not active")]
    RadioInactive,
    #[error("Unknown peripheral: {0}")]
    UnknownPeripheral(Uuid),
    #[error("Peripheral {0} is not connected")]
    NotConnected(Uuid),
    #[error("Service not ready: {0}")]
    ServiceNotReady(ServiceRef),
    #[error("Radio link error: {0}")]
    Link(#[from] RadioError),
}

/// Central-role coordinator over an abstract radio stack.
pub struct Central {
    link: Arc<dyn RadioLink>,
    power: RwLock<PowerState>,
    scanning: RwLock<bool>,
    registry: RwLock<HashMap<Uuid, Peripheral>>,
    router: EventRouter,
}

impl Central {
    /// Create a coordinator over the given radio stack.
    ///
    /// The power-state cache starts at the fail-safe `Inactive`; call
    /// [`initialize`](Self::initialize) or feed a power-state event before
    /// scanning.
    pub fn new(link: Arc<dyn RadioLink>) -> Self {
        Self {
            link,
            power: RwLock::new(PowerState::default()),
            scanning: RwLock::new(false),
            registry: RwLock::new(HashMap::new()),
            router: EventRouter::new(),
        }
    }

    /// Seed the power-state cache by querying the stack.
    pub async fn initialize(&self) {
        let state = self.link.power_state().await;
        *self.power.write() = state;
        info!(?state, "central initialized");
    }

    /// Cached radio power state.
    pub fn power_state(&self) -> PowerState {
        *self.power.read()
    }

    /// Whether a scan has been started and not yet stopped.
    pub fn is_scanning(&self) -> bool {
        *self.scanning.read()
    }

    /// Observer registration point.
    pub fn router(&self) -> &EventRouter {
        &self.router
    }

    /// Snapshot of one registered peripheral.
    pub fn peripheral(&self, id: Uuid) -> Option<Peripheral> {
        self.registry.read().get(&id).cloned()
    }

    /// Snapshot of every registered peripheral.
    pub fn peripherals(&self) -> Vec<Peripheral> {
        self.registry.read().values().cloned().collect()
    }

    /// Start scanning for advertisements.
    ///
    /// Calling while already scanning restarts the scan with the new
    /// parameters. Results arrive as discovery events.
    pub async fn scan(&self, options: ScanOptions) -> Result<(), CentralError> {
        if self.power_state() != PowerState::Active {
            return Err(CentralError::RadioInactive);
        }
        self.link.start_scan(&options).await?;
        *self.scanning.write() = true;
        info!(
            filtered = options.service_filter.is_some(),
            allow_duplicates = options.allow_duplicates,
            "scan started"
        );
        Ok(())
    }

    /// Stop scanning. Always succeeds; stopping an idle scanner is a no-op.
    pub async fn stop_scan(&self) {
        *self.scanning.write() = false;
        if let Err(error) = self.link.stop_scan().await {
            warn!(%error, "stop-scan submission failed");
        }
        info!("scan stopped");
    }

    /// Initiate a connection to a previously discovered peripheral.
    ///
    /// The `Connecting` transition is applied here; the final `Connected`
    /// transition belongs to the connected event.
    pub async fn connect(&self, id: Uuid, options: ConnectOptions) -> Result<(), CentralError> {
        if !self.registry.read().contains_key(&id) {
            return Err(CentralError::UnknownPeripheral(id));
        }
        self.link.connect(id, &options).await?;
        if let Some(peripheral) = self.registry.write().get_mut(&id) {
            peripheral.transition(ConnectionEvent::ConnectRequested);
        }
        info!(peripheral = %id, "connect requested");
        Ok(())
    }

    /// Tear down a connection, or abandon an in-flight attempt.
    ///
    /// A success event racing past a cancel is the caller's race to
    /// ignore; the coordinator does not re-validate that the cancel won.
    pub async fn cancel_connection(&self, id: Uuid) -> Result<(), CentralError> {
        if !self.registry.read().contains_key(&id) {
            return Err(CentralError::UnknownPeripheral(id));
        }
        self.link.cancel_connection(id).await?;
        if let Some(peripheral) = self.registry.write().get_mut(&id) {
            peripheral.transition(ConnectionEvent::CancelRequested);
        }
        info!(peripheral = %id, "disconnect requested");
        Ok(())
    }

    /// Request service discovery on a connected peripheral.
    pub async fn discover_services(
        &self,
        id: Uuid,
        filter: Option<&[Uuid]>,
    ) -> Result<(), CentralError> {
        self.gate_connected(id)?;
        self.link.discover_services(id, filter).await?;
        debug!(peripheral = %id, "service discovery requested");
        Ok(())
    }

    /// Request characteristic discovery on a discovered service.
    ///
    /// Service discovery must have completed first; a reference that does
    /// not resolve to an attached service fails with `ServiceNotReady`.
    pub async fn discover_characteristics(
        &self,
        service: ServiceRef,
        filter: Option<&[Uuid]>,
    ) -> Result<(), CentralError> {
        self.gate_service(service)?;
        self.link.discover_characteristics(service, filter).await?;
        debug!(%service, "characteristic discovery requested");
        Ok(())
    }

    /// Request a value read. The result arrives as a value-updated event;
    /// the request is tracked until then.
    pub async fn read_value(&self, characteristic: CharacteristicRef) -> Result<(), CentralError> {
        self.gate_characteristic(characteristic)?;
        self.link.read_value(characteristic).await?;
        if let Some(peripheral) = self
            .registry
            .write()
            .get_mut(&characteristic.service.peripheral)
        {
            peripheral.track_read(characteristic);
        }
        debug!(%characteristic, "read requested");
        Ok(())
    }

    /// Evict a peripheral from the registry.
    ///
    /// Identity is scoped to "since last forgotten": any later event
    /// naming this identifier re-creates a fresh minimal record.
    pub fn forget(&self, id: Uuid) -> bool {
        let removed = self.registry.write().remove(&id).is_some();
        if removed {
            info!(peripheral = %id, "peripheral forgotten");
        }
        removed
    }

    /// Drop every registered peripheral and clear the scanning flag.
    pub fn reset(&self) {
        self.registry.write().clear();
        *self.scanning.write() = false;
        info!("central reset");
    }

    /// Apply a raw stack event: resolve identities, run the state machine,
    /// then dispatch observers with the post-transition snapshot.
    ///
    /// Must be invoked from the stack's single notification context, which
    /// is the sole writer of domain state. Observers run synchronously on
    /// that context and must not block.
    pub fn handle_event(&self, event: RadioEvent) {
        debug!(%event, "routing radio event");
        match event {
            RadioEvent::PowerStateChanged { state } => {
                *self.power.write() = state;
                if state == PowerState::Inactive {
                    let mut scanning = self.scanning.write();
                    if *scanning {
                        debug!("radio inactive, scan flag cleared");
                        *scanning = false;
                    }
                }
                self.router.notify_power(state);
            }

            RadioEvent::PeripheralDiscovered {
                id,
                name,
                advertisement,
                rssi,
            } => {
                let snapshot = {
                    let mut registry = self.registry.write();
                    let peripheral = Self::resolve(&mut registry, id);
                    if let Some(name) = name {
                        peripheral.name = Some(name);
                    }
                    peripheral.rssi = Some(rssi);
                    peripheral.clone()
                };
                self.router.notify_discovered(&snapshot, &advertisement, rssi);
            }

            RadioEvent::PeripheralConnected { id } => {
                let snapshot = {
                    let mut registry = self.registry.write();
                    let peripheral = Self::resolve(&mut registry, id);
                    peripheral.transition(ConnectionEvent::DidConnect);
                    peripheral.clone()
                };
                info!(peripheral = %id, "peripheral connected");
                self.router.notify_connected(&snapshot);
            }

            RadioEvent::PeripheralDisconnected { id, error } => {
                let snapshot = {
                    let mut registry = self.registry.write();
                    let peripheral = Self::resolve(&mut registry, id);
                    peripheral.transition(ConnectionEvent::DidDisconnect);
                    peripheral.clone()
                };
                if let Some(error) = error.as_ref() {
                    warn!(peripheral = %id, %error, "peripheral disconnected with error");
                }
                self.router.notify_disconnected(&snapshot, error.as_ref());
            }

            RadioEvent::ServicesDiscovered {
                id,
                services,
                error,
            } => {
                let snapshot = {
                    let mut registry = self.registry.write();
                    let peripheral = Self::resolve(&mut registry, id);
                    if error.is_none() {
                        peripheral
                            .replace_services(services.into_iter().map(Service::from).collect());
                    }
                    peripheral.clone()
                };
                self.router.notify_services(&snapshot, error.as_ref());
            }

            RadioEvent::CharacteristicsDiscovered {
                service,
                characteristics,
                error,
            } => {
                let snapshot = {
                    let mut registry = self.registry.write();
                    let peripheral = Self::resolve(&mut registry, service.peripheral);
                    if error.is_none() {
                        let attached = peripheral.attach_characteristics(
                            service.index,
                            characteristics
                                .into_iter()
                                .map(Characteristic::from)
                                .collect(),
                        );
                        if !attached {
                            debug!(%service, "characteristics for unresolvable service dropped");
                        }
                    }
                    peripheral.clone()
                };
                self.router
                    .notify_characteristics(&snapshot, service, error.as_ref());
            }

            RadioEvent::ValueUpdated {
                characteristic,
                value,
                error,
            } => {
                let snapshot = {
                    let mut registry = self.registry.write();
                    let peripheral =
                        Self::resolve(&mut registry, characteristic.service.peripheral);
                    peripheral.complete_read(characteristic);
                    if error.is_none() {
                        if let Some(value) = value {
                            peripheral.update_value(characteristic, value);
                        }
                    }
                    peripheral.clone()
                };
                self.router
                    .notify_value(&snapshot, characteristic, error.as_ref());
            }

            RadioEvent::ServicesInvalidated { id, services } => {
                let snapshot = {
                    let mut registry = self.registry.write();
                    let peripheral = Self::resolve(&mut registry, id);
                    peripheral.invalidate_services(&services);
                    peripheral.clone()
                };
                self.router.notify_invalidated(&snapshot, &services);
            }
        }
    }

    /// Look up a record, creating a minimal one on first sight.
    ///
    /// Events are never dropped for naming an unknown identifier; a
    /// possibly incomplete record beats a lost event.
    fn resolve(registry: &mut HashMap<Uuid, Peripheral>, id: Uuid) -> &mut Peripheral {
        registry.entry(id).or_insert_with(|| {
            debug!(peripheral = %id, "registry record created");
            Peripheral::new(id)
        })
    }

    fn gate_connected(&self, id: Uuid) -> Result<(), CentralError> {
        let registry = self.registry.read();
        let peripheral = registry
            .get(&id)
            .ok_or(CentralError::UnknownPeripheral(id))?;
        if peripheral.state != ConnectionState::Connected {
            return Err(CentralError::NotConnected(id));
        }
        Ok(())
    }

    fn gate_service(&self, service: ServiceRef) -> Result<(), CentralError> {
        let registry = self.registry.read();
        let peripheral = registry
            .get(&service.peripheral)
            .ok_or(CentralError::UnknownPeripheral(service.peripheral))?;
        if peripheral.state != ConnectionState::Connected {
            return Err(CentralError::NotConnected(service.peripheral));
        }
        if peripheral.service(service).is_none() {
            return Err(CentralError::ServiceNotReady(service));
        }
        Ok(())
    }

    fn gate_characteristic(&self, characteristic: CharacteristicRef) -> Result<(), CentralError> {
        let registry = self.registry.read();
        let peripheral = registry
            .get(&characteristic.service.peripheral)
            .ok_or(CentralError::UnknownPeripheral(characteristic.service.peripheral))?;
        if peripheral.state != ConnectionState::Connected {
            return Err(CentralError::NotConnected(characteristic.service.peripheral));
        }
        if peripheral.characteristic(characteristic).is_none() {
            return Err(CentralError::ServiceNotReady(characteristic.service));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    enum LinkCall {
        StartScan { filtered: bool },
        StopScan,
        Connect(Uuid),
        CancelConnection(Uuid),
        DiscoverServices(Uuid),
        DiscoverCharacteristics(ServiceRef),
        ReadValue(CharacteristicRef),
    }

    /// Records every capability call; feeds nothing back.
    struct RecordingLink {
        power: PowerState,
        calls: Mutex<Vec<LinkCall>>,
    }

    impl RecordingLink {
        fn new(power: PowerState) -> Self {
            Self {
                power,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<LinkCall> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl RadioLink for RecordingLink {
        async fn power_state(&self) -> PowerState {
            self.power
        }

        async fn start_scan(&self, options: &ScanOptions) -> Result<(), RadioError> {
            self.calls.lock().push(LinkCall::StartScan {
                filtered: options.service_filter.is_some(),
            });
            Ok(())
        }

        async fn stop_scan(&self) -> Result<(), RadioError> {
            self.calls.lock().push(LinkCall::StopScan);
            Ok(())
        }

        async fn connect(&self, id: Uuid, _options: &ConnectOptions) -> Result<(), RadioError> {
            self.calls.lock().push(LinkCall::Connect(id));
            Ok(())
        }

        async fn cancel_connection(&self, id: Uuid) -> Result<(), RadioError> {
            self.calls.lock().push(LinkCall::CancelConnection(id));
            Ok(())
        }

        async fn discover_services(
            &self,
            id: Uuid,
            _filter: Option<&[Uuid]>,
        ) -> Result<(), RadioError> {
            self.calls.lock().push(LinkCall::DiscoverServices(id));
            Ok(())
        }

        async fn discover_characteristics(
            &self,
            service: ServiceRef,
            _filter: Option<&[Uuid]>,
        ) -> Result<(), RadioError> {
            self.calls
                .lock()
                .push(LinkCall::DiscoverCharacteristics(service));
            Ok(())
        }

        async fn read_value(&self, characteristic: CharacteristicRef) -> Result<(), RadioError> {
            self.calls.lock().push(LinkCall::ReadValue(characteristic));
            Ok(())
        }
    }

    fn active_central() -> (Arc<RecordingLink>, Central) {
        let link = Arc::new(RecordingLink::new(PowerState::Active));
        let central = Central::new(Arc::clone(&link) as Arc<dyn RadioLink>);
        (link, central)
    }

    fn discover(central: &Central, id: Uuid) {
        central.handle_event(RadioEvent::PeripheralDiscovered {
            id,
            name: Some("Sensor".to_string()),
            advertisement: Default::default(),
            rssi: -50,
        });
    }

    async fn connect_fully(central: &Central, id: Uuid) {
        discover(central, id);
        central
            .connect(id, ConnectOptions::default())
            .await
            .expect("connect");
        central.handle_event(RadioEvent::PeripheralConnected { id });
        assert_eq!(
            central.peripheral(id).unwrap().state,
            ConnectionState::Connected
        );
    }

    #[tokio::test]
    async fn test_scan_requires_active_radio() {
        let link = Arc::new(RecordingLink::new(PowerState::Inactive));
        let central = Central::new(Arc::clone(&link) as Arc<dyn RadioLink>);
        central.initialize().await;

        let result = central.scan(ScanOptions::default()).await;
        assert!(matches!(result, Err(CentralError::RadioInactive)));
        assert!(!central.is_scanning());
        // Gating failures never reach the stack
        assert!(link.calls().is_empty());
    }

    #[tokio::test]
    async fn test_scan_sets_flag_and_delegates() {
        let (link, central) = active_central();
        central.initialize().await;

        central
            .scan(ScanOptions::default().with_service_filter(vec![Uuid::new_v4()]))
            .await
            .expect("scan");

        assert!(central.is_scanning());
        assert_eq!(link.calls(), vec![LinkCall::StartScan { filtered: true }]);
    }

    #[tokio::test]
    async fn test_stop_scan_always_succeeds() {
        let (link, central) = active_central();
        central.stop_scan().await;
        assert!(!central.is_scanning());
        assert_eq!(link.calls(), vec![LinkCall::StopScan]);
    }

    #[tokio::test]
    async fn test_connect_unknown_peripheral() {
        let (link, central) = active_central();
        let id = Uuid::new_v4();

        let result = central.connect(id, ConnectOptions::default()).await;
        assert!(matches!(result, Err(CentralError::UnknownPeripheral(u)) if u == id));
        assert!(link.calls().is_empty());
    }

    #[tokio::test]
    async fn test_connect_transitions_to_connecting() {
        let (link, central) = active_central();
        let id = Uuid::new_v4();
        discover(&central, id);

        central
            .connect(id, ConnectOptions::default())
            .await
            .expect("connect");

        assert_eq!(
            central.peripheral(id).unwrap().state,
            ConnectionState::Connecting
        );
        assert!(link.calls().contains(&LinkCall::Connect(id)));
    }

    #[tokio::test]
    async fn test_discover_services_gated_on_connected() {
        let (link, central) = active_central();
        let id = Uuid::new_v4();
        discover(&central, id);

        let result = central.discover_services(id, None).await;
        assert!(matches!(result, Err(CentralError::NotConnected(u)) if u == id));
        assert!(link.calls().is_empty());
    }

    #[tokio::test]
    async fn test_read_before_discovery_is_service_not_ready() {
        let (link, central) = active_central();
        let id = Uuid::new_v4();
        connect_fully(&central, id).await;

        let reference = ServiceRef::new(id, 0).characteristic(0);
        let result = central.read_value(reference).await;
        assert!(matches!(result, Err(CentralError::ServiceNotReady(_))));
        assert!(!link
            .calls()
            .iter()
            .any(|call| matches!(call, LinkCall::ReadValue(_))));
    }

    #[tokio::test]
    async fn test_read_value_tracks_pending_request() {
        let (link, central) = active_central();
        let id = Uuid::new_v4();
        connect_fully(&central, id).await;

        central.handle_event(RadioEvent::ServicesDiscovered {
            id,
            services: vec![crate::capability::ServiceInfo {
                id: Some(Uuid::new_v4()),
                description: "svc".to_string(),
            }],
            error: None,
        });
        let service = ServiceRef::new(id, 0);
        central.handle_event(RadioEvent::CharacteristicsDiscovered {
            service,
            characteristics: vec![crate::capability::CharacteristicInfo {
                id: Some(Uuid::new_v4()),
                description: "chr".to_string(),
            }],
            error: None,
        });

        let reference = service.characteristic(0);
        central.read_value(reference).await.expect("read");
        assert_eq!(
            central.peripheral(id).unwrap().pending_reads(),
            &[reference]
        );
        assert!(link.calls().contains(&LinkCall::ReadValue(reference)));

        central.handle_event(RadioEvent::ValueUpdated {
            characteristic: reference,
            value: Some(vec![0x2A]),
            error: None,
        });
        let peripheral = central.peripheral(id).unwrap();
        assert!(peripheral.pending_reads().is_empty());
        assert_eq!(
            peripheral.characteristic(reference).unwrap().value,
            Some(vec![0x2A])
        );
    }

    #[tokio::test]
    async fn test_repeated_discovery_keeps_one_record() {
        let (_link, central) = active_central();
        let id = Uuid::new_v4();

        for rssi in [-40, -50, -60] {
            central.handle_event(RadioEvent::PeripheralDiscovered {
                id,
                name: None,
                advertisement: Default::default(),
                rssi,
            });
        }

        assert_eq!(central.peripherals().len(), 1);
        let peripheral = central.peripheral(id).unwrap();
        assert_eq!(peripheral.rssi, Some(-60));
        // Name survives discoveries that omit it
        assert_eq!(peripheral.name, None);
    }

    #[tokio::test]
    async fn test_power_loss_clears_scanning() {
        let (_link, central) = active_central();
        central.initialize().await;
        central.scan(ScanOptions::default()).await.expect("scan");
        assert!(central.is_scanning());

        central.handle_event(RadioEvent::PowerStateChanged {
            state: PowerState::Inactive,
        });
        assert!(!central.is_scanning());
        assert_eq!(central.power_state(), PowerState::Inactive);
    }

    #[tokio::test]
    async fn test_forget_then_event_recreates_fresh_record() {
        let (_link, central) = active_central();
        let id = Uuid::new_v4();
        connect_fully(&central, id).await;

        assert!(central.forget(id));
        assert!(central.peripheral(id).is_none());
        assert!(!central.forget(id));

        // A stray event for the forgotten identifier produces a minimal record
        central.handle_event(RadioEvent::PeripheralDisconnected { id, error: None });
        let fresh = central.peripheral(id).unwrap();
        assert_eq!(fresh.state, ConnectionState::Disconnected);
        assert!(fresh.name.is_none());
    }

    #[tokio::test]
    async fn test_reset_empties_registry() {
        let (_link, central) = active_central();
        central.initialize().await;
        central.scan(ScanOptions::default()).await.expect("scan");
        discover(&central, Uuid::new_v4());
        discover(&central, Uuid::new_v4());

        central.reset();
        assert!(central.peripherals().is_empty());
        assert!(!central.is_scanning());
    }

    #[tokio::test]
    async fn test_discovery_error_leaves_topology_untouched() {
        let (_link, central) = active_central();
        let id = Uuid::new_v4();
        connect_fully(&central, id).await;

        central.handle_event(RadioEvent::ServicesDiscovered {
            id,
            services: vec![crate::capability::ServiceInfo {
                id: Some(Uuid::new_v4()),
                description: String::new(),
            }],
            error: None,
        });
        assert_eq!(central.peripheral(id).unwrap().services.len(), 1);

        central.handle_event(RadioEvent::ServicesDiscovered {
            id,
            services: Vec::new(),
            error: Some(RadioError::DiscoveryFailed("att timeout".to_string())),
        });
        // Failed rediscovery does not clobber the cached topology
        assert_eq!(central.peripheral(id).unwrap().services.len(), 1);
    }
}

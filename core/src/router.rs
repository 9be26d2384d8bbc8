//! Observer registration and event dispatch.
//!
//! One registration point per event kind, each holding a list of observer
//! callbacks invoked synchronously, in registration order, on the stack's
//! notification context. Observers receive post-transition snapshots and
//! must hand long-running work off to their own scheduling domain before
//! returning.

use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::capability::{PowerState, RadioError};
use crate::model::{Advertisement, CharacteristicRef, Peripheral, ServiceRef};

type PowerObserver = Arc<dyn Fn(PowerState) + Send + Sync>;
type DiscoveredObserver = Arc<dyn Fn(&Peripheral, &Advertisement, i16) + Send + Sync>;
type ConnectedObserver = Arc<dyn Fn(&Peripheral) + Send + Sync>;
type DisconnectedObserver = Arc<dyn Fn(&Peripheral, Option<&RadioError>) + Send + Sync>;
type ServicesObserver = Arc<dyn Fn(&Peripheral, Option<&RadioError>) + Send + Sync>;
type CharacteristicsObserver =
    Arc<dyn Fn(&Peripheral, ServiceRef, Option<&RadioError>) + Send + Sync>;
type ValueObserver = Arc<dyn Fn(&Peripheral, CharacteristicRef, Option<&RadioError>) + Send + Sync>;
type InvalidatedObserver = Arc<dyn Fn(&Peripheral, &[Uuid]) + Send + Sync>;

/// Event-dispatch table mapping each event kind to its observer list.
#[derive(Default)]
pub struct EventRouter {
    power: RwLock<Vec<PowerObserver>>,
    discovered: RwLock<Vec<DiscoveredObserver>>,
    connected: RwLock<Vec<ConnectedObserver>>,
    disconnected: RwLock<Vec<DisconnectedObserver>>,
    services: RwLock<Vec<ServicesObserver>>,
    characteristics: RwLock<Vec<CharacteristicsObserver>>,
    values: RwLock<Vec<ValueObserver>>,
    invalidated: RwLock<Vec<InvalidatedObserver>>,
}

impl EventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_power_state_changed(&self, observer: impl Fn(PowerState) + Send + Sync + 'static) {
        self.power.write().push(Arc::new(observer));
    }

    pub fn on_peripheral_discovered(
        &self,
        observer: impl Fn(&Peripheral, &Advertisement, i16) + Send + Sync + 'static,
    ) {
        self.discovered.write().push(Arc::new(observer));
    }

    pub fn on_peripheral_connected(
        &self,
        observer: impl Fn(&Peripheral) + Send + Sync + 'static,
    ) {
        self.connected.write().push(Arc::new(observer));
    }

    pub fn on_peripheral_disconnected(
        &self,
        observer: impl Fn(&Peripheral, Option<&RadioError>) + Send + Sync + 'static,
    ) {
        self.disconnected.write().push(Arc::new(observer));
    }

    pub fn on_services_discovered(
        &self,
        observer: impl Fn(&Peripheral, Option<&RadioError>) + Send + Sync + 'static,
    ) {
        self.services.write().push(Arc::new(observer));
    }

    pub fn on_characteristics_discovered(
        &self,
        observer: impl Fn(&Peripheral, ServiceRef, Option<&RadioError>) + Send + Sync + 'static,
    ) {
        self.characteristics.write().push(Arc::new(observer));
    }

    pub fn on_value_updated(
        &self,
        observer: impl Fn(&Peripheral, CharacteristicRef, Option<&RadioError>)
            + Send
            + Sync
            + 'static,
    ) {
        self.values.write().push(Arc::new(observer));
    }

    pub fn on_services_invalidated(
        &self,
        observer: impl Fn(&Peripheral, &[Uuid]) + Send + Sync + 'static,
    ) {
        self.invalidated.write().push(Arc::new(observer));
    }

    // Dispatch helpers. The observer list is cloned out of the lock first,
    // so an observer may register further observers without deadlocking.

    pub(crate) fn notify_power(&self, state: PowerState) {
        let observers: Vec<_> = self.power.read().clone();
        debug!(observers = observers.len(), "dispatch power-state change");
        for observer in observers {
            observer(state);
        }
    }

    pub(crate) fn notify_discovered(
        &self,
        peripheral: &Peripheral,
        advertisement: &Advertisement,
        rssi: i16,
    ) {
        let observers: Vec<_> = self.discovered.read().clone();
        for observer in observers {
            observer(peripheral, advertisement, rssi);
        }
    }

    pub(crate) fn notify_connected(&self, peripheral: &Peripheral) {
        let observers: Vec<_> = self.connected.read().clone();
        for observer in observers {
            observer(peripheral);
        }
    }

    pub(crate) fn notify_disconnected(&self, peripheral: &Peripheral, error: Option<&RadioError>) {
        let observers: Vec<_> = self.disconnected.read().clone();
        for observer in observers {
            observer(peripheral, error);
        }
    }

    pub(crate) fn notify_services(&self, peripheral: &Peripheral, error: Option<&RadioError>) {
        let observers: Vec<_> = self.services.read().clone();
        for observer in observers {
            observer(peripheral, error);
        }
    }

    pub(crate) fn notify_characteristics(
        &self,
        peripheral: &Peripheral,
        service: ServiceRef,
        error: Option<&RadioError>,
    ) {
        let observers: Vec<_> = self.characteristics.read().clone();
        for observer in observers {
            observer(peripheral, service, error);
        }
    }

    pub(crate) fn notify_value(
        &self,
        peripheral: &Peripheral,
        characteristic: CharacteristicRef,
        error: Option<&RadioError>,
    ) {
        let observers: Vec<_> = self.values.read().clone();
        for observer in observers {
            observer(peripheral, characteristic, error);
        }
    }

    pub(crate) fn notify_invalidated(&self, peripheral: &Peripheral, stale: &[Uuid]) {
        let observers: Vec<_> = self.invalidated.read().clone();
        for observer in observers {
            observer(peripheral, stale);
        }
    }
}

//! Per-peripheral connection state machine and record mutations.
//!
//! Every routed event funnels through the transition function and the
//! mutation helpers here, so a peripheral's state and its discovered
//! topology can never be observed in a combination the table does not
//! produce. Undefined state/event pairs leave the state unchanged; the
//! radio stack may report disconnects redundantly and a stray disconnect
//! while already disconnected is a no-op, not an error.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;
use uuid::Uuid;

use crate::model::{Characteristic, CharacteristicRef, Peripheral, Service};

/// Connection lifecycle of a peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No connection; initial state
    Disconnected,
    /// Connect issued, completion pending
    Connecting,
    /// Link established; discovery and reads may be issued
    Connected,
    /// Cancel issued, teardown pending
    Disconnecting,
}

impl Default for ConnectionState {
    fn default() -> Self {
        ConnectionState::Disconnected
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Disconnecting => write!(f, "disconnecting"),
        }
    }
}

/// Inputs that drive the connection state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Coordinator issued a connect
    ConnectRequested,
    /// Coordinator issued a cancel
    CancelRequested,
    /// Stack reported the link established
    DidConnect,
    /// Stack reported the link gone (or a connect failure)
    DidDisconnect,
}

impl ConnectionState {
    /// Total transition function.
    ///
    /// Disconnection is always accepted from any in-flight state; every
    /// other undefined pair resolves to the current state.
    pub fn apply(self, event: ConnectionEvent) -> ConnectionState {
        match (self, event) {
            (ConnectionState::Disconnected, ConnectionEvent::ConnectRequested) => {
                ConnectionState::Connecting
            }
            (ConnectionState::Connecting, ConnectionEvent::DidConnect) => {
                ConnectionState::Connected
            }
            (ConnectionState::Connected, ConnectionEvent::CancelRequested) => {
                ConnectionState::Disconnecting
            }
            (_, ConnectionEvent::DidDisconnect) => ConnectionState::Disconnected,
            (state, _) => state,
        }
    }
}

impl Peripheral {
    /// Apply a connection event and return the resulting state.
    ///
    /// Dropping to `Disconnected` abandons in-flight read requests; their
    /// value-updated events can no longer arrive on the dead link.
    pub(crate) fn transition(&mut self, event: ConnectionEvent) -> ConnectionState {
        let next = self.state.apply(event);
        if next != self.state {
            debug!(peripheral = %self.id, from = %self.state, to = %next, "connection state change");
            self.state = next;
            if next == ConnectionState::Disconnected {
                self.pending_reads.clear();
            }
        }
        next
    }

    /// Replace the services collection wholesale with a fresh discovery
    /// result, keeping the first occurrence of any repeated identifier.
    ///
    /// Services with absent identifiers are kept as-is; they cannot collide
    /// by identifier and remain addressable by position.
    pub(crate) fn replace_services(&mut self, discovered: Vec<Service>) {
        let mut services: Vec<Service> = Vec::with_capacity(discovered.len());
        for service in discovered {
            let duplicate = services.iter().any(|kept| kept.same_identity(&service));
            if !duplicate {
                services.push(service);
            }
        }
        self.services = services;
    }

    /// Attach a characteristics discovery result to the service at `index`.
    ///
    /// Returns `false` when the index resolves to nothing, which happens if
    /// the service topology was replaced or invalidated while the discovery
    /// was in flight.
    pub(crate) fn attach_characteristics(
        &mut self,
        index: usize,
        characteristics: Vec<Characteristic>,
    ) -> bool {
        match self.services.get_mut(index) {
            Some(service) => {
                service.characteristics = characteristics;
                true
            }
            None => false,
        }
    }

    /// Store a fresh value on the referenced characteristic.
    pub(crate) fn update_value(&mut self, reference: CharacteristicRef, value: Vec<u8>) -> bool {
        if reference.service.peripheral != self.id {
            return false;
        }
        let characteristic = self
            .services
            .get_mut(reference.service.index)
            .and_then(|service| service.characteristics.get_mut(reference.index));
        match characteristic {
            Some(characteristic) => {
                characteristic.value = Some(value);
                true
            }
            None => false,
        }
    }

    /// Drop the listed service identifiers from the services collection.
    ///
    /// Services with absent identifiers are unaffected; an invalidation can
    /// only name services by identifier.
    pub(crate) fn invalidate_services(&mut self, stale: &[Uuid]) {
        self.services
            .retain(|service| match service.id {
                Some(id) => !stale.contains(&id),
                None => true,
            });
    }

    /// Record an issued read until its value-updated event arrives.
    pub(crate) fn track_read(&mut self, reference: CharacteristicRef) {
        if !self.pending_reads.contains(&reference) {
            self.pending_reads.push(reference);
        }
    }

    /// Mark a read answered. Returns `false` for unsolicited updates
    /// (notifications), which are delivered without a matching request.
    pub(crate) fn complete_read(&mut self, reference: CharacteristicRef) -> bool {
        match self.pending_reads.iter().position(|r| *r == reference) {
            Some(position) => {
                self.pending_reads.remove(position);
                true
            }
            None => false,
        }
    }
}

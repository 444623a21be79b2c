//! In-process stand-ins for the platform radio and UWB stack
//!
//! Used by the `simulate` command and the tests: a loopback BLE radio shared
//! by several endpoints, a synthetic ranging provider and an observer that
//! records every notification.

use crate::observer::{LocalSummary, RangingObserver};
use crate::oob::{ComplexChannel, Role};
use crate::ranging::{
    Measurement, MeasurementDisplay, RangingCapabilities, RangingEvent, RangingEventSink,
    RangingParameters, RangingProvider, RangingSubscription, SessionScope, SessionState,
};
use crate::transport::ble::{
    AdvertiseSettings, BroadcastTransport, ScanCallback, ScanObservation, ScanTransport,
};
use crate::{ErrorKind, UwbError};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;

// ============================================================================
// LOOPBACK RADIO
// ============================================================================

#[derive(Clone)]
struct Advertisement {
    service_id: Uuid,
    payload: Vec<u8>,
    include_name: bool,
}

#[derive(Default)]
struct RadioState {
    adverts: HashMap<String, Advertisement>,
    scanners: HashMap<String, (Uuid, ScanCallback)>,
}

impl Advertisement {
    fn observation(&self, from: &str) -> ScanObservation {
        ScanObservation::new(
            from,
            self.include_name.then(|| from.to_string()),
            Some(self.payload.clone()),
        )
    }
}

/// Shared air between loopback endpoints
#[derive(Default)]
pub struct LoopbackRadio {
    state: Arc<Mutex<RadioState>>,
}

impl LoopbackRadio {
    pub fn new() -> Self {
        Self::default()
    }

    /// A device on this radio, identified by `name` in scan results
    pub fn endpoint(&self, name: &str) -> LoopbackEndpoint {
        LoopbackEndpoint {
            name: name.to_string(),
            state: Arc::clone(&self.state),
        }
    }

    /// Currently published advertisements as `(device, payload)`
    pub fn advertisements(&self) -> Vec<(String, Vec<u8>)> {
        let mut adverts: Vec<_> = self
            .state
            .lock()
            .adverts
            .iter()
            .map(|(name, ad)| (name.clone(), ad.payload.clone()))
            .collect();
        adverts.sort();
        adverts
    }
}

pub struct LoopbackEndpoint {
    name: String,
    state: Arc<Mutex<RadioState>>,
}

impl LoopbackEndpoint {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl BroadcastTransport for LoopbackEndpoint {
    fn publish(
        &self,
        service_id: Uuid,
        payload: &[u8],
        settings: &AdvertiseSettings,
    ) -> Result<(), UwbError> {
        let advert = Advertisement {
            service_id,
            payload: payload.to_vec(),
            include_name: settings.include_device_name,
        };

        let listeners: Vec<ScanCallback> = {
            let mut state = self.state.lock();
            state.adverts.insert(self.name.clone(), advert.clone());
            state
                .scanners
                .iter()
                .filter(|(name, (id, _))| *name != &self.name && *id == service_id)
                .map(|(_, (_, callback))| callback.clone())
                .collect()
        };

        debug!("{} published {} bytes", self.name, payload.len());
        for callback in listeners {
            callback(advert.observation(&self.name));
        }
        Ok(())
    }

    fn stop_publishing(&self) -> Result<(), UwbError> {
        self.state.lock().adverts.remove(&self.name);
        Ok(())
    }
}

impl ScanTransport for LoopbackEndpoint {
    fn start_scan(&self, service_id: Uuid, callback: ScanCallback) -> Result<(), UwbError> {
        let visible: Vec<ScanObservation> = {
            let mut state = self.state.lock();
            state
                .scanners
                .insert(self.name.clone(), (service_id, callback.clone()));
            state
                .adverts
                .iter()
                .filter(|(name, ad)| *name != &self.name && ad.service_id == service_id)
                .map(|(name, ad)| ad.observation(name))
                .collect()
        };

        for observation in visible {
            callback(observation);
        }
        Ok(())
    }

    fn stop_scan(&self) -> Result<(), UwbError> {
        self.state.lock().scanners.remove(&self.name);
        Ok(())
    }
}

// ============================================================================
// SIMULATED RANGING PROVIDER
// ============================================================================

struct SimSubscriptionEntry {
    sink: RangingEventSink,
    params: RangingParameters,
    cancelled: bool,
}

struct ProviderState {
    next_address: u16,
    next_scope: u64,
    fail_next: Option<String>,
    subscriptions: Vec<SimSubscriptionEntry>,
}

/// Synthetic UWB stack. Addresses are handed out sequentially from `base`.
pub struct SimulatedRangingProvider {
    capabilities: RangingCapabilities,
    state: Arc<Mutex<ProviderState>>,
}

impl SimulatedRangingProvider {
    pub fn new(base_address: u16) -> Self {
        Self {
            capabilities: RangingCapabilities::full(),
            state: Arc::new(Mutex::new(ProviderState {
                next_address: base_address,
                next_scope: 1,
                fail_next: None,
                subscriptions: Vec::new(),
            })),
        }
    }

    pub fn with_capabilities(mut self, capabilities: RangingCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Make the next `start_ranging` fail with `message`
    pub fn fail_next_start(&self, message: &str) {
        self.state.lock().fail_next = Some(message.to_string());
    }

    /// Push an event into the most recent live subscription.
    /// Returns whether the controller accepted it.
    pub fn emit(&self, event: RangingEvent) -> bool {
        let sink = {
            let state = self.state.lock();
            state
                .subscriptions
                .iter()
                .rev()
                .find(|s| !s.cancelled)
                .map(|s| s.sink.clone())
        };
        match sink {
            Some(sink) => sink.deliver(event),
            None => false,
        }
    }

    /// Sinks of every subscription ever opened, live or not
    pub fn sinks(&self) -> Vec<RangingEventSink> {
        self.state
            .lock()
            .subscriptions
            .iter()
            .map(|s| s.sink.clone())
            .collect()
    }

    pub fn last_parameters(&self) -> Option<RangingParameters> {
        self.state
            .lock()
            .subscriptions
            .last()
            .map(|s| s.params.clone())
    }

    pub fn started_sessions(&self) -> usize {
        self.state.lock().subscriptions.len()
    }

    pub fn active_subscriptions(&self) -> usize {
        self.state
            .lock()
            .subscriptions
            .iter()
            .filter(|s| !s.cancelled)
            .count()
    }

    pub fn cancelled_subscriptions(&self) -> usize {
        self.state
            .lock()
            .subscriptions
            .iter()
            .filter(|s| s.cancelled)
            .count()
    }
}

struct SimSubscription {
    index: usize,
    state: Arc<Mutex<ProviderState>>,
}

impl RangingSubscription for SimSubscription {
    fn cancel(&mut self) {
        if let Some(entry) = self.state.lock().subscriptions.get_mut(self.index) {
            entry.cancelled = true;
        }
    }
}

impl RangingProvider for SimulatedRangingProvider {
    fn acquire_session(&self, role: Role) -> Result<SessionScope, UwbError> {
        let mut state = self.state.lock();
        let scope_id = state.next_scope;
        let local_address = state.next_address;
        state.next_scope += 1;
        state.next_address = state.next_address.wrapping_add(1);

        let channel = match role {
            // Preamble indices 9..=12 are the valid BPRF set
            Role::Controller => Some(ComplexChannel::new(9, 9 + (scope_id % 4) as u8)),
            Role::Controlee => None,
        };

        Ok(SessionScope {
            scope_id,
            local_address,
            role,
            channel,
            capabilities: self.capabilities,
        })
    }

    fn start_ranging(
        &self,
        _scope: &SessionScope,
        params: &RangingParameters,
        sink: RangingEventSink,
    ) -> Result<Box<dyn RangingSubscription>, UwbError> {
        let mut state = self.state.lock();
        if let Some(message) = state.fail_next.take() {
            return Err(UwbError::Provider(message));
        }

        state.subscriptions.push(SimSubscriptionEntry {
            sink,
            params: params.clone(),
            cancelled: false,
        });
        Ok(Box::new(SimSubscription {
            index: state.subscriptions.len() - 1,
            state: Arc::clone(&self.state),
        }))
    }
}

// ============================================================================
// RECORDING OBSERVER
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum ObservedEvent {
    Measurement(Measurement),
    Display(MeasurementDisplay),
    SessionState(SessionState),
    PeerDiscovered(String),
    LocalIdentity(LocalSummary),
    Broadcast(bool),
    Scan(bool),
    Error(ErrorKind, String),
}

/// Observer that keeps every notification in order
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<ObservedEvent>>,
    changed: Condvar,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, event: ObservedEvent) {
        self.events.lock().push(event);
        self.changed.notify_all();
    }

    pub fn events(&self) -> Vec<ObservedEvent> {
        self.events.lock().clone()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    pub fn session_states(&self) -> Vec<SessionState> {
        self.filter(|e| match e {
            ObservedEvent::SessionState(s) => Some(*s),
            _ => None,
        })
    }

    pub fn measurements(&self) -> Vec<Measurement> {
        self.filter(|e| match e {
            ObservedEvent::Measurement(m) => Some(*m),
            _ => None,
        })
    }

    pub fn discovered(&self) -> Vec<String> {
        self.filter(|e| match e {
            ObservedEvent::PeerDiscovered(text) => Some(text.clone()),
            _ => None,
        })
    }

    pub fn scan_states(&self) -> Vec<bool> {
        self.filter(|e| match e {
            ObservedEvent::Scan(on) => Some(*on),
            _ => None,
        })
    }

    pub fn errors(&self) -> Vec<(ErrorKind, String)> {
        self.filter(|e| match e {
            ObservedEvent::Error(kind, message) => Some((*kind, message.clone())),
            _ => None,
        })
    }

    fn filter<T>(&self, f: impl Fn(&ObservedEvent) -> Option<T>) -> Vec<T> {
        self.events.lock().iter().filter_map(f).collect()
    }

    /// Block until an event matching `f` has been recorded, or `timeout`
    pub fn wait_for<T>(
        &self,
        timeout: Duration,
        f: impl Fn(&ObservedEvent) -> Option<T>,
    ) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut events = self.events.lock();
        loop {
            if let Some(found) = events.iter().rev().find_map(&f) {
                return Some(found);
            }
            if self.changed.wait_until(&mut events, deadline).timed_out() {
                return events.iter().rev().find_map(&f);
            }
        }
    }

    /// Wait for a scope of `role` to be announced
    pub fn wait_for_identity(&self, role: Role) -> Option<LocalSummary> {
        self.wait_for(Duration::from_secs(5), |e| match e {
            ObservedEvent::LocalIdentity(summary) if summary.role == role => {
                Some(summary.clone())
            }
            _ => None,
        })
    }
}

impl RangingObserver for RecordingObserver {
    fn on_measurement(&self, measurement: Measurement) {
        self.push(ObservedEvent::Measurement(measurement));
    }

    fn on_display_changed(&self, display: MeasurementDisplay) {
        self.push(ObservedEvent::Display(display));
    }

    fn on_session_state_changed(&self, state: SessionState) {
        self.push(ObservedEvent::SessionState(state));
    }

    fn on_peer_discovered(&self, display_text: String) {
        self.push(ObservedEvent::PeerDiscovered(display_text));
    }

    fn on_local_identity_changed(&self, summary: LocalSummary) {
        self.push(ObservedEvent::LocalIdentity(summary));
    }

    fn on_broadcast_state_changed(&self, advertising: bool) {
        self.push(ObservedEvent::Broadcast(advertising));
    }

    fn on_scan_state_changed(&self, scanning: bool) {
        self.push(ObservedEvent::Scan(scanning));
    }

    fn on_error(&self, kind: ErrorKind, message: String) {
        self.push(ObservedEvent::Error(kind, message));
    }
}

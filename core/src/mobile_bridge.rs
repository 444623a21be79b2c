// Mobile bridge types for UniFFI bindings
//
// The platform (Kotlin/Swift) owns the BLE radio and the UWB stack. It
// implements `PlatformRanging` and `PlatformBluetooth`, and pushes scan
// results and ranging events back through `UwbService`.

use crate::config::RangingConfig;
use crate::observer::{LocalSummary, RangingObserver};
use crate::oob::Role;
use crate::ranging::{
    Measurement, MeasurementDisplay, RangingEvent, RangingEventSink, RangingParameters,
    RangingProvider, RangingSubscription, SessionScope, SessionState,
};
use crate::service::RangingService;
use crate::transport::ble::{
    AdvertiseSettings, BroadcastTransport, ScanCallback, ScanObservation, ScanTransport,
};
use crate::UwbError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

// ============================================================================
// PLATFORM CALLBACKS
// ============================================================================

/// Failure raised by platform code inside a callback
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum PlatformError {
    #[error("{message}")]
    Failure { message: String },
    #[error("unexpected callback error: {reason}")]
    Unexpected { reason: String },
}

impl From<uniffi::UnexpectedUniFFICallbackError> for PlatformError {
    fn from(err: uniffi::UnexpectedUniFFICallbackError) -> Self {
        PlatformError::Unexpected { reason: err.reason }
    }
}

/// Platform UWB stack (UwbManager on Android, NearbyInteraction on iOS)
pub trait PlatformRanging: Send + Sync {
    /// Blocking acquisition of a controller or controlee scope
    fn acquire_session(&self, role: Role) -> Result<SessionScope, PlatformError>;
    /// Start ranging. Events for it are reported with `subscription_id`.
    fn start_ranging(
        &self,
        subscription_id: u64,
        scope: SessionScope,
        params: RangingParameters,
    ) -> Result<(), PlatformError>;
    /// Must have released the subscription when it returns
    fn stop_ranging(&self, subscription_id: u64);
}

/// Platform BLE radio
pub trait PlatformBluetooth: Send + Sync {
    fn start_advertising(
        &self,
        service_uuid: String,
        payload: Vec<u8>,
        settings: AdvertiseSettings,
    ) -> Result<(), PlatformError>;
    fn stop_advertising(&self) -> Result<(), PlatformError>;
    /// Results are reported through `UwbService::on_scan_result`
    fn start_scan(&self, service_uuid: String) -> Result<(), PlatformError>;
    fn stop_scan(&self) -> Result<(), PlatformError>;
}

// ============================================================================
// ADAPTERS
// ============================================================================

/// `RangingProvider` over the platform callbacks
pub struct PlatformRangingAdapter {
    platform: Arc<dyn PlatformRanging>,
    sinks: Arc<Mutex<HashMap<u64, RangingEventSink>>>,
    next_id: AtomicU64,
}

impl PlatformRangingAdapter {
    pub fn new(platform: Arc<dyn PlatformRanging>) -> Self {
        Self {
            platform,
            sinks: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Route a platform event to its subscription. Returns false for unknown
    /// or finished subscriptions.
    pub fn deliver(&self, subscription_id: u64, event: RangingEvent) -> bool {
        let terminal = event.is_terminal();
        let sink = {
            let mut sinks = self.sinks.lock();
            if terminal {
                sinks.remove(&subscription_id)
            } else {
                sinks.get(&subscription_id).cloned()
            }
        };
        match sink {
            Some(sink) => sink.deliver(event),
            None => {
                tracing::debug!("No subscription {} for ranging event", subscription_id);
                false
            }
        }
    }

    pub fn live_subscriptions(&self) -> usize {
        self.sinks.lock().len()
    }
}

struct PlatformSubscription {
    id: u64,
    platform: Arc<dyn PlatformRanging>,
    sinks: Arc<Mutex<HashMap<u64, RangingEventSink>>>,
}

impl RangingSubscription for PlatformSubscription {
    fn cancel(&mut self) {
        self.sinks.lock().remove(&self.id);
        self.platform.stop_ranging(self.id);
    }
}

impl RangingProvider for PlatformRangingAdapter {
    fn acquire_session(&self, role: Role) -> Result<SessionScope, UwbError> {
        self.platform
            .acquire_session(role)
            .map_err(|e| UwbError::Provider(e.to_string()))
    }

    fn start_ranging(
        &self,
        scope: &SessionScope,
        params: &RangingParameters,
        sink: RangingEventSink,
    ) -> Result<Box<dyn RangingSubscription>, UwbError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.sinks.lock().insert(id, sink);

        if let Err(e) = self.platform.start_ranging(id, scope.clone(), params.clone()) {
            self.sinks.lock().remove(&id);
            return Err(UwbError::Provider(e.to_string()));
        }

        Ok(Box::new(PlatformSubscription {
            id,
            platform: Arc::clone(&self.platform),
            sinks: Arc::clone(&self.sinks),
        }))
    }
}

/// `BroadcastTransport` and `ScanTransport` over the platform callbacks
pub struct PlatformBluetoothAdapter {
    platform: Arc<dyn PlatformBluetooth>,
    scan_callback: Mutex<Option<ScanCallback>>,
}

impl PlatformBluetoothAdapter {
    pub fn new(platform: Arc<dyn PlatformBluetooth>) -> Self {
        Self {
            platform,
            scan_callback: Mutex::new(None),
        }
    }

    /// Hand a platform scan result to the running scan, if any
    pub fn deliver_scan(&self, observation: ScanObservation) -> bool {
        let callback = self.scan_callback.lock().clone();
        match callback {
            Some(callback) => {
                callback(observation);
                true
            }
            None => false,
        }
    }
}

impl BroadcastTransport for PlatformBluetoothAdapter {
    fn publish(
        &self,
        service_id: Uuid,
        payload: &[u8],
        settings: &AdvertiseSettings,
    ) -> Result<(), UwbError> {
        self.platform
            .start_advertising(service_id.to_string(), payload.to_vec(), *settings)
            .map_err(transport_error)
    }

    fn stop_publishing(&self) -> Result<(), UwbError> {
        self.platform.stop_advertising().map_err(transport_error)
    }
}

impl ScanTransport for PlatformBluetoothAdapter {
    fn start_scan(&self, service_id: Uuid, callback: ScanCallback) -> Result<(), UwbError> {
        *self.scan_callback.lock() = Some(callback);
        if let Err(e) = self.platform.start_scan(service_id.to_string()) {
            *self.scan_callback.lock() = None;
            return Err(transport_error(e));
        }
        Ok(())
    }

    fn stop_scan(&self) -> Result<(), UwbError> {
        *self.scan_callback.lock() = None;
        self.platform.stop_scan().map_err(transport_error)
    }
}

fn transport_error(e: PlatformError) -> UwbError {
    UwbError::Transport(e.to_string())
}

// ============================================================================
// UWB SERVICE
// ============================================================================

/// Ranging service exported to mobile platforms
pub struct UwbService {
    service: RangingService,
    ranging: Arc<PlatformRangingAdapter>,
    bluetooth: Arc<PlatformBluetoothAdapter>,
}

impl UwbService {
    /// Create the service and start acquiring a session scope for `role`
    pub fn new(
        config: RangingConfig,
        role: Role,
        ranging: Box<dyn PlatformRanging>,
        bluetooth: Box<dyn PlatformBluetooth>,
        observer: Box<dyn RangingObserver>,
    ) -> Result<Self, UwbError> {
        // Initialize tracing (idempotent)
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .try_init();

        let ranging = Arc::new(PlatformRangingAdapter::new(Arc::from(ranging)));
        let bluetooth = Arc::new(PlatformBluetoothAdapter::new(Arc::from(bluetooth)));
        let observer: Arc<dyn RangingObserver> = Arc::from(observer);

        let service = RangingService::new(
            config,
            role,
            ranging.clone(),
            bluetooth.clone(),
            bluetooth.clone(),
            observer,
        )?;
        service.refresh_session()?;

        Ok(Self {
            service,
            ranging,
            bluetooth,
        })
    }

    pub fn refresh_session(&self) -> Result<(), UwbError> {
        self.service.refresh_session()
    }

    pub fn set_role(&self, role: Role) -> Result<(), UwbError> {
        self.service.set_role(role)
    }

    pub fn toggle_role(&self) -> Result<Role, UwbError> {
        self.service.toggle_role()
    }

    pub fn role(&self) -> Role {
        self.service.role()
    }

    pub fn local_summary(&self) -> Option<LocalSummary> {
        self.service.local_summary()
    }

    pub fn session_state(&self) -> SessionState {
        self.service.session_state()
    }

    pub fn display(&self) -> MeasurementDisplay {
        self.service.display()
    }

    pub fn peer_list(&self) -> Vec<String> {
        self.service
            .peers()
            .iter()
            .map(|peer| peer.display_text())
            .collect()
    }

    pub fn start_scan(&self) -> Result<(), UwbError> {
        self.service.start_scan()
    }

    pub fn stop_scan(&self) -> bool {
        self.service.stop_scan()
    }

    pub fn toggle_scan(&self) -> Result<bool, UwbError> {
        self.service.toggle_scan()
    }

    pub fn is_scanning(&self) -> bool {
        self.service.is_scanning()
    }

    pub fn start_manual(&self, address: String, preamble: String) -> Result<(), UwbError> {
        self.service.start_manual(&address, &preamble).map(|_| ())
    }

    pub fn stop_ranging(&self) -> Result<bool, UwbError> {
        self.service.stop_ranging()
    }

    pub fn start_advertising(&self) -> Result<(), UwbError> {
        self.service.start_advertising()
    }

    pub fn stop_advertising(&self) -> Result<(), UwbError> {
        self.service.stop_advertising()
    }

    pub fn toggle_advertising(&self) -> Result<bool, UwbError> {
        self.service.toggle_advertising()
    }

    pub fn is_advertising(&self) -> bool {
        self.service.is_advertising()
    }

    pub fn on_advertise_failed(&self, code: i32) {
        self.service.on_advertise_failed(code)
    }

    pub fn on_scan_result(
        &self,
        device: String,
        display_name: Option<String>,
        service_data: Option<Vec<u8>>,
    ) {
        let observation = ScanObservation::new(device, display_name, service_data);
        if !self.bluetooth.deliver_scan(observation) {
            tracing::debug!("Scan result outside a scan window ignored");
        }
    }

    pub fn on_scan_failed(&self, code: i32) {
        self.service.on_scan_failed(code)
    }

    pub fn on_ranging_position(&self, subscription_id: u64, measurement: Measurement) -> bool {
        self.ranging
            .deliver(subscription_id, RangingEvent::Position(measurement))
    }

    pub fn on_ranging_peer_disconnected(&self, subscription_id: u64) -> bool {
        self.ranging
            .deliver(subscription_id, RangingEvent::PeerDisconnected)
    }

    pub fn on_ranging_error(&self, subscription_id: u64, message: String) -> bool {
        self.ranging
            .deliver(subscription_id, RangingEvent::Error(message))
    }

    pub fn on_ranging_complete(&self, subscription_id: u64) -> bool {
        self.ranging
            .deliver(subscription_id, RangingEvent::Complete)
    }

    pub fn shutdown(&self) {
        self.service.shutdown()
    }
}

impl Drop for UwbService {
    fn drop(&mut self) {
        self.service.shutdown();
    }
}

//! Ranging service: ties discovery, matching, advertising and the session
//! controller together for one device.
//!
//! Session scopes are acquired on a background worker so the caller never
//! blocks on the provider. Results from a superseded role are discarded.

use crate::config::RangingConfig;
use crate::discovery::{DiscoveryLedger, InitiationPlan, PeerRecord};
use crate::observer::{report, LocalSummary, RangingObserver};
use crate::oob::{ComplexChannel, LocalIdentity, Role};
use crate::ranging::{
    MeasurementDisplay, RangingProvider, RangingSession, SessionController, SessionState,
};
use crate::transport::ble::{
    BroadcastController, BroadcastTransport, ScanObservation, ScanTransport, ScanWindow,
};
use crate::UwbError;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use tracing::{debug, error, info, warn};

struct RoleState {
    role: Role,
    /// Bumped on every role change and on shutdown
    epoch: u64,
}

struct ServiceInner {
    config: RangingConfig,
    provider: Arc<dyn RangingProvider>,
    observer: Arc<dyn RangingObserver>,
    controller: SessionController,
    broadcast: BroadcastController,
    scanner: ScanWindow,
    ledger: Mutex<DiscoveryLedger>,
    role: Mutex<RoleState>,
    /// User asked for advertising; survives scope changes
    advertise_enabled: AtomicBool,
}

impl ServiceInner {
    fn acquire_scope(&self, role: Role, epoch: u64) -> Result<Option<LocalSummary>, UwbError> {
        debug!("Acquiring {} session scope", role);
        let scope = self.provider.acquire_session(role)?;
        let identity = scope.identity()?;
        let capabilities = scope.capabilities;

        // The role lock is only held for the epoch check. Binding stops the
        // active session, which calls back into the observer.
        let bound = self.controller.bind_scope_if(Some(scope), || {
            let current = self.role.lock();
            current.epoch == epoch && current.role == role
        });
        if !bound {
            debug!("Discarding {} scope from superseded role change", role);
            return Ok(None);
        }

        let summary = LocalSummary::new(&identity, capabilities);
        info!(
            "Session scope ready: {} at address {:#06x}",
            role,
            identity.address()
        );
        self.observer.on_local_identity_changed(summary.clone());

        if self.advertise_enabled.load(Ordering::SeqCst) {
            if let Err(e) = self.publish(&identity) {
                report(self.observer.as_ref(), &e);
            }
        }
        Ok(Some(summary))
    }

    /// Session id carried in the advertisement. Controlees have none yet.
    fn advertised_session_id(&self, identity: &LocalIdentity) -> u16 {
        if identity.is_controller() {
            self.config.session_id
        } else {
            0
        }
    }

    fn publish(&self, identity: &LocalIdentity) -> Result<(), UwbError> {
        match self
            .broadcast
            .refresh(identity, self.advertised_session_id(identity))
        {
            Ok(_) => {
                self.observer.on_broadcast_state_changed(true);
                Ok(())
            }
            Err(e) => {
                self.advertise_enabled.store(false, Ordering::SeqCst);
                self.observer.on_broadcast_state_changed(false);
                Err(e)
            }
        }
    }

    fn handle_scan_result(&self, observation: ScanObservation) -> Option<PeerRecord> {
        let record = self.ledger.lock().observe(
            observation.device,
            observation.display_name,
            observation.service_data.as_deref(),
        )?;

        debug!("Discovered peer {}", record.device);
        self.observer.on_peer_discovered(record.display_text());

        if self.config.auto_initiate {
            if let Err(e) = self.controller.try_initiate(&record, self.config.session_id) {
                warn!("Automatic ranging with {} failed: {}", record.device, e);
            }
        }
        Some(record)
    }

    fn spawn_acquire(self: &Arc<Self>, role: Role, epoch: u64) -> Result<(), UwbError> {
        let inner = Arc::clone(self);
        thread::Builder::new()
            .name("uwb-session-scope".to_string())
            .spawn(move || {
                if let Err(e) = inner.acquire_scope(role, epoch) {
                    error!("Failed to acquire {} session scope: {}", role, e);
                    report(inner.observer.as_ref(), &e);
                }
            })
            .map(|_| ())
            .map_err(|e| UwbError::Internal(format!("session scope worker: {}", e)))
    }
}

/// One device's UWB ranging stack
#[derive(Clone)]
pub struct RangingService {
    inner: Arc<ServiceInner>,
}

impl RangingService {
    pub fn new(
        config: RangingConfig,
        role: Role,
        provider: Arc<dyn RangingProvider>,
        broadcast: Arc<dyn BroadcastTransport>,
        scan: Arc<dyn ScanTransport>,
        observer: Arc<dyn RangingObserver>,
    ) -> Result<Self, UwbError> {
        config.validate()?;
        let service_id = config.service_id()?;

        let controller =
            SessionController::new(provider.clone(), observer.clone(), config.template());
        let broadcast = BroadcastController::new(broadcast, service_id, config.advertise);
        let scanner = ScanWindow::new(scan, service_id, config.scan_window());

        let scan_observer = Arc::clone(&observer);
        scanner.set_on_stopped(Arc::new(move |_| scan_observer.on_scan_state_changed(false)));

        info!("Ranging service created as {}", role);
        Ok(Self {
            inner: Arc::new(ServiceInner {
                config,
                provider,
                observer,
                controller,
                broadcast,
                scanner,
                ledger: Mutex::new(DiscoveryLedger::new()),
                role: Mutex::new(RoleState { role, epoch: 0 }),
                advertise_enabled: AtomicBool::new(false),
            }),
        })
    }

    pub fn config(&self) -> &RangingConfig {
        &self.inner.config
    }

    pub fn role(&self) -> Role {
        self.inner.role.lock().role
    }

    pub fn local_identity(&self) -> Option<LocalIdentity> {
        self.inner.controller.local_identity()
    }

    pub fn local_summary(&self) -> Option<LocalSummary> {
        let scope = self.inner.controller.scope()?;
        let identity = scope.identity().ok()?;
        Some(LocalSummary::new(&identity, scope.capabilities))
    }

    pub fn session_state(&self) -> SessionState {
        self.inner.controller.state()
    }

    pub fn active_session(&self) -> Option<RangingSession> {
        self.inner.controller.active_session()
    }

    pub fn display(&self) -> MeasurementDisplay {
        self.inner.controller.display()
    }

    pub fn controller(&self) -> &SessionController {
        &self.inner.controller
    }

    // ------------------------------------------------------------------
    // Session scope and role
    // ------------------------------------------------------------------

    /// Re-acquire the session scope for the current role in the background
    pub fn refresh_session(&self) -> Result<(), UwbError> {
        let (role, epoch) = {
            let current = self.inner.role.lock();
            (current.role, current.epoch)
        };
        self.inner.spawn_acquire(role, epoch)
    }

    /// Re-acquire the session scope on the calling thread
    pub fn refresh_session_blocking(&self) -> Result<LocalSummary, UwbError> {
        let (role, epoch) = {
            let current = self.inner.role.lock();
            (current.role, current.epoch)
        };
        self.inner
            .acquire_scope(role, epoch)?
            .ok_or_else(|| UwbError::Internal("role changed while acquiring scope".to_string()))
    }

    /// Switch roles. The active session and the current identity are dropped,
    /// and a new scope is acquired in the background.
    pub fn set_role(&self, role: Role) -> Result<(), UwbError> {
        let epoch = {
            let mut current = self.inner.role.lock();
            current.role = role;
            current.epoch += 1;
            current.epoch
        };
        info!("Switching role to {}", role);

        self.inner.controller.bind_scope(None);
        match self.inner.broadcast.stop() {
            Ok(true) => self.inner.observer.on_broadcast_state_changed(false),
            Ok(false) => {}
            Err(e) => warn!("Failed to withdraw stale advertisement: {}", e),
        }

        self.inner.spawn_acquire(role, epoch)
    }

    pub fn toggle_role(&self) -> Result<Role, UwbError> {
        let role = self.role().toggled();
        self.set_role(role)?;
        Ok(role)
    }

    // ------------------------------------------------------------------
    // Discovery
    // ------------------------------------------------------------------

    /// Open a new scan window. The peer ledger starts empty.
    pub fn start_scan(&self) -> Result<(), UwbError> {
        self.inner.ledger.lock().reset();

        let weak: Weak<ServiceInner> = Arc::downgrade(&self.inner);
        self.inner.scanner.start(Arc::new(move |observation| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_scan_result(observation);
            }
        }))?;

        self.inner.observer.on_scan_state_changed(true);
        Ok(())
    }

    pub fn stop_scan(&self) -> bool {
        self.inner.scanner.stop()
    }

    /// Returns whether a scan is running afterwards
    pub fn toggle_scan(&self) -> Result<bool, UwbError> {
        if self.inner.scanner.is_scanning() {
            self.stop_scan();
            Ok(false)
        } else {
            self.start_scan()?;
            Ok(true)
        }
    }

    pub fn is_scanning(&self) -> bool {
        self.inner.scanner.is_scanning()
    }

    /// Feed one advertisement into the ledger. Returns the record when the
    /// device is new in this window.
    pub fn handle_scan_result(&self, observation: ScanObservation) -> Option<PeerRecord> {
        self.inner.handle_scan_result(observation)
    }

    pub fn peers(&self) -> Vec<PeerRecord> {
        self.inner.ledger.lock().peers().cloned().collect()
    }

    // ------------------------------------------------------------------
    // Ranging
    // ------------------------------------------------------------------

    /// Start ranging with a peer entered by hand.
    ///
    /// `address` is decimal and may use the signed rendering shown in peer
    /// lists. `preamble` is only read as a controlee.
    pub fn start_manual(&self, address: &str, preamble: &str) -> Result<RangingSession, UwbError> {
        let peer_address = parse_address(address)?;
        let identity = self.local_identity().ok_or(UwbError::NoSessionScope)?;

        let channel = match identity {
            LocalIdentity::Controller { channel, .. } => channel,
            LocalIdentity::Controlee { .. } => {
                let preamble_index = preamble.trim().parse::<u8>().map_err(|_| {
                    UwbError::InvalidInput(format!("preamble index '{}'", preamble))
                })?;
                ComplexChannel::new(self.inner.config.controlee_default_channel, preamble_index)
            }
        };

        info!("Manual ranging start with {:#06x} on {}", peer_address, channel);
        self.inner.controller.start(
            InitiationPlan {
                peer_address,
                channel,
            },
            self.inner.config.session_id,
        )
    }

    /// Stop ranging and acquire a fresh scope for the next session.
    /// Returns whether a session was running.
    pub fn stop_ranging(&self) -> Result<bool, UwbError> {
        let stopped = self.inner.controller.stop();
        self.refresh_session()?;
        Ok(stopped)
    }

    // ------------------------------------------------------------------
    // Advertising
    // ------------------------------------------------------------------

    pub fn start_advertising(&self) -> Result<(), UwbError> {
        let identity = self.local_identity().ok_or(UwbError::NoSessionScope)?;
        self.inner.advertise_enabled.store(true, Ordering::SeqCst);
        self.inner.publish(&identity)
    }

    pub fn stop_advertising(&self) -> Result<(), UwbError> {
        self.inner.advertise_enabled.store(false, Ordering::SeqCst);
        if self.inner.broadcast.stop()? {
            self.inner.observer.on_broadcast_state_changed(false);
        }
        Ok(())
    }

    /// Returns whether advertising is on afterwards
    pub fn toggle_advertising(&self) -> Result<bool, UwbError> {
        if self.inner.broadcast.is_advertising() {
            self.stop_advertising()?;
            Ok(false)
        } else {
            self.start_advertising()?;
            Ok(true)
        }
    }

    pub fn is_advertising(&self) -> bool {
        self.inner.broadcast.is_advertising()
    }

    pub fn advertised_payload(&self) -> Option<Vec<u8>> {
        self.inner.broadcast.current_payload().map(|p| p.to_vec())
    }

    /// The platform could not start the advertisement
    pub fn on_advertise_failed(&self, code: i32) {
        self.inner.advertise_enabled.store(false, Ordering::SeqCst);
        self.inner.broadcast.mark_failed();
        let e = UwbError::Transport(format!("advertising failed with code {}", code));
        error!("{}", e);
        self.inner.observer.on_broadcast_state_changed(false);
        report(self.inner.observer.as_ref(), &e);
    }

    /// The platform scan failed. The window is closed and the failure reported.
    pub fn on_scan_failed(&self, code: i32) {
        let e = UwbError::Transport(format!("scan failed with code {}", code));
        error!("{}", e);
        self.inner.scanner.stop();
        report(self.inner.observer.as_ref(), &e);
    }

    /// Stop everything. Pending scope acquisitions are discarded.
    pub fn shutdown(&self) {
        self.inner.role.lock().epoch += 1;
        self.inner.scanner.stop();
        self.inner.controller.stop();
        self.inner.advertise_enabled.store(false, Ordering::SeqCst);
        if let Err(e) = self.inner.broadcast.stop() {
            warn!("Failed to stop advertising on shutdown: {}", e);
        }
        info!("Ranging service shut down");
    }
}

/// Parse a peer address typed by the user
pub fn parse_address(text: &str) -> Result<u16, UwbError> {
    let value: i32 = text
        .trim()
        .parse()
        .map_err(|_| UwbError::InvalidInput(format!("peer address '{}'", text)))?;
    if !(i16::MIN as i32..=u16::MAX as i32).contains(&value) {
        return Err(UwbError::InvalidInput(format!(
            "peer address {} out of range",
            value
        )));
    }
    Ok(value as u16)
}

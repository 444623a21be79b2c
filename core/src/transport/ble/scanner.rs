/// BLE scan window
///
/// A scan runs for a fixed window (10 s by default) and then stops on its
/// own. A timer thread watches each window and is cancelled early by a manual
/// stop. Observations from a window that has already ended are dropped.

use crate::discovery::DeviceHandle;
use crate::UwbError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Default scan window in milliseconds
pub const DEFAULT_SCAN_WINDOW_MS: u64 = 10_000;

/// One advertisement seen by the platform scanner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanObservation {
    pub device: DeviceHandle,
    pub display_name: Option<String>,
    /// Service data for the UWB service identifier, if the advertisement had it
    pub service_data: Option<Vec<u8>>,
}

impl ScanObservation {
    pub fn new(
        device: impl Into<String>,
        display_name: Option<String>,
        service_data: Option<Vec<u8>>,
    ) -> Self {
        Self {
            device: DeviceHandle::new(device),
            display_name,
            service_data,
        }
    }
}

pub type ScanCallback = Arc<dyn Fn(ScanObservation) + Send + Sync>;

/// Platform BLE scanner
pub trait ScanTransport: Send + Sync {
    /// Start scanning for advertisements carrying `service_id`
    fn start_scan(&self, service_id: Uuid, callback: ScanCallback) -> Result<(), UwbError>;
    fn stop_scan(&self) -> Result<(), UwbError>;
}

/// Scanner state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScannerState {
    Idle,
    Scanning,
}

/// Why a scan window ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStop {
    Manual,
    Expired,
}

pub type ScanStoppedCallback = Arc<dyn Fn(ScanStop) + Send + Sync>;

struct WindowState {
    state: ScannerState,
    /// Incremented at every start and stop
    window: u64,
    cancel: Option<Sender<()>>,
}

struct ScanWindowInner {
    transport: Arc<dyn ScanTransport>,
    service_id: Uuid,
    duration: Duration,
    on_stopped: Mutex<Option<ScanStoppedCallback>>,
    state: Mutex<WindowState>,
}

impl ScanWindowInner {
    /// Stop `window` if it is still the current one
    fn stop_window(&self, window: Option<u64>, reason: ScanStop) -> bool {
        let cancel = {
            let mut st = self.state.lock();
            if st.state != ScannerState::Scanning {
                return false;
            }
            if let Some(window) = window {
                if st.window != window {
                    return false;
                }
            }
            st.state = ScannerState::Idle;
            st.window += 1;
            st.cancel.take()
        };

        if let Some(cancel) = cancel {
            let _ = cancel.send(());
        }
        if let Err(e) = self.transport.stop_scan() {
            warn!("Failed to stop BLE scan: {}", e);
        }

        info!("Scan window ended ({:?})", reason);
        let on_stopped = self.on_stopped.lock().clone();
        if let Some(on_stopped) = on_stopped {
            on_stopped(reason);
        }
        true
    }
}

/// Time-boxed BLE scan
#[derive(Clone)]
pub struct ScanWindow {
    inner: Arc<ScanWindowInner>,
}

impl ScanWindow {
    pub fn new(transport: Arc<dyn ScanTransport>, service_id: Uuid, duration: Duration) -> Self {
        Self {
            inner: Arc::new(ScanWindowInner {
                transport,
                service_id,
                duration,
                on_stopped: Mutex::new(None),
                state: Mutex::new(WindowState {
                    state: ScannerState::Idle,
                    window: 0,
                    cancel: None,
                }),
            }),
        }
    }

    /// Callback invoked whenever a window ends, manually or by expiry
    pub fn set_on_stopped(&self, callback: ScanStoppedCallback) {
        *self.inner.on_stopped.lock() = Some(callback);
    }

    pub fn state(&self) -> ScannerState {
        self.inner.state.lock().state
    }

    pub fn is_scanning(&self) -> bool {
        self.state() == ScannerState::Scanning
    }

    pub fn duration(&self) -> Duration {
        self.inner.duration
    }

    /// Open a new scan window, delivering observations to `on_observation`.
    ///
    /// A window that is already open is closed first.
    pub fn start(&self, on_observation: ScanCallback) -> Result<(), UwbError> {
        self.stop();

        let (tx, rx) = mpsc::channel::<()>();
        let window = {
            let mut st = self.inner.state.lock();
            st.state = ScannerState::Scanning;
            st.window += 1;
            st.cancel = Some(tx);
            st.window
        };

        let weak = Arc::downgrade(&self.inner);
        let filtered: ScanCallback = Arc::new(move |observation: ScanObservation| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if inner.state.lock().window != window {
                debug!("Dropping scan result from closed window {}", window);
                return;
            }
            on_observation(observation);
        });

        if let Err(e) = self.inner.transport.start_scan(self.inner.service_id, filtered) {
            let mut st = self.inner.state.lock();
            if st.window == window {
                st.state = ScannerState::Idle;
                st.window += 1;
                st.cancel = None;
            }
            return Err(e);
        }

        let weak = Arc::downgrade(&self.inner);
        let duration = self.inner.duration;
        let spawned = thread::Builder::new()
            .name("uwb-scan-window".to_string())
            .spawn(move || match rx.recv_timeout(duration) {
                Err(RecvTimeoutError::Timeout) => {
                    if let Some(inner) = weak.upgrade() {
                        inner.stop_window(Some(window), ScanStop::Expired);
                    }
                }
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    debug!("Scan window {} timer cancelled", window);
                }
            });
        if let Err(e) = spawned {
            self.inner.stop_window(Some(window), ScanStop::Manual);
            return Err(UwbError::Internal(format!("scan timer: {}", e)));
        }

        info!(
            "Scan window {} started for {} ms",
            window,
            duration.as_millis()
        );
        Ok(())
    }

    /// Close the current window. Returns false when not scanning.
    pub fn stop(&self) -> bool {
        self.inner.stop_window(None, ScanStop::Manual)
    }
}

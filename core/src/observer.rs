//! Outbound notifications for the presentation layer
//!
//! Implemented by the platform UI (through UniFFI) or by the CLI. Calls may
//! arrive on any thread; marshalling onto a UI thread is the implementor's job.

use crate::oob::{display_short, ComplexChannel, LocalIdentity, Role};
use crate::ranging::{Measurement, MeasurementDisplay, RangingCapabilities, SessionState};
use crate::{ErrorKind, UwbError};

/// Presentation-layer callbacks
pub trait RangingObserver: Send + Sync {
    /// Raw position report from the active session
    fn on_measurement(&self, measurement: Measurement);
    /// Formatted display fields changed (update or reset to baseline)
    fn on_display_changed(&self, display: MeasurementDisplay);
    /// Session became Active or Idle
    fn on_session_state_changed(&self, state: SessionState);
    /// A new peer showed up in the current scan window
    fn on_peer_discovered(&self, display_text: String);
    /// A session scope was (re)acquired
    fn on_local_identity_changed(&self, summary: LocalSummary);
    fn on_broadcast_state_changed(&self, advertising: bool);
    fn on_scan_state_changed(&self, scanning: bool);
    fn on_error(&self, kind: ErrorKind, message: String);
}

pub(crate) fn report(observer: &dyn RangingObserver, error: &UwbError) {
    observer.on_error(error.kind(), error.to_string());
}

/// Description of the local session scope for display
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalSummary {
    pub role: Role,
    pub local_address: u16,
    pub channel: Option<ComplexChannel>,
    pub capabilities: RangingCapabilities,
    pub title: String,
    pub message: String,
}

impl LocalSummary {
    pub fn new(identity: &LocalIdentity, capabilities: RangingCapabilities) -> Self {
        let address = display_short(identity.address());
        let (title, message) = match identity {
            LocalIdentity::Controller { channel, .. } => (
                "CONTROLLER / SERVER",
                format!(
                    "Your Address is: {}\nuwbComplexChannel channel is: {}\nuwbComplexChannel preambleIndex is: {}",
                    address, channel.channel, channel.preamble_index
                ),
            ),
            LocalIdentity::Controlee { .. } => (
                "CONTROLLEE / CLIENT",
                format!(
                    "Your Address is: {}\nYour Device supports Distance: {}\nYour Device supports Azimuth: {}\nYour Device supports Elevation: {}",
                    address,
                    capabilities.supports_distance,
                    capabilities.supports_azimuth,
                    capabilities.supports_elevation
                ),
            ),
        };

        Self {
            role: identity.role(),
            local_address: identity.address(),
            channel: identity.channel(),
            capabilities,
            title: title.to_string(),
            message,
        }
    }
}

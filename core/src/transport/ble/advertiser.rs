/// BLE advertiser for the out-of-band UWB parameters
///
/// Publishes the 7-byte parameter block as service data under the UWB
/// service identifier. Every refresh tears down the outstanding
/// advertisement and publishes the freshly encoded payload.

use crate::oob::{LocalIdentity, ParameterCodec, OOB_PAYLOAD_LEN};
use crate::UwbError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Advertising interval preset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdvertiseMode {
    LowPower,
    Balanced,
    LowLatency,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxPowerLevel {
    UltraLow,
    Low,
    Medium,
    High,
}

/// Advertisement options handed to the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvertiseSettings {
    pub mode: AdvertiseMode,
    pub tx_power: TxPowerLevel,
    pub connectable: bool,
    pub include_device_name: bool,
}

impl Default for AdvertiseSettings {
    fn default() -> Self {
        Self {
            mode: AdvertiseMode::LowLatency,
            tx_power: TxPowerLevel::High,
            connectable: false,
            include_device_name: true,
        }
    }
}

/// Platform BLE advertiser
#[cfg_attr(test, mockall::automock)]
pub trait BroadcastTransport: Send + Sync {
    fn publish(
        &self,
        service_id: Uuid,
        payload: &[u8],
        settings: &AdvertiseSettings,
    ) -> Result<(), UwbError>;
    fn stop_publishing(&self) -> Result<(), UwbError>;
}

struct BroadcastState {
    advertising: bool,
    payload: Option<[u8; OOB_PAYLOAD_LEN]>,
}

/// Keeps the advertised parameter block in sync with the local identity
pub struct BroadcastController {
    transport: Arc<dyn BroadcastTransport>,
    service_id: Uuid,
    settings: AdvertiseSettings,
    state: Mutex<BroadcastState>,
}

impl BroadcastController {
    pub fn new(
        transport: Arc<dyn BroadcastTransport>,
        service_id: Uuid,
        settings: AdvertiseSettings,
    ) -> Self {
        Self {
            transport,
            service_id,
            settings,
            state: Mutex::new(BroadcastState {
                advertising: false,
                payload: None,
            }),
        }
    }

    /// Stop any outstanding advertisement and publish `identity`.
    ///
    /// Returns the published bytes. Refreshing with the same identity
    /// publishes the same bytes again.
    pub fn refresh(
        &self,
        identity: &LocalIdentity,
        session_id: u16,
    ) -> Result<[u8; OOB_PAYLOAD_LEN], UwbError> {
        let payload = ParameterCodec::encode(identity, session_id);
        let mut state = self.state.lock();

        if state.advertising {
            if let Err(e) = self.transport.stop_publishing() {
                warn!("Failed to stop previous advertisement: {}", e);
            }
            state.advertising = false;
        }

        debug!("Publishing OOB payload {}", hex::encode(payload));
        self.transport.publish(self.service_id, &payload, &self.settings)?;

        state.advertising = true;
        state.payload = Some(payload);
        info!("Advertising as {} ({:#06x})", identity.role(), identity.address());
        Ok(payload)
    }

    /// Withdraw the advertisement. Returns false when nothing was published.
    pub fn stop(&self) -> Result<bool, UwbError> {
        let mut state = self.state.lock();
        if !state.advertising {
            return Ok(false);
        }
        state.advertising = false;
        self.transport.stop_publishing()?;
        info!("Advertising stopped");
        Ok(true)
    }

    /// The platform reported that the advertisement could not be started
    pub fn mark_failed(&self) -> bool {
        let mut state = self.state.lock();
        let was_advertising = state.advertising;
        state.advertising = false;
        was_advertising
    }

    pub fn is_advertising(&self) -> bool {
        self.state.lock().advertising
    }

    /// Last published payload
    pub fn current_payload(&self) -> Option<[u8; OOB_PAYLOAD_LEN]> {
        self.state.lock().payload
    }

    pub fn settings(&self) -> &AdvertiseSettings {
        &self.settings
    }
}

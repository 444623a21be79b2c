//! Per-window record of discovered peers
//!
//! Peers are keyed by their Bluetooth device handle. The first sighting in a
//! scan window creates an immutable `PeerRecord`; later sightings of the same
//! device in that window are ignored, whatever their content.

use crate::oob::{display_short, DecodeError, OobPayload, ParameterCodec};
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

/// Opaque identity of a scanned device (platform address or handle string)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceHandle(String);

impl DeviceHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceHandle {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// A peer seen during the current scan window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    pub device: DeviceHandle,
    pub display_name: String,
    pub decoded_oob: Option<OobPayload>,
}

impl PeerRecord {
    /// Multi-line description used for the discovered-peer list
    pub fn display_text(&self) -> String {
        let mut text = self.display_name.clone();
        match &self.decoded_oob {
            Some(oob) => {
                text.push_str(&format!("\nUWB Address: {}", display_short(oob.address)));
                text.push_str(&format!("\nChannel: {}", oob.channel));
                text.push_str(&format!("\nPreamble Index: {}", oob.preamble_index));
                text.push_str(&format!("\nSession ID: {}", display_short(oob.session_id)));
                text.push_str(&format!("\nIs Controller: {}", oob.is_controller));
            }
            None => text.push_str("\nNo UWB info available"),
        }
        text
    }
}

/// Deduplicated set of peers for one scan window
#[derive(Debug, Default)]
pub struct DiscoveryLedger {
    peers: HashMap<DeviceHandle, PeerRecord>,
    window: u64,
}

impl DiscoveryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget every peer; called when a new scan window opens
    pub fn reset(&mut self) {
        self.peers.clear();
        self.window += 1;
        debug!("Discovery ledger reset for window {}", self.window);
    }

    /// Record a sighting. Returns the new record, or `None` when the device
    /// was already seen in this window.
    ///
    /// A missing or short service-data block leaves `decoded_oob` empty.
    pub fn observe(
        &mut self,
        device: DeviceHandle,
        display_name: Option<String>,
        service_data: Option<&[u8]>,
    ) -> Option<PeerRecord> {
        if self.peers.contains_key(&device) {
            return None;
        }

        let decoded_oob = match service_data.map(ParameterCodec::decode) {
            Some(Ok(payload)) => Some(payload),
            Some(Err(DecodeError::TooShort { len })) => {
                debug!("{}: UWB service data too short ({} bytes)", device, len);
                None
            }
            None => None,
        };

        let display_name = display_name
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| device.to_string());

        let record = PeerRecord {
            device: device.clone(),
            display_name,
            decoded_oob,
        };
        self.peers.insert(device, record.clone());
        Some(record)
    }

    pub fn contains(&self, device: &DeviceHandle) -> bool {
        self.peers.contains_key(device)
    }

    pub fn get(&self, device: &DeviceHandle) -> Option<&PeerRecord> {
        self.peers.get(device)
    }

    pub fn peers(&self) -> impl Iterator<Item = &PeerRecord> {
        self.peers.values()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Number of windows opened so far
    pub fn window(&self) -> u64 {
        self.window
    }
}

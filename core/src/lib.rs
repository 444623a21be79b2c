// UWBLink Core: UWB ranging bootstrapped over BLE
//
// Two nearby devices advertise their UWB session parameters as BLE service
// data, pick complementary roles from each other's advertisements and hand
// off to the platform UWB stack, which streams distance and angle back.

pub mod config;
pub mod discovery;
pub mod observer;
pub mod oob;
pub mod ranging;
pub mod service;
pub mod sim;
pub mod transport;

// Mobile bridge for UniFFI
pub mod mobile_bridge;

use thiserror::Error;

pub use config::{ConfigError, ConfigManager, RangingConfig, DEFAULT_SESSION_ID};
pub use discovery::{DeviceHandle, DiscoveryLedger, InitiationPlan, PeerRecord, RoleMatcher};
pub use observer::{LocalSummary, RangingObserver};
pub use oob::{
    display_short, ComplexChannel, DecodeError, LocalIdentity, OobPayload, ParameterCodec, Role,
    OOB_PAYLOAD_LEN, UWB_SERVICE_UUID,
};
pub use ranging::{
    Measurement, MeasurementDisplay, RangingCapabilities, RangingConfigId, RangingEvent,
    RangingParameters, RangingProvider, RangingSession, SessionController, SessionScope,
    SessionState, UpdateRate,
};
pub use service::RangingService;
pub use transport::ble::{AdvertiseMode, AdvertiseSettings, TxPowerLevel};

// Mobile bridge exports for UniFFI
pub use mobile_bridge::*;

uniffi::include_scaffolding!("api");

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Debug, Error, Clone, PartialEq)]
pub enum UwbError {
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Ranging provider error: {0}")]
    Provider(String),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("No session scope")]
    NoSessionScope,
    #[error("Ranging session busy")]
    Busy,
    #[error("Config error: {0}")]
    Config(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Category of a `UwbError`, for observers that cannot receive the error itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Decode,
    InvalidInput,
    Provider,
    Transport,
    NoSessionScope,
    Busy,
    Config,
    Internal,
}

impl UwbError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            UwbError::Decode(_) => ErrorKind::Decode,
            UwbError::InvalidInput(_) => ErrorKind::InvalidInput,
            UwbError::Provider(_) => ErrorKind::Provider,
            UwbError::Transport(_) => ErrorKind::Transport,
            UwbError::NoSessionScope => ErrorKind::NoSessionScope,
            UwbError::Busy => ErrorKind::Busy,
            UwbError::Config(_) => ErrorKind::Config,
            UwbError::Internal(_) => ErrorKind::Internal,
        }
    }
}

impl From<anyhow::Error> for UwbError {
    fn from(err: anyhow::Error) -> Self {
        UwbError::Internal(err.to_string())
    }
}

// ============================================================================
// NAMESPACE FUNCTIONS
// ============================================================================

pub fn encode_oob_payload(identity: LocalIdentity, session_id: u16) -> Vec<u8> {
    ParameterCodec::encode(&identity, session_id).to_vec()
}

pub fn decode_oob_payload(data: Vec<u8>) -> Result<OobPayload, UwbError> {
    Ok(ParameterCodec::decode(&data)?)
}

pub fn default_ranging_config() -> RangingConfig {
    RangingConfig::default()
}

// ============================================================================
// TESTS
// ============================================================================

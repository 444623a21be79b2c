//! Ranging provider abstraction
//!
//! The provider is the platform UWB stack. It hands out session scopes
//! (local address, role, and for controllers a complex channel) and streams
//! ranging events for a started session into a `RangingEventSink`.

use crate::discovery::InitiationPlan;
use crate::oob::{ComplexChannel, LocalIdentity, Role};
use crate::ranging::measurement::Measurement;
use crate::ranging::session::RangingEventSink;
use crate::UwbError;
use serde::{Deserialize, Serialize};

/// What the local UWB hardware can report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RangingCapabilities {
    pub supports_distance: bool,
    pub supports_azimuth: bool,
    pub supports_elevation: bool,
}

impl RangingCapabilities {
    pub fn full() -> Self {
        Self {
            supports_distance: true,
            supports_azimuth: true,
            supports_elevation: true,
        }
    }
}

/// Session scope acquired from the provider for one role
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionScope {
    /// Provider-side handle, echoed back on `start_ranging`
    pub scope_id: u64,
    pub local_address: u16,
    pub role: Role,
    /// Present for controllers only
    pub channel: Option<ComplexChannel>,
    pub capabilities: RangingCapabilities,
}

impl SessionScope {
    /// Local identity described by this scope
    pub fn identity(&self) -> Result<LocalIdentity, UwbError> {
        match (self.role, self.channel) {
            (Role::Controller, Some(channel)) => Ok(LocalIdentity::Controller {
                address: self.local_address,
                channel,
            }),
            (Role::Controller, None) => Err(UwbError::Provider(
                "controller scope without a complex channel".to_string(),
            )),
            (Role::Controlee, _) => Ok(LocalIdentity::Controlee {
                address: self.local_address,
            }),
        }
    }
}

/// Ranging configuration profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RangingConfigId {
    UnicastDsTwr,
    MulticastDsTwr,
}

/// Requested measurement cadence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateRate {
    Automatic,
    Infrequent,
    Frequent,
}

/// Everything the provider needs to start ranging with one peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangingParameters {
    pub config_id: RangingConfigId,
    pub session_id: u16,
    pub sub_session_id: u32,
    pub session_key: Vec<u8>,
    pub sub_session_key: Option<Vec<u8>>,
    pub channel: ComplexChannel,
    pub peer_address: u16,
    pub update_rate: UpdateRate,
}

/// Session-independent part of the ranging parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTemplate {
    pub config_id: RangingConfigId,
    pub sub_session_id: u32,
    pub session_key: Vec<u8>,
    pub sub_session_key: Option<Vec<u8>>,
    pub update_rate: UpdateRate,
}

impl Default for SessionTemplate {
    fn default() -> Self {
        Self {
            config_id: RangingConfigId::MulticastDsTwr,
            sub_session_id: 0,
            session_key: vec![0u8; 8],
            sub_session_key: None,
            update_rate: UpdateRate::Automatic,
        }
    }
}

impl SessionTemplate {
    pub fn parameters(&self, plan: &InitiationPlan, session_id: u16) -> RangingParameters {
        RangingParameters {
            config_id: self.config_id,
            session_id,
            sub_session_id: self.sub_session_id,
            session_key: self.session_key.clone(),
            sub_session_key: self.sub_session_key.clone(),
            channel: plan.channel,
            peer_address: plan.peer_address,
            update_rate: self.update_rate,
        }
    }
}

/// Event on a provider ranging stream
#[derive(Debug, Clone, PartialEq)]
pub enum RangingEvent {
    /// Position report
    Position(Measurement),
    /// Peer went out of range; the stream stays open
    PeerDisconnected,
    /// Stream failed and is finished
    Error(String),
    /// Stream ended normally
    Complete,
}

impl RangingEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RangingEvent::Error(_) | RangingEvent::Complete)
    }
}

/// Handle on a running provider stream.
///
/// `cancel` must have released the stream when it returns, and must not wait
/// on an event delivery that is still in flight.
pub trait RangingSubscription: Send {
    fn cancel(&mut self);
}

/// Platform UWB stack
pub trait RangingProvider: Send + Sync {
    /// Acquire a fresh session scope for `role`. May block.
    fn acquire_session(&self, role: Role) -> Result<SessionScope, UwbError>;

    /// Start streaming ranging events for `params` into `sink`.
    fn start_ranging(
        &self,
        scope: &SessionScope,
        params: &RangingParameters,
        sink: RangingEventSink,
    ) -> Result<Box<dyn RangingSubscription>, UwbError>;
}

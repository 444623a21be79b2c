//! Role matching between the local device and a discovered peer
//!
//! Two devices can only range when one is the controller and the other the
//! controlee. The controller's channel always wins: a local controller keeps
//! its own, a local controlee adopts the one the peer advertised.

use crate::discovery::ledger::PeerRecord;
use crate::oob::{ComplexChannel, LocalIdentity, OobPayload};

/// Decision to range with a specific peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitiationPlan {
    pub peer_address: u16,
    pub channel: ComplexChannel,
}

/// Pure decision function over local identity and peer OOB data
pub struct RoleMatcher;

impl RoleMatcher {
    /// Decide whether to start ranging with `peer`.
    ///
    /// Returns `None` when the peer carries no UWB info or when both sides
    /// hold the same role.
    pub fn should_initiate(local: &LocalIdentity, peer: &PeerRecord) -> Option<InitiationPlan> {
        peer.decoded_oob
            .as_ref()
            .and_then(|oob| Self::plan_for(local, oob))
    }

    /// Same decision, straight from a decoded payload
    pub fn plan_for(local: &LocalIdentity, oob: &OobPayload) -> Option<InitiationPlan> {
        if oob.is_controller == local.is_controller() {
            return None;
        }

        let channel = match local {
            LocalIdentity::Controller { channel, .. } => *channel,
            LocalIdentity::Controlee { .. } => oob.complex_channel(),
        };

        Some(InitiationPlan {
            peer_address: oob.address,
            channel,
        })
    }
}

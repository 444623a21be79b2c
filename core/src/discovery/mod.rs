//! Peer discovery: per-window ledger and role matching

pub mod ledger;
pub mod matcher;

pub use ledger::{DeviceHandle, DiscoveryLedger, PeerRecord};
pub use matcher::{InitiationPlan, RoleMatcher};

/// Local UWB identity types
///
/// A device is either the controller of a ranging session (it owns the
/// complex channel) or a controlee (it learns the channel from its peer).
/// The two shapes are kept apart as enum variants so a controlee can never
/// be asked for a channel it does not have.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Ranging role of the local device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Owns channel selection
    Controller,
    /// Adopts the controller's channel
    Controlee,
}

impl Role {
    pub fn is_controller(&self) -> bool {
        matches!(self, Role::Controller)
    }

    /// The opposite role
    pub fn toggled(&self) -> Self {
        match self {
            Role::Controller => Role::Controlee,
            Role::Controlee => Role::Controller,
        }
    }

    pub fn from_controller_flag(is_controller: bool) -> Self {
        if is_controller {
            Role::Controller
        } else {
            Role::Controlee
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Controller => write!(f, "Controller"),
            Role::Controlee => write!(f, "Controlee"),
        }
    }
}

/// UWB complex channel: channel number plus preamble index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ComplexChannel {
    pub channel: u8,
    pub preamble_index: u8,
}

impl ComplexChannel {
    pub fn new(channel: u8, preamble_index: u8) -> Self {
        Self {
            channel,
            preamble_index,
        }
    }
}

impl fmt::Display for ComplexChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch{}/p{}", self.channel, self.preamble_index)
    }
}

/// Identity of the local device for the current session scope.
///
/// Replaced wholesale whenever the role changes or the scope is re-acquired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LocalIdentity {
    Controller { address: u16, channel: ComplexChannel },
    Controlee { address: u16 },
}

impl LocalIdentity {
    pub fn address(&self) -> u16 {
        match self {
            LocalIdentity::Controller { address, .. } | LocalIdentity::Controlee { address } => {
                *address
            }
        }
    }

    pub fn role(&self) -> Role {
        match self {
            LocalIdentity::Controller { .. } => Role::Controller,
            LocalIdentity::Controlee { .. } => Role::Controlee,
        }
    }

    /// Channel owned by this device; only controllers have one
    pub fn channel(&self) -> Option<ComplexChannel> {
        match self {
            LocalIdentity::Controller { channel, .. } => Some(*channel),
            LocalIdentity::Controlee { .. } => None,
        }
    }

    pub fn is_controller(&self) -> bool {
        self.role().is_controller()
    }
}

/// Addresses and session ids are rendered as signed shorts, which is also
/// the form users type back in when starting a session by hand.
pub fn display_short(value: u16) -> i16 {
    value as i16
}

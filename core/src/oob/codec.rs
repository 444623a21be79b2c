/// OOB parameter codec for the UWB service-data block
///
/// Wire layout (7 bytes, multi-byte fields big-endian):
///
/// | Offset | Size | Field           |
/// |--------|------|-----------------|
/// | 0      | 2    | local address   |
/// | 2      | 1    | channel number  |
/// | 3      | 1    | preamble index  |
/// | 4      | 2    | session id      |
/// | 6      | 1    | is_controller   |
///
/// Controlees write zero channel and preamble bytes. Decoding only checks the
/// length; every 7+ byte buffer yields a payload.

use crate::oob::identity::{ComplexChannel, LocalIdentity};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Size of the encoded payload in bytes
pub const OOB_PAYLOAD_LEN: usize = 7;

/// 128-bit service identifier carrying the payload in advertisements
pub const UWB_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000181c_0000_1000_8000_00805f9b34fb);

/// Errors for payload decoding
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    #[error("OOB payload too short: {len} bytes, need 7")]
    TooShort { len: usize },
}

/// Decoded out-of-band record advertised by a peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OobPayload {
    pub address: u16,
    pub channel: u8,
    pub preamble_index: u8,
    pub session_id: u16,
    pub is_controller: bool,
}

impl OobPayload {
    /// Derive the payload for a local identity
    pub fn from_identity(identity: &LocalIdentity, session_id: u16) -> Self {
        let channel = identity.channel().unwrap_or(ComplexChannel::new(0, 0));
        Self {
            address: identity.address(),
            channel: channel.channel,
            preamble_index: channel.preamble_index,
            session_id,
            is_controller: identity.is_controller(),
        }
    }

    /// Serialize to the fixed wire layout
    pub fn to_bytes(&self) -> [u8; OOB_PAYLOAD_LEN] {
        let mut bytes = [0u8; OOB_PAYLOAD_LEN];
        bytes[0..2].copy_from_slice(&self.address.to_be_bytes());
        bytes[2] = self.channel;
        bytes[3] = self.preamble_index;
        bytes[4..6].copy_from_slice(&self.session_id.to_be_bytes());
        bytes[6] = u8::from(self.is_controller);
        bytes
    }

    /// Parse from a service-data block. Trailing bytes are ignored.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() < OOB_PAYLOAD_LEN {
            return Err(DecodeError::TooShort { len: bytes.len() });
        }

        Ok(Self {
            address: u16::from_be_bytes([bytes[0], bytes[1]]),
            channel: bytes[2],
            preamble_index: bytes[3],
            session_id: u16::from_be_bytes([bytes[4], bytes[5]]),
            is_controller: bytes[6] == 1,
        })
    }

    /// Advertised complex channel. Only meaningful for controllers.
    pub fn complex_channel(&self) -> ComplexChannel {
        ComplexChannel::new(self.channel, self.preamble_index)
    }
}

/// Stateless encoder/decoder for the advertisement payload
pub struct ParameterCodec;

impl ParameterCodec {
    pub fn encode(identity: &LocalIdentity, session_id: u16) -> [u8; OOB_PAYLOAD_LEN] {
        OobPayload::from_identity(identity, session_id).to_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<OobPayload, DecodeError> {
        OobPayload::from_bytes(bytes)
    }
}

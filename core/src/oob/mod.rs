/// Out-of-band UWB parameters exchanged over BLE advertisements
///
/// - **identity**: local role, complex channel and the per-scope identity
/// - **codec**: fixed 7-byte service-data encoding of those parameters

pub mod codec;
pub mod identity;

pub use codec::{DecodeError, OobPayload, ParameterCodec, OOB_PAYLOAD_LEN, UWB_SERVICE_UUID};
pub use identity::{display_short, ComplexChannel, LocalIdentity, Role};

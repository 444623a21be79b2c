// uwblink-mobile: native mobile bindings for iOS and Android
// This crate exports the UWBLink core API via UniFFI

pub use uwblink_core::*;

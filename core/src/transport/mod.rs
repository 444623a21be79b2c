// Transport module: BLE out-of-band channel

pub mod ble;

pub use ble::{
    AdvertiseMode, AdvertiseSettings, BroadcastController, BroadcastTransport, ScanCallback,
    ScanObservation, ScanStop, ScanTransport, ScanWindow, ScannerState, TxPowerLevel,
};

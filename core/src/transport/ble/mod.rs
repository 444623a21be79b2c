/// BLE (Bluetooth Low Energy) transport for UWB out-of-band discovery
///
/// - **advertiser**: publishes the local parameter block as service data
/// - **scanner**: time-boxed scan windows delivering peer advertisements
///
/// The radio itself lives in the platform (Kotlin/Swift, or btleplug on the
/// desktop) behind the `BroadcastTransport` and `ScanTransport` traits.

pub mod advertiser;
pub mod scanner;

pub use advertiser::{
    AdvertiseMode, AdvertiseSettings, BroadcastController, BroadcastTransport, TxPowerLevel,
};

pub use scanner::{
    ScanCallback, ScanObservation, ScanStop, ScanStoppedCallback, ScanTransport, ScanWindow,
    ScannerState, DEFAULT_SCAN_WINDOW_MS,
};

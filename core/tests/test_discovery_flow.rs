//! Discovery-to-ranging flow between simulated devices
//!
//! Two services share a loopback radio: each advertises its parameter block,
//! scans for the other, and the role matcher pairs them into complementary
//! sessions.
//!
//! Run with: cargo test --test test_discovery_flow

use std::sync::Arc;
use std::time::Duration;
use uwblink_core::discovery::{DeviceHandle, DiscoveryLedger, PeerRecord, RoleMatcher};
use uwblink_core::sim::{LoopbackRadio, ObservedEvent, RecordingObserver, SimulatedRangingProvider};
use uwblink_core::transport::ble::ScanObservation;
use uwblink_core::{
    ComplexChannel, LocalIdentity, Measurement, OobPayload, ParameterCodec, RangingConfig,
    RangingEvent, RangingService, Role, SessionState,
};

struct Device {
    service: RangingService,
    provider: Arc<SimulatedRangingProvider>,
    observer: Arc<RecordingObserver>,
}

fn device(
    radio: &LoopbackRadio,
    name: &str,
    role: Role,
    base: u16,
    config: RangingConfig,
) -> Device {
    let endpoint = Arc::new(radio.endpoint(name));
    let provider = Arc::new(SimulatedRangingProvider::new(base));
    let observer = Arc::new(RecordingObserver::new());
    let service = RangingService::new(
        config,
        role,
        provider.clone(),
        endpoint.clone(),
        endpoint,
        observer.clone(),
    )
    .expect("service");
    service.refresh_session_blocking().expect("scope");
    Device {
        service,
        provider,
        observer,
    }
}

#[test]
fn test_two_devices_pair_into_complementary_sessions() {
    let radio = LoopbackRadio::new();
    let a = device(&radio, "device-a", Role::Controller, 0x1000, RangingConfig::default());
    let b = device(&radio, "device-b", Role::Controlee, 0x2000, RangingConfig::default());

    let a_channel = a.service.local_summary().and_then(|s| s.channel).unwrap();

    a.service.start_advertising().unwrap();
    b.service.start_advertising().unwrap();
    assert_eq!(radio.advertisements().len(), 2);

    a.service.start_scan().unwrap();
    b.service.start_scan().unwrap();

    // Controller ranges with the controlee on its own channel
    let a_session = a.service.active_session().expect("controller session");
    assert_eq!(a_session.peer_address, 0x2000);
    assert_eq!(a_session.channel, a_channel);
    assert_eq!(a_session.state, SessionState::Active);

    // Controlee adopts the controller's advertised channel
    let b_session = b.service.active_session().expect("controlee session");
    assert_eq!(b_session.peer_address, 0x1000);
    assert_eq!(b_session.channel, a_channel);

    let a_params = a.provider.last_parameters().unwrap();
    let b_params = b.provider.last_parameters().unwrap();
    assert_eq!(a_params.session_id, b_params.session_id);
    assert_eq!(a_params.channel, b_params.channel);

    assert_eq!(a.observer.discovered().len(), 1);
    assert!(a.observer.discovered()[0].contains("Is Controller: false"));
    assert!(b.observer.discovered()[0].contains("Is Controller: true"));

    a.service.shutdown();
    b.service.shutdown();
    assert!(radio.advertisements().is_empty());
}

#[test]
fn test_measurements_flow_to_both_observers() {
    let radio = LoopbackRadio::new();
    let a = device(&radio, "device-a", Role::Controller, 0x1000, RangingConfig::default());
    let b = device(&radio, "device-b", Role::Controlee, 0x2000, RangingConfig::default());

    a.service.start_advertising().unwrap();
    b.service.start_advertising().unwrap();
    a.service.start_scan().unwrap();
    b.service.start_scan().unwrap();

    let m = Measurement {
        distance_m: Some(1.5),
        azimuth_deg: Some(-12.25),
        elevation_deg: None,
    };
    assert!(a.provider.emit(RangingEvent::Position(m)));
    assert!(b.provider.emit(RangingEvent::Position(m)));

    for d in [&a, &b] {
        assert_eq!(d.observer.measurements(), vec![m]);
        let display = d.service.display();
        assert_eq!(display.distance, "1.50");
        assert_eq!(display.azimuth, "-12.25");
        assert_eq!(display.elevation, "0.00");
    }
}

#[test]
fn test_same_roles_never_pair() {
    let radio = LoopbackRadio::new();
    let a = device(&radio, "device-a", Role::Controller, 0x1000, RangingConfig::default());
    let b = device(&radio, "device-b", Role::Controller, 0x2000, RangingConfig::default());

    a.service.start_advertising().unwrap();
    b.service.start_advertising().unwrap();
    a.service.start_scan().unwrap();
    b.service.start_scan().unwrap();

    assert_eq!(a.service.peers().len(), 1);
    assert_eq!(b.service.peers().len(), 1);
    assert_eq!(a.service.session_state(), SessionState::Idle);
    assert_eq!(b.service.session_state(), SessionState::Idle);
    assert_eq!(a.provider.started_sessions(), 0);
}

#[test]
fn test_auto_initiate_disabled_only_lists_peers() {
    let radio = LoopbackRadio::new();
    let config = RangingConfig {
        auto_initiate: false,
        ..RangingConfig::default()
    };
    let a = device(&radio, "device-a", Role::Controller, 0x1000, config);
    let b = device(&radio, "device-b", Role::Controlee, 0x2000, RangingConfig::default());

    b.service.start_advertising().unwrap();
    a.service.start_scan().unwrap();

    assert_eq!(a.service.peers().len(), 1);
    assert_eq!(a.service.session_state(), SessionState::Idle);
}

#[test]
fn test_peer_seen_once_per_window() {
    let radio = LoopbackRadio::new();
    let a = device(&radio, "device-a", Role::Controller, 0x1000, RangingConfig::default());
    let b = device(&radio, "device-b", Role::Controlee, 0x2000, RangingConfig::default());

    a.service.start_scan().unwrap();
    b.service.start_advertising().unwrap();
    // Republishing the same device inside the window is not a new sighting
    b.service.start_advertising().unwrap();
    assert_eq!(a.observer.discovered().len(), 1);

    // A fresh window forgets it
    a.observer.clear();
    a.service.stop_ranging().unwrap();
    a.observer
        .wait_for(Duration::from_secs(5), |e| match e {
            ObservedEvent::LocalIdentity(_) => Some(()),
            _ => None,
        })
        .unwrap();
    a.service.start_scan().unwrap();
    assert_eq!(a.observer.discovered().len(), 1);
}

#[test]
fn test_controller_initiates_on_own_channel() {
    let local = LocalIdentity::Controller {
        address: 0x0001,
        channel: ComplexChannel::new(9, 12),
    };
    let mut ledger = DiscoveryLedger::new();
    let advert = ParameterCodec::encode(&LocalIdentity::Controlee { address: 0x0042 }, 0);
    let peer = ledger
        .observe(DeviceHandle::new("peer"), None, Some(&advert))
        .unwrap();

    let plan = RoleMatcher::should_initiate(&local, &peer).unwrap();
    assert_eq!(plan.channel, ComplexChannel::new(9, 12));
    assert_eq!(plan.peer_address, 0x0042);
}

#[test]
fn test_controlee_adopts_peer_channel() {
    let local = LocalIdentity::Controlee { address: 0x0001 };
    let peer = PeerRecord {
        device: DeviceHandle::new("peer"),
        display_name: "peer".to_string(),
        decoded_oob: Some(OobPayload {
            address: 0x0077,
            channel: 9,
            preamble_index: 20,
            session_id: 12345,
            is_controller: true,
        }),
    };

    let plan = RoleMatcher::should_initiate(&local, &peer).unwrap();
    assert_eq!(plan.channel, ComplexChannel::new(9, 20));
    assert_eq!(plan.peer_address, 0x0077);
}

#[test]
fn test_short_advertisement_listed_without_uwb_info() {
    let radio = LoopbackRadio::new();
    let a = device(&radio, "device-a", Role::Controller, 0x1000, RangingConfig::default());

    let record = a
        .service
        .handle_scan_result(ScanObservation::new(
            "legacy",
            Some("Old Phone".to_string()),
            Some(vec![1, 2, 3, 4, 5]),
        ))
        .unwrap();

    assert!(record.decoded_oob.is_none());
    assert_eq!(record.display_text(), "Old Phone\nNo UWB info available");
    assert_eq!(a.service.session_state(), SessionState::Idle);
}

//! Session controller lifecycle against the simulated ranging provider
//!
//! Run with: cargo test --test test_session_lifecycle

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use uwblink_core::discovery::{DeviceHandle, InitiationPlan, PeerRecord};
use uwblink_core::ranging::SessionTemplate;
use uwblink_core::sim::{ObservedEvent, RecordingObserver, SimulatedRangingProvider};
use uwblink_core::{
    ComplexChannel, ErrorKind, LocalSummary, Measurement, MeasurementDisplay, OobPayload,
    RangingEvent, RangingObserver, RangingProvider, Role, SessionController, SessionState,
    UwbError,
};

type Harness<O> = (SessionController, Arc<SimulatedRangingProvider>, Arc<O>);

fn controller_with_scope(role: Role) -> Harness<RecordingObserver> {
    let provider = Arc::new(SimulatedRangingProvider::new(0x0100));
    let observer = Arc::new(RecordingObserver::new());
    let controller =
        SessionController::new(provider.clone(), observer.clone(), SessionTemplate::default());
    let scope = provider.acquire_session(role).unwrap();
    controller.bind_scope(Some(scope));
    (controller, provider, observer)
}

type Hook = Box<dyn Fn(&SessionController, &ObservedEvent) + Send + Sync>;

/// Records every notification and hands session state changes and
/// measurements to a hook that may call back into the controller
struct ReentrantObserver {
    controller: Mutex<Option<SessionController>>,
    hook: Hook,
    inner: RecordingObserver,
}

impl ReentrantObserver {
    fn run_hook(&self, event: ObservedEvent) {
        let controller = self.controller.lock().clone();
        if let Some(controller) = controller {
            (self.hook)(&controller, &event);
        }
    }

    fn detach(&self) {
        *self.controller.lock() = None;
    }
}

impl RangingObserver for ReentrantObserver {
    fn on_measurement(&self, measurement: Measurement) {
        self.inner.on_measurement(measurement);
        self.run_hook(ObservedEvent::Measurement(measurement));
    }
    fn on_display_changed(&self, display: MeasurementDisplay) {
        self.inner.on_display_changed(display);
    }
    fn on_session_state_changed(&self, state: SessionState) {
        self.inner.on_session_state_changed(state);
        self.run_hook(ObservedEvent::SessionState(state));
    }
    fn on_peer_discovered(&self, text: String) {
        self.inner.on_peer_discovered(text);
    }
    fn on_local_identity_changed(&self, summary: LocalSummary) {
        self.inner.on_local_identity_changed(summary);
    }
    fn on_broadcast_state_changed(&self, advertising: bool) {
        self.inner.on_broadcast_state_changed(advertising);
    }
    fn on_scan_state_changed(&self, scanning: bool) {
        self.inner.on_scan_state_changed(scanning);
    }
    fn on_error(&self, kind: ErrorKind, message: String) {
        self.inner.on_error(kind, message);
    }
}

fn reentrant_controller(
    hook: impl Fn(&SessionController, &ObservedEvent) + Send + Sync + 'static,
) -> Harness<ReentrantObserver> {
    let provider = Arc::new(SimulatedRangingProvider::new(0x0100));
    let observer = Arc::new(ReentrantObserver {
        controller: Mutex::new(None),
        hook: Box::new(hook),
        inner: RecordingObserver::new(),
    });
    let controller =
        SessionController::new(provider.clone(), observer.clone(), SessionTemplate::default());
    controller.bind_scope(Some(provider.acquire_session(Role::Controller).unwrap()));
    *observer.controller.lock() = Some(controller.clone());
    (controller, provider, observer)
}

/// Hook that runs `action` on the first `state` notification after `armed` is set
fn once_on(
    state: SessionState,
    armed: &Arc<AtomicBool>,
    action: impl Fn(&SessionController) + Send + Sync + 'static,
) -> impl Fn(&SessionController, &ObservedEvent) + Send + Sync + 'static {
    let armed = Arc::clone(armed);
    move |controller: &SessionController, event: &ObservedEvent| {
        if *event == ObservedEvent::SessionState(state) && armed.swap(false, Ordering::SeqCst) {
            action(controller);
        }
    }
}

fn plan(peer_address: u16) -> InitiationPlan {
    InitiationPlan {
        peer_address,
        channel: ComplexChannel::new(9, 10),
    }
}

fn controlee_peer(name: &str, address: u16) -> PeerRecord {
    PeerRecord {
        device: DeviceHandle::new(name),
        display_name: name.to_string(),
        decoded_oob: Some(OobPayload {
            address,
            channel: 9,
            preamble_index: 10,
            session_id: 0,
            is_controller: false,
        }),
    }
}

#[test]
fn test_restart_passes_through_idle() {
    let (controller, provider, observer) = controller_with_scope(Role::Controller);

    controller.start(plan(1), 12345).unwrap();
    controller.start(plan(2), 12345).unwrap();
    controller.start(plan(3), 12345).unwrap();

    let states = observer.session_states();
    assert_eq!(
        states,
        vec![
            SessionState::Active,
            SessionState::Idle,
            SessionState::Active,
            SessionState::Idle,
            SessionState::Active,
        ]
    );
    assert_eq!(provider.started_sessions(), 3);
    assert_eq!(provider.active_subscriptions(), 1);
    assert_eq!(controller.active_session().unwrap().peer_address, 3);
}

#[test]
fn test_superseded_stream_is_ignored() {
    let (controller, provider, observer) = controller_with_scope(Role::Controller);

    controller.start(plan(1), 1).unwrap();
    let old_sink = provider.sinks()[0].clone();
    controller.start(plan(2), 1).unwrap();
    observer.clear();

    assert!(!old_sink.deliver(RangingEvent::Position(Measurement::distance(9.0))));
    assert!(!old_sink.deliver(RangingEvent::Error("late".to_string())));
    assert!(observer.events().is_empty());
    assert!(controller.is_active());
}

#[test]
fn test_full_lifecycle_with_measurements() {
    let (controller, provider, observer) = controller_with_scope(Role::Controlee);

    let session = controller.start(plan(0x0BEE), 4242).unwrap();
    assert_eq!(session.session_id, 4242);
    let params = provider.last_parameters().unwrap();
    assert_eq!(params.peer_address, 0x0BEE);
    assert_eq!(params.session_id, 4242);

    for step in 1..=3 {
        assert!(provider.emit(RangingEvent::Position(Measurement::distance(step as f64))));
    }
    assert_eq!(observer.measurements().len(), 3);
    assert_eq!(controller.display().distance, "3.00");

    assert!(provider.emit(RangingEvent::Complete));
    assert_eq!(controller.state(), SessionState::Idle);
    assert!(controller.display().is_baseline());
    assert!(!provider.emit(RangingEvent::Position(Measurement::distance(1.0))));

    assert_eq!(
        observer.session_states(),
        vec![SessionState::Active, SessionState::Idle]
    );
}

#[test]
fn test_stream_error_reported_once() {
    let (controller, provider, observer) = controller_with_scope(Role::Controller);
    controller.start(plan(5), 1).unwrap();

    assert!(provider.emit(RangingEvent::Error("radio reset".to_string())));
    assert_eq!(controller.state(), SessionState::Idle);
    assert_eq!(observer.errors().len(), 1);
    assert!(observer.errors()[0].1.contains("radio reset"));

    // Nothing left to stop
    assert!(!controller.stop());
    assert_eq!(observer.errors().len(), 1);
}

#[test]
fn test_concurrent_initiations_yield_one_session() {
    let (controller, provider, observer) = controller_with_scope(Role::Controller);

    let handles: Vec<_> = (0..16u16)
        .map(|i| {
            let controller = controller.clone();
            thread::spawn(move || {
                let peer = controlee_peer(&format!("peer-{}", i), 0x2000 + i);
                controller.try_initiate(&peer, 12345).unwrap()
            })
        })
        .collect();

    let started: Vec<_> = handles
        .into_iter()
        .filter_map(|h| h.join().unwrap())
        .collect();

    assert_eq!(started.len(), 1);
    assert_eq!(provider.started_sessions(), 1);
    assert_eq!(observer.session_states(), vec![SessionState::Active]);
    assert_eq!(controller.active_session(), Some(started[0].clone()));
}

#[test]
fn test_concurrent_restarts_never_overlap() {
    let (controller, provider, observer) = controller_with_scope(Role::Controller);

    let handles: Vec<_> = (0..8u16)
        .map(|i| {
            let controller = controller.clone();
            thread::spawn(move || {
                for j in 0..10u16 {
                    controller.start(plan(i * 100 + j), 1).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(provider.active_subscriptions(), 1);

    // Active and Idle strictly alternate
    let states = observer.session_states();
    assert_eq!(states.len(), 80 * 2 - 1);
    for pair in states.windows(2) {
        assert_ne!(pair[0], pair[1]);
    }
    assert_eq!(states.first(), Some(&SessionState::Active));
    assert_eq!(states.last(), Some(&SessionState::Active));
}

#[test]
fn test_start_without_scope_fails() {
    let provider = Arc::new(SimulatedRangingProvider::new(1));
    let observer = Arc::new(RecordingObserver::new());
    let controller =
        SessionController::new(provider.clone(), observer.clone(), SessionTemplate::default());

    assert!(controller.start(plan(1), 1).is_err());
    assert!(controller
        .try_initiate(&controlee_peer("p", 2), 1)
        .unwrap()
        .is_none());
    assert_eq!(provider.started_sessions(), 0);
    assert!(!observer
        .events()
        .iter()
        .any(|e| matches!(e, ObservedEvent::SessionState(_))));
}

#[test]
fn test_no_measurement_after_stop_returns() {
    let (controller, provider, observer) = controller_with_scope(Role::Controller);
    controller.start(plan(7), 1).unwrap();
    let sink = provider.sinks()[0].clone();

    let feeder = thread::spawn(move || {
        let mut accepted = 0usize;
        while sink.deliver(RangingEvent::Position(Measurement::distance(2.0))) {
            accepted += 1;
        }
        accepted
    });

    while observer.measurements().len() < 20 {
        thread::sleep(Duration::from_millis(1));
    }
    assert!(controller.stop());
    let seen_at_stop = observer.measurements().len();

    let accepted = feeder.join().unwrap();
    assert_eq!(observer.measurements().len(), seen_at_stop);
    assert_eq!(accepted, seen_at_stop);

    let events = observer.events();
    let idle = events
        .iter()
        .position(|e| *e == ObservedEvent::SessionState(SessionState::Idle))
        .unwrap();
    assert!(!events[idle..]
        .iter()
        .any(|e| matches!(e, ObservedEvent::Measurement(_))));
}

#[test]
fn test_restart_refuses_start_from_idle_callback() {
    let armed = Arc::new(AtomicBool::new(false));
    let nested = Arc::new(Mutex::new(Vec::new()));
    let results = Arc::clone(&nested);
    let (controller, provider, observer) =
        reentrant_controller(once_on(SessionState::Idle, &armed, move |controller| {
            results
                .lock()
                .push(controller.start(plan(9), 1).map(|s| s.peer_address));
        }));

    controller.start(plan(1), 1).unwrap();
    armed.store(true, Ordering::SeqCst);
    controller.start(plan(2), 1).unwrap();
    observer.detach();

    assert_eq!(*nested.lock(), vec![Err(UwbError::Busy)]);
    assert_eq!(
        observer.inner.session_states(),
        vec![SessionState::Active, SessionState::Idle, SessionState::Active]
    );
    assert_eq!(provider.started_sessions(), 2);
    assert_eq!(provider.active_subscriptions(), 1);
    assert_eq!(controller.active_session().unwrap().peer_address, 2);
}

#[test]
fn test_scope_change_refuses_start_from_idle_callback() {
    let armed = Arc::new(AtomicBool::new(false));
    let nested = Arc::new(Mutex::new(Vec::new()));
    let results = Arc::clone(&nested);
    let (controller, provider, observer) =
        reentrant_controller(once_on(SessionState::Idle, &armed, move |controller| {
            results
                .lock()
                .push(controller.start(plan(9), 1).map(|s| s.peer_address));
        }));

    controller.start(plan(1), 1).unwrap();
    armed.store(true, Ordering::SeqCst);
    let fresh = provider.acquire_session(Role::Controlee).unwrap();
    controller.bind_scope(Some(fresh));
    observer.detach();

    assert_eq!(*nested.lock(), vec![Err(UwbError::Busy)]);
    assert_eq!(controller.state(), SessionState::Idle);
    assert_eq!(provider.active_subscriptions(), 0);
    assert!(!controller.scope().unwrap().identity().unwrap().is_controller());
}

#[test]
fn test_observer_may_start_after_stop() {
    let armed = Arc::new(AtomicBool::new(false));
    let (controller, provider, observer) =
        reentrant_controller(once_on(SessionState::Idle, &armed, |controller| {
            controller.start(plan(9), 1).unwrap();
        }));

    controller.start(plan(1), 1).unwrap();
    armed.store(true, Ordering::SeqCst);
    assert!(controller.stop());
    observer.detach();

    assert_eq!(
        observer.inner.session_states(),
        vec![SessionState::Active, SessionState::Idle, SessionState::Active]
    );
    assert_eq!(provider.active_subscriptions(), 1);
    assert_eq!(controller.active_session().unwrap().peer_address, 9);
}

#[test]
fn test_observer_may_restart_when_session_opens() {
    let armed = Arc::new(AtomicBool::new(true));
    let (controller, provider, observer) =
        reentrant_controller(once_on(SessionState::Active, &armed, |controller| {
            controller.start(plan(9), 1).unwrap();
        }));

    let outer = controller.start(plan(1), 1).unwrap();
    observer.detach();

    assert_eq!(outer.state, SessionState::Idle);
    assert_eq!(
        observer.inner.session_states(),
        vec![SessionState::Active, SessionState::Idle, SessionState::Active]
    );
    assert_eq!(provider.started_sessions(), 2);
    assert_eq!(provider.active_subscriptions(), 1);
    assert_eq!(controller.active_session().unwrap().peer_address, 9);
    assert!(provider.emit(RangingEvent::Position(Measurement::distance(1.5))));
}

#[test]
fn test_observer_may_stop_when_session_opens() {
    let armed = Arc::new(AtomicBool::new(true));
    let (controller, provider, observer) =
        reentrant_controller(once_on(SessionState::Active, &armed, |controller| {
            assert!(controller.stop());
        }));

    let session = controller.start(plan(1), 1).unwrap();
    observer.detach();

    assert_eq!(session.state, SessionState::Idle);
    assert_eq!(controller.state(), SessionState::Idle);
    assert_eq!(provider.active_subscriptions(), 0);
    assert_eq!(
        observer.inner.session_states(),
        vec![SessionState::Active, SessionState::Idle]
    );
}

#[test]
fn test_observer_may_stop_from_measurement() {
    let (controller, provider, observer) = reentrant_controller(|controller, event| {
        if matches!(event, ObservedEvent::Measurement(_)) {
            controller.stop();
        }
    });

    controller.start(plan(1), 1).unwrap();
    assert!(provider.emit(RangingEvent::Position(Measurement::distance(1.0))));
    assert!(!provider.emit(RangingEvent::Position(Measurement::distance(2.0))));
    observer.detach();

    assert_eq!(controller.state(), SessionState::Idle);
    assert_eq!(provider.active_subscriptions(), 0);
    assert_eq!(observer.inner.measurements().len(), 1);
}

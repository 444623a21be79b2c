//! Ranging session controller
//!
//! Owns the single ranging session of this device. All state lives behind one
//! reentrant mutex: the "is a session active" check, the start that follows
//! it, stop, and every event delivered by the provider are serialized there.
//! Reentrancy lets an observer call `stop()` from inside a callback.
//!
//! Each started session gets a new generation number. Provider events carry
//! the generation of the session they belong to and are dropped once that
//! session is no longer the active one, so nothing reaches the observer after
//! `stop()` returns.

use crate::discovery::{InitiationPlan, PeerRecord, RoleMatcher};
use crate::observer::{report, RangingObserver};
use crate::oob::{ComplexChannel, LocalIdentity};
use crate::ranging::measurement::{Measurement, MeasurementDisplay};
use crate::ranging::provider::{
    RangingEvent, RangingProvider, RangingSubscription, SessionScope, SessionTemplate,
};
use crate::UwbError;
use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, warn};

/// Lifecycle state of the ranging session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Idle,
    Active,
    /// Provider subscription is being released
    Stopping,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "Idle"),
            SessionState::Active => write!(f, "Active"),
            SessionState::Stopping => write!(f, "Stopping"),
        }
    }
}

/// The session currently owned by the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangingSession {
    pub peer_address: u16,
    pub channel: ComplexChannel,
    pub session_id: u16,
    pub state: SessionState,
}

/// Entry point for provider events of one session
#[derive(Debug, Clone)]
pub struct RangingEventSink {
    core: Weak<ControllerCore>,
    generation: u64,
}

impl RangingEventSink {
    /// Deliver an event. Returns false when the session it belongs to is over.
    pub fn deliver(&self, event: RangingEvent) -> bool {
        match self.core.upgrade() {
            Some(core) => core.dispatch(self.generation, event),
            None => false,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

struct ControllerState {
    scope: Option<SessionScope>,
    session: Option<RangingSession>,
    subscription: Option<Box<dyn RangingSubscription>>,
    generation: u64,
    display: MeasurementDisplay,
    /// Set while the previous session is released for a restart or a
    /// scope change
    releasing: bool,
}

impl ControllerState {
    fn is_active(&self) -> bool {
        matches!(self.session, Some(ref s) if s.state == SessionState::Active)
    }
}

type StateGuard<'a> = ReentrantMutexGuard<'a, RefCell<ControllerState>>;

struct ControllerCore {
    provider: Arc<dyn RangingProvider>,
    observer: Arc<dyn RangingObserver>,
    template: SessionTemplate,
    state: ReentrantMutex<RefCell<ControllerState>>,
}

impl ControllerCore {
    fn start_locked(
        self: &Arc<Self>,
        guard: &StateGuard<'_>,
        plan: InitiationPlan,
        session_id: u16,
    ) -> Result<RangingSession, UwbError> {
        let scope = guard
            .borrow()
            .scope
            .clone()
            .ok_or(UwbError::NoSessionScope)?;

        // Sessions never overlap: the previous subscription is fully released
        // before the next one is requested. Observer callbacks fired by that
        // stop may not start a session of their own.
        if guard.borrow().releasing {
            warn!("Refusing session start while the previous one is released");
            return Err(UwbError::Busy);
        }
        guard.borrow_mut().releasing = true;
        self.stop_locked(guard);
        guard.borrow_mut().releasing = false;

        let params = self.template.parameters(&plan, session_id);
        let session = RangingSession {
            peer_address: plan.peer_address,
            channel: plan.channel,
            session_id,
            state: SessionState::Active,
        };
        let generation = {
            let mut st = guard.borrow_mut();
            st.generation += 1;
            st.session = Some(session.clone());
            st.display.reset();
            st.generation
        };

        info!(
            "Ranging session {} starting with peer {:#06x} on {}",
            generation, plan.peer_address, plan.channel
        );
        self.observer.on_session_state_changed(SessionState::Active);

        let sink = RangingEventSink {
            core: Arc::downgrade(self),
            generation,
        };

        match self.provider.start_ranging(&scope, &params, sink) {
            Ok(mut subscription) => {
                let mut st = guard.borrow_mut();
                if st.generation == generation && st.is_active() {
                    if let Some(mut stale) = st.subscription.replace(subscription) {
                        warn!("Releasing orphaned ranging subscription");
                        stale.cancel();
                    }
                    Ok(session)
                } else {
                    drop(st);
                    debug!("Ranging session {} ended while opening", generation);
                    subscription.cancel();
                    Ok(RangingSession {
                        state: SessionState::Idle,
                        ..session
                    })
                }
            }
            Err(e) => {
                error!("Provider refused ranging session {}: {}", generation, e);
                self.finish_locked(guard, Some(e.clone()));
                Err(e)
            }
        }
    }

    fn stop_locked(&self, guard: &StateGuard<'_>) -> bool {
        let subscription = {
            let mut st = guard.borrow_mut();
            match st.session.as_mut() {
                Some(session) if session.state == SessionState::Active => {
                    session.state = SessionState::Stopping;
                }
                _ => return false,
            }
            st.generation += 1;
            st.subscription.take()
        };

        if let Some(mut subscription) = subscription {
            subscription.cancel();
        }

        let display = {
            let mut st = guard.borrow_mut();
            st.session = None;
            st.display.reset();
            st.display.clone()
        };

        info!("Ranging session stopped");
        self.observer.on_session_state_changed(SessionState::Idle);
        self.observer.on_display_changed(display);
        true
    }

    /// Stream ended (error or completion): back to Idle
    fn finish_locked(&self, guard: &StateGuard<'_>, error: Option<UwbError>) {
        let subscription = {
            let mut st = guard.borrow_mut();
            if st.session.take().is_none() {
                return;
            }
            st.generation += 1;
            st.display.reset();
            st.subscription.take()
        };

        if let Some(mut subscription) = subscription {
            subscription.cancel();
        }

        match &error {
            Some(e) => warn!("Ranging session ended with error: {}", e),
            None => info!("Ranging session completed"),
        }

        self.observer.on_session_state_changed(SessionState::Idle);
        self.observer.on_display_changed(MeasurementDisplay::baseline());
        if let Some(e) = error {
            report(self.observer.as_ref(), &e);
        }
    }

    fn handle_event_locked(&self, guard: &StateGuard<'_>, event: RangingEvent) {
        match event {
            RangingEvent::Position(measurement) => {
                let (generation, display) = {
                    let mut st = guard.borrow_mut();
                    st.display.apply(&measurement);
                    (st.generation, st.display.clone())
                };
                self.observer.on_measurement(measurement);
                // The observer may have stopped the session from its callback
                if guard.borrow().generation == generation {
                    self.observer.on_display_changed(display);
                }
            }
            RangingEvent::PeerDisconnected => {
                warn!("Ranging peer connection lost");
                let display = {
                    let mut st = guard.borrow_mut();
                    st.display.reset();
                    st.display.clone()
                };
                self.observer.on_display_changed(display);
            }
            RangingEvent::Error(message) => {
                self.finish_locked(guard, Some(UwbError::Provider(message)));
            }
            RangingEvent::Complete => self.finish_locked(guard, None),
        }
    }

    fn dispatch(&self, generation: u64, event: RangingEvent) -> bool {
        let guard = self.state.lock();
        let current = {
            let st = guard.borrow();
            st.generation == generation && st.is_active()
        };
        if !current {
            debug!("Dropping event for stale ranging session {}", generation);
            return false;
        }

        self.handle_event_locked(&guard, event);
        true
    }

    /// Apply an event to whatever session is active right now
    fn handle_current(&self, event: RangingEvent) -> bool {
        let guard = self.state.lock();
        if !guard.borrow().is_active() {
            return false;
        }
        self.handle_event_locked(&guard, event);
        true
    }
}

/// Owner of the single active ranging session
#[derive(Clone)]
pub struct SessionController {
    core: Arc<ControllerCore>,
}

impl SessionController {
    pub fn new(
        provider: Arc<dyn RangingProvider>,
        observer: Arc<dyn RangingObserver>,
        template: SessionTemplate,
    ) -> Self {
        Self {
            core: Arc::new(ControllerCore {
                provider,
                observer,
                template,
                state: ReentrantMutex::new(RefCell::new(ControllerState {
                    scope: None,
                    session: None,
                    subscription: None,
                    generation: 0,
                    display: MeasurementDisplay::baseline(),
                    releasing: false,
                })),
            }),
        }
    }

    /// Replace the session scope. Any active session is stopped first, since
    /// it belongs to the old scope.
    pub fn bind_scope(&self, scope: Option<SessionScope>) {
        self.bind_scope_if(scope, || true);
    }

    /// Bind `scope` only if `still_current` holds. The check runs under the
    /// controller lock, so no other bind can slip in between.
    pub fn bind_scope_if(
        &self,
        scope: Option<SessionScope>,
        still_current: impl FnOnce() -> bool,
    ) -> bool {
        let guard = self.core.state.lock();
        if !still_current() {
            return false;
        }
        let nested = std::mem::replace(&mut guard.borrow_mut().releasing, true);
        self.core.stop_locked(&guard);
        guard.borrow_mut().releasing = nested;
        guard.borrow_mut().scope = scope;
        true
    }

    pub fn scope(&self) -> Option<SessionScope> {
        self.core.state.lock().borrow().scope.clone()
    }

    /// Identity of the bound scope, if any
    pub fn local_identity(&self) -> Option<LocalIdentity> {
        self.scope().and_then(|scope| scope.identity().ok())
    }

    pub fn state(&self) -> SessionState {
        self.core
            .state
            .lock()
            .borrow()
            .session
            .as_ref()
            .map(|s| s.state)
            .unwrap_or(SessionState::Idle)
    }

    pub fn is_active(&self) -> bool {
        self.core.state.lock().borrow().is_active()
    }

    pub fn active_session(&self) -> Option<RangingSession> {
        self.core.state.lock().borrow().session.clone()
    }

    pub fn display(&self) -> MeasurementDisplay {
        self.core.state.lock().borrow().display.clone()
    }

    /// Start ranging according to `plan`, stopping any active session first.
    pub fn start(
        &self,
        plan: InitiationPlan,
        session_id: u16,
    ) -> Result<RangingSession, UwbError> {
        let guard = self.core.state.lock();
        self.core.start_locked(&guard, plan, session_id)
    }

    /// Start ranging only when no session is active. `Ok(None)` when busy.
    pub fn start_if_idle(
        &self,
        plan: InitiationPlan,
        session_id: u16,
    ) -> Result<Option<RangingSession>, UwbError> {
        let guard = self.core.state.lock();
        if guard.borrow().session.is_some() {
            debug!("Session busy, not starting with peer {:#06x}", plan.peer_address);
            return Ok(None);
        }
        self.core.start_locked(&guard, plan, session_id).map(Some)
    }

    /// Match `peer` against the bound scope and start ranging with it when
    /// the roles are complementary and no session is active.
    pub fn try_initiate(
        &self,
        peer: &PeerRecord,
        session_id: u16,
    ) -> Result<Option<RangingSession>, UwbError> {
        let guard = self.core.state.lock();
        let plan = {
            let st = guard.borrow();
            if st.session.is_some() {
                debug!("Session busy, ignoring peer {}", peer.device);
                return Ok(None);
            }
            let Some(identity) = st.scope.as_ref().and_then(|s| s.identity().ok()) else {
                debug!("No session scope yet, ignoring peer {}", peer.device);
                return Ok(None);
            };
            match RoleMatcher::should_initiate(&identity, peer) {
                Some(plan) => plan,
                None => return Ok(None),
            }
        };

        info!("Peer {} qualifies for ranging", peer.device);
        self.core.start_locked(&guard, plan, session_id).map(Some)
    }

    /// Stop the active session. Returns false when already idle.
    ///
    /// The provider subscription has been released when this returns.
    pub fn stop(&self) -> bool {
        let guard = self.core.state.lock();
        self.core.stop_locked(&guard)
    }

    pub fn on_measurement(&self, measurement: Measurement) -> bool {
        self.core.handle_current(RangingEvent::Position(measurement))
    }

    pub fn on_peer_disconnected(&self) -> bool {
        self.core.handle_current(RangingEvent::PeerDisconnected)
    }

    pub fn on_stream_error(&self, message: impl Into<String>) -> bool {
        self.core.handle_current(RangingEvent::Error(message.into()))
    }

    pub fn on_stream_complete(&self) -> bool {
        self.core.handle_current(RangingEvent::Complete)
    }
}

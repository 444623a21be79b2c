//! UWB ranging: provider seam, measurements and the session controller

pub mod measurement;
pub mod provider;
pub mod session;

pub use measurement::{Measurement, MeasurementDisplay, DISPLAY_BASELINE};
pub use provider::{
    RangingCapabilities, RangingConfigId, RangingEvent, RangingParameters, RangingProvider,
    RangingSubscription, SessionScope, SessionTemplate, UpdateRate,
};
pub use session::{RangingEventSink, RangingSession, SessionController, SessionState};

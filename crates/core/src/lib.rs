//! Core library for the Haptic Sequencer playback engine.
//!
//! A script of timed keyframes is decoded once into an immutable
//! [`Script`]. On every tick the [`PlaybackSession`] advances its
//! [`PlaybackClock`], samples each channel, fits the values onto every
//! compatible actuator known to the [`CapabilityRegistry`], and lets the
//! [`Scheduler`] decide which [`CommandIntent`]s actually go out to the
//! [`CommandTransport`].
//!
//! The transport itself (discovery, handshakes, wire framing) lives outside
//! this crate; [`RecordingTransport`] stands in for it in tests and previews.

pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod interpolate;
pub mod mapping;
pub mod record;
pub mod registry;
pub mod scheduler;
pub mod script;
pub mod session;
pub mod transport;

pub use clock::{ClockState, ClockTransition, LoopPolicy, PlaybackClock, RateOutcome};
pub use config::{AppConfig, ClockConfig, DriverConfig, EventsConfig, SchedulerConfig};
pub use error::{ClockMisuse, EngineError, ParseError, Result};
pub use events::{Diagnostic, EventHub, StateChange};
pub use interpolate::value_at;
pub use mapping::{ActuatorKind, ScaledValue};
pub use record::{RecordingSettings, RecordingTransport};
pub use registry::{Actuator, Binding, CapabilityRegistry, Device, DeviceId};
pub use scheduler::{RateLimitState, Scheduler, TickReport};
pub use script::{Channel, InterpolationMode, Keyframe, Script};
pub use session::{PlaybackSession, SharedPlayback};
pub use transport::{
    CommandIntent, CommandTransport, DeliveryFailure, DeviceEvent, DeviceEventQueue,
    DeviceEventSender,
};

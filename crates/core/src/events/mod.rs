//! Observability streams for hosts, previews, and diagnostics.
//!
//! Each `subscribe_*` call opens a fresh sequence backed by a bounded
//! channel. A subscriber that falls a full buffer behind misses events rather
//! than holding the session's memory. Closing the hub at `stop()` drops every
//! sender, so receivers see the end of their sequence; subscribing again
//! starts a new one.

use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};

use crate::{
    clock::ClockState,
    mapping::ActuatorKind,
    registry::DeviceId,
    transport::{CommandIntent, DeliveryFailure},
};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StateChange {
    pub time: f64,
    pub state: ClockState,
}

/// Non-fatal conditions. Logged and published, never raised as errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Diagnostic {
    /// A channel has no compatible actuator and stays silent.
    BindingWarning {
        channel: String,
        kind: ActuatorKind,
    },
    /// A command was held back by the device's minimum command interval.
    RateFloorViolation {
        device: DeviceId,
        actuator: u32,
        retry_in: Duration,
    },
    DeliveryFailure(DeliveryFailure),
    /// A reverse rate was requested with reverse playback disabled.
    ReverseRateClamped { requested: f64 },
}

/// Events buffered per subscriber when no capacity is configured.
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 1024;

#[derive(Debug)]
struct Topic<T> {
    name: &'static str,
    capacity: usize,
    subscribers: Vec<Sender<T>>,
}

impl<T: Clone> Topic<T> {
    fn new(name: &'static str, capacity: usize) -> Self {
        Self {
            name,
            capacity: capacity.max(1),
            subscribers: Vec::new(),
        }
    }

    fn subscribe(&mut self) -> Receiver<T> {
        let (sender, receiver) = crossbeam_channel::bounded(self.capacity);
        self.subscribers.push(sender);
        receiver
    }

    fn publish(&mut self, event: &T) {
        let name = self.name;
        self.subscribers
            .retain(|subscriber| match subscriber.try_send(event.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    tracing::trace!(topic = name, "subscriber buffer full, event dropped");
                    true
                }
                Err(TrySendError::Disconnected(_)) => false,
            });
    }

    fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    fn close(&mut self) {
        self.subscribers.clear();
    }
}

/// Fan-out point for all observability streams of a session.
#[derive(Debug)]
pub struct EventHub {
    state: Topic<StateChange>,
    commands: Topic<CommandIntent>,
    diagnostics: Topic<Diagnostic>,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_SUBSCRIBER_CAPACITY)
    }
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// A hub whose subscribers each buffer at most `capacity` events.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: Topic::new("state", capacity),
            commands: Topic::new("commands", capacity),
            diagnostics: Topic::new("diagnostics", capacity),
        }
    }

    pub fn subscribe_state(&mut self) -> Receiver<StateChange> {
        self.state.subscribe()
    }

    pub fn subscribe_commands(&mut self) -> Receiver<CommandIntent> {
        self.commands.subscribe()
    }

    pub fn subscribe_diagnostics(&mut self) -> Receiver<Diagnostic> {
        self.diagnostics.subscribe()
    }

    pub fn publish_state(&mut self, change: StateChange) {
        self.state.publish(&change);
    }

    pub fn publish_commands(&mut self, intents: &[CommandIntent]) {
        if self.commands.is_empty() {
            return;
        }
        for intent in intents {
            self.commands.publish(intent);
        }
    }

    pub fn publish_diagnostic(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.publish(&diagnostic);
    }

    /// Ends every open sequence.
    pub fn close(&mut self) {
        self.state.close();
        self.commands.close();
        self.diagnostics.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequences_end_on_close() {
        let mut hub = EventHub::new();
        let states = hub.subscribe_state();

        hub.publish_state(StateChange {
            time: 0.0,
            state: ClockState::Playing,
        });
        hub.close();

        let received: Vec<StateChange> = states.iter().collect();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].state, ClockState::Playing);
    }

    #[test]
    fn resubscribing_starts_a_new_sequence() {
        let mut hub = EventHub::new();
        let first = hub.subscribe_diagnostics();
        hub.close();

        let second = hub.subscribe_diagnostics();
        hub.publish_diagnostic(Diagnostic::ReverseRateClamped { requested: -1.0 });

        assert!(first.try_recv().is_err());
        assert_eq!(
            second.try_recv().unwrap(),
            Diagnostic::ReverseRateClamped { requested: -1.0 }
        );
    }

    #[test]
    fn slow_subscribers_miss_events_instead_of_growing() {
        let mut hub = EventHub::with_capacity(2);
        let states = hub.subscribe_state();

        for time in [0.0, 1.0, 2.0] {
            hub.publish_state(StateChange {
                time,
                state: ClockState::Playing,
            });
        }
        let times: Vec<f64> = states.try_iter().map(|change| change.time).collect();
        assert_eq!(times, vec![0.0, 1.0]);

        hub.publish_state(StateChange {
            time: 3.0,
            state: ClockState::Paused,
        });
        assert_eq!(states.try_recv().unwrap().time, 3.0);
    }

    #[test]
    fn dropped_receivers_are_pruned() {
        let mut hub = EventHub::new();
        drop(hub.subscribe_state());
        hub.publish_state(StateChange {
            time: 1.0,
            state: ClockState::Paused,
        });
        assert!(hub.state.is_empty());
    }
}

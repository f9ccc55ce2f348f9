//! Command scheduler: turns sampled channel values into deduplicated,
//! rate-limited command intents for every bound actuator.
//!
//! Rate limiting keeps a single pending slot per actuator. A value held back
//! by the device's minimum interval is overwritten by later ticks and the
//! freshest value goes out at the next eligible tick; nothing is queued.
//! Neutral commands sent at stop count as sends for the rate floor.

use std::{
    collections::{HashMap, HashSet},
    time::Duration,
};

use crate::{
    config::SchedulerConfig,
    events::Diagnostic,
    interpolate,
    mapping::{self, ScaledValue},
    registry::{Binding, CapabilityRegistry, DeviceId},
    script::{Channel, Script},
    transport::{CommandIntent, CommandTransport, DeliveryFailure},
};

/// Identifies one actuator across the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActuatorKey {
    pub device: DeviceId,
    pub actuator: u32,
}

impl From<&Binding> for ActuatorKey {
    fn from(binding: &Binding) -> Self {
        Self {
            device: binding.device,
            actuator: binding.actuator,
        }
    }
}

/// Per-actuator emission bookkeeping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateLimitState {
    /// Last value the transport accepted. `None` forces the next eligible
    /// tick to send.
    pub last_value: Option<f64>,
    pub last_sent_at: Option<Duration>,
    /// Latest value held back by the rate floor.
    pub pending: Option<ScaledValue>,
}

/// Outcome of one scheduling pass.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TickReport {
    /// Intents the transport accepted, in emission order.
    pub sent: Vec<CommandIntent>,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug)]
pub struct Scheduler {
    config: SchedulerConfig,
    bindings: Vec<Vec<Binding>>,
    bound_generation: Option<u64>,
    rate_state: HashMap<ActuatorKey, RateLimitState>,
    neutralized: HashSet<ActuatorKey>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            bindings: Vec::new(),
            bound_generation: None,
            rate_state: HashMap::new(),
            neutralized: HashSet::new(),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Forces bindings to be resolved again, e.g. after a script change.
    pub fn invalidate_bindings(&mut self) {
        self.bound_generation = None;
    }

    /// Bindings resolved for the channel at `index`, as of the last pass.
    pub fn bindings(&self, index: usize) -> &[Binding] {
        self.bindings.get(index).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn rate_state(&self, device: DeviceId, actuator: u32) -> Option<&RateLimitState> {
        self.rate_state.get(&ActuatorKey { device, actuator })
    }

    /// Allows the next stop to neutralize every actuator again.
    pub fn arm(&mut self) {
        self.neutralized.clear();
    }

    /// Drops all state kept for a device that went away.
    pub fn forget_device(&mut self, device: DeviceId) {
        self.rate_state.retain(|key, _| key.device != device);
        self.neutralized.retain(|key| key.device != device);
        for channel in &mut self.bindings {
            channel.retain(|binding| binding.device != device);
        }
    }

    /// Handles a failure the transport reported after the fact. The
    /// actuator's last value is forgotten so it is resent when eligible.
    pub fn delivery_failed(&mut self, failure: &DeliveryFailure) {
        let key = ActuatorKey {
            device: failure.device,
            actuator: failure.actuator,
        };
        if let Some(state) = self.rate_state.get_mut(&key) {
            state.last_value = None;
        }
        self.neutralized.remove(&key);
    }

    /// Re-resolves bindings if the registry changed since the last pass.
    ///
    /// A channel that is alone in its kind binds every actuator of that kind.
    /// When several channels share a kind, the kind's actuators are dealt out
    /// round-robin in device and actuator order: the n-th channel of a kind
    /// takes every actuator whose position is n modulo the number of such
    /// channels. No actuator is driven by two channels.
    pub fn refresh_bindings(
        &mut self,
        script: &Script,
        registry: &CapabilityRegistry,
    ) -> Vec<Diagnostic> {
        if self.bound_generation == Some(registry.generation()) {
            return Vec::new();
        }

        let channels = script.channels();
        let mut diagnostics = Vec::new();
        self.bindings = channels
            .iter()
            .enumerate()
            .map(|(index, channel)| {
                let same_kind = |other: &&Channel| other.kind() == channel.kind();
                let rank = channels[..index].iter().filter(same_kind).count();
                let share = channels.iter().filter(same_kind).count();

                let bindings: Vec<Binding> = registry
                    .resolve_binding(channel)
                    .into_iter()
                    .enumerate()
                    .filter(|(position, _)| position % share == rank)
                    .map(|(_, binding)| binding)
                    .collect();

                if bindings.is_empty() {
                    tracing::warn!(
                        channel = channel.id(),
                        kind = %channel.kind(),
                        "no compatible actuator, channel is inert"
                    );
                    diagnostics.push(Diagnostic::BindingWarning {
                        channel: channel.id().to_string(),
                        kind: channel.kind(),
                    });
                }
                bindings
            })
            .collect();

        self.bound_generation = Some(registry.generation());
        diagnostics
    }

    /// Runs one scheduling pass at session wall time `now` for script
    /// position `playback_time`.
    pub fn tick<T: CommandTransport + ?Sized>(
        &mut self,
        now: Duration,
        playback_time: f64,
        script: &Script,
        registry: &CapabilityRegistry,
        transport: &mut T,
    ) -> TickReport {
        let mut diagnostics = self.refresh_bindings(script, registry);
        let mut intents = Vec::new();

        for (channel, bindings) in script.channels().iter().zip(&self.bindings) {
            let value = interpolate::value_at(channel, playback_time);

            for binding in bindings {
                let scaled = mapping::scale(binding.kind, binding.steps, value);
                let key = ActuatorKey::from(binding);
                let state = self.rate_state.entry(key).or_default();

                if state
                    .last_value
                    .is_some_and(|last| (scaled.value - last).abs() <= self.config.dedup_epsilon)
                {
                    state.pending = None;
                    continue;
                }

                let floor = binding
                    .min_interval
                    .unwrap_or_else(|| self.config.default_min_interval());
                if let Some(sent_at) = state.last_sent_at {
                    let elapsed = now.saturating_sub(sent_at);
                    if elapsed < floor {
                        if state.pending.is_none() {
                            tracing::trace!(device = %key.device, actuator = key.actuator, "deferred by rate floor");
                            diagnostics.push(Diagnostic::RateFloorViolation {
                                device: key.device,
                                actuator: key.actuator,
                                retry_in: floor - elapsed,
                            });
                        }
                        state.pending = Some(scaled);
                        continue;
                    }
                }

                intents.push(CommandIntent {
                    device: binding.device,
                    actuator: binding.actuator,
                    kind: binding.kind,
                    value: scaled.value,
                    level: scaled.level,
                    timestamp: now,
                    playback_time,
                });
            }
        }

        let (sent, failures) = self.dispatch(intents, transport);
        for intent in &sent {
            let key = ActuatorKey {
                device: intent.device,
                actuator: intent.actuator,
            };
            self.rate_state.insert(
                key,
                RateLimitState {
                    last_value: Some(intent.value),
                    last_sent_at: Some(now),
                    pending: None,
                },
            );
            self.neutralized.remove(&key);
        }
        diagnostics.extend(failures.into_iter().map(Diagnostic::DeliveryFailure));

        TickReport { sent, diagnostics }
    }

    /// Sends value zero to every bound actuator that has not been neutralized
    /// since it last moved, bypassing deduplication and rate limiting.
    ///
    /// Accepted neutrals are recorded as the actuator's last send, so the
    /// rate floor still holds if playback resumes right away. Rejected ones
    /// are tried again by the next call. Pending values are dropped.
    pub fn neutralize<T: CommandTransport + ?Sized>(
        &mut self,
        now: Duration,
        playback_time: f64,
        script: &Script,
        registry: &CapabilityRegistry,
        transport: &mut T,
    ) -> TickReport {
        let mut diagnostics = self.refresh_bindings(script, registry);

        let mut intents = Vec::new();
        for binding in self.bindings.iter().flatten() {
            if self.neutralized.contains(&ActuatorKey::from(binding)) {
                continue;
            }
            intents.push(CommandIntent {
                device: binding.device,
                actuator: binding.actuator,
                kind: binding.kind,
                value: ScaledValue::NEUTRAL.value,
                level: ScaledValue::NEUTRAL.level,
                timestamp: now,
                playback_time,
            });
        }

        if !intents.is_empty() {
            tracing::info!(actuators = intents.len(), "sending neutral commands");
        }
        let (sent, failures) = self.dispatch(intents, transport);
        for state in self.rate_state.values_mut() {
            state.pending = None;
        }
        for intent in &sent {
            let key = ActuatorKey {
                device: intent.device,
                actuator: intent.actuator,
            };
            self.neutralized.insert(key);
            self.rate_state.insert(
                key,
                RateLimitState {
                    last_value: Some(intent.value),
                    last_sent_at: Some(now),
                    pending: None,
                },
            );
        }
        diagnostics.extend(failures.into_iter().map(Diagnostic::DeliveryFailure));

        TickReport { sent, diagnostics }
    }

    fn dispatch<T: CommandTransport + ?Sized>(
        &self,
        intents: Vec<CommandIntent>,
        transport: &mut T,
    ) -> (Vec<CommandIntent>, Vec<DeliveryFailure>) {
        if intents.is_empty() {
            return (intents, Vec::new());
        }

        let failures = if self.config.prefer_batching && transport.supports_batching() {
            transport.send_batch(&intents)
        } else {
            intents
                .iter()
                .filter_map(|intent| transport.send(intent).err())
                .collect()
        };

        for failure in &failures {
            tracing::warn!(
                device = %failure.device,
                actuator = failure.actuator,
                reason = %failure.reason,
                "command delivery failed"
            );
        }

        let failed: HashSet<ActuatorKey> = failures
            .iter()
            .map(|failure| ActuatorKey {
                device: failure.device,
                actuator: failure.actuator,
            })
            .collect();
        let sent: Vec<CommandIntent> = intents
            .into_iter()
            .filter(|intent| {
                !failed.contains(&ActuatorKey {
                    device: intent.device,
                    actuator: intent.actuator,
                })
            })
            .collect();

        tracing::debug!(sent = sent.len(), failed = failures.len(), "dispatched commands");
        (sent, failures)
    }
}

//! Host-facing playback session.
//!
//! [`PlaybackSession`] owns every piece of mutable state (clock, registry,
//! scheduler, observability hub) and is driven by `&mut` calls from one
//! logical thread. [`SharedPlayback`] wraps it in a single mutex so that a
//! multi-threaded host runs each tick and each control call as one unit.

use std::{
    path::Path,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use crossbeam_channel::Receiver;

use crate::{
    clock::{wrap_time, ClockState, LoopPolicy, PlaybackClock, RateOutcome},
    config::AppConfig,
    events::{Diagnostic, EventHub, StateChange},
    interpolate,
    registry::{CapabilityRegistry, Device, DeviceId},
    scheduler::{Scheduler, TickReport},
    script::Script,
    transport::{
        CommandIntent, CommandTransport, DeliveryFailure, DeviceEvent, DeviceEventQueue,
        DeviceEventSender,
    },
    EngineError, Result,
};

pub struct PlaybackSession<T> {
    config: AppConfig,
    script: Option<Arc<Script>>,
    clock: PlaybackClock,
    registry: CapabilityRegistry,
    scheduler: Scheduler,
    events: EventHub,
    inbound: DeviceEventQueue,
    transport: T,
    wall_time: Duration,
}

impl<T: CommandTransport> PlaybackSession<T> {
    pub fn new(transport: T) -> Self {
        Self::with_config(AppConfig::default(), transport)
    }

    pub fn with_config(config: AppConfig, transport: T) -> Self {
        Self {
            clock: PlaybackClock::new(&config.clock),
            scheduler: Scheduler::new(config.scheduler.clone()),
            events: EventHub::with_capacity(config.events.subscriber_capacity),
            config,
            script: None,
            registry: CapabilityRegistry::new(),
            inbound: DeviceEventQueue::new(),
            transport,
            wall_time: Duration::ZERO,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn script(&self) -> Option<&Arc<Script>> {
        self.script.as_ref()
    }

    pub fn state(&self) -> ClockState {
        self.clock.state()
    }

    /// Current script position in seconds.
    pub fn time(&self) -> f64 {
        self.clock.time()
    }

    pub fn rate(&self) -> f64 {
        self.clock.rate()
    }

    pub fn loop_policy(&self) -> LoopPolicy {
        self.clock.loop_policy()
    }

    /// Monotonic sum of every tick delta seen so far.
    pub fn wall_time(&self) -> Duration {
        self.wall_time
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Handle a transport thread can use to report device events. Queued
    /// events are applied at the start of the next tick.
    pub fn device_events(&self) -> DeviceEventSender {
        self.inbound.sender()
    }

    pub fn subscribe_state(&mut self) -> Receiver<StateChange> {
        self.events.subscribe_state()
    }

    pub fn subscribe_commands(&mut self) -> Receiver<CommandIntent> {
        self.events.subscribe_commands()
    }

    pub fn subscribe_diagnostics(&mut self) -> Receiver<Diagnostic> {
        self.events.subscribe_diagnostics()
    }

    /// Decodes and installs a script. On error the current script stays.
    ///
    /// Replacing a script ends the current session first, so previously
    /// bound actuators receive their neutral command.
    pub fn load_script(&mut self, raw: &str) -> Result<Arc<Script>> {
        let script = Script::parse(raw)?;
        Ok(self.set_script(script))
    }

    pub fn load_script_file(&mut self, path: impl AsRef<Path>) -> Result<Arc<Script>> {
        let raw = std::fs::read_to_string(path)?;
        self.load_script(&raw)
    }

    pub fn set_script(&mut self, script: Script) -> Arc<Script> {
        if self.script.is_some() {
            self.stop();
        }

        let script = Arc::new(script);
        tracing::info!(
            channels = script.channels().len(),
            duration = script.duration(),
            "script loaded"
        );
        self.clock.set_duration(script.duration());
        self.scheduler.invalidate_bindings();
        self.script = Some(script.clone());
        script
    }

    pub fn play(&mut self) -> Result<()> {
        if self.script.is_none() {
            return Err(EngineError::NoScript);
        }
        self.scheduler.arm();
        if self.clock.play().is_changed() {
            if self.clock.state() == ClockState::Playing {
                tracing::info!(time = self.clock.time(), rate = self.clock.rate(), "playback started");
            } else {
                tracing::info!(time = self.clock.time(), "rate is zero, holding paused");
            }
            self.publish_state();
        }
        Ok(())
    }

    pub fn pause(&mut self) {
        if self.clock.pause().is_changed() {
            tracing::info!(time = self.clock.time(), "playback paused");
            self.publish_state();
        }
    }

    /// Jumps to `time` seconds. Works while paused for scrubbing.
    pub fn seek(&mut self, time: f64) -> Result<()> {
        self.clock.seek(time)?;
        tracing::debug!(time, "seek");
        self.publish_state();
        Ok(())
    }

    pub fn set_rate(&mut self, rate: f64) -> Result<RateOutcome> {
        let outcome = self.clock.set_rate(rate)?;
        if let Some(requested) = outcome.clamped_from {
            tracing::warn!(requested, "reverse playback disabled, rate clamped to zero");
            self.events
                .publish_diagnostic(Diagnostic::ReverseRateClamped { requested });
        }
        if outcome.transition.is_changed() {
            self.publish_state();
        }
        Ok(outcome)
    }

    pub fn set_loop(&mut self, policy: LoopPolicy) -> Result<()> {
        self.clock.set_loop(policy)?;
        Ok(())
    }

    /// Ends the session: every bound actuator gets exactly one neutral
    /// command, the clock rewinds, and observability sequences terminate.
    /// Calling it again before playing is a no-op.
    pub fn stop(&mut self) {
        self.apply_device_events();

        if let Some(script) = &self.script {
            let report = self.scheduler.neutralize(
                self.wall_time,
                self.clock.time(),
                script,
                &self.registry,
                &mut self.transport,
            );
            self.publish_report(&report);
        }

        if self.clock.stop().is_changed() {
            tracing::info!("playback stopped");
            self.publish_state();
        }
        self.events.close();
    }

    /// The transport is gone for good: devices are dropped and the session
    /// stops without trying to reach them.
    pub fn transport_lost(&mut self, reason: &str) {
        tracing::error!(reason, "transport lost, aborting session");
        let ids: Vec<DeviceId> = self.registry.devices().map(|device| device.id).collect();
        for id in ids {
            self.registry.on_disconnect(id);
            self.scheduler.forget_device(id);
        }
        self.stop();
    }

    pub fn device_connected(&mut self, device: Device) {
        self.apply_device_event(DeviceEvent::Connected(device));
    }

    pub fn device_disconnected(&mut self, id: DeviceId) {
        self.apply_device_event(DeviceEvent::Disconnected(id));
    }

    pub fn command_delivery_failed(&mut self, device: DeviceId, actuator: u32, reason: &str) {
        self.apply_device_event(DeviceEvent::DeliveryFailed(DeliveryFailure::new(
            device, actuator, reason,
        )));
    }

    /// Advances the session by `delta` of wall-clock time and schedules
    /// commands for the new position.
    ///
    /// Queued device events are applied first. Nothing is emitted while
    /// stopped; while paused the current position is still evaluated so that
    /// seeks reach the devices.
    pub fn tick(&mut self, delta: Duration) -> TickReport {
        self.apply_device_events();
        self.wall_time += delta;

        let Some(script) = &self.script else {
            return TickReport::default();
        };
        if self.clock.state() == ClockState::Stopped {
            return TickReport::default();
        }

        let time = self.clock.advance(delta);
        let report = self.scheduler.tick(
            self.wall_time,
            time,
            script,
            &self.registry,
            &mut self.transport,
        );
        self.publish_report(&report);
        report
    }

    /// Channel values at `time` without emitting anything. Loop policy is
    /// applied to times past the end.
    pub fn preview(&self, time: f64) -> Vec<(String, f64)> {
        let Some(script) = &self.script else {
            return Vec::new();
        };
        let time = wrap_time(time, script.duration(), self.clock.loop_policy());
        interpolate::sample_script(script, time)
            .into_iter()
            .map(|(id, value)| (id.to_string(), value))
            .collect()
    }

    fn apply_device_events(&mut self) {
        for event in self.inbound.drain() {
            self.apply_device_event(event);
        }
    }

    fn apply_device_event(&mut self, event: DeviceEvent) {
        match event {
            DeviceEvent::Connected(device) => {
                self.scheduler.forget_device(device.id);
                self.registry.on_connect(device);
            }
            DeviceEvent::Disconnected(id) => {
                self.registry.on_disconnect(id);
                self.scheduler.forget_device(id);
            }
            DeviceEvent::DeliveryFailed(failure) => {
                tracing::warn!(
                    device = %failure.device,
                    actuator = failure.actuator,
                    reason = %failure.reason,
                    "transport reported delivery failure"
                );
                self.scheduler.delivery_failed(&failure);
                self.events
                    .publish_diagnostic(Diagnostic::DeliveryFailure(failure));
            }
        }
    }

    fn publish_state(&mut self) {
        self.events.publish_state(StateChange {
            time: self.clock.time(),
            state: self.clock.state(),
        });
    }

    fn publish_report(&mut self, report: &TickReport) {
        self.events.publish_commands(&report.sent);
        for diagnostic in &report.diagnostics {
            self.events.publish_diagnostic(diagnostic.clone());
        }
    }
}

impl<T> std::fmt::Debug for PlaybackSession<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackSession")
            .field("state", &self.clock.state())
            .field("time", &self.clock.time())
            .field("devices", &self.registry.len())
            .field("wall_time", &self.wall_time)
            .finish()
    }
}

/// Shared, thread-safe handle over a [`PlaybackSession`].
pub struct SharedPlayback<T> {
    shared: Arc<Mutex<PlaybackSession<T>>>,
    device_events: DeviceEventSender,
}

impl<T> Clone for SharedPlayback<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            device_events: self.device_events.clone(),
        }
    }
}

impl<T: CommandTransport> SharedPlayback<T> {
    pub fn new(session: PlaybackSession<T>) -> Self {
        let device_events = session.device_events();
        Self {
            shared: Arc::new(Mutex::new(session)),
            device_events,
        }
    }

    /// Event sender usable without taking the session lock.
    pub fn device_events(&self) -> DeviceEventSender {
        self.device_events.clone()
    }

    pub fn load_script(&self, raw: &str) -> Result<Arc<Script>> {
        self.lock()?.load_script(raw)
    }

    pub fn play(&self) -> Result<()> {
        self.lock()?.play()
    }

    pub fn pause(&self) -> Result<()> {
        self.lock()?.pause();
        Ok(())
    }

    pub fn seek(&self, time: f64) -> Result<()> {
        self.lock()?.seek(time)
    }

    pub fn set_rate(&self, rate: f64) -> Result<RateOutcome> {
        self.lock()?.set_rate(rate)
    }

    pub fn stop(&self) -> Result<()> {
        self.lock()?.stop();
        Ok(())
    }

    pub fn tick(&self, delta: Duration) -> Result<TickReport> {
        Ok(self.lock()?.tick(delta))
    }

    /// Runs `f` with exclusive access to the session.
    pub fn with<R>(&self, f: impl FnOnce(&mut PlaybackSession<T>) -> R) -> Result<R> {
        let mut session = self.lock()?;
        Ok(f(&mut session))
    }

    fn lock(&self) -> Result<MutexGuard<'_, PlaybackSession<T>>> {
        self.shared
            .lock()
            .map_err(|_| EngineError::Poisoned("playback session"))
    }
}

impl<T> std::fmt::Debug for SharedPlayback<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedPlayback").finish()
    }
}

//! Playback clock and its transport state machine.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{config::ClockConfig, ClockMisuse};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClockState {
    #[default]
    Stopped,
    Playing,
    Paused,
}

/// What happens when playback runs past the end of the script.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "kebab-case")]
pub enum LoopPolicy {
    /// Hold at the end (or at zero when reversing).
    #[default]
    None,
    LoopToStart,
    /// Jump back to `marker` seconds instead of zero.
    LoopToMarker { marker: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockTransition {
    Unchanged,
    Changed { from: ClockState, to: ClockState },
}

impl ClockTransition {
    pub fn is_changed(self) -> bool {
        matches!(self, ClockTransition::Changed { .. })
    }
}

/// Result of a `set_rate` call that was not rejected outright.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateOutcome {
    /// Multiplier now in effect; zero means the clock paused.
    pub applied: f64,
    /// Set when a reverse rate was requested but reverse playback is disabled.
    pub clamped_from: Option<f64>,
    pub transition: ClockTransition,
}

/// Monotonic session clock. Only `advance` moves time on its own, and only
/// while playing.
#[derive(Debug, Clone)]
pub struct PlaybackClock {
    state: ClockState,
    time_seconds: f64,
    rate: f64,
    loop_policy: LoopPolicy,
    duration: f64,
    allow_reverse: bool,
}

impl Default for PlaybackClock {
    fn default() -> Self {
        Self::new(&ClockConfig::default())
    }
}

impl PlaybackClock {
    pub fn new(config: &ClockConfig) -> Self {
        Self {
            state: ClockState::Stopped,
            time_seconds: 0.0,
            rate: 1.0,
            loop_policy: LoopPolicy::None,
            duration: 0.0,
            allow_reverse: config.allow_reverse,
        }
    }

    pub fn state(&self) -> ClockState {
        self.state
    }

    pub fn time(&self) -> f64 {
        self.time_seconds
    }

    /// Multiplier applied while playing. Zero means held: the clock cannot
    /// enter `Playing` until a non-zero rate is set.
    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn loop_policy(&self) -> LoopPolicy {
        self.loop_policy
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    /// Adopts a new script length, pulling time and loop marker back in range.
    pub fn set_duration(&mut self, duration: f64) {
        self.duration = duration.max(0.0);
        self.time_seconds = self.time_seconds.clamp(0.0, self.duration);

        if let LoopPolicy::LoopToMarker { marker } = self.loop_policy {
            if marker >= self.duration {
                tracing::warn!(marker, duration, "loop marker past new script end, looping to start");
                self.loop_policy = LoopPolicy::LoopToStart;
            }
        }
    }

    /// Starts or resumes playback. With a zero rate the clock holds in
    /// `Paused` instead.
    pub fn play(&mut self) -> ClockTransition {
        if self.rate == 0.0 {
            return self.transition(ClockState::Paused);
        }
        self.transition(ClockState::Playing)
    }

    pub fn pause(&mut self) -> ClockTransition {
        match self.state {
            ClockState::Playing => self.transition(ClockState::Paused),
            _ => ClockTransition::Unchanged,
        }
    }

    /// Halts playback and rewinds to zero.
    pub fn stop(&mut self) -> ClockTransition {
        self.time_seconds = 0.0;
        self.transition(ClockState::Stopped)
    }

    /// Jumps to `target` seconds in any state.
    pub fn seek(&mut self, target: f64) -> Result<(), ClockMisuse> {
        if !target.is_finite() {
            return Err(ClockMisuse::NonFiniteTime(target));
        }
        if target < 0.0 || target > self.duration {
            return Err(ClockMisuse::OutOfRange {
                time: target,
                duration: self.duration,
            });
        }

        self.time_seconds = target;
        Ok(())
    }

    pub fn set_rate(&mut self, requested: f64) -> Result<RateOutcome, ClockMisuse> {
        if !requested.is_finite() {
            return Err(ClockMisuse::NonFiniteRate(requested));
        }

        let clamped_from = (requested < 0.0 && !self.allow_reverse).then_some(requested);
        let applied = if clamped_from.is_some() { 0.0 } else { requested };

        self.rate = applied;
        let transition = if applied == 0.0 {
            self.pause()
        } else {
            ClockTransition::Unchanged
        };

        Ok(RateOutcome {
            applied,
            clamped_from,
            transition,
        })
    }

    pub fn set_loop(&mut self, policy: LoopPolicy) -> Result<(), ClockMisuse> {
        if let LoopPolicy::LoopToMarker { marker } = policy {
            if !marker.is_finite() || marker < 0.0 || marker >= self.duration {
                return Err(ClockMisuse::InvalidMarker {
                    marker,
                    duration: self.duration,
                });
            }
        }

        self.loop_policy = policy;
        Ok(())
    }

    /// Moves time forward by `delta` wall-clock time scaled by the rate.
    pub fn advance(&mut self, delta: Duration) -> f64 {
        if self.state == ClockState::Playing {
            let target = self.time_seconds + delta.as_secs_f64() * self.rate;
            self.time_seconds = wrap_time(target, self.duration, self.loop_policy);
        }
        self.time_seconds
    }

    fn transition(&mut self, to: ClockState) -> ClockTransition {
        let from = self.state;
        if from == to {
            return ClockTransition::Unchanged;
        }
        self.state = to;
        ClockTransition::Changed { from, to }
    }
}

/// Maps an unbounded playback position into `[0, duration]` according to the
/// loop policy.
pub fn wrap_time(time: f64, duration: f64, policy: LoopPolicy) -> f64 {
    if !time.is_finite() || duration <= 0.0 {
        return 0.0;
    }

    match policy {
        LoopPolicy::None => time.clamp(0.0, duration),
        LoopPolicy::LoopToStart => time.rem_euclid(duration),
        LoopPolicy::LoopToMarker { marker } => {
            let span = duration - marker;
            if time >= duration && span > 0.0 {
                marker + (time - marker).rem_euclid(span)
            } else if time < 0.0 {
                time.rem_euclid(duration)
            } else {
                time
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    fn clock(duration: f64) -> PlaybackClock {
        let mut clock = PlaybackClock::default();
        clock.set_duration(duration);
        clock
    }

    fn reverse_clock(duration: f64) -> PlaybackClock {
        let mut clock = PlaybackClock::new(&ClockConfig {
            allow_reverse: true,
        });
        clock.set_duration(duration);
        clock
    }

    #[test]
    fn state_transitions() {
        let mut clock = clock(4.0);
        assert_eq!(
            clock.play(),
            ClockTransition::Changed {
                from: ClockState::Stopped,
                to: ClockState::Playing
            }
        );
        assert_eq!(clock.play(), ClockTransition::Unchanged);
        assert!(clock.pause().is_changed());
        assert_eq!(clock.pause(), ClockTransition::Unchanged);
        assert!(clock.play().is_changed());
        assert!(clock.stop().is_changed());
        assert_eq!(clock.stop(), ClockTransition::Unchanged);
    }

    #[test]
    fn pause_from_stopped_is_ignored() {
        let mut clock = clock(4.0);
        assert_eq!(clock.pause(), ClockTransition::Unchanged);
        assert_eq!(clock.state(), ClockState::Stopped);
    }

    #[test]
    fn only_advances_while_playing() {
        let mut clock = clock(4.0);
        assert_eq!(clock.advance(Duration::from_secs(1)), 0.0);

        clock.play();
        assert_relative_eq!(clock.advance(Duration::from_millis(500)), 0.5);

        clock.pause();
        assert_relative_eq!(clock.advance(Duration::from_secs(1)), 0.5);
    }

    #[test]
    fn clamps_to_duration_without_loop() {
        let mut clock = clock(1.0);
        clock.play();
        assert_eq!(clock.advance(Duration::from_secs(3)), 1.0);
    }

    #[test]
    fn loops_to_start() {
        let mut clock = clock(2.0);
        clock.set_loop(LoopPolicy::LoopToStart).unwrap();
        clock.play();
        assert_relative_eq!(clock.advance(Duration::from_millis(2500)), 0.5, epsilon = 1e-9);
    }

    #[test]
    fn loops_to_marker() {
        let mut clock = clock(4.0);
        clock.set_loop(LoopPolicy::LoopToMarker { marker: 1.0 }).unwrap();
        clock.play();
        assert_relative_eq!(clock.advance(Duration::from_millis(4500)), 1.5, epsilon = 1e-9);
        assert_relative_eq!(clock.advance(Duration::from_secs(3)), 1.5, epsilon = 1e-9);
    }

    #[test]
    fn rejects_invalid_markers() {
        let mut clock = clock(4.0);
        assert!(matches!(
            clock.set_loop(LoopPolicy::LoopToMarker { marker: 4.0 }),
            Err(ClockMisuse::InvalidMarker { .. })
        ));
        assert_eq!(clock.loop_policy(), LoopPolicy::None);
    }

    #[test]
    fn shrinking_duration_drops_stale_marker() {
        let mut clock = clock(4.0);
        clock.set_loop(LoopPolicy::LoopToMarker { marker: 3.0 }).unwrap();
        clock.set_duration(2.0);
        assert_eq!(clock.loop_policy(), LoopPolicy::LoopToStart);
    }

    #[test]
    fn seek_works_while_paused_and_validates_input() {
        let mut clock = clock(4.0);
        clock.play();
        clock.pause();
        clock.seek(3.0).unwrap();
        assert_eq!(clock.time(), 3.0);
        assert_eq!(clock.state(), ClockState::Paused);

        assert!(matches!(
            clock.seek(f64::NAN),
            Err(ClockMisuse::NonFiniteTime(_))
        ));
        assert!(matches!(
            clock.seek(5.0),
            Err(ClockMisuse::OutOfRange { .. })
        ));
        assert!(matches!(
            clock.seek(-1.0),
            Err(ClockMisuse::OutOfRange { .. })
        ));
        assert_eq!(clock.time(), 3.0);
    }

    #[test]
    fn stop_rewinds() {
        let mut clock = clock(4.0);
        clock.seek(2.0).unwrap();
        clock.play();
        clock.stop();
        assert_eq!(clock.time(), 0.0);
    }

    #[test]
    fn negative_rate_is_clamped_when_reverse_is_disabled() {
        let mut clock = clock(4.0);
        clock.play();
        let outcome = clock.set_rate(-1.0).unwrap();
        assert_eq!(outcome.applied, 0.0);
        assert_eq!(outcome.clamped_from, Some(-1.0));
        assert_eq!(clock.state(), ClockState::Paused);
        assert_eq!(clock.rate(), 0.0);
    }

    #[test]
    fn reverse_playback_never_goes_negative() {
        let mut clock = reverse_clock(4.0);
        clock.seek(1.0).unwrap();
        clock.set_rate(-2.0).unwrap();
        clock.play();
        assert_relative_eq!(clock.advance(Duration::from_millis(250)), 0.5, epsilon = 1e-9);
        assert_eq!(clock.advance(Duration::from_secs(1)), 0.0);
    }

    #[test]
    fn reverse_loop_wraps_to_the_end() {
        let mut clock = reverse_clock(4.0);
        clock.set_loop(LoopPolicy::LoopToStart).unwrap();
        clock.set_rate(-1.0).unwrap();
        clock.play();
        assert_relative_eq!(clock.advance(Duration::from_millis(500)), 3.5, epsilon = 1e-9);
    }

    #[test]
    fn non_finite_rate_is_rejected() {
        let mut clock = clock(4.0);
        assert!(matches!(
            clock.set_rate(f64::INFINITY),
            Err(ClockMisuse::NonFiniteRate(_))
        ));
    }

    #[test]
    fn zero_rate_pauses_until_a_new_rate_is_set() {
        let mut clock = clock(4.0);
        clock.set_rate(2.0).unwrap();
        clock.play();
        let outcome = clock.set_rate(0.0).unwrap();
        assert!(outcome.transition.is_changed());
        assert_eq!(clock.rate(), 0.0);

        assert_eq!(clock.play(), ClockTransition::Unchanged);
        assert_eq!(clock.advance(Duration::from_millis(500)), 0.0);

        clock.set_rate(2.0).unwrap();
        clock.play();
        assert_relative_eq!(clock.advance(Duration::from_millis(500)), 1.0);
    }

    #[test]
    fn zero_rate_set_while_stopped_holds_the_next_play() {
        for requested in [0.0, -1.0] {
            let mut clock = clock(4.0);
            let outcome = clock.set_rate(requested).unwrap();
            assert_eq!(outcome.applied, 0.0);
            assert_eq!(outcome.transition, ClockTransition::Unchanged);

            assert_eq!(
                clock.play(),
                ClockTransition::Changed {
                    from: ClockState::Stopped,
                    to: ClockState::Paused
                }
            );
            assert_eq!(clock.advance(Duration::from_millis(500)), 0.0);
        }
    }
}

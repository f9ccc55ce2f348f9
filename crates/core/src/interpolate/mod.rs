//! Pure keyframe interpolation.
//!
//! Nothing here holds state, so channels can be sampled from any thread while
//! the scheduler is ticking.

use std::cmp::Ordering;

use crate::script::{Channel, InterpolationMode, Keyframe, Script};

/// Samples a channel at `time` seconds.
///
/// Times before the first keyframe hold the first value, times after the last
/// keyframe hold the last value. Loop wrapping is the caller's job.
pub fn value_at(channel: &Channel, time: f64) -> f64 {
    let keyframes = channel.keyframes();
    let (Some(first), Some(last)) = (keyframes.first(), keyframes.last()) else {
        return 0.0;
    };

    if !time.is_finite() || time <= first.time {
        return first.value;
    }
    if time >= last.time {
        return last.value;
    }

    match keyframes.binary_search_by(|k| k.time.partial_cmp(&time).unwrap_or(Ordering::Less)) {
        Ok(index) => keyframes[index].value,
        Err(index) => segment(&keyframes[index - 1], &keyframes[index], time),
    }
}

/// Samples every channel of `script`, in declaration order.
pub fn sample_script(script: &Script, time: f64) -> Vec<(&str, f64)> {
    script
        .channels()
        .iter()
        .map(|channel| (channel.id(), value_at(channel, time)))
        .collect()
}

/// Cubic ease with zero slope at both ends.
pub fn smoothstep(fraction: f64) -> f64 {
    let f = fraction.clamp(0.0, 1.0);
    f * f * (3.0 - 2.0 * f)
}

fn segment(from: &Keyframe, to: &Keyframe, time: f64) -> f64 {
    let span = to.time - from.time;
    let fraction = ((time - from.time) / span).clamp(0.0, 1.0);
    let delta = to.value - from.value;

    let value = match from.mode {
        InterpolationMode::Step => from.value,
        InterpolationMode::Linear => from.value + delta * fraction,
        InterpolationMode::Smooth => from.value + delta * smoothstep(fraction),
    };

    value.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    use super::*;
    use crate::mapping::ActuatorKind;

    fn channel(keyframes: Vec<Keyframe>) -> Channel {
        Channel::new("v", ActuatorKind::Vibrate, keyframes).unwrap()
    }

    fn ramp(mode: InterpolationMode) -> Channel {
        channel(vec![
            Keyframe::new(1.0, 0.2, mode),
            Keyframe::new(3.0, 0.8, mode),
        ])
    }

    #[test]
    fn holds_endpoints_without_extrapolating() {
        let ch = ramp(InterpolationMode::Linear);
        assert_eq!(value_at(&ch, 0.0), 0.2);
        assert_eq!(value_at(&ch, 10.0), 0.8);
        assert_eq!(value_at(&ch, f64::NAN), 0.2);
    }

    #[test]
    fn linear_midpoint() {
        let ch = ramp(InterpolationMode::Linear);
        assert_relative_eq!(value_at(&ch, 2.0), 0.5, epsilon = 1e-12);
    }

    #[test]
    fn step_holds_until_next_keyframe() {
        let ch = ramp(InterpolationMode::Step);
        assert_eq!(value_at(&ch, 2.999), 0.2);
        assert_eq!(value_at(&ch, 3.0), 0.8);
    }

    #[test]
    fn smooth_is_symmetric_and_flat_at_the_ends() {
        let ch = ramp(InterpolationMode::Smooth);
        assert_relative_eq!(value_at(&ch, 2.0), 0.5, epsilon = 1e-12);

        let near_start = value_at(&ch, 1.01) - 0.2;
        let linear_start = value_at(&ramp(InterpolationMode::Linear), 1.01) - 0.2;
        assert!(near_start < linear_start);
    }

    #[test]
    fn segment_mode_comes_from_the_leading_keyframe() {
        let ch = channel(vec![
            Keyframe::new(0.0, 0.0, InterpolationMode::Step),
            Keyframe::new(1.0, 1.0, InterpolationMode::Linear),
            Keyframe::new(2.0, 0.0, InterpolationMode::Linear),
        ]);
        assert_eq!(value_at(&ch, 0.5), 0.0);
        assert_relative_eq!(value_at(&ch, 1.5), 0.5, epsilon = 1e-12);
    }

    #[test]
    fn samples_whole_script_in_order() {
        let script = Script::from_channels(vec![
            ramp(InterpolationMode::Linear),
            Channel::new("r", ActuatorKind::Rotate, vec![Keyframe::linear(0.0, 0.4)]).unwrap(),
        ])
        .unwrap();

        let values = sample_script(&script, 2.0);
        assert_eq!(values[0].0, "v");
        assert_eq!(values[1], ("r", 0.4));
    }

    fn arbitrary_channel() -> impl Strategy<Value = Channel> {
        prop::collection::vec((0.001f64..5.0, 0.0f64..=1.0, 0usize..3), 1..12).prop_map(|points| {
            let mut time = 0.0;
            let keyframes = points
                .into_iter()
                .map(|(gap, value, mode)| {
                    time += gap;
                    let mode = match mode {
                        0 => InterpolationMode::Step,
                        1 => InterpolationMode::Linear,
                        _ => InterpolationMode::Smooth,
                    };
                    Keyframe::new(time, value, mode)
                })
                .collect();
            channel(keyframes)
        })
    }

    proptest! {
        #[test]
        fn exact_keyframe_times_return_exact_values(ch in arbitrary_channel()) {
            for keyframe in ch.keyframes() {
                prop_assert_eq!(value_at(&ch, keyframe.time), keyframe.value);
            }
        }

        #[test]
        fn values_stay_in_unit_range(ch in arbitrary_channel(), t in -1.0f64..80.0) {
            let value = value_at(&ch, t);
            prop_assert!((0.0..=1.0).contains(&value));
        }

        #[test]
        fn linear_rise_is_monotonic(
            v0 in 0.0f64..=1.0,
            rise in 0.0f64..=1.0,
            a in 0.0f64..=1.0,
            b in 0.0f64..=1.0,
        ) {
            let v1 = (v0 + rise).min(1.0);
            let ch = channel(vec![Keyframe::linear(0.0, v0), Keyframe::linear(1.0, v1)]);
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(value_at(&ch, lo) <= value_at(&ch, hi));
        }
    }
}

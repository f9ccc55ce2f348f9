//! Immutable script model and the decoders that build it.
//!
//! A [`Script`] is constructed once from validated input and never mutated.
//! Hosts share it behind an `Arc` and replace it wholesale when a new pattern
//! is loaded.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::{mapping::ActuatorKind, ParseError};

/// Curve shape used between a keyframe and its successor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterpolationMode {
    Step,
    #[default]
    Linear,
    Smooth,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Keyframe {
    pub time: f64,
    pub value: f64,
    #[serde(default)]
    pub mode: InterpolationMode,
}

impl Keyframe {
    pub fn new(time: f64, value: f64, mode: InterpolationMode) -> Self {
        Self { time, value, mode }
    }

    pub fn linear(time: f64, value: f64) -> Self {
        Self::new(time, value, InterpolationMode::Linear)
    }
}

/// A named control track. Keyframe times are strictly increasing.
#[derive(Debug, Clone, PartialEq)]
pub struct Channel {
    id: String,
    kind: ActuatorKind,
    keyframes: Vec<Keyframe>,
}

impl Channel {
    /// Builds a channel after checking every keyframe.
    pub fn new(
        id: impl Into<String>,
        kind: ActuatorKind,
        keyframes: Vec<Keyframe>,
    ) -> Result<Self, ParseError> {
        let id = id.into();
        if keyframes.is_empty() {
            return Err(ParseError::EmptyChannel(id));
        }

        let mut previous: Option<f64> = None;
        for (index, keyframe) in keyframes.iter().enumerate() {
            if !keyframe.time.is_finite() || keyframe.time < 0.0 {
                return Err(ParseError::InvalidTime {
                    channel: id,
                    index,
                    time: keyframe.time,
                });
            }
            if !(0.0..=1.0).contains(&keyframe.value) {
                return Err(ParseError::ValueOutOfRange {
                    channel: id,
                    index,
                    value: keyframe.value,
                });
            }
            if previous.is_some_and(|prev| keyframe.time <= prev) {
                return Err(ParseError::NonMonotonic {
                    channel: id,
                    index,
                    time: keyframe.time,
                });
            }
            previous = Some(keyframe.time);
        }

        Ok(Self {
            id,
            kind,
            keyframes,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Actuator kind this channel is meant to drive.
    pub fn kind(&self) -> ActuatorKind {
        self.kind
    }

    pub fn keyframes(&self) -> &[Keyframe] {
        &self.keyframes
    }

    /// Time of the last keyframe.
    pub fn end_time(&self) -> f64 {
        self.keyframes.last().map(|k| k.time).unwrap_or(0.0)
    }
}

/// Parsed, validated pattern. Channel order is declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct Script {
    channels: Vec<Channel>,
    duration: f64,
}

impl Script {
    /// Decodes either the native JSON encoding or a `.funscript` document.
    pub fn parse(raw: &str) -> Result<Self, ParseError> {
        let document: serde_json::Value =
            serde_json::from_str(raw).map_err(|err| ParseError::Malformed(err.to_string()))?;

        if document.get("actions").is_some() {
            let funscript: RawFunscript = serde_json::from_value(document)
                .map_err(|err| ParseError::Malformed(err.to_string()))?;
            return funscript.into_script();
        }

        let native: RawScript = serde_json::from_value(document)
            .map_err(|err| ParseError::Malformed(err.to_string()))?;
        native.into_script()
    }

    /// Assembles a script from already-built channels.
    pub fn from_channels(channels: Vec<Channel>) -> Result<Self, ParseError> {
        if channels.is_empty() {
            return Err(ParseError::NoChannels);
        }

        let mut seen = HashSet::new();
        for channel in &channels {
            if !seen.insert(channel.id.as_str()) {
                return Err(ParseError::DuplicateChannel(channel.id.clone()));
            }
        }

        let duration = channels
            .iter()
            .map(Channel::end_time)
            .fold(0.0_f64, f64::max);

        Ok(Self { channels, duration })
    }

    /// Latest keyframe time across all channels.
    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn channel(&self, id: &str) -> Option<&Channel> {
        self.channels.iter().find(|channel| channel.id == id)
    }
}

#[derive(Debug, Deserialize)]
struct RawScript {
    #[serde(default)]
    channels: Vec<RawChannel>,
}

#[derive(Debug, Deserialize)]
struct RawChannel {
    id: String,
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    keyframes: Vec<Keyframe>,
}

impl RawScript {
    fn into_script(self) -> Result<Script, ParseError> {
        let channels = self
            .channels
            .into_iter()
            .map(|raw| {
                let kind = match raw.kind.as_deref() {
                    Some(declared) => ActuatorKind::from_token(declared),
                    None => ActuatorKind::infer(&raw.id),
                }
                .ok_or_else(|| ParseError::UnknownKind(raw.id.clone()))?;
                Channel::new(raw.id, kind, raw.keyframes)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Script::from_channels(channels)
    }
}

/// Channel name given to the single track decoded from a funscript.
pub const FUNSCRIPT_CHANNEL: &str = "stroke";

#[derive(Debug, Deserialize)]
struct RawFunscript {
    actions: Vec<FunscriptAction>,
    #[serde(default)]
    inverted: bool,
}

#[derive(Debug, Deserialize)]
struct FunscriptAction {
    /// Milliseconds from the start of the media.
    at: f64,
    /// Position in percent.
    pos: f64,
}

impl RawFunscript {
    fn into_script(self) -> Result<Script, ParseError> {
        let keyframes = self
            .actions
            .iter()
            .enumerate()
            .map(|(index, action)| {
                if !(0.0..=100.0).contains(&action.pos) {
                    return Err(ParseError::ValueOutOfRange {
                        channel: FUNSCRIPT_CHANNEL.to_string(),
                        index,
                        value: action.pos,
                    });
                }
                let value = action.pos / 100.0;
                let value = if self.inverted { 1.0 - value } else { value };
                Ok(Keyframe::linear(action.at / 1000.0, value))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let channel = Channel::new(FUNSCRIPT_CHANNEL, ActuatorKind::LinearPosition, keyframes)?;
        Script::from_channels(vec![channel])
    }
}

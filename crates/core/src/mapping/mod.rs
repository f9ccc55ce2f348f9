use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// Closed set of actuator kinds a device can advertise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActuatorKind {
    Vibrate,
    Oscillate,
    Rotate,
    LinearPosition,
    Pressure,
}

/// How a normalized value is snapped onto an actuator's discrete steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantize {
    /// Round to the closest step.
    Nearest,
    /// Round up so any non-zero intensity produces at least one step.
    Ceil,
}

/// Static per-kind scaling behaviour.
#[derive(Debug, Clone, Copy)]
pub struct KindProfile {
    pub kind: ActuatorKind,
    pub name: &'static str,
    /// Step count assumed when a device advertises none.
    pub default_steps: u32,
    pub quantize: Quantize,
    /// Identifier tokens that declare this kind when a channel omits it.
    pub aliases: &'static [&'static str],
}

const KIND_TABLE: [KindProfile; 5] = [
    KindProfile {
        kind: ActuatorKind::Vibrate,
        name: "vibrate",
        default_steps: 20,
        quantize: Quantize::Ceil,
        aliases: &["v", "vibe", "vibrate", "vibration"],
    },
    KindProfile {
        kind: ActuatorKind::Oscillate,
        name: "oscillate",
        default_steps: 20,
        quantize: Quantize::Ceil,
        aliases: &["o", "osc", "oscillate", "oscillation"],
    },
    KindProfile {
        kind: ActuatorKind::Rotate,
        name: "rotate",
        default_steps: 20,
        quantize: Quantize::Nearest,
        aliases: &["r", "rot", "rotate", "rotation"],
    },
    KindProfile {
        kind: ActuatorKind::LinearPosition,
        name: "linear-position",
        default_steps: 100,
        quantize: Quantize::Nearest,
        aliases: &["l", "linear", "position", "pos", "stroke"],
    },
    KindProfile {
        kind: ActuatorKind::Pressure,
        name: "pressure",
        default_steps: 5,
        quantize: Quantize::Ceil,
        aliases: &["p", "pressure", "constrict", "air"],
    },
];

// Absorbs float noise such as 0.3 * 20 = 6.000000000000001 before ceil.
const CEIL_TOLERANCE: f64 = 1e-9;

impl ActuatorKind {
    pub const ALL: [ActuatorKind; 5] = [
        ActuatorKind::Vibrate,
        ActuatorKind::Oscillate,
        ActuatorKind::Rotate,
        ActuatorKind::LinearPosition,
        ActuatorKind::Pressure,
    ];

    /// Returns the scaling profile for this kind.
    pub fn profile(self) -> &'static KindProfile {
        KIND_TABLE
            .iter()
            .find(|profile| profile.kind == self)
            .unwrap_or(&KIND_TABLE[0])
    }

    pub fn as_str(self) -> &'static str {
        self.profile().name
    }

    /// Matches a single identifier token against the alias table.
    pub fn from_token(token: &str) -> Option<Self> {
        let token = token.to_ascii_lowercase();
        KIND_TABLE
            .iter()
            .find(|profile| {
                profile.name == token || profile.aliases.iter().any(|alias| *alias == token)
            })
            .map(|profile| profile.kind)
    }

    /// Infers a kind from a channel identifier such as `primary-vibrate`.
    ///
    /// The whole identifier is tried first, then each token split on `-`,
    /// `_`, `.` and whitespace. The first matching token wins.
    pub fn infer(identifier: &str) -> Option<Self> {
        Self::from_token(identifier).or_else(|| {
            identifier
                .split(|c: char| c == '-' || c == '_' || c == '.' || c.is_whitespace())
                .filter(|token| !token.is_empty())
                .find_map(Self::from_token)
        })
    }
}

impl fmt::Display for ActuatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActuatorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_token(s).ok_or_else(|| format!("unknown actuator kind `{s}`"))
    }
}

/// Value after it has been fitted to a concrete actuator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScaledValue {
    /// Quantized value, still normalized to `[0, 1]`.
    pub value: f64,
    /// Discrete step the device should be driven to.
    pub level: u32,
}

impl ScaledValue {
    pub const NEUTRAL: ScaledValue = ScaledValue {
        value: 0.0,
        level: 0,
    };
}

/// Fits a normalized channel value onto an actuator with `steps` discrete
/// levels. A `steps` of zero falls back to the kind's default.
pub fn scale(kind: ActuatorKind, steps: u32, value: f64) -> ScaledValue {
    let profile = kind.profile();
    let steps = if steps == 0 {
        profile.default_steps
    } else {
        steps
    };
    let value = if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    };
    let raw = value * steps as f64;
    let snapped = match profile.quantize {
        Quantize::Nearest => raw.round(),
        Quantize::Ceil => (raw - CEIL_TOLERANCE).ceil().max(0.0),
    };
    let level = snapped as u32;
    let level = level.min(steps);

    ScaledValue {
        value: level as f64 / steps as f64,
        level,
    }
}

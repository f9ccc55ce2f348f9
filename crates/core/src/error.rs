/// Result alias that carries the custom [`EngineError`] type.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The script handed to `load_script` could not be decoded.
    #[error("script rejected: {0}")]
    Parse(#[from] ParseError),
    /// A clock control call was given an argument it cannot honour.
    #[error("clock misuse: {0}")]
    Clock(#[from] ClockMisuse),
    /// Playback was requested before any script was loaded.
    #[error("no script loaded")]
    NoScript,
    /// A shared handle found its lock poisoned by a panicking holder.
    #[error("{0} has been poisoned")]
    Poisoned(&'static str),
    /// Configuration file could not be decoded.
    #[error("invalid configuration: {0}")]
    Config(#[source] serde_json::Error),
    /// Free-form message for host-level failures.
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }
}

impl From<String> for EngineError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}

/// Reasons a raw script is rejected.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error("malformed script: {0}")]
    Malformed(String),
    #[error("script declares no channels")]
    NoChannels,
    #[error("channel `{0}` has no keyframes")]
    EmptyChannel(String),
    #[error("channel `{0}` is declared more than once")]
    DuplicateChannel(String),
    #[error("cannot determine actuator kind for channel `{0}`")]
    UnknownKind(String),
    #[error("channel `{channel}` keyframe {index} has invalid time {time}")]
    InvalidTime {
        channel: String,
        index: usize,
        time: f64,
    },
    #[error("channel `{channel}` keyframe {index} value {value} is outside [0, 1]")]
    ValueOutOfRange {
        channel: String,
        index: usize,
        value: f64,
    },
    #[error("channel `{channel}` keyframe {index} at {time}s does not follow the previous keyframe")]
    NonMonotonic {
        channel: String,
        index: usize,
        time: f64,
    },
}

/// Clock control calls that are rejected without touching playback state.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ClockMisuse {
    #[error("time {0} is not a finite number")]
    NonFiniteTime(f64),
    #[error("time {time} is outside [0, {duration}]")]
    OutOfRange { time: f64, duration: f64 },
    #[error("rate {0} is not a finite number")]
    NonFiniteRate(f64),
    #[error("loop marker {marker} must lie within [0, {duration})")]
    InvalidMarker { marker: f64, duration: f64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_errors_convert_into_engine_errors() {
        let err: EngineError = ParseError::NoChannels.into();
        assert!(matches!(err, EngineError::Parse(ParseError::NoChannels)));
        assert!(format!("{err}").contains("no channels"));
    }

    #[test]
    fn formatted_messages_convert_with_question_mark() {
        fn run(seconds: f64) -> Result<()> {
            Err(format!("cannot run for {seconds} seconds"))?
        }
        let err = run(f64::INFINITY).unwrap_err();
        assert!(matches!(&err, EngineError::Message(_)));
        assert_eq!(format!("{err}"), format!("{}", EngineError::msg("cannot run for inf seconds")));
    }
}

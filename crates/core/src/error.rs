/// Result alias that carries the custom [`LaneBeatError`] type.
pub type Result<T> = std::result::Result<T, LaneBeatError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum LaneBeatError {
    /// Free-form failure message for conditions that do not warrant their own
    /// variant.
    #[error("{0}")]
    Message(String),
    /// Input rejected before it reached any shared state.
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    /// A lane index outside `0..LANE_COUNT`.
    #[error("lane {lane} is out of range (lane count is {lane_count})")]
    LaneOutOfRange { lane: u8, lane_count: u8 },
    /// A level index that does not exist in the beatmap bank.
    #[error("level {index} is out of range ({available} levels available)")]
    LevelOutOfRange { index: usize, available: usize },
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Configuration files that fail to parse.
    #[error("{0}")]
    Json(#[from] serde_json::Error),
}

impl LaneBeatError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }
}

impl From<&str> for LaneBeatError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for LaneBeatError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}

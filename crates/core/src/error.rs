/// Result alias that carries the custom [`AuroraError`] type.
pub type Result<T> = std::result::Result<T, AuroraError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum AuroraError {
    /// Free-form failure reported by a host or collaborator.
    #[error("{0}")]
    Message(String),
    /// A caller handed the core data it cannot work with.
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    /// The host refused to start playback, typically because no user gesture
    /// has been seen yet. Recoverable: the caller may retry later.
    #[error("playback rejected: {0}")]
    PlaybackRejected(String),
    /// The processing context could not be created or used.
    #[error("audio context: {0}")]
    Context(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Configuration could not be parsed.
    #[error("config: {0}")]
    Config(#[from] serde_json::Error),
    /// The FFT backend rejected a buffer.
    #[error("fft: {0}")]
    Fft(#[from] realfft::FftError),
}

impl AuroraError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    /// Returns true for conditions a caller can retry after user interaction.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::PlaybackRejected(_))
    }
}

impl From<&str> for AuroraError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for AuroraError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}

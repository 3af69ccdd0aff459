// Error types shared by every stage of the playback pipeline

use thiserror::Error;

/// Playback engine error types
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// The file could not be opened or read
    #[error("Unreadable file: {0}")]
    UnreadableFile(String),

    /// Container or codec is not supported
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// The bitstream was corrupt mid-stream
    #[error("Decode corruption: {0}")]
    DecodeCorruption(String),

    /// The audio output device failed
    #[error("Output device failure: {0}")]
    OutputDeviceFailure(String),

    /// Ring buffer is at capacity (internal, never reported to listeners)
    #[error("Buffer full")]
    BufferFull,

    /// Rejected state transition (internal)
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Thread/synchronization error
    #[error("Thread error: {0}")]
    ThreadError(String),
}

/// Fieldless discriminant of [`EngineError`], handy for matching in listeners
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    UnreadableFile,
    UnsupportedFormat,
    DecodeCorruption,
    OutputDeviceFailure,
    BufferFull,
    InvalidState,
    ThreadError,
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::UnreadableFile(_) => ErrorKind::UnreadableFile,
            EngineError::UnsupportedFormat(_) => ErrorKind::UnsupportedFormat,
            EngineError::DecodeCorruption(_) => ErrorKind::DecodeCorruption,
            EngineError::OutputDeviceFailure(_) => ErrorKind::OutputDeviceFailure,
            EngineError::BufferFull => ErrorKind::BufferFull,
            EngineError::InvalidState(_) => ErrorKind::InvalidState,
            EngineError::ThreadError(_) => ErrorKind::ThreadError,
        }
    }

    /// Whether the error ends the current playback session
    pub fn is_fatal(&self) -> bool {
        !matches!(self, EngineError::BufferFull)
    }
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::UnreadableFile(err.to_string())
    }
}

// Core types for the trackplay playback engine

pub mod callback;
pub mod config;
pub mod error;
pub mod state;
pub mod track;

// Re-export commonly used types
pub use callback::{ListenerSlot, PlaybackListener, PlayerEvent, PositionThrottle};
pub use config::EngineConfig;
pub use error::{EngineError, ErrorKind, Result};
pub use state::{PlaybackState, StateCell};
pub use track::{duration_to_frames, frames_to_duration, PcmChunk, Track};

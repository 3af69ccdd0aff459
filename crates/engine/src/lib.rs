// Single-track audio playback engine
//
// A decode thread fills a bounded PCM buffer, the output sink drains it on
// its own clock, and a control thread runs the playback state machine.

mod clock;
mod controller;
mod decoder;
mod dispatcher;
mod engine;
mod output;

pub use clock::{PositionClock, PositionSnapshot};
pub use engine::{Engine, EngineStats};

pub use trackplay_core::{
    EngineConfig, EngineError, ErrorKind, PlaybackListener, PlaybackState, PlayerEvent, Result,
    Track,
};
pub use trackplay_renderer::{
    default_sink_factory, AudioSpec, NullSinkFactory, OutputSink, PullSinkFactory,
    PullSinkHandle, SinkFactory,
};

#[cfg(feature = "cpal")]
pub use trackplay_renderer::CpalSinkFactory;

/// Install `env_logger` as the `log` backend
///
/// Honours `RUST_LOG` and defaults to `info`. Safe to call more than once.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
}

// Public playback engine: one track, one listener, commands applied on a control thread

use crate::clock::PositionClock;
use crate::controller::{ControlMsg, PlaybackController, SharedHandles};
use crate::dispatcher::EventDispatcher;
use crate::output::RenderShared;
use crossbeam_channel::Sender;
use once_cell::sync::OnceCell;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use trackplay_core::{
    EngineConfig, EngineError, ListenerSlot, PlaybackListener, PlaybackState, Result, StateCell,
    Track,
};
use trackplay_decode_symphonia::FormatProbe;
use trackplay_renderer::{default_sink_factory, SinkFactory};
use trackplay_ringbuffer::SharedRingBuffer;

/// Runtime counters of an engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EngineStats {
    /// Render callbacks that ran short of audio while playing
    pub underruns: u64,
    pub buffered_frames: usize,
    pub capacity_frames: usize,
    /// Frames rendered since the current session started
    pub frames_rendered: u64,
}

/// Single-track playback engine
///
/// Transport commands return immediately and are applied in order on the
/// engine's control thread; the outcome is reported to the listener.
///
/// ```no_run
/// use std::sync::Arc;
/// use trackplay::{Engine, PlaybackListener};
///
/// struct Printer;
/// impl PlaybackListener for Printer {
///     fn on_finished(&self) {
///         println!("done");
///     }
/// }
///
/// let listener = Arc::new(Printer);
/// let engine = Engine::new("song.flac").unwrap();
/// engine.set_listener(&listener);
/// engine.play();
/// ```
pub struct Engine {
    path: PathBuf,
    control_tx: Sender<ControlMsg>,
    shared: SharedHandles,
    listener: ListenerSlot,
    sync_read_timeout: Duration,
    controller: Option<thread::JoinHandle<()>>,
    dispatcher: EventDispatcher,
}

impl Engine {
    /// Whether the file at `path` can be played, reading only its header
    pub fn can_play(path: impl AsRef<Path>) -> bool {
        FormatProbe::can_play(path)
    }

    /// Engine with the default configuration and output
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        Self::with_options(path, EngineConfig::default(), default_sink_factory())
    }

    /// Engine with an explicit configuration and sink factory
    ///
    /// The header is read eagerly so `duration` is known right away. A file
    /// that cannot be read is not an error here: it fails on the first play.
    pub fn with_options(
        path: impl AsRef<Path>,
        config: EngineConfig,
        factory: Arc<dyn SinkFactory>,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let config = match config.validate() {
            Ok(()) => config,
            Err(e) => {
                log::warn!("{}, using default configuration", e);
                EngineConfig::default()
            }
        };

        let clock = Arc::new(PositionClock::new());
        let track = Arc::new(OnceCell::new());
        match FormatProbe::inspect(&path) {
            Ok(info) => {
                clock.configure(info.sample_rate, info.total_frames);
                let _ = track.set(info);
            }
            Err(e) => log::debug!("Deferring open of {}: {}", path.display(), e),
        }

        let shared = SharedHandles {
            state: StateCell::new(),
            clock,
            ring: SharedRingBuffer::new(config.buffer_capacity_frames(48000)),
            render: Arc::new(RenderShared::new()),
            track,
        };

        let listener = ListenerSlot::new();
        let (dispatcher, events) =
            EventDispatcher::spawn(listener.clone(), config.position_update_interval())?;

        let (control_tx, control_rx) = crossbeam_channel::unbounded();
        let sync_read_timeout = config.sync_read_timeout();
        let controller = PlaybackController::new(
            path.clone(),
            config,
            factory,
            shared.clone(),
            events,
            control_tx.clone(),
            control_rx,
        );
        let controller = thread::Builder::new()
            .name("trackplay-control".to_string())
            .spawn(move || controller.run())
            .map_err(|e| EngineError::ThreadError(format!("Failed to spawn control thread: {}", e)))?;

        log::info!("Engine created for {}", path.display());

        Ok(Self {
            path,
            control_tx,
            shared,
            listener,
            sync_read_timeout,
            controller: Some(controller),
            dispatcher,
        })
    }

    fn send(&self, msg: ControlMsg) {
        if self.control_tx.send(msg).is_err() {
            log::warn!("Control thread for {} is gone, command dropped", self.path.display());
        }
    }

    /// Start from the beginning, or resume when paused
    pub fn play(&self) {
        self.send(ControlMsg::Play);
    }

    /// Start or seek to `position`, clamped to the track length
    pub fn play_from(&self, position: Duration) {
        self.send(ControlMsg::PlayFrom(position));
    }

    /// Request a pause; `on_paused` runs once the engine is paused
    ///
    /// The callback is dropped without being called if the session ends
    /// first, or if nothing is playing.
    pub fn pause<F>(&self, on_paused: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.send(ControlMsg::Pause(Box::new(on_paused)));
    }

    /// Halt playback and release the output; idempotent
    pub fn stop(&self) {
        self.send(ControlMsg::Stop);
    }

    /// Playback position
    ///
    /// With `sync`, waits briefly for an in-flight render to complete so the
    /// value reflects the most recent audio handed to the output.
    pub fn current_position(&self, sync: bool) -> Duration {
        self.shared.clock.current_position(sync, self.sync_read_timeout)
    }

    /// Track length, or zero while the track has never been opened
    pub fn duration(&self) -> Duration {
        self.shared
            .track
            .get()
            .map(Track::duration)
            .unwrap_or(Duration::ZERO)
    }

    pub fn state(&self) -> PlaybackState {
        self.shared.state.get()
    }

    pub fn track(&self) -> Option<Track> {
        self.shared.track.get().cloned()
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            underruns: self.shared.render.underruns(),
            buffered_frames: self.shared.ring.buffered_frames(),
            capacity_frames: self.shared.ring.capacity_frames(),
            frames_rendered: self.shared.render.frames_rendered(),
        }
    }

    /// Register the listener without taking ownership of it
    pub fn set_listener<L: PlaybackListener + 'static>(&self, listener: &Arc<L>) {
        self.listener.set(listener);
    }

    pub fn clear_listener(&self) {
        self.listener.clear();
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        let _ = self.control_tx.send(ControlMsg::Shutdown);
        if let Some(controller) = self.controller.take() {
            if controller.join().is_err() {
                log::error!("Control thread panicked");
            }
        }
        // The controller held the last event sender
        self.dispatcher.join();
        log::debug!("Engine for {} dropped", self.path.display());
    }
}

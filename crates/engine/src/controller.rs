// Playback state machine, run on the engine's control thread

use crate::clock::PositionClock;
use crate::decoder::DecodeWorker;
use crate::output::{render_callback, RenderShared};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use once_cell::sync::OnceCell;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use trackplay_core::{EngineConfig, EngineError, PlaybackState, PlayerEvent, Result, StateCell, Track};
use trackplay_decode_symphonia::FrameSource;
use trackplay_renderer::{AudioSpec, OutputSink, SinkFactory};
use trackplay_ringbuffer::SharedRingBuffer;

/// Time without rendered audio while Playing before a stall is logged
const OUTPUT_STALL: Duration = Duration::from_secs(1);

/// One-shot continuation of a pause request
pub type PauseCallback = Box<dyn FnOnce() + Send + 'static>;

/// Everything the control thread reacts to
pub enum ControlMsg {
    Play,
    PlayFrom(Duration),
    Pause(PauseCallback),
    Stop,
    Shutdown,

    /// The render callback produced audio for this buffer epoch
    FirstRender { epoch: u64 },
    /// The render callback ran out of audio after end of stream
    Drained { epoch: u64 },
    DecodeFailed { session: u64, error: EngineError },
    OutputFailed { session: u64, error: EngineError },
}

/// Resources owned by one playback session
struct Session {
    id: u64,
    track: Track,
    sink: Box<dyn OutputSink>,
    worker: DecodeWorker,
    /// Reported by the next `onStartedPlaying`
    start_position: Duration,
}

/// Handles shared between the controller and the engine facade
#[derive(Clone)]
pub struct SharedHandles {
    pub state: StateCell,
    pub clock: Arc<PositionClock>,
    pub ring: SharedRingBuffer,
    pub render: Arc<RenderShared>,
    pub track: Arc<OnceCell<Track>>,
}

pub struct PlaybackController {
    path: PathBuf,
    config: EngineConfig,
    factory: Arc<dyn SinkFactory>,
    shared: SharedHandles,
    events: Sender<PlayerEvent>,
    control_tx: Sender<ControlMsg>,
    control_rx: Receiver<ControlMsg>,
    session: Option<Session>,
    next_session_id: u64,
    deferred_pauses: Vec<PauseCallback>,
    reported_underruns: u64,
    stall_reported: bool,
}

impl PlaybackController {
    pub fn new(
        path: PathBuf,
        config: EngineConfig,
        factory: Arc<dyn SinkFactory>,
        shared: SharedHandles,
        events: Sender<PlayerEvent>,
        control_tx: Sender<ControlMsg>,
        control_rx: Receiver<ControlMsg>,
    ) -> Self {
        Self {
            path,
            config,
            factory,
            shared,
            events,
            control_tx,
            control_rx,
            session: None,
            next_session_id: 1,
            deferred_pauses: Vec::new(),
            reported_underruns: 0,
            stall_reported: false,
        }
    }

    /// Process messages until shutdown
    pub fn run(mut self) {
        log::info!("Playback controller started for {}", self.path.display());

        let tick = self
            .config
            .position_update_interval()
            .unwrap_or(Duration::from_millis(250));
        let mut next_tick = Instant::now() + tick;

        loop {
            let timeout = next_tick.saturating_duration_since(Instant::now());
            match self.control_rx.recv_timeout(timeout) {
                Ok(ControlMsg::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                Ok(msg) => self.handle(msg),
                Err(RecvTimeoutError::Timeout) => {}
            }

            let now = Instant::now();
            if now >= next_tick {
                self.on_tick();
                next_tick = now + tick;
            }
        }

        // Dropping the engine ends the session without notifying
        self.teardown_session();
        self.deferred_pauses.clear();
        log::info!("Playback controller exited");
    }

    fn handle(&mut self, msg: ControlMsg) {
        match msg {
            ControlMsg::Play => self.on_play(None),
            ControlMsg::PlayFrom(target) => self.on_play(Some(target)),
            ControlMsg::Pause(on_paused) => self.on_pause(on_paused),
            ControlMsg::Stop => self.on_stop(),
            ControlMsg::Shutdown => {}
            ControlMsg::FirstRender { epoch } => self.on_first_render(epoch),
            ControlMsg::Drained { epoch } => self.on_drained(epoch),
            ControlMsg::DecodeFailed { session, error }
            | ControlMsg::OutputFailed { session, error } => {
                if !error.is_fatal() {
                    log::debug!("Session {} reported a transient error: {}", session, error);
                } else if self.session.as_ref().map(|s| s.id) == Some(session) {
                    self.fail(error);
                } else {
                    log::debug!("Ignoring failure from ended session {}: {}", session, error);
                }
            }
        }
    }

    fn state(&self) -> PlaybackState {
        self.shared.state.get()
    }

    fn transition(&self, to: PlaybackState) -> bool {
        match self.shared.state.transition(to) {
            Ok(_) => true,
            Err(e) => {
                log::warn!("{}", e);
                false
            }
        }
    }

    fn emit(&self, event: PlayerEvent) {
        let _ = self.events.send(event);
    }

    fn on_play(&mut self, target: Option<Duration>) {
        match (self.state(), target) {
            (state, _) if state == PlaybackState::Idle || state.is_terminal() => {
                self.start_session(target.unwrap_or(Duration::ZERO));
            }
            (PlaybackState::Paused, None) => self.resume(),
            (PlaybackState::Playing | PlaybackState::Starting | PlaybackState::Paused, Some(target)) => {
                self.seek(target)
            }
            (state, None) => log::debug!("Play ignored in state {:?}", state),
            (state, Some(_)) => log::warn!("Play from position dropped in state {:?}", state),
        }
    }

    fn on_pause(&mut self, on_paused: PauseCallback) {
        match self.state() {
            PlaybackState::Playing => self.pause(vec![on_paused]),
            // Already there: complete without a second notification
            PlaybackState::Paused => on_paused(),
            PlaybackState::Starting => {
                log::debug!("Pause deferred until playback starts");
                self.deferred_pauses.push(on_paused);
            }
            state => log::debug!("Pause dropped in state {:?}", state),
        }
    }

    fn on_stop(&mut self) {
        let state = self.state();
        if self.session.is_none() || !state.has_session() {
            log::debug!("Stop ignored in state {:?}", state);
            return;
        }

        if !self.transition(PlaybackState::Stopping) {
            return;
        }
        self.close_gate();
        let position = self.current_position();

        self.teardown_session();
        self.shared.clock.anchor(0);
        self.transition(PlaybackState::Stopped);

        // Superseded pause requests are dropped, never invoked
        self.deferred_pauses.clear();

        log::info!("Playback stopped at {:?}", position);
        self.emit(PlayerEvent::Stopped(position));
    }

    fn on_first_render(&mut self, epoch: u64) {
        if self.state() != PlaybackState::Starting || epoch != self.shared.ring.epoch() {
            return;
        }
        let Some(session) = &self.session else {
            return;
        };
        let start = session.start_position;

        self.transition(PlaybackState::Playing);
        log::info!("Playback started from {:?}", start);
        self.emit(PlayerEvent::StartedPlaying(start));

        if !self.deferred_pauses.is_empty() {
            let callbacks = std::mem::take(&mut self.deferred_pauses);
            self.pause(callbacks);
        }
    }

    fn on_drained(&mut self, epoch: u64) {
        if self.session.is_none() || epoch != self.shared.ring.epoch() {
            return;
        }

        match self.state() {
            PlaybackState::Starting => {
                // End of stream before anything was heard (e.g. playFrom at the very end)
                self.on_first_render(epoch);
                if self.state() != PlaybackState::Playing {
                    return;
                }
            }
            PlaybackState::Playing => {}
            _ => return,
        }

        self.teardown_session();
        self.transition(PlaybackState::Finished);
        self.deferred_pauses.clear();

        log::info!("Playback finished");
        self.emit(PlayerEvent::Finished);
    }

    fn start_session(&mut self, target: Duration) {
        if !self.transition(PlaybackState::Starting) {
            return;
        }

        match self.open_session(target) {
            Ok(session) => self.session = Some(session),
            Err(e) => {
                log::error!("Failed to start playback of {}: {}", self.path.display(), e);
                self.transition(PlaybackState::Failed);
                self.deferred_pauses.clear();
                self.emit(PlayerEvent::Failed(e));
            }
        }
    }

    fn open_session(&mut self, target: Duration) -> Result<Session> {
        let mut source = FrameSource::open(&self.path)?;
        let track = source.track().clone();
        if self.shared.track.set(track.clone()).is_err() {
            log::debug!("Track already described, keeping the first description");
        }
        self.shared.clock.configure(track.sample_rate, track.total_frames);

        let target = track.clamp_position(target);
        let start_position = if target > Duration::ZERO {
            source.seek(target)?
        } else {
            Duration::ZERO
        };

        let id = self.next_session_id;
        self.next_session_id += 1;

        let spec = AudioSpec {
            sample_rate: track.sample_rate,
            channels: track.channels,
            buffer_frames: self.config.render_buffer_frames,
        };
        let mut sink = self.factory.create_sink(spec)?;

        let capacity = self.config.buffer_capacity_frames(track.sample_rate);
        log::debug!(
            "Session {}: {} output, ring buffer {} frames, {} frames per render",
            id,
            self.factory.name(),
            capacity,
            spec.buffer_frames
        );
        self.shared.ring.reset(capacity);
        self.shared.render.begin_session();
        self.shared.clock.anchor(track.frame_at(start_position));

        sink.set_render_callback(render_callback(
            self.shared.ring.clone(),
            self.shared.clock.clone(),
            self.shared.render.clone(),
            self.shared.state.clone(),
            self.control_tx.clone(),
            track.channels,
        ))?;
        let control_tx = self.control_tx.clone();
        sink.set_error_callback(Arc::new(move |error| {
            let _ = control_tx.send(ControlMsg::OutputFailed { session: id, error });
        }));

        let worker = match DecodeWorker::spawn(
            source,
            self.shared.ring.clone(),
            self.shared.render.clone(),
            self.control_tx.clone(),
            id,
        ) {
            Ok(worker) => worker,
            Err(e) => {
                let _ = sink.release();
                return Err(e);
            }
        };

        self.shared.render.open_gate();
        if let Err(e) = sink.start() {
            self.close_gate();
            worker.stop(self.config.control_timeout());
            let _ = sink.release();
            return Err(e);
        }

        Ok(Session {
            id,
            track,
            sink,
            worker,
            start_position,
        })
    }

    fn pause(&mut self, callbacks: Vec<PauseCallback>) {
        if !self.transition(PlaybackState::Pausing) {
            return;
        }
        self.close_gate();

        let timeout = self.config.control_timeout();
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if let Err(e) = session.sink.pause() {
            self.fail(e);
            return;
        }
        if !session.worker.suspend(timeout) {
            log::warn!("Decoder did not reach a suspend point within {:?}", timeout);
        }

        self.transition(PlaybackState::Paused);
        for on_paused in callbacks {
            on_paused();
        }

        let position = self.current_position();
        log::info!("Playback paused at {:?}", position);
        self.emit(PlayerEvent::Paused(position));
    }

    fn resume(&mut self) {
        if !self.transition(PlaybackState::Starting) {
            return;
        }
        let position = self.current_position();
        let Some(session) = self.session.as_mut() else {
            return;
        };

        session.start_position = position;
        self.shared.render.arm_first_render();
        session.worker.resume();
        self.shared.render.open_gate();
        if let Err(e) = session.sink.resume() {
            self.fail(e);
        }
    }

    fn seek(&mut self, target: Duration) {
        let was_paused = self.state() == PlaybackState::Paused;
        if !self.transition(PlaybackState::Seeking) {
            return;
        }
        self.close_gate();

        let timeout = self.config.control_timeout();
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if !session.worker.suspend(timeout) {
            log::warn!("Decoder did not reach a suspend point within {:?}", timeout);
        }

        // Stale audio goes, and the render callback drops what it still holds
        self.shared.ring.clear();

        let target = session.track.clamp_position(target);
        let actual = match session.worker.seek(target, timeout) {
            Ok(actual) => actual,
            Err(e) => {
                self.fail(e);
                return;
            }
        };
        log::debug!("Seek to {:?} restarts at {:?}", target, actual);

        self.shared.clock.anchor(session.track.frame_at(actual));
        session.start_position = actual;
        self.shared.render.set_eos(false);
        self.shared.render.arm_first_render();
        session.worker.resume();

        self.transition(PlaybackState::Starting);
        self.shared.render.open_gate();
        if !was_paused {
            return;
        }
        if let Some(session) = self.session.as_mut() {
            if let Err(e) = session.sink.resume() {
                self.fail(e);
            }
        }
    }

    /// Tear down the session and report the error
    fn fail(&mut self, error: EngineError) {
        log::error!("Playback failed: {}", error);
        self.teardown_session();
        self.transition(PlaybackState::Failed);
        self.deferred_pauses.clear();
        self.emit(PlayerEvent::Failed(error));
    }

    fn close_gate(&self) {
        self.shared.render.close_gate();
        if !self.shared.clock.wait_render_idle(self.config.control_timeout()) {
            log::warn!("Render callback still busy after {:?}", self.config.control_timeout());
        }
    }

    fn current_position(&self) -> Duration {
        self.shared
            .clock
            .current_position(true, self.config.sync_read_timeout())
    }

    fn teardown_session(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        self.close_gate();

        session.worker.stop(self.config.control_timeout());
        self.shared.ring.clear();
        self.shared.render.set_eos(false);
        if let Err(e) = session.sink.release() {
            log::warn!("Failed to release output sink: {}", e);
        }
        log::debug!("Session {} torn down", session.id);
    }

    fn on_tick(&mut self) {
        if self.state() == PlaybackState::Playing {
            if self.config.position_update_interval().is_some() {
                let position = self.shared.clock.current_position(false, Duration::ZERO);
                self.emit(PlayerEvent::PositionUpdate(position));
            }

            let idle = self.shared.clock.snapshot().committed_at.elapsed();
            if idle < OUTPUT_STALL {
                self.stall_reported = false;
            } else if !self.stall_reported {
                log::warn!("No audio rendered for {:?}", idle);
                self.stall_reported = true;
            }
        }

        let underruns = self.shared.render.underruns();
        if underruns > self.reported_underruns {
            log::warn!(
                "{} buffer underruns while playing",
                underruns - self.reported_underruns
            );
            self.reported_underruns = underruns;
        }
    }
}

// Listener interface and event types for playback notifications
// Position updates are throttled so the listener is not flooded per rendered chunk

use crate::error::EngineError;
use parking_lot::RwLock;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

/// Player event types
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    /// Periodic position while playing
    PositionUpdate(Duration),

    /// First audio of a session (or after a seek/resume) was rendered
    StartedPlaying(Duration),

    /// Playback paused at the given position
    Paused(Duration),

    /// Playback stopped at the given position
    Stopped(Duration),

    /// End of stream was rendered
    Finished,

    /// Playback failed
    Failed(EngineError),
}

impl PlayerEvent {
    pub fn is_position_update(&self) -> bool {
        matches!(self, PlayerEvent::PositionUpdate(_))
    }

    /// Invoke the matching listener method
    pub fn deliver(&self, listener: &dyn PlaybackListener) {
        match self {
            PlayerEvent::PositionUpdate(position) => listener.on_position_update(*position),
            PlayerEvent::StartedPlaying(position) => listener.on_started_playing(*position),
            PlayerEvent::Paused(position) => listener.on_paused(*position),
            PlayerEvent::Stopped(position) => listener.on_stopped(*position),
            PlayerEvent::Finished => listener.on_finished(),
            PlayerEvent::Failed(error) => listener.on_failed(error),
        }
    }
}

/// Playback listener
///
/// All calls arrive on the engine's dispatch thread, one at a time and in
/// the order the events happened. Implementations should return quickly.
pub trait PlaybackListener: Send + Sync {
    fn on_position_update(&self, _position: Duration) {}

    fn on_finished(&self) {}

    fn on_stopped(&self, _position: Duration) {}

    fn on_paused(&self, _position: Duration) {}

    fn on_started_playing(&self, _position: Duration) {}

    fn on_failed(&self, _error: &EngineError) {}
}

/// Drops position updates arriving faster than the configured interval
///
/// Other events are never throttled.
pub struct PositionThrottle {
    interval: Option<Duration>,
    last_position_update: Option<Instant>,
}

impl PositionThrottle {
    /// `None` suppresses position updates entirely
    pub fn new(interval: Option<Duration>) -> Self {
        Self {
            interval,
            last_position_update: None,
        }
    }

    pub fn admit(&mut self, event: &PlayerEvent, now: Instant) -> bool {
        if !event.is_position_update() {
            return true;
        }

        let Some(interval) = self.interval else {
            return false;
        };

        match self.last_position_update {
            Some(last) if now.saturating_duration_since(last) < interval => false,
            _ => {
                self.last_position_update = Some(now);
                true
            }
        }
    }
}

/// Non-owning registration of the single listener
#[derive(Clone, Default)]
pub struct ListenerSlot {
    inner: Arc<RwLock<Option<Weak<dyn PlaybackListener>>>>,
}

impl ListenerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set<L: PlaybackListener + 'static>(&self, listener: &Arc<L>) {
        let listener: Arc<dyn PlaybackListener> = listener.clone();
        *self.inner.write() = Some(Arc::downgrade(&listener));
    }

    pub fn clear(&self) {
        *self.inner.write() = None;
    }

    /// The listener, if one is registered and still alive
    pub fn get(&self) -> Option<Arc<dyn PlaybackListener>> {
        self.inner.read().as_ref().and_then(Weak::upgrade)
    }
}

#[cfg(test)]
pub(crate) struct TestListener {
    events: parking_lot::Mutex<Vec<PlayerEvent>>,
}

#[cfg(test)]
impl TestListener {
    pub fn new() -> Self {
        Self {
            events: parking_lot::Mutex::new(Vec::new()),
        }
    }

    pub fn get_events(&self) -> Vec<PlayerEvent> {
        self.events.lock().clone()
    }
}

#[cfg(test)]
impl PlaybackListener for TestListener {
    fn on_position_update(&self, position: Duration) {
        self.events.lock().push(PlayerEvent::PositionUpdate(position));
    }

    fn on_finished(&self) {
        self.events.lock().push(PlayerEvent::Finished);
    }

    fn on_stopped(&self, position: Duration) {
        self.events.lock().push(PlayerEvent::Stopped(position));
    }

    fn on_paused(&self, position: Duration) {
        self.events.lock().push(PlayerEvent::Paused(position));
    }

    fn on_started_playing(&self, position: Duration) {
        self.events.lock().push(PlayerEvent::StartedPlaying(position));
    }

    fn on_failed(&self, error: &EngineError) {
        self.events.lock().push(PlayerEvent::Failed(error.clone()));
    }
}

// Serialized delivery of player events to the registered listener

use crossbeam_channel::{Receiver, Sender};
use std::thread;
use std::time::{Duration, Instant};
use trackplay_core::{EngineError, ListenerSlot, PlayerEvent, PositionThrottle, Result};

/// Delivers events one at a time, in order, on a dedicated thread
///
/// The thread exits once every sender has been dropped and the queue is
/// empty.
pub struct EventDispatcher {
    handle: Option<thread::JoinHandle<()>>,
}

impl EventDispatcher {
    /// Start the delivery thread, returning the sender events are queued on
    pub fn spawn(
        listener: ListenerSlot,
        position_interval: Option<Duration>,
    ) -> Result<(Self, Sender<PlayerEvent>)> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let handle = thread::Builder::new()
            .name("trackplay-events".to_string())
            .spawn(move || run(rx, listener, PositionThrottle::new(position_interval)))
            .map_err(|e| EngineError::ThreadError(format!("Failed to spawn event thread: {}", e)))?;

        Ok((
            Self {
                handle: Some(handle),
            },
            tx,
        ))
    }

    /// Wait for queued events to be delivered; all senders must be gone
    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Listener panicked on the event thread");
            }
        }
    }
}

fn run(rx: Receiver<PlayerEvent>, listener: ListenerSlot, mut throttle: PositionThrottle) {
    for event in rx.iter() {
        if !throttle.admit(&event, Instant::now()) {
            continue;
        }

        match listener.get() {
            Some(listener) => event.deliver(listener.as_ref()),
            None => log::trace!("No listener for {:?}", event),
        }
    }
    log::debug!("Event dispatcher exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use trackplay_core::PlaybackListener;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<PlayerEvent>>,
    }

    impl PlaybackListener for Recorder {
        fn on_position_update(&self, position: Duration) {
            self.events.lock().push(PlayerEvent::PositionUpdate(position));
        }

        fn on_started_playing(&self, position: Duration) {
            self.events.lock().push(PlayerEvent::StartedPlaying(position));
        }

        fn on_stopped(&self, position: Duration) {
            self.events.lock().push(PlayerEvent::Stopped(position));
        }

        fn on_finished(&self) {
            self.events.lock().push(PlayerEvent::Finished);
        }
    }

    #[test]
    fn test_delivers_in_order() {
        let slot = ListenerSlot::new();
        let recorder = Arc::new(Recorder::default());
        slot.set(&recorder);

        let (mut dispatcher, tx) = EventDispatcher::spawn(slot, None).unwrap();
        tx.send(PlayerEvent::StartedPlaying(Duration::ZERO)).unwrap();
        tx.send(PlayerEvent::PositionUpdate(Duration::from_millis(100))).unwrap();
        tx.send(PlayerEvent::Stopped(Duration::from_secs(1))).unwrap();
        tx.send(PlayerEvent::Finished).unwrap();
        drop(tx);
        dispatcher.join();

        // Position updates are disabled, everything else arrives in order
        assert_eq!(
            *recorder.events.lock(),
            vec![
                PlayerEvent::StartedPlaying(Duration::ZERO),
                PlayerEvent::Stopped(Duration::from_secs(1)),
                PlayerEvent::Finished,
            ]
        );
    }

    #[test]
    fn test_coalesces_position_updates() {
        let slot = ListenerSlot::new();
        let recorder = Arc::new(Recorder::default());
        slot.set(&recorder);

        let (mut dispatcher, tx) =
            EventDispatcher::spawn(slot, Some(Duration::from_secs(60))).unwrap();
        for ms in 0..50 {
            tx.send(PlayerEvent::PositionUpdate(Duration::from_millis(ms))).unwrap();
        }
        drop(tx);
        dispatcher.join();

        assert_eq!(
            *recorder.events.lock(),
            vec![PlayerEvent::PositionUpdate(Duration::ZERO)]
        );
    }

    #[test]
    fn test_does_not_keep_listener_alive() {
        let slot = ListenerSlot::new();
        let recorder = Arc::new(Recorder::default());
        slot.set(&recorder);
        let weak = Arc::downgrade(&recorder);

        let (mut dispatcher, tx) = EventDispatcher::spawn(slot, None).unwrap();
        drop(recorder);
        assert!(weak.upgrade().is_none());

        // Events for a dropped listener are discarded quietly
        tx.send(PlayerEvent::Finished).unwrap();
        drop(tx);
        dispatcher.join();
    }
}

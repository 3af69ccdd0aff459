// Bounded PCM chunk queue between the decode loop and the render callback
// Capacity is measured in audio frames so memory and latency stay predictable

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use trackplay_core::{EngineError, PcmChunk};

/// Why a chunk was not queued; the chunk is handed back
#[derive(Debug)]
pub enum PushError {
    /// No room (non-blocking push only)
    Full(PcmChunk),
    /// The producer was asked to look at its control messages
    Interrupted(PcmChunk),
    /// The buffer was closed for shutdown
    Closed(PcmChunk),
}

impl PushError {
    pub fn into_chunk(self) -> PcmChunk {
        match self {
            PushError::Full(chunk) | PushError::Interrupted(chunk) | PushError::Closed(chunk) => {
                chunk
            }
        }
    }
}

impl From<PushError> for EngineError {
    fn from(err: PushError) -> Self {
        match err {
            PushError::Full(_) => EngineError::BufferFull,
            PushError::Interrupted(_) => EngineError::ThreadError("push interrupted".to_string()),
            PushError::Closed(_) => EngineError::ThreadError("ring buffer closed".to_string()),
        }
    }
}

/// Frame-bounded chunk queue
pub struct PcmRingBuffer {
    chunks: VecDeque<PcmChunk>,
    buffered_frames: usize,
    capacity_frames: usize,
}

impl PcmRingBuffer {
    pub fn new(capacity_frames: usize) -> Self {
        Self {
            chunks: VecDeque::new(),
            buffered_frames: 0,
            capacity_frames: capacity_frames.max(1),
        }
    }

    /// Queue a chunk if it fits
    ///
    /// A chunk larger than the whole capacity is still accepted into an
    /// empty buffer, otherwise the producer could never make progress.
    pub fn write(&mut self, chunk: PcmChunk) -> Result<(), PcmChunk> {
        let frames = chunk.frames();
        if self.buffered_frames > 0 && self.buffered_frames + frames > self.capacity_frames {
            return Err(chunk);
        }

        self.buffered_frames += frames;
        self.chunks.push_back(chunk);
        Ok(())
    }

    pub fn read(&mut self) -> Option<PcmChunk> {
        let chunk = self.chunks.pop_front()?;
        self.buffered_frames -= chunk.frames();
        Some(chunk)
    }

    pub fn available_write(&self) -> usize {
        self.capacity_frames.saturating_sub(self.buffered_frames)
    }

    pub fn buffered_frames(&self) -> usize {
        self.buffered_frames
    }

    pub fn capacity_frames(&self) -> usize {
        self.capacity_frames
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
        self.buffered_frames = 0;
    }

    /// Change the capacity; clears all queued audio
    pub fn resize(&mut self, capacity_frames: usize) {
        self.clear();
        self.capacity_frames = capacity_frames.max(1);
    }
}

struct Shared {
    buffer: PcmRingBuffer,
    /// Bumped by every clear so consumers can drop chunks they still hold
    epoch: u64,
    interrupted: bool,
    closed: bool,
}

/// Thread-safe wrapper for PcmRingBuffer
///
/// Single producer (the decode loop) and single consumer (the render
/// callback). `push` blocks while the buffer is full; `pop` never waits.
#[derive(Clone)]
pub struct SharedRingBuffer {
    inner: Arc<(Mutex<Shared>, Condvar)>,
}

impl SharedRingBuffer {
    pub fn new(capacity_frames: usize) -> Self {
        Self {
            inner: Arc::new((
                Mutex::new(Shared {
                    buffer: PcmRingBuffer::new(capacity_frames),
                    epoch: 0,
                    interrupted: false,
                    closed: false,
                }),
                Condvar::new(),
            )),
        }
    }

    /// Queue a chunk, waiting for room
    ///
    /// Returns early when the buffer is interrupted or closed.
    pub fn push(&self, chunk: PcmChunk) -> Result<(), PushError> {
        let (lock, not_full) = &*self.inner;
        let mut shared = lock.lock();
        let mut chunk = chunk;

        loop {
            if shared.closed {
                return Err(PushError::Closed(chunk));
            }
            if shared.interrupted {
                return Err(PushError::Interrupted(chunk));
            }

            match shared.buffer.write(chunk) {
                Ok(()) => return Ok(()),
                Err(rejected) => {
                    chunk = rejected;
                    not_full.wait(&mut shared);
                }
            }
        }
    }

    /// Queue a chunk without waiting
    pub fn try_push(&self, chunk: PcmChunk) -> Result<(), PushError> {
        let (lock, _) = &*self.inner;
        let mut shared = lock.lock();

        if shared.closed {
            return Err(PushError::Closed(chunk));
        }
        shared.buffer.write(chunk).map_err(PushError::Full)
    }

    /// Take the oldest chunk; `None` means underrun
    pub fn pop(&self) -> Option<PcmChunk> {
        let (lock, not_full) = &*self.inner;
        let chunk = lock.lock().buffer.read();
        if chunk.is_some() {
            not_full.notify_one();
        }
        chunk
    }

    /// Drop all queued audio
    pub fn clear(&self) {
        let (lock, not_full) = &*self.inner;
        {
            let mut shared = lock.lock();
            shared.buffer.clear();
            shared.epoch += 1;
        }
        not_full.notify_all();
    }

    /// Make a pending or future `push` return `Interrupted` until cleared
    pub fn interrupt(&self) {
        let (lock, not_full) = &*self.inner;
        lock.lock().interrupted = true;
        not_full.notify_all();
    }

    /// Reset the interrupt flag, returning whether it was set
    pub fn clear_interrupt(&self) -> bool {
        let (lock, _) = &*self.inner;
        std::mem::replace(&mut lock.lock().interrupted, false)
    }

    /// Refuse all further pushes and wake a blocked producer
    pub fn close(&self) {
        let (lock, not_full) = &*self.inner;
        lock.lock().closed = true;
        not_full.notify_all();
    }

    /// Prepare for a new session with the given capacity
    pub fn reset(&self, capacity_frames: usize) {
        let (lock, not_full) = &*self.inner;
        {
            let mut shared = lock.lock();
            shared.buffer.resize(capacity_frames);
            shared.epoch += 1;
            shared.interrupted = false;
            shared.closed = false;
        }
        not_full.notify_all();
    }

    pub fn epoch(&self) -> u64 {
        self.inner.0.lock().epoch
    }

    pub fn is_closed(&self) -> bool {
        self.inner.0.lock().closed
    }

    pub fn buffered_frames(&self) -> usize {
        self.inner.0.lock().buffer.buffered_frames()
    }

    pub fn capacity_frames(&self) -> usize {
        self.inner.0.lock().buffer.capacity_frames()
    }

    pub fn available_write(&self) -> usize {
        self.inner.0.lock().buffer.available_write()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.0.lock().buffer.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    fn chunk(frames: usize, start_frame: u64) -> PcmChunk {
        PcmChunk::new(vec![0.25; frames * 2], 2, start_frame)
    }

    #[test]
    fn test_capacity_counts_frames_not_chunks() {
        let mut buffer = PcmRingBuffer::new(1000);
        assert!(buffer.write(chunk(400, 0)).is_ok());
        assert!(buffer.write(chunk(400, 400)).is_ok());
        assert!(buffer.write(chunk(400, 800)).is_err());
        assert_eq!(buffer.buffered_frames(), 800);
        assert_eq!(buffer.available_write(), 200);
        assert!(buffer.write(chunk(200, 800)).is_ok());
        assert_eq!(buffer.buffered_frames(), 1000);
    }

    #[test]
    fn test_oversized_chunk_enters_empty_buffer() {
        let mut buffer = PcmRingBuffer::new(100);
        assert!(buffer.write(chunk(500, 0)).is_ok());
        assert_eq!(buffer.buffered_frames(), 500);
        assert_eq!(buffer.available_write(), 0);
        assert!(buffer.write(chunk(1, 500)).is_err());
    }

    #[test]
    fn test_read_preserves_order() {
        let mut buffer = PcmRingBuffer::new(10_000);
        for i in 0..5 {
            buffer.write(chunk(100, i * 100)).unwrap();
        }
        let starts: Vec<u64> = std::iter::from_fn(|| buffer.read())
            .map(|c| c.start_frame)
            .collect();
        assert_eq!(starts, vec![0, 100, 200, 300, 400]);
        assert_eq!(buffer.buffered_frames(), 0);
    }

    #[test]
    fn test_try_push_reports_full() {
        let ring = SharedRingBuffer::new(100);
        ring.try_push(chunk(100, 0)).unwrap();
        let err = ring.try_push(chunk(10, 100)).unwrap_err();
        assert!(matches!(err, PushError::Full(_)));
        assert_eq!(EngineError::from(err), EngineError::BufferFull);
    }

    #[test]
    fn test_push_blocks_until_consumer_pops() {
        let ring = SharedRingBuffer::new(1000);
        let pushed = Arc::new(AtomicUsize::new(0));

        let producer = {
            let ring = ring.clone();
            let pushed = pushed.clone();
            thread::spawn(move || {
                for i in 0..10 {
                    ring.push(chunk(250, i * 250)).unwrap();
                    pushed.fetch_add(1, Ordering::SeqCst);
                }
            })
        };

        thread::sleep(Duration::from_millis(100));
        // Output stalled: the producer is held at capacity
        assert_eq!(pushed.load(Ordering::SeqCst), 4);
        assert_eq!(ring.buffered_frames(), 1000);

        let mut next_start = 0;
        while next_start < 2500 {
            match ring.pop() {
                Some(c) => {
                    assert_eq!(c.start_frame, next_start);
                    next_start = c.end_frame();
                }
                None => thread::sleep(Duration::from_millis(1)),
            }
            assert!(ring.buffered_frames() <= 1000);
        }

        producer.join().unwrap();
        assert_eq!(pushed.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_interrupt_wakes_blocked_producer() {
        let ring = SharedRingBuffer::new(100);
        ring.push(chunk(100, 0)).unwrap();

        let producer = {
            let ring = ring.clone();
            thread::spawn(move || ring.push(chunk(100, 100)))
        };

        thread::sleep(Duration::from_millis(50));
        ring.interrupt();
        let result = producer.join().unwrap();
        match result {
            Err(PushError::Interrupted(c)) => assert_eq!(c.start_frame, 100),
            other => panic!("expected interrupt, got {:?}", other),
        }

        // Sticky until acknowledged
        assert!(matches!(ring.push(chunk(1, 0)), Err(PushError::Interrupted(_))));
        assert!(ring.clear_interrupt());
        assert!(!ring.clear_interrupt());
    }

    #[test]
    fn test_close_wakes_blocked_producer() {
        let ring = SharedRingBuffer::new(100);
        ring.push(chunk(100, 0)).unwrap();

        let producer = {
            let ring = ring.clone();
            thread::spawn(move || ring.push(chunk(100, 100)))
        };

        thread::sleep(Duration::from_millis(50));
        ring.close();
        assert!(matches!(producer.join().unwrap(), Err(PushError::Closed(_))));
        assert!(ring.is_closed());
    }

    #[test]
    fn test_clear_bumps_epoch_and_frees_room() {
        let ring = SharedRingBuffer::new(100);
        ring.push(chunk(100, 0)).unwrap();
        let epoch = ring.epoch();

        ring.clear();
        assert_eq!(ring.epoch(), epoch + 1);
        assert!(ring.is_empty());
        assert!(ring.pop().is_none());
        assert!(ring.try_push(chunk(100, 0)).is_ok());
    }

    #[test]
    fn test_reset_reopens_with_new_capacity() {
        let ring = SharedRingBuffer::new(100);
        ring.close();
        ring.interrupt();

        ring.reset(4800);
        assert!(!ring.is_closed());
        assert_eq!(ring.capacity_frames(), 4800);
        assert!(ring.push(chunk(1000, 0)).is_ok());
    }
}

// Render adapter between the ring buffer and an output sink

use crate::clock::PositionClock;
use crate::controller::ControlMsg;
use crossbeam_channel::Sender;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use trackplay_core::{PcmChunk, PlaybackState, StateCell};
use trackplay_renderer::RenderCallback;
use trackplay_ringbuffer::SharedRingBuffer;

/// Flags and counters shared by the render callback and the controller
pub struct RenderShared {
    /// Render callback only consumes audio while open
    gate: AtomicBool,
    /// The decode loop has queued its last chunk
    eos: AtomicBool,
    /// Report the next non-empty render to the controller
    first_render_pending: AtomicBool,
    /// End of stream was already reported for the current run
    drained_sent: AtomicBool,
    underruns: AtomicU64,
    frames_rendered: AtomicU64,
}

impl RenderShared {
    pub fn new() -> Self {
        Self {
            gate: AtomicBool::new(false),
            eos: AtomicBool::new(false),
            first_render_pending: AtomicBool::new(false),
            drained_sent: AtomicBool::new(false),
            underruns: AtomicU64::new(0),
            frames_rendered: AtomicU64::new(0),
        }
    }

    /// Reset per-session flags and counters
    pub fn begin_session(&self) {
        self.gate.store(false, Ordering::SeqCst);
        self.eos.store(false, Ordering::SeqCst);
        self.first_render_pending.store(true, Ordering::SeqCst);
        self.drained_sent.store(false, Ordering::SeqCst);
        self.frames_rendered.store(0, Ordering::Relaxed);
    }

    pub fn open_gate(&self) {
        self.gate.store(true, Ordering::SeqCst);
    }

    /// Stop consuming audio; pair with `PositionClock::wait_render_idle`
    pub fn close_gate(&self) {
        self.gate.store(false, Ordering::SeqCst);
    }

    pub fn is_open(&self) -> bool {
        self.gate.load(Ordering::SeqCst)
    }

    pub fn set_eos(&self, eos: bool) {
        self.eos.store(eos, Ordering::SeqCst);
    }

    pub fn is_eos(&self) -> bool {
        self.eos.load(Ordering::SeqCst)
    }

    /// Report the next render, and end of stream again, after a resume or seek
    pub fn arm_first_render(&self) {
        self.first_render_pending.store(true, Ordering::SeqCst);
        self.drained_sent.store(false, Ordering::SeqCst);
    }

    pub fn underruns(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered.load(Ordering::Relaxed)
    }
}

impl Default for RenderShared {
    fn default() -> Self {
        Self::new()
    }
}

/// Partially consumed chunk carried over between callbacks
struct Leftover {
    chunk: PcmChunk,
    offset: usize,
    epoch: u64,
}

struct RenderAdapter {
    ring: SharedRingBuffer,
    clock: Arc<PositionClock>,
    shared: Arc<RenderShared>,
    state: StateCell,
    control_tx: Sender<ControlMsg>,
    channels: usize,
    leftover: Option<Leftover>,
}

impl RenderAdapter {
    fn render(&mut self, data: &mut [f32]) -> usize {
        self.clock.begin_render();
        if !self.shared.is_open() {
            self.clock.advance(0);
            return 0;
        }

        let epoch = self.ring.epoch();
        if self.leftover.as_ref().is_some_and(|l| l.epoch != epoch) {
            self.leftover = None;
        }

        let mut written = 0;
        while written < data.len() {
            let mut leftover = match self.leftover.take() {
                Some(leftover) => leftover,
                None => match self.ring.pop() {
                    Some(chunk) => Leftover {
                        chunk,
                        offset: 0,
                        epoch,
                    },
                    None => break,
                },
            };

            let available = &leftover.chunk.samples[leftover.offset..];
            let n = available.len().min(data.len() - written);
            data[written..written + n].copy_from_slice(&available[..n]);
            written += n;
            leftover.offset += n;

            if leftover.offset < leftover.chunk.samples.len() {
                self.leftover = Some(leftover);
            }
        }

        let frames = (written / self.channels) as u64;
        self.clock.advance(frames);
        self.shared.frames_rendered.fetch_add(frames, Ordering::Relaxed);

        if frames > 0 && self.shared.first_render_pending.swap(false, Ordering::SeqCst) {
            let _ = self.control_tx.send(ControlMsg::FirstRender { epoch });
        }

        if written < data.len() {
            if self.shared.is_eos() && self.leftover.is_none() && self.ring.is_empty() {
                if !self.shared.drained_sent.swap(true, Ordering::SeqCst) {
                    let _ = self.control_tx.send(ControlMsg::Drained { epoch });
                }
            } else if self.state.get() == PlaybackState::Playing {
                self.shared.underruns.fetch_add(1, Ordering::Relaxed);
            }
        }

        written
    }
}

/// Build the render callback handed to the output sink
pub fn render_callback(
    ring: SharedRingBuffer,
    clock: Arc<PositionClock>,
    shared: Arc<RenderShared>,
    state: StateCell,
    control_tx: Sender<ControlMsg>,
    channels: u16,
) -> RenderCallback {
    let mut adapter = RenderAdapter {
        ring,
        clock,
        shared,
        state,
        control_tx,
        channels: channels.max(1) as usize,
        leftover: None,
    };
    Box::new(move |data: &mut [f32]| adapter.render(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::Receiver;

    struct Harness {
        ring: SharedRingBuffer,
        clock: Arc<PositionClock>,
        shared: Arc<RenderShared>,
        state: StateCell,
        control_rx: Receiver<ControlMsg>,
        callback: RenderCallback,
    }

    fn harness() -> Harness {
        let ring = SharedRingBuffer::new(8000);
        let clock = Arc::new(PositionClock::new());
        clock.configure(8000, 80_000);
        let shared = Arc::new(RenderShared::new());
        let state = StateCell::new();
        let (control_tx, control_rx) = crossbeam_channel::unbounded();

        let callback = render_callback(
            ring.clone(),
            clock.clone(),
            shared.clone(),
            state.clone(),
            control_tx,
            2,
        );
        shared.begin_session();
        Harness {
            ring,
            clock,
            shared,
            state,
            control_rx,
            callback,
        }
    }

    fn chunk(frames: usize, start_frame: u64) -> PcmChunk {
        PcmChunk::new(vec![0.5; frames * 2], 2, start_frame)
    }

    #[test]
    fn test_closed_gate_renders_nothing() {
        let mut h = harness();
        h.ring.push(chunk(100, 0)).unwrap();

        let mut data = vec![1.0f32; 64];
        assert_eq!((h.callback)(&mut data), 0);
        assert_eq!(h.ring.buffered_frames(), 100);
        assert!(!h.clock.is_rendering());
    }

    #[test]
    fn test_partial_chunks_carry_over() {
        let mut h = harness();
        h.ring.push(chunk(100, 0)).unwrap();
        h.ring.push(chunk(100, 100)).unwrap();
        h.shared.open_gate();

        let mut data = vec![0.0f32; 150 * 2];
        assert_eq!((h.callback)(&mut data), 300);
        assert_eq!(h.clock.snapshot().frame_index, 150);

        assert_eq!((h.callback)(&mut data), 100);
        assert_eq!(h.clock.snapshot().frame_index, 200);
        assert_eq!(h.shared.frames_rendered(), 200);

        // First render is reported exactly once
        let firsts = h
            .control_rx
            .try_iter()
            .filter(|m| matches!(m, ControlMsg::FirstRender { .. }))
            .count();
        assert_eq!(firsts, 1);
    }

    #[test]
    fn test_clear_drops_leftover() {
        let mut h = harness();
        h.ring.push(chunk(100, 0)).unwrap();
        h.shared.open_gate();

        let mut data = vec![0.0f32; 40 * 2];
        (h.callback)(&mut data);

        h.ring.clear();
        h.ring.push(chunk(10, 5000)).unwrap();
        assert_eq!((h.callback)(&mut data), 20);
    }

    #[test]
    fn test_drained_sent_once_at_end_of_stream() {
        let mut h = harness();
        h.ring.push(chunk(10, 0)).unwrap();
        h.shared.set_eos(true);
        h.shared.open_gate();

        let mut data = vec![0.0f32; 64];
        (h.callback)(&mut data);
        (h.callback)(&mut data);

        let drained = h
            .control_rx
            .try_iter()
            .filter(|m| matches!(m, ControlMsg::Drained { .. }))
            .count();
        assert_eq!(drained, 1);
        assert_eq!(h.shared.underruns(), 0);
    }

    #[test]
    fn test_underrun_counted_only_while_playing() {
        let mut h = harness();
        h.shared.open_gate();
        let mut data = vec![0.0f32; 64];

        (h.callback)(&mut data);
        assert_eq!(h.shared.underruns(), 0);

        h.state.transition(PlaybackState::Starting).unwrap();
        h.state.transition(PlaybackState::Playing).unwrap();
        (h.callback)(&mut data);
        assert_eq!(h.shared.underruns(), 1);
    }
}

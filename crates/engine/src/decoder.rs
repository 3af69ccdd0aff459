// Decode loop: feeds the ring buffer from a FrameSource on its own thread

use crate::controller::ControlMsg;
use crate::output::RenderShared;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use trackplay_core::{EngineError, PcmChunk, Result};
use trackplay_decode_symphonia::FrameSource;
use trackplay_ringbuffer::{PushError, SharedRingBuffer};

enum WorkerCmd {
    /// Park between chunks and acknowledge
    Suspend(Sender<()>),
    Resume,
    /// Reposition the source; only honoured while suspended
    Seek {
        target: Duration,
        reply: Sender<Result<Duration>>,
    },
    Stop,
}

/// Handle to the decode thread of one session
pub struct DecodeWorker {
    cmd_tx: Sender<WorkerCmd>,
    ring: SharedRingBuffer,
    stop: Arc<AtomicBool>,
    exited_rx: Receiver<()>,
    handle: Option<thread::JoinHandle<()>>,
}

struct WorkerLoop {
    source: FrameSource,
    ring: SharedRingBuffer,
    render: Arc<RenderShared>,
    control_tx: Sender<ControlMsg>,
    cmd_rx: Receiver<WorkerCmd>,
    stop: Arc<AtomicBool>,
    session: u64,
    pending: Option<PcmChunk>,
    suspended: bool,
    at_eos: bool,
}

impl DecodeWorker {
    pub fn spawn(
        source: FrameSource,
        ring: SharedRingBuffer,
        render: Arc<RenderShared>,
        control_tx: Sender<ControlMsg>,
        session: u64,
    ) -> Result<Self> {
        let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded();
        let (exited_tx, exited_rx) = crossbeam_channel::bounded::<()>(0);
        let stop = Arc::new(AtomicBool::new(false));

        let worker = WorkerLoop {
            source,
            ring: ring.clone(),
            render,
            control_tx,
            cmd_rx,
            stop: stop.clone(),
            session,
            pending: None,
            suspended: false,
            at_eos: false,
        };

        let handle = thread::Builder::new()
            .name(format!("trackplay-decode-{}", session))
            .spawn(move || {
                // Dropped on exit, which disconnects `exited_rx`
                let _exited = exited_tx;
                worker.run();
            })
            .map_err(|e| EngineError::ThreadError(format!("Failed to spawn decode thread: {}", e)))?;

        Ok(Self {
            cmd_tx,
            ring,
            stop,
            exited_rx,
            handle: Some(handle),
        })
    }

    /// Park the loop at the next chunk boundary
    ///
    /// Returns false if the loop did not acknowledge within `timeout`.
    pub fn suspend(&self, timeout: Duration) -> bool {
        let (ack_tx, ack_rx) = crossbeam_channel::bounded(1);
        if self.cmd_tx.send(WorkerCmd::Suspend(ack_tx)).is_err() {
            return false;
        }
        // Wake a producer blocked on a full buffer
        self.ring.interrupt();
        ack_rx.recv_timeout(timeout).is_ok()
    }

    pub fn resume(&self) {
        let _ = self.cmd_tx.send(WorkerCmd::Resume);
    }

    /// Seek the suspended source, returning where decoding will restart
    pub fn seek(&self, target: Duration, timeout: Duration) -> Result<Duration> {
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        self.cmd_tx
            .send(WorkerCmd::Seek {
                target,
                reply: reply_tx,
            })
            .map_err(|_| EngineError::ThreadError("Decode thread is gone".to_string()))?;
        self.ring.interrupt();

        match reply_rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(EngineError::ThreadError(format!(
                "Seek not acknowledged within {:?}",
                timeout
            ))),
            Err(RecvTimeoutError::Disconnected) => {
                Err(EngineError::ThreadError("Decode thread is gone".to_string()))
            }
        }
    }

    /// Cancel the loop and join it, waiting at most `timeout`
    pub fn stop(mut self, timeout: Duration) {
        self.stop.store(true, Ordering::SeqCst);
        let _ = self.cmd_tx.send(WorkerCmd::Stop);
        self.ring.close();

        let Some(handle) = self.handle.take() else {
            return;
        };
        match self.exited_rx.recv_timeout(timeout) {
            Err(RecvTimeoutError::Disconnected) => {
                if handle.join().is_err() {
                    log::error!("Decode thread panicked");
                }
            }
            _ => log::warn!("Decode thread did not exit within {:?}, detaching", timeout),
        }
    }
}

impl WorkerLoop {
    fn run(mut self) {
        log::info!("Decoder thread started (session {})", self.session);

        loop {
            // Commands are sent before the interrupt, so none is missed here
            self.ring.clear_interrupt();
            if !self.drain_commands() {
                break;
            }

            if self.suspended || self.at_eos {
                match self.cmd_rx.recv() {
                    Ok(cmd) => {
                        if !self.handle_command(cmd) {
                            break;
                        }
                    }
                    Err(_) => break,
                }
                continue;
            }

            let chunk = match self.pending.take() {
                Some(chunk) => chunk,
                None => match self.source.next_chunk() {
                    Ok(Some(chunk)) => chunk,
                    Ok(None) => {
                        log::debug!("Decoder reached end of stream at frame {}", self.source.position());
                        self.at_eos = true;
                        self.render.set_eos(true);
                        continue;
                    }
                    Err(e) => {
                        log::error!("Decoding error: {}", e);
                        let _ = self.control_tx.send(ControlMsg::DecodeFailed {
                            session: self.session,
                            error: e,
                        });
                        break;
                    }
                },
            };

            // Blocks under backpressure until the renderer frees room,
            // except once stop is requested
            let pushed = if self.stop.load(Ordering::SeqCst) {
                self.ring.try_push(chunk)
            } else {
                self.ring.push(chunk)
            };
            match pushed {
                Ok(()) => {}
                Err(PushError::Closed(_)) => break,
                Err(err @ PushError::Full(_)) => {
                    log::debug!("Dropping decoded audio while stopping: {}", EngineError::from(err));
                    break;
                }
                Err(err) => self.pending = Some(err.into_chunk()),
            }
        }

        log::info!("Decoder thread exited (session {})", self.session);
    }

    /// Apply queued commands; false means exit
    fn drain_commands(&mut self) -> bool {
        loop {
            match self.cmd_rx.try_recv() {
                Ok(cmd) => {
                    if !self.handle_command(cmd) {
                        return false;
                    }
                }
                Err(TryRecvError::Empty) => return true,
                Err(TryRecvError::Disconnected) => return false,
            }
        }
    }

    fn handle_command(&mut self, cmd: WorkerCmd) -> bool {
        match cmd {
            WorkerCmd::Suspend(ack) => {
                self.suspended = true;
                let _ = ack.send(());
            }
            WorkerCmd::Resume => self.suspended = false,
            WorkerCmd::Seek { target, reply } => {
                if !self.suspended {
                    log::warn!("Seek requested while decoding, suspending first");
                    self.suspended = true;
                }
                // Audio decoded before the seek must never reach the buffer
                self.pending = None;
                self.at_eos = false;
                let _ = reply.send(self.source.seek(target));
            }
            WorkerCmd::Stop => return false,
        }
        true
    }
}

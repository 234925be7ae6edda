//! Paced acquisition-inference loop.
//!
//! One frame in flight at a time, on the calling thread. Before each pull
//! the loop sleeps until `next_deadline_ms`, and after each inference the
//! deadline moves to `now + cadence`. Slow inference therefore pushes the
//! next start later; missed ticks are never caught up.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;
use crate::detect::{DetectionResult, InferenceBackend};
use crate::error::Result;
use crate::ingest::FrameSource;

/// Shared stop flag, set from a signal handler and polled by the loop.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Receiver of inference results.
pub trait ResultSink {
    fn handle(&mut self, result: DetectionResult) -> Result<()>;

    /// Called at the top of every iteration, before the cadence wait.
    fn tick(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<F> ResultSink for F
where
    F: FnMut(DetectionResult) -> Result<()>,
{
    fn handle(&mut self, result: DetectionResult) -> Result<()> {
        self(result)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoopState {
    pub next_deadline_ms: u64,
    pub running: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopExit {
    EndOfStream,
    Cancelled,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoopReport {
    pub exit: LoopExit,
    pub frames: u64,
    pub inference_failures: u64,
}

pub struct PacedLoop {
    cadence_ms: u64,
    clock: Arc<dyn Clock>,
    state: LoopState,
}

impl PacedLoop {
    pub fn new(cadence_ms: u64, clock: Arc<dyn Clock>) -> Self {
        Self {
            cadence_ms,
            clock,
            state: LoopState {
                next_deadline_ms: 0,
                running: false,
            },
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Run until end of stream or cancellation.
    ///
    /// A capture failure ends the loop with an error. Inference failures are
    /// logged and skipped; the deadline still advances.
    pub fn run(
        &mut self,
        source: &mut dyn FrameSource,
        backend: &mut dyn InferenceBackend,
        sink: &mut dyn ResultSink,
        cancel: &CancelToken,
    ) -> Result<LoopReport> {
        self.state.running = true;
        let outcome = self.run_inner(source, backend, sink, cancel);
        self.state.running = false;
        outcome
    }

    fn run_inner(
        &mut self,
        source: &mut dyn FrameSource,
        backend: &mut dyn InferenceBackend,
        sink: &mut dyn ResultSink,
        cancel: &CancelToken,
    ) -> Result<LoopReport> {
        let mut frames = 0u64;
        let mut inference_failures = 0u64;
        let report = |exit, frames, inference_failures| LoopReport {
            exit,
            frames,
            inference_failures,
        };

        loop {
            if cancel.is_cancelled() {
                return Ok(report(LoopExit::Cancelled, frames, inference_failures));
            }
            sink.tick()?;

            let now = self.clock.now_ms();
            if now < self.state.next_deadline_ms {
                self.clock
                    .sleep(Duration::from_millis(self.state.next_deadline_ms - now));
                if cancel.is_cancelled() {
                    return Ok(report(LoopExit::Cancelled, frames, inference_failures));
                }
            }

            let Some(frame) = source.next_frame()? else {
                log::info!("end of stream on {}", source.device());
                return Ok(report(LoopExit::EndOfStream, frames, inference_failures));
            };
            frames += 1;

            match backend.infer(&frame) {
                Ok(result) => sink.handle(result)?,
                Err(err) => {
                    inference_failures += 1;
                    log::warn!(
                        "inference failed on frame captured at {}ms: {}",
                        frame.captured_at_ms,
                        err
                    );
                }
            }
            drop(frame);

            self.state.next_deadline_ms = self.clock.now_ms().saturating_add(self.cadence_ms);
        }
    }
}

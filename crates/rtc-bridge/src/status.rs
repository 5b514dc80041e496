use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Cooperative stop flag shared by every loop in the pipeline.
///
/// Loops check it at each poll or tick boundary; nothing is interrupted mid-operation.
#[derive(Clone, Debug, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Counters updated by the receive pipeline.
#[derive(Debug, Default)]
pub struct PipelineStatus {
    /// Frames converted and appended to the playback buffer.
    pub frames_received: AtomicU64,
    /// Frames skipped because of an unexpected sample layout.
    pub frames_skipped: AtomicU64,
    /// Real (non-silence) samples handed to the sink.
    pub samples_played: AtomicU64,
    /// Ticks that had no data at all and wrote pure silence.
    pub silent_ticks: AtomicU64,
    /// Sink write failures.
    pub write_errors: AtomicU64,
}

/// Plain copy of [`PipelineStatus`] for logging.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub frames_received: u64,
    pub frames_skipped: u64,
    pub samples_played: u64,
    pub silent_ticks: u64,
    pub write_errors: u64,
}

impl PipelineStatus {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_skipped: self.frames_skipped.load(Ordering::Relaxed),
            samples_played: self.samples_played.load(Ordering::Relaxed),
            silent_ticks: self.silent_ticks.load(Ordering::Relaxed),
            write_errors: self.write_errors.load(Ordering::Relaxed),
        }
    }
}

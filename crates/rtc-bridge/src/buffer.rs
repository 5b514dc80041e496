//! Capped sample buffer between the frame consumer and the playback ticker.
//!
//! The consumer appends converted samples whenever frames arrive; the ticker drains a
//! fixed block on every tick and pads with silence, so playback cadence never depends on
//! the producer.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Default capacity: two seconds of mono audio at 48 kHz.
pub const DEFAULT_PLAYBACK_CAPACITY: usize = 48_000 * 2;

/// Interleaved `i16` samples capped at `capacity`, trimming the oldest on overflow.
///
/// Trimming happens after insertion, so the buffer always equals the last `capacity`
/// samples of everything appended (minus what was drained).
pub struct PlaybackBuffer {
    samples: Mutex<VecDeque<i16>>,
    capacity: usize,
    dropped: AtomicU64,
}

impl PlaybackBuffer {
    /// Create a buffer holding at most `capacity` samples (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<i16>> {
        self.samples.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append samples, then trim from the front down to `capacity`.
    ///
    /// Returns the number of samples dropped by the trim.
    pub fn append(&self, samples: &[i16]) -> usize {
        let mut buf = self.lock();
        buf.extend(samples.iter().copied());
        let excess = buf.len().saturating_sub(self.capacity);
        if excess > 0 {
            buf.drain(..excess);
        }
        drop(buf);

        if excess > 0 {
            self.dropped.fetch_add(excess as u64, Ordering::Relaxed);
        }
        excess
    }

    /// Remove and return up to `max` samples from the front.
    ///
    /// A short result is normal when the producer has fallen behind.
    pub fn drain(&self, max: usize) -> Vec<i16> {
        let mut buf = self.lock();
        let take = buf.len().min(max);
        buf.drain(..take).collect()
    }

    /// Fill `out` from the front of the buffer and zero the remainder.
    ///
    /// Returns how many real samples were copied; `out` is always fully written.
    pub fn drain_into(&self, out: &mut [i16]) -> usize {
        let mut buf = self.lock();
        let take = buf.len().min(out.len());
        for (dst, src) in out.iter_mut().zip(buf.drain(..take)) {
            *dst = src;
        }
        drop(buf);

        out[take..].fill(0);
        take
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total samples trimmed on overflow since creation.
    pub fn dropped_samples(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for PlaybackBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_PLAYBACK_CAPACITY)
    }
}

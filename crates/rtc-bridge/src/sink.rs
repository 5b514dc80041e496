//! Audio output seam used by the playback ticker.

use anyhow::Result;

/// A blocking PCM output stream. Opening happens when the sink is constructed.
///
/// `write` may block for about one device buffer period and no longer.
pub trait AudioSink {
    fn start(&mut self) -> Result<()>;
    fn write(&mut self, samples: &[i16]) -> Result<()>;
    fn stop(&mut self) -> Result<()>;
    fn close(&mut self) -> Result<()>;
}

/// Discards everything; timing comes from the ticker alone.
#[derive(Debug, Default)]
pub struct NullSink {
    written: u64,
}

impl NullSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Samples written since creation.
    pub fn written(&self) -> u64 {
        self.written
    }
}

impl AudioSink for NullSink {
    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    fn write(&mut self, samples: &[i16]) -> Result<()> {
        self.written += samples.len() as u64;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        tracing::debug!(written = self.written(), "closing null output");
        Ok(())
    }
}

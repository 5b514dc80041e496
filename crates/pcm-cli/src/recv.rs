//! Receive side: frame consumer + playback ticker around one connection.

use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::Result;
use rtc_bridge::buffer::PlaybackBuffer;
use rtc_bridge::connection::RtcConnection;
use rtc_bridge::pipeline::{spawn_frame_consumer, spawn_playback_ticker};
use rtc_bridge::playback::{CpalSink, CpalSinkConfig};
use rtc_bridge::sink::{AudioSink, NullSink};
use rtc_bridge::status::{PipelineStatus, StatusSnapshot, StopSignal};

use crate::config::RecvConfig;

pub struct ReceivePipeline {
    pub buffer: Arc<PlaybackBuffer>,
    pub status: Arc<PipelineStatus>,
    consumer: JoinHandle<()>,
    ticker: JoinHandle<()>,
}

impl ReceivePipeline {
    /// Spawn the consumer and the ticker. If the output cannot be opened, `stop` is set
    /// so the consumer exits before the error is returned.
    pub fn start(conn: Arc<RtcConnection>, cfg: &RecvConfig, stop: StopSignal) -> Result<Self> {
        let buffer = Arc::new(PlaybackBuffer::new(cfg.buffer_capacity));
        let status = PipelineStatus::shared();

        let consumer = spawn_frame_consumer(
            conn,
            buffer.clone(),
            cfg.consumer.clone(),
            stop.clone(),
            status.clone(),
        )?;

        let ticker = match spawn_playback_ticker(
            buffer.clone(),
            sink_factory(cfg),
            cfg.ticker.clone(),
            stop.clone(),
            status.clone(),
        ) {
            Ok(handle) => handle,
            Err(e) => {
                stop.stop();
                let _ = consumer.join();
                return Err(e);
            }
        };

        Ok(Self {
            buffer,
            status,
            consumer,
            ticker,
        })
    }

    pub fn log_stats(&self, conn: &RtcConnection) {
        let snap = self.status.snapshot();
        let queue = conn.queue_stats().unwrap_or_default();
        tracing::info!(
            frames = snap.frames_received,
            skipped = snap.frames_skipped,
            played = snap.samples_played,
            silent_ticks = snap.silent_ticks,
            write_errors = snap.write_errors,
            queued = queue.len,
            queue_dropped = queue.dropped,
            buffered = self.buffer.len(),
            buffer_dropped = self.buffer.dropped_samples(),
            "receive stats"
        );
    }

    /// Wait for both threads; call after the stop signal is set.
    pub fn join(self) -> StatusSnapshot {
        let _ = self.consumer.join();
        let _ = self.ticker.join();
        self.status.snapshot()
    }
}

fn sink_factory(
    cfg: &RecvConfig,
) -> impl FnOnce() -> Result<Box<dyn AudioSink>> + Send + 'static {
    let null_output = cfg.null_output;
    let sink_cfg = CpalSinkConfig {
        device: cfg.device.clone(),
        sample_rate: cfg.connection.sample_rate,
        channels: cfg.connection.channels.count(),
        ..CpalSinkConfig::default()
    };
    move || -> Result<Box<dyn AudioSink>> {
        if null_output {
            Ok(Box::new(NullSink::new()))
        } else {
            Ok(Box::new(CpalSink::open(&sink_cfg)?))
        }
    }
}

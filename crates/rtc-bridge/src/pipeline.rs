//! Receive pipeline wiring: frame queue → sample conversion → playback buffer → sink.
//!
//! Two threads:
//! - **consumer** waits (bounded) on the connection's frame queue, converts each frame to
//!   `i16` and appends it to the [`PlaybackBuffer`]
//! - **ticker** wakes on a fixed period, drains one block from the buffer (padding with
//!   silence) and writes it to the [`AudioSink`]
//!
//! Both stop cooperatively via [`StopSignal`].

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};

use crate::buffer::PlaybackBuffer;
use crate::connection::RtcConnection;
use crate::error::FetchError;
use crate::frame::{AudioFrame, frame_samples};
use crate::sink::AudioSink;
use crate::status::{PipelineStatus, StopSignal};

/// Frame consumer settings.
#[derive(Clone, Debug)]
pub struct ConsumerConfig {
    /// Playback rate; frames at other rates are still buffered but logged.
    pub expected_sample_rate: u32,
    /// Longest single wait on the frame queue before re-checking the stop signal.
    pub wait: Duration,
    /// Push every received frame back to the channel.
    pub echo: bool,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            expected_sample_rate: crate::config::DEFAULT_SAMPLE_RATE,
            wait: Duration::from_millis(20),
            echo: false,
        }
    }
}

/// Playback ticker settings.
#[derive(Clone, Debug)]
pub struct TickerConfig {
    /// Samples written to the sink per tick.
    pub frame_size: usize,
    /// Tick period.
    pub tick: Duration,
}

impl Default for TickerConfig {
    fn default() -> Self {
        Self {
            frame_size: 1024,
            tick: Duration::from_millis(10),
        }
    }
}

/// Start the frame consumer thread.
///
/// Fails immediately if `conn` was created without a frame queue.
pub fn spawn_frame_consumer(
    conn: Arc<RtcConnection>,
    buffer: Arc<PlaybackBuffer>,
    cfg: ConsumerConfig,
    stop: StopSignal,
    status: Arc<PipelineStatus>,
) -> Result<JoinHandle<()>> {
    if conn.queue_stats().is_none() {
        bail!("connection has no frame queue; enable a pcm queue to receive frames");
    }

    thread::Builder::new()
        .name("frame-consumer".to_string())
        .spawn(move || {
            tracing::info!("frame consumer started");
            let mut rate_warned = None;
            while !stop.is_stopped() {
                let frame = match conn.wait_audio_frame(cfg.wait) {
                    Ok(frame) => frame,
                    Err(FetchError::Empty) => continue,
                    Err(e) => {
                        tracing::warn!("failed to fetch audio frame: {e}");
                        break;
                    }
                };

                handle_frame(&frame, &buffer, &cfg, &status, &mut rate_warned);

                if cfg.echo {
                    if let Err(e) = conn.push_audio_pcm(&frame.buffer, 0) {
                        tracing::warn!("failed to push audio pcm data: {e}");
                    }
                }
            }
            tracing::info!("frame consumer stopped");
        })
        .context("spawn frame consumer")
}

/// Convert one frame and append it to `buffer`. Returns `false` when the frame was skipped.
///
/// `rate_warned` remembers the last mismatching rate so a steady mismatch is logged once.
pub fn handle_frame(
    frame: &AudioFrame,
    buffer: &PlaybackBuffer,
    cfg: &ConsumerConfig,
    status: &PipelineStatus,
    rate_warned: &mut Option<u32>,
) -> bool {
    let samples = match frame_samples(frame) {
        Ok(samples) => samples,
        Err(e) => {
            status.frames_skipped.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                len = frame.buffer.len(),
                bytes_per_sample = frame.bytes_per_sample,
                "skipping audio frame: {e}"
            );
            return false;
        }
    };

    let trimmed = buffer.append(&samples);
    status.frames_received.fetch_add(1, Ordering::Relaxed);

    if frame.sample_rate != cfg.expected_sample_rate {
        if *rate_warned != Some(frame.sample_rate) {
            tracing::warn!(
                frame_rate_hz = frame.sample_rate,
                playback_rate_hz = cfg.expected_sample_rate,
                "audio frame sample rate differs from playback rate"
            );
            *rate_warned = Some(frame.sample_rate);
        }
    } else {
        *rate_warned = None;
    }

    if trimmed > 0 {
        tracing::debug!(trimmed, "playback buffer full; dropped oldest samples");
    }
    tracing::trace!(
        added = samples.len(),
        samples_per_channel = frame.samples_per_channel(),
        channels = frame.channels,
        rate_hz = frame.sample_rate,
        buffered = buffer.len(),
        "buffered audio frame"
    );
    true
}

/// Start the playback ticker.
///
/// `make_sink` runs on the ticker thread (audio streams are often not `Send`). This call
/// returns once the sink is open and started, or with the error that prevented it.
pub fn spawn_playback_ticker<F>(
    buffer: Arc<PlaybackBuffer>,
    make_sink: F,
    cfg: TickerConfig,
    stop: StopSignal,
    status: Arc<PipelineStatus>,
) -> Result<JoinHandle<()>>
where
    F: FnOnce() -> Result<Box<dyn AudioSink>> + Send + 'static,
{
    let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<()>>(1);
    let frame_size = cfg.frame_size.max(1);

    let handle = thread::Builder::new()
        .name("playback-ticker".to_string())
        .spawn(move || {
            let mut sink = match make_sink() {
                Ok(sink) => sink,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            if let Err(e) = sink.start() {
                let _ = ready_tx.send(Err(e.context("start audio stream")));
                return;
            }
            let _ = ready_tx.send(Ok(()));
            tracing::info!(frame_size, tick = ?cfg.tick, "playback started");

            let ticker = crossbeam_channel::tick(cfg.tick);
            let mut block = vec![0i16; frame_size];
            while !stop.is_stopped() {
                if ticker.recv().is_err() {
                    break;
                }
                run_tick(&buffer, sink.as_mut(), &mut block, &status);
            }

            if let Err(e) = sink.stop() {
                tracing::warn!("failed to stop audio stream: {e:#}");
            }
            if let Err(e) = sink.close() {
                tracing::warn!("failed to close audio stream: {e:#}");
            }
            tracing::info!("playback stopped");
        })
        .context("spawn playback ticker")?;

    match ready_rx.recv() {
        Ok(Ok(())) => Ok(handle),
        Ok(Err(e)) => {
            let _ = handle.join();
            Err(e.context("open audio output"))
        }
        Err(_) => {
            let _ = handle.join();
            Err(anyhow!("playback ticker exited before starting"))
        }
    }
}

/// One playback period: drain a block (zero-padded) and write it.
///
/// Write failures are counted and logged; the next tick simply tries again.
pub fn run_tick(
    buffer: &PlaybackBuffer,
    sink: &mut dyn AudioSink,
    block: &mut [i16],
    status: &PipelineStatus,
) {
    let real = buffer.drain_into(block);
    if real == 0 {
        status.silent_ticks.fetch_add(1, Ordering::Relaxed);
    } else {
        status.samples_played.fetch_add(real as u64, Ordering::Relaxed);
    }

    if let Err(e) = sink.write(block) {
        status.write_errors.fetch_add(1, Ordering::Relaxed);
        tracing::warn!("failed to write to audio stream: {e:#}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AudioMode, ConnectionConfig, ServiceConfig};
    use crate::frame::i16_to_pcm16le;
    use crate::loopback::{LoopbackEngine, LoopbackSettings};
    use crate::service::Service;
    use std::sync::Mutex;
    use std::time::Instant;

    /// Records every block and can be told to fail writes.
    #[derive(Clone, Default)]
    struct RecordingSink {
        blocks: Arc<Mutex<Vec<Vec<i16>>>>,
        fail_writes: bool,
        closed: Arc<Mutex<bool>>,
    }

    impl AudioSink for RecordingSink {
        fn start(&mut self) -> Result<()> {
            Ok(())
        }
        fn write(&mut self, samples: &[i16]) -> Result<()> {
            self.blocks.lock().unwrap().push(samples.to_vec());
            if self.fail_writes {
                bail!("device unplugged");
            }
            Ok(())
        }
        fn stop(&mut self) -> Result<()> {
            Ok(())
        }
        fn close(&mut self) -> Result<()> {
            *self.closed.lock().unwrap() = true;
            Ok(())
        }
    }

    fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        cond()
    }

    #[test]
    fn handle_frame_converts_and_buffers() {
        let buffer = PlaybackBuffer::new(100);
        let status = PipelineStatus::default();
        let frame = AudioFrame::pcm16(i16_to_pcm16le(&[1, -2, 3]), 16_000, 1);
        let mut warned = None;

        assert!(handle_frame(&frame, &buffer, &ConsumerConfig::default(), &status, &mut warned));
        assert_eq!(buffer.drain(10), vec![1, -2, 3]);
        assert_eq!(status.snapshot().frames_received, 1);
        assert_eq!(warned, None);
    }

    #[test]
    fn handle_frame_skips_mismatched_width() {
        let buffer = PlaybackBuffer::new(100);
        let status = PipelineStatus::default();
        let frame = AudioFrame {
            buffer: vec![0; 12],
            sample_rate: 16_000,
            channels: 1,
            bytes_per_sample: 4,
        };
        let mut warned = None;

        assert!(!handle_frame(&frame, &buffer, &ConsumerConfig::default(), &status, &mut warned));
        assert!(buffer.is_empty());
        assert_eq!(status.snapshot().frames_skipped, 1);
    }

    #[test]
    fn handle_frame_buffers_mismatched_rate_and_remembers_warning() {
        let buffer = PlaybackBuffer::new(100);
        let status = PipelineStatus::default();
        let frame = AudioFrame::pcm16(i16_to_pcm16le(&[9, 9]), 48_000, 1);
        let mut warned = None;

        assert!(handle_frame(&frame, &buffer, &ConsumerConfig::default(), &status, &mut warned));
        assert_eq!(warned, Some(48_000));
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn run_tick_emits_full_silent_block_when_empty() {
        let buffer = PlaybackBuffer::new(4096);
        let status = PipelineStatus::default();
        let mut sink = RecordingSink::default();
        let mut block = vec![5i16; 1024];

        run_tick(&buffer, &mut sink, &mut block, &status);

        let blocks = sink.blocks.lock().unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].len(), 1024);
        assert!(blocks[0].iter().all(|s| *s == 0));
        assert_eq!(status.snapshot().silent_ticks, 1);
    }

    #[test]
    fn run_tick_pads_partial_data() {
        let buffer = PlaybackBuffer::new(4096);
        buffer.append(&[1, 2, 3]);
        let status = PipelineStatus::default();
        let mut sink = RecordingSink::default();
        let mut block = vec![0i16; 6];

        run_tick(&buffer, &mut sink, &mut block, &status);

        assert_eq!(sink.blocks.lock().unwrap()[0], vec![1, 2, 3, 0, 0, 0]);
        assert_eq!(status.snapshot().samples_played, 3);
    }

    #[test]
    fn write_failures_do_not_stop_ticking() {
        let buffer = Arc::new(PlaybackBuffer::new(64));
        let status = PipelineStatus::shared();
        let stop = StopSignal::new();
        let sink = RecordingSink {
            fail_writes: true,
            ..RecordingSink::default()
        };
        let blocks = sink.blocks.clone();
        let closed = sink.closed.clone();

        let handle = spawn_playback_ticker(
            buffer,
            move || Ok(Box::new(sink) as Box<dyn AudioSink>),
            TickerConfig {
                frame_size: 8,
                tick: Duration::from_millis(1),
            },
            stop.clone(),
            status.clone(),
        )
        .unwrap();

        assert!(wait_until(|| status.snapshot().write_errors >= 3));
        stop.stop();
        handle.join().unwrap();

        assert!(blocks.lock().unwrap().len() >= 3);
        assert!(*closed.lock().unwrap());
    }

    #[test]
    fn ticker_reports_sink_open_failure() {
        let err = spawn_playback_ticker(
            Arc::new(PlaybackBuffer::new(8)),
            || Err(anyhow!("no device")),
            TickerConfig::default(),
            StopSignal::new(),
            PipelineStatus::shared(),
        )
        .err()
        .unwrap();
        assert!(format!("{err:#}").contains("no device"));
    }

    #[test]
    fn consumer_moves_frames_from_connection_into_buffer() {
        let engine = Arc::new(LoopbackEngine::new(LoopbackSettings {
            paced: false,
            ..LoopbackSettings::default()
        }));
        let svc = Service::new(
            ServiceConfig {
                app_id: "app".into(),
                app_cert: "cert".into(),
                channel_name: "pipeline-tests".into(),
                user_id: "rx".into(),
                ..ServiceConfig::default()
            },
            engine,
        )
        .unwrap();

        let rx = Arc::new(
            svc.connect(
                ConnectionConfig {
                    receive_audio_frames: true,
                    audio_mode: AudioMode::Queued,
                    pcm_queue_size: 64,
                    ..ConnectionConfig::default()
                },
                None,
            )
            .unwrap(),
        );
        let tx = svc
            .connect_as("tx", ConnectionConfig::default(), None)
            .unwrap();

        let buffer = Arc::new(PlaybackBuffer::new(16_000));
        let status = PipelineStatus::shared();
        let stop = StopSignal::new();
        let handle = spawn_frame_consumer(
            rx.clone(),
            buffer.clone(),
            ConsumerConfig {
                wait: Duration::from_millis(5),
                ..ConsumerConfig::default()
            },
            stop.clone(),
            status.clone(),
        )
        .unwrap();

        let samples: Vec<i16> = (0..480).map(|i| i as i16).collect();
        tx.push_audio_pcm(&i16_to_pcm16le(&samples), 0).unwrap();

        assert!(wait_until(|| buffer.len() == 480));
        stop.stop();
        handle.join().unwrap();

        assert_eq!(buffer.drain(480), samples);
        assert_eq!(status.snapshot().frames_received, 3);
    }

    #[test]
    fn consumer_requires_frame_queue() {
        let engine = Arc::new(LoopbackEngine::default());
        let svc = Service::new(
            ServiceConfig {
                app_id: "app".into(),
                app_cert: "cert".into(),
                ..ServiceConfig::default()
            },
            engine,
        )
        .unwrap();
        let conn = Arc::new(
            svc.connect(
                ConnectionConfig {
                    pcm_queue_size: 0,
                    ..ConnectionConfig::default()
                },
                None,
            )
            .unwrap(),
        );

        let result = spawn_frame_consumer(
            conn,
            Arc::new(PlaybackBuffer::new(8)),
            ConsumerConfig::default(),
            StopSignal::new(),
            PipelineStatus::shared(),
        );
        assert!(result.is_err());
    }
}

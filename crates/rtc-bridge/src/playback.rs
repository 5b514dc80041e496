//! CPAL-backed [`AudioSink`].
//!
//! `write` hands blocks of interleaved `i16` to the output callback through a small bounded
//! channel, blocking while the channel is full. That backpressure is what paces the ticker
//! to the device clock. The callback:
//! - refills a local block from the channel without blocking
//! - applies basic channel mapping (mono↔stereo, best-effort otherwise)
//! - converts `i16` samples to the device sample format
//! - outputs silence on underrun

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Result, anyhow};
use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::{Receiver, SendTimeoutError, Sender};

use crate::device::{pick_buffer_size, pick_device, pick_output_config};
use crate::sink::AudioSink;

/// Settings for [`CpalSink::open`].
#[derive(Clone, Debug)]
pub struct CpalSinkConfig {
    /// Output device substring; `None` uses the host default.
    pub device: Option<String>,
    /// Sample rate of the PCM passed to `write`.
    pub sample_rate: u32,
    /// Interleaved channel count of the PCM passed to `write`.
    pub channels: u16,
    /// Blocks buffered between `write` and the output callback.
    pub queue_blocks: usize,
    /// Longest `write` will block before reporting the device as stalled.
    pub write_timeout: Duration,
}

impl Default for CpalSinkConfig {
    fn default() -> Self {
        Self {
            device: None,
            sample_rate: crate::config::DEFAULT_SAMPLE_RATE,
            channels: 1,
            queue_blocks: 4,
            write_timeout: Duration::from_millis(500),
        }
    }
}

/// Audio output on a CPAL device.
///
/// `cpal::Stream` is not `Send` on every host, so open the sink on the thread that
/// writes to it (see [`crate::pipeline::spawn_playback_ticker`]).
pub struct CpalSink {
    stream: Option<cpal::Stream>,
    tx: Option<Sender<Vec<i16>>>,
    write_timeout: Duration,
    underrun_frames: Arc<AtomicU64>,
}

impl CpalSink {
    pub fn open(cfg: &CpalSinkConfig) -> Result<Self> {
        let host = cpal::default_host();
        let device = pick_device(&host, cfg.device.as_deref())?;
        let supported = pick_output_config(&device, cfg.sample_rate, cfg.channels)?;

        let mut config = supported.config();
        if let Some(size) = pick_buffer_size(&supported) {
            config.buffer_size = size;
        }
        if config.sample_rate != cfg.sample_rate {
            tracing::warn!(
                device_rate_hz = config.sample_rate,
                pcm_rate_hz = cfg.sample_rate,
                "output device does not support the pcm sample rate; playback pitch will be off"
            );
        }

        let (tx, rx) = crossbeam_channel::bounded(cfg.queue_blocks.max(1));
        let underrun_frames = Arc::new(AtomicU64::new(0));
        let state = PlaybackState {
            rx,
            src: Vec::new(),
            pos: 0,
            src_channels: usize::from(cfg.channels.max(1)),
            underrun_frames: underrun_frames.clone(),
        };

        let stream = build_output_stream(&device, &config, supported.sample_format(), state)?;
        // Some hosts start streams on creation.
        let _ = stream.pause();

        tracing::info!(
            device = %device
                .description()
                .map(|d| d.name().to_string())
                .unwrap_or_else(|_| "<unknown>".to_string()),
            rate_hz = config.sample_rate,
            channels = config.channels,
            format = ?supported.sample_format(),
            "opened output stream"
        );

        Ok(Self {
            stream: Some(stream),
            tx: Some(tx),
            write_timeout: cfg.write_timeout,
            underrun_frames,
        })
    }

    /// Output frames filled with silence because no block was ready.
    pub fn underrun_frames(&self) -> u64 {
        self.underrun_frames.load(Ordering::Relaxed)
    }
}

impl AudioSink for CpalSink {
    fn start(&mut self) -> Result<()> {
        let stream = self.stream.as_ref().ok_or_else(|| anyhow!("stream closed"))?;
        stream.play()?;
        Ok(())
    }

    fn write(&mut self, samples: &[i16]) -> Result<()> {
        let tx = self.tx.as_ref().ok_or_else(|| anyhow!("stream closed"))?;
        match tx.send_timeout(samples.to_vec(), self.write_timeout) {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => Err(anyhow!(
                "output stream stalled for {:?}",
                self.write_timeout
            )),
            Err(SendTimeoutError::Disconnected(_)) => Err(anyhow!("output stream closed")),
        }
    }

    fn stop(&mut self) -> Result<()> {
        if let Some(stream) = &self.stream {
            stream.pause()?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.stream.is_some() {
            tracing::info!(underrun_frames = self.underrun_frames(), "closing output stream");
        }
        self.tx = None;
        self.stream = None;
        Ok(())
    }
}

fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    state: PlaybackState,
) -> Result<cpal::Stream> {
    match sample_format {
        cpal::SampleFormat::I16 => build_stream::<i16>(device, config, state),
        cpal::SampleFormat::F32 => build_stream::<f32>(device, config, state),
        cpal::SampleFormat::I32 => build_stream::<i32>(device, config, state),
        cpal::SampleFormat::U16 => build_stream::<u16>(device, config, state),
        other => Err(anyhow!("Unsupported sample format: {other:?}")),
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut state: PlaybackState,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<i16>,
{
    let channels_out = usize::from(config.channels.max(1));
    let err_fn = |err| tracing::warn!("stream error: {err}");

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| state.fill(data, channels_out),
        err_fn,
        None,
    )?;
    Ok(stream)
}

/// Callback-side state. Owned by the callback closure, so no locking.
struct PlaybackState {
    rx: Receiver<Vec<i16>>,
    src: Vec<i16>,
    pos: usize,
    src_channels: usize,
    underrun_frames: Arc<AtomicU64>,
}

impl PlaybackState {
    fn fill<T>(&mut self, data: &mut [T], channels_out: usize)
    where
        T: cpal::Sample + cpal::FromSample<i16>,
    {
        let frames = data.len() / channels_out;
        for frame in 0..frames {
            if self.pos >= self.src.len() {
                self.pos = 0;
                match self.rx.try_recv() {
                    Ok(block) => self.src = block,
                    Err(_) => {
                        self.src.clear();
                        let remaining = frames - frame;
                        self.underrun_frames
                            .fetch_add(remaining as u64, Ordering::Relaxed);
                        for s in &mut data[frame * channels_out..] {
                            *s = T::from_sample(0i16);
                        }
                        return;
                    }
                }
            }
            for ch in 0..channels_out {
                data[frame * channels_out + ch] = T::from_sample(self.next_mapped(channels_out, ch));
            }
        }
    }

    /// Next output sample for `dst_ch`. `pos` advances once per destination frame.
    ///
    /// - mono → stereo: duplicate channel 0
    /// - stereo → mono: average L/R
    /// - other layouts: clamp to the available source channels
    fn next_mapped(&mut self, dst_channels: usize, dst_ch: usize) -> i16 {
        if self.pos >= self.src.len() {
            return 0;
        }
        let frame_start = self.pos;
        let get = |ch: usize| -> i16 {
            if ch < self.src_channels {
                self.src.get(frame_start + ch).copied().unwrap_or(0)
            } else {
                0
            }
        };

        let out = match (self.src_channels, dst_channels) {
            (2, 1) => ((i32::from(get(0)) + i32::from(get(1))) / 2) as i16,
            (1, _) => get(0),
            (src, _) => get(dst_ch.min(src.saturating_sub(1))),
        };

        if dst_ch + 1 == dst_channels {
            self.pos += self.src_channels;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(src_channels: usize) -> (Sender<Vec<i16>>, PlaybackState) {
        let (tx, rx) = crossbeam_channel::bounded(4);
        let st = PlaybackState {
            rx,
            src: Vec::new(),
            pos: 0,
            src_channels,
            underrun_frames: Arc::new(AtomicU64::new(0)),
        };
        (tx, st)
    }

    #[test]
    fn mono_is_duplicated_to_stereo() {
        let (tx, mut st) = state(1);
        tx.send(vec![10, 20]).unwrap();
        let mut out = [0i16; 4];
        st.fill(&mut out, 2);
        assert_eq!(out, [10, 10, 20, 20]);
    }

    #[test]
    fn stereo_is_averaged_to_mono() {
        let (tx, mut st) = state(2);
        tx.send(vec![10, 30, -4, 4]).unwrap();
        let mut out = [0i16; 2];
        st.fill(&mut out, 1);
        assert_eq!(out, [20, 0]);
    }

    #[test]
    fn underrun_fills_silence_and_counts_frames() {
        let (tx, mut st) = state(1);
        tx.send(vec![7, 8]).unwrap();
        let mut out = [1i16; 5];
        st.fill(&mut out, 1);
        assert_eq!(out, [7, 8, 0, 0, 0]);
        assert_eq!(st.underrun_frames.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn blocks_are_consumed_across_callbacks() {
        let (tx, mut st) = state(1);
        tx.send(vec![1, 2, 3]).unwrap();
        tx.send(vec![4]).unwrap();
        let mut first = [0i16; 2];
        let mut second = [0i16; 2];
        st.fill(&mut first, 1);
        st.fill(&mut second, 1);
        assert_eq!(first, [1, 2]);
        assert_eq!(second, [3, 4]);
    }

    #[test]
    fn converts_to_float_output() {
        let (tx, mut st) = state(1);
        tx.send(vec![i16::MIN, 0]).unwrap();
        let mut out = [1.0f32; 2];
        st.fill(&mut out, 1);
        assert_eq!(out[0], -1.0);
        assert_eq!(out[1], 0.0);
    }
}

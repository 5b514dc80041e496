//! Interval-driven PCM file pusher.

use std::io::{self, Cursor, Read, Seek, SeekFrom};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam_channel::RecvTimeoutError;
use rtc_bridge::connection::RtcConnection;
use rtc_bridge::frame::i16_to_pcm16le;
use rtc_bridge::status::StopSignal;

use crate::config::SendConfig;

/// Longest the pusher goes without checking the stop signal.
const STOP_POLL: Duration = Duration::from_millis(100);

/// Open the configured file, or synthesize a tone when none is given.
pub fn open_source(cfg: &SendConfig) -> Result<Box<dyn PcmSource>> {
    match &cfg.audio_file_path {
        Some(path) => {
            let file = std::fs::File::open(path)
                .with_context(|| format!("open audio file {}", path.display()))?;
            Ok(Box::new(file))
        }
        None => {
            tracing::info!("no audio file given; pushing a 440 Hz test tone");
            let tone = tone_pcm(440.0, cfg.sample_rate, cfg.channels.count(), 2.0);
            Ok(Box::new(Cursor::new(tone)))
        }
    }
}

pub trait PcmSource: Read + Seek + Send {}
impl<T: Read + Seek + Send> PcmSource for T {}

/// Every `push_interval`, push the whole source in chunks if the previous push drained.
pub fn spawn_file_pusher(
    conn: Arc<RtcConnection>,
    mut source: Box<dyn PcmSource>,
    cfg: SendConfig,
    stop: StopSignal,
) -> Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("pcm-pusher".to_string())
        .spawn(move || {
            let chunk_bytes = cfg.chunk_bytes();
            let ticker = crossbeam_channel::tick(cfg.push_interval);
            tracing::info!(
                interval = ?cfg.push_interval,
                chunk_bytes,
                "start pushing audio"
            );

            while !stop.is_stopped() {
                match ticker.recv_timeout(STOP_POLL) {
                    Ok(_) => {}
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                }

                if !conn.is_push_completed() {
                    tracing::info!("previous push still in flight; waiting for next interval");
                    continue;
                }

                match push_chunks(&mut source, chunk_bytes, |chunk| {
                    conn.push_audio_pcm(chunk, 0).context("push audio pcm data")
                }) {
                    Ok(pushed) => tracing::info!(
                        pushed_bytes = pushed,
                        rate_hz = cfg.sample_rate,
                        "pushed audio data"
                    ),
                    Err(e) => tracing::warn!("{e:#}"),
                }
            }
            tracing::info!("pusher stopped");
        })
        .context("spawn pcm pusher")
}

/// Push full `chunk_bytes` chunks from `source` until a short read, then rewind.
///
/// A trailing partial chunk is not pushed. Returns the number of bytes pushed.
pub fn push_chunks<R, F>(source: &mut R, chunk_bytes: usize, mut push: F) -> Result<usize>
where
    R: Read + Seek + ?Sized,
    F: FnMut(&[u8]) -> Result<()>,
{
    let mut chunk = vec![0u8; chunk_bytes.max(1)];
    let mut pushed = 0usize;
    loop {
        let n = read_full(source, &mut chunk).context("read audio file")?;
        if n < chunk.len() {
            tracing::debug!(read = n, "reached end of audio; rewinding");
            source.seek(SeekFrom::Start(0)).context("rewind audio file")?;
            return Ok(pushed);
        }
        push(&chunk)?;
        pushed += n;
    }
}

/// Read until `buf` is full or the source is exhausted.
fn read_full<R: Read + ?Sized>(source: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Interleaved 16-bit sine tone at half scale.
pub fn tone_pcm(freq_hz: f32, sample_rate: u32, channels: u16, seconds: f32) -> Vec<u8> {
    let frames = (sample_rate as f32 * seconds) as usize;
    let step = 2.0 * std::f32::consts::PI * freq_hz / sample_rate.max(1) as f32;
    let samples: Vec<i16> = (0..frames)
        .flat_map(|i| {
            let v = ((i as f32 * step).sin() * f32::from(i16::MAX) * 0.5) as i16;
            std::iter::repeat_n(v, usize::from(channels.max(1)))
        })
        .collect();
    i16_to_pcm16le(&samples)
}

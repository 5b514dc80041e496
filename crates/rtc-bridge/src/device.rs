//! Output device discovery and selection.
//!
//! Thin wrappers around CPAL for:
//! - listing available output devices
//! - selecting either the default device or a device by substring match
//! - choosing a stream config close to the PCM format received from the channel

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait};

/// Pick the first output device whose name contains `needle` (case-insensitive), or the
/// host default when `needle` is `None`.
pub fn pick_device(host: &cpal::Host, needle: Option<&str>) -> Result<cpal::Device> {
    if let Some(needle) = needle {
        let mut devices = host.output_devices().context("No output devices")?;
        return devices
            .find(|d| {
                d.description()
                    .ok()
                    .map(|n| matches_device_name(&n.name(), needle))
                    .unwrap_or(false)
            })
            .ok_or_else(|| anyhow!("No output device matched: {needle}"));
    }

    host.default_output_device()
        .ok_or_else(|| anyhow!("No default output device"))
}

/// Choose the output config closest to `target_rate` / `channels`.
///
/// Ranking, most important first: channel count matches, rate is at or below the target,
/// higher rate, then sample format (`i16` first since that is what we feed).
pub fn pick_output_config(
    device: &cpal::Device,
    target_rate: u32,
    channels: u16,
) -> Result<cpal::SupportedStreamConfig> {
    let mut best: Option<(Candidate, cpal::SupportedStreamConfig)> = None;

    for range in device.supported_output_configs()? {
        let rate = pick_rate_for_range(range.min_sample_rate(), range.max_sample_rate(), target_rate);
        let candidate = Candidate {
            channels_match: range.channels() == channels,
            below: rate <= target_rate,
            rate,
            format_rank: sample_format_rank(range.sample_format()),
        };
        let replace = best
            .as_ref()
            .map(|(b, _)| candidate.is_better_than(b))
            .unwrap_or(true);
        if replace {
            best = Some((candidate, range.with_sample_rate(rate)));
        }
    }

    best.map(|(_, cfg)| cfg)
        .ok_or_else(|| anyhow!("No supported output configs"))
}

/// Pick a small fixed buffer size when the device reports a range.
///
/// The ticker already keeps a few blocks in flight, so the device buffer only needs to
/// cover scheduling jitter. Returns `None` to let CPAL use the device default.
pub fn pick_buffer_size(config: &cpal::SupportedStreamConfig) -> Option<cpal::BufferSize> {
    match config.buffer_size() {
        cpal::SupportedBufferSize::Range { min, max } => {
            const TARGET_FRAMES: u32 = 1_024;
            Some(cpal::BufferSize::Fixed(TARGET_FRAMES.clamp(*min, *max)))
        }
        cpal::SupportedBufferSize::Unknown => None,
    }
}

/// Print available output devices to stdout.
pub fn list_devices(host: &cpal::Host) -> Result<()> {
    let devices = host.output_devices().context("No output devices")?;
    for (i, d) in devices.enumerate() {
        println!("#{i}: {}", d.description()?);
    }
    Ok(())
}

#[derive(Clone, Copy, Debug)]
struct Candidate {
    channels_match: bool,
    below: bool,
    rate: u32,
    format_rank: u8,
}

impl Candidate {
    fn is_better_than(&self, other: &Candidate) -> bool {
        if self.channels_match != other.channels_match {
            self.channels_match
        } else if self.below != other.below {
            self.below
        } else if self.rate != other.rate {
            if self.below {
                self.rate > other.rate
            } else {
                self.rate < other.rate
            }
        } else {
            self.format_rank < other.format_rank
        }
    }
}

fn pick_rate_for_range(min: u32, max: u32, target: u32) -> u32 {
    target.clamp(min, max.max(min))
}

fn sample_format_rank(format: cpal::SampleFormat) -> u8 {
    match format {
        cpal::SampleFormat::I16 => 0,
        cpal::SampleFormat::F32 => 1,
        cpal::SampleFormat::I32 => 2,
        cpal::SampleFormat::U16 => 3,
        _ => 10,
    }
}

fn matches_device_name(name: &str, needle: &str) -> bool {
    let needle = needle.trim();
    if needle.is_empty() {
        return false;
    }
    name.to_lowercase().contains(&needle.to_lowercase())
}

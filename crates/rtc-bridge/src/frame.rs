//! Decoded audio frames and 16-bit PCM conversion.
//!
//! Frame buffers are laid out the way the engine delivers them: little-endian signed
//! 16-bit samples, interleaved by channel.

use crate::error::FrameShapeError;

/// Bytes per sample for the only PCM layout this crate converts.
pub const PCM16_BYTES_PER_SAMPLE: usize = 2;

/// One unit of decoded audio handed over by the engine callback.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AudioFrame {
    /// Raw interleaved sample bytes.
    pub buffer: Vec<u8>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Interleaved channel count.
    pub channels: u16,
    /// Width of one sample in bytes.
    pub bytes_per_sample: usize,
}

impl AudioFrame {
    /// Build a 16-bit PCM frame from raw little-endian bytes.
    pub fn pcm16(buffer: Vec<u8>, sample_rate: u32, channels: u16) -> Self {
        Self {
            buffer,
            sample_rate,
            channels,
            bytes_per_sample: PCM16_BYTES_PER_SAMPLE,
        }
    }

    /// Samples per channel carried by this frame (0 for malformed metadata).
    pub fn samples_per_channel(&self) -> usize {
        let stride = self.bytes_per_sample * self.channels as usize;
        if stride == 0 {
            0
        } else {
            self.buffer.len() / stride
        }
    }
}

/// Decode consecutive little-endian byte pairs into `i16` samples.
///
/// A trailing odd byte is ignored.
pub fn pcm16le_to_i16(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(PCM16_BYTES_PER_SAMPLE)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Encode samples as little-endian 16-bit PCM bytes.
pub fn i16_to_pcm16le(samples: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * PCM16_BYTES_PER_SAMPLE);
    for s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
    out
}

/// Convert a received frame into interleaved `i16` samples.
///
/// Frames that are not 16-bit or carry no data are refused; callers are expected to log
/// and skip them rather than abort.
pub fn frame_samples(frame: &AudioFrame) -> Result<Vec<i16>, FrameShapeError> {
    if frame.bytes_per_sample != PCM16_BYTES_PER_SAMPLE {
        return Err(FrameShapeError::UnsupportedSampleWidth(frame.bytes_per_sample));
    }
    if frame.buffer.is_empty() {
        return Err(FrameShapeError::EmptyBuffer);
    }
    Ok(pcm16le_to_i16(&frame.buffer))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcm16le_decodes_each_byte_pair() {
        let bytes = [0x01, 0x00, 0xff, 0xff, 0x00, 0x80, 0xff, 0x7f];
        assert_eq!(pcm16le_to_i16(&bytes), vec![1, -1, i16::MIN, i16::MAX]);
    }

    #[test]
    fn pcm16le_ignores_trailing_odd_byte() {
        assert_eq!(pcm16le_to_i16(&[0x10, 0x00, 0x42]), vec![16]);
        assert!(pcm16le_to_i16(&[0x42]).is_empty());
    }

    #[test]
    fn pcm16le_matches_direct_decoding_for_long_buffers() {
        let bytes: Vec<u8> = (0..=255u8).cycle().take(2 * 300).collect();
        let samples = pcm16le_to_i16(&bytes);
        assert_eq!(samples.len(), 300);
        for (i, s) in samples.iter().enumerate() {
            let expected = i16::from_le_bytes([bytes[2 * i], bytes[2 * i + 1]]);
            assert_eq!(*s, expected);
        }
    }

    #[test]
    fn encode_then_decode_preserves_samples() {
        let samples = vec![0, 1, -1, 1234, -32768, 32767];
        assert_eq!(pcm16le_to_i16(&i16_to_pcm16le(&samples)), samples);
    }

    #[test]
    fn frame_samples_rejects_wrong_width() {
        let frame = AudioFrame {
            buffer: vec![0; 8],
            sample_rate: 16_000,
            channels: 1,
            bytes_per_sample: 4,
        };
        assert_eq!(
            frame_samples(&frame),
            Err(FrameShapeError::UnsupportedSampleWidth(4))
        );
    }

    #[test]
    fn frame_samples_rejects_empty_buffer() {
        let frame = AudioFrame::pcm16(Vec::new(), 16_000, 1);
        assert_eq!(frame_samples(&frame), Err(FrameShapeError::EmptyBuffer));
    }

    #[test]
    fn samples_per_channel_accounts_for_interleaving() {
        let frame = AudioFrame::pcm16(vec![0; 640], 16_000, 2);
        assert_eq!(frame.samples_per_channel(), 160);
        let broken = AudioFrame::pcm16(vec![0; 4], 16_000, 0);
        assert_eq!(broken.samples_per_channel(), 0);
    }
}

//! Decoded audio to device format: interleaved native-endian S16 at the
//! negotiated channel count. Sample-rate conversion is not performed; the
//! device is opened at the stream's rate and a mismatch is an error.

use crate::decoder::{AudioFrame, AudioSamples};
use crate::error::{PlaybackError, PlaybackResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleConverter {
    sample_rate: u32,
    channels: u16,
}

#[inline]
fn f32_to_s16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

impl SampleConverter {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self { sample_rate, channels }
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Append the converted frame to `out`, returning the bytes written.
    pub fn convert(&self, frame: &AudioFrame, out: &mut Vec<u8>) -> PlaybackResult<usize> {
        if frame.sample_rate != self.sample_rate {
            return Err(PlaybackError::Resample(format!(
                "source rate {} Hz, device rate {} Hz",
                frame.sample_rate, self.sample_rate
            )));
        }
        if frame.channels == 0 || self.channels == 0 {
            return Err(PlaybackError::Resample("zero channel layout".into()));
        }

        let in_ch = frame.channels as usize;
        let out_ch = self.channels as usize;
        let samples: Vec<i16> = match &frame.samples {
            AudioSamples::S16(s) => s.clone(),
            AudioSamples::F32(s) => s.iter().copied().map(f32_to_s16).collect(),
        };

        let start = out.len();
        out.reserve(frame.frames() * out_ch * 2);
        for chunk in samples.chunks_exact(in_ch) {
            if out_ch == 1 && in_ch > 1 {
                let sum: i32 = chunk.iter().map(|&s| s as i32).sum();
                out.extend_from_slice(&((sum / in_ch as i32) as i16).to_ne_bytes());
                continue;
            }
            for ch in 0..out_ch {
                // Mono feeds every output channel; extra inputs are dropped.
                let sample = chunk[ch.min(in_ch - 1)];
                out.extend_from_slice(&sample.to_ne_bytes());
            }
        }
        Ok(out.len() - start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_s16(bytes: &[u8]) -> Vec<i16> {
        bytes
            .chunks_exact(2)
            .map(|b| i16::from_ne_bytes([b[0], b[1]]))
            .collect()
    }

    #[test]
    fn passes_matching_layout_through() {
        let converter = SampleConverter::new(48_000, 2);
        let frame = AudioFrame {
            samples: AudioSamples::S16(vec![1, -1, 2, -2]),
            sample_rate: 48_000,
            channels: 2,
        };
        let mut out = Vec::new();
        assert_eq!(converter.convert(&frame, &mut out).expect("convert"), 8);
        assert_eq!(decode_s16(&out), vec![1, -1, 2, -2]);
    }

    #[test]
    fn converts_float_and_duplicates_mono() {
        let converter = SampleConverter::new(44_100, 2);
        let frame = AudioFrame {
            samples: AudioSamples::F32(vec![1.0, -2.0]),
            sample_rate: 44_100,
            channels: 1,
        };
        let mut out = Vec::new();
        converter.convert(&frame, &mut out).expect("convert");
        assert_eq!(decode_s16(&out), vec![32767, 32767, -32767, -32767]);
    }

    #[test]
    fn downmixes_to_mono() {
        let converter = SampleConverter::new(44_100, 1);
        let frame = AudioFrame {
            samples: AudioSamples::S16(vec![100, 300, -50, -150]),
            sample_rate: 44_100,
            channels: 2,
        };
        let mut out = Vec::new();
        converter.convert(&frame, &mut out).expect("convert");
        assert_eq!(decode_s16(&out), vec![200, -100]);
    }

    #[test]
    fn keeps_leading_channels_of_surround() {
        let converter = SampleConverter::new(44_100, 2);
        let frame = AudioFrame {
            samples: AudioSamples::S16(vec![1, 2, 3, 4, 5, 6]),
            sample_rate: 44_100,
            channels: 6,
        };
        let mut out = Vec::new();
        converter.convert(&frame, &mut out).expect("convert");
        assert_eq!(decode_s16(&out), vec![1, 2]);
    }

    #[test]
    fn rate_mismatch_is_a_resample_error() {
        let converter = SampleConverter::new(48_000, 2);
        let frame = AudioFrame {
            samples: AudioSamples::S16(vec![0; 4]),
            sample_rate: 44_100,
            channels: 2,
        };
        let err = converter.convert(&frame, &mut Vec::new()).expect_err("mismatch");
        assert!(err.is_recoverable());
    }
}

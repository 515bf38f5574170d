//! Audio output devices.
//!
//! The device owns the schedule: it calls the registered pull callback from
//! its own thread whenever it needs another buffer of interleaved
//! native-endian S16 samples.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::{PlaybackError, PlaybackResult};

/// Fills a device buffer. Runs on the device thread.
pub type PullCallback = Box<dyn FnMut(&mut [u8]) + Send>;

/// Output format. Samples are always signed 16-bit interleaved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioSpec {
    pub sample_rate: u32,
    pub channels: u16,
    /// Device buffer size in sample frames
    pub buffer_samples: u32,
}

impl AudioSpec {
    pub fn buffer_bytes(&self) -> usize {
        self.buffer_samples as usize * self.channels as usize * 2
    }

    pub fn buffer_duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.buffer_samples as f64 / self.sample_rate as f64)
    }
}

pub trait AudioOutput {
    /// Open the device close to `wanted`. Returns the format actually obtained.
    fn open(&mut self, wanted: AudioSpec) -> PlaybackResult<AudioSpec>;

    /// Register the pull callback and begin invoking it.
    fn start(&mut self, callback: PullCallback) -> PlaybackResult<()>;

    /// Stop invoking the callback and release the device. Idempotent.
    fn close(&mut self);
}

// ============================================================================
// Paced (headless) output
// ============================================================================

/// Pulls buffers at real-time pace on a background thread and discards them.
#[derive(Default)]
pub struct PacedAudioOutput {
    spec: Option<AudioSpec>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl PacedAudioOutput {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AudioOutput for PacedAudioOutput {
    fn open(&mut self, wanted: AudioSpec) -> PlaybackResult<AudioSpec> {
        if wanted.sample_rate == 0 || wanted.channels == 0 || wanted.buffer_samples == 0 {
            return Err(PlaybackError::AudioOutput(format!("unusable spec {:?}", wanted)));
        }
        self.spec = Some(wanted);
        Ok(wanted)
    }

    fn start(&mut self, mut callback: PullCallback) -> PlaybackResult<()> {
        let Some(spec) = self.spec else {
            return Err(PlaybackError::AudioOutput("device not opened".into()));
        };
        self.running.store(true, Ordering::SeqCst);
        let running = self.running.clone();

        let handle = thread::Builder::new()
            .name("duet-audio".into())
            .spawn(move || {
                let mut buffer = vec![0u8; spec.buffer_bytes()];
                let period = spec.buffer_duration();
                let mut deadline = Instant::now();
                while running.load(Ordering::SeqCst) {
                    callback(&mut buffer);
                    deadline += period;
                    let now = Instant::now();
                    if deadline > now {
                        thread::sleep(deadline - now);
                    }
                }
            })
            .map_err(|e| PlaybackError::AudioOutput(e.to_string()))?;
        self.thread = Some(handle);
        tracing::debug!("Paced audio output started at {} Hz", spec.sample_rate);
        Ok(())
    }

    fn close(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                tracing::warn!("Audio thread panicked");
            }
        }
    }
}

impl Drop for PacedAudioOutput {
    fn drop(&mut self) {
        self.close();
    }
}

// ============================================================================
// Device sample formats
// ============================================================================

/// Sample formats a device stream can be built with, best first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DeviceFormat {
    /// Native format of the pull callback
    I16,
    F32,
    U16,
}

/// Pick a format and channel count from what the device offers at the
/// wanted rate. The wanted channel count wins; otherwise stereo, then mono.
pub fn choose_device_config(
    offered: &[(DeviceFormat, u16)],
    wanted_channels: u16,
) -> Option<(DeviceFormat, u16)> {
    let best = |accept: &dyn Fn(u16) -> bool| {
        offered
            .iter()
            .copied()
            .filter(|&(_, channels)| accept(channels))
            .min_by_key(|&(format, channels)| (format, std::cmp::Reverse(channels)))
    };
    best(&|channels| channels == wanted_channels)
        .or_else(|| best(&|channels| (1..=2).contains(&channels)))
}

pub fn s16_to_f32(src: &[i16], dst: &mut [f32]) {
    for (out, &sample) in dst.iter_mut().zip(src) {
        *out = sample as f32 / 32_768.0;
    }
}

pub fn s16_to_u16(src: &[i16], dst: &mut [u16]) {
    for (out, &sample) in dst.iter_mut().zip(src) {
        *out = (sample as i32 + 32_768) as u16;
    }
}

// ============================================================================
// cpal output
// ============================================================================

#[cfg(feature = "audio")]
pub use self::device::CpalAudioOutput;

#[cfg(feature = "audio")]
mod device {
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::{SampleFormat, SampleRate, Stream, StreamConfig};

    use super::{
        choose_device_config, s16_to_f32, s16_to_u16, AudioOutput, AudioSpec, DeviceFormat,
        PullCallback,
    };
    use crate::error::{PlaybackError, PlaybackResult};

    fn device_format(format: SampleFormat) -> Option<DeviceFormat> {
        match format {
            SampleFormat::I16 => Some(DeviceFormat::I16),
            SampleFormat::F32 => Some(DeviceFormat::F32),
            SampleFormat::U16 => Some(DeviceFormat::U16),
            _ => None,
        }
    }

    /// System default output device via cpal. Not `Send`: keep it on the
    /// thread that created it.
    #[derive(Default)]
    pub struct CpalAudioOutput {
        device: Option<(cpal::Device, StreamConfig, DeviceFormat)>,
        stream: Option<Stream>,
    }

    impl CpalAudioOutput {
        pub fn new() -> Self {
            Self::default()
        }

        fn negotiate(
            device: &cpal::Device,
            wanted: AudioSpec,
        ) -> PlaybackResult<(AudioSpec, DeviceFormat)> {
            let offered: Vec<(DeviceFormat, u16)> = device
                .supported_output_configs()
                .map_err(|e| PlaybackError::AudioOutput(e.to_string()))?
                .filter(|r| {
                    r.min_sample_rate().0 <= wanted.sample_rate
                        && wanted.sample_rate <= r.max_sample_rate().0
                })
                .filter_map(|r| device_format(r.sample_format()).map(|f| (f, r.channels())))
                .collect();

            let (format, channels) = choose_device_config(&offered, wanted.channels)
                .ok_or_else(|| {
                    PlaybackError::AudioOutput(format!(
                        "no i16/f32/u16 output at {} Hz",
                        wanted.sample_rate
                    ))
                })?;
            Ok((AudioSpec { channels, ..wanted }, format))
        }
    }

    impl AudioOutput for CpalAudioOutput {
        fn open(&mut self, wanted: AudioSpec) -> PlaybackResult<AudioSpec> {
            let host = cpal::default_host();
            let device = host
                .default_output_device()
                .ok_or_else(|| PlaybackError::AudioOutput("no output device".into()))?;
            let (spec, format) = Self::negotiate(&device, wanted)?;

            let config = StreamConfig {
                channels: spec.channels,
                sample_rate: SampleRate(spec.sample_rate),
                buffer_size: cpal::BufferSize::Default,
            };
            tracing::info!(
                "Audio device {} Hz, {} channel(s), {:?}",
                spec.sample_rate,
                spec.channels,
                format
            );
            self.device = Some((device, config, format));
            Ok(spec)
        }

        fn start(&mut self, mut callback: PullCallback) -> PlaybackResult<()> {
            let (device, config, format) = self
                .device
                .as_ref()
                .ok_or_else(|| PlaybackError::AudioOutput("device not opened".into()))?;
            let err_fn = |err| tracing::error!("Audio stream error: {}", err);
            // Non-i16 devices are filled through an S16 scratch buffer.
            let mut scratch: Vec<i16> = Vec::new();

            let stream = match format {
                DeviceFormat::I16 => device.build_output_stream(
                    config,
                    move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                        callback(bytemuck::cast_slice_mut(data));
                    },
                    err_fn,
                    None,
                ),
                DeviceFormat::F32 => device.build_output_stream(
                    config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        scratch.resize(data.len(), 0);
                        callback(bytemuck::cast_slice_mut(scratch.as_mut_slice()));
                        s16_to_f32(&scratch, data);
                    },
                    err_fn,
                    None,
                ),
                DeviceFormat::U16 => device.build_output_stream(
                    config,
                    move |data: &mut [u16], _: &cpal::OutputCallbackInfo| {
                        scratch.resize(data.len(), 0);
                        callback(bytemuck::cast_slice_mut(scratch.as_mut_slice()));
                        s16_to_u16(&scratch, data);
                    },
                    err_fn,
                    None,
                ),
            }
            .map_err(|e| PlaybackError::AudioOutput(e.to_string()))?;
            stream
                .play()
                .map_err(|e| PlaybackError::AudioOutput(e.to_string()))?;
            self.stream = Some(stream);
            Ok(())
        }

        fn close(&mut self) {
            if let Some(stream) = self.stream.take() {
                let _ = stream.pause();
            }
            self.device = None;
        }
    }
}

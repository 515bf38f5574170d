// Matroska/WebM source using matroska-demuxer, with openh264 for H.264
// video and symphonia (or a native path for PCM) for audio.

use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

use matroska_demuxer::{Frame, MatroskaFile, TrackEntry, TrackType};
use openh264::formats::YUVSource;

use crate::decoder::{
    AudioDecoder, AudioFrame, AudioSamples, MediaSource, ReadOutcome, VideoDecoder, VideoFrame,
};
use crate::error::{PlaybackError, PlaybackResult};
use crate::packet::{Packet, Rational, StreamInfo, StreamKind};

/// Block timestamps come back scaled to nanoseconds.
const NANOS: Rational = Rational::new(1, 1_000_000_000);

const ANNEX_B_START_CODE: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

// ============================================================================
// Source
// ============================================================================

/// Codec details kept per stream for opening decoders later.
#[derive(Debug, Clone)]
struct TrackCodec {
    codec_id: String,
    codec_private: Vec<u8>,
    bit_depth: Option<u32>,
}

pub struct MkvSource {
    mkv: MatroskaFile<File>,
    frame: Frame,
    name: String,
    streams: Vec<StreamInfo>,
    codecs: Vec<TrackCodec>,
    /// Matroska track number -> stream index
    track_index: HashMap<u64, usize>,
}

fn stream_kind(track: &TrackEntry) -> StreamKind {
    match track.track_type() {
        TrackType::Video => match track.video() {
            Some(video) => {
                let width = video.pixel_width().get() as u32;
                let height = video.pixel_height().get() as u32;
                let sample_aspect_ratio = match (video.display_width(), video.display_height()) {
                    (Some(dw), Some(dh)) => Some(Rational::new(
                        dw.get() as i64 * height as i64,
                        dh.get() as i64 * width as i64,
                    )),
                    _ => None,
                };
                let frame_duration = track
                    .default_duration()
                    .map(|ns| ns.get() as f64 / 1e9)
                    .unwrap_or(0.04);
                StreamKind::Video { width, height, frame_duration, sample_aspect_ratio }
            }
            None => StreamKind::Other,
        },
        TrackType::Audio => match track.audio() {
            Some(audio) => StreamKind::Audio {
                sample_rate: audio.sampling_frequency() as u32,
                channels: audio.channels().get() as u16,
            },
            None => StreamKind::Other,
        },
        _ => StreamKind::Other,
    }
}

impl MkvSource {
    pub fn open(path: &Path) -> PlaybackResult<Self> {
        let name = path.display().to_string();
        let file = File::open(path).map_err(|e| PlaybackError::open(&name, e))?;
        let mkv = MatroskaFile::open(file)
            .map_err(|e| PlaybackError::open(&name, format!("{:?}", e)))?;

        let mut streams = Vec::new();
        let mut codecs = Vec::new();
        let mut track_index = HashMap::new();
        for (index, track) in mkv.tracks().iter().enumerate() {
            track_index.insert(track.track_number().get(), index);
            streams.push(StreamInfo {
                index,
                codec: track.codec_id().to_string(),
                time_base: NANOS,
                kind: stream_kind(track),
            });
            codecs.push(TrackCodec {
                codec_id: track.codec_id().to_string(),
                codec_private: track.codec_private().map(<[u8]>::to_vec).unwrap_or_default(),
                bit_depth: track.audio().and_then(|a| a.bit_depth()).map(|d| d.get() as u32),
            });
        }
        tracing::info!("Opened {} with {} track(s)", name, streams.len());

        Ok(Self {
            mkv,
            frame: Frame::default(),
            name,
            streams,
            codecs,
            track_index,
        })
    }

    fn codec(&self, stream_index: usize) -> PlaybackResult<&TrackCodec> {
        self.codecs.get(stream_index).ok_or_else(|| PlaybackError::UnsupportedCodec {
            stream_index,
            codec: "<missing>".into(),
        })
    }
}

impl MediaSource for MkvSource {
    fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    fn read_packet(&mut self) -> PlaybackResult<ReadOutcome> {
        match self.mkv.next_frame(&mut self.frame) {
            Ok(true) => {
                let stream_index = self
                    .track_index
                    .get(&(self.frame.track as u64))
                    .copied()
                    .unwrap_or(self.streams.len());
                let timestamp = self.frame.timestamp as i64;
                let mut packet = Packet::new(stream_index, std::mem::take(&mut self.frame.data))
                    .with_timestamps(Some(timestamp), None);
                packet.duration = self.frame.duration.map(|d| d as i64);
                packet.keyframe = self.frame.is_keyframe.unwrap_or(false);
                Ok(ReadOutcome::Packet(packet))
            }
            Ok(false) => Ok(ReadOutcome::EndOfStream),
            Err(e) => Err(PlaybackError::Read(format!("{:?}", e))),
        }
    }

    fn open_video_decoder(&mut self, stream_index: usize) -> PlaybackResult<Box<dyn VideoDecoder>> {
        let codec = self.codec(stream_index)?;
        match codec.codec_id.as_str() {
            "V_MPEG4/ISO/AVC" => Ok(Box::new(H264Decoder::new(&codec.codec_private)?)),
            other => Err(PlaybackError::UnsupportedCodec {
                stream_index,
                codec: other.to_string(),
            }),
        }
    }

    fn open_audio_decoder(&mut self, stream_index: usize) -> PlaybackResult<Box<dyn AudioDecoder>> {
        let codec = self.codec(stream_index)?.clone();
        let StreamKind::Audio { sample_rate, channels } = self.streams[stream_index].kind else {
            return Err(PlaybackError::UnsupportedCodec { stream_index, codec: codec.codec_id });
        };

        let symphonia_codec = match codec.codec_id.as_str() {
            "A_PCM/INT/LIT" => {
                let bytes_per_sample = codec.bit_depth.unwrap_or(16) as usize / 8;
                return Ok(Box::new(LinearPcmDecoder { bytes_per_sample, sample_rate, channels }));
            }
            id if id.starts_with("A_AAC") => symphonia::core::codecs::CODEC_TYPE_AAC,
            "A_FLAC" => symphonia::core::codecs::CODEC_TYPE_FLAC,
            "A_MPEG/L3" => symphonia::core::codecs::CODEC_TYPE_MP3,
            "A_VORBIS" => symphonia::core::codecs::CODEC_TYPE_VORBIS,
            other => {
                return Err(PlaybackError::UnsupportedCodec {
                    stream_index,
                    codec: other.to_string(),
                })
            }
        };
        Ok(Box::new(SymphoniaAudioDecoder::new(
            stream_index,
            symphonia_codec,
            &codec,
            sample_rate,
            channels,
        )?))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// ============================================================================
// H.264 (openh264)
// ============================================================================

/// Convert length-prefixed NAL units to Annex B. Data already in Annex B is
/// passed through.
fn avcc_to_annexb(data: &[u8], nal_length_size: usize) -> Vec<u8> {
    if data.starts_with(&ANNEX_B_START_CODE) || data.starts_with(&[0, 0, 1]) {
        return data.to_vec();
    }

    let mut annexb = Vec::with_capacity(data.len() + 32);
    let mut offset = 0;
    while offset + nal_length_size <= data.len() {
        let nal_len = data[offset..offset + nal_length_size]
            .iter()
            .fold(0usize, |acc, &b| (acc << 8) | b as usize);
        offset += nal_length_size;
        if nal_len == 0 || offset + nal_len > data.len() {
            break;
        }
        annexb.extend_from_slice(&ANNEX_B_START_CODE);
        annexb.extend_from_slice(&data[offset..offset + nal_len]);
        offset += nal_len;
    }
    annexb
}

/// SPS/PPS from an AVCDecoderConfigurationRecord as Annex B, plus the NAL
/// length size used by the stream's packets.
fn parse_avcc(record: &[u8]) -> Option<(Vec<u8>, usize)> {
    if record.len() < 7 || record[0] != 1 {
        return None;
    }
    let nal_length_size = ((record[4] & 0x03) + 1) as usize;
    let mut out = Vec::with_capacity(record.len() + 16);
    let mut offset = 5;

    // SPS count sits in the low 5 bits; PPS count is a full byte.
    for mask in [0x1F, 0xFF] {
        let count = (*record.get(offset)? & mask) as usize;
        offset += 1;
        for _ in 0..count {
            let len = u16::from_be_bytes([*record.get(offset)?, *record.get(offset + 1)?]) as usize;
            offset += 2;
            out.extend_from_slice(&ANNEX_B_START_CODE);
            out.extend_from_slice(record.get(offset..offset + len)?);
            offset += len;
        }
    }
    Some((out, nal_length_size))
}

struct H264Decoder {
    decoder: openh264::decoder::Decoder,
    nal_length_size: usize,
}

impl H264Decoder {
    fn new(codec_private: &[u8]) -> PlaybackResult<Self> {
        let mut decoder = openh264::decoder::Decoder::new()
            .map_err(|e| PlaybackError::Decode(format!("OpenH264 init: {:?}", e)))?;

        let nal_length_size = match parse_avcc(codec_private) {
            Some((parameter_sets, size)) => {
                // Parameter sets never yield a picture.
                let _ = decoder.decode(&parameter_sets);
                size
            }
            None => 4,
        };
        Ok(Self { decoder, nal_length_size })
    }
}

impl VideoDecoder for H264Decoder {
    fn decode(&mut self, packet: &Packet) -> PlaybackResult<Vec<VideoFrame>> {
        let data = avcc_to_annexb(&packet.data, self.nal_length_size);
        match self.decoder.decode(&data) {
            Ok(Some(yuv)) => {
                let (width, height) = yuv.dimensions();
                let (y_stride, u_stride, v_stride) = yuv.strides();
                Ok(vec![VideoFrame {
                    planes: [yuv.y().to_vec(), yuv.u().to_vec(), yuv.v().to_vec()],
                    strides: [y_stride, u_stride, v_stride],
                    width: width as u32,
                    height: height as u32,
                    pts: packet.pts,
                    dts: packet.dts,
                    repeat_count: 0,
                }])
            }
            Ok(None) => Ok(Vec::new()),
            Err(e) => Err(PlaybackError::Decode(format!("OpenH264: {:?}", e))),
        }
    }

    fn name(&self) -> &str {
        "openh264"
    }
}

// ============================================================================
// Audio
// ============================================================================

/// Little-endian signed integer PCM of 8 to 32 bits.
struct LinearPcmDecoder {
    bytes_per_sample: usize,
    sample_rate: u32,
    channels: u16,
}

impl AudioDecoder for LinearPcmDecoder {
    fn decode(&mut self, packet: &Packet) -> PlaybackResult<Vec<AudioFrame>> {
        let data = &packet.data;
        let samples = match self.bytes_per_sample {
            2 => AudioSamples::S16(
                data.chunks_exact(2)
                    .map(|c| i16::from_le_bytes([c[0], c[1]]))
                    .collect(),
            ),
            1 => AudioSamples::F32(data.iter().map(|&b| (b as f32 - 128.0) / 128.0).collect()),
            3 => AudioSamples::F32(
                data.chunks_exact(3)
                    .map(|c| {
                        let sign = if c[2] & 0x80 != 0 { 0xFF } else { 0x00 };
                        i32::from_le_bytes([c[0], c[1], c[2], sign]) as f32 / 8_388_608.0
                    })
                    .collect(),
            ),
            4 => AudioSamples::F32(
                data.chunks_exact(4)
                    .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]) as f32 / 2_147_483_648.0)
                    .collect(),
            ),
            other => {
                return Err(PlaybackError::Decode(format!("{}-byte PCM samples", other)));
            }
        };
        Ok(vec![AudioFrame {
            samples,
            sample_rate: self.sample_rate,
            channels: self.channels,
        }])
    }

    fn name(&self) -> &str {
        "pcm"
    }
}

struct SymphoniaAudioDecoder {
    decoder: Box<dyn symphonia::core::codecs::Decoder>,
    name: String,
}

impl SymphoniaAudioDecoder {
    fn new(
        stream_index: usize,
        codec: symphonia::core::codecs::CodecType,
        track: &TrackCodec,
        sample_rate: u32,
        channels: u16,
    ) -> PlaybackResult<Self> {
        use symphonia::core::audio::Channels;
        use symphonia::core::codecs::{CodecParameters, DecoderOptions};

        let layout = Channels::from_bits_truncate((1u32 << channels.clamp(1, 31)) - 1);
        let mut params = CodecParameters::new();
        params
            .for_codec(codec)
            .with_sample_rate(sample_rate)
            .with_channels(layout);
        if !track.codec_private.is_empty() {
            params.with_extra_data(track.codec_private.clone().into_boxed_slice());
        }

        let decoder = symphonia::default::get_codecs()
            .make(&params, &DecoderOptions::default())
            .map_err(|e| PlaybackError::UnsupportedCodec {
                stream_index,
                codec: format!("{} ({})", track.codec_id, e),
            })?;
        Ok(Self { decoder, name: format!("symphonia {}", track.codec_id) })
    }
}

impl AudioDecoder for SymphoniaAudioDecoder {
    fn decode(&mut self, packet: &Packet) -> PlaybackResult<Vec<AudioFrame>> {
        use symphonia::core::audio::SampleBuffer;
        use symphonia::core::formats::Packet as SymphoniaPacket;

        let ts = packet.pts.unwrap_or(0).max(0) as u64;
        let dur = packet.duration.unwrap_or(0).max(0) as u64;
        let sym_packet = SymphoniaPacket::new_from_slice(0, ts, dur, &packet.data);

        let decoded = self
            .decoder
            .decode(&sym_packet)
            .map_err(|e| PlaybackError::Decode(format!("Symphonia: {}", e)))?;
        let spec = *decoded.spec();
        if decoded.frames() == 0 {
            return Ok(Vec::new());
        }
        let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        buffer.copy_interleaved_ref(decoded);

        Ok(vec![AudioFrame {
            samples: AudioSamples::F32(buffer.samples().to_vec()),
            sample_rate: spec.rate,
            channels: spec.channels.count() as u16,
        }])
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_length_prefixed_nals() {
        let avcc = [0, 0, 0, 2, 0x67, 0x42, 0, 0, 0, 1, 0x68];
        assert_eq!(
            avcc_to_annexb(&avcc, 4),
            vec![0, 0, 0, 1, 0x67, 0x42, 0, 0, 0, 1, 0x68]
        );
        let two_byte = [0, 1, 0x65];
        assert_eq!(avcc_to_annexb(&two_byte, 2), vec![0, 0, 0, 1, 0x65]);
    }

    #[test]
    fn annexb_passes_through() {
        let annexb = [0, 0, 0, 1, 0x65, 0x88];
        assert_eq!(avcc_to_annexb(&annexb, 4), annexb.to_vec());
    }

    #[test]
    fn parses_avc_configuration_record() {
        let record = [
            1, 0x42, 0xC0, 0x1E, 0xFF, // version, profile, compat, level, length size 4
            0xE1, 0, 2, 0x67, 0x42, // one SPS
            1, 0, 1, 0x68, // one PPS
        ];
        let (sets, size) = parse_avcc(&record).expect("record");
        assert_eq!(size, 4);
        assert_eq!(sets, vec![0, 0, 0, 1, 0x67, 0x42, 0, 0, 0, 1, 0x68]);
        assert!(parse_avcc(&record[..9]).is_none());
        assert!(parse_avcc(&[0; 8]).is_none());
    }

    #[test]
    fn linear_pcm_widths() {
        let mut decoder = LinearPcmDecoder { bytes_per_sample: 3, sample_rate: 48_000, channels: 1 };
        let packet = Packet::new(0, vec![0x00, 0x00, 0x80]);
        let frames = decoder.decode(&packet).expect("decode");
        assert_eq!(frames[0].samples, AudioSamples::F32(vec![-1.0]));

        let mut decoder = LinearPcmDecoder { bytes_per_sample: 2, sample_rate: 48_000, channels: 1 };
        let frames = decoder.decode(&Packet::new(0, vec![0x34, 0x12])).expect("decode");
        assert_eq!(frames[0].samples, AudioSamples::S16(vec![0x1234]));
    }
}

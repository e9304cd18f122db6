//! Audio payload decoding.
//!
//! Turns a base64 payload into interleaved f32 samples. The container is
//! sniffed from the bytes by symphonia, so WAV, FLAC, OGG/Vorbis and MP3
//! uploads all take the same path.

use base64::Engine;
use std::io::Cursor;
use std::panic;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::debug;

use crate::error::{panic_message, ClassifyError, ClassifyResult};

/// Decoded PCM audio at its native rate and channel layout.
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    /// Interleaved samples, frame-major when `channels > 1`
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of interleaved channels
    pub channels: u16,
}

impl AudioBuffer {
    /// Create a new audio buffer.
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples,
            sample_rate,
            channels,
        }
    }

    /// Create a single-channel buffer.
    pub fn mono(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self::new(samples, sample_rate, 1)
    }

    /// Number of sample frames (samples per channel).
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    /// Whether the buffer holds no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration in seconds.
    pub fn duration_secs(&self) -> f32 {
        self.frames() as f32 / self.sample_rate as f32
    }
}

/// Decode a base64 audio payload into PCM samples.
pub fn decode_base64(payload: &str) -> ClassifyResult<AudioBuffer> {
    let bytes = decode_payload(payload)?;
    decode_bytes(bytes)
}

/// Decode base64 text to raw bytes.
///
/// Accepts browser data URLs (`data:audio/wav;base64,...`) and line-wrapped
/// input.
pub fn decode_payload(payload: &str) -> ClassifyResult<Vec<u8>> {
    let trimmed = payload.trim();
    let data = match trimmed.strip_prefix("data:") {
        Some(rest) => rest.split_once(',').map(|(_, d)| d).unwrap_or(rest),
        None => trimmed,
    };

    let compact: String = data.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let bytes = base64::engine::general_purpose::STANDARD.decode(compact)?;
    Ok(bytes)
}

/// Parse an in-memory audio file into interleaved f32 samples.
///
/// Malformed headers can trip assertions inside symphonia (a WAV declaring
/// a 0 Hz rate, for one). Such panics are reported as `AudioFormat` errors.
pub fn decode_bytes(bytes: Vec<u8>) -> ClassifyResult<AudioBuffer> {
    match panic::catch_unwind(move || decode_container(bytes)) {
        Ok(result) => result,
        Err(payload) => Err(ClassifyError::AudioFormat(format!(
            "malformed audio container: {}",
            panic_message(payload.as_ref())
        ))),
    }
}

fn decode_container(bytes: Vec<u8>) -> ClassifyResult<AudioBuffer> {
    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());

    let probed = symphonia::default::get_probe()
        .format(
            &Hint::new(),
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| ClassifyError::AudioFormat(format!("failed to probe container: {e}")))?;

    let mut format = probed.format;
    let track = format
        .default_track()
        .ok_or_else(|| ClassifyError::AudioFormat("no audio track found".into()))?;

    let sample_rate = track
        .codec_params
        .sample_rate
        .filter(|&rate| rate > 0)
        .ok_or_else(|| ClassifyError::AudioFormat("unknown sample rate".into()))?;
    let mut channels = track.codec_params.channels.map(|c| c.count() as u16);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| ClassifyError::AudioFormat(format!("unsupported codec: {e}")))?;

    let track_id = track.id;
    let mut samples: Vec<f32> = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => {
                return Err(ClassifyError::AudioFormat(format!(
                    "failed to read packet: {e}"
                )))
            }
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            // Corrupt frame, keep going
            Err(SymphoniaError::DecodeError(e)) => {
                debug!("skipping undecodable packet: {e}");
                continue;
            }
            Err(e) => {
                return Err(ClassifyError::AudioFormat(format!(
                    "failed to decode packet: {e}"
                )))
            }
        };

        let spec = *decoded.spec();
        if channels.is_none() {
            channels = Some(spec.channels.count() as u16);
        }
        let mut sample_buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        sample_buf.copy_interleaved_ref(decoded);
        samples.extend_from_slice(sample_buf.samples());
    }

    let channels = channels.unwrap_or(1);
    debug!(
        samples = samples.len(),
        sample_rate, channels, "Decoded audio payload"
    );

    Ok(AudioBuffer::new(samples, sample_rate, channels))
}

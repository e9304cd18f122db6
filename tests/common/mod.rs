#![allow(dead_code)]

use audio_cnn_inference::gguf::{
    GgufValue, GgufWriter, ARCHITECTURE, KEY_CLASSES, KEY_STAGE_BLOCKS, KEY_STAGE_CHANNELS,
    KEY_STEM_CHANNELS,
};
use audio_cnn_inference::model::{AudioCnnConfig, StageConfig};
use base64::Engine as _;
use hound::{SampleFormat, WavSpec, WavWriter};
use std::io::Cursor;
use std::path::{Path, PathBuf};

const CLASSES: [&str; 8] = [
    "dog",
    "rain",
    "sea_waves",
    "crying_baby",
    "clock_tick",
    "sneezing",
    "helicopter",
    "chainsaw",
];

pub fn class_names(n: usize) -> Vec<String> {
    CLASSES[..n].iter().map(|s| s.to_string()).collect()
}

/// Small two-stage layout that keeps CPU tests fast.
pub fn tiny_config(num_classes: usize) -> AudioCnnConfig {
    AudioCnnConfig::new(num_classes).with_layout(
        4,
        vec![
            StageConfig { channels: 4, blocks: 1 },
            StageConfig { channels: 8, blocks: 1 },
        ],
    )
}

/// Checkpoint with deterministic weights for `config`.
pub fn checkpoint_bytes(config: &AudioCnnConfig, classes: &[String]) -> Vec<u8> {
    let mut writer = GgufWriter::new();
    writer
        .metadata("general.architecture", GgufValue::String(ARCHITECTURE.into()))
        .metadata(
            KEY_CLASSES,
            GgufValue::Array(classes.iter().cloned().map(GgufValue::String).collect()),
        )
        .metadata(KEY_STEM_CHANNELS, GgufValue::U32(config.stem_channels as u32))
        .metadata(
            KEY_STAGE_CHANNELS,
            GgufValue::Array(
                config
                    .stages
                    .iter()
                    .map(|s| GgufValue::U32(s.channels as u32))
                    .collect(),
            ),
        )
        .metadata(
            KEY_STAGE_BLOCKS,
            GgufValue::Array(
                config
                    .stages
                    .iter()
                    .map(|s| GgufValue::U32(s.blocks as u32))
                    .collect(),
            ),
        );

    for (t, (name, shape)) in config.parameter_shapes().into_iter().enumerate() {
        let len: usize = shape.iter().product();
        let is_gamma = shape.len() == 1 && name.ends_with(".weight");
        let values: Vec<f32> = if is_gamma || name.ends_with("running_var") {
            vec![1.0; len]
        } else {
            (0..len).map(|i| 0.05 * ((i * 13 + t * 7) as f32 * 0.11).sin()).collect()
        };
        writer.tensor_f32(&name, &shape, &values).unwrap();
    }
    writer.to_bytes().unwrap()
}

/// Write a tiny checkpoint into `dir` and return its path.
pub fn write_checkpoint(dir: &Path, num_classes: usize) -> PathBuf {
    let path = dir.join("model.gguf");
    let bytes = checkpoint_bytes(&tiny_config(num_classes), &class_names(num_classes));
    std::fs::write(&path, bytes).unwrap();
    path
}

pub fn sine(freq: f32, sample_rate: u32, seconds: f32) -> Vec<f32> {
    let n = (sample_rate as f32 * seconds) as usize;
    (0..n)
        .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate as f32).sin() * 0.5)
        .collect()
}

/// 16-bit PCM WAV from interleaved float samples.
pub fn wav_bytes(samples: &[f32], sample_rate: u32, channels: u16) -> Vec<u8> {
    let spec = WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut cursor, spec).unwrap();
        for &s in samples {
            writer.write_sample((s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

pub fn wav_base64(samples: &[f32], sample_rate: u32, channels: u16) -> String {
    base64::engine::general_purpose::STANDARD.encode(wav_bytes(samples, sample_rate, channels))
}

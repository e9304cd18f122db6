//! GGUF checkpoint loader for AudioCnn.
//!
//! Reads the architecture and the ordered class list from metadata, checks
//! every expected tensor up front, then builds the model on the requested
//! device.

use anyhow::{bail, ensure, Context, Result};
use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};
use std::io::{BufReader, Read, Seek};
use std::path::Path;
use tracing::info;

use super::reader::GgufReader;
use crate::model::block::ResidualBlock;
use crate::model::config::{AudioCnnConfig, StageConfig};
use crate::model::layers::{BatchNorm, Conv2d, ConvBn, Linear};
use crate::model::AudioCnn;

/// Value of `general.architecture` for AudioCnn checkpoints.
pub const ARCHITECTURE: &str = "audio_cnn";

pub const KEY_CLASSES: &str = "audio_cnn.classes";
pub const KEY_STEM_CHANNELS: &str = "audio_cnn.stem_channels";
pub const KEY_STAGE_CHANNELS: &str = "audio_cnn.stage_channels";
pub const KEY_STAGE_BLOCKS: &str = "audio_cnn.stage_blocks";
pub const KEY_BATCH_NORM_EPS: &str = "audio_cnn.batch_norm_eps";

/// A loaded model with its class labels (`classes[i]` names logit `i`).
pub struct Checkpoint<B: Backend> {
    pub model: AudioCnn<B>,
    pub classes: Vec<String>,
}

/// Load an AudioCnn checkpoint from a GGUF file on disk.
pub fn load_audio_cnn_from_gguf<B: Backend>(
    path: &Path,
    device: &B::Device,
) -> Result<Checkpoint<B>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open checkpoint: {}", path.display()))?;
    let mut gguf = GgufReader::open(BufReader::new(file))
        .with_context(|| format!("Failed to parse checkpoint: {}", path.display()))?;

    info!(
        "GGUF v{}, {} tensors",
        gguf.version(),
        gguf.tensor_count()
    );

    load_audio_cnn(&mut gguf, device)
}

/// Load an AudioCnn checkpoint from an open GGUF reader.
pub fn load_audio_cnn<B: Backend, R: Read + Seek>(
    gguf: &mut GgufReader<R>,
    device: &B::Device,
) -> Result<Checkpoint<B>> {
    let (config, classes) = read_config(gguf)?;
    check_tensors(gguf, &config)?;

    info!(
        classes = classes.len(),
        stem = config.stem_channels,
        stages = config.stages.len(),
        "Loading AudioCnn..."
    );

    let eps = config.batch_norm_eps;
    let stem = load_conv_bn(gguf, "stem.conv", "stem.bn", 2, 3, eps, device)?;

    let mut stages = Vec::with_capacity(config.stages.len());
    for (s, stage) in config.stages.iter().enumerate() {
        let mut blocks = Vec::with_capacity(stage.blocks);
        for b in 0..stage.blocks {
            let prefix = format!("layers.{s}.{b}");
            let stride = if b == 0 { config.stage_stride(s) } else { 1 };

            let conv1 = load_conv_bn(
                gguf,
                &format!("{prefix}.conv1"),
                &format!("{prefix}.bn1"),
                stride,
                1,
                eps,
                device,
            )?;
            let conv2 = load_conv_bn(
                gguf,
                &format!("{prefix}.conv2"),
                &format!("{prefix}.bn2"),
                1,
                1,
                eps,
                device,
            )?;
            let shortcut = if config.has_projection(s, b) {
                Some(load_conv_bn(
                    gguf,
                    &format!("{prefix}.shortcut.conv"),
                    &format!("{prefix}.shortcut.bn"),
                    stride,
                    0,
                    eps,
                    device,
                )?)
            } else {
                None
            };
            blocks.push(ResidualBlock::new(conv1, conv2, shortcut));
        }
        info!("  Stage {}/{} ({} blocks)", s + 1, config.stages.len(), stage.blocks);
        stages.push(blocks);
    }

    let fc = Linear::new(
        load_tensor::<B, R, 2>(gguf, "fc.weight", device)?,
        load_tensor::<B, R, 1>(gguf, "fc.bias", device)?,
    );

    Ok(Checkpoint {
        model: AudioCnn::new(stem, stages, fc, config),
        classes,
    })
}

/// Architecture and class labels from checkpoint metadata.
pub fn read_config<R: Read + Seek>(gguf: &GgufReader<R>) -> Result<(AudioCnnConfig, Vec<String>)> {
    match gguf.metadata("general.architecture").and_then(|v| v.as_str()) {
        Some(ARCHITECTURE) => {}
        Some(other) => bail!("Checkpoint architecture is '{other}', expected '{ARCHITECTURE}'"),
        None => bail!("Checkpoint is missing general.architecture"),
    }

    let classes = gguf
        .metadata(KEY_CLASSES)
        .context("Checkpoint is missing the class list")?
        .as_string_array()
        .with_context(|| format!("{KEY_CLASSES} must be an array of strings"))?;
    ensure!(!classes.is_empty(), "Checkpoint class list is empty");

    let mut config = AudioCnnConfig::new(classes.len());

    if let Some(v) = gguf.metadata(KEY_STEM_CHANNELS) {
        config.stem_channels = v
            .as_u64()
            .with_context(|| format!("{KEY_STEM_CHANNELS} must be an integer"))?
            as usize;
    }

    let stage_channels = gguf.metadata(KEY_STAGE_CHANNELS);
    let stage_blocks = gguf.metadata(KEY_STAGE_BLOCKS);
    match (stage_channels, stage_blocks) {
        (Some(channels), Some(blocks)) => {
            let channels = channels
                .as_u64_array()
                .with_context(|| format!("{KEY_STAGE_CHANNELS} must be an integer array"))?;
            let blocks = blocks
                .as_u64_array()
                .with_context(|| format!("{KEY_STAGE_BLOCKS} must be an integer array"))?;
            ensure!(
                channels.len() == blocks.len(),
                "{KEY_STAGE_CHANNELS} has {} entries but {KEY_STAGE_BLOCKS} has {}",
                channels.len(),
                blocks.len()
            );
            config.stages = channels
                .into_iter()
                .zip(blocks)
                .map(|(c, b)| StageConfig {
                    channels: c as usize,
                    blocks: b as usize,
                })
                .collect();
        }
        (None, None) => {}
        _ => bail!("{KEY_STAGE_CHANNELS} and {KEY_STAGE_BLOCKS} must be given together"),
    }

    ensure!(config.stem_channels > 0, "{KEY_STEM_CHANNELS} must be positive");
    for (i, stage) in config.stages.iter().enumerate() {
        ensure!(
            stage.channels > 0 && stage.blocks > 0,
            "Stage {i} has {} channels and {} blocks, both must be positive",
            stage.channels,
            stage.blocks
        );
    }

    if let Some(v) = gguf.metadata(KEY_BATCH_NORM_EPS) {
        config.batch_norm_eps = v
            .as_f32()
            .with_context(|| format!("{KEY_BATCH_NORM_EPS} must be a float"))?;
    }

    Ok((config, classes))
}

/// Verify every required tensor exists with the expected shape.
fn check_tensors<R: Read + Seek>(gguf: &GgufReader<R>, config: &AudioCnnConfig) -> Result<()> {
    for (name, expected) in config.parameter_shapes() {
        let info = gguf
            .tensor_info(&name)
            .with_context(|| format!("Tensor '{name}' not found"))?;
        let shape = info.row_major_shape();
        if name == "fc.weight" && shape.first() != expected.first() {
            bail!(
                "Classifier head has {} outputs but the checkpoint lists {} classes",
                shape.first().copied().unwrap_or(0),
                config.num_classes
            );
        }
        ensure!(
            shape == expected,
            "Tensor '{name}' has shape {shape:?}, expected {expected:?}"
        );

        // Optional conv bias, one entry per output channel
        if expected.len() == 4 {
            let bias_name = format!("{}.bias", name.trim_end_matches(".weight"));
            if let Some(bias) = gguf.tensor_info(&bias_name) {
                let bias_shape = bias.row_major_shape();
                ensure!(
                    bias_shape == [expected[0]],
                    "Tensor '{bias_name}' has shape {bias_shape:?}, expected [{}]",
                    expected[0]
                );
            }
        }
    }
    Ok(())
}

fn load_values<R: Read + Seek>(gguf: &mut GgufReader<R>, name: &str) -> Result<Vec<f32>> {
    Ok(gguf.tensor_f32(name)?.1)
}

fn load_tensor<B: Backend, R: Read + Seek, const D: usize>(
    gguf: &mut GgufReader<R>,
    name: &str,
    device: &B::Device,
) -> Result<Tensor<B, D>> {
    let (shape, values) = gguf.tensor_f32(name)?;
    ensure!(
        shape.len() == D,
        "Tensor '{name}' has rank {}, expected {D}",
        shape.len()
    );
    Ok(Tensor::from_data(TensorData::new(values, shape), device))
}

fn load_conv<B: Backend, R: Read + Seek>(
    gguf: &mut GgufReader<R>,
    prefix: &str,
    stride: usize,
    padding: usize,
    device: &B::Device,
) -> Result<Conv2d<B>> {
    let weight = load_tensor::<B, R, 4>(gguf, &format!("{prefix}.weight"), device)?;
    let bias_name = format!("{prefix}.bias");
    let bias = if gguf.tensor_info(&bias_name).is_some() {
        Some(load_tensor::<B, R, 1>(gguf, &bias_name, device)?)
    } else {
        None
    };
    Ok(Conv2d::new(weight, bias, stride, padding))
}

fn load_batch_norm<B: Backend, R: Read + Seek>(
    gguf: &mut GgufReader<R>,
    prefix: &str,
    eps: f32,
    device: &B::Device,
) -> Result<BatchNorm<B>> {
    let gamma = load_values(gguf, &format!("{prefix}.weight"))?;
    let beta = load_values(gguf, &format!("{prefix}.bias"))?;
    let mean = load_values(gguf, &format!("{prefix}.running_mean"))?;
    let var = load_values(gguf, &format!("{prefix}.running_var"))?;
    ensure!(
        var.iter().all(|&v| v + eps > 0.0),
        "'{prefix}.running_var' has negative entries"
    );
    Ok(BatchNorm::from_running_stats(
        &gamma, &beta, &mean, &var, eps, device,
    ))
}

fn load_conv_bn<B: Backend, R: Read + Seek>(
    gguf: &mut GgufReader<R>,
    conv_prefix: &str,
    bn_prefix: &str,
    stride: usize,
    padding: usize,
    eps: f32,
    device: &B::Device,
) -> Result<ConvBn<B>> {
    let conv = load_conv(gguf, conv_prefix, stride, padding, device)?;
    let bn = load_batch_norm(gguf, bn_prefix, eps, device)?;
    Ok(ConvBn::new(conv, bn))
}

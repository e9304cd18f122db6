use anyhow::{Context, Result};
use audio_cnn_inference::service::{self, DeviceKind};
use audio_cnn_inference::AudioClassifier;
use burn::backend::ndarray::NdArrayDevice;
use burn::backend::NdArray;
use burn::tensor::backend::Backend;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(name = "audio-cnn-inference", version)]
#[command(about = "Audio classification inference service", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Load a checkpoint and serve POST /inference.
    Serve {
        /// JSON config file (defaults to the per-user config, if any).
        #[arg(long)]
        config: Option<PathBuf>,

        /// GGUF checkpoint with weights and class labels.
        #[arg(long, env = "AUDIO_CNN_CHECKPOINT")]
        checkpoint: Option<PathBuf>,

        /// Listen address, e.g. 0.0.0.0:8000.
        #[arg(long, env = "AUDIO_CNN_BIND")]
        bind: Option<String>,

        /// cpu or gpu.
        #[arg(long, env = "AUDIO_CNN_DEVICE")]
        device: Option<DeviceKind>,
    },
    /// Classify one audio file and print the JSON response.
    Classify {
        /// Audio file (WAV, FLAC, OGG, MP3).
        audio: PathBuf,

        #[arg(long, env = "AUDIO_CNN_CHECKPOINT")]
        checkpoint: Option<PathBuf>,

        /// Include spectrogram, feature maps and waveform.
        #[arg(long, default_value_t = false)]
        visualize: bool,

        #[arg(long, env = "AUDIO_CNN_DEVICE")]
        device: Option<DeviceKind>,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    if let Err(e) = run(Cli::parse()) {
        error!("{e:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Serve {
            config,
            checkpoint,
            bind,
            device,
        } => {
            let mut config = service::load_config(config.as_deref())?;
            if let Some(checkpoint) = checkpoint {
                config.checkpoint_path = checkpoint;
            }
            if let Some(bind) = bind {
                config.bind_addr = bind;
            }
            if let Some(device) = device {
                config.device = device;
            }
            info!(
                checkpoint = %config.checkpoint_path.display(),
                bind = %config.bind_addr,
                device = %config.device,
                "Starting service"
            );

            match config.device {
                DeviceKind::Cpu => serve::<NdArray>(&config, NdArrayDevice::Cpu),
                #[cfg(feature = "wgpu")]
                DeviceKind::Gpu => serve::<burn::backend::Wgpu>(
                    &config,
                    burn::backend::wgpu::WgpuDevice::default(),
                ),
                #[cfg(not(feature = "wgpu"))]
                DeviceKind::Gpu => {
                    anyhow::bail!("GPU support requires building with --features wgpu")
                }
            }
        }
        Command::Classify {
            audio,
            checkpoint,
            visualize,
            device,
        } => {
            let config = service::load_config(None)?;
            let checkpoint = checkpoint.unwrap_or(config.checkpoint_path);
            match device.unwrap_or(config.device) {
                DeviceKind::Cpu => {
                    classify_file::<NdArray>(&audio, &checkpoint, visualize, NdArrayDevice::Cpu)
                }
                #[cfg(feature = "wgpu")]
                DeviceKind::Gpu => classify_file::<burn::backend::Wgpu>(
                    &audio,
                    &checkpoint,
                    visualize,
                    burn::backend::wgpu::WgpuDevice::default(),
                ),
                #[cfg(not(feature = "wgpu"))]
                DeviceKind::Gpu => {
                    anyhow::bail!("GPU support requires building with --features wgpu")
                }
            }
        }
    }
}

fn serve<B: Backend>(config: &service::ServiceConfig, device: B::Device) -> Result<()> {
    let classifier = AudioClassifier::<B>::load(&config.checkpoint_path, device)
        .context("Failed to load model")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start tokio runtime")?;
    runtime.block_on(service::serve(
        classifier,
        &config.bind_addr,
        config.max_body_bytes,
    ))
}

fn classify_file<B: Backend>(
    audio: &Path,
    checkpoint: &Path,
    visualize: bool,
    device: B::Device,
) -> Result<()> {
    let classifier =
        AudioClassifier::<B>::load(checkpoint, device).context("Failed to load model")?;
    let bytes = std::fs::read(audio)
        .with_context(|| format!("Failed to read {}", audio.display()))?;
    let response = classifier.classify_bytes(bytes, visualize)?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

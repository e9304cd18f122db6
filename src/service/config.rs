use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{info, warn};

/// Compute device for inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    #[default]
    Cpu,
    Gpu,
}

impl FromStr for DeviceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cpu" => Ok(Self::Cpu),
            "gpu" | "wgpu" => Ok(Self::Gpu),
            other => Err(format!("unknown device '{other}' (expected cpu or gpu)")),
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => f.write_str("cpu"),
            Self::Gpu => f.write_str("gpu"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub checkpoint_path: PathBuf,
    pub bind_addr: String,
    pub device: DeviceKind,
    /// Request body limit in bytes
    pub max_body_bytes: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            checkpoint_path: PathBuf::from("/models/best_model.gguf"),
            bind_addr: "0.0.0.0:8000".into(),
            device: DeviceKind::Cpu,
            max_body_bytes: 50 * 1024 * 1024,
        }
    }
}

fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("audio-cnn-inference")
}

pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

/// Load the service config.
///
/// An explicit `path` must exist and parse. Without one, the per-user
/// config file is used when present, and defaults otherwise.
pub fn load_config(path: Option<&Path>) -> Result<ServiceConfig> {
    if let Some(path) = path {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        let config = serde_json::from_str(&data)
            .with_context(|| format!("Failed to parse config: {}", path.display()))?;
        info!("Config loaded from {}", path.display());
        return Ok(config);
    }

    let path = config_path();
    if !path.exists() {
        return Ok(ServiceConfig::default());
    }
    match std::fs::read_to_string(&path).map(|data| serde_json::from_str(&data)) {
        Ok(Ok(config)) => {
            info!("Config loaded from {}", path.display());
            Ok(config)
        }
        Ok(Err(e)) => {
            warn!("Ignoring unparseable config {}: {e}", path.display());
            Ok(ServiceConfig::default())
        }
        Err(e) => {
            warn!("Ignoring unreadable config {}: {e}", path.display());
            Ok(ServiceConfig::default())
        }
    }
}

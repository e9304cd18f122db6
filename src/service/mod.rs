//! HTTP service shell around [`AudioClassifier`](crate::classify::AudioClassifier).

pub mod config;
pub mod error;
pub mod server;
pub mod worker;

pub use config::{config_path, load_config, DeviceKind, ServiceConfig};
pub use error::ServiceError;
pub use server::{router, serve, AppState, Health};
pub use worker::{spawn_inference_worker, InferenceHandle, WorkerJob};

//! GGUF checkpoint storage.
//!
//! Provides GGUF file reading and writing for F32/F16 tensors with typed
//! metadata, and the loader that builds an [`AudioCnn`](crate::model::AudioCnn)
//! plus its class list from a checkpoint.

pub mod loader;
pub mod reader;
pub mod writer;

#[cfg(test)]
mod tests;

pub use loader::{
    load_audio_cnn, load_audio_cnn_from_gguf, read_config, Checkpoint, ARCHITECTURE,
    KEY_BATCH_NORM_EPS, KEY_CLASSES, KEY_STAGE_BLOCKS, KEY_STAGE_CHANNELS, KEY_STEM_CHANNELS,
};
pub use reader::{GgmlDtype, GgufReader, GgufTensorInfo, GgufValue};
pub use writer::GgufWriter;

//! Classification pipeline: base64 -> audio -> mono 22.05 kHz -> mel dB ->
//! CNN -> top-3 predictions.

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::audio::{
    decode_base64, decode_bytes, normalize, AudioBuffer, MelSpectrogram, NormalizedAudio,
    Spectrogram,
};
use crate::error::{ClassifyError, ClassifyResult};
use crate::gguf::load_audio_cnn_from_gguf;
use crate::model::{AudioCnn, FeatureMap, SpectrogramClassifier};
use crate::rank::{rank, Prediction, TOP_K};

/// Upper bound on waveform points returned for visualization.
pub const MAX_WAVEFORM_POINTS: usize = 8000;

/// Body of an inference call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceRequest {
    /// Base64-encoded audio file bytes
    pub audio_data: String,
    /// Also return the spectrogram, feature maps and waveform
    #[serde(default)]
    pub visualize: bool,
}

impl InferenceRequest {
    pub fn new(audio_data: impl Into<String>) -> Self {
        Self {
            audio_data: audio_data.into(),
            visualize: false,
        }
    }
}

/// A 2D grid of values, row-major.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerData {
    /// [rows, columns]
    pub shape: [usize; 2],
    pub values: Vec<Vec<f32>>,
}

/// Decimated mono waveform at the model sample rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Waveform {
    pub values: Vec<f32>,
    pub sample_rate: u32,
    /// Seconds
    pub duration: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceResponse {
    /// Top predictions, highest confidence first
    pub predictions: Vec<Prediction>,
    /// Also read as `input_spectogram`, the spelling older clients emit
    #[serde(default, alias = "input_spectogram", skip_serializing_if = "Option::is_none")]
    pub input_spectrogram: Option<LayerData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visualization: Option<BTreeMap<String, LayerData>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waveform: Option<Waveform>,
}

/// Owns a loaded classifier, its class labels and the spectrogram
/// transform. Read-only after construction.
pub struct AudioClassifier<B: Backend, M = AudioCnn<B>> {
    model: M,
    classes: Vec<String>,
    mel: MelSpectrogram,
    device: B::Device,
}

impl<B: Backend> AudioClassifier<B> {
    /// Load an AudioCnn checkpoint. Any failure here is fatal for the service.
    pub fn load(path: &Path, device: B::Device) -> anyhow::Result<Self> {
        let start = Instant::now();
        let checkpoint = load_audio_cnn_from_gguf::<B>(path, &device)?;
        info!(
            classes = checkpoint.classes.len(),
            ms = start.elapsed().as_millis() as u64,
            "Model loaded from {}",
            path.display()
        );
        Ok(Self::new(checkpoint.model, checkpoint.classes, device))
    }
}

impl<B: Backend, M: SpectrogramClassifier<B>> AudioClassifier<B, M> {
    pub fn new(model: M, classes: Vec<String>, device: B::Device) -> Self {
        if classes.len() < TOP_K {
            warn!(
                classes = classes.len(),
                "Fewer than {TOP_K} classes: every request will fail to rank"
            );
        }
        if model.num_classes() != classes.len() {
            warn!(
                outputs = model.num_classes(),
                classes = classes.len(),
                "Classifier output size differs from the class list"
            );
        }
        Self {
            model,
            classes,
            mel: MelSpectrogram::default(),
            device,
        }
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    /// Run one inference request end to end.
    pub fn classify(&self, request: &InferenceRequest) -> ClassifyResult<InferenceResponse> {
        let start = Instant::now();
        let audio = decode_base64(&request.audio_data)?;
        debug!(
            ms = start.elapsed().as_millis() as u64,
            rate = audio.sample_rate,
            channels = audio.channels,
            frames = audio.frames(),
            "Audio decoded"
        );
        self.classify_audio(audio, request.visualize)
    }

    /// Classify raw (already base64-decoded) audio file bytes.
    pub fn classify_bytes(
        &self,
        bytes: Vec<u8>,
        visualize: bool,
    ) -> ClassifyResult<InferenceResponse> {
        let audio = decode_bytes(bytes)?;
        self.classify_audio(audio, visualize)
    }

    /// Classify a decoded buffer at any rate and channel count.
    pub fn classify_audio(
        &self,
        audio: AudioBuffer,
        visualize: bool,
    ) -> ClassifyResult<InferenceResponse> {
        let total = Instant::now();

        let start = Instant::now();
        let audio = normalize(audio)?;
        debug!(
            ms = start.elapsed().as_millis() as u64,
            samples = audio.len(),
            "Audio normalized"
        );

        let start = Instant::now();
        let spectrogram = self.mel.compute_db(audio.samples());
        debug!(
            ms = start.elapsed().as_millis() as u64,
            mels = spectrogram.n_mels(),
            frames = spectrogram.n_frames(),
            "Mel spectrogram computed"
        );

        let start = Instant::now();
        let input = spectrogram.to_tensor::<B>(&self.device);
        let (logits, features) = if visualize {
            self.model.forward_with_features(input)
        } else {
            (self.model.forward(input), Vec::new())
        };
        let logits = tensor_values(logits)?;
        debug!(ms = start.elapsed().as_millis() as u64, "Forward pass done");

        let predictions = rank(&logits, &self.classes)?;

        let mut response = InferenceResponse {
            predictions,
            input_spectrogram: None,
            visualization: None,
            waveform: None,
        };
        if visualize {
            response.input_spectrogram = Some(spectrogram_layer(&spectrogram));
            response.visualization = Some(feature_layers(features)?);
            response.waveform = Some(waveform(&audio));
        }

        info!(
            ms = total.elapsed().as_millis() as u64,
            top = %response.predictions[0].class,
            confidence = response.predictions[0].confidence,
            "Classified {:.2}s of audio",
            audio.duration_secs()
        );
        Ok(response)
    }

    /// Raw logits for normalized audio, before sanitizing.
    pub fn logits(&self, audio: &NormalizedAudio) -> ClassifyResult<Vec<f32>> {
        if audio.is_empty() {
            return Err(ClassifyError::EmptyAudio);
        }
        let spectrogram = self.mel.compute_db(audio.samples());
        tensor_values(self.model.forward(spectrogram.to_tensor::<B>(&self.device)))
    }
}

fn tensor_values<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> ClassifyResult<Vec<f32>> {
    tensor
        .into_data()
        .to_vec::<f32>()
        .map_err(|e| ClassifyError::Internal(format!("failed to read tensor: {e:?}")))
}

fn finite_or_zero(v: f32) -> f32 {
    if v.is_finite() {
        v
    } else {
        0.0
    }
}

fn spectrogram_layer(spectrogram: &Spectrogram) -> LayerData {
    LayerData {
        shape: [spectrogram.n_mels(), spectrogram.n_frames()],
        values: spectrogram
            .rows()
            .map(|row| row.iter().copied().map(finite_or_zero).collect())
            .collect(),
    }
}

/// Channel-mean of each feature map: [1, C, H, W] -> [H, W].
fn feature_layers<B: Backend>(
    features: Vec<FeatureMap<B>>,
) -> ClassifyResult<BTreeMap<String, LayerData>> {
    let mut layers = BTreeMap::new();
    for feature in features {
        let [_, channels, height, width] = feature.activation.dims();
        let flat = if channels == 0 {
            vec![0.0; height * width]
        } else {
            // First batch item only
            let mean: Tensor<B, 2> = feature
                .activation
                .narrow(0, 0, 1)
                .mean_dim(1)
                .reshape([height, width]);
            tensor_values(mean)?
        };
        let values = if width == 0 {
            vec![Vec::new(); height]
        } else {
            flat.chunks(width)
                .map(|row| row.iter().copied().map(finite_or_zero).collect())
                .collect()
        };
        layers.insert(
            feature.name,
            LayerData {
                shape: [height, width],
                values,
            },
        );
    }
    Ok(layers)
}

fn waveform(audio: &NormalizedAudio) -> Waveform {
    let samples = audio.samples();
    let step = samples.len().div_ceil(MAX_WAVEFORM_POINTS).max(1);
    Waveform {
        values: samples.iter().step_by(step).copied().map(finite_or_zero).collect(),
        sample_rate: audio.sample_rate(),
        duration: audio.duration_secs(),
    }
}

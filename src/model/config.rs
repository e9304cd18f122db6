//! AudioCnn architecture configuration.

/// One stage of residual blocks at a fixed channel width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageConfig {
    /// Output channels of every block in the stage
    pub channels: usize,
    /// Number of residual blocks
    pub blocks: usize,
}

/// Configuration for the residual spectrogram CNN.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioCnnConfig {
    /// Input channels (1: a single spectrogram plane)
    pub in_channels: usize,
    /// Width of the 7x7 stem convolution (64)
    pub stem_channels: usize,
    /// Residual stages, first stage at stride 1, later ones downsample by 2
    pub stages: Vec<StageConfig>,
    /// Size of the output logit vector
    pub num_classes: usize,
    /// BatchNorm epsilon (1e-5)
    pub batch_norm_eps: f32,
}

impl AudioCnnConfig {
    /// The trained classifier's layout: 64-wide stem, stages of
    /// 3/4/6/3 blocks at 64/128/256/512 channels.
    pub fn new(num_classes: usize) -> Self {
        Self {
            in_channels: 1,
            stem_channels: 64,
            stages: vec![
                StageConfig { channels: 64, blocks: 3 },
                StageConfig { channels: 128, blocks: 4 },
                StageConfig { channels: 256, blocks: 6 },
                StageConfig { channels: 512, blocks: 3 },
            ],
            num_classes,
            batch_norm_eps: 1e-5,
        }
    }

    /// Replace the stem width and stage layout.
    pub fn with_layout(mut self, stem_channels: usize, stages: Vec<StageConfig>) -> Self {
        self.stem_channels = stem_channels;
        self.stages = stages;
        self
    }

    /// Stride of the first block in stage `index`.
    pub fn stage_stride(&self, index: usize) -> usize {
        if index == 0 {
            1
        } else {
            2
        }
    }

    /// Input channels of stage `index`.
    pub fn stage_in_channels(&self, index: usize) -> usize {
        match index {
            0 => self.stem_channels,
            i => self.stages[i - 1].channels,
        }
    }

    /// Width of the pooled feature vector fed to the classifier head.
    pub fn feature_dim(&self) -> usize {
        self.stages
            .last()
            .map(|s| s.channels)
            .unwrap_or(self.stem_channels)
    }

    /// Whether block `block` of stage `stage` needs a projection shortcut.
    pub fn has_projection(&self, stage: usize, block: usize) -> bool {
        block == 0
            && (self.stage_stride(stage) != 1
                || self.stage_in_channels(stage) != self.stages[stage].channels)
    }

    /// Every required parameter tensor with its row-major shape.
    ///
    /// Optional convolution biases are not listed.
    pub fn parameter_shapes(&self) -> Vec<(String, Vec<usize>)> {
        let mut shapes = Vec::new();

        shapes.push((
            "stem.conv.weight".to_string(),
            vec![self.stem_channels, self.in_channels, 7, 7],
        ));
        push_batch_norm(&mut shapes, "stem.bn", self.stem_channels);

        for (s, stage) in self.stages.iter().enumerate() {
            for b in 0..stage.blocks {
                let prefix = format!("layers.{s}.{b}");
                let in_ch = if b == 0 {
                    self.stage_in_channels(s)
                } else {
                    stage.channels
                };

                shapes.push((
                    format!("{prefix}.conv1.weight"),
                    vec![stage.channels, in_ch, 3, 3],
                ));
                push_batch_norm(&mut shapes, &format!("{prefix}.bn1"), stage.channels);
                shapes.push((
                    format!("{prefix}.conv2.weight"),
                    vec![stage.channels, stage.channels, 3, 3],
                ));
                push_batch_norm(&mut shapes, &format!("{prefix}.bn2"), stage.channels);

                if self.has_projection(s, b) {
                    shapes.push((
                        format!("{prefix}.shortcut.conv.weight"),
                        vec![stage.channels, in_ch, 1, 1],
                    ));
                    push_batch_norm(&mut shapes, &format!("{prefix}.shortcut.bn"), stage.channels);
                }
            }
        }

        shapes.push((
            "fc.weight".to_string(),
            vec![self.num_classes, self.feature_dim()],
        ));
        shapes.push(("fc.bias".to_string(), vec![self.num_classes]));

        shapes
    }
}

fn push_batch_norm(shapes: &mut Vec<(String, Vec<usize>)>, prefix: &str, channels: usize) {
    for param in ["weight", "bias", "running_mean", "running_var"] {
        shapes.push((format!("{prefix}.{param}"), vec![channels]));
    }
}

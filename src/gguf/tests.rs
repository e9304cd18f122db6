//! Unit tests for GGUF checkpoints.
//!
//! Tests cover: header and typed metadata parsing, F32/F16 tensor reads,
//! writer/reader agreement on aligned offsets, and building AudioCnn from a
//! synthetic checkpoint.

#[cfg(test)]
mod tests {
    use crate::gguf::*;
    use crate::model::{AudioCnnConfig, SpectrogramClassifier, StageConfig};
    use burn::backend::NdArray;
    use burn::tensor::{Tensor, TensorData};

    type TestBackend = NdArray;

    // =========================================================================
    // Raw GGUF builders (test-only)
    // =========================================================================

    fn write_gguf_string(buf: &mut Vec<u8>, s: &str) {
        buf.extend_from_slice(&(s.len() as u64).to_le_bytes());
        buf.extend_from_slice(s.as_bytes());
    }

    /// Build a GGUF file by hand with one tensor of the given dtype code.
    /// `dims` are in ggml order (innermost first).
    fn build_raw_gguf(
        version: u32,
        tensor_name: &str,
        dims: &[u64],
        dtype: u32,
        data: &[u8],
    ) -> Vec<u8> {
        let mut buf = Vec::new();

        // Header
        buf.extend_from_slice(&0x46554747u32.to_le_bytes()); // magic "GGUF"
        buf.extend_from_slice(&version.to_le_bytes());
        buf.extend_from_slice(&1u64.to_le_bytes()); // tensor_count
        buf.extend_from_slice(&3u64.to_le_bytes()); // metadata_kv_count

        // general.architecture = "audio_cnn"
        write_gguf_string(&mut buf, "general.architecture");
        buf.extend_from_slice(&8u32.to_le_bytes()); // STRING
        write_gguf_string(&mut buf, "audio_cnn");

        // audio_cnn.classes = ["dog", "rain"]
        write_gguf_string(&mut buf, "audio_cnn.classes");
        buf.extend_from_slice(&9u32.to_le_bytes()); // ARRAY
        buf.extend_from_slice(&8u32.to_le_bytes()); // of STRING
        buf.extend_from_slice(&2u64.to_le_bytes());
        write_gguf_string(&mut buf, "dog");
        write_gguf_string(&mut buf, "rain");

        // audio_cnn.batch_norm_eps = 0.001
        write_gguf_string(&mut buf, "audio_cnn.batch_norm_eps");
        buf.extend_from_slice(&6u32.to_le_bytes()); // F32
        buf.extend_from_slice(&0.001f32.to_le_bytes());

        // Tensor info
        write_gguf_string(&mut buf, tensor_name);
        buf.extend_from_slice(&(dims.len() as u32).to_le_bytes());
        for &dim in dims {
            buf.extend_from_slice(&dim.to_le_bytes());
        }
        buf.extend_from_slice(&dtype.to_le_bytes());
        buf.extend_from_slice(&0u64.to_le_bytes()); // offset

        // Alignment padding to 32 bytes
        let padding = (32 - (buf.len() % 32)) % 32;
        buf.extend(std::iter::repeat_n(0u8, padding));

        buf.extend_from_slice(data);
        buf
    }

    fn f32_bytes(values: &[f32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    // =========================================================================
    // Synthetic AudioCnn checkpoints
    // =========================================================================

    fn tiny_config(num_classes: usize) -> AudioCnnConfig {
        AudioCnnConfig::new(num_classes).with_layout(
            4,
            vec![
                StageConfig { channels: 4, blocks: 1 },
                StageConfig { channels: 8, blocks: 1 },
            ],
        )
    }

    fn class_names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("class_{i}")).collect()
    }

    /// Writer holding every tensor `config` requires. BatchNorm gammas and
    /// variances are 1, everything else is a small deterministic pattern.
    fn checkpoint_writer(config: &AudioCnnConfig, classes: &[String]) -> GgufWriter {
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
                (0..len).map(|i| 0.1 * ((i + 7 * t) as f32 * 0.37).sin()).collect()
            };
            writer.tensor_f32(&name, &shape, &values).unwrap();
        }
        writer
    }

    fn load(bytes: &[u8]) -> anyhow::Result<Checkpoint<TestBackend>> {
        let mut reader = GgufReader::from_bytes(bytes)?;
        load_audio_cnn::<TestBackend, _>(&mut reader, &Default::default())
    }

    fn load_err(bytes: &[u8]) -> String {
        match load(bytes) {
            Ok(_) => panic!("Checkpoint should have been rejected"),
            Err(e) => format!("{e:#}"),
        }
    }

    // =========================================================================
    // GGUF reader tests
    // =========================================================================

    #[test]
    fn test_gguf_reader_parse_header() {
        let values: Vec<f32> = (0..6).map(|i| i as f32 * 0.5).collect();
        // Row-major [2, 3] is stored as ggml [3, 2]
        let bytes = build_raw_gguf(3, "fc.weight", &[3, 2], 0, &f32_bytes(&values));

        let mut reader = GgufReader::from_bytes(&bytes).expect("Failed to parse GGUF");
        assert_eq!(reader.version(), 3);
        assert_eq!(reader.tensor_count(), 1);

        let info = reader.tensor_info("fc.weight").expect("Tensor not found");
        assert_eq!(info.shape(), &[3, 2]);
        assert_eq!(info.row_major_shape(), vec![2, 3]);
        assert_eq!(info.dtype(), GgmlDtype::F32);
        assert_eq!(info.byte_size(), 24);

        let (shape, read) = reader.tensor_f32("fc.weight").unwrap();
        assert_eq!(shape, vec![2, 3]);
        assert_eq!(read, values);
    }

    #[test]
    fn test_gguf_typed_metadata() {
        let bytes = build_raw_gguf(3, "t", &[1], 0, &f32_bytes(&[0.0]));
        let reader = GgufReader::from_bytes(&bytes).unwrap();

        assert_eq!(
            reader.metadata("general.architecture").and_then(|v| v.as_str()),
            Some("audio_cnn")
        );
        assert_eq!(
            reader.metadata("audio_cnn.classes").and_then(|v| v.as_string_array()),
            Some(vec!["dog".to_string(), "rain".to_string()])
        );
        assert_eq!(
            reader.metadata("audio_cnn.batch_norm_eps").and_then(|v| v.as_f32()),
            Some(0.001)
        );
        assert!(reader.metadata("missing").is_none());

        let mut keys = reader.metadata_keys();
        keys.sort_unstable();
        assert_eq!(
            keys,
            vec!["audio_cnn.batch_norm_eps", "audio_cnn.classes", "general.architecture"]
        );
    }

    #[test]
    fn test_gguf_reader_f16() {
        let values = [1.0f32, -0.5, 0.25, 2.0];
        let data: Vec<u8> = values
            .iter()
            .flat_map(|&v| half::f16::from_f32(v).to_le_bytes())
            .collect();
        let bytes = build_raw_gguf(3, "half", &[4], 1, &data);

        let mut reader = GgufReader::from_bytes(&bytes).unwrap();
        assert_eq!(reader.tensor_info("half").unwrap().dtype(), GgmlDtype::F16);
        let (shape, read) = reader.tensor_f32("half").unwrap();
        assert_eq!(shape, vec![4]);
        assert_eq!(read, values.to_vec());
    }

    #[test]
    fn test_gguf_v2_accepted() {
        let bytes = build_raw_gguf(2, "t", &[2], 0, &f32_bytes(&[1.0, 2.0]));
        let reader = GgufReader::from_bytes(&bytes).unwrap();
        assert_eq!(reader.version(), 2);
    }

    #[test]
    fn test_gguf_rejects_bad_header() {
        let mut bytes = build_raw_gguf(3, "t", &[1], 0, &f32_bytes(&[0.0]));
        bytes[0] = b'X';
        let err = GgufReader::from_bytes(&bytes).err().unwrap();
        assert!(err.to_string().contains("Invalid GGUF magic"), "{err}");

        let bytes = build_raw_gguf(7, "t", &[1], 0, &f32_bytes(&[0.0]));
        let err = GgufReader::from_bytes(&bytes).err().unwrap();
        assert!(err.to_string().contains("Unsupported GGUF version"), "{err}");

        assert!(GgufReader::from_bytes(&[]).is_err());
    }

    #[test]
    fn test_gguf_rejects_quantized_dtype() {
        // Q4_0 (code 2) is not a supported checkpoint dtype
        let bytes = build_raw_gguf(3, "q", &[32], 2, &[0u8; 18]);
        let err = GgufReader::from_bytes(&bytes).err().unwrap();
        assert!(format!("{err:#}").contains("Unsupported GGML dtype"), "{err:#}");
    }

    #[test]
    fn test_gguf_truncated_tensor_data() {
        let bytes = build_raw_gguf(3, "t", &[8], 0, &f32_bytes(&[1.0, 2.0]));
        let mut reader = GgufReader::from_bytes(&bytes).unwrap();
        assert!(reader.tensor_data("t").is_err());
        assert!(reader.tensor_data("nonexistent").is_err());
    }

    // =========================================================================
    // Writer tests
    // =========================================================================

    #[test]
    fn test_writer_reader_agree() {
        let a: Vec<f32> = (0..5).map(|i| i as f32).collect();
        let b: Vec<f32> = (0..12).map(|i| -(i as f32) * 0.25).collect();
        let c = vec![0.5f32; 3];

        let mut writer = GgufWriter::new();
        writer
            .metadata("general.architecture", GgufValue::String("audio_cnn".into()))
            .metadata(
                "audio_cnn.stage_blocks",
                GgufValue::Array(vec![GgufValue::U32(3), GgufValue::U32(4)]),
            )
            .metadata("general.architecture", GgufValue::String("replaced".into()));
        writer.tensor_f32("a", &[5], &a).unwrap();
        writer.tensor_f32("b", &[3, 2, 2], &b).unwrap();
        writer.tensor_f16("c", &[3], &c).unwrap();
        let bytes = writer.to_bytes().unwrap();

        let mut reader = GgufReader::from_bytes(&bytes).unwrap();
        assert_eq!(reader.version(), 3);
        assert_eq!(reader.tensor_count(), 3);
        assert_eq!(reader.metadata_keys().len(), 2);
        assert_eq!(
            reader.metadata("general.architecture").and_then(|v| v.as_str()),
            Some("replaced")
        );
        assert_eq!(
            reader.metadata("audio_cnn.stage_blocks").and_then(|v| v.as_u64_array()),
            Some(vec![3, 4])
        );

        for name in ["a", "b", "c"] {
            let offset = reader.tensor_info(name).unwrap().offset;
            assert_eq!(offset % 32, 0, "Tensor '{name}' offset {offset} is not aligned");
        }
        assert_eq!(reader.tensor_info("b").unwrap().shape(), &[2, 2, 3]);

        assert_eq!(reader.tensor_f32("a").unwrap(), (vec![5], a));
        assert_eq!(reader.tensor_f32("b").unwrap(), (vec![3, 2, 2], b));
        assert_eq!(reader.tensor_f32("c").unwrap(), (vec![3], c));
    }

    #[test]
    fn test_writer_custom_alignment() {
        let mut writer = GgufWriter::new();
        writer.metadata("general.alignment", GgufValue::U32(64));
        writer.tensor_f32("x", &[3], &[1.0, 2.0, 3.0]).unwrap();
        writer.tensor_f32("y", &[1], &[4.0]).unwrap();
        let bytes = writer.to_bytes().unwrap();

        let mut reader = GgufReader::from_bytes(&bytes).unwrap();
        assert_eq!(reader.tensor_info("y").unwrap().offset, 64);
        assert_eq!(reader.tensor_f32("y").unwrap().1, vec![4.0]);
    }

    #[test]
    fn test_writer_rejects_bad_tensors() {
        let mut writer = GgufWriter::new();
        assert!(writer.tensor_f32("x", &[2, 2], &[1.0, 2.0, 3.0]).is_err());
        writer.tensor_f32("x", &[1], &[1.0]).unwrap();
        assert!(writer.tensor_f32("x", &[1], &[2.0]).is_err());

        let mut writer = GgufWriter::new();
        writer.metadata(
            "mixed",
            GgufValue::Array(vec![GgufValue::U32(1), GgufValue::String("a".into())]),
        );
        assert!(writer.to_bytes().is_err());
    }

    // =========================================================================
    // AudioCnn loader tests
    // =========================================================================

    #[test]
    fn test_load_tiny_checkpoint() {
        let config = tiny_config(5);
        let classes = class_names(5);
        let bytes = checkpoint_writer(&config, &classes).to_bytes().unwrap();

        let checkpoint = load(&bytes).expect("Failed to load checkpoint");
        assert_eq!(checkpoint.classes, classes);
        assert_eq!(checkpoint.model.config(), &config);
        assert_eq!(checkpoint.model.num_classes(), 5);

        let device = Default::default();
        for frames in [1, 44] {
            let db: Vec<f32> = (0..128 * frames)
                .map(|i| ((i as f32) * 0.01).cos() * 20.0 - 40.0)
                .collect();
            let input = Tensor::<TestBackend, 4>::from_data(
                TensorData::new(db, [1, 1, 128, frames]),
                &device,
            );
            let logits = checkpoint.model.forward(input);
            assert_eq!(logits.dims(), [1, 5], "T={frames}");
            let values = logits.into_data().to_vec::<f32>().unwrap();
            assert!(values.iter().all(|v| v.is_finite()));
        }
    }

    #[test]
    fn test_load_reads_layout_from_metadata() {
        let config = AudioCnnConfig::new(3).with_layout(
            2,
            vec![
                StageConfig { channels: 2, blocks: 2 },
                StageConfig { channels: 4, blocks: 1 },
                StageConfig { channels: 6, blocks: 1 },
            ],
        );
        let mut writer = checkpoint_writer(&config, &class_names(3));
        writer.metadata(KEY_BATCH_NORM_EPS, GgufValue::F32(1e-3));
        let bytes = writer.to_bytes().unwrap();

        let checkpoint = load(&bytes).unwrap();
        let loaded = checkpoint.model.config();
        assert_eq!(loaded.stem_channels, 2);
        assert_eq!(loaded.stages, config.stages);
        assert_eq!(loaded.batch_norm_eps, 1e-3);
        assert_eq!(loaded.feature_dim(), 6);
    }

    #[test]
    fn test_load_feature_maps() {
        let config = tiny_config(4);
        let bytes = checkpoint_writer(&config, &class_names(4)).to_bytes().unwrap();
        let checkpoint = load(&bytes).unwrap();

        let input = Tensor::<TestBackend, 4>::zeros([1, 1, 128, 44], &Default::default());
        let (logits, features) = checkpoint.model.forward_with_features(input);
        assert_eq!(logits.dims(), [1, 4]);

        let names: Vec<&str> = features.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["stem", "layer1", "layer2"]);
        assert_eq!(features[0].activation.dims(), [1, 4, 32, 11]);
        assert_eq!(features[1].activation.dims(), [1, 4, 32, 11]);
        assert_eq!(features[2].activation.dims(), [1, 8, 16, 6]);
    }

    #[test]
    fn test_load_optional_conv_bias() {
        let config = tiny_config(3);
        let mut writer = checkpoint_writer(&config, &class_names(3));
        writer
            .tensor_f32("stem.conv.bias", &[4], &[0.1, 0.2, 0.3, 0.4])
            .unwrap();
        let bytes = writer.to_bytes().unwrap();
        assert!(load(&bytes).is_ok());
    }

    #[test]
    fn test_load_rejects_bad_conv_bias() {
        // Stem has 4 output channels
        let config = tiny_config(3);
        let mut writer = checkpoint_writer(&config, &class_names(3));
        writer
            .tensor_f32("stem.conv.bias", &[3], &[0.1, 0.2, 0.3])
            .unwrap();
        let err = load_err(&writer.to_bytes().unwrap());
        assert!(err.contains("stem.conv.bias"), "{err}");

        let mut writer = checkpoint_writer(&config, &class_names(3));
        writer
            .tensor_f32("layers.1.0.shortcut.conv.bias", &[4], &[0.0; 4])
            .unwrap();
        let err = load_err(&writer.to_bytes().unwrap());
        assert!(err.contains("layers.1.0.shortcut.conv.bias"), "{err}");
    }

    #[test]
    fn test_load_rejects_empty_stage() {
        let config = AudioCnnConfig::new(3).with_layout(
            2,
            vec![
                StageConfig { channels: 4, blocks: 0 },
                StageConfig { channels: 8, blocks: 1 },
            ],
        );
        let err = load_err(&checkpoint_writer(&config, &class_names(3)).to_bytes().unwrap());
        assert!(err.contains("Stage 0"), "{err}");

        let config = AudioCnnConfig::new(3)
            .with_layout(4, vec![StageConfig { channels: 0, blocks: 1 }]);
        let err = load_err(&checkpoint_writer(&config, &class_names(3)).to_bytes().unwrap());
        assert!(err.contains("Stage 0"), "{err}");
    }

    #[test]
    fn test_load_rejects_missing_classes() {
        let config = tiny_config(3);
        let mut writer = GgufWriter::new();
        writer.metadata("general.architecture", GgufValue::String(ARCHITECTURE.into()));
        for (name, shape) in config.parameter_shapes() {
            let len: usize = shape.iter().product();
            writer.tensor_f32(&name, &shape, &vec![1.0; len]).unwrap();
        }
        let err = load_err(&writer.to_bytes().unwrap());
        assert!(err.contains("class list"), "{err}");
    }

    #[test]
    fn test_load_rejects_class_count_mismatch() {
        // Head trained for 5 classes, metadata lists 4
        let config = tiny_config(5);
        let mut writer = checkpoint_writer(&config, &class_names(5));
        writer.metadata(
            KEY_CLASSES,
            GgufValue::Array(class_names(4).into_iter().map(GgufValue::String).collect()),
        );
        let err = load_err(&writer.to_bytes().unwrap());
        assert!(err.contains("5 outputs"), "{err}");
    }

    #[test]
    fn test_load_rejects_missing_tensor() {
        let config = tiny_config(3);
        let classes = class_names(3);
        let full = checkpoint_writer(&config, &classes);
        // Rebuild without one residual weight
        let mut writer = GgufWriter::new();
        for (key, value) in [
            ("general.architecture", GgufValue::String(ARCHITECTURE.into())),
            (
                KEY_CLASSES,
                GgufValue::Array(classes.iter().cloned().map(GgufValue::String).collect()),
            ),
            (KEY_STEM_CHANNELS, GgufValue::U32(4)),
            (KEY_STAGE_CHANNELS, GgufValue::Array(vec![GgufValue::U32(4), GgufValue::U32(8)])),
            (KEY_STAGE_BLOCKS, GgufValue::Array(vec![GgufValue::U32(1), GgufValue::U32(1)])),
        ] {
            writer.metadata(key, value);
        }
        for (name, shape) in config.parameter_shapes() {
            if name == "layers.1.0.conv2.weight" {
                continue;
            }
            let len: usize = shape.iter().product();
            writer.tensor_f32(&name, &shape, &vec![0.5; len]).unwrap();
        }
        assert!(load(&full.to_bytes().unwrap()).is_ok());
        let err = load_err(&writer.to_bytes().unwrap());
        assert!(err.contains("layers.1.0.conv2.weight"), "{err}");
    }

    #[test]
    fn test_load_rejects_wrong_shape() {
        let config = tiny_config(3);
        let mut writer = checkpoint_writer(&config, &class_names(3));
        writer.metadata(KEY_STEM_CHANNELS, GgufValue::U32(6));
        let err = load_err(&writer.to_bytes().unwrap());
        assert!(err.contains("stem.conv.weight"), "{err}");
    }

    #[test]
    fn test_load_rejects_bad_metadata() {
        let config = tiny_config(3);

        let mut writer = checkpoint_writer(&config, &class_names(3));
        writer.metadata("general.architecture", GgufValue::String("whisper".into()));
        let err = load_err(&writer.to_bytes().unwrap());
        assert!(err.contains("whisper"), "{err}");

        let mut writer = checkpoint_writer(&config, &class_names(3));
        writer.metadata(KEY_STAGE_BLOCKS, GgufValue::Array(vec![GgufValue::U32(1)]));
        let err = load_err(&writer.to_bytes().unwrap());
        assert!(err.contains("entries"), "{err}");

        let mut writer = checkpoint_writer(&config, &class_names(3));
        writer.metadata(KEY_CLASSES, GgufValue::Array(Vec::new()));
        assert!(load(&writer.to_bytes().unwrap()).is_err());
    }
}

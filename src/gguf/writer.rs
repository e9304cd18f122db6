//! GGUF v3 writer.
//!
//! Serializes typed metadata and F32/F16 tensors in the layout
//! [`GgufReader`](super::GgufReader) expects: header, metadata, tensor index,
//! then a data section where every tensor starts on an aligned offset.

use anyhow::{ensure, Context, Result};
use byteorder::{LittleEndian, WriteBytesExt};
use std::io::Write;
use std::path::Path;

use super::reader::{align_up, GgmlDtype, GgufValue, DEFAULT_ALIGNMENT, GGUF_MAGIC};

struct PendingTensor {
    name: String,
    /// ggml order, innermost first
    dimensions: Vec<u64>,
    dtype: GgmlDtype,
    data: Vec<u8>,
}

/// Builder for GGUF files.
#[derive(Default)]
pub struct GgufWriter {
    metadata: Vec<(String, GgufValue)>,
    tensors: Vec<PendingTensor>,
}

impl GgufWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a metadata entry, replacing any previous value for `key`.
    pub fn metadata(&mut self, key: impl Into<String>, value: GgufValue) -> &mut Self {
        let key = key.into();
        match self.metadata.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.metadata.push((key, value)),
        }
        self
    }

    /// Add an F32 tensor. `shape` is row-major (outermost first).
    pub fn tensor_f32(&mut self, name: &str, shape: &[usize], values: &[f32]) -> Result<&mut Self> {
        let data = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.push_tensor(name, shape, values.len(), GgmlDtype::F32, data)
    }

    /// Add a tensor stored as F16. `shape` is row-major (outermost first).
    pub fn tensor_f16(&mut self, name: &str, shape: &[usize], values: &[f32]) -> Result<&mut Self> {
        let data = values
            .iter()
            .flat_map(|&v| half::f16::from_f32(v).to_le_bytes())
            .collect();
        self.push_tensor(name, shape, values.len(), GgmlDtype::F16, data)
    }

    fn push_tensor(
        &mut self,
        name: &str,
        shape: &[usize],
        len: usize,
        dtype: GgmlDtype,
        data: Vec<u8>,
    ) -> Result<&mut Self> {
        let expected: usize = shape.iter().product();
        ensure!(
            expected == len,
            "Tensor '{name}' shape {shape:?} needs {expected} values, got {len}"
        );
        ensure!(
            self.tensors.iter().all(|t| t.name != name),
            "Duplicate tensor '{name}'"
        );
        self.tensors.push(PendingTensor {
            name: name.to_string(),
            dimensions: shape.iter().rev().map(|&d| d as u64).collect(),
            dtype,
            data,
        });
        Ok(self)
    }

    /// Serialize into `out`.
    pub fn write<W: Write>(&self, out: &mut W) -> Result<()> {
        let alignment = match self.metadata.iter().find(|(k, _)| k == "general.alignment") {
            Some((_, v)) => v
                .as_u64()
                .filter(|&a| a > 0)
                .context("general.alignment must be a positive integer")?,
            None => DEFAULT_ALIGNMENT,
        };

        let mut header = Vec::new();
        header.write_u32::<LittleEndian>(GGUF_MAGIC)?;
        header.write_u32::<LittleEndian>(3)?;
        header.write_u64::<LittleEndian>(self.tensors.len() as u64)?;
        header.write_u64::<LittleEndian>(self.metadata.len() as u64)?;

        for (key, value) in &self.metadata {
            write_gguf_string(&mut header, key)?;
            header.write_u32::<LittleEndian>(value.type_code())?;
            write_gguf_value(&mut header, value).with_context(|| format!("Metadata '{key}'"))?;
        }

        // Offsets are relative to the data section and individually aligned
        let mut offsets = Vec::with_capacity(self.tensors.len());
        let mut cursor = 0u64;
        for tensor in &self.tensors {
            cursor = align_up(cursor, alignment);
            offsets.push(cursor);
            cursor += tensor.data.len() as u64;
        }

        for (tensor, &offset) in self.tensors.iter().zip(&offsets) {
            write_gguf_string(&mut header, &tensor.name)?;
            header.write_u32::<LittleEndian>(tensor.dimensions.len() as u32)?;
            for &dim in &tensor.dimensions {
                header.write_u64::<LittleEndian>(dim)?;
            }
            header.write_u32::<LittleEndian>(tensor.dtype.code())?;
            header.write_u64::<LittleEndian>(offset)?;
        }

        let data_start = align_up(header.len() as u64, alignment);
        header.resize(data_start as usize, 0);
        out.write_all(&header)?;

        let mut written = 0u64;
        for (tensor, &offset) in self.tensors.iter().zip(&offsets) {
            let pad = (offset - written) as usize;
            out.write_all(&vec![0u8; pad])?;
            out.write_all(&tensor.data)?;
            written = offset + tensor.data.len() as u64;
        }

        Ok(())
    }

    /// Serialize into a byte vector.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.write(&mut buf)?;
        Ok(buf)
    }

    /// Serialize to a file.
    pub fn write_to_path(&self, path: &Path) -> Result<()> {
        let file = std::fs::File::create(path)
            .with_context(|| format!("Failed to create GGUF file: {}", path.display()))?;
        let mut out = std::io::BufWriter::new(file);
        self.write(&mut out)?;
        out.flush()?;
        Ok(())
    }
}

fn write_gguf_string<W: Write>(out: &mut W, s: &str) -> Result<()> {
    out.write_u64::<LittleEndian>(s.len() as u64)?;
    out.write_all(s.as_bytes())?;
    Ok(())
}

fn write_gguf_value<W: Write>(out: &mut W, value: &GgufValue) -> Result<()> {
    match value {
        GgufValue::U8(v) => out.write_u8(*v)?,
        GgufValue::I8(v) => out.write_i8(*v)?,
        GgufValue::U16(v) => out.write_u16::<LittleEndian>(*v)?,
        GgufValue::I16(v) => out.write_i16::<LittleEndian>(*v)?,
        GgufValue::U32(v) => out.write_u32::<LittleEndian>(*v)?,
        GgufValue::I32(v) => out.write_i32::<LittleEndian>(*v)?,
        GgufValue::F32(v) => out.write_f32::<LittleEndian>(*v)?,
        GgufValue::Bool(v) => out.write_u8(u8::from(*v))?,
        GgufValue::String(s) => write_gguf_string(out, s)?,
        GgufValue::Array(items) => {
            // Empty arrays carry no element to type them; record them as u32
            let elem_type = items.first().map(GgufValue::type_code).unwrap_or(4);
            ensure!(
                items.iter().all(|v| v.type_code() == elem_type),
                "GGUF arrays must be homogeneous"
            );
            out.write_u32::<LittleEndian>(elem_type)?;
            out.write_u64::<LittleEndian>(items.len() as u64)?;
            for item in items {
                write_gguf_value(out, item)?;
            }
        }
        GgufValue::U64(v) => out.write_u64::<LittleEndian>(*v)?,
        GgufValue::I64(v) => out.write_i64::<LittleEndian>(*v)?,
        GgufValue::F64(v) => out.write_f64::<LittleEndian>(*v)?,
    }
    Ok(())
}

//! Lightweight GGUF file reader (v2 and v3).
//!
//! Parses the header, typed metadata key-value pairs, and tensor index to
//! provide random-access to tensor data. Uses `Read + Seek` generics so that
//! the same code works with `BufReader<File>` and `Cursor<&[u8]>`.

use anyhow::{bail, ensure, Context, Result};
use byteorder::{LittleEndian, ReadBytesExt};
use std::collections::HashMap;
use std::io::{Cursor, Read, Seek, SeekFrom};

/// "GGUF" read as a little-endian u32
pub(crate) const GGUF_MAGIC: u32 = 0x46554747;
pub(crate) const DEFAULT_ALIGNMENT: u64 = 32;

/// Upper bound for a single string or array length read from the header.
/// Keeps a corrupt length field from triggering a huge allocation.
const MAX_HEADER_LEN: u64 = 1 << 24;

/// GGML data type codes used in GGUF tensor descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GgmlDtype {
    /// 32-bit float (4 bytes per element).
    F32,
    /// 16-bit float (2 bytes per element).
    F16,
}

impl GgmlDtype {
    fn from_u32(v: u32) -> Result<Self> {
        match v {
            0 => Ok(Self::F32),
            1 => Ok(Self::F16),
            other => bail!("Unsupported GGML dtype code: {other}"),
        }
    }

    /// GGML type code as stored on disk.
    pub fn code(&self) -> u32 {
        match self {
            Self::F32 => 0,
            Self::F16 => 1,
        }
    }

    /// Byte size for a given number of elements.
    pub fn byte_size(&self, num_elements: u64) -> u64 {
        match self {
            Self::F32 => num_elements * 4,
            Self::F16 => num_elements * 2,
        }
    }
}

/// A typed GGUF metadata value.
#[derive(Debug, Clone, PartialEq)]
pub enum GgufValue {
    U8(u8),
    I8(i8),
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    F32(f32),
    Bool(bool),
    String(String),
    Array(Vec<GgufValue>),
    U64(u64),
    I64(i64),
    F64(f64),
}

impl GgufValue {
    /// GGUF value type code.
    pub fn type_code(&self) -> u32 {
        match self {
            Self::U8(_) => 0,
            Self::I8(_) => 1,
            Self::U16(_) => 2,
            Self::I16(_) => 3,
            Self::U32(_) => 4,
            Self::I32(_) => 5,
            Self::F32(_) => 6,
            Self::Bool(_) => 7,
            Self::String(_) => 8,
            Self::Array(_) => 9,
            Self::U64(_) => 10,
            Self::I64(_) => 11,
            Self::F64(_) => 12,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Any integer type that fits in a `u64`.
    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            Self::U8(v) => Some(v as u64),
            Self::U16(v) => Some(v as u64),
            Self::U32(v) => Some(v as u64),
            Self::U64(v) => Some(v),
            Self::I8(v) => u64::try_from(v).ok(),
            Self::I16(v) => u64::try_from(v).ok(),
            Self::I32(v) => u64::try_from(v).ok(),
            Self::I64(v) => u64::try_from(v).ok(),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match *self {
            Self::F32(v) => Some(v),
            Self::F64(v) => Some(v as f32),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[GgufValue]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Array of strings, or `None` if any element is not a string.
    pub fn as_string_array(&self) -> Option<Vec<String>> {
        self.as_array()?
            .iter()
            .map(|v| v.as_str().map(str::to_owned))
            .collect()
    }

    /// Array of integers, or `None` if any element is not an integer.
    pub fn as_u64_array(&self) -> Option<Vec<u64>> {
        self.as_array()?.iter().map(GgufValue::as_u64).collect()
    }
}

/// Metadata for a single tensor in a GGUF file.
#[derive(Debug, Clone)]
pub struct GgufTensorInfo {
    /// Tensor name as stored in the GGUF file.
    pub name: String,
    dimensions: Vec<u64>,
    dtype: GgmlDtype,
    /// Byte offset relative to the start of the data section.
    pub(crate) offset: u64,
}

impl GgufTensorInfo {
    /// Tensor shape in ggml order (innermost dimension first).
    pub fn shape(&self) -> &[u64] {
        &self.dimensions
    }

    /// Tensor shape in row-major order (outermost dimension first).
    pub fn row_major_shape(&self) -> Vec<usize> {
        self.dimensions.iter().rev().map(|&d| d as usize).collect()
    }

    /// The GGML data type of this tensor.
    pub fn dtype(&self) -> GgmlDtype {
        self.dtype
    }

    /// Total number of elements across all dimensions.
    pub fn num_elements(&self) -> u64 {
        self.dimensions.iter().product()
    }

    /// Total byte size of the tensor data.
    pub fn byte_size(&self) -> u64 {
        self.dtype.byte_size(self.num_elements())
    }
}

/// A reader for GGUF v2/v3 files.
///
/// Parses the header and tensor index on construction, then provides
/// random-access to individual tensor data via [`tensor_data`](Self::tensor_data).
pub struct GgufReader<R: Read + Seek> {
    reader: R,
    version: u32,
    tensor_count: u64,
    metadata: HashMap<String, GgufValue>,
    tensors: HashMap<String, GgufTensorInfo>,
    data_section_offset: u64,
}

impl GgufReader<Cursor<&[u8]>> {
    /// Open a GGUF file from an in-memory byte slice.
    pub fn from_bytes(data: &[u8]) -> Result<GgufReader<Cursor<&[u8]>>> {
        GgufReader::open(Cursor::new(data))
    }
}

impl<R: Read + Seek> GgufReader<R> {
    /// Parse a GGUF file from the given reader.
    pub fn open(mut reader: R) -> Result<Self> {
        // Magic
        let magic = reader
            .read_u32::<LittleEndian>()
            .context("Failed to read GGUF magic")?;
        if magic != GGUF_MAGIC {
            bail!("Invalid GGUF magic: 0x{magic:08X} (expected 0x{GGUF_MAGIC:08X})");
        }

        // Version (support v2 and v3)
        let version = reader
            .read_u32::<LittleEndian>()
            .context("Failed to read GGUF version")?;
        if version != 2 && version != 3 {
            bail!("Unsupported GGUF version: {version} (expected 2 or 3)");
        }

        // Counts
        let tensor_count = reader
            .read_u64::<LittleEndian>()
            .context("Failed to read tensor count")?;
        let metadata_kv_count = reader
            .read_u64::<LittleEndian>()
            .context("Failed to read metadata KV count")?;
        ensure!(
            tensor_count <= MAX_HEADER_LEN && metadata_kv_count <= MAX_HEADER_LEN,
            "Implausible GGUF header: {tensor_count} tensors, {metadata_kv_count} metadata entries"
        );

        // Metadata key-value pairs
        let mut metadata = HashMap::with_capacity(metadata_kv_count as usize);
        for i in 0..metadata_kv_count {
            let key = read_gguf_string(&mut reader)
                .with_context(|| format!("Failed to read metadata key {i}"))?;
            let value_type = reader
                .read_u32::<LittleEndian>()
                .with_context(|| format!("Failed to read metadata value type for '{key}'"))?;
            let value = read_gguf_value(&mut reader, value_type)
                .with_context(|| format!("Failed to read metadata value for '{key}'"))?;
            metadata.insert(key, value);
        }

        // Parse tensor index
        let mut tensors = HashMap::with_capacity(tensor_count as usize);
        for i in 0..tensor_count {
            let name = read_gguf_string(&mut reader)
                .with_context(|| format!("Failed to read tensor name {i}"))?;
            let ndims = reader
                .read_u32::<LittleEndian>()
                .with_context(|| format!("Failed to read ndims for tensor {i}"))?;
            ensure!(ndims <= 8, "Tensor '{name}' has {ndims} dimensions");
            let mut dimensions = Vec::with_capacity(ndims as usize);
            for d in 0..ndims {
                dimensions.push(
                    reader
                        .read_u64::<LittleEndian>()
                        .with_context(|| format!("Failed to read dim {d} for tensor {i}"))?,
                );
            }
            let dtype = GgmlDtype::from_u32(
                reader
                    .read_u32::<LittleEndian>()
                    .with_context(|| format!("Failed to read dtype for tensor {i}"))?,
            )
            .with_context(|| format!("Tensor '{name}'"))?;
            let offset = reader
                .read_u64::<LittleEndian>()
                .with_context(|| format!("Failed to read offset for tensor {i}"))?;

            tensors.insert(
                name.clone(),
                GgufTensorInfo {
                    name,
                    dimensions,
                    dtype,
                    offset,
                },
            );
        }

        // Data section starts at the next alignment boundary
        let alignment = match metadata.get("general.alignment") {
            Some(v) => v
                .as_u64()
                .filter(|&a| a > 0)
                .context("general.alignment must be a positive integer")?,
            None => DEFAULT_ALIGNMENT,
        };
        let current_pos = reader.stream_position()?;
        let data_section_offset = align_up(current_pos, alignment);

        Ok(Self {
            reader,
            version,
            tensor_count,
            metadata,
            tensors,
            data_section_offset,
        })
    }

    /// GGUF format version.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Number of tensors in the file.
    pub fn tensor_count(&self) -> u64 {
        self.tensor_count
    }

    /// Look up a metadata value by key.
    pub fn metadata(&self, key: &str) -> Option<&GgufValue> {
        self.metadata.get(key)
    }

    /// List all metadata keys.
    pub fn metadata_keys(&self) -> Vec<&str> {
        self.metadata.keys().map(|s| s.as_str()).collect()
    }

    /// Look up metadata for a tensor by name.
    pub fn tensor_info(&self, name: &str) -> Option<&GgufTensorInfo> {
        self.tensors.get(name)
    }

    /// List all tensor names in the file.
    pub fn tensor_names(&self) -> Vec<&str> {
        self.tensors.keys().map(|s| s.as_str()).collect()
    }

    /// Read raw tensor data bytes from the file.
    pub fn tensor_data(&mut self, name: &str) -> Result<Vec<u8>> {
        let info = self
            .tensors
            .get(name)
            .with_context(|| format!("Tensor '{name}' not found in GGUF"))?
            .clone();
        let byte_size = info.byte_size() as usize;
        let abs_offset = self.data_section_offset + info.offset;
        self.reader.seek(SeekFrom::Start(abs_offset))?;
        let mut buf = vec![0u8; byte_size];
        self.reader
            .read_exact(&mut buf)
            .with_context(|| format!("Truncated data for tensor '{name}'"))?;
        Ok(buf)
    }

    /// Read a tensor as f32 values with its row-major shape.
    pub fn tensor_f32(&mut self, name: &str) -> Result<(Vec<usize>, Vec<f32>)> {
        let info = self
            .tensor_info(name)
            .with_context(|| format!("Tensor '{name}' not found"))?
            .clone();
        let data = self.tensor_data(name)?;
        let values = match info.dtype() {
            GgmlDtype::F32 => data
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
            GgmlDtype::F16 => data
                .chunks_exact(2)
                .map(|c| half::f16::from_le_bytes([c[0], c[1]]).to_f32())
                .collect(),
        };
        Ok((info.row_major_shape(), values))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_gguf_string<R: Read>(reader: &mut R) -> Result<String> {
    let len = reader.read_u64::<LittleEndian>()?;
    ensure!(len <= MAX_HEADER_LEN, "GGUF string length {len} is implausible");
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf)?;
    String::from_utf8(buf).context("Invalid UTF-8 in GGUF string")
}

fn read_gguf_value<R: Read>(reader: &mut R, value_type: u32) -> Result<GgufValue> {
    let value = match value_type {
        0 => GgufValue::U8(reader.read_u8()?),
        1 => GgufValue::I8(reader.read_i8()?),
        2 => GgufValue::U16(reader.read_u16::<LittleEndian>()?),
        3 => GgufValue::I16(reader.read_i16::<LittleEndian>()?),
        4 => GgufValue::U32(reader.read_u32::<LittleEndian>()?),
        5 => GgufValue::I32(reader.read_i32::<LittleEndian>()?),
        6 => GgufValue::F32(reader.read_f32::<LittleEndian>()?),
        7 => GgufValue::Bool(reader.read_u8()? != 0),
        8 => GgufValue::String(read_gguf_string(reader)?),
        9 => {
            let elem_type = reader.read_u32::<LittleEndian>()?;
            let count = reader.read_u64::<LittleEndian>()?;
            ensure!(count <= MAX_HEADER_LEN, "GGUF array length {count} is implausible");
            let mut items = Vec::with_capacity(count as usize);
            for _ in 0..count {
                items.push(read_gguf_value(reader, elem_type)?);
            }
            GgufValue::Array(items)
        }
        10 => GgufValue::U64(reader.read_u64::<LittleEndian>()?),
        11 => GgufValue::I64(reader.read_i64::<LittleEndian>()?),
        12 => GgufValue::F64(reader.read_f64::<LittleEndian>()?),
        other => bail!("Unknown GGUF metadata value type: {other}"),
    };
    Ok(value)
}

pub(crate) fn align_up(offset: u64, alignment: u64) -> u64 {
    offset.div_ceil(alignment) * alignment
}

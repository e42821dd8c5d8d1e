//! SafeTensor format support with memory-mapped files
//!
//! Layout: an 8-byte little-endian header length, a JSON header mapping tensor
//! names to `dtype`/`shape`/`data_offsets` (plus an optional `__metadata__`
//! string map), then the raw little-endian tensor bytes.

use half::{bf16, f16};
use memmap2::Mmap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use super::element_count;
use wattcast_common::{Result, WattcastError};

const METADATA_KEY: &str = "__metadata__";

/// Data type for SafeTensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TensorDType {
    /// Float32
    F32,
    /// Float16
    F16,
    /// BFloat16
    BF16,
}

impl TensorDType {
    /// Get the size in bytes for this dtype
    pub fn size(&self) -> usize {
        match self {
            TensorDType::F32 => 4,
            TensorDType::F16 | TensorDType::BF16 => 2,
        }
    }

    /// Parse from the header's dtype string
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "F32" => Some(TensorDType::F32),
            "F16" => Some(TensorDType::F16),
            "BF16" => Some(TensorDType::BF16),
            _ => None,
        }
    }

    /// Convert to string
    pub fn as_str(&self) -> &'static str {
        match self {
            TensorDType::F32 => "F32",
            TensorDType::F16 => "F16",
            TensorDType::BF16 => "BF16",
        }
    }
}

/// Information about a single tensor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TensorInfo {
    /// Tensor dtype
    pub dtype: String,

    /// Tensor shape
    pub shape: Vec<usize>,

    /// Data offsets (start, end) in bytes, relative to the end of the header
    pub data_offsets: [usize; 2],
}

impl TensorInfo {
    /// Number of elements, or `None` if the shape overflows
    pub fn num_elements(&self) -> Option<usize> {
        element_count(&self.shape)
    }
}

/// Memory-mapped SafeTensor buffer
pub struct SafeTensorBuffer {
    /// Memory-mapped file
    mmap: Mmap,

    /// Tensor name to tensor info
    tensors: HashMap<String, TensorInfo>,

    /// Free-form string metadata from the header
    metadata: HashMap<String, String>,

    /// Length of header in bytes
    header_len: usize,
}

impl SafeTensorBuffer {
    /// Open a SafeTensor file with memory mapping
    ///
    /// Every tensor entry is validated here, so later lookups cannot run past
    /// the mapped region.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let file = File::open(path)
            .map_err(|e| WattcastError::model(format!("Failed to open file {}: {}", path.display(), e)))?;

        // SAFETY: the mapping is read-only and model files are not rewritten while loaded.
        let mmap = unsafe {
            Mmap::map(&file)
                .map_err(|e| WattcastError::model(format!("Failed to mmap file {}: {}", path.display(), e)))?
        };

        if mmap.len() < 8 {
            return Err(WattcastError::model("File too small to contain header"));
        }

        let mut len_bytes = [0u8; 8];
        len_bytes.copy_from_slice(&mmap[..8]);
        let header_len = u64::from_le_bytes(len_bytes) as usize;

        if mmap.len() - 8 < header_len {
            return Err(WattcastError::model("File truncated: header length exceeds file size"));
        }

        let header_json = std::str::from_utf8(&mmap[8..8 + header_len])
            .map_err(|e| WattcastError::model(format!("Invalid UTF-8 in header: {}", e)))?;

        let raw: HashMap<String, serde_json::Value> = serde_json::from_str(header_json)
            .map_err(|e| WattcastError::model(format!("Failed to parse header JSON: {}", e)))?;

        let data_len = mmap.len() - 8 - header_len;
        let mut tensors = HashMap::with_capacity(raw.len());
        let mut metadata = HashMap::new();

        for (name, value) in raw {
            if name == METADATA_KEY {
                metadata = serde_json::from_value(value)
                    .map_err(|e| WattcastError::model(format!("Invalid {}: {}", METADATA_KEY, e)))?;
                continue;
            }

            let info: TensorInfo = serde_json::from_value(value)
                .map_err(|e| WattcastError::model(format!("Invalid entry for tensor {}: {}", name, e)))?;
            validate_entry(&name, &info, data_len)?;
            tensors.insert(name, info);
        }

        Ok(Self {
            mmap,
            tensors,
            metadata,
            header_len,
        })
    }

    /// Header metadata
    pub fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }

    /// Get tensor names
    pub fn tensor_names(&self) -> impl Iterator<Item = &String> {
        self.tensors.keys()
    }

    /// Get a zero-copy view of a tensor
    pub fn get_tensor(&self, name: &str) -> Option<SafeTensorView<'_>> {
        let info = self.tensors.get(name)?;
        let dtype = TensorDType::parse(&info.dtype)?;
        let base = 8 + self.header_len;

        Some(SafeTensorView {
            data: &self.mmap[base + info.data_offsets[0]..base + info.data_offsets[1]],
            shape: info.shape.clone(),
            dtype,
        })
    }

    /// Look up a tensor, failing with a model error when it is absent
    pub fn require(&self, name: &str) -> Result<SafeTensorView<'_>> {
        self.get_tensor(name)
            .ok_or_else(|| WattcastError::model(format!("Missing tensor: {}", name)))
    }
}

fn validate_entry(name: &str, info: &TensorInfo, data_len: usize) -> Result<()> {
    let dtype = TensorDType::parse(&info.dtype).ok_or_else(|| {
        WattcastError::model(format!("Tensor {} has unsupported dtype {}", name, info.dtype))
    })?;

    let [start, end] = info.data_offsets;
    if start > end || end > data_len {
        return Err(WattcastError::model(format!(
            "Tensor {} offsets [{}, {}) fall outside {} data bytes",
            name, start, end, data_len
        )));
    }

    let expected = info
        .num_elements()
        .and_then(|n| n.checked_mul(dtype.size()))
        .ok_or_else(|| {
            WattcastError::model(format!("Tensor {} shape {:?} is too large", name, info.shape))
        })?;
    if end - start != expected {
        return Err(WattcastError::model(format!(
            "Tensor {} spans {} bytes, shape {:?} needs {}",
            name,
            end - start,
            info.shape,
            expected
        )));
    }

    Ok(())
}

/// Zero-copy view into a SafeTensor
pub struct SafeTensorView<'a> {
    data: &'a [u8],
    shape: Vec<usize>,
    dtype: TensorDType,
}

impl<'a> SafeTensorView<'a> {
    /// Get the tensor shape
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Get the tensor dtype
    pub fn dtype(&self) -> TensorDType {
        self.dtype
    }

    /// Get the number of elements
    pub fn len(&self) -> usize {
        self.data.len() / self.dtype.size()
    }

    /// Check if the tensor is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Decode the little-endian payload into f32, widening half types
    pub fn to_f32_vec(&self) -> Vec<f32> {
        match self.dtype {
            TensorDType::F32 => self
                .data
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect(),
            TensorDType::F16 => self
                .data
                .chunks_exact(2)
                .map(|b| f16::from_le_bytes([b[0], b[1]]).to_f32())
                .collect(),
            TensorDType::BF16 => self
                .data
                .chunks_exact(2)
                .map(|b| bf16::from_le_bytes([b[0], b[1]]).to_f32())
                .collect(),
        }
    }
}

/// Builder for F32 safetensors files
#[derive(Debug, Default)]
pub struct SafeTensorWriter {
    tensors: Vec<(String, Vec<usize>, Vec<f32>)>,
    metadata: BTreeMap<String, String>,
}

impl SafeTensorWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a tensor; `data` must match `shape`
    pub fn tensor(mut self, name: impl Into<String>, shape: Vec<usize>, data: Vec<f32>) -> Result<Self> {
        let name = name.into();
        if element_count(&shape) != Some(data.len()) {
            return Err(WattcastError::tensor(format!(
                "Tensor {} has {} values for shape {:?}",
                name,
                data.len(),
                shape
            )));
        }
        self.tensors.push((name, shape, data));
        Ok(self)
    }

    /// Attach a header metadata entry
    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Write the file
    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut header = serde_json::Map::new();
        if !self.metadata.is_empty() {
            header.insert(METADATA_KEY.to_string(), serde_json::to_value(&self.metadata)?);
        }

        let mut offset = 0;
        for (name, shape, data) in &self.tensors {
            let end = offset + data.len() * TensorDType::F32.size();
            let info = TensorInfo {
                dtype: TensorDType::F32.as_str().to_string(),
                shape: shape.clone(),
                data_offsets: [offset, end],
            };
            header.insert(name.clone(), serde_json::to_value(info)?);
            offset = end;
        }

        let mut header_json = serde_json::to_string(&header)?;
        // pad so tensor data starts 8-byte aligned
        while header_json.len() % 8 != 0 {
            header_json.push(' ');
        }

        let mut out = BufWriter::new(File::create(path)?);
        out.write_all(&(header_json.len() as u64).to_le_bytes())?;
        out.write_all(header_json.as_bytes())?;
        for (_, _, data) in &self.tensors {
            for value in data {
                out.write_all(&value.to_le_bytes())?;
            }
        }
        out.flush()?;

        Ok(())
    }
}

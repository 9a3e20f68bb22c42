//! Safetensors container.
//!
//! ```text
//! [8 bytes: header_size (u64 LE)]
//! [header_size bytes: JSON header]
//! [remaining bytes: tensor data]
//! ```
//!
//! The JSON header maps tensor names to `{dtype, shape, data_offsets}` and
//! may carry a flat string map under `__metadata__`. Data offsets are not
//! required to be aligned, so values are decoded with `byteorder` instead of
//! being reinterpreted in place.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::Write;
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use memmap2::Mmap;
use serde::{Deserialize, Serialize};

use crate::{ModelError, ModelResult};

/// Value of the `format` metadata key written by [`SafetensorsWriter`].
pub const FORMAT: &str = "llama-stream";

const METADATA_KEY: &str = "__metadata__";

/// Metadata for a single tensor in the header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TensorInfo {
    pub dtype: String,
    pub shape: Vec<usize>,
    /// Byte range `[start, end)` within the data section.
    pub data_offsets: [usize; 2],
}

/// An owned `f32` tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

/// Every tensor of one file, decoded to `f32`.
#[derive(Debug, Default)]
pub struct TensorStore {
    tensors: HashMap<String, Tensor>,
    metadata: HashMap<String, String>,
}

impl TensorStore {
    /// Memory-map and decode a safetensors file.
    pub fn open(path: &Path) -> ModelResult<Self> {
        let file = File::open(path)?;
        // Safety: the map is read-only and dropped before this function
        // returns; tensors are copied out.
        let mmap = unsafe { Mmap::map(&file)? };
        Self::from_bytes(&mmap)
    }

    pub fn from_bytes(bytes: &[u8]) -> ModelResult<Self> {
        if bytes.len() < 8 {
            return Err(ModelError::InvalidHeader(format!(
                "file of {} bytes is too small for a header",
                bytes.len()
            )));
        }

        let header_size = (&bytes[..8]).read_u64::<LittleEndian>()? as usize;
        let data_start = 8usize
            .checked_add(header_size)
            .filter(|&end| end <= bytes.len())
            .ok_or_else(|| {
                ModelError::InvalidHeader(format!(
                    "header size {header_size} exceeds file size {}",
                    bytes.len()
                ))
            })?;

        let header_str = std::str::from_utf8(&bytes[8..data_start])
            .map_err(|e| ModelError::InvalidHeader(format!("invalid UTF-8 in header: {e}")))?;
        let raw: HashMap<String, serde_json::Value> = serde_json::from_str(header_str)
            .map_err(|e| ModelError::InvalidHeader(format!("malformed header JSON: {e}")))?;

        let data = &bytes[data_start..];
        let mut store = TensorStore::default();

        for (key, value) in raw {
            if key == METADATA_KEY {
                if let Some(obj) = value.as_object() {
                    for (mk, mv) in obj {
                        if let Some(s) = mv.as_str() {
                            store.metadata.insert(mk.clone(), s.to_string());
                        }
                    }
                }
                continue;
            }

            let info: TensorInfo = serde_json::from_value(value).map_err(|e| {
                ModelError::InvalidHeader(format!("failed to parse tensor '{key}': {e}"))
            })?;
            let tensor = decode_tensor(&key, &info, data)?;
            store.tensors.insert(key, tensor);
        }

        Ok(store)
    }

    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.tensors.get(name)
    }

    /// Remove tensor `name`, checking it has exactly `shape`.
    pub fn take(&mut self, name: &str, shape: &[usize]) -> ModelResult<Vec<f32>> {
        let tensor = self
            .tensors
            .remove(name)
            .ok_or_else(|| ModelError::MissingTensor(name.to_string()))?;
        if tensor.shape != shape {
            return Err(ModelError::TensorShape {
                name: name.to_string(),
                expected: shape.to_vec(),
                got: tensor.shape,
            });
        }
        Ok(tensor.data)
    }

    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }
}

/// Number of elements in `shape`, or `None` if it does not fit in `usize`.
pub(crate) fn element_count(shape: &[usize]) -> Option<usize> {
    shape.iter().try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
}

fn decode_tensor(name: &str, info: &TensorInfo, data: &[u8]) -> ModelResult<Tensor> {
    if info.dtype != "F32" {
        return Err(ModelError::UnsupportedDtype {
            name: name.to_string(),
            dtype: info.dtype.clone(),
        });
    }

    let [start, end] = info.data_offsets;
    if start > end || end > data.len() {
        return Err(ModelError::InvalidHeader(format!(
            "tensor '{name}' data [{start}..{end}] outside data section of {} bytes",
            data.len()
        )));
    }

    let (numel, expected_bytes) = element_count(&info.shape)
        .and_then(|n| Some((n, n.checked_mul(std::mem::size_of::<f32>())?)))
        .ok_or_else(|| {
            ModelError::InvalidHeader(format!("tensor '{name}' shape {:?} is too large", info.shape))
        })?;
    if end - start != expected_bytes {
        return Err(ModelError::InvalidHeader(format!(
            "tensor '{name}' has {} bytes for shape {:?} ({expected_bytes} expected)",
            end - start,
            info.shape
        )));
    }

    let mut values = vec![0.0f32; numel];
    LittleEndian::read_f32_into(&data[start..end], &mut values);
    Ok(Tensor {
        shape: info.shape.clone(),
        data: values,
    })
}

/// Builds a safetensors file in memory.
#[derive(Debug, Default)]
pub struct SafetensorsWriter {
    header: BTreeMap<String, TensorInfo>,
    metadata: BTreeMap<String, String>,
    data: Vec<u8>,
}

impl SafetensorsWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.insert(key.into(), value.into());
    }

    pub fn add_tensor(&mut self, name: impl Into<String>, shape: &[usize], values: &[f32]) -> ModelResult<()> {
        let numel = element_count(shape)
            .ok_or_else(|| ModelError::InvalidHeader(format!("tensor shape {shape:?} is too large")))?;
        if numel != values.len() {
            return Err(ModelError::ShapeMismatch {
                what: "tensor element count",
                expected: numel,
                got: values.len(),
            });
        }

        let start = self.data.len();
        for &v in values {
            self.data.write_f32::<LittleEndian>(v)?;
        }
        self.header.insert(
            name.into(),
            TensorInfo {
                dtype: "F32".into(),
                shape: shape.to_vec(),
                data_offsets: [start, self.data.len()],
            },
        );
        Ok(())
    }

    pub fn to_bytes(&self) -> ModelResult<Vec<u8>> {
        let mut header = serde_json::Map::new();
        if !self.metadata.is_empty() {
            header.insert(
                METADATA_KEY.to_string(),
                serde_json::to_value(&self.metadata)
                    .map_err(|e| ModelError::InvalidHeader(e.to_string()))?,
            );
        }
        for (name, info) in &self.header {
            header.insert(
                name.clone(),
                serde_json::to_value(info).map_err(|e| ModelError::InvalidHeader(e.to_string()))?,
            );
        }
        let header_json = serde_json::to_vec(&header)
            .map_err(|e| ModelError::InvalidHeader(e.to_string()))?;

        let mut out = Vec::with_capacity(8 + header_json.len() + self.data.len());
        out.write_u64::<LittleEndian>(header_json.len() as u64)?;
        out.extend_from_slice(&header_json);
        out.extend_from_slice(&self.data);
        Ok(out)
    }

    pub fn write(&self, path: &Path) -> ModelResult<()> {
        let bytes = self.to_bytes()?;
        let mut file = File::create(path)?;
        file.write_all(&bytes)?;
        file.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writer_output_reads_back() {
        let mut w = SafetensorsWriter::new();
        w.set_metadata("format", FORMAT);
        w.add_tensor("a", &[2, 2], &[1.0, 2.0, 3.0, 4.0]).unwrap();
        w.add_tensor("b", &[3], &[-1.0, 0.5, 9.0]).unwrap();

        let store = TensorStore::from_bytes(&w.to_bytes().unwrap()).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.metadata("format"), Some(FORMAT));
        assert_eq!(store.get("b").unwrap().data, vec![-1.0, 0.5, 9.0]);
    }

    #[test]
    fn too_small_file_rejected() {
        let err = TensorStore::from_bytes(&[1, 2, 3]).unwrap_err();
        assert!(matches!(err, ModelError::InvalidHeader(_)));
    }

    #[test]
    fn oversized_header_length_rejected() {
        let mut bytes = (1_000u64).to_le_bytes().to_vec();
        bytes.extend_from_slice(b"{}");
        assert!(matches!(
            TensorStore::from_bytes(&bytes),
            Err(ModelError::InvalidHeader(_))
        ));
    }

    #[test]
    fn non_f32_dtype_rejected() {
        let header = br#"{"t":{"dtype":"F16","shape":[1],"data_offsets":[0,2]}}"#;
        let mut bytes = (header.len() as u64).to_le_bytes().to_vec();
        bytes.extend_from_slice(header);
        bytes.extend_from_slice(&[0, 0]);
        assert!(matches!(
            TensorStore::from_bytes(&bytes),
            Err(ModelError::UnsupportedDtype { .. })
        ));
    }

    #[test]
    fn overflowing_shape_rejected() {
        let header = br#"{"t":{"dtype":"F32","shape":[4294967296,4294967296,16],"data_offsets":[0,4]}}"#;
        let mut bytes = (header.len() as u64).to_le_bytes().to_vec();
        bytes.extend_from_slice(header);
        bytes.extend_from_slice(&[0; 4]);
        assert!(matches!(
            TensorStore::from_bytes(&bytes),
            Err(ModelError::InvalidHeader(_))
        ));
    }

    #[test]
    fn take_checks_shape() {
        let mut w = SafetensorsWriter::new();
        w.add_tensor("a", &[4], &[0.0; 4]).unwrap();
        let mut store = TensorStore::from_bytes(&w.to_bytes().unwrap()).unwrap();
        assert!(matches!(
            store.take("a", &[2, 2]),
            Err(ModelError::TensorShape { .. })
        ));
        assert!(matches!(
            store.take("missing", &[1]),
            Err(ModelError::MissingTensor(_))
        ));
    }

    #[test]
    fn writer_rejects_wrong_element_count() {
        let mut w = SafetensorsWriter::new();
        assert!(w.add_tensor("a", &[3], &[1.0]).is_err());
        assert!(w.add_tensor("b", &[usize::MAX, 2], &[1.0]).is_err());
    }
}

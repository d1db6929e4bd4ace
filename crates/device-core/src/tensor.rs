//! JSON-safe n-dimensional tensor representation exchanged between clients
//! and the device manager. Raw bytes travel as base64 over the wire; the
//! in-process representation keeps them as a plain byte buffer.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

/// Element type of a [`Tensor`]'s backing bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    Uint8,
    Int8,
    Uint16,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
}

impl DType {
    /// Size in bytes of one element of this type.
    pub fn size_of(self) -> usize {
        match self {
            DType::Uint8 | DType::Int8 => 1,
            DType::Uint16 | DType::Int16 => 2,
            DType::Int32 | DType::Float32 => 4,
            DType::Int64 | DType::Float64 => 8,
        }
    }
}

/// Wire representation of a tensor: `{dtype, shape, data_b64}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TensorPayload {
    pub dtype: DType,
    pub shape: Vec<usize>,
    pub data_b64: String,
}

#[derive(Debug, thiserror::Error)]
pub enum TensorError {
    #[error("tensor data is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("tensor byte count {actual} does not match shape {shape:?} x {dtype:?} ({expected} bytes)")]
    SizeMismatch {
        dtype: DType,
        shape: Vec<usize>,
        expected: usize,
        actual: usize,
    },
    #[error("tensor shape {0:?} overflows when computing its byte count")]
    ShapeOverflow(Vec<usize>),
}

/// Decoded, in-memory tensor: raw little-endian row-major bytes plus shape
/// metadata. Does not interpret the bytes as a typed slice — callers that
/// need typed access reinterpret `data` according to `dtype`.
#[derive(Debug, Clone)]
pub struct Tensor {
    pub dtype: DType,
    pub shape: Vec<usize>,
    pub data: Vec<u8>,
}

impl Tensor {
    pub fn new(dtype: DType, shape: Vec<usize>, data: Vec<u8>) -> Result<Self, TensorError> {
        let expected = checked_element_count(&shape)
            .and_then(|count| count.checked_mul(dtype.size_of()))
            .ok_or_else(|| TensorError::ShapeOverflow(shape.clone()))?;
        if expected != data.len() {
            return Err(TensorError::SizeMismatch {
                dtype,
                shape,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { dtype, shape, data })
    }

    pub fn decode(payload: &TensorPayload) -> Result<Self, TensorError> {
        let data = STANDARD.decode(&payload.data_b64)?;
        Self::new(payload.dtype, payload.shape.clone(), data)
    }

    pub fn encode(&self) -> TensorPayload {
        TensorPayload {
            dtype: self.dtype,
            shape: self.shape.clone(),
            data_b64: STANDARD.encode(&self.data),
        }
    }
}

fn checked_element_count(shape: &[usize]) -> Option<usize> {
    shape.iter().try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_payload() {
        let tensor = Tensor::new(DType::Float32, vec![2, 2], vec![0u8; 16]).unwrap();
        let payload = tensor.encode();
        let decoded = Tensor::decode(&payload).unwrap();
        assert_eq!(decoded.shape, vec![2, 2]);
        assert_eq!(decoded.data.len(), 16);
    }

    #[test]
    fn rejects_byte_count_mismatch() {
        let err = Tensor::new(DType::Float32, vec![2, 2], vec![0u8; 8]).unwrap_err();
        assert!(matches!(err, TensorError::SizeMismatch { expected: 16, actual: 8, .. }));
    }

    #[test]
    fn scalar_shape_is_a_single_element() {
        let tensor = Tensor::new(DType::Uint8, vec![], vec![42]).unwrap();
        assert_eq!(tensor.data, vec![42]);
    }

    #[test]
    fn rejects_a_shape_that_overflows_the_byte_count() {
        let err = Tensor::new(DType::Float32, vec![2, usize::MAX / 2 + 1], vec![0u8; 8]).unwrap_err();
        assert!(matches!(err, TensorError::ShapeOverflow(_)));
    }

    #[test]
    fn decode_rejects_invalid_base64() {
        let payload = TensorPayload {
            dtype: DType::Uint8,
            shape: vec![1],
            data_b64: "not valid base64!!".to_string(),
        };
        assert!(Tensor::decode(&payload).is_err());
    }

    #[test]
    fn dtype_names_match_the_wire_vocabulary() {
        let names = [
            (DType::Uint8, "\"uint8\""),
            (DType::Int8, "\"int8\""),
            (DType::Uint16, "\"uint16\""),
            (DType::Int16, "\"int16\""),
            (DType::Int32, "\"int32\""),
            (DType::Int64, "\"int64\""),
            (DType::Float32, "\"float32\""),
            (DType::Float64, "\"float64\""),
        ];
        for (dtype, expected) in names {
            assert_eq!(serde_json::to_string(&dtype).unwrap(), expected);
        }
    }
}

use crate::error::Error;

#[cfg(feature = "serialization")]
use serde::{Deserialize, Serialize};

use ndarray::{ArrayD, Axis, IxDyn, ShapeError};

/// Owned n-dimensional `f32` array backing `CpuBackend` storage.
///
/// Serialized as its shape plus the raw bit pattern of every element, so
/// NaN and infinities survive formats such as JSON unchanged.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serialization", derive(Serialize, Deserialize))]
#[cfg_attr(
    feature = "serialization",
    serde(into = "ArrayRecord", try_from = "ArrayRecord")
)]
pub struct Array {
    pub(crate) data: ArrayD<f32>,
}

/// Serialized layout of an [`Array`]: row-major `f32::to_bits` values.
#[cfg(feature = "serialization")]
#[derive(Serialize, Deserialize)]
struct ArrayRecord {
    shape: Vec<usize>,
    bits: Vec<u32>,
}

#[cfg(feature = "serialization")]
impl From<Array> for ArrayRecord {
    fn from(array: Array) -> Self {
        Self {
            shape: array.shape().to_vec(),
            bits: array.data.iter().map(|v| v.to_bits()).collect(),
        }
    }
}

#[cfg(feature = "serialization")]
impl TryFrom<ArrayRecord> for Array {
    type Error = Error;

    fn try_from(record: ArrayRecord) -> Result<Self, Error> {
        let data = record.bits.into_iter().map(f32::from_bits).collect();
        Array::from_vec(data, &record.shape)
    }
}

impl Array {
    pub fn new(data: ArrayD<f32>) -> Self {
        Self { data }
    }

    pub fn from_vec(data: Vec<f32>, shape: &[usize]) -> Result<Self, Error> {
        let actual_len = data.len();
        let map_err = |_e: ShapeError| Error::ShapeMismatch {
            expected: shape.to_vec(),
            actual: vec![actual_len],
        };
        let array = ArrayD::from_shape_vec(IxDyn(shape), data).map_err(map_err)?;
        Ok(Self { data: array })
    }

    pub fn zeros(shape: &[usize]) -> Self {
        Self {
            data: ArrayD::zeros(IxDyn(shape)),
        }
    }

    pub fn ones(shape: &[usize]) -> Self {
        Self {
            data: ArrayD::ones(IxDyn(shape)),
        }
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the array contains no elements
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn get_data(&self) -> &ArrayD<f32> {
        &self.data
    }

    pub fn get_data_mut(&mut self) -> &mut ArrayD<f32> {
        &mut self.data
    }

    /// Copies the elements out in logical (row-major) order.
    pub fn to_vec(&self) -> Vec<f32> {
        self.data.iter().copied().collect()
    }

    pub fn into_raw_vec(self) -> Vec<f32> {
        if self.data.is_standard_layout() {
            self.data.into_raw_vec_and_offset().0
        } else {
            self.to_vec()
        }
    }

    pub(crate) fn broadcast_to(&self, shape: &[usize]) -> Result<Array, Error> {
        match self.data.broadcast(IxDyn(shape)) {
            Some(broadcasted_view) => Ok(Array::new(broadcasted_view.to_owned())),
            None => Err(Error::IncompatibleShapes {
                op: "broadcast".to_string(),
                shape_a: self.shape().to_vec(),
                shape_b: shape.to_vec(),
            }),
        }
    }

    pub(crate) fn sum_along_axis(&self, axis: usize) -> Result<Array, Error> {
        if axis >= self.data.ndim() {
            return Err(Error::InvalidAxis {
                axis,
                ndim: self.data.ndim(),
            });
        }
        Ok(Array::new(self.data.sum_axis(Axis(axis))))
    }

    /// Returns a contiguous copy with axes reordered by `axes`.
    /// The caller is responsible for `axes` being a valid permutation.
    pub(crate) fn permuted(&self, axes: &[usize]) -> Array {
        let view = self.data.view().permuted_axes(IxDyn(axes));
        Array::new(view.as_standard_layout().into_owned())
    }

    /// Returns a contiguous copy with the axis order reversed.
    pub(crate) fn reversed(&self) -> Array {
        let view = self.data.view().reversed_axes();
        Array::new(view.as_standard_layout().into_owned())
    }

    /// Reshapes the array without changing its data.
    /// The new shape must have the same total number of elements.
    pub fn reshape(&mut self, shape: &[usize]) -> Result<(), Error> {
        let old_size = self.data.len();
        let new_size = shape.iter().product::<usize>();
        if old_size != new_size {
            return Err(Error::ShapeMismatch {
                expected: shape.to_vec(),
                actual: self.data.shape().to_vec(),
            });
        }
        let flat: Vec<f32> = self.data.iter().copied().collect();
        self.data = ArrayD::from_shape_vec(IxDyn(shape), flat)
            .map_err(|e| Error::ShapeError(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permuted_is_contiguous() {
        let a = Array::from_vec((0..6).map(|v| v as f32).collect(), &[2, 3]).unwrap();
        let p = a.permuted(&[1, 0]);
        assert_eq!(p.shape(), &[3, 2]);
        assert_eq!(p.to_vec(), vec![0.0, 3.0, 1.0, 4.0, 2.0, 5.0]);
        assert!(p.get_data().is_standard_layout());
    }

    #[test]
    fn test_reshape_rejects_wrong_size() {
        let mut a = Array::zeros(&[2, 3]);
        assert!(matches!(a.reshape(&[4]), Err(Error::ShapeMismatch { .. })));
        a.reshape(&[3, 2]).unwrap();
        assert_eq!(a.shape(), &[3, 2]);
    }

    #[cfg(feature = "serialization")]
    #[test]
    fn test_json_keeps_non_finite_bits() -> Result<(), Error> {
        let values = vec![f32::NAN, f32::INFINITY, f32::NEG_INFINITY, -0.0, 1.0e-45];
        let a = Array::from_vec(values.clone(), &[5, 1])?;
        let json = serde_json::to_string(&a).map_err(|e| Error::SerializationError(e.to_string()))?;
        assert!(!json.contains("null"));

        let back: Array =
            serde_json::from_str(&json).map_err(|e| Error::DeserializationError(e.to_string()))?;
        assert_eq!(back.shape(), &[5, 1]);
        let bits = |v: &[f32]| v.iter().map(|x| x.to_bits()).collect::<Vec<_>>();
        assert_eq!(bits(&back.to_vec()), bits(&values));
        Ok(())
    }

    #[cfg(feature = "serialization")]
    #[test]
    fn test_json_rejects_mismatched_shape() {
        let result: Result<Array, _> = serde_json::from_str(r#"{"shape":[2,2],"bits":[0,0,0]}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_from_vec_shape_mismatch() {
        let err = Array::from_vec(vec![1.0, 2.0, 3.0], &[2, 2]).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));
    }
}

use std::fmt;

use crate::device::Device;
use crate::error::KoreError;
use crate::shape::Shape;
use crate::Result;

/// Dense, contiguous f32 tensor.
///
/// Data is always row-major. The `device` field records placement for
/// feed/fetch planning; the backing storage itself is host memory.
///
/// ```
/// use kore_core::Tensor;
///
/// let t = Tensor::from_f32(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]);
/// assert_eq!(t.dims(), &[2, 3]);
/// assert_eq!(t.numel(), 6);
/// ```
#[derive(Clone, PartialEq)]
pub struct Tensor {
    data: Vec<f32>,
    shape: Shape,
    device: Device,
}

impl Tensor {
    /// Create a tensor by copying `data`.
    ///
    /// # Panics
    /// Panics if `data.len()` does not match the element count of `shape`.
    pub fn from_f32(data: &[f32], shape: &[usize]) -> Self {
        Self::from_vec(data.to_vec(), shape)
    }

    /// Create a tensor that takes ownership of `data`.
    ///
    /// # Panics
    /// Panics if `data.len()` does not match the element count of `shape`.
    pub fn from_vec(data: Vec<f32>, shape: &[usize]) -> Self {
        let s = Shape::new(shape);
        assert_eq!(
            s.numel(),
            data.len(),
            "Shape {:?} requires {} elements, got {}",
            shape,
            s.numel(),
            data.len()
        );
        Self {
            data,
            shape: s,
            device: Device::Cpu,
        }
    }

    /// Fallible variant of [`Tensor::from_vec`].
    pub fn try_from_vec(data: Vec<f32>, shape: &[usize]) -> Result<Self> {
        let s = Shape::new(shape);
        if s.numel() != data.len() {
            return Err(KoreError::ShapeMismatch {
                expected: shape.to_vec(),
                got: vec![data.len()],
            });
        }
        Ok(Self {
            data,
            shape: s,
            device: Device::Cpu,
        })
    }

    pub fn zeros(shape: &[usize]) -> Self {
        let n = Shape::new(shape).numel();
        Self::from_vec(vec![0.0; n], shape)
    }

    pub fn full(shape: &[usize], value: f32) -> Self {
        let n = Shape::new(shape).numel();
        Self::from_vec(vec![value; n], shape)
    }

    /// Same data, placed on `device`.
    pub fn with_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn dims(&self) -> &[usize] {
        self.shape.dims()
    }

    pub fn ndim(&self) -> usize {
        self.shape.ndim()
    }

    pub fn numel(&self) -> usize {
        self.data.len()
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn as_f32_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn as_f32_slice_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }

    /// Reinterpret with a new shape of the same element count.
    pub fn reshape(mut self, shape: &[usize]) -> Result<Self> {
        let s = Shape::new(shape);
        if s.numel() != self.data.len() {
            return Err(KoreError::ShapeMismatch {
                expected: self.shape.dims().to_vec(),
                got: shape.to_vec(),
            });
        }
        self.shape = s;
        Ok(self)
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("shape", &self.shape)
            .field("device", &self.device)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_f32() {
        let t = Tensor::from_f32(&[1.0, 2.0, 3.0, 4.0], &[2, 2]);
        assert_eq!(t.dims(), &[2, 2]);
        assert_eq!(t.as_f32_slice(), &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(t.device(), Device::Cpu);
    }

    #[test]
    #[should_panic(expected = "requires 6 elements")]
    fn test_from_f32_bad_len() {
        Tensor::from_f32(&[1.0, 2.0], &[2, 3]);
    }

    #[test]
    fn test_try_from_vec() {
        assert!(Tensor::try_from_vec(vec![0.0; 6], &[2, 3]).is_ok());
        assert!(matches!(
            Tensor::try_from_vec(vec![0.0; 5], &[2, 3]),
            Err(KoreError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_zeros_full() {
        let z = Tensor::zeros(&[2, 3, 4]);
        assert_eq!(z.numel(), 24);
        assert!(z.as_f32_slice().iter().all(|&v| v == 0.0));
        let o = Tensor::full(&[3], 1.5);
        assert_eq!(o.as_f32_slice(), &[1.5, 1.5, 1.5]);
    }

    #[test]
    fn test_reshape_and_device() {
        let t = Tensor::zeros(&[2, 6]).with_device(Device::Cuda(0));
        let r = t.reshape(&[3, 4]).unwrap();
        assert_eq!(r.dims(), &[3, 4]);
        assert_eq!(r.device(), Device::Cuda(0));
        assert!(r.reshape(&[5]).is_err());
    }

    #[test]
    fn test_scalar_rank0() {
        let t = Tensor::from_f32(&[7.0], &[]);
        assert_eq!(t.ndim(), 0);
        assert_eq!(t.numel(), 1);
    }
}

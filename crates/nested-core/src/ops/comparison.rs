use crate::error::NestedCoreError;
use crate::{Result, Tensor};

impl Tensor {
    fn values_f64(&self) -> Vec<f64> {
        let buffer = self.storage_ref().buffer();
        self.physical_indices()
            .into_iter()
            .map(|i| buffer.get_f64(i).unwrap_or(0.0))
            .collect()
    }

    /// True when every element is non-zero. Vacuously true when empty.
    pub fn all(&self) -> bool {
        self.values_f64().into_iter().all(|v| v != 0.0)
    }

    /// True when any element is non-zero. False when empty.
    pub fn any(&self) -> bool {
        self.values_f64().into_iter().any(|v| v != 0.0)
    }

    /// Elementwise `|a - b| <= atol + rtol * |b|` over equal shapes.
    pub fn allclose(&self, other: &Tensor, rtol: f32, atol: f32) -> Result<bool> {
        if self.dims() != other.dims() {
            return Err(NestedCoreError::ShapeMismatch {
                expected: self.dims().to_vec(),
                got: other.dims().to_vec(),
            });
        }
        let a = self.to_f32_vec()?;
        let b = other.to_f32_vec()?;
        Ok(a.iter()
            .zip(b.iter())
            .all(|(&x, &y)| (x - y).abs() <= atol + rtol * y.abs()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DType;

    #[test]
    fn test_all_any() {
        let t = Tensor::from_f32(&[1.0, 0.0], &[2]);
        assert!(!t.all());
        assert!(t.any());
        let empty = Tensor::zeros(&[0], DType::I64);
        assert!(empty.all());
        assert!(!empty.any());
        assert!(Tensor::ones(&[3]).to_dtype(DType::U8).all());
    }

    #[test]
    fn test_allclose() {
        let a = Tensor::from_f32(&[1.0, 2.0], &[2]);
        let b = Tensor::from_f32(&[1.0, 2.000001], &[2]);
        assert!(a.allclose(&b, 1e-5, 1e-8).unwrap());
        assert!(!a.allclose(&Tensor::from_f32(&[1.0, 2.1], &[2]), 1e-5, 1e-8).unwrap());
        assert!(a.allclose(&Tensor::ones(&[3]), 1e-5, 1e-8).is_err());
    }
}

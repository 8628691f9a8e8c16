//! Layer operations over NestedTensors.
//!
//! Image-style ops treat each component as one sample: unsqueeze(0), run
//! the dense kernel, squeeze(0).

use std::time::Instant;

use nested_core::functional::{self, Conv2dParams, Pool2dParams, RunningStats};
use nested_core::Tensor;
use rand::Rng;

use crate::error::NestedTensorError;
use crate::nested::NestedTensor;
use crate::Result;

fn per_sample(
    input: &Tensor,
    op: impl FnOnce(&Tensor) -> nested_core::Result<Tensor>,
) -> nested_core::Result<Tensor> {
    op(&input.unsqueeze(0)?)?.squeeze(Some(0))
}

impl NestedTensor {
    pub fn dropout<R: Rng + ?Sized>(&self, p: f64, training: bool, rng: &mut R) -> Result<NestedTensor> {
        if let Some(buffer) = self.packed() {
            let out = functional::dropout(buffer, p, training, rng)?;
            return NestedTensor::from_buffer(out, self.nested_size().clone());
        }
        NestedTensor::from_structure(
            self.structure()
                .try_map(|t| Ok(functional::dropout(t, p, training, &mut *rng)?))?,
        )
    }

    pub fn dropout_<R: Rng + ?Sized>(&mut self, p: f64, training: bool, rng: &mut R) -> Result<()> {
        self.apply_elementwise_(|t| functional::dropout_(t, p, training, &mut *rng))
    }

    pub fn conv2d(&self, weight: &Tensor, bias: Option<&Tensor>, params: Conv2dParams) -> Result<NestedTensor> {
        let _t = if log::log_enabled!(log::Level::Trace) { Some(Instant::now()) } else { None };
        let out = self.par_map_components(|t| per_sample(t, |x| functional::conv2d(x, weight, bias, params)))?;
        if let Some(t) = _t {
            log::trace!(
                "[perf] nested::conv2d {} components {:.3}ms",
                out.components().len(),
                t.elapsed().as_secs_f64() * 1000.0
            );
        }
        Ok(out)
    }

    /// Batch norm with each component as a batch of one. With running stats
    /// in training mode the components are processed in order, each one
    /// updating the stats.
    pub fn batch_norm(
        &self,
        mut running: Option<&mut RunningStats>,
        weight: Option<&Tensor>,
        bias: Option<&Tensor>,
        training: bool,
        momentum: f32,
        eps: f32,
    ) -> Result<NestedTensor> {
        if training && running.is_some() {
            return NestedTensor::from_structure(self.structure().try_map(|t| {
                Ok(per_sample(t, |x| {
                    functional::batch_norm(x, running.as_deref_mut(), weight, bias, training, momentum, eps)
                })?)
            })?);
        }
        let stats = running.map(|r| r.clone());
        self.par_map_components(|t| {
            per_sample(t, |x| {
                let mut local = stats.clone();
                functional::batch_norm(x, local.as_mut(), weight, bias, training, momentum, eps)
            })
        })
    }

    /// Max pooling. When every dimension is regular the components are
    /// stacked and pooled as one batch, then re-nested; otherwise each
    /// component is pooled on its own.
    pub fn max_pool2d(&self, params: Pool2dParams) -> Result<NestedTensor> {
        let regular = self.sizes().iter().all(Option::is_some);
        if regular && self.tensor_dim() == 3 && self.numel() > 0 {
            log::debug!("max_pool2d: regular input, pooling {} components as one batch", self.components().len());
            let nested_dim = self.nested_dim();
            let dense = self.to_tensor()?;
            let dims = dense.dims().to_vec();
            let (c, h, w) = (dims[nested_dim], dims[nested_dim + 1], dims[nested_dim + 2]);
            let batched = dense.reshape(&[-1, c as isize, h as isize, w as isize])?;
            let pooled = functional::max_pool2d(&batched, params)?;
            let target: Vec<isize> = dims[..nested_dim]
                .iter()
                .chain(&pooled.dims()[1..])
                .map(|&d| d as isize)
                .collect();
            let out = NestedTensor::from_tensor(pooled.reshape(&target)?)?;
            return out.to_nested_tensor(Some(nested_dim as isize - 1));
        }
        log::debug!("max_pool2d: irregular input, pooling per component");
        self.par_map_components(|t| per_sample(t, |x| functional::max_pool2d(x, params)))
    }

    /// Layer norm over the last dimension, which must be regular.
    pub fn layer_norm(
        &self,
        normalized_shape: &[usize],
        weight: Option<&Tensor>,
        bias: Option<&Tensor>,
        eps: f32,
    ) -> Result<NestedTensor> {
        if normalized_shape.len() != 1 {
            return Err(NestedTensorError::InvalidArgument(format!(
                "layer_norm over a NestedTensor supports exactly one normalized dimension, got {}",
                normalized_shape.len()
            )));
        }
        let last = self.dim() - 1;
        self.tensor_dim_of(last as isize, "layer_norm")?;
        if self.sizes()[last].is_none() {
            return Err(NestedTensorError::IrregularShape { dim: last });
        }
        self.map_components(|t| functional::layer_norm(t, normalized_shape, weight, bias, eps))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn images() -> NestedTensor {
        let mut rng = StdRng::seed_from_u64(11);
        NestedTensor::from_tensors(vec![
            Tensor::randn_with(&[2, 4, 4], &mut rng),
            Tensor::randn_with(&[2, 6, 2], &mut rng),
        ])
        .unwrap()
    }

    #[test]
    fn test_conv2d_per_component() {
        let nt = images();
        let weight = Tensor::ones(&[3, 2, 1, 1]);
        let out = nt.conv2d(&weight, None, Conv2dParams::default()).unwrap();
        assert_eq!(out.components()[0].dims(), &[3, 4, 4]);
        assert_eq!(out.components()[1].dims(), &[3, 6, 2]);
        let x = nt.components()[1].to_f32_vec().unwrap();
        let y = out.components()[1].to_f32_vec().unwrap();
        assert!((y[0] - (x[0] + x[12])).abs() < 1e-5);
    }

    #[test]
    fn test_max_pool2d_regular_matches_irregular_path() {
        let mut rng = StdRng::seed_from_u64(5);
        let parts: Vec<Tensor> = (0..3).map(|_| Tensor::randn_with(&[2, 4, 4], &mut rng)).collect();
        let regular = NestedTensor::from_tensors(parts.clone()).unwrap();
        let params = Pool2dParams::new((2, 2));
        let pooled = regular.max_pool2d(params).unwrap();
        assert_eq!(pooled.nested_dim(), 1);
        for (p, t) in pooled.components().iter().zip(&parts) {
            let direct = functional::max_pool2d(&t.unsqueeze(0).unwrap(), params).unwrap();
            assert_eq!(p.dims(), &[2, 2, 2]);
            assert_eq!(p.to_f32_vec().unwrap(), direct.to_f32_vec().unwrap());
        }

        let ragged = images().max_pool2d(params).unwrap();
        assert_eq!(ragged.components()[1].dims(), &[2, 3, 1]);
    }

    #[test]
    fn test_batch_norm_eval_and_train() {
        let nt = images();
        let mut stats = RunningStats::new(2);
        let before = stats.clone();
        let out = nt.batch_norm(Some(&mut stats), None, None, false, 0.1, 1e-5).unwrap();
        assert_eq!(stats, before);
        let x = nt.components()[0].to_f32_vec().unwrap();
        let y = out.components()[0].to_f32_vec().unwrap();
        assert!((y[3] - x[3] / (1.0f32 + 1e-5).sqrt()).abs() < 1e-5);

        nt.batch_norm(Some(&mut stats), None, None, true, 0.1, 1e-5).unwrap();
        assert_ne!(stats, before);
    }

    #[test]
    fn test_dropout_paths() {
        let mut rng = StdRng::seed_from_u64(1);
        let nt = images();
        let eval = nt.dropout(0.5, false, &mut rng).unwrap();
        assert_eq!(eval.components()[1].to_f32_vec().unwrap(), nt.components()[1].to_f32_vec().unwrap());

        let mut packed = nt.contiguous().unwrap();
        packed.dropout_(1.0, true, &mut rng).unwrap();
        assert!(!packed.any());
        assert!(packed.is_contiguous());
    }

    #[test]
    fn test_layer_norm_checks() {
        let nt = NestedTensor::from_tensors(vec![Tensor::randn(&[3, 4]), Tensor::randn(&[1, 4])]).unwrap();
        let out = nt.layer_norm(&[4], None, None, 1e-5).unwrap();
        let row = out.components()[1].to_f32_vec().unwrap();
        assert!(row.iter().sum::<f32>().abs() < 1e-4);
        assert!(nt.layer_norm(&[3, 4], None, None, 1e-5).is_err());

        let irregular = NestedTensor::from_tensors(vec![Tensor::randn(&[3]), Tensor::randn(&[4])]).unwrap();
        assert!(matches!(
            irregular.layer_norm(&[3], None, None, 1e-5),
            Err(NestedTensorError::IrregularShape { dim: 1 })
        ));
    }
}

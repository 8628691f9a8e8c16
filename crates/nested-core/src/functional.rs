//! Stateless neural-network kernels over dense, batched inputs.
//!
//! Layout conventions follow the usual NCHW ordering: `conv2d` and
//! `max_pool2d` take `[N, C, H, W]`, `batch_norm` takes `[N, C, ...]`.

use std::time::Instant;

use rand::Rng;

use crate::error::NestedCoreError;
use crate::{Result, Tensor};

pub fn relu(input: &Tensor) -> Result<Tensor> {
    input.relu()
}

fn check_probability(p: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&p) {
        return Err(NestedCoreError::InvalidArgument(format!(
            "dropout probability has to be between 0 and 1, but got {p}"
        )));
    }
    Ok(())
}

/// Zero each element with probability `p` and rescale survivors by
/// `1 / (1 - p)`. Identity when not training.
pub fn dropout<R: Rng + ?Sized>(input: &Tensor, p: f64, training: bool, rng: &mut R) -> Result<Tensor> {
    let mut out = input.contiguous();
    dropout_(&mut out, p, training, rng)?;
    Ok(out)
}

pub fn dropout_<R: Rng + ?Sized>(input: &mut Tensor, p: f64, training: bool, rng: &mut R) -> Result<()> {
    check_probability(p)?;
    input.require_f32()?;
    if !training || p == 0.0 {
        return Ok(());
    }
    if p == 1.0 {
        return input.map_inplace(|_| 0.0);
    }
    let scale = (1.0 / (1.0 - p)) as f32;
    let values: Vec<f32> = input
        .to_f32_vec()?
        .into_iter()
        .map(|v| if rng.gen::<f64>() < p { 0.0 } else { v * scale })
        .collect();
    input.write_f32(&values)
}

/// Geometry of a 2-D convolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conv2dParams {
    pub stride: (usize, usize),
    pub padding: (usize, usize),
    pub dilation: (usize, usize),
    pub groups: usize,
}

impl Default for Conv2dParams {
    fn default() -> Self {
        Self {
            stride: (1, 1),
            padding: (0, 0),
            dilation: (1, 1),
            groups: 1,
        }
    }
}

fn conv_out_size(input: usize, kernel: usize, stride: usize, padding: usize, dilation: usize) -> Option<usize> {
    let span = dilation * (kernel - 1) + 1;
    let padded = input + 2 * padding;
    if padded < span {
        return None;
    }
    Some((padded - span) / stride + 1)
}

fn require_4d(name: &str, t: &Tensor) -> Result<(usize, usize, usize, usize)> {
    match *t.dims() {
        [n, c, h, w] => Ok((n, c, h, w)),
        _ => Err(NestedCoreError::InvalidArgument(format!(
            "{name}: expected 4-D input [N, C, H, W], got {}",
            t.shape()
        ))),
    }
}

/// 2-D cross-correlation. `weight` is `[O, C / groups, kh, kw]`.
pub fn conv2d(input: &Tensor, weight: &Tensor, bias: Option<&Tensor>, params: Conv2dParams) -> Result<Tensor> {
    let _t = if log::log_enabled!(log::Level::Trace) { Some(Instant::now()) } else { None };
    let (n, c, h, w) = require_4d("conv2d", input)?;
    let (o, cg, kh, kw) = require_4d("conv2d weight", weight)?;
    let Conv2dParams { stride, padding, dilation, groups } = params;
    if groups == 0 || kh == 0 || kw == 0 || stride.0 == 0 || stride.1 == 0 || dilation.0 == 0 || dilation.1 == 0 {
        return Err(NestedCoreError::InvalidArgument(
            "conv2d: kernel, stride, dilation and groups must be positive".into(),
        ));
    }
    if c % groups != 0 || o % groups != 0 || cg * groups != c {
        return Err(NestedCoreError::ShapeMismatch {
            expected: vec![o, c / groups.max(1), kh, kw],
            got: weight.dims().to_vec(),
        });
    }
    if let Some(b) = bias {
        if b.dims() != [o] {
            return Err(NestedCoreError::ShapeMismatch {
                expected: vec![o],
                got: b.dims().to_vec(),
            });
        }
    }
    let oh = conv_out_size(h, kh, stride.0, padding.0, dilation.0);
    let ow = conv_out_size(w, kw, stride.1, padding.1, dilation.1);
    let (oh, ow) = match (oh, ow) {
        (Some(a), Some(b)) => (a, b),
        _ => {
            return Err(NestedCoreError::InvalidArgument(format!(
                "conv2d: kernel {kh}x{kw} is larger than padded input {h}x{w}"
            )))
        }
    };

    let x = input.to_f32_vec()?;
    let wt = weight.to_f32_vec()?;
    let bv = bias.map(|b| b.to_f32_vec()).transpose()?;
    let out_per_group = o / groups;
    let mut out = vec![0.0f32; n * o * oh * ow];

    for b in 0..n {
        for oc in 0..o {
            let g = oc / out_per_group;
            let base = bv.as_ref().map_or(0.0, |v| v[oc]);
            for oy in 0..oh {
                for ox in 0..ow {
                    let mut acc = base;
                    for ic in 0..cg {
                        let in_c = g * cg + ic;
                        for ky in 0..kh {
                            let iy = (oy * stride.0 + ky * dilation.0) as isize - padding.0 as isize;
                            if iy < 0 || iy >= h as isize {
                                continue;
                            }
                            for kx in 0..kw {
                                let ix = (ox * stride.1 + kx * dilation.1) as isize - padding.1 as isize;
                                if ix < 0 || ix >= w as isize {
                                    continue;
                                }
                                let xi = ((b * c + in_c) * h + iy as usize) * w + ix as usize;
                                let wi = ((oc * cg + ic) * kh + ky) * kw + kx;
                                acc += x[xi] * wt[wi];
                            }
                        }
                    }
                    out[((b * o + oc) * oh + oy) * ow + ox] = acc;
                }
            }
        }
    }
    if let Some(t) = _t {
        log::trace!("[perf] conv2d {:?}->[{}, {}, {}, {}] {:.3}ms",
            input.dims(), n, o, oh, ow, t.elapsed().as_secs_f64() * 1000.0);
    }
    Tensor::from_vec(out, &[n, o, oh, ow])
}

/// Geometry of a 2-D max pool. `stride` defaults to the kernel size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pool2dParams {
    pub kernel_size: (usize, usize),
    pub stride: Option<(usize, usize)>,
    pub padding: (usize, usize),
    pub dilation: (usize, usize),
    pub ceil_mode: bool,
}

impl Pool2dParams {
    pub fn new(kernel_size: (usize, usize)) -> Self {
        Self {
            kernel_size,
            stride: None,
            padding: (0, 0),
            dilation: (1, 1),
            ceil_mode: false,
        }
    }

    pub fn with_stride(mut self, stride: (usize, usize)) -> Self {
        self.stride = Some(stride);
        self
    }

    pub fn with_padding(mut self, padding: (usize, usize)) -> Self {
        self.padding = padding;
        self
    }

    pub fn with_ceil_mode(mut self, ceil_mode: bool) -> Self {
        self.ceil_mode = ceil_mode;
        self
    }
}

fn pool_out_size(input: usize, kernel: usize, stride: usize, padding: usize, dilation: usize, ceil_mode: bool) -> Option<usize> {
    let span = dilation * (kernel - 1) + 1;
    let padded = input + 2 * padding;
    if padded < span {
        return None;
    }
    let numer = padded - span;
    let mut out = if ceil_mode { (numer + stride - 1) / stride + 1 } else { numer / stride + 1 };
    // the last window has to start inside the input or left padding
    if ceil_mode && (out - 1) * stride >= input + padding {
        out -= 1;
    }
    Some(out)
}

/// 2-D max pooling over `[N, C, H, W]` or unbatched `[C, H, W]` input.
pub fn max_pool2d(input: &Tensor, params: Pool2dParams) -> Result<Tensor> {
    if input.ndim() == 3 {
        let out = max_pool2d(&input.unsqueeze(0)?, params)?;
        return out.squeeze(Some(0));
    }
    let (n, c, h, w) = require_4d("max_pool2d", input)?;
    let (kh, kw) = params.kernel_size;
    let (sh, sw) = params.stride.unwrap_or(params.kernel_size);
    let (ph, pw) = params.padding;
    let (dh, dw) = params.dilation;
    if kh == 0 || kw == 0 || sh == 0 || sw == 0 || dh == 0 || dw == 0 {
        return Err(NestedCoreError::InvalidArgument(
            "max_pool2d: kernel, stride and dilation must be positive".into(),
        ));
    }
    if ph > kh / 2 || pw > kw / 2 {
        return Err(NestedCoreError::InvalidArgument(
            "max_pool2d: pad should be at most half of the kernel size".into(),
        ));
    }
    let (oh, ow) = match (
        pool_out_size(h, kh, sh, ph, dh, params.ceil_mode),
        pool_out_size(w, kw, sw, pw, dw, params.ceil_mode),
    ) {
        (Some(a), Some(b)) => (a, b),
        _ => {
            return Err(NestedCoreError::InvalidArgument(format!(
                "max_pool2d: output size is too small for input {h}x{w}"
            )))
        }
    };

    let x = input.to_f32_vec()?;
    let mut out = vec![f32::NEG_INFINITY; n * c * oh * ow];
    for plane in 0..n * c {
        let src = &x[plane * h * w..(plane + 1) * h * w];
        for oy in 0..oh {
            for ox in 0..ow {
                let mut best = f32::NEG_INFINITY;
                for ky in 0..kh {
                    let iy = (oy * sh + ky * dh) as isize - ph as isize;
                    if iy < 0 || iy >= h as isize {
                        continue;
                    }
                    for kx in 0..kw {
                        let ix = (ox * sw + kx * dw) as isize - pw as isize;
                        if ix < 0 || ix >= w as isize {
                            continue;
                        }
                        let v = src[iy as usize * w + ix as usize];
                        if v > best || v.is_nan() {
                            best = v;
                        }
                    }
                }
                out[(plane * oh + oy) * ow + ox] = best;
            }
        }
    }
    Tensor::from_vec(out, &[n, c, oh, ow])
}

/// Per-channel running statistics tracked by batch norm.
#[derive(Debug, Clone, PartialEq)]
pub struct RunningStats {
    pub mean: Vec<f32>,
    pub var: Vec<f32>,
}

impl RunningStats {
    pub fn new(num_features: usize) -> Self {
        Self {
            mean: vec![0.0; num_features],
            var: vec![1.0; num_features],
        }
    }
}

/// Batch normalization over `[N, C, ...]`.
///
/// In training mode (or when no running stats are given) the batch
/// statistics normalize the input, and running stats, if present, are
/// updated with `momentum` using the unbiased variance. In eval mode the
/// running stats are used.
pub fn batch_norm(
    input: &Tensor,
    mut running: Option<&mut RunningStats>,
    weight: Option<&Tensor>,
    bias: Option<&Tensor>,
    training: bool,
    momentum: f32,
    eps: f32,
) -> Result<Tensor> {
    let _t = if log::log_enabled!(log::Level::Trace) { Some(Instant::now()) } else { None };
    if input.ndim() < 2 {
        return Err(NestedCoreError::InvalidArgument(format!(
            "batch_norm: expected input with at least 2 dims [N, C, ...], got {}",
            input.shape()
        )));
    }
    let dims = input.dims();
    let (n, c) = (dims[0], dims[1]);
    let inner: usize = dims[2..].iter().product();
    let gamma = weight.map(|t| t.to_f32_vec()).transpose()?;
    let beta = bias.map(|t| t.to_f32_vec()).transpose()?;
    for v in [&gamma, &beta].into_iter().flatten() {
        if v.len() != c {
            return Err(NestedCoreError::ShapeMismatch {
                expected: vec![c],
                got: vec![v.len()],
            });
        }
    }
    if let Some(stats) = running.as_ref() {
        if stats.mean.len() != c || stats.var.len() != c {
            return Err(NestedCoreError::ShapeMismatch {
                expected: vec![c],
                got: vec![stats.mean.len()],
            });
        }
    }

    let x = input.to_f32_vec()?;
    let count = n * inner;
    let use_batch_stats = training || running.is_none();
    if use_batch_stats && count <= 1 && training {
        return Err(NestedCoreError::InvalidArgument(format!(
            "batch_norm: expected more than 1 value per channel when training, got input {}",
            input.shape()
        )));
    }

    let mut mean = vec![0.0f32; c];
    let mut var = vec![0.0f32; c];
    if use_batch_stats {
        for ch in 0..c {
            let mut sum = 0.0f64;
            for b in 0..n {
                let base = (b * c + ch) * inner;
                sum += x[base..base + inner].iter().map(|&v| v as f64).sum::<f64>();
            }
            let m = sum / count as f64;
            let mut sq = 0.0f64;
            for b in 0..n {
                let base = (b * c + ch) * inner;
                sq += x[base..base + inner].iter().map(|&v| (v as f64 - m).powi(2)).sum::<f64>();
            }
            mean[ch] = m as f32;
            var[ch] = (sq / count as f64) as f32;
            if let (true, Some(stats)) = (training, running.as_deref_mut()) {
                let unbiased = if count > 1 { sq / (count - 1) as f64 } else { 0.0 } as f32;
                stats.mean[ch] = (1.0 - momentum) * stats.mean[ch] + momentum * mean[ch];
                stats.var[ch] = (1.0 - momentum) * stats.var[ch] + momentum * unbiased;
            }
        }
    }
    let (mean, var) = match (use_batch_stats, running.as_ref()) {
        (false, Some(stats)) => (stats.mean.clone(), stats.var.clone()),
        _ => (mean, var),
    };

    let mut out = x;
    for b in 0..n {
        for ch in 0..c {
            let inv = 1.0 / (var[ch] + eps).sqrt();
            let g = gamma.as_ref().map_or(1.0, |v| v[ch]);
            let s = beta.as_ref().map_or(0.0, |v| v[ch]);
            let base = (b * c + ch) * inner;
            for v in &mut out[base..base + inner] {
                *v = (*v - mean[ch]) * inv * g + s;
            }
        }
    }
    if let Some(t) = _t {
        log::trace!("[perf] batch_norm {:?} training={} {:.3}ms",
            input.dims(), training, t.elapsed().as_secs_f64() * 1000.0);
    }
    Tensor::from_vec(out, input.dims())
}

/// Layer normalization over the trailing `normalized_shape` dims.
pub fn layer_norm(
    input: &Tensor,
    normalized_shape: &[usize],
    weight: Option<&Tensor>,
    bias: Option<&Tensor>,
    eps: f32,
) -> Result<Tensor> {
    let nd = normalized_shape.len();
    if nd == 0 || input.ndim() < nd || &input.dims()[input.ndim() - nd..] != normalized_shape {
        return Err(NestedCoreError::ShapeMismatch {
            expected: normalized_shape.to_vec(),
            got: input.dims().to_vec(),
        });
    }
    let size: usize = normalized_shape.iter().product();
    let gamma = weight.map(|t| t.to_f32_vec()).transpose()?;
    let beta = bias.map(|t| t.to_f32_vec()).transpose()?;
    for v in [&gamma, &beta].into_iter().flatten() {
        if v.len() != size {
            return Err(NestedCoreError::ShapeMismatch {
                expected: normalized_shape.to_vec(),
                got: vec![v.len()],
            });
        }
    }
    let mut out = input.to_f32_vec()?;
    if size > 0 {
        for row in out.chunks_mut(size) {
            let mean = row.iter().sum::<f32>() / size as f32;
            let var = row.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / size as f32;
            let inv = 1.0 / (var + eps).sqrt();
            for (i, v) in row.iter_mut().enumerate() {
                let g = gamma.as_ref().map_or(1.0, |w| w[i]);
                let b = beta.as_ref().map_or(0.0, |w| w[i]);
                *v = (*v - mean) * inv * g + b;
            }
        }
    }
    Tensor::from_vec(out, input.dims())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_dropout_modes() {
        let x = Tensor::ones(&[1000]);
        let mut rng = StdRng::seed_from_u64(0);
        let eval = dropout(&x, 0.5, false, &mut rng).unwrap();
        assert_eq!(eval.to_f32_vec().unwrap(), vec![1.0; 1000]);
        let train = dropout(&x, 0.5, true, &mut rng).unwrap().to_f32_vec().unwrap();
        assert!(train.iter().all(|&v| v == 0.0 || v == 2.0));
        let zeros = train.iter().filter(|&&v| v == 0.0).count();
        assert!(zeros > 350 && zeros < 650);
        assert!(dropout(&x, 1.5, true, &mut rng).is_err());
        let all = dropout(&x, 1.0, true, &mut rng).unwrap();
        assert!(!all.any());
    }

    #[test]
    fn test_conv2d_identity_kernel() {
        let x = Tensor::from_f32(&(0..9).map(|v| v as f32).collect::<Vec<_>>(), &[1, 1, 3, 3]);
        let w = Tensor::ones(&[1, 1, 1, 1]);
        let y = conv2d(&x, &w, None, Conv2dParams::default()).unwrap();
        assert_eq!(y.dims(), &[1, 1, 3, 3]);
        assert_eq!(y.to_f32_vec().unwrap(), x.to_f32_vec().unwrap());
    }

    #[test]
    fn test_conv2d_padding_and_bias() {
        let x = Tensor::ones(&[1, 1, 2, 2]);
        let w = Tensor::ones(&[2, 1, 3, 3]);
        let b = Tensor::from_f32(&[0.0, 10.0], &[2]);
        let params = Conv2dParams { padding: (1, 1), ..Default::default() };
        let y = conv2d(&x, &w, Some(&b), params).unwrap();
        assert_eq!(y.dims(), &[1, 2, 2, 2]);
        let v = y.to_f32_vec().unwrap();
        assert_eq!(&v[..4], &[4.0, 4.0, 4.0, 4.0]);
        assert_eq!(&v[4..], &[14.0, 14.0, 14.0, 14.0]);
    }

    #[test]
    fn test_conv2d_groups() {
        let x = Tensor::from_f32(&[1.0, 2.0], &[1, 2, 1, 1]);
        let w = Tensor::from_f32(&[3.0, 5.0], &[2, 1, 1, 1]);
        let params = Conv2dParams { groups: 2, ..Default::default() };
        let y = conv2d(&x, &w, None, params).unwrap();
        assert_eq!(y.to_f32_vec().unwrap(), vec![3.0, 10.0]);
        let bad = Tensor::ones(&[2, 2, 1, 1]);
        assert!(conv2d(&x, &bad, None, params).is_err());
    }

    #[test]
    fn test_max_pool2d() {
        let x = Tensor::from_f32(&(0..16).map(|v| v as f32).collect::<Vec<_>>(), &[1, 1, 4, 4]);
        let y = max_pool2d(&x, Pool2dParams::new((2, 2))).unwrap();
        assert_eq!(y.dims(), &[1, 1, 2, 2]);
        assert_eq!(y.to_f32_vec().unwrap(), vec![5.0, 7.0, 13.0, 15.0]);

        let odd = Tensor::from_f32(&(0..9).map(|v| v as f32).collect::<Vec<_>>(), &[1, 3, 3]);
        let floor = max_pool2d(&odd, Pool2dParams::new((2, 2))).unwrap();
        assert_eq!(floor.dims(), &[1, 1, 1]);
        let ceil = max_pool2d(&odd, Pool2dParams::new((2, 2)).with_ceil_mode(true)).unwrap();
        assert_eq!(ceil.dims(), &[1, 2, 2]);
        assert_eq!(ceil.to_f32_vec().unwrap(), vec![4.0, 5.0, 7.0, 8.0]);
    }

    #[test]
    fn test_batch_norm_eval_uses_running_stats() {
        let x = Tensor::from_f32(&[1.0, 2.0, 3.0, 4.0], &[1, 2, 2]);
        let mut stats = RunningStats { mean: vec![1.0, 3.0], var: vec![4.0, 1.0] };
        let y = batch_norm(&x, Some(&mut stats), None, None, false, 0.1, 0.0).unwrap();
        assert_eq!(y.to_f32_vec().unwrap(), vec![0.0, 0.5, 0.0, 1.0]);
    }

    #[test]
    fn test_batch_norm_training_updates_stats() {
        let x = Tensor::from_f32(&[0.0, 2.0, 4.0, 6.0], &[2, 1, 2]);
        let mut stats = RunningStats::new(1);
        let y = batch_norm(&x, Some(&mut stats), None, None, true, 0.1, 0.0).unwrap();
        let v = y.to_f32_vec().unwrap();
        assert!((v.iter().sum::<f32>()).abs() < 1e-5);
        assert!((stats.mean[0] - 0.3).abs() < 1e-6);
        // unbiased var of [0,2,4,6] is 20/3
        assert!((stats.var[0] - (0.9 + 0.1 * 20.0 / 3.0)).abs() < 1e-5);
    }

    #[test]
    fn test_layer_norm() {
        let x = Tensor::from_f32(&[1.0, 3.0, 2.0, 2.0], &[2, 2]);
        let y = layer_norm(&x, &[2], None, None, 1e-12).unwrap().to_f32_vec().unwrap();
        assert!((y[0] + 1.0).abs() < 1e-5 && (y[1] - 1.0).abs() < 1e-5);
        assert_eq!(y[2], 0.0);
        assert!(layer_norm(&x, &[3], None, None, 1e-5).is_err());
    }
}

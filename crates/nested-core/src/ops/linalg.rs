use crate::error::NestedCoreError;
use crate::ops::arithmetic::broadcast_indices;
use crate::shape::Shape;
use crate::{Result, Tensor};

/// Row-major `[m, k] @ [k, n]` accumulated into `out`.
fn gemm(a: &[f32], b: &[f32], out: &mut [f32], m: usize, k: usize, n: usize) {
    for i in 0..m {
        let row = &mut out[i * n..(i + 1) * n];
        for p in 0..k {
            let av = a[i * k + p];
            if av == 0.0 {
                continue;
            }
            let brow = &b[p * n..(p + 1) * n];
            for (o, &bv) in row.iter_mut().zip(brow.iter()) {
                *o += av * bv;
            }
        }
    }
}

impl Tensor {
    /// Matrix product with the usual promotion rules: 1-D operands gain a
    /// temporary dim, leading batch dims broadcast.
    pub fn matmul(&self, other: &Tensor) -> Result<Tensor> {
        self.require_f32()?;
        other.require_f32()?;
        if self.ndim() == 0 || other.ndim() == 0 {
            return Err(NestedCoreError::InvalidArgument(
                "matmul: both arguments need at least 1 dimension".into(),
            ));
        }
        let a = if self.ndim() == 1 { self.unsqueeze(0)? } else { self.clone() };
        let b = if other.ndim() == 1 { other.unsqueeze(-1)? } else { other.clone() };

        let (m, k1) = (a.dims()[a.ndim() - 2], a.dims()[a.ndim() - 1]);
        let (k2, n) = (b.dims()[b.ndim() - 2], b.dims()[b.ndim() - 1]);
        if k1 != k2 {
            return Err(NestedCoreError::MatmulDimMismatch { m, k1, k2, n });
        }

        let a_batch = &a.dims()[..a.ndim() - 2];
        let b_batch = &b.dims()[..b.ndim() - 2];
        let batch = Shape::new(a_batch).broadcast(&Shape::new(b_batch))?;
        let ia = broadcast_indices(a_batch, batch.dims());
        let ib = broadcast_indices(b_batch, batch.dims());

        let a_data = a.to_f32_vec()?;
        let b_data = b.to_f32_vec()?;
        let mut out = vec![0.0f32; batch.numel() * m * n];
        for (bi, (&xa, &xb)) in ia.iter().zip(ib.iter()).enumerate() {
            gemm(
                &a_data[xa * m * k1..(xa + 1) * m * k1],
                &b_data[xb * k2 * n..(xb + 1) * k2 * n],
                &mut out[bi * m * n..(bi + 1) * m * n],
                m,
                k1,
                n,
            );
        }

        let mut dims = batch.dims().to_vec();
        if self.ndim() > 1 {
            dims.push(m);
        }
        if other.ndim() > 1 {
            dims.push(n);
        }
        Tensor::from_vec(out, &dims)
    }

    /// `matmul` written into an existing tensor of the result's shape.
    pub fn matmul_out(out: &mut Tensor, a: &Tensor, b: &Tensor) -> Result<()> {
        let result = a.matmul(b)?;
        out.copy_(&result)
    }
}

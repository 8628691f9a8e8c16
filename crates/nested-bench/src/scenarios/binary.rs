//! Elementwise multiply: one flat tensor, a loop over components, and a
//! NestedTensor.

use std::hint::black_box;

use nested_core::Tensor;
use nestedtensor::{nested_tensor, CreationOptions};

use super::Scenario;

fn flatten_all(tensors: &[Tensor]) -> anyhow::Result<Tensor> {
    let flat = tensors.iter().map(|t| t.reshape(&[-1])).collect::<Result<Vec<_>, _>>()?;
    Ok(Tensor::cat(&flat, 0)?)
}

pub fn gen_t_mul(lhs: &[Tensor], rhs: &[Tensor]) -> anyhow::Result<Scenario> {
    let tensor1 = flatten_all(lhs)?;
    let tensor2 = flatten_all(rhs)?;
    Ok(Scenario::new("gen_t_mul", move || {
        black_box(tensor1.mul(&tensor2)?);
        Ok(())
    }))
}

pub fn gen_t_loop_mul(lhs: &[Tensor], rhs: &[Tensor]) -> Scenario {
    let tensors1 = lhs.to_vec();
    let tensors2 = rhs.to_vec();
    Scenario::new("gen_t_loop_mul", move || {
        for (a, b) in tensors1.iter().zip(&tensors2) {
            black_box(a.mul(b)?);
        }
        Ok(())
    })
}

pub fn gen_nt_mul(lhs: &[Tensor], rhs: &[Tensor]) -> anyhow::Result<Scenario> {
    let nt1 = nested_tensor(lhs.to_vec(), &CreationOptions::new())?;
    let nt2 = nested_tensor(rhs.to_vec(), &CreationOptions::new())?;
    Ok(Scenario::new("gen_nt_mul", move || {
        black_box(nt1.mul(&nt2)?);
        Ok(())
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flatten_all_keeps_order() {
        let parts = vec![Tensor::from_f32(&[1.0, 2.0], &[1, 2]), Tensor::from_f32(&[3.0, 4.0], &[1, 2])];
        assert_eq!(flatten_all(&parts).unwrap().to_f32_vec().unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_mismatched_operands_fail_at_run_time() {
        let lhs = vec![Tensor::ones(&[2, 3])];
        let rhs = vec![Tensor::ones(&[3, 3])];
        assert!(gen_t_mul(&lhs, &rhs).unwrap().run().is_err());
        assert!(gen_nt_mul(&lhs, &rhs).unwrap().run().is_err());
    }
}

//! In-place cosine over the same three layouts as the binary scenarios.

use nested_core::Tensor;
use nestedtensor::{nested_tensor, CreationOptions};

use super::Scenario;

pub fn gen_t_cos(tensors: &[Tensor]) -> anyhow::Result<Scenario> {
    let flat = tensors.iter().map(|t| t.reshape(&[-1])).collect::<Result<Vec<_>, _>>()?;
    let mut tensor = Tensor::cat(&flat, 0)?;
    Ok(Scenario::new("gen_t_cos", move || {
        tensor.cos_()?;
        Ok(())
    }))
}

pub fn gen_t_loop_cos(tensors: &[Tensor]) -> Scenario {
    let mut tensors: Vec<Tensor> = tensors.iter().map(Tensor::deep_clone).collect();
    Scenario::new("gen_t_loop_cos", move || {
        for t in tensors.iter_mut() {
            t.cos_()?;
        }
        Ok(())
    })
}

pub fn gen_nt_cos(tensors: &[Tensor]) -> anyhow::Result<Scenario> {
    let mut nt = nested_tensor(tensors.to_vec(), &CreationOptions::new())?;
    Ok(Scenario::new("gen_nt_cos", move || {
        nt.cos_()?;
        Ok(())
    }))
}

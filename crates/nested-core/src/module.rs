use std::collections::HashMap;

use crate::{Result, Tensor};

/// A layer over dense tensors.
///
/// Layers are shared between threads by the nested per-component paths,
/// hence the `Send + Sync` bound; state that changes during `forward`
/// (batch norm running stats) lives behind a lock.
pub trait Module: Send + Sync {
    fn forward(&self, input: &Tensor) -> Result<Tensor>;

    /// Parameters keyed by their local name (`"weight"`, `"bias"`, ...).
    fn named_parameters(&self) -> Vec<(&str, &Tensor)>;

    fn parameters(&self) -> Vec<&Tensor> {
        self.named_parameters().into_iter().map(|(_, t)| t).collect()
    }

    /// Layers without train/eval behavior ignore this.
    fn train(&mut self, _mode: bool) {}

    fn eval(&mut self) {
        self.train(false);
    }

    fn is_training(&self) -> bool {
        true
    }

    /// Owned copies of every parameter, ready to hand to a serializer.
    fn state_dict(&self) -> HashMap<String, Tensor> {
        let mut dict = HashMap::new();
        for (name, t) in self.named_parameters() {
            dict.insert(name.to_string(), t.clone());
        }
        dict
    }
}

//! # nestedtensor
//!
//! Lists of tensors with differing shapes, handled as one value.
//!
//! A [`NestedTensor`] is a tree of dense components from `nested_core`.
//! Components agree in dtype, device and number of dimensions; their sizes
//! may differ. Packed NestedTensors keep every component in one flat buffer
//! so elementwise work is a single pass.
//!
//! ```rust,no_run
//! use nestedtensor::{nested_tensor, CreationOptions};
//! use nested_core::Tensor;
//!
//! # fn main() -> nestedtensor::Result<()> {
//! let nt = nested_tensor(
//!     vec![Tensor::randn(&[3, 20, 30]), Tensor::randn(&[3, 40, 10])],
//!     &CreationOptions::new(),
//! )?;
//! let y = nt.relu()?;
//! assert_eq!(y.sizes(), vec![Some(2), Some(3), None, None]);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod node;
pub mod nested;
pub mod functions;
pub mod functional;
pub mod creation;
pub mod nn;
pub mod io;

pub use creation::{as_nested_tensor, nested_tensor, CreationOptions, NestedData};
pub use error::NestedTensorError;
pub use nested::{NestedDimSize, NestedItem, NestedTensor};
pub use nn::NestedModule;
pub use node::{NestedNode, SizeNode, TensorNode};

pub type Result<T> = std::result::Result<T, NestedTensorError>;

//! # nested-core
//!
//! Dense tensor engine underneath `nestedtensor`.
//! CPU-only, no autograd. Compute kernels run on `f32`; the other dtypes
//! exist for storage and casting.

pub mod dtype;
pub mod device;
pub mod storage;
pub mod shape;
pub mod tensor;
pub mod error;
pub mod module;
pub mod ops;
pub mod functional;
pub mod nn;

pub use dtype::DType;
pub use device::Device;
pub use storage::{Buffer, Storage};
pub use shape::{wrap_dim, Shape};
pub use tensor::Tensor;
pub use error::NestedCoreError;
pub use module::Module;

pub type Result<T> = std::result::Result<T, NestedCoreError>;

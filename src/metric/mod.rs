//! Riemannian metric fields driving anisotropic refinement.

pub mod field;
pub mod hessian;
pub mod tensor;

pub use field::{MetricField, MetricOptions};
pub use tensor::{MetricTensor, metric_length, metric_midpoint};

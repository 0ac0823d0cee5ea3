pub mod dataset;

/// CPU backend used when the caller has no device preference
pub type CpuBackend = burn::backend::NdArray;

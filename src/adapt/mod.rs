//! Metric-driven mesh adaptation.

pub mod refine;

pub use refine::{Refine, RefineOptions, RefineReport, RefineStatus};

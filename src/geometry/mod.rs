//! Geometry utilities for mesh-adapt.
//!
//! This module provides small vector helpers, signed simplex measures and
//! element quality measured in metric space.

pub mod metrics;
pub mod quality;

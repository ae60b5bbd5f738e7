//! Element quality measured in metric space.
//!
//! The quality of a simplex `K` under the averaged vertex metric `M` is
//!
//! ```text
//! Q(K) = c_D · |K|_M / (Σ_e l_M(e)²)^{D/2}
//! ```
//!
//! where `|K|_M = |K| · sqrt(det M)` and `l_M(e)` are metric edge lengths. The
//! constant makes the unit regular simplex score exactly `1`; degenerate
//! elements score `0` and inverted ones are negative.
//!
//! # Examples
//! ```rust
//! use mesh_adapt::geometry::quality::metric_quality;
//! use mesh_adapt::metric::MetricTensor;
//! use mesh_adapt::topology::cell_type::CellType;
//!
//! let h = 3f64.sqrt() / 2.0;
//! let points = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.5, h, 0.0]];
//! let m = MetricTensor::identity(2);
//! let q = metric_quality(CellType::Triangle, &points, &[m, m, m])?;
//! assert!((q - 1.0).abs() < 1e-12);
//! # Ok::<(), mesh_adapt::mesh_error::MeshAdaptError>(())
//! ```

use crate::algs::parallel::par_map_range;
use crate::geometry::metrics::{Point, signed_measure, sub};
use crate::mesh_error::MeshAdaptError;
use crate::metric::tensor::MetricTensor;
use crate::topology::cell_type::CellType;
use crate::topology::mesh::Mesh;

/// Summary of element qualities over a mesh.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct QualityStats {
    /// Worst element quality.
    pub min: f64,
    /// Mean element quality.
    pub mean: f64,
    /// Number of elements measured.
    pub count: usize,
}

impl Default for QualityStats {
    fn default() -> Self {
        Self {
            min: 0.0,
            mean: 0.0,
            count: 0,
        }
    }
}

fn normalization(cell_type: CellType) -> Option<f64> {
    match cell_type {
        CellType::Triangle => Some(4.0 * 3f64.sqrt()),
        CellType::Tetrahedron => Some(72.0 * 3f64.sqrt()),
        _ => None,
    }
}

/// Quality of a simplex given its corners and the metric at each corner.
pub fn metric_quality(
    cell_type: CellType,
    points: &[Point],
    metrics: &[MetricTensor],
) -> Result<f64, MeshAdaptError> {
    let c = normalization(cell_type).ok_or_else(|| {
        MeshAdaptError::InvalidParameter(format!("no quality measure for {cell_type:?}"))
    })?;
    if metrics.len() != points.len() || metrics.is_empty() {
        return Err(MeshAdaptError::FieldLengthMismatch {
            expected: points.len(),
            found: metrics.len(),
        });
    }
    let volume = signed_measure(cell_type, points)?;

    let mut mean = metrics[0];
    for (k, m) in metrics.iter().enumerate().skip(1) {
        mean = MetricTensor::interpolate(&mean, m, 1.0 / (k as f64 + 1.0));
    }
    let det = mean.determinant().max(0.0);
    let sum_sq: f64 = cell_type
        .edges()
        .iter()
        .map(|&[a, b]| mean.quadratic(sub(points[b], points[a])))
        .sum();
    if !(sum_sq > 0.0) {
        return Ok(0.0);
    }
    let dim = cell_type.dimension() as f64;
    Ok(c * volume * det.sqrt() / sum_sq.powf(dim / 2.0))
}

/// Quality of an active element under the metrics stored on its vertices.
pub fn element_quality(mesh: &Mesh, element: usize) -> Result<f64, MeshAdaptError> {
    let nodes = mesh.element(element)?;
    let mut points = Vec::with_capacity(nodes.len());
    let mut metrics = Vec::with_capacity(nodes.len());
    for &v in nodes {
        let vertex = mesh.vertex(v)?;
        points.push(vertex.coords);
        metrics.push(vertex.metric);
    }
    metric_quality(mesh.cell_type(), &points, &metrics)
}

/// Minimum and mean element quality over the active elements of `mesh`.
pub fn quality_stats(mesh: &Mesh) -> Result<QualityStats, MeshAdaptError> {
    let qualities = par_map_range(mesh.element_slot_count(), |e| {
        if mesh.is_active_element(e) {
            element_quality(mesh, e).map(Some)
        } else {
            Ok(None)
        }
    });
    let mut stats = QualityStats {
        min: f64::INFINITY,
        ..QualityStats::default()
    };
    let mut sum = 0.0;
    for q in qualities {
        if let Some(q) = q? {
            stats.min = stats.min.min(q);
            sum += q;
            stats.count += 1;
        }
    }
    if stats.count == 0 {
        return Ok(QualityStats::default());
    }
    stats.mean = sum / stats.count as f64;
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regular_tetrahedron_scores_one() {
        let s = 1.0 / 2f64.sqrt();
        let points = [
            [s, 0.0, 0.0],
            [0.0, s, 0.0],
            [0.0, 0.0, s],
            [s, s, s],
        ];
        let m = MetricTensor::identity(3);
        let q = metric_quality(CellType::Tetrahedron, &points, &[m; 4]).unwrap();
        assert!((q.abs() - 1.0).abs() < 1e-12, "q = {q}");
    }

    #[test]
    fn metric_can_make_a_stretched_triangle_ideal() {
        // Equilateral after scaling x by 1/4.
        let h = 3f64.sqrt() / 2.0;
        let points = [[0.0, 0.0, 0.0], [4.0, 0.0, 0.0], [2.0, h, 0.0]];
        let euclid = MetricTensor::identity(2);
        let stretched = MetricTensor::new_2d(1.0 / 16.0, 1.0, 0.0);
        let q0 = metric_quality(CellType::Triangle, &points, &[euclid; 3]).unwrap();
        let q1 = metric_quality(CellType::Triangle, &points, &[stretched; 3]).unwrap();
        assert!(q0 < 0.5);
        assert!((q1 - 1.0).abs() < 1e-12);
    }
}

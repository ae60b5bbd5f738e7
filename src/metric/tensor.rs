//! Symmetric positive-definite metric tensors.
//!
//! A [`MetricTensor`] `M` defines the inner product `<u, v>_M = uᵀ M v`; an edge
//! `d` has metric length `sqrt(dᵀ M d)` and length `1.0` means "ideally sized".
//! 2D tensors live in the upper-left 2×2 block of the 3×3 storage with the
//! remaining row/column zero, so matrix products can always run in 3×3.
//!
//! Tensor combination uses true intersection by simultaneous reduction: with
//! `S = M1^{-1/2} M2 M1^{-1/2} = R Σ Rᵀ`, the intersection is
//! `M1^{1/2} R max(Σ, 1) Rᵀ M1^{1/2}`, the smallest ellipse-inverse that is at least
//! as restrictive as both inputs in every direction. When `M1` is not safely
//! invertible the result falls back to the isotropic tensor of the largest
//! eigenvalue of either input.

use nalgebra::{Matrix2, Matrix3};
use serde::{Deserialize, Serialize};

use crate::geometry::metrics::{Point, lerp, sub};
use crate::mesh_error::MeshAdaptError;

/// Relative conditioning floor below which the simultaneous reduction is not trusted.
const INTERSECTION_RCOND: f64 = 1e-14;

/// A D×D symmetric positive-definite metric tensor (D = 2 or 3).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricTensor {
    dim: usize,
    m: [[f64; 3]; 3],
}

impl MetricTensor {
    /// 2D tensor `[[m11, m12], [m12, m22]]`.
    pub fn new_2d(m11: f64, m22: f64, m12: f64) -> Self {
        Self {
            dim: 2,
            m: [[m11, m12, 0.0], [m12, m22, 0.0], [0.0, 0.0, 0.0]],
        }
    }

    /// 3D tensor from its six independent entries.
    pub fn new_3d(m11: f64, m22: f64, m33: f64, m12: f64, m13: f64, m23: f64) -> Self {
        Self {
            dim: 3,
            m: [[m11, m12, m13], [m12, m22, m23], [m13, m23, m33]],
        }
    }

    /// `value · I` in dimension `dim` (2 or 3).
    pub fn isotropic(dim: usize, value: f64) -> Self {
        debug_assert!(dim == 2 || dim == 3, "metric dimension must be 2 or 3");
        let dim = dim.clamp(2, 3);
        let mut m = [[0.0; 3]; 3];
        for (i, row) in m.iter_mut().enumerate().take(dim) {
            row[i] = value;
        }
        Self { dim, m }
    }

    /// The identity tensor (Euclidean lengths).
    pub fn identity(dim: usize) -> Self {
        Self::isotropic(dim, 1.0)
    }

    /// Build from a row-major `dim × dim` matrix; the input must be symmetric.
    pub fn from_row_major(dim: usize, values: &[f64]) -> Result<Self, MeshAdaptError> {
        if dim != 2 && dim != 3 {
            return Err(MeshAdaptError::InvalidDimension(dim));
        }
        if values.len() != dim * dim {
            return Err(MeshAdaptError::FieldLengthMismatch {
                expected: dim * dim,
                found: values.len(),
            });
        }
        let mut m = [[0.0; 3]; 3];
        for i in 0..dim {
            for j in 0..dim {
                m[i][j] = values[i * dim + j];
            }
        }
        for i in 0..dim {
            for j in (i + 1)..dim {
                let scale = m[i][j].abs().max(m[j][i].abs()).max(1.0);
                if (m[i][j] - m[j][i]).abs() > 1e-12 * scale {
                    return Err(MeshAdaptError::InvalidParameter(format!(
                        "metric tensor is not symmetric at ({i}, {j})"
                    )));
                }
                let avg = 0.5 * (m[i][j] + m[j][i]);
                m[i][j] = avg;
                m[j][i] = avg;
            }
        }
        Ok(Self { dim, m })
    }

    /// Spatial dimension of the tensor.
    #[inline]
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Entry `(i, j)`.
    #[inline]
    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.m[i][j]
    }

    /// Row-major `dim × dim` entries.
    pub fn to_row_major(&self) -> Vec<f64> {
        let mut out = Vec::with_capacity(self.dim * self.dim);
        for i in 0..self.dim {
            out.extend_from_slice(&self.m[i][..self.dim]);
        }
        out
    }

    /// `dᵀ M d`.
    #[inline]
    pub fn quadratic(&self, d: Point) -> f64 {
        let mut acc = 0.0;
        for i in 0..self.dim {
            for j in 0..self.dim {
                acc += d[i] * self.m[i][j] * d[j];
            }
        }
        acc
    }

    /// Metric length of the vector `d`.
    #[inline]
    pub fn length(&self, d: Point) -> f64 {
        self.quadratic(d).max(0.0).sqrt()
    }

    /// Eigenvalues and unit eigenvectors (as columns).
    ///
    /// Only the first `dim` entries are meaningful.
    pub fn eigen(&self) -> ([f64; 3], [Point; 3]) {
        let mut values = [0.0; 3];
        let mut vectors = [[0.0; 3]; 3];
        if self.dim == 2 {
            let mat = Matrix2::new(self.m[0][0], self.m[0][1], self.m[1][0], self.m[1][1]);
            let eig = mat.symmetric_eigen();
            for k in 0..2 {
                values[k] = eig.eigenvalues[k];
                vectors[k] = [eig.eigenvectors[(0, k)], eig.eigenvectors[(1, k)], 0.0];
            }
        } else {
            let eig = self.to_matrix3().symmetric_eigen();
            for k in 0..3 {
                values[k] = eig.eigenvalues[k];
                vectors[k] = [
                    eig.eigenvectors[(0, k)],
                    eig.eigenvectors[(1, k)],
                    eig.eigenvectors[(2, k)],
                ];
            }
        }
        (values, vectors)
    }

    /// Recompose `Σ λ_k v_k v_kᵀ`.
    pub fn from_eigen(dim: usize, values: &[f64], vectors: &[Point]) -> Self {
        let mut m = [[0.0; 3]; 3];
        for (&lambda, v) in values.iter().zip(vectors.iter()).take(dim) {
            for i in 0..dim {
                for j in 0..dim {
                    m[i][j] += lambda * v[i] * v[j];
                }
            }
        }
        Self::symmetrized(dim, m)
    }

    /// Apply `f` to every eigenvalue and recompose.
    pub fn map_eigenvalues(&self, mut f: impl FnMut(f64) -> f64) -> Self {
        let (mut values, vectors) = self.eigen();
        for value in values.iter_mut().take(self.dim) {
            *value = f(*value);
        }
        Self::from_eigen(self.dim, &values, &vectors)
    }

    /// Clamp every eigenvalue into `[min, max]`.
    pub fn clamp_eigenvalues(&self, min: f64, max: f64) -> Self {
        self.map_eigenvalues(|l| l.clamp(min, max))
    }

    /// Replace every eigenvalue by its absolute value.
    pub fn abs(&self) -> Self {
        self.map_eigenvalues(f64::abs)
    }

    /// Smallest and largest eigenvalue.
    pub fn eigenvalue_bounds(&self) -> (f64, f64) {
        let (values, _) = self.eigen();
        values[..self.dim]
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &l| {
                (lo.min(l), hi.max(l))
            })
    }

    /// Determinant of the `dim × dim` block.
    pub fn determinant(&self) -> f64 {
        let m = &self.m;
        match self.dim {
            2 => m[0][0] * m[1][1] - m[0][1] * m[1][0],
            _ => self.to_matrix3().determinant(),
        }
    }

    /// `true` when every entry of the `dim × dim` block is finite.
    pub fn is_finite(&self) -> bool {
        self.m[..self.dim]
            .iter()
            .all(|row| row[..self.dim].iter().all(|v| v.is_finite()))
    }

    /// `true` when every eigenvalue is finite and strictly positive.
    pub fn is_positive_definite(&self) -> bool {
        if !self.is_finite() {
            return false;
        }
        let (lo, hi) = self.eigenvalue_bounds();
        lo > 0.0 && hi.is_finite()
    }

    /// `s · M`.
    pub fn scaled(&self, s: f64) -> Self {
        let mut m = self.m;
        m.iter_mut().flatten().for_each(|v| *v *= s);
        Self { dim: self.dim, m }
    }

    /// `(1 - t) · a + t · b`; stays SPD for `t ∈ [0, 1]`.
    pub fn interpolate(a: &Self, b: &Self, t: f64) -> Self {
        let mut m = [[0.0; 3]; 3];
        for i in 0..3 {
            for j in 0..3 {
                m[i][j] = (1.0 - t) * a.m[i][j] + t * b.m[i][j];
            }
        }
        Self { dim: a.dim, m }
    }

    /// Intersection of two metrics: the more restrictive request direction by direction.
    pub fn intersect(&self, other: &Self) -> Self {
        debug_assert_eq!(self.dim, other.dim);
        match self.try_intersect(other) {
            Some(result) => result,
            None => {
                let (_, hi_a) = self.eigenvalue_bounds();
                let (_, hi_b) = other.eigenvalue_bounds();
                let lambda = hi_a.max(hi_b);
                log::debug!("metric intersection ill-conditioned; isotropic fallback {lambda:e}");
                Self::isotropic(self.dim, lambda)
            }
        }
    }

    fn try_intersect(&self, other: &Self) -> Option<Self> {
        let (values, vectors) = self.eigen();
        let (lo, hi) = self.eigenvalue_bounds();
        if !(lo > 0.0) || !hi.is_finite() || lo < INTERSECTION_RCOND * hi {
            return None;
        }
        let mut sqrt_vals = [0.0; 3];
        let mut inv_sqrt_vals = [0.0; 3];
        for k in 0..self.dim {
            sqrt_vals[k] = values[k].sqrt();
            inv_sqrt_vals[k] = 1.0 / sqrt_vals[k];
        }
        let root = Self::from_eigen(self.dim, &sqrt_vals, &vectors).to_matrix3();
        let inv_root = Self::from_eigen(self.dim, &inv_sqrt_vals, &vectors).to_matrix3();

        let reduced = Self::from_matrix3(self.dim, inv_root * other.to_matrix3() * inv_root);
        let widened = reduced.map_eigenvalues(|l| l.max(1.0));
        let result = Self::from_matrix3(self.dim, root * widened.to_matrix3() * root);

        let finite = result.m.iter().flatten().all(|v| v.is_finite());
        (finite && result.is_positive_definite()).then_some(result)
    }

    fn to_matrix3(&self) -> Matrix3<f64> {
        let m = &self.m;
        Matrix3::new(
            m[0][0], m[0][1], m[0][2], m[1][0], m[1][1], m[1][2], m[2][0], m[2][1], m[2][2],
        )
    }

    fn from_matrix3(dim: usize, mat: Matrix3<f64>) -> Self {
        let mut m = [[0.0; 3]; 3];
        for i in 0..dim {
            for j in 0..dim {
                m[i][j] = mat[(i, j)];
            }
        }
        Self::symmetrized(dim, m)
    }

    fn symmetrized(dim: usize, mut m: [[f64; 3]; 3]) -> Self {
        for i in 0..3 {
            for j in (i + 1)..3 {
                let avg = 0.5 * (m[i][j] + m[j][i]);
                m[i][j] = avg;
                m[j][i] = avg;
            }
        }
        Self { dim, m }
    }
}

/// Length of the edge `p1 → p2` under the arithmetic mean of the endpoint metrics.
#[inline]
pub fn metric_length(p1: Point, m1: &MetricTensor, p2: Point, m2: &MetricTensor) -> f64 {
    let d = sub(p2, p1);
    (0.5 * (m1.quadratic(d) + m2.quadratic(d))).max(0.0).sqrt()
}

/// Parameter `t` of the metric-weighted midpoint of `p1 → p2`.
///
/// The point `p1 + t (p2 - p1)` splits the edge into halves of equal metric
/// length when the metric varies linearly along it.
pub fn metric_midpoint_parameter(p1: Point, m1: &MetricTensor, p2: Point, m2: &MetricTensor) -> f64 {
    let d = sub(p2, p1);
    let l1 = m1.length(d);
    let l2 = m2.length(d);
    if l1 == l2 {
        return 0.5;
    }
    if l2 <= 0.0 {
        return 0.0;
    }
    1.0 / (1.0 + (l1 / l2).sqrt())
}

/// Position and tensor of the metric-weighted midpoint of `p1 → p2`.
pub fn metric_midpoint(
    p1: Point,
    m1: &MetricTensor,
    p2: Point,
    m2: &MetricTensor,
) -> (Point, MetricTensor) {
    let t = metric_midpoint_parameter(p1, m1, p2, m2);
    (lerp(p1, p2, t), MetricTensor::interpolate(m1, m2, t))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_tensor_close(a: &MetricTensor, b: &MetricTensor, tol: f64) {
        for i in 0..a.dim() {
            for j in 0..a.dim() {
                assert!(
                    (a.get(i, j) - b.get(i, j)).abs() <= tol,
                    "({i},{j}): {} vs {}",
                    a.get(i, j),
                    b.get(i, j)
                );
            }
        }
    }

    #[test]
    fn eigen_roundtrip_reproduces_tensor() {
        let m = MetricTensor::new_3d(4.0, 3.0, 2.0, 0.5, 0.25, -0.1);
        let (values, vectors) = m.eigen();
        let back = MetricTensor::from_eigen(3, &values, &vectors);
        assert_tensor_close(&m, &back, 1e-12);
    }

    #[test]
    fn intersection_of_crossed_ellipses_is_the_envelope() {
        let a = MetricTensor::new_2d(1.0, 4.0, 0.0);
        let b = MetricTensor::new_2d(4.0, 1.0, 0.0);
        let c = a.intersect(&b);
        assert_tensor_close(&c, &MetricTensor::new_2d(4.0, 4.0, 0.0), 1e-12);
    }

    #[test]
    fn intersection_is_idempotent() {
        let a = MetricTensor::new_3d(5.0, 2.0, 1.0, 0.3, 0.0, 0.2);
        assert_tensor_close(&a.intersect(&a), &a, 1e-10);
    }

    #[test]
    fn intersection_with_singular_falls_back_to_isotropic() {
        let singular = MetricTensor::new_2d(0.0, 0.0, 0.0);
        let b = MetricTensor::new_2d(3.0, 1.0, 0.0);
        let c = singular.intersect(&b);
        assert_tensor_close(&c, &MetricTensor::isotropic(2, 3.0), 1e-12);
    }

    #[test]
    fn midpoint_is_euclidean_for_uniform_metric() {
        let m = MetricTensor::identity(3);
        let (p, mm) = metric_midpoint([0.0; 3], &m, [2.0, 0.0, 0.0], &m);
        assert_eq!(p, [1.0, 0.0, 0.0]);
        assert_eq!(mm, m);
    }

    #[test]
    fn midpoint_moves_toward_the_finer_end() {
        let fine = MetricTensor::isotropic(2, 16.0);
        let coarse = MetricTensor::isotropic(2, 1.0);
        let t = metric_midpoint_parameter([0.0; 3], &fine, [1.0, 0.0, 0.0], &coarse);
        assert!((t - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn metric_length_averages_endpoint_tensors() {
        let a = MetricTensor::isotropic(2, 1.0);
        let b = MetricTensor::isotropic(2, 9.0);
        let l = metric_length([0.0; 3], &a, [1.0, 0.0, 0.0], &b);
        assert!((l - 5f64.sqrt()).abs() < 1e-12);
    }
}

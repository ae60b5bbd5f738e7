//! Hessian recovery by local least-squares quadratic fitting.
//!
//! For each vertex `i` the fit solves, over a patch of nearby vertices `j`,
//!
//! ```text
//! ψ_j - ψ_i ≈ g · d_j + ½ d_jᵀ H d_j,     d_j = (x_j - x_i) / h
//! ```
//!
//! for the gradient `g` and symmetric `H` (5 unknowns in 2D, 9 in 3D), where
//! `h` is the patch radius. Offsets are scaled by `h` to keep the system well
//! conditioned; the recovered Hessian is rescaled by `1 / h²`. The patch grows
//! ring by ring until it holds enough vertices; boundary vertices, whose
//! patches are one-sided, ask for twice as many.

use std::collections::BTreeSet;

use nalgebra::{DMatrix, DVector};

use crate::algs::parallel::par_map_range;
use crate::geometry::metrics::{norm, sub};
use crate::mesh_error::MeshAdaptError;
use crate::metric::tensor::MetricTensor;
use crate::topology::mesh::Mesh;
use crate::topology::surface::Surface;

/// Neighbor rings explored before giving up on a larger patch.
const MAX_RINGS: usize = 4;
/// Relative singular-value cutoff of the least-squares solve.
const SVD_EPS: f64 = 1e-12;

/// Number of unknowns of the quadratic fit in dimension `dim`.
pub fn unknowns(dim: usize) -> usize {
    if dim == 2 { 5 } else { 9 }
}

/// Default patch size for a vertex.
pub fn default_min_patch(dim: usize, boundary: bool) -> usize {
    if boundary {
        2 * unknowns(dim)
    } else {
        unknowns(dim) + 1
    }
}

/// Vertices within a few edge rings of `v` (excluding `v`), grown until at
/// least `min_size` are collected or the rings run out.
pub fn vertex_patch(mesh: &Mesh, v: usize, min_size: usize) -> Result<Vec<usize>, MeshAdaptError> {
    let mut visited: BTreeSet<usize> = BTreeSet::from([v]);
    let mut frontier = vec![v];
    for _ in 0..MAX_RINGS {
        let mut next = Vec::new();
        for &u in &frontier {
            for w in mesh.vertex_neighbors(u)? {
                if visited.insert(w) {
                    next.push(w);
                }
            }
        }
        if next.is_empty() || visited.len() > min_size {
            break;
        }
        frontier = next;
    }
    visited.remove(&v);
    Ok(visited.into_iter().collect())
}

/// Recover the (symmetric, possibly indefinite) Hessian of `values` at vertex `v`.
pub fn recover_hessian(
    mesh: &Mesh,
    values: &[f64],
    v: usize,
    min_patch: usize,
) -> Result<MetricTensor, MeshAdaptError> {
    let dim = mesh.dim();
    let patch = vertex_patch(mesh, v, min_patch)?;
    let zero = MetricTensor::isotropic(dim, 0.0);
    let cols = unknowns(dim);
    if patch.len() < cols {
        log::debug!("vertex {v}: patch of {} too small for a quadratic fit", patch.len());
        return Ok(zero);
    }

    let origin = mesh.coords(v)?;
    let mut offsets = Vec::with_capacity(patch.len());
    let mut h: f64 = 0.0;
    for &w in &patch {
        let d = sub(mesh.coords(w)?, origin);
        h = h.max(norm(d));
        offsets.push(d);
    }
    if !(h > 0.0) {
        return Ok(zero);
    }

    let mut a = DMatrix::<f64>::zeros(patch.len(), cols);
    let mut b = DVector::<f64>::zeros(patch.len());
    for (r, (&w, d)) in patch.iter().zip(&offsets).enumerate() {
        let d = [d[0] / h, d[1] / h, d[2] / h];
        let row: Vec<f64> = if dim == 2 {
            vec![d[0], d[1], 0.5 * d[0] * d[0], 0.5 * d[1] * d[1], d[0] * d[1]]
        } else {
            vec![
                d[0],
                d[1],
                d[2],
                0.5 * d[0] * d[0],
                0.5 * d[1] * d[1],
                0.5 * d[2] * d[2],
                d[0] * d[1],
                d[0] * d[2],
                d[1] * d[2],
            ]
        };
        for (c, value) in row.into_iter().enumerate() {
            a[(r, c)] = value;
        }
        b[r] = values[w] - values[v];
    }

    let svd = a.svd(true, true);
    let x = match svd.solve(&b, SVD_EPS) {
        Ok(x) => x,
        Err(msg) => {
            log::debug!("vertex {v}: least-squares solve failed: {msg}");
            return Ok(zero);
        }
    };
    let s = 1.0 / (h * h);
    Ok(if dim == 2 {
        MetricTensor::new_2d(x[2] * s, x[3] * s, x[4] * s)
    } else {
        MetricTensor::new_3d(x[3] * s, x[4] * s, x[5] * s, x[6] * s, x[7] * s, x[8] * s)
    })
}

/// Recover Hessians at every vertex slot (zero on free slots).
///
/// `min_patch` overrides the default patch size for every vertex.
pub fn recover_hessians(
    mesh: &Mesh,
    surface: &Surface,
    values: &[f64],
    min_patch: Option<usize>,
) -> Result<Vec<MetricTensor>, MeshAdaptError> {
    if values.len() != mesh.vertex_slot_count() {
        return Err(MeshAdaptError::FieldLengthMismatch {
            expected: mesh.vertex_slot_count(),
            found: values.len(),
        });
    }
    let dim = mesh.dim();
    par_map_range(mesh.vertex_slot_count(), |v| {
        if !mesh.is_active_vertex(v) {
            return Ok(MetricTensor::isotropic(dim, 0.0));
        }
        let size = min_patch
            .unwrap_or_else(|| default_min_patch(dim, surface.is_boundary_vertex(v)));
        recover_hessian(mesh, values, v, size)
    })
    .into_iter()
    .collect()
}

#![allow(dead_code)]
use std::collections::{BTreeMap, BTreeSet};

use mesh_adapt::prelude::*;

/// Vertex values of `x² + y² + z²`, whose Hessian is uniform and isotropic.
pub fn paraboloid(mesh: &Mesh) -> Vec<f64> {
    (0..mesh.vertex_slot_count())
        .map(|v| {
            mesh.coords(v)
                .map(|p| p[0] * p[0] + p[1] * p[1] + p[2] * p[2])
                .unwrap_or(0.0)
        })
        .collect()
}

/// Write a paraboloid-derived metric scaled to `target` elements.
pub fn scaled_paraboloid_metric(mesh: &mut Mesh, surface: &Surface, target: usize) {
    let values = paraboloid(mesh);
    let mut field = MetricField::new(mesh, surface);
    field.add_field(&values, 1.0).unwrap();
    field.apply_nelements(target).unwrap();
    field.update_mesh().unwrap();
}

/// Write the same tensor on every vertex.
pub fn uniform_metric(mesh: &mut Mesh, surface: &Surface, metric: MetricTensor) {
    let tensors = vec![metric; mesh.vertex_slot_count()];
    let mut field = MetricField::new(mesh, surface);
    field.set_metric(&tensors).unwrap();
    field.update_mesh().unwrap();
}

/// Vertex → neighbour sets, keyed by active vertex.
pub fn neighbour_sets(mesh: &Mesh) -> BTreeMap<usize, BTreeSet<usize>> {
    mesh.vertices()
        .map(|(v, _)| (v, mesh.vertex_neighbors(v).unwrap().collect()))
        .collect()
}

/// Element tuples as sorted vertex sets, in slot order.
pub fn element_sets(mesh: &Mesh) -> Vec<Vec<usize>> {
    mesh.elements()
        .map(|(_, nodes)| {
            let mut nodes = nodes.to_vec();
            nodes.sort_unstable();
            nodes
        })
        .collect()
}

pub fn assert_close(a: f64, b: f64, tol: f64) {
    assert!((a - b).abs() <= tol * b.abs().max(1.0), "{a} != {b} (tol {tol})");
}

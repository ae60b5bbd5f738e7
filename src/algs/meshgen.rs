//! Structured simplex meshes of rectangles and boxes.

use itertools::Itertools;

use crate::geometry::metrics::Point;
use crate::mesh_error::MeshAdaptError;
use crate::topology::mesh::Mesh;

fn invalid(message: impl Into<String>) -> MeshAdaptError {
    MeshAdaptError::InvalidParameter(message.into())
}

fn check_extent(min: &[f64], max: &[f64]) -> Result<(), MeshAdaptError> {
    for (axis, (lo, hi)) in min.iter().zip(max).enumerate() {
        if !(hi > lo) {
            return Err(invalid(format!(
                "empty extent on axis {axis}: [{lo}, {hi}]"
            )));
        }
    }
    Ok(())
}

/// Triangulate `[min, max]` with `nx`×`ny` cells, two triangles per cell.
///
/// Vertex `i + (nx + 1) j` sits at grid node `(i, j)`; every cell is cut
/// along the diagonal from its lower-left to its upper-right corner.
pub fn rectangle_mesh(
    nx: usize,
    ny: usize,
    min: [f64; 2],
    max: [f64; 2],
) -> Result<Mesh, MeshAdaptError> {
    if nx == 0 || ny == 0 {
        return Err(invalid("nx and ny must be positive"));
    }
    check_extent(&min, &max)?;

    let dx = (max[0] - min[0]) / nx as f64;
    let dy = (max[1] - min[1]) / ny as f64;
    let mut vertices: Vec<Point> = Vec::with_capacity((nx + 1) * (ny + 1));
    for j in 0..=ny {
        let y = min[1] + dy * j as f64;
        for i in 0..=nx {
            let x = min[0] + dx * i as f64;
            vertices.push([x, y, 0.0]);
        }
    }

    let mut cells = Vec::with_capacity(2 * nx * ny);
    let row_stride = nx + 1;
    for j in 0..ny {
        for i in 0..nx {
            let v0 = j * row_stride + i;
            let v1 = v0 + 1;
            let v3 = v0 + row_stride;
            let v2 = v3 + 1;
            cells.push([v0, v1, v2]);
            cells.push([v0, v2, v3]);
        }
    }
    Mesh::from_connectivity(2, &vertices, &cells)
}

/// Tetrahedralize `[min, max]` with `n[0]`×`n[1]`×`n[2]` cells.
///
/// Each cell is split into the six Kuhn tetrahedra: one per ordering of the
/// axes, following the path from the cell's lowest corner to its highest
/// corner. Neighbouring cells agree on their shared face diagonals, so the
/// result is conforming.
pub fn box_mesh(n: [usize; 3], min: [f64; 3], max: [f64; 3]) -> Result<Mesh, MeshAdaptError> {
    if n.contains(&0) {
        return Err(invalid(format!("cell counts must be positive, got {n:?}")));
    }
    check_extent(&min, &max)?;

    let [nx, ny, nz] = n;
    let step: Vec<f64> = (0..3).map(|a| (max[a] - min[a]) / n[a] as f64).collect();
    let mut vertices: Vec<Point> = Vec::with_capacity((nx + 1) * (ny + 1) * (nz + 1));
    for k in 0..=nz {
        let z = min[2] + step[2] * k as f64;
        for j in 0..=ny {
            let y = min[1] + step[1] * j as f64;
            for i in 0..=nx {
                let x = min[0] + step[0] * i as f64;
                vertices.push([x, y, z]);
            }
        }
    }

    let row_stride = nx + 1;
    let slab_stride = row_stride * (ny + 1);
    let stride = [1, row_stride, slab_stride];
    let orders: Vec<Vec<usize>> = (0..3).permutations(3).collect();
    let mut cells = Vec::with_capacity(6 * nx * ny * nz);
    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                let base = k * slab_stride + j * row_stride + i;
                for order in &orders {
                    let mut tet = [base; 4];
                    for (s, &axis) in order.iter().enumerate() {
                        tet[s + 1] = tet[s] + stride[axis];
                    }
                    cells.push(tet);
                }
            }
        }
    }
    Mesh::from_connectivity(3, &vertices, &cells)
}

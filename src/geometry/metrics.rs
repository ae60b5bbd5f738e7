//! Geometry metrics for simplex cells.
//!
//! Points are stored as `[f64; 3]`; 2D meshes keep `z = 0` and only read the
//! first two components. Signed measures follow the local vertex ordering of
//! [`crate::topology::cell_type`]: a counter-clockwise triangle and a
//! right-handed tetrahedron are positive.

use crate::mesh_error::MeshAdaptError;
use crate::topology::cell_type::CellType;

const EPS: f64 = 1e-300;

/// A point (or vector) in the embedding space.
pub type Point = [f64; 3];

/// Signed area (2D) or volume (3D) of a simplex given its corner points.
pub fn signed_measure(cell_type: CellType, vertices: &[Point]) -> Result<f64, MeshAdaptError> {
    let expected = cell_type.vertex_count();
    if vertices.len() != expected {
        return Err(MeshAdaptError::InvalidConnectivity(format!(
            "vertex count mismatch: expected {expected}, got {}",
            vertices.len()
        )));
    }
    match cell_type {
        CellType::Vertex => Ok(0.0),
        CellType::Segment => Ok(norm(sub(vertices[1], vertices[0]))),
        CellType::Triangle => Ok(signed_area(vertices[0], vertices[1], vertices[2])),
        CellType::Tetrahedron => Ok(signed_volume(
            vertices[0],
            vertices[1],
            vertices[2],
            vertices[3],
        )),
    }
}

/// Signed area of a triangle in the XY plane.
pub fn signed_area(a: Point, b: Point, c: Point) -> f64 {
    let ab = sub(b, a);
    let ac = sub(c, a);
    0.5 * (ab[0] * ac[1] - ab[1] * ac[0])
}

/// Signed volume of a tetrahedron.
pub fn signed_volume(a: Point, b: Point, c: Point, d: Point) -> f64 {
    let ab = sub(b, a);
    let ac = sub(c, a);
    let ad = sub(d, a);
    dot(ab, cross(ac, ad)) / 6.0
}

/// Volume of the regular simplex with unit edge length in dimension `dim`.
///
/// This is the reference element of the metric/count relation: a mesh that is
/// exactly unit in the metric holds `∫ sqrt(det M) / ideal_simplex_volume` elements.
pub fn ideal_simplex_volume(dim: usize) -> f64 {
    match dim {
        1 => 1.0,
        2 => 3f64.sqrt() / 4.0,
        3 => 2f64.sqrt() / 12.0,
        _ => f64::NAN,
    }
}

/// Unit normal of a boundary facet (segment in 2D, triangle in 3D).
///
/// For a segment `a → b` the normal is the vector rotated clockwise, so a
/// counter-clockwise triangle's facets point outward.
pub fn facet_normal(dim: usize, vertices: &[Point]) -> Result<Point, MeshAdaptError> {
    let n = match (dim, vertices) {
        (2, [a, b]) => {
            let t = sub(*b, *a);
            [t[1], -t[0], 0.0]
        }
        (3, [a, b, c]) => cross(sub(*b, *a), sub(*c, *a)),
        _ => {
            return Err(MeshAdaptError::InvalidConnectivity(format!(
                "facet of a {dim}D mesh cannot have {} vertices",
                vertices.len()
            )));
        }
    };
    let len = norm(n);
    if len <= EPS {
        return Err(MeshAdaptError::DegenerateElement {
            element: usize::MAX,
            volume: 0.0,
        });
    }
    Ok(scale(n, 1.0 / len))
}

/// Point at parameter `t` on the segment `a → b`.
#[inline]
pub fn lerp(a: Point, b: Point, t: f64) -> Point {
    [
        a[0] + t * (b[0] - a[0]),
        a[1] + t * (b[1] - a[1]),
        a[2] + t * (b[2] - a[2]),
    ]
}

#[inline]
pub fn sub(a: Point, b: Point) -> Point {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

#[inline]
pub fn dot(a: Point, b: Point) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

#[inline]
pub fn cross(a: Point, b: Point) -> Point {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

#[inline]
pub fn norm(a: Point) -> f64 {
    dot(a, a).sqrt()
}

#[inline]
pub fn scale(a: Point, s: f64) -> Point {
    [a[0] * s, a[1] * s, a[2] * s]
}

use std::collections::BTreeSet;

use mesh_adapt::prelude::*;

#[test]
fn rectangle_sides_get_one_tag_each() {
    let mesh = rectangle_mesh(3, 2, [0.0, 0.0], [3.0, 2.0]).unwrap();
    let surface = Surface::new(&mesh).unwrap();
    assert_eq!(surface.number_of_facets(), 10);
    assert_eq!(surface.tags(), (1..=4).collect::<BTreeSet<u32>>());

    // Bottom side: vertices 0..=3 share a tag; the corner carries two.
    let bottom = surface.is_boundary_edge(0, 1).unwrap();
    assert_eq!(surface.is_boundary_edge(2, 3), Some(bottom));
    assert_eq!(surface.vertex_tags(0).unwrap().len(), 2);
    assert_eq!(surface.vertex_tags(1).unwrap().len(), 1);
    // Interior vertex (1, 1) and interior edges are not on the boundary.
    assert!(!surface.is_boundary_vertex(5));
    assert_eq!(surface.is_boundary_edge(0, 5), None);
}

#[test]
fn box_faces_are_tagged_and_outward() {
    let mesh = box_mesh([2, 2, 2], [0.0; 3], [1.0; 3]).unwrap();
    let surface = Surface::new(&mesh).unwrap();
    assert_eq!(surface.number_of_facets(), 6 * 8);
    assert_eq!(surface.tags().len(), 6);
    // A cube edge lies on two faces with different tags.
    let tags = surface.edge_tags(0, 1);
    assert_eq!(tags.len(), 2);
    assert_ne!(tags[0], tags[1]);
    // The centre vertex is interior.
    assert!(!surface.is_boundary_vertex(13));
    surface.validate_invariants().unwrap();
}

#[test]
fn explicit_facets_keep_input_tags() {
    let mesh = rectangle_mesh(1, 1, [0.0, 0.0], [1.0, 1.0]).unwrap();
    let facets: [([usize; 2], u32); 4] = [([0, 1], 10), ([1, 3], 20), ([3, 2], 30), ([2, 0], 40)];
    let surface = Surface::from_facets(&mesh, &facets).unwrap();
    assert_eq!(surface.is_boundary_edge(1, 0), Some(10));
    assert_eq!(surface.is_boundary_facet(&[3, 1]), Some(20));
    assert_eq!(surface.tags(), BTreeSet::from([10, 20, 30, 40]));
    validate_conformity(&mesh, Some(&surface), NonManifoldHandling::Error).unwrap();
}

#[test]
fn explicit_facets_are_checked() {
    let mesh = rectangle_mesh(1, 1, [0.0, 0.0], [1.0, 1.0]).unwrap();
    assert!(Surface::from_facets(&mesh, &[([0usize, 9], 1)]).is_err());
    assert!(Surface::from_facets(&mesh, &[(vec![0usize, 1, 2], 1)]).is_err());
}

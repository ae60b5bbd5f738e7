use std::collections::BTreeSet;

use mesh_adapt::prelude::*;
use mesh_adapt::topology::validation::check_adjacency;
use proptest::prelude::*;

mod util;
use util::{element_sets, neighbour_sets};

#[test]
fn add_element_repairs_orientation() {
    let points = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];
    let mesh = Mesh::from_connectivity(2, &points, &[[0, 2, 1]]).unwrap();
    assert!(mesh.element_volume(0).unwrap() > 0.0);
    assert!((mesh.total_volume() - 0.5).abs() < 1e-15);
}

#[test]
fn zero_volume_element_is_rejected() {
    let points = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [2.0, 0.0, 0.0]];
    let err = Mesh::from_connectivity(2, &points, &[[0, 1, 2]]).unwrap_err();
    assert!(matches!(err, MeshAdaptError::DegenerateElement { .. }));
}

#[test]
fn out_of_range_indices_are_reported() {
    let mut mesh = rectangle_mesh(1, 1, [0.0, 0.0], [1.0, 1.0]).unwrap();
    assert!(matches!(
        mesh.coords(17),
        Err(MeshAdaptError::IndexOutOfRange { index: 17, .. })
    ));
    assert!(matches!(
        mesh.remove_element(5),
        Err(MeshAdaptError::IndexOutOfRange { .. })
    ));
    assert!(matches!(
        mesh.add_element(&[0, 1, 9]),
        Err(MeshAdaptError::IndexOutOfRange { .. })
    ));
}

#[test]
fn removal_keeps_slots_until_defragment() {
    let mut mesh = rectangle_mesh(2, 1, [0.0, 0.0], [2.0, 1.0]).unwrap();
    assert_eq!(mesh.get_number_elements(), 4);
    mesh.remove_element(1).unwrap();
    assert_eq!(mesh.get_number_elements(), 3);
    assert_eq!(mesh.element_slot_count(), 4);
    assert!(!mesh.is_active_element(1));
    check_adjacency(&mesh).unwrap();

    // Vertex 4 (x = 1, y = 1) is still used by element 3.
    assert!(matches!(
        mesh.remove_vertex(4),
        Err(MeshAdaptError::VertexInUse { vertex: 4, .. })
    ));
}

#[test]
fn freed_vertex_slots_are_reused() {
    let mut mesh = rectangle_mesh(1, 1, [0.0, 0.0], [1.0, 1.0]).unwrap();
    let v = mesh
        .add_vertex([0.5, 0.5, 0.0], MetricTensor::identity(2))
        .unwrap();
    mesh.remove_vertex(v).unwrap();
    assert_eq!(mesh.get_number_nodes(), 4);
    let w = mesh
        .add_vertex([0.25, 0.5, 0.0], MetricTensor::identity(2))
        .unwrap();
    assert_eq!(v, w);
    assert_eq!(mesh.vertex_slot_count(), 5);
}

#[test]
fn edges_are_unique_and_sorted() {
    let mesh = box_mesh([1, 1, 1], [0.0; 3], [1.0; 3]).unwrap();
    let edges = mesh.edges();
    // 12 cube edges, 6 face diagonals, 1 main diagonal.
    assert_eq!(edges.len(), 19);
    assert!(edges.windows(2).all(|w| w[0] < w[1]));
    assert!(edges.iter().all(|&(a, b)| a < b));
    assert_eq!(mesh.edge_elements(0, 7).unwrap().len(), 6);
}

#[test]
fn defragment_with_remaps_surface_and_fields() {
    let mut mesh = rectangle_mesh(2, 2, [0.0, 0.0], [1.0, 1.0]).unwrap();
    // Drop the two triangles of the top-right cell and its corner vertex.
    let corner = 8;
    let doomed: Vec<usize> = mesh.vertex_elements(corner).unwrap().iter().copied().collect();
    for e in doomed {
        mesh.remove_element(e).unwrap();
    }
    mesh.remove_vertex(corner).unwrap();
    let mut surface = Surface::new(&mesh).unwrap();
    let mut field: Vec<f64> = (0..mesh.vertex_slot_count()).map(|v| v as f64).collect();
    let mut vector: Vec<f64> = (0..2 * mesh.vertex_slot_count()).map(|v| v as f64).collect();

    let map = mesh
        .defragment_with(&mut surface, &mut [(&mut field, 1), (&mut vector, 2)])
        .unwrap();
    assert_eq!(mesh.vertex_slot_count(), 8);
    assert_eq!(mesh.element_slot_count(), mesh.get_number_elements());
    assert_eq!(field, vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);
    assert_eq!(&vector[14..], &[14.0, 15.0]);
    assert_eq!(map.vertices.new_index(corner), None);
    for (_, nodes, _) in surface.facets() {
        assert!(nodes.iter().all(|&v| v < 8));
    }
    validate_conformity(&mesh, Some(&surface), NonManifoldHandling::Error).unwrap();
}

#[test]
fn plain_defragment_leaves_surface_to_the_caller() {
    let mut mesh = rectangle_mesh(2, 1, [0.0, 0.0], [2.0, 1.0]).unwrap();
    let doomed: Vec<usize> = mesh.vertex_elements(0).unwrap().iter().copied().collect();
    for e in doomed {
        mesh.remove_element(e).unwrap();
    }
    mesh.remove_vertex(0).unwrap();
    let mut surface = Surface::new(&mesh).unwrap();
    let mut expected_mesh = mesh.clone();
    let mut expected_surface = surface.clone();
    expected_mesh
        .defragment_with(&mut expected_surface, &mut [])
        .unwrap();

    let map = mesh.defragment().unwrap();
    assert!(validate_conformity(&mesh, Some(&surface), NonManifoldHandling::Error).is_err());
    surface.renumber(&map.vertices).unwrap();
    validate_conformity(&mesh, Some(&surface), NonManifoldHandling::Error).unwrap();
    let facets = |s: &Surface| -> Vec<(Vec<usize>, u32)> {
        s.facets().map(|(_, nodes, tag)| (nodes.to_vec(), tag)).collect()
    };
    assert_eq!(facets(&surface), facets(&expected_surface));
    assert_eq!(element_sets(&mesh), element_sets(&expected_mesh));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn defragment_round_trip(mask in proptest::collection::vec(any::<bool>(), 24)) {
        let mut mesh = box_mesh([2, 2, 1], [0.0; 3], [1.0; 3]).unwrap();
        for (e, &remove) in mask.iter().enumerate() {
            if remove {
                mesh.remove_element(e).unwrap();
            }
        }
        let orphans: Vec<usize> = mesh
            .vertices()
            .filter(|&(v, _)| mesh.vertex_elements(v).unwrap().is_empty())
            .map(|(v, _)| v)
            .collect();
        for v in orphans {
            mesh.remove_vertex(v).unwrap();
        }
        let neighbours = neighbour_sets(&mesh);
        let elements = element_sets(&mesh);

        let map = mesh.defragment().unwrap();
        check_adjacency(&mesh).unwrap();
        prop_assert_eq!(mesh.vertex_slot_count(), mesh.get_number_nodes());
        prop_assert_eq!(mesh.element_slot_count(), mesh.get_number_elements());

        let renumbered: Vec<Vec<usize>> = elements
            .iter()
            .map(|nodes| {
                let mut nodes: Vec<usize> = nodes
                    .iter()
                    .map(|&v| map.vertices.new_index(v).unwrap())
                    .collect();
                nodes.sort_unstable();
                nodes
            })
            .collect();
        prop_assert_eq!(renumbered, element_sets(&mesh));

        for (old, set) in neighbours {
            let new = map.vertices.new_index(old).unwrap();
            let expected: BTreeSet<usize> =
                set.iter().map(|&w| map.vertices.new_index(w).unwrap()).collect();
            let actual: BTreeSet<usize> = mesh.vertex_neighbors(new).unwrap().collect();
            prop_assert_eq!(actual, expected);
        }
    }
}

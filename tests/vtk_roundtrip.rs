use mesh_adapt::io::vtk::{FIELD_BOUNDARY_TAG, read_vtk, write_vtk};
use mesh_adapt::prelude::*;

mod util;
use util::{element_sets, scaled_paraboloid_metric};

#[test]
fn refined_mesh_round_trips_through_vtk() {
    let mut mesh = box_mesh([1, 1, 1], [0.0; 3], [1.0; 3]).unwrap();
    let mut surface = Surface::new(&mesh).unwrap();
    scaled_paraboloid_metric(&mut mesh, &surface, 100);
    Refine::new(&mut mesh, &mut surface).run().unwrap();
    let mut pressure: Vec<f64> = (0..mesh.vertex_slot_count())
        .map(|v| mesh.coords(v).map(|p| p[2]).unwrap_or(0.0))
        .collect();
    mesh.defragment_with(&mut surface, &mut [(&mut pressure, 1)])
        .unwrap();

    let mut buf = Vec::new();
    write_vtk(&mut buf, &mesh, Some(&surface), &[("pressure", &pressure)]).unwrap();
    let read = read_vtk(buf.as_slice()).unwrap();

    assert_eq!(read.mesh.dim(), 3);
    assert_eq!(read.mesh.get_number_nodes(), mesh.get_number_nodes());
    assert_eq!(element_sets(&read.mesh), element_sets(&mesh));
    assert!(read.mesh.is_metric_initialized());
    for (v, vertex) in mesh.vertices() {
        let other = read.mesh.vertex(v).unwrap();
        assert_eq!(other.coords, vertex.coords);
        for i in 0..3 {
            for j in 0..3 {
                let (a, b) = (other.metric.get(i, j), vertex.metric.get(i, j));
                assert!((a - b).abs() <= 1e-12 * b.abs().max(1.0));
            }
        }
    }
    assert_eq!(read.fields["pressure"], pressure);
    let tags = &read.fields[FIELD_BOUNDARY_TAG];
    assert_eq!(tags.len(), mesh.get_number_nodes());
    assert!(tags.iter().all(|&t| (0.0..=6.0).contains(&t)));
}

#[test]
fn two_dimensional_mesh_round_trips() {
    let mesh = rectangle_mesh(2, 3, [0.0, 0.0], [2.0, 3.0]).unwrap();
    let mut buf = Vec::new();
    write_vtk(&mut buf, &mesh, None, &[]).unwrap();
    let read = read_vtk(buf.as_slice()).unwrap();
    assert_eq!(read.mesh.dim(), 2);
    assert_eq!(read.mesh.cell_type(), CellType::Triangle);
    assert_eq!(element_sets(&read.mesh), element_sets(&mesh));
    assert!((read.mesh.total_volume() - 6.0).abs() < 1e-12);
    assert!(read.fields.is_empty());
}

#[test]
fn lower_dimensional_cells_are_skipped() {
    let input = "# vtk DataFile Version 3.0
boundary
ASCII
DATASET UNSTRUCTURED_GRID
POINTS 3 float
0 0 0
1 0 0
0 1 0
CELLS 2 7
3 0 1 2
2 0 1
CELL_TYPES 2
5
3
";
    let read = read_vtk(input.as_bytes()).unwrap();
    assert_eq!(read.mesh.get_number_elements(), 1);
    assert!(!read.mesh.is_metric_initialized());
}

#[test]
fn truncated_files_are_errors() {
    let input = "# vtk DataFile Version 3.0\nx\nASCII\nDATASET UNSTRUCTURED_GRID\nPOINTS 3 float\n0 0 0\n";
    assert!(matches!(read_vtk(input.as_bytes()), Err(MeshAdaptError::MeshIo(_))));
}

#[test]
fn files_round_trip() {
    let mesh = box_mesh([2, 1, 1], [0.0; 3], [2.0, 1.0, 1.0]).unwrap();
    let surface = Surface::new(&mesh).unwrap();
    let path = std::env::temp_dir().join(format!("mesh_adapt_{}.vtk", std::process::id()));
    mesh_adapt::io::write_vtk_file(&path, &mesh, Some(&surface), &[]).unwrap();
    let read = mesh_adapt::io::read_vtk_file(&path).unwrap();
    std::fs::remove_file(&path).unwrap();
    assert_eq!(element_sets(&read.mesh), element_sets(&mesh));
    assert_eq!(read.fields[FIELD_BOUNDARY_TAG].len(), 12);
}

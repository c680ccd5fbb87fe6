//! Mesh data structures and functionality

use crate::point::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A triangle mesh with vertices and faces
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriangleMesh {
    pub vertices: Vec<Point3d>,
    pub faces: Vec<[usize; 3]>,
}

impl TriangleMesh {
    /// Create a new empty mesh
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mesh from vertices and faces
    pub fn from_vertices_and_faces(vertices: Vec<Point3d>, faces: Vec<[usize; 3]>) -> Self {
        Self { vertices, faces }
    }

    /// Get the number of vertices
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    /// Get the number of faces
    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    /// Check if the mesh is empty
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty() || self.faces.is_empty()
    }

    /// Add a vertex to the mesh
    pub fn add_vertex(&mut self, vertex: Point3d) -> usize {
        let index = self.vertices.len();
        self.vertices.push(vertex);
        index
    }

    /// Add a face to the mesh
    pub fn add_face(&mut self, face: [usize; 3]) {
        self.faces.push(face);
    }

    /// Calculate face normals
    pub fn calculate_face_normals(&self) -> Vec<Vector3d> {
        self.faces
            .iter()
            .map(|face| {
                let v0 = self.vertices[face[0]];
                let v1 = self.vertices[face[1]];
                let v2 = self.vertices[face[2]];

                let edge1 = v1 - v0;
                let edge2 = v2 - v0;

                edge1.cross(&edge2).normalize()
            })
            .collect()
    }

    /// Apply `f` to every vertex in place
    pub fn map_vertices<F>(&mut self, f: F)
    where
        F: Fn(&Point3d) -> Point3d,
    {
        for vertex in &mut self.vertices {
            *vertex = f(vertex);
        }
    }

    /// Reverse the winding of every face
    pub fn flip_faces(&mut self) {
        for face in &mut self.faces {
            face.swap(1, 2);
        }
    }

    /// Every face index refers to an existing vertex
    pub fn has_valid_indices(&self) -> bool {
        let n = self.vertices.len();
        self.faces.iter().all(|f| f.iter().all(|&i| i < n))
    }

    /// Number of vertices sharing their exact position with an earlier vertex
    pub fn duplicate_vertex_count(&self) -> usize {
        let mut seen = std::collections::HashSet::with_capacity(self.vertices.len());
        self.vertices
            .iter()
            .filter(|v| !seen.insert(position_key(v)))
            .count()
    }

    /// Clear the mesh
    pub fn clear(&mut self) {
        self.vertices.clear();
        self.faces.clear();
    }
}

/// Hash key of a position. `+ 0.0` folds negative zero into positive zero.
#[inline]
fn position_key(p: &Point3d) -> [u64; 3] {
    [
        (p.x + 0.0).to_bits(),
        (p.y + 0.0).to_bits(),
        (p.z + 0.0).to_bits(),
    ]
}

/// Incremental mesh construction with exact-position vertex welding.
///
/// Triangles that collapse onto fewer than three distinct vertices are dropped.
#[derive(Debug, Default)]
pub struct MeshBuilder {
    mesh: TriangleMesh,
    lookup: HashMap<[u64; 3], usize>,
    dropped: usize,
}

impl MeshBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of `position`, inserting it if no vertex with the same coordinates exists yet
    pub fn vertex(&mut self, position: Point3d) -> usize {
        let mesh = &mut self.mesh;
        *self
            .lookup
            .entry(position_key(&position))
            .or_insert_with(|| mesh.add_vertex(position))
    }

    /// Add a triangle by corner positions. Returns `false` when it was degenerate.
    pub fn triangle(&mut self, corners: [Point3d; 3]) -> bool {
        let face = [
            self.vertex(corners[0]),
            self.vertex(corners[1]),
            self.vertex(corners[2]),
        ];

        if face[0] == face[1] || face[1] == face[2] || face[0] == face[2] {
            self.dropped += 1;
            return false;
        }

        self.mesh.add_face(face);
        true
    }

    /// Triangles rejected as degenerate so far
    pub fn dropped_triangles(&self) -> usize {
        self.dropped
    }

    pub fn build(self) -> TriangleMesh {
        self.mesh
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_welds_identical_positions() {
        let mut builder = MeshBuilder::new();
        let a = Point3d::new(0.0, 0.0, 0.0);
        let b = Point3d::new(1.0, 0.0, 0.0);
        let c = Point3d::new(0.0, 1.0, 0.0);
        let d = Point3d::new(1.0, 1.0, 0.0);

        assert!(builder.triangle([a, b, c]));
        assert!(builder.triangle([b, d, c]));

        let mesh = builder.build();
        assert_eq!(mesh.vertex_count(), 4);
        assert_eq!(mesh.face_count(), 2);
        assert_eq!(mesh.faces[1], [1, 3, 2]);
        assert!(mesh.has_valid_indices());
        assert_eq!(mesh.duplicate_vertex_count(), 0);
    }

    #[test]
    fn test_builder_drops_degenerate_triangles() {
        let mut builder = MeshBuilder::new();
        let a = Point3d::new(0.0, 0.0, 0.0);
        let b = Point3d::new(1.0, 0.0, 0.0);
        assert!(!builder.triangle([a, b, a]));
        assert_eq!(builder.dropped_triangles(), 1);
        assert_eq!(builder.build().face_count(), 0);
    }

    #[test]
    fn test_negative_zero_welds_with_zero() {
        let mut builder = MeshBuilder::new();
        let i = builder.vertex(Point3d::new(0.0, 1.0, 2.0));
        let j = builder.vertex(Point3d::new(-0.0, 1.0, 2.0));
        assert_eq!(i, j);
    }

    #[test]
    fn test_face_normals_and_flip() {
        let mut mesh = TriangleMesh::from_vertices_and_faces(
            vec![
                Point3d::new(0.0, 0.0, 0.0),
                Point3d::new(1.0, 0.0, 0.0),
                Point3d::new(0.0, 1.0, 0.0),
            ],
            vec![[0, 1, 2]],
        );
        assert_eq!(mesh.calculate_face_normals()[0], Vector3d::z());

        mesh.flip_faces();
        assert_eq!(mesh.calculate_face_normals()[0], -Vector3d::z());
    }

    #[test]
    fn test_duplicate_vertex_count() {
        let mesh = TriangleMesh::from_vertices_and_faces(
            vec![Point3d::origin(), Point3d::new(1.0, 0.0, 0.0), Point3d::origin()],
            vec![],
        );
        assert_eq!(mesh.duplicate_vertex_count(), 1);
        assert!(mesh.is_empty());
    }
}

//! Isosurface extraction from quantized volumes
//!
//! This module polygonises a [`Volume`] at an isovalue with the classic
//! Marching Cubes algorithm, or alternatively with marching tetrahedra or
//! dual contouring. When no isovalue is given, Otsu's method picks one from
//! the histogram of the volume.
//!
//! Output vertices are in lattice coordinates: the sample `(x, y, z)` sits at
//! the point `(x, y, z)`. Vertices are welded by exact position and faces are
//! wound so that their normals point toward increasing field values unless
//! `flip_faces` is set.

use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};
use surfrecon_core::{Error, MeshBuilder, Point3d, Result, TriangleMesh};
use tracing::{debug, info_span};

use crate::parallel;
use crate::progress::{PlaneCounter, ProgressMsg, ProgressSink};
use crate::volume::{Volume, QUANT_MAX};

/// Values closer than this to the isovalue snap to the lattice point
const SNAP_EPSILON: f64 = 1e-5;

/// Singular values of the QEF matrix below this are treated as zero
const QEF_SINGULAR_CUTOFF: f64 = 0.1;

/// Number of histogram bins used by Otsu's method
pub const HISTOGRAM_BINS: usize = QUANT_MAX as usize + 1;

/// Surface extraction algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ExtractionMethod {
    /// Classic 256-case marching cubes
    #[default]
    MarchingCubes,
    /// Six tetrahedra per cell sharing the main diagonal
    MarchingTetrahedra,
    /// One QEF-placed vertex per cell, one quad per crossing edge
    DualContouring,
}

/// Configuration for Marching Cubes algorithm
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarchingCubesConfig {
    /// Isovalue in `[0, 1]`; `None` selects one with Otsu's method
    pub iso_level: Option<f64>,
    /// Reverse the winding of every face
    pub flip_faces: bool,
    pub method: ExtractionMethod,
}

impl Default for MarchingCubesConfig {
    fn default() -> Self {
        Self {
            iso_level: Some(0.5),
            flip_faces: false,
            method: ExtractionMethod::MarchingCubes,
        }
    }
}

impl MarchingCubesConfig {
    pub fn with_iso_level(mut self, iso_level: f64) -> Self {
        self.iso_level = Some(iso_level);
        self
    }

    /// Pick the isovalue from the volume histogram
    pub fn with_otsu(mut self) -> Self {
        self.iso_level = None;
        self
    }

    pub fn with_flip_faces(mut self, flip_faces: bool) -> Self {
        self.flip_faces = flip_faces;
        self
    }

    pub fn with_method(mut self, method: ExtractionMethod) -> Self {
        self.method = method;
        self
    }

    pub fn validate(&self) -> Result<()> {
        match self.iso_level {
            Some(iso) if !(0.0..=1.0).contains(&iso) => Err(Error::InvalidData(format!(
                "isovalue must lie in [0, 1], got {}",
                iso
            ))),
            _ => Ok(()),
        }
    }
}

/// Lattice offsets of the cube corners, y pointing up
const CORNERS: [[usize; 3]; 8] = [
    [0, 0, 0],
    [1, 0, 0],
    [1, 0, 1],
    [0, 0, 1],
    [0, 1, 0],
    [1, 1, 0],
    [1, 1, 1],
    [0, 1, 1],
];

/// Corner pairs joined by each cube edge
const EDGE_CORNERS: [[usize; 2]; 12] = [
    [0, 1],
    [1, 2],
    [2, 3],
    [3, 0],
    [4, 5],
    [5, 6],
    [6, 7],
    [7, 4],
    [0, 4],
    [1, 5],
    [2, 6],
    [3, 7],
];

/// Six tetrahedra sharing the diagonal between corners 0 and 6
const TETRAHEDRA: [[usize; 4]; 6] = [
    [6, 0, 5, 1],
    [6, 0, 4, 5],
    [6, 2, 0, 1],
    [6, 0, 7, 4],
    [6, 2, 3, 0],
    [6, 0, 3, 7],
];

/// Edge table: indicates which edges are intersected for each cube configuration (256 cases)
/// Each entry is a 12-bit value where bit i indicates if edge i is intersected
const EDGE_TABLE: [u16; 256] = [
    0x0, 0x109, 0x203, 0x30a, 0x406, 0x50f, 0x605, 0x70c,
    0x80c, 0x905, 0xa0f, 0xb06, 0xc0a, 0xd03, 0xe09, 0xf00,
    0x190, 0x99, 0x393, 0x29a, 0x596, 0x49f, 0x795, 0x69c,
    0x99c, 0x895, 0xb9f, 0xa96, 0xd9a, 0xc93, 0xf99, 0xe90,
    0x230, 0x339, 0x33, 0x13a, 0x636, 0x73f, 0x435, 0x53c,
    0xa3c, 0xb35, 0x83f, 0x936, 0xe3a, 0xf33, 0xc39, 0xd30,
    0x3a0, 0x2a9, 0x1a3, 0xaa, 0x7a6, 0x6af, 0x5a5, 0x4ac,
    0xbac, 0xaa5, 0x9af, 0x8a6, 0xfaa, 0xea3, 0xda9, 0xca0,
    0x460, 0x569, 0x663, 0x76a, 0x66, 0x16f, 0x265, 0x36c,
    0xc6c, 0xd65, 0xe6f, 0xf66, 0x86a, 0x963, 0xa69, 0xb60,
    0x5f0, 0x4f9, 0x7f3, 0x6fa, 0x1f6, 0xff, 0x3f5, 0x2fc,
    0xdfc, 0xcf5, 0xfff, 0xef6, 0x9fa, 0x8f3, 0xbf9, 0xaf0,
    0x650, 0x759, 0x453, 0x55a, 0x256, 0x35f, 0x55, 0x15c,
    0xe5c, 0xf55, 0xc5f, 0xd56, 0xa5a, 0xb53, 0x859, 0x950,
    0x7c0, 0x6c9, 0x5c3, 0x4ca, 0x3c6, 0x2cf, 0x1c5, 0xcc,
    0xfcc, 0xec5, 0xdcf, 0xcc6, 0xbca, 0xac3, 0x9c9, 0x8c0,
    0x8c0, 0x9c9, 0xac3, 0xbca, 0xcc6, 0xdcf, 0xec5, 0xfcc,
    0xcc, 0x1c5, 0x2cf, 0x3c6, 0x4ca, 0x5c3, 0x6c9, 0x7c0,
    0x950, 0x859, 0xb53, 0xa5a, 0xd56, 0xc5f, 0xf55, 0xe5c,
    0x15c, 0x55, 0x35f, 0x256, 0x55a, 0x453, 0x759, 0x650,
    0xaf0, 0xbf9, 0x8f3, 0x9fa, 0xef6, 0xfff, 0xcf5, 0xdfc,
    0x2fc, 0x3f5, 0xff, 0x1f6, 0x6fa, 0x7f3, 0x4f9, 0x5f0,
    0xb60, 0xa69, 0x963, 0x86a, 0xf66, 0xe6f, 0xd65, 0xc6c,
    0x36c, 0x265, 0x16f, 0x66, 0x76a, 0x663, 0x569, 0x460,
    0xca0, 0xda9, 0xea3, 0xfaa, 0x8a6, 0x9af, 0xaa5, 0xbac,
    0x4ac, 0x5a5, 0x6af, 0x7a6, 0xaa, 0x1a3, 0x2a9, 0x3a0,
    0xd30, 0xc39, 0xf33, 0xe3a, 0x936, 0x83f, 0xb35, 0xa3c,
    0x53c, 0x435, 0x73f, 0x636, 0x13a, 0x33, 0x339, 0x230,
    0xe90, 0xf99, 0xc93, 0xd9a, 0xa96, 0xb9f, 0x895, 0x99c,
    0x69c, 0x795, 0x49f, 0x596, 0x29a, 0x393, 0x99, 0x190,
    0xf00, 0xe09, 0xd03, 0xc0a, 0xb06, 0xa0f, 0x905, 0x80c,
    0x70c, 0x605, 0x50f, 0x406, 0x30a, 0x203, 0x109, 0x0,
];

/// Triangle table: defines triangles for each cube configuration
/// Each row contains up to 5 triangles (15 indices), terminated by -1
const TRIANGLE_TABLE: [[i8; 16]; 256] = [
    [-1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [0, 8, 3, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [0, 1, 9, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [1, 8, 3, 9, 8, 1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [1, 2, 10, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [0, 8, 3, 1, 2, 10, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [9, 2, 10, 0, 2, 9, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [2, 8, 3, 2, 10, 8, 10, 9, 8, -1, -1, -1, -1, -1, -1, -1],
    [3, 11, 2, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [0, 11, 2, 8, 11, 0, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [1, 9, 0, 2, 3, 11, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [1, 11, 2, 1, 9, 11, 9, 8, 11, -1, -1, -1, -1, -1, -1, -1],
    [3, 10, 1, 11, 10, 3, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [0, 10, 1, 0, 8, 10, 8, 11, 10, -1, -1, -1, -1, -1, -1, -1],
    [3, 9, 0, 3, 11, 9, 11, 10, 9, -1, -1, -1, -1, -1, -1, -1],
    [9, 8, 10, 10, 8, 11, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [4, 7, 8, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [4, 3, 0, 7, 3, 4, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [0, 1, 9, 8, 4, 7, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [4, 1, 9, 4, 7, 1, 7, 3, 1, -1, -1, -1, -1, -1, -1, -1],
    [1, 2, 10, 8, 4, 7, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [3, 4, 7, 3, 0, 4, 1, 2, 10, -1, -1, -1, -1, -1, -1, -1],
    [9, 2, 10, 9, 0, 2, 8, 4, 7, -1, -1, -1, -1, -1, -1, -1],
    [2, 10, 9, 2, 9, 7, 2, 7, 3, 7, 9, 4, -1, -1, -1, -1],
    [8, 4, 7, 3, 11, 2, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [11, 4, 7, 11, 2, 4, 2, 0, 4, -1, -1, -1, -1, -1, -1, -1],
    [9, 0, 1, 8, 4, 7, 2, 3, 11, -1, -1, -1, -1, -1, -1, -1],
    [4, 7, 11, 9, 4, 11, 9, 11, 2, 9, 2, 1, -1, -1, -1, -1],
    [3, 10, 1, 3, 11, 10, 7, 8, 4, -1, -1, -1, -1, -1, -1, -1],
    [1, 11, 10, 1, 4, 11, 1, 0, 4, 7, 11, 4, -1, -1, -1, -1],
    [4, 7, 8, 9, 0, 11, 9, 11, 10, 11, 0, 3, -1, -1, -1, -1],
    [4, 7, 11, 4, 11, 9, 9, 11, 10, -1, -1, -1, -1, -1, -1, -1],
    [9, 5, 4, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [9, 5, 4, 0, 8, 3, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [0, 5, 4, 1, 5, 0, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [8, 5, 4, 8, 3, 5, 3, 1, 5, -1, -1, -1, -1, -1, -1, -1],
    [1, 2, 10, 9, 5, 4, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [3, 0, 8, 1, 2, 10, 4, 9, 5, -1, -1, -1, -1, -1, -1, -1],
    [5, 2, 10, 5, 4, 2, 4, 0, 2, -1, -1, -1, -1, -1, -1, -1],
    [2, 10, 5, 3, 2, 5, 3, 5, 4, 3, 4, 8, -1, -1, -1, -1],
    [9, 5, 4, 2, 3, 11, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [0, 11, 2, 0, 8, 11, 4, 9, 5, -1, -1, -1, -1, -1, -1, -1],
    [0, 5, 4, 0, 1, 5, 2, 3, 11, -1, -1, -1, -1, -1, -1, -1],
    [2, 1, 5, 2, 5, 8, 2, 8, 11, 4, 8, 5, -1, -1, -1, -1],
    [10, 3, 11, 10, 1, 3, 9, 5, 4, -1, -1, -1, -1, -1, -1, -1],
    [4, 9, 5, 0, 8, 1, 8, 10, 1, 8, 11, 10, -1, -1, -1, -1],
    [5, 4, 0, 5, 0, 11, 5, 11, 10, 11, 0, 3, -1, -1, -1, -1],
    [5, 4, 8, 5, 8, 10, 10, 8, 11, -1, -1, -1, -1, -1, -1, -1],
    [9, 7, 8, 5, 7, 9, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [9, 3, 0, 9, 5, 3, 5, 7, 3, -1, -1, -1, -1, -1, -1, -1],
    [0, 7, 8, 0, 1, 7, 1, 5, 7, -1, -1, -1, -1, -1, -1, -1],
    [1, 5, 3, 3, 5, 7, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [9, 7, 8, 9, 5, 7, 10, 1, 2, -1, -1, -1, -1, -1, -1, -1],
    [10, 1, 2, 9, 5, 0, 5, 3, 0, 5, 7, 3, -1, -1, -1, -1],
    [8, 0, 2, 8, 2, 5, 8, 5, 7, 10, 5, 2, -1, -1, -1, -1],
    [2, 10, 5, 2, 5, 3, 3, 5, 7, -1, -1, -1, -1, -1, -1, -1],
    [7, 9, 5, 7, 8, 9, 3, 11, 2, -1, -1, -1, -1, -1, -1, -1],
    [9, 5, 7, 9, 7, 2, 9, 2, 0, 2, 7, 11, -1, -1, -1, -1],
    [2, 3, 11, 0, 1, 8, 1, 7, 8, 1, 5, 7, -1, -1, -1, -1],
    [11, 2, 1, 11, 1, 7, 7, 1, 5, -1, -1, -1, -1, -1, -1, -1],
    [9, 5, 8, 8, 5, 7, 10, 1, 3, 10, 3, 11, -1, -1, -1, -1],
    [5, 7, 0, 5, 0, 9, 7, 11, 0, 1, 0, 10, 11, 10, 0, -1],
    [11, 10, 0, 11, 0, 3, 10, 5, 0, 8, 0, 7, 5, 7, 0, -1],
    [11, 10, 5, 7, 11, 5, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [10, 6, 5, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [0, 8, 3, 5, 10, 6, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [9, 0, 1, 5, 10, 6, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [1, 8, 3, 1, 9, 8, 5, 10, 6, -1, -1, -1, -1, -1, -1, -1],
    [1, 6, 5, 2, 6, 1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [1, 6, 5, 1, 2, 6, 3, 0, 8, -1, -1, -1, -1, -1, -1, -1],
    [9, 6, 5, 9, 0, 6, 0, 2, 6, -1, -1, -1, -1, -1, -1, -1],
    [5, 9, 8, 5, 8, 2, 5, 2, 6, 3, 2, 8, -1, -1, -1, -1],
    [2, 3, 11, 10, 6, 5, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [11, 0, 8, 11, 2, 0, 10, 6, 5, -1, -1, -1, -1, -1, -1, -1],
    [0, 1, 9, 2, 3, 11, 5, 10, 6, -1, -1, -1, -1, -1, -1, -1],
    [5, 10, 6, 1, 9, 2, 9, 11, 2, 9, 8, 11, -1, -1, -1, -1],
    [6, 3, 11, 6, 5, 3, 5, 1, 3, -1, -1, -1, -1, -1, -1, -1],
    [0, 8, 11, 0, 11, 5, 0, 5, 1, 5, 11, 6, -1, -1, -1, -1],
    [3, 11, 6, 0, 3, 6, 0, 6, 5, 0, 5, 9, -1, -1, -1, -1],
    [6, 5, 9, 6, 9, 11, 11, 9, 8, -1, -1, -1, -1, -1, -1, -1],
    [5, 10, 6, 4, 7, 8, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [4, 3, 0, 4, 7, 3, 6, 5, 10, -1, -1, -1, -1, -1, -1, -1],
    [1, 9, 0, 5, 10, 6, 8, 4, 7, -1, -1, -1, -1, -1, -1, -1],
    [10, 6, 5, 1, 9, 7, 1, 7, 3, 7, 9, 4, -1, -1, -1, -1],
    [6, 1, 2, 6, 5, 1, 4, 7, 8, -1, -1, -1, -1, -1, -1, -1],
    [1, 2, 5, 5, 2, 6, 3, 0, 4, 3, 4, 7, -1, -1, -1, -1],
    [8, 4, 7, 9, 0, 5, 0, 6, 5, 0, 2, 6, -1, -1, -1, -1],
    [7, 3, 9, 7, 9, 4, 3, 2, 9, 5, 9, 6, 2, 6, 9, -1],
    [3, 11, 2, 7, 8, 4, 10, 6, 5, -1, -1, -1, -1, -1, -1, -1],
    [5, 10, 6, 4, 7, 2, 4, 2, 0, 2, 7, 11, -1, -1, -1, -1],
    [0, 1, 9, 4, 7, 8, 2, 3, 11, 5, 10, 6, -1, -1, -1, -1],
    [9, 2, 1, 9, 11, 2, 9, 4, 11, 7, 11, 4, 5, 10, 6, -1],
    [8, 4, 7, 3, 11, 5, 3, 5, 1, 5, 11, 6, -1, -1, -1, -1],
    [5, 1, 11, 5, 11, 6, 1, 0, 11, 7, 11, 4, 0, 4, 11, -1],
    [0, 5, 9, 0, 6, 5, 0, 3, 6, 11, 6, 3, 8, 4, 7, -1],
    [6, 5, 9, 6, 9, 11, 4, 7, 9, 7, 11, 9, -1, -1, -1, -1],
    [10, 4, 9, 6, 4, 10, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [4, 10, 6, 4, 9, 10, 0, 8, 3, -1, -1, -1, -1, -1, -1, -1],
    [10, 0, 1, 10, 6, 0, 6, 4, 0, -1, -1, -1, -1, -1, -1, -1],
    [8, 3, 1, 8, 1, 6, 8, 6, 4, 6, 1, 10, -1, -1, -1, -1],
    [1, 4, 9, 1, 2, 4, 2, 6, 4, -1, -1, -1, -1, -1, -1, -1],
    [3, 0, 8, 1, 2, 9, 2, 4, 9, 2, 6, 4, -1, -1, -1, -1],
    [0, 2, 4, 4, 2, 6, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [8, 3, 2, 8, 2, 4, 4, 2, 6, -1, -1, -1, -1, -1, -1, -1],
    [10, 4, 9, 10, 6, 4, 11, 2, 3, -1, -1, -1, -1, -1, -1, -1],
    [0, 8, 2, 2, 8, 11, 4, 9, 10, 4, 10, 6, -1, -1, -1, -1],
    [3, 11, 2, 0, 1, 6, 0, 6, 4, 6, 1, 10, -1, -1, -1, -1],
    [6, 4, 1, 6, 1, 10, 4, 8, 1, 2, 1, 11, 8, 11, 1, -1],
    [9, 6, 4, 9, 3, 6, 9, 1, 3, 11, 6, 3, -1, -1, -1, -1],
    [8, 11, 1, 8, 1, 0, 11, 6, 1, 9, 1, 4, 6, 4, 1, -1],
    [3, 11, 6, 3, 6, 0, 0, 6, 4, -1, -1, -1, -1, -1, -1, -1],
    [6, 4, 8, 11, 6, 8, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [7, 10, 6, 7, 8, 10, 8, 9, 10, -1, -1, -1, -1, -1, -1, -1],
    [0, 7, 3, 0, 10, 7, 0, 9, 10, 6, 7, 10, -1, -1, -1, -1],
    [10, 6, 7, 1, 10, 7, 1, 7, 8, 1, 8, 0, -1, -1, -1, -1],
    [10, 6, 7, 10, 7, 1, 1, 7, 3, -1, -1, -1, -1, -1, -1, -1],
    [1, 2, 6, 1, 6, 8, 1, 8, 9, 8, 6, 7, -1, -1, -1, -1],
    [2, 6, 9, 2, 9, 1, 6, 7, 9, 0, 9, 3, 7, 3, 9, -1],
    [7, 8, 0, 7, 0, 6, 6, 0, 2, -1, -1, -1, -1, -1, -1, -1],
    [7, 3, 2, 6, 7, 2, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [2, 3, 11, 10, 6, 8, 10, 8, 9, 8, 6, 7, -1, -1, -1, -1],
    [2, 0, 7, 2, 7, 11, 0, 9, 7, 6, 7, 10, 9, 10, 7, -1],
    [1, 8, 0, 1, 7, 8, 1, 10, 7, 6, 7, 10, 2, 3, 11, -1],
    [11, 2, 1, 11, 1, 7, 10, 6, 1, 6, 7, 1, -1, -1, -1, -1],
    [8, 9, 6, 8, 6, 7, 9, 1, 6, 11, 6, 3, 1, 3, 6, -1],
    [0, 9, 1, 11, 6, 7, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [7, 8, 0, 7, 0, 6, 3, 11, 0, 11, 6, 0, -1, -1, -1, -1],
    [7, 11, 6, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [7, 6, 11, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [3, 0, 8, 11, 7, 6, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [0, 1, 9, 11, 7, 6, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [8, 1, 9, 8, 3, 1, 11, 7, 6, -1, -1, -1, -1, -1, -1, -1],
    [10, 1, 2, 6, 11, 7, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [1, 2, 10, 3, 0, 8, 6, 11, 7, -1, -1, -1, -1, -1, -1, -1],
    [2, 9, 0, 2, 10, 9, 6, 11, 7, -1, -1, -1, -1, -1, -1, -1],
    [6, 11, 7, 2, 10, 3, 10, 8, 3, 10, 9, 8, -1, -1, -1, -1],
    [7, 2, 3, 6, 2, 7, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [7, 0, 8, 7, 6, 0, 6, 2, 0, -1, -1, -1, -1, -1, -1, -1],
    [2, 7, 6, 2, 3, 7, 0, 1, 9, -1, -1, -1, -1, -1, -1, -1],
    [1, 6, 2, 1, 8, 6, 1, 9, 8, 8, 7, 6, -1, -1, -1, -1],
    [10, 7, 6, 10, 1, 7, 1, 3, 7, -1, -1, -1, -1, -1, -1, -1],
    [10, 7, 6, 1, 7, 10, 1, 8, 7, 1, 0, 8, -1, -1, -1, -1],
    [0, 3, 7, 0, 7, 10, 0, 10, 9, 6, 10, 7, -1, -1, -1, -1],
    [7, 6, 10, 7, 10, 8, 8, 10, 9, -1, -1, -1, -1, -1, -1, -1],
    [6, 8, 4, 11, 8, 6, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [3, 6, 11, 3, 0, 6, 0, 4, 6, -1, -1, -1, -1, -1, -1, -1],
    [8, 6, 11, 8, 4, 6, 9, 0, 1, -1, -1, -1, -1, -1, -1, -1],
    [9, 4, 6, 9, 6, 3, 9, 3, 1, 11, 3, 6, -1, -1, -1, -1],
    [6, 8, 4, 6, 11, 8, 2, 10, 1, -1, -1, -1, -1, -1, -1, -1],
    [1, 2, 10, 3, 0, 11, 0, 6, 11, 0, 4, 6, -1, -1, -1, -1],
    [4, 11, 8, 4, 6, 11, 0, 2, 9, 2, 10, 9, -1, -1, -1, -1],
    [10, 9, 3, 10, 3, 2, 9, 4, 3, 11, 3, 6, 4, 6, 3, -1],
    [8, 2, 3, 8, 4, 2, 4, 6, 2, -1, -1, -1, -1, -1, -1, -1],
    [0, 4, 2, 4, 6, 2, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [1, 9, 0, 2, 3, 4, 2, 4, 6, 4, 3, 8, -1, -1, -1, -1],
    [1, 9, 4, 1, 4, 2, 2, 4, 6, -1, -1, -1, -1, -1, -1, -1],
    [8, 1, 3, 8, 6, 1, 8, 4, 6, 6, 10, 1, -1, -1, -1, -1],
    [10, 1, 0, 10, 0, 6, 6, 0, 4, -1, -1, -1, -1, -1, -1, -1],
    [4, 6, 3, 4, 3, 8, 6, 10, 3, 0, 3, 9, 10, 9, 3, -1],
    [10, 9, 4, 6, 10, 4, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [4, 9, 5, 7, 6, 11, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [0, 8, 3, 4, 9, 5, 11, 7, 6, -1, -1, -1, -1, -1, -1, -1],
    [5, 0, 1, 5, 4, 0, 7, 6, 11, -1, -1, -1, -1, -1, -1, -1],
    [11, 7, 6, 8, 3, 4, 3, 5, 4, 3, 1, 5, -1, -1, -1, -1],
    [9, 5, 4, 10, 1, 2, 7, 6, 11, -1, -1, -1, -1, -1, -1, -1],
    [6, 11, 7, 1, 2, 10, 0, 8, 3, 4, 9, 5, -1, -1, -1, -1],
    [7, 6, 11, 5, 4, 10, 4, 2, 10, 4, 0, 2, -1, -1, -1, -1],
    [3, 4, 8, 3, 5, 4, 3, 2, 5, 10, 5, 2, 11, 7, 6, -1],
    [7, 2, 3, 7, 6, 2, 5, 4, 9, -1, -1, -1, -1, -1, -1, -1],
    [9, 5, 4, 0, 8, 6, 0, 6, 2, 6, 8, 7, -1, -1, -1, -1],
    [3, 6, 2, 3, 7, 6, 1, 5, 0, 5, 4, 0, -1, -1, -1, -1],
    [6, 2, 8, 6, 8, 7, 2, 1, 8, 4, 8, 5, 1, 5, 8, -1],
    [9, 5, 4, 10, 1, 6, 1, 7, 6, 1, 3, 7, -1, -1, -1, -1],
    [1, 6, 10, 1, 7, 6, 1, 0, 7, 8, 7, 0, 9, 5, 4, -1],
    [4, 0, 10, 4, 10, 5, 0, 3, 10, 6, 10, 7, 3, 7, 10, -1],
    [7, 6, 10, 7, 10, 8, 5, 4, 10, 4, 8, 10, -1, -1, -1, -1],
    [6, 9, 5, 6, 11, 9, 11, 8, 9, -1, -1, -1, -1, -1, -1, -1],
    [3, 6, 11, 0, 6, 3, 0, 5, 6, 0, 9, 5, -1, -1, -1, -1],
    [0, 11, 8, 0, 5, 11, 0, 1, 5, 5, 6, 11, -1, -1, -1, -1],
    [6, 11, 3, 6, 3, 5, 5, 3, 1, -1, -1, -1, -1, -1, -1, -1],
    [1, 2, 10, 9, 5, 11, 9, 11, 8, 11, 5, 6, -1, -1, -1, -1],
    [0, 11, 3, 0, 6, 11, 0, 9, 6, 5, 6, 9, 1, 2, 10, -1],
    [11, 8, 5, 11, 5, 6, 8, 0, 5, 10, 5, 2, 0, 2, 5, -1],
    [6, 11, 3, 6, 3, 5, 2, 10, 3, 10, 5, 3, -1, -1, -1, -1],
    [5, 8, 9, 5, 2, 8, 5, 6, 2, 3, 8, 2, -1, -1, -1, -1],
    [9, 5, 6, 9, 6, 0, 0, 6, 2, -1, -1, -1, -1, -1, -1, -1],
    [1, 5, 8, 1, 8, 0, 5, 6, 8, 3, 8, 2, 6, 2, 8, -1],
    [1, 5, 6, 2, 1, 6, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [1, 3, 6, 1, 6, 10, 3, 8, 6, 5, 6, 9, 8, 9, 6, -1],
    [10, 1, 0, 10, 0, 6, 9, 5, 0, 5, 6, 0, -1, -1, -1, -1],
    [0, 3, 8, 5, 6, 10, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [10, 5, 6, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [11, 5, 10, 7, 5, 11, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [11, 5, 10, 11, 7, 5, 8, 3, 0, -1, -1, -1, -1, -1, -1, -1],
    [5, 11, 7, 5, 10, 11, 1, 9, 0, -1, -1, -1, -1, -1, -1, -1],
    [10, 7, 5, 10, 11, 7, 9, 8, 1, 8, 3, 1, -1, -1, -1, -1],
    [11, 1, 2, 11, 7, 1, 7, 5, 1, -1, -1, -1, -1, -1, -1, -1],
    [0, 8, 3, 1, 2, 7, 1, 7, 5, 7, 2, 11, -1, -1, -1, -1],
    [9, 7, 5, 9, 2, 7, 9, 0, 2, 2, 11, 7, -1, -1, -1, -1],
    [7, 5, 2, 7, 2, 11, 5, 9, 2, 3, 2, 8, 9, 8, 2, -1],
    [2, 5, 10, 2, 3, 5, 3, 7, 5, -1, -1, -1, -1, -1, -1, -1],
    [8, 2, 0, 8, 5, 2, 8, 7, 5, 10, 2, 5, -1, -1, -1, -1],
    [9, 0, 1, 5, 10, 3, 5, 3, 7, 3, 10, 2, -1, -1, -1, -1],
    [9, 8, 2, 9, 2, 1, 8, 7, 2, 10, 2, 5, 7, 5, 2, -1],
    [1, 3, 5, 3, 7, 5, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [0, 8, 7, 0, 7, 1, 1, 7, 5, -1, -1, -1, -1, -1, -1, -1],
    [9, 0, 3, 9, 3, 5, 5, 3, 7, -1, -1, -1, -1, -1, -1, -1],
    [9, 8, 7, 5, 9, 7, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [5, 8, 4, 5, 10, 8, 10, 11, 8, -1, -1, -1, -1, -1, -1, -1],
    [5, 0, 4, 5, 11, 0, 5, 10, 11, 11, 3, 0, -1, -1, -1, -1],
    [0, 1, 9, 8, 4, 10, 8, 10, 11, 10, 4, 5, -1, -1, -1, -1],
    [10, 11, 4, 10, 4, 5, 11, 3, 4, 9, 4, 1, 3, 1, 4, -1],
    [2, 5, 1, 2, 8, 5, 2, 11, 8, 4, 5, 8, -1, -1, -1, -1],
    [0, 4, 11, 0, 11, 3, 4, 5, 11, 2, 11, 1, 5, 1, 11, -1],
    [0, 2, 5, 0, 5, 9, 2, 11, 5, 4, 5, 8, 11, 8, 5, -1],
    [9, 4, 5, 2, 11, 3, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [2, 5, 10, 3, 5, 2, 3, 4, 5, 3, 8, 4, -1, -1, -1, -1],
    [5, 10, 2, 5, 2, 4, 4, 2, 0, -1, -1, -1, -1, -1, -1, -1],
    [3, 10, 2, 3, 5, 10, 3, 8, 5, 4, 5, 8, 0, 1, 9, -1],
    [5, 10, 2, 5, 2, 4, 1, 9, 2, 9, 4, 2, -1, -1, -1, -1],
    [8, 4, 5, 8, 5, 3, 3, 5, 1, -1, -1, -1, -1, -1, -1, -1],
    [0, 4, 5, 1, 0, 5, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [8, 4, 5, 8, 5, 3, 9, 0, 5, 0, 3, 5, -1, -1, -1, -1],
    [9, 4, 5, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [4, 11, 7, 4, 9, 11, 9, 10, 11, -1, -1, -1, -1, -1, -1, -1],
    [0, 8, 3, 4, 9, 7, 9, 11, 7, 9, 10, 11, -1, -1, -1, -1],
    [1, 10, 11, 1, 11, 4, 1, 4, 0, 7, 4, 11, -1, -1, -1, -1],
    [3, 1, 4, 3, 4, 8, 1, 10, 4, 7, 4, 11, 10, 11, 4, -1],
    [4, 11, 7, 9, 11, 4, 9, 2, 11, 9, 1, 2, -1, -1, -1, -1],
    [9, 7, 4, 9, 11, 7, 9, 1, 11, 2, 11, 1, 0, 8, 3, -1],
    [11, 7, 4, 11, 4, 2, 2, 4, 0, -1, -1, -1, -1, -1, -1, -1],
    [11, 7, 4, 11, 4, 2, 8, 3, 4, 3, 2, 4, -1, -1, -1, -1],
    [2, 9, 10, 2, 7, 9, 2, 3, 7, 7, 4, 9, -1, -1, -1, -1],
    [9, 10, 7, 9, 7, 4, 10, 2, 7, 8, 7, 0, 2, 0, 7, -1],
    [3, 7, 10, 3, 10, 2, 7, 4, 10, 1, 10, 0, 4, 0, 10, -1],
    [1, 10, 2, 8, 7, 4, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [4, 9, 1, 4, 1, 7, 7, 1, 3, -1, -1, -1, -1, -1, -1, -1],
    [4, 9, 1, 4, 1, 7, 0, 8, 1, 8, 7, 1, -1, -1, -1, -1],
    [4, 0, 3, 7, 4, 3, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [4, 8, 7, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [9, 10, 8, 10, 11, 8, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [3, 0, 9, 3, 9, 11, 11, 9, 10, -1, -1, -1, -1, -1, -1, -1],
    [0, 1, 10, 0, 10, 8, 8, 10, 11, -1, -1, -1, -1, -1, -1, -1],
    [3, 1, 10, 11, 3, 10, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [1, 2, 11, 1, 11, 9, 9, 11, 8, -1, -1, -1, -1, -1, -1, -1],
    [3, 0, 9, 3, 9, 11, 1, 2, 9, 2, 11, 9, -1, -1, -1, -1],
    [0, 2, 11, 8, 0, 11, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [3, 2, 11, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [2, 3, 8, 2, 8, 10, 10, 8, 9, -1, -1, -1, -1, -1, -1, -1],
    [9, 10, 2, 0, 9, 2, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [2, 3, 8, 2, 8, 10, 0, 1, 8, 1, 10, 8, -1, -1, -1, -1],
    [1, 10, 2, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [1, 3, 8, 9, 1, 8, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [0, 9, 1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [0, 3, 8, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [-1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
];

/// Otsu threshold of a volume in `[0, 1]`.
///
/// Zero samples are left out of the histogram but still count towards the
/// total used to normalise it.
pub fn otsu_threshold(volume: &Volume) -> f64 {
    let total = volume.len() as f64;
    let mut histogram = vec![0.0; HISTOGRAM_BINS];
    for &sample in volume.samples() {
        if sample != 0 {
            histogram[sample as usize] += 1.0;
        }
    }
    for bin in &mut histogram {
        *bin /= total;
    }

    otsu_bin(&histogram) as f64 / QUANT_MAX as f64
}

/// Bin maximising the between-class variance of a normalised histogram.
///
/// Bin `i` stands for the value `i / (len - 1)`. For a candidate bin the lower
/// class holds every bin below it and the upper class the rest.
pub fn otsu_bin(histogram: &[f64]) -> usize {
    let scale = histogram.len().saturating_sub(1).max(1) as f64;

    let mut upper_sum: f64 = histogram
        .iter()
        .enumerate()
        .map(|(i, h)| h * i as f64 / scale)
        .sum();
    let mut upper_weight: f64 = histogram.iter().sum();
    let mut lower_sum = 0.0;
    let mut lower_weight = 0.0;

    let mut best = 0;
    let mut max_variance = 0.0;

    for (i, &h) in histogram.iter().enumerate() {
        let upper_mean = if upper_weight != 0.0 { upper_sum / upper_weight } else { 0.0 };
        let lower_mean = if lower_weight != 0.0 { lower_sum / lower_weight } else { 0.0 };

        let diff = upper_mean - lower_mean;
        let variance = upper_weight * lower_weight * diff * diff;
        if variance > max_variance {
            max_variance = variance;
            best = i;
        }

        let value = h * i as f64 / scale;
        upper_sum -= value;
        upper_weight -= h;
        lower_sum += value;
        lower_weight += h;
    }

    best
}

/// Point on the segment `p0`-`p1` where the linear interpolant reaches `iso`.
///
/// Endpoints are put in a fixed order first so that every cell sharing the
/// segment computes the same bits.
fn interpolate(iso: f64, p0: Point3d, p1: Point3d, v0: f64, v1: f64) -> Point3d {
    let (p0, p1, v0, v1) = if precedes(&p1, &p0) {
        (p1, p0, v1, v0)
    } else {
        (p0, p1, v0, v1)
    };

    if (iso - v0).abs() < SNAP_EPSILON {
        return p0;
    }
    if (iso - v1).abs() < SNAP_EPSILON {
        return p1;
    }
    if (v1 - v0).abs() < SNAP_EPSILON {
        return p0;
    }

    let mu = (iso - v0) / (v1 - v0);
    p0 + (p1 - p0) * mu
}

/// Lexicographic order on coordinates
fn precedes(a: &Point3d, b: &Point3d) -> bool {
    (a.x, a.y, a.z) < (b.x, b.y, b.z)
}

/// Positions and normalized values of a cell's corners
fn cell_corners(volume: &Volume, x: usize, y: usize, z: usize) -> ([Point3d; 8], [f64; 8]) {
    let mut positions = [Point3d::origin(); 8];
    let mut values = [0.0; 8];
    for (i, [dx, dy, dz]) in CORNERS.iter().enumerate() {
        let (cx, cy, cz) = (x + dx, y + dy, z + dz);
        positions[i] = Point3d::new(cx as f64, cy as f64, cz as f64);
        values[i] = volume.value_at(cx, cy, cz);
    }
    (positions, values)
}

/// Marching cubes triangles of one cell
fn polygonise_cube(positions: &[Point3d; 8], values: &[f64; 8], iso: f64, out: &mut Vec<[Point3d; 3]>) {
    let mut cube_index = 0usize;
    for (i, &v) in values.iter().enumerate() {
        if v < iso {
            cube_index |= 1 << i;
        }
    }

    let edges = EDGE_TABLE[cube_index];
    if edges == 0 {
        return;
    }

    let mut edge_vertices = [Point3d::origin(); 12];
    for (edge, &[a, b]) in EDGE_CORNERS.iter().enumerate() {
        if edges & (1 << edge) != 0 {
            edge_vertices[edge] = interpolate(iso, positions[a], positions[b], values[a], values[b]);
        }
    }

    for triangle in TRIANGLE_TABLE[cube_index]
        .chunks(3)
        .take_while(|t| t.len() == 3 && t[0] >= 0)
    {
        out.push([
            edge_vertices[triangle[0] as usize],
            edge_vertices[triangle[1] as usize],
            edge_vertices[triangle[2] as usize],
        ]);
    }
}

/// Swap the last two corners unless the normal points along `uphill`
fn orient(mut triangle: [Point3d; 3], uphill: &Vector3<f64>) -> [Point3d; 3] {
    let normal = (triangle[1] - triangle[0]).cross(&(triangle[2] - triangle[0]));
    if normal.dot(uphill) < 0.0 {
        triangle.swap(1, 2);
    }
    triangle
}

/// Marching tetrahedra triangles of one tetrahedron
fn polygonise_tetrahedron(positions: [Point3d; 4], values: [f64; 4], iso: f64, out: &mut Vec<[Point3d; 3]>) {
    let mut below = [0usize; 4];
    let mut above = [0usize; 4];
    let (mut n_below, mut n_above) = (0, 0);
    for (i, &v) in values.iter().enumerate() {
        if v < iso {
            below[n_below] = i;
            n_below += 1;
        } else {
            above[n_above] = i;
            n_above += 1;
        }
    }

    if n_below == 0 || n_above == 0 {
        return;
    }

    let centroid = |ids: &[usize]| {
        ids.iter().fold(Vector3::zeros(), |acc, &i| acc + positions[i].coords) / ids.len() as f64
    };
    let uphill = centroid(&above[..n_above]) - centroid(&below[..n_below]);
    let cut = |a: usize, b: usize| interpolate(iso, positions[a], positions[b], values[a], values[b]);

    match (n_below, n_above) {
        (1, 3) | (3, 1) => {
            let (lone, others) = if n_below == 1 {
                (below[0], &above[..3])
            } else {
                (above[0], &below[..3])
            };
            out.push(orient(
                [cut(lone, others[0]), cut(lone, others[1]), cut(lone, others[2])],
                &uphill,
            ));
        }
        _ => {
            let [a, b] = [below[0], below[1]];
            let [c, d] = [above[0], above[1]];
            let quad = [cut(a, c), cut(a, d), cut(b, d), cut(b, c)];
            out.push(orient([quad[0], quad[1], quad[2]], &uphill));
            out.push(orient([quad[0], quad[2], quad[3]], &uphill));
        }
    }
}

/// Central-difference gradient of the normalized field, one-sided at the border
fn gradient(volume: &Volume, x: usize, y: usize, z: usize) -> Vector3<f64> {
    let [nx, ny, nz] = volume.dimensions();
    let diff = |lo: (usize, usize, usize), hi: (usize, usize, usize), span: usize| {
        if span == 0 {
            0.0
        } else {
            (volume.value_at(hi.0, hi.1, hi.2) - volume.value_at(lo.0, lo.1, lo.2)) / span as f64
        }
    };

    let (x0, x1) = (x.saturating_sub(1), (x + 1).min(nx - 1));
    let (y0, y1) = (y.saturating_sub(1), (y + 1).min(ny - 1));
    let (z0, z1) = (z.saturating_sub(1), (z + 1).min(nz - 1));

    Vector3::new(
        diff((x0, y, z), (x1, y, z), x1 - x0),
        diff((x, y0, z), (x, y1, z), y1 - y0),
        diff((x, y, z0), (x, y, z1), z1 - z0),
    )
}

/// Dual contouring vertex of the cell at `(x, y, z)`.
///
/// Minimises the quadratic error of the crossing planes on the cell's edges
/// around their mass point, ignoring directions whose singular value is
/// below [`QEF_SINGULAR_CUTOFF`], and keeps the result inside the cell.
fn cell_vertex(volume: &Volume, iso: f64, x: usize, y: usize, z: usize) -> Point3d {
    let (positions, values) = cell_corners(volume, x, y, z);
    let origin = positions[0];

    let mut ata = Matrix3::<f64>::zeros();
    let mut atb = Vector3::<f64>::zeros();
    let mut mass = Vector3::<f64>::zeros();
    let mut count = 0usize;

    for &[a, b] in EDGE_CORNERS.iter() {
        let (va, vb) = (values[a], values[b]);
        if (va < iso) == (vb < iso) {
            continue;
        }

        let p = interpolate(iso, positions[a], positions[b], va, vb) - origin;
        let [ax, ay, az] = [positions[a].x as usize, positions[a].y as usize, positions[a].z as usize];
        let [bx, by, bz] = [positions[b].x as usize, positions[b].y as usize, positions[b].z as usize];
        let na = gradient(volume, ax, ay, az).try_normalize(0.0).unwrap_or_else(Vector3::zeros);
        let nb = gradient(volume, bx, by, bz).try_normalize(0.0).unwrap_or_else(Vector3::zeros);

        let Some(n) = (na * (vb - iso).abs() + nb * (va - iso).abs()).try_normalize(0.0) else {
            continue;
        };

        let m = n * n.transpose();
        ata += m;
        atb += m * p;
        mass += p;
        count += 1;
    }

    if count == 0 {
        return origin + Vector3::repeat(0.5);
    }

    let mass = mass / count as f64;
    let svd = ata.svd(true, true);
    let offset = match (svd.u, svd.v_t) {
        (Some(u), Some(v_t)) => {
            let inv = svd
                .singular_values
                .map(|s| if s.abs() < QEF_SINGULAR_CUTOFF { 0.0 } else { 1.0 / s });
            let pinv = v_t.transpose() * Matrix3::from_diagonal(&inv) * u.transpose();
            mass + pinv * (atb - ata * mass)
        }
        _ => mass,
    };

    origin + offset.map(|c| c.clamp(0.0, 1.0))
}

/// Marching Cubes implementation
#[derive(Debug, Clone, Default)]
pub struct MarchingCubes {
    config: MarchingCubesConfig,
}

impl MarchingCubes {
    /// Create a new Marching Cubes instance
    pub fn new(config: MarchingCubesConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MarchingCubesConfig {
        &self.config
    }

    /// Configured isovalue, or Otsu's threshold of `volume` when none is set
    pub fn resolve_iso_level(&self, volume: &Volume) -> f64 {
        self.config
            .iso_level
            .unwrap_or_else(|| otsu_threshold(volume))
    }

    /// Extract the isosurface at the configured (or Otsu) isovalue
    pub fn extract(&self, volume: &Volume) -> Result<TriangleMesh> {
        let iso = self.resolve_iso_level(volume);
        self.extract_at(volume, iso, None)
    }

    /// Extract the isosurface at `iso`, reporting per-slab progress
    pub fn extract_at(
        &self,
        volume: &Volume,
        iso: f64,
        progress: Option<&dyn ProgressSink>,
    ) -> Result<TriangleMesh> {
        self.config.validate()?;
        let dims = volume.dimensions();
        if dims.iter().any(|&n| n < 2) {
            return Err(Error::DegenerateInput(format!(
                "volume {:?} needs at least 2 samples per axis",
                dims
            )));
        }

        let _span = info_span!("extract", method = ?self.config.method, iso).entered();

        let mesh = match self.config.method {
            ExtractionMethod::MarchingCubes => {
                self.weld(self.scan_cells(volume, progress, |x, y, z, out| {
                    let (positions, values) = cell_corners(volume, x, y, z);
                    polygonise_cube(&positions, &values, iso, out);
                }))
            }
            ExtractionMethod::MarchingTetrahedra => {
                self.weld(self.scan_cells(volume, progress, |x, y, z, out| {
                    let (positions, values) = cell_corners(volume, x, y, z);
                    for tet in TETRAHEDRA.iter() {
                        polygonise_tetrahedron(
                            tet.map(|c| positions[c]),
                            tet.map(|c| values[c]),
                            iso,
                            out,
                        );
                    }
                }))
            }
            ExtractionMethod::DualContouring => self.dual_contour(volume, iso, progress),
        };

        debug!(
            vertices = mesh.vertex_count(),
            faces = mesh.face_count(),
            "extracted isosurface"
        );
        Ok(mesh)
    }

    /// Run `polygonise` on every cell, one z-slab of cells per task.
    ///
    /// Slabs come back in z order so welding is deterministic.
    fn scan_cells<F>(
        &self,
        volume: &Volume,
        progress: Option<&dyn ProgressSink>,
        polygonise: F,
    ) -> Vec<Vec<[Point3d; 3]>>
    where
        F: Fn(usize, usize, usize, &mut Vec<[Point3d; 3]>) + Sync + Send,
    {
        let [nx, ny, nz] = volume.dimensions();
        let counter = PlaneCounter::new(nz - 1, progress);

        parallel::parallel_map_range(nz - 1, |z| {
            let mut triangles = Vec::new();
            for y in 0..ny - 1 {
                for x in 0..nx - 1 {
                    polygonise(x, y, z, &mut triangles);
                }
            }
            counter.tick(|slabs_done, slabs_total| ProgressMsg::Extraction {
                slabs_done,
                slabs_total,
            });
            triangles
        })
    }

    /// Merge triangle soup into a welded mesh
    fn weld(&self, slabs: Vec<Vec<[Point3d; 3]>>) -> TriangleMesh {
        let mut builder = MeshBuilder::new();
        for triangle in slabs.into_iter().flatten() {
            builder.triangle(triangle);
        }
        if builder.dropped_triangles() > 0 {
            debug!(dropped = builder.dropped_triangles(), "dropped degenerate triangles");
        }

        let mut mesh = builder.build();
        if self.config.flip_faces {
            mesh.flip_faces();
        }
        mesh
    }

    fn dual_contour(&self, volume: &Volume, iso: f64, progress: Option<&dyn ProgressSink>) -> TriangleMesh {
        let [nx, ny, nz] = volume.dimensions();
        let (cx, cy) = (nx - 1, ny - 1);
        let counter = PlaneCounter::new(nz - 1, progress);

        let cells: Vec<Point3d> = parallel::parallel_map_range(nz - 1, |z| {
            let mut slab = Vec::with_capacity(cx * cy);
            for y in 0..cy {
                for x in 0..cx {
                    slab.push(cell_vertex(volume, iso, x, y, z));
                }
            }
            counter.tick(|slabs_done, slabs_total| ProgressMsg::Extraction {
                slabs_done,
                slabs_total,
            });
            slab
        })
        .into_iter()
        .flatten()
        .collect();

        let cell = |x: usize, y: usize, z: usize| cells[(z * cy + y) * cx + x];
        let mut quads: Vec<([Point3d; 4], bool)> = Vec::new();

        // Edges along x, shared by the four cells around them
        for z in 1..nz - 1 {
            for y in 1..ny - 1 {
                for x in 0..nx - 1 {
                    let (v0, v1) = (volume.value_at(x, y, z), volume.value_at(x + 1, y, z));
                    if (v0 < iso) != (v1 < iso) {
                        let quad = [
                            cell(x, y - 1, z - 1),
                            cell(x, y, z - 1),
                            cell(x, y - 1, z),
                            cell(x, y, z),
                        ];
                        quads.push((quad, v1 > v0));
                    }
                }
            }
        }

        // Edges along y
        for z in 1..nz - 1 {
            for y in 0..ny - 1 {
                for x in 1..nx - 1 {
                    let (v0, v1) = (volume.value_at(x, y, z), volume.value_at(x, y + 1, z));
                    if (v0 < iso) != (v1 < iso) {
                        let quad = [
                            cell(x - 1, y, z - 1),
                            cell(x - 1, y, z),
                            cell(x, y, z - 1),
                            cell(x, y, z),
                        ];
                        quads.push((quad, v1 > v0));
                    }
                }
            }
        }

        // Edges along z
        for z in 0..nz - 1 {
            for y in 1..ny - 1 {
                for x in 1..nx - 1 {
                    let (v0, v1) = (volume.value_at(x, y, z), volume.value_at(x, y, z + 1));
                    if (v0 < iso) != (v1 < iso) {
                        let quad = [
                            cell(x - 1, y - 1, z),
                            cell(x, y - 1, z),
                            cell(x - 1, y, z),
                            cell(x, y, z),
                        ];
                        quads.push((quad, v1 > v0));
                    }
                }
            }
        }

        // With (0, 1, 3) and (0, 3, 2) the quad normal points along the edge axis
        let triangles = quads.into_iter().flat_map(|(q, rising)| {
            if rising {
                [[q[0], q[1], q[3]], [q[0], q[3], q[2]]]
            } else {
                [[q[3], q[1], q[0]], [q[2], q[3], q[0]]]
            }
        });

        self.weld(vec![triangles.collect()])
    }
}

/// Convenience function for basic marching cubes
pub fn marching_cubes(volume: &Volume, iso_level: f64) -> Result<TriangleMesh> {
    MarchingCubes::new(MarchingCubesConfig::default().with_iso_level(iso_level)).extract(volume)
}

//! Core traits for surfrecon

use crate::{mesh::*, point::*, point_cloud::*, Result};

/// Trait for nearest neighbor search functionality.
///
/// Indices in the results are the insertion order of the points in the index.
pub trait NearestNeighborSearch {
    /// Find the single closest point to a query point
    fn find_nearest(&self, query: &Point3d) -> Result<(usize, f64)>;

    /// Find the k nearest neighbors to a query point, closest first
    fn find_k_nearest(&self, query: &Point3d, k: usize) -> Vec<(usize, f64)>;

    /// Find all neighbors within a given radius (inclusive)
    fn find_radius_neighbors(&self, query: &Point3d, radius: f64) -> Vec<(usize, f64)>;
}

/// Anything that carries a 3D position
pub trait Positioned {
    fn position(&self) -> Point3d;
}

impl Positioned for Point3d {
    #[inline]
    fn position(&self) -> Point3d {
        *self
    }
}

impl Positioned for NormalPoint3d {
    #[inline]
    fn position(&self) -> Point3d {
        self.position
    }
}

impl Positioned for SampleRecord {
    #[inline]
    fn position(&self) -> Point3d {
        self.position
    }
}

/// Trait for objects with spatial extent
pub trait Drawable {
    /// Get the bounding box of the object
    fn bounding_box(&self) -> (Point3d, Point3d);

    /// Get the center point of the object
    fn center(&self) -> Point3d {
        let (min, max) = self.bounding_box();
        nalgebra::center(&min, &max)
    }
}

fn bounds_of<I>(mut positions: I) -> (Point3d, Point3d)
where
    I: Iterator<Item = Point3d>,
{
    let Some(first) = positions.next() else {
        return (Point3d::origin(), Point3d::origin());
    };

    positions.fold((first, first), |(min, max), p| {
        (min.inf(&p), max.sup(&p))
    })
}

impl<T: Positioned> Drawable for PointCloud<T> {
    fn bounding_box(&self) -> (Point3d, Point3d) {
        bounds_of(self.points.iter().map(Positioned::position))
    }
}

impl Drawable for TriangleMesh {
    fn bounding_box(&self) -> (Point3d, Point3d) {
        bounds_of(self.vertices.iter().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_cloud_bounding_box() {
        let cloud = PointCloud::from_points(vec![
            Point3d::new(0.0, 0.0, 0.0),
            Point3d::new(1.0, 1.0, 1.0),
            Point3d::new(-1.0, -1.0, -1.0),
            Point3d::new(2.0, 0.5, -0.5),
        ]);

        let (min, max) = cloud.bounding_box();
        assert_eq!(min, Point3d::new(-1.0, -1.0, -1.0));
        assert_eq!(max, Point3d::new(2.0, 1.0, 1.0));
        assert_eq!(cloud.center(), Point3d::new(0.5, 0.0, 0.0));
    }

    #[test]
    fn test_empty_bounding_box_is_origin() {
        let mesh = TriangleMesh::new();
        assert_eq!(mesh.bounding_box(), (Point3d::origin(), Point3d::origin()));
    }

    #[test]
    fn test_oriented_cloud_bounding_box() {
        let cloud = PointCloud::from_points(vec![
            NormalPoint3d::new(Point3d::new(0.0, 2.0, 0.0), Vector3d::y()),
            NormalPoint3d::new(Point3d::new(1.0, -2.0, 3.0), -Vector3d::y()),
        ]);
        let (min, max) = cloud.bounding_box();
        assert_eq!(min, Point3d::new(0.0, -2.0, 0.0));
        assert_eq!(max, Point3d::new(1.0, 2.0, 3.0));
    }
}

//! Point cloud data structures and functionality

use crate::point::*;
use serde::{Deserialize, Serialize};
use std::ops::{Index, IndexMut};

/// A generic point cloud container
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointCloud<T> {
    pub points: Vec<T>,
}

/// A point cloud with 3D points
pub type PointCloud3d = PointCloud<Point3d>;

/// A point cloud with normal vectors
pub type NormalPointCloud3d = PointCloud<NormalPoint3d>;

impl<T> PointCloud<T> {
    /// Create a new empty point cloud
    pub fn new() -> Self {
        Self { points: Vec::new() }
    }

    /// Create a new point cloud with specified capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            points: Vec::with_capacity(capacity),
        }
    }

    /// Create a point cloud from a vector of points
    pub fn from_points(points: Vec<T>) -> Self {
        Self { points }
    }

    /// Get the number of points in the cloud
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Check if the point cloud is empty
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Add a point to the cloud
    pub fn push(&mut self, point: T) {
        self.points.push(point);
    }

    /// Get an iterator over the points
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.points.iter()
    }
}

impl PointCloud<NormalPoint3d> {
    /// Build an oriented cloud from parallel position and normal arrays
    pub fn from_positions_and_normals(positions: &[Point3d], normals: &[Vector3d]) -> crate::Result<Self> {
        if positions.len() != normals.len() {
            return Err(crate::Error::InvalidData(format!(
                "{} positions but {} normals",
                positions.len(),
                normals.len()
            )));
        }

        Ok(positions
            .iter()
            .zip(normals)
            .map(|(p, n)| NormalPoint3d::new(*p, *n))
            .collect())
    }

    /// Positions only
    pub fn positions(&self) -> Vec<Point3d> {
        self.points.iter().map(|p| p.position).collect()
    }

    /// Uniformly scale every position about the origin; normals are unchanged.
    pub fn scaled(&self, factor: f64) -> Self {
        self.points
            .iter()
            .map(|p| NormalPoint3d::new(Point3d::from(p.position.coords * factor), p.normal))
            .collect()
    }
}

impl<T> Default for PointCloud<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Index<usize> for PointCloud<T> {
    type Output = T;

    fn index(&self, index: usize) -> &Self::Output {
        &self.points[index]
    }
}

impl<T> IndexMut<usize> for PointCloud<T> {
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        &mut self.points[index]
    }
}

impl<T> IntoIterator for PointCloud<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.points.into_iter()
    }
}

impl<'a, T> IntoIterator for &'a PointCloud<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.points.iter()
    }
}

impl<T> Extend<T> for PointCloud<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        self.points.extend(iter);
    }
}

impl<T> FromIterator<T> for PointCloud<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self {
            points: Vec::from_iter(iter),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_positions_and_normals() {
        let positions = vec![Point3d::new(0.0, 0.0, 0.0), Point3d::new(1.0, 0.0, 0.0)];
        let normals = vec![Vector3d::x(), Vector3d::y()];
        let cloud = PointCloud::from_positions_and_normals(&positions, &normals).unwrap();
        assert_eq!(cloud.len(), 2);
        assert_eq!(cloud[1].normal, Vector3d::y());

        assert!(PointCloud::from_positions_and_normals(&positions, &normals[..1]).is_err());
    }

    #[test]
    fn test_scaled_keeps_normals() {
        let cloud: NormalPointCloud3d =
            vec![NormalPoint3d::new(Point3d::new(1.0, 2.0, 3.0), Vector3d::z())].into_iter().collect();
        let scaled = cloud.scaled(2.0);
        assert_eq!(scaled[0].position, Point3d::new(2.0, 4.0, 6.0));
        assert_eq!(scaled[0].normal, Vector3d::z());
    }
}

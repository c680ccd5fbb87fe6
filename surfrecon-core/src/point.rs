//! Point types and related functionality

use crate::error::{Error, Result};
use bytemuck::{Pod, Zeroable};
use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};

/// A 3D point with double precision coordinates
pub type Point3d = Point3<f64>;

/// A 3D vector with double precision components
pub type Vector3d = Vector3<f64>;

/// Coordinate axis of a 3D point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    /// Convert an axis index (0, 1 or 2) into an axis
    pub fn from_index(index: usize) -> Result<Self> {
        match index {
            0 => Ok(Axis::X),
            1 => Ok(Axis::Y),
            2 => Ok(Axis::Z),
            _ => Err(Error::DimensionOutOfRange { index }),
        }
    }

    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }
}

/// Axis-indexed read access for 3D points and vectors
pub trait AxisAccess {
    /// Coordinate along `axis`
    fn coord(&self, axis: Axis) -> f64;

    /// Coordinate by raw index; indices other than 0, 1, 2 are rejected
    fn axis(&self, index: usize) -> Result<f64> {
        Ok(self.coord(Axis::from_index(index)?))
    }
}

impl AxisAccess for Point3d {
    #[inline]
    fn coord(&self, axis: Axis) -> f64 {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
            Axis::Z => self.z,
        }
    }
}

impl AxisAccess for Vector3d {
    #[inline]
    fn coord(&self, axis: Axis) -> f64 {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
            Axis::Z => self.z,
        }
    }
}

/// A point with normal vector
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[repr(C)]
pub struct NormalPoint3d {
    pub position: Point3d,
    pub normal: Vector3d,
}

unsafe impl Pod for NormalPoint3d {}
unsafe impl Zeroable for NormalPoint3d {}

impl NormalPoint3d {
    pub fn new(position: Point3d, normal: Vector3d) -> Self {
        Self { position, normal }
    }
}

impl Default for NormalPoint3d {
    fn default() -> Self {
        Self {
            position: Point3d::origin(),
            normal: Vector3d::new(0.0, 0.0, 1.0),
        }
    }
}

/// A point stored in a spatial index.
///
/// `index` refers back into the array the record was derived from, so
/// per-point attributes can be fetched after a query.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SampleRecord {
    pub position: Point3d,
    pub normal: Option<Vector3d>,
    pub index: Option<usize>,
}

impl SampleRecord {
    pub fn new(position: Point3d) -> Self {
        Self {
            position,
            normal: None,
            index: None,
        }
    }

    pub fn with_index(mut self, index: usize) -> Self {
        self.index = Some(index);
        self
    }

    pub fn with_normal(mut self, normal: Vector3d) -> Self {
        self.normal = Some(normal);
        self
    }

    /// Euclidean distance to `point`
    #[inline]
    pub fn distance(&self, point: &Point3d) -> f64 {
        (self.position - point).norm()
    }
}

impl From<Point3d> for SampleRecord {
    fn from(position: Point3d) -> Self {
        Self::new(position)
    }
}

impl From<NormalPoint3d> for SampleRecord {
    fn from(point: NormalPoint3d) -> Self {
        Self::new(point.position).with_normal(point.normal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_axis_access() {
        let p = Point3d::new(1.0, 2.0, 3.0);
        assert_eq!(p.axis(0).unwrap(), 1.0);
        assert_eq!(p.axis(1).unwrap(), 2.0);
        assert_eq!(p.axis(2).unwrap(), 3.0);
        assert!(matches!(p.axis(3), Err(Error::DimensionOutOfRange { index: 3 })));

        let v = Vector3d::new(-1.0, 0.5, 4.0);
        assert_eq!(v.coord(Axis::Z), 4.0);
    }

    #[test]
    fn test_axis_round_trip() {
        for axis in Axis::ALL {
            assert_eq!(Axis::from_index(axis.index()).unwrap(), axis);
        }
    }

    #[test]
    fn test_sample_record_builders() {
        let record = SampleRecord::new(Point3d::new(0.0, 0.0, 1.0))
            .with_index(7)
            .with_normal(Vector3d::z());
        assert_eq!(record.index, Some(7));
        assert_eq!(record.normal, Some(Vector3d::z()));
        assert_eq!(record.distance(&Point3d::origin()), 1.0);
    }

    #[test]
    fn test_normal_point_is_pod() {
        let points = [NormalPoint3d::default(); 2];
        let bytes: &[u8] = bytemuck::cast_slice(&points);
        assert_eq!(bytes.len(), 2 * 6 * std::mem::size_of::<f64>());
    }
}

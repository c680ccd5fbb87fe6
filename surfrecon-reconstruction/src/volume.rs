//! Quantized scalar volumes
//!
//! A [`Volume`] stores one `u16` sample per lattice point in x-fastest order,
//! so a single z-plane is a contiguous slice. Normalized values in `[0, 1]`
//! map linearly onto the full `u16` range.

use std::path::Path;

use surfrecon_core::{Axis, Error, Result};

/// Largest quantized sample
pub const QUANT_MAX: u16 = u16::MAX;

/// Quantize a value in `[0, 1]`; the fraction is truncated
#[inline]
pub fn quantize(value: f64) -> u16 {
    (value.clamp(0.0, 1.0) * QUANT_MAX as f64) as u16
}

/// Inverse of [`quantize`] up to truncation
#[inline]
pub fn dequantize(sample: u16) -> f64 {
    sample as f64 / QUANT_MAX as f64
}

/// Number of samples in a lattice, `None` when it does not fit in `usize`
fn sample_count(dimensions: [usize; 3]) -> Option<usize> {
    dimensions
        .iter()
        .try_fold(1usize, |count, &n| count.checked_mul(n))
}

/// 3D lattice of quantized scalar samples
#[derive(Debug, Clone, PartialEq)]
pub struct Volume {
    dimensions: [usize; 3],
    data: Vec<u16>,
}

impl Volume {
    /// Create a zero-filled volume. Every dimension must be positive.
    pub fn new(size_x: usize, size_y: usize, size_z: usize) -> Result<Self> {
        let dimensions = [size_x, size_y, size_z];
        if dimensions.contains(&0) {
            return Err(Error::DegenerateInput(format!(
                "volume dimensions {:?} must all be positive",
                dimensions
            )));
        }

        let Some(len) = sample_count(dimensions) else {
            return Err(Error::DegenerateInput(format!(
                "volume dimensions {:?} overflow the addressable sample count",
                dimensions
            )));
        };

        Ok(Self {
            dimensions,
            data: vec![0; len],
        })
    }

    /// Wrap existing samples in x-fastest order
    pub fn from_samples(dimensions: [usize; 3], data: Vec<u16>) -> Result<Self> {
        let mut volume = Self::new(dimensions[0], dimensions[1], dimensions[2])?;
        if data.len() != volume.data.len() {
            return Err(Error::InvalidData(format!(
                "{} samples do not fill a {}x{}x{} volume",
                data.len(),
                dimensions[0],
                dimensions[1],
                dimensions[2]
            )));
        }
        volume.data = data;
        Ok(volume)
    }

    /// Decode a headerless little-endian `u16` volume
    pub fn from_raw_bytes(bytes: &[u8], size_x: usize, size_y: usize, size_z: usize) -> Result<Self> {
        let dimensions = [size_x, size_y, size_z];
        let Some(expected) = sample_count(dimensions).and_then(|n| n.checked_mul(2)) else {
            return Err(Error::InvalidData(format!(
                "raw volume dimensions {:?} overflow the addressable byte count",
                dimensions
            )));
        };
        if bytes.len() != expected {
            return Err(Error::InvalidData(format!(
                "raw volume has {} bytes, expected {} for {}x{}x{}",
                bytes.len(),
                expected,
                size_x,
                size_y,
                size_z
            )));
        }

        let data = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        Self::from_samples(dimensions, data)
    }

    /// Load a headerless little-endian `u16` volume from disk
    pub fn read_raw<P: AsRef<Path>>(path: P, size_x: usize, size_y: usize, size_z: usize) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_raw_bytes(&bytes, size_x, size_y, size_z)
    }

    /// Encode as headerless little-endian `u16`
    pub fn to_raw_bytes(&self) -> Vec<u8> {
        self.data.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    /// Extent along a raw axis index
    pub fn size(&self, axis: usize) -> Result<usize> {
        Ok(self.dimensions[Axis::from_index(axis)?.index()])
    }

    pub fn dimensions(&self) -> [usize; 3] {
        self.dimensions
    }

    /// Total number of samples
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    fn offset(&self, x: usize, y: usize, z: usize) -> usize {
        (z * self.dimensions[1] + y) * self.dimensions[0] + x
    }

    fn contains(&self, x: usize, y: usize, z: usize) -> bool {
        x < self.dimensions[0] && y < self.dimensions[1] && z < self.dimensions[2]
    }

    /// Flat index of `(x, y, z)`, or `None` outside the volume
    pub fn index(&self, x: usize, y: usize, z: usize) -> Option<usize> {
        self.contains(x, y, z).then(|| self.offset(x, y, z))
    }

    /// Quantized sample at `(x, y, z)`
    pub fn get(&self, x: usize, y: usize, z: usize) -> Option<u16> {
        self.index(x, y, z).map(|i| self.data[i])
    }

    /// Sample at `(x, y, z)` mapped back to `[0, 1]`
    pub fn value(&self, x: usize, y: usize, z: usize) -> Option<f64> {
        self.get(x, y, z).map(dequantize)
    }

    /// Unchecked normalized read for callers that iterate inside the bounds
    #[inline]
    pub(crate) fn value_at(&self, x: usize, y: usize, z: usize) -> f64 {
        dequantize(self.data[self.offset(x, y, z)])
    }

    pub fn set(&mut self, x: usize, y: usize, z: usize, sample: u16) -> Result<()> {
        match self.index(x, y, z) {
            Some(i) => {
                self.data[i] = sample;
                Ok(())
            }
            None => Err(Error::InvalidData(format!(
                "volume coordinates ({}, {}, {}) out of bounds for dimensions {:?}",
                x, y, z, self.dimensions
            ))),
        }
    }

    /// Quantize and store a normalized value
    pub fn set_value(&mut self, x: usize, y: usize, z: usize, value: f64) -> Result<()> {
        self.set(x, y, z, quantize(value))
    }

    pub fn samples(&self) -> &[u16] {
        &self.data
    }

    /// Mutable z-planes, each `size_x * size_y` samples long
    pub fn planes_mut(&mut self) -> std::slice::ChunksExactMut<'_, u16> {
        let plane = self.dimensions[0] * self.dimensions[1];
        self.data.chunks_exact_mut(plane)
    }

    /// Mutable flat storage, for parallel writers that split it into planes themselves
    pub(crate) fn samples_mut(&mut self) -> &mut [u16] {
        &mut self.data
    }

    /// Fill from a function of lattice coordinates returning normalized values
    pub fn fill_with<F>(&mut self, f: F)
    where
        F: Fn(usize, usize, usize) -> f64,
    {
        let [nx, ny, _] = self.dimensions;
        for (z, plane) in self.planes_mut().enumerate() {
            for y in 0..ny {
                for x in 0..nx {
                    plane[y * nx + x] = quantize(f(x, y, z));
                }
            }
        }
    }
}

/// Volume holding a scaled signed distance to a sphere, in lattice units.
///
/// The normalized value is exactly `0.5` on the sphere, above it inside and
/// below it outside.
pub fn create_sphere_volume(dimensions: [usize; 3], center: [f64; 3], radius: f64) -> Result<Volume> {
    let mut volume = Volume::new(dimensions[0], dimensions[1], dimensions[2])?;
    let scale = 0.5 / dimensions.iter().copied().max().unwrap_or(1) as f64;
    volume.fill_with(|x, y, z| {
        let d = ((x as f64 - center[0]).powi(2)
            + (y as f64 - center[1]).powi(2)
            + (z as f64 - center[2]).powi(2))
        .sqrt();
        0.5 + (radius - d) * scale
    });
    Ok(volume)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volume_creation() {
        let volume = Volume::new(4, 3, 2).unwrap();
        assert_eq!(volume.dimensions(), [4, 3, 2]);
        assert_eq!(volume.len(), 24);
        assert_eq!(volume.size(0).unwrap(), 4);
        assert_eq!(volume.size(2).unwrap(), 2);
        assert!(matches!(volume.size(3), Err(Error::DimensionOutOfRange { index: 3 })));

        assert!(Volume::new(0, 3, 3).is_err());
    }

    #[test]
    fn test_oversized_dimensions_are_rejected() {
        assert!(matches!(
            Volume::new(1 << 22, 1 << 22, 1 << 22),
            Err(Error::DegenerateInput(_))
        ));
        assert!(matches!(
            Volume::new(usize::MAX, 2, 1),
            Err(Error::DegenerateInput(_))
        ));
        assert!(matches!(
            Volume::from_raw_bytes(&[], usize::MAX, 2, 1),
            Err(Error::InvalidData(_))
        ));
        // Sample count fits but the byte count does not
        assert!(matches!(
            Volume::from_raw_bytes(&[], usize::MAX, 1, 1),
            Err(Error::InvalidData(_))
        ));
    }

    #[test]
    fn test_volume_addressing() {
        let mut volume = Volume::new(4, 3, 2).unwrap();
        assert_eq!(volume.index(1, 2, 1), Some(21));
        assert_eq!(volume.index(4, 0, 0), None);

        volume.set(3, 2, 1, 1234).unwrap();
        assert_eq!(volume.get(3, 2, 1), Some(1234));
        assert_eq!(volume.samples()[23], 1234);
        assert!(volume.set(0, 3, 0, 1).is_err());
        assert_eq!(volume.get(0, 0, 2), None);
    }

    #[test]
    fn test_quantization() {
        assert_eq!(quantize(0.0), 0);
        assert_eq!(quantize(1.0), u16::MAX);
        assert_eq!(quantize(-3.0), 0);
        assert_eq!(quantize(2.0), u16::MAX);
        // A zero field sits just below the midpoint after truncation
        assert_eq!(quantize(0.5), 32767);
        assert!(dequantize(quantize(0.5)) < 0.5);
    }

    #[test]
    fn test_raw_round_trip() {
        let mut volume = Volume::new(2, 2, 2).unwrap();
        volume.set(1, 0, 0, 0x0102).unwrap();
        let bytes = volume.to_raw_bytes();
        assert_eq!(bytes.len(), 16);
        assert_eq!(&bytes[2..4], &[0x02, 0x01]);

        let decoded = Volume::from_raw_bytes(&bytes, 2, 2, 2).unwrap();
        assert_eq!(decoded, volume);

        assert!(matches!(
            Volume::from_raw_bytes(&bytes, 2, 2, 3),
            Err(Error::InvalidData(_))
        ));
    }

    #[test]
    fn test_read_raw_missing_file() {
        let result = Volume::read_raw("/nonexistent/volume.vol", 2, 2, 2);
        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[test]
    fn test_planes_are_contiguous_z_slices() {
        let mut volume = Volume::new(3, 2, 4).unwrap();
        for (z, plane) in volume.planes_mut().enumerate() {
            assert_eq!(plane.len(), 6);
            plane.fill(z as u16);
        }
        assert_eq!(volume.get(2, 1, 3), Some(3));
        assert_eq!(volume.get(0, 0, 1), Some(1));
    }

    #[test]
    fn test_sphere_volume() {
        let volume = create_sphere_volume([9, 9, 9], [4.0, 4.0, 4.0], 3.0).unwrap();
        assert!(volume.value(4, 4, 4).unwrap() > 0.5);
        assert!(volume.value(0, 0, 0).unwrap() < 0.5);
    }
}

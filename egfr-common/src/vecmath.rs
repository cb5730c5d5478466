use serde::{Deserialize, Serialize};
use std::ops::{Add, Sub, Mul, Div};

/// A simple 3D vector struct. Mesh coordinates are stored in metres.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    /// Creates a new Vec3.
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Vec3 { x, y, z }
    }

    /// Creates a zero vector.
    pub fn zero() -> Self {
        Vec3 { x: 0.0, y: 0.0, z: 0.0 }
    }

    /// Calculates the squared length (magnitude) of the vector.
    pub fn length_squared(&self) -> f64 {
        self.x * self.x + self.y * self.y + self.z * self.z
    }

    /// Calculates the length (magnitude) of the vector.
    pub fn length(&self) -> f64 {
        self.length_squared().sqrt()
    }

    /// Calculates the dot product with another vector.
    pub fn dot(&self, other: Vec3) -> f64 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    /// Calculates the cross product with another vector.
    pub fn cross(&self, other: Vec3) -> Vec3 {
        Vec3 {
            x: self.y * other.z - self.z * other.y,
            y: self.z * other.x - self.x * other.z,
            z: self.x * other.y - self.y * other.x,
        }
    }

    /// Calculates the distance to another vector (point).
    pub fn distance(&self, other: Vec3) -> f64 {
        (*self - other).length()
    }

    /// Component along a coordinate axis (0 = x, 1 = y, 2 = z).
    /// Returns `None` for any other axis index.
    pub fn component(&self, axis: usize) -> Option<f64> {
        match axis {
            0 => Some(self.x),
            1 => Some(self.y),
            2 => Some(self.z),
            _ => None,
        }
    }
}

impl Add for Vec3 {
    type Output = Self;
    fn add(self, other: Self) -> Self {
        Self { x: self.x + other.x, y: self.y + other.y, z: self.z + other.z }
    }
}

impl Sub for Vec3 {
    type Output = Self;
    fn sub(self, other: Self) -> Self {
        Self { x: self.x - other.x, y: self.y - other.y, z: self.z - other.z }
    }
}

impl Mul<f64> for Vec3 {
    type Output = Self;
    fn mul(self, scalar: f64) -> Self {
        Self { x: self.x * scalar, y: self.y * scalar, z: self.z * scalar }
    }
}

impl Div<f64> for Vec3 {
    type Output = Self;
    fn div(self, scalar: f64) -> Self {
        Self { x: self.x / scalar, y: self.y / scalar, z: self.z / scalar }
    }
}

/// Barycentre of a tetrahedron.
pub fn tet_centroid(a: Vec3, b: Vec3, c: Vec3, d: Vec3) -> Vec3 {
    (a + b + c + d) / 4.0
}

/// Unsigned volume of a tetrahedron.
pub fn tet_volume(a: Vec3, b: Vec3, c: Vec3, d: Vec3) -> f64 {
    (b - a).cross(c - a).dot(d - a).abs() / 6.0
}

/// Area of a triangle.
pub fn triangle_area(a: Vec3, b: Vec3, c: Vec3) -> f64 {
    (b - a).cross(c - a).length() * 0.5
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_tet_volume_is_one_sixth() {
        let v = tet_volume(
            Vec3::zero(),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(0.0, 1.0, 0.0),
            Vec3::new(0.0, 0.0, 1.0),
        );
        assert!((v - 1.0 / 6.0).abs() < 1e-12);
    }

    #[test]
    fn volume_ignores_orientation() {
        let a = Vec3::zero();
        let b = Vec3::new(1.0, 0.0, 0.0);
        let c = Vec3::new(0.0, 1.0, 0.0);
        let d = Vec3::new(0.0, 0.0, 1.0);
        assert_eq!(tet_volume(a, b, c, d), tet_volume(a, c, b, d));
    }

    #[test]
    fn right_triangle_area() {
        let area = triangle_area(Vec3::zero(), Vec3::new(2.0, 0.0, 0.0), Vec3::new(0.0, 2.0, 0.0));
        assert!((area - 2.0).abs() < 1e-12);
    }

    #[test]
    fn component_rejects_bad_axis() {
        let v = Vec3::new(1.0, 2.0, 3.0);
        assert_eq!(v.component(1), Some(2.0));
        assert_eq!(v.component(3), None);
    }
}

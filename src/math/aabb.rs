//! Axis-aligned bounding box

use crate::core::types::Vec3;

/// Axis-aligned bounding box defined by min and max corners
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    /// Create AABB from min and max corners
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Box spanning a square terrain chunk and its height range
    pub fn from_chunk(world_pos: [f32; 2], size: f32, min_max_height: [f32; 2]) -> Self {
        Self {
            min: Vec3::new(world_pos[0], min_max_height[0], world_pos[1]),
            max: Vec3::new(world_pos[0] + size, min_max_height[1], world_pos[1] + size),
        }
    }

    /// Get center point
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Get size (max - min)
    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    /// Check if point is inside AABB
    pub fn contains_point(&self, p: Vec3) -> bool {
        p.x >= self.min.x && p.x <= self.max.x &&
        p.y >= self.min.y && p.y <= self.max.y &&
        p.z >= self.min.z && p.z <= self.max.z
    }

    /// Check if two AABBs overlap with non-zero volume on the XZ plane
    pub fn overlaps_planar(&self, other: &Aabb) -> bool {
        self.min.x < other.max.x && self.max.x > other.min.x &&
        self.min.z < other.max.z && self.max.z > other.min.z
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_chunk() {
        let aabb = Aabb::from_chunk([10.0, 20.0], 5.0, [-1.0, 3.0]);
        assert_eq!(aabb.min, Vec3::new(10.0, -1.0, 20.0));
        assert_eq!(aabb.max, Vec3::new(15.0, 3.0, 25.0));
        assert_eq!(aabb.center(), Vec3::new(12.5, 1.0, 22.5));
    }

    #[test]
    fn test_contains_point() {
        let aabb = Aabb::new(Vec3::ZERO, Vec3::ONE);
        assert!(aabb.contains_point(Vec3::splat(0.5)));
        assert!(!aabb.contains_point(Vec3::splat(2.0)));
    }

    #[test]
    fn test_overlaps_planar_ignores_shared_edges() {
        let a = Aabb::from_chunk([0.0, 0.0], 1.0, [0.0, 1.0]);
        let b = Aabb::from_chunk([1.0, 0.0], 1.0, [0.0, 1.0]);
        let c = Aabb::from_chunk([0.5, 0.5], 1.0, [5.0, 6.0]);
        assert!(!a.overlaps_planar(&b));
        assert!(a.overlaps_planar(&c));
    }
}

//! View frustum for chunk culling

use crate::core::types::{Vec3, Vec4, Mat4};
use super::aabb::Aabb;

/// A plane defined by normal and distance from origin
#[derive(Clone, Copy, Debug)]
pub struct Plane {
    pub normal: Vec3,
    pub distance: f32,
}

impl Plane {
    pub fn new(normal: Vec3, distance: f32) -> Self {
        Self { normal, distance }
    }

    /// Signed distance from point to plane (positive = in front)
    pub fn distance_to_point(&self, point: Vec3) -> f32 {
        self.normal.dot(point) + self.distance
    }

    /// Packed (normal.xyz, distance) form consumed by the cull kernel
    pub fn to_vec4(&self) -> Vec4 {
        self.normal.extend(self.distance)
    }

    pub fn from_vec4(v: Vec4) -> Self {
        Self { normal: v.truncate(), distance: v.w }
    }
}

/// View frustum with 6 planes (Near, Far, Left, Right, Top, Bottom)
#[derive(Clone, Copy, Debug)]
pub struct Frustum {
    pub planes: [Plane; 6],
}

impl Frustum {
    /// Extract frustum planes from view-projection matrix (Gribb/Hartmann)
    pub fn from_view_projection(vp: &Mat4) -> Self {
        let rows = [vp.row(0), vp.row(1), vp.row(2), vp.row(3)];

        let near = Self::normalize_plane(rows[3] + rows[2]);
        let far = Self::normalize_plane(rows[3] - rows[2]);
        let left = Self::normalize_plane(rows[3] + rows[0]);
        let right = Self::normalize_plane(rows[3] - rows[0]);
        let top = Self::normalize_plane(rows[3] - rows[1]);
        let bottom = Self::normalize_plane(rows[3] + rows[1]);

        Self {
            planes: [near, far, left, right, top, bottom],
        }
    }

    /// Build from six packed planes as handed over by a render host
    pub fn from_planes(planes: &[Vec4; 6]) -> Self {
        Self {
            planes: planes.map(Plane::from_vec4),
        }
    }

    /// Packed planes for GPU upload
    pub fn to_vec4_array(&self) -> [Vec4; 6] {
        self.planes.map(|p| p.to_vec4())
    }

    fn normalize_plane(plane: Vec4) -> Plane {
        let normal = plane.truncate();
        let len = normal.length();
        if len > 0.0 {
            Plane {
                normal: normal / len,
                distance: plane.w / len,
            }
        } else {
            Plane::new(Vec3::ZERO, 0.0)
        }
    }

    /// Check if point is inside frustum
    pub fn contains_point(&self, point: Vec3) -> bool {
        self.planes.iter().all(|plane| plane.distance_to_point(point) >= 0.0)
    }

    /// Check if AABB intersects frustum (conservative test)
    pub fn intersects_aabb(&self, aabb: &Aabb) -> bool {
        for plane in &self.planes {
            // p-vertex: the corner furthest along the plane normal
            let p = Vec3::new(
                if plane.normal.x >= 0.0 { aabb.max.x } else { aabb.min.x },
                if plane.normal.y >= 0.0 { aabb.max.y } else { aabb.min.y },
                if plane.normal.z >= 0.0 { aabb.max.z } else { aabb.min.z },
            );

            if plane.distance_to_point(p) < 0.0 {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn looking_down_neg_z() -> Frustum {
        let proj = Mat4::perspective_rh(std::f32::consts::FRAC_PI_3, 1.0, 0.1, 100.0);
        Frustum::from_view_projection(&proj)
    }

    #[test]
    fn test_plane_distance() {
        let plane = Plane::new(Vec3::Y, 0.0);
        assert_eq!(plane.distance_to_point(Vec3::new(0.0, 5.0, 0.0)), 5.0);
        assert_eq!(plane.distance_to_point(Vec3::new(0.0, -3.0, 0.0)), -3.0);
    }

    #[test]
    fn test_planes_are_normalized() {
        let frustum = looking_down_neg_z();
        for plane in &frustum.planes {
            assert!((plane.normal.length() - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_aabb_in_front_and_behind() {
        let frustum = looking_down_neg_z();
        let front = Aabb::new(Vec3::new(-1.0, -1.0, -10.0), Vec3::new(1.0, 1.0, -5.0));
        let behind = Aabb::new(Vec3::new(-1.0, -1.0, 5.0), Vec3::new(1.0, 1.0, 10.0));
        let beyond_far = Aabb::new(Vec3::new(-1.0, -1.0, -200.0), Vec3::new(1.0, 1.0, -150.0));
        assert!(frustum.intersects_aabb(&front));
        assert!(!frustum.intersects_aabb(&behind));
        assert!(!frustum.intersects_aabb(&beyond_far));
    }

    #[test]
    fn test_packed_planes_round_trip_culling() {
        let frustum = looking_down_neg_z();
        let packed = frustum.to_vec4_array();
        let rebuilt = Frustum::from_planes(&packed);
        assert!(rebuilt.contains_point(Vec3::new(0.0, 0.0, -10.0)));
        assert!(!rebuilt.contains_point(Vec3::new(0.0, 0.0, 10.0)));
    }
}

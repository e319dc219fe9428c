use glam::{Mat4, Vec3, Vec4};

#[derive(Clone, Copy, Debug)]
pub struct Plane {
    pub normal: Vec3,
    pub distance: f32,
}

impl Plane {
    fn from_row(row: Vec4) -> Self {
        let normal = row.truncate();
        let length = normal.length();

        if length <= f32::EPSILON || !length.is_finite() {
            return Self {
                normal: Vec3::Z,
                distance: 0.0,
            };
        }

        Self {
            normal: normal / length,
            distance: row.w / length,
        }
    }

    #[inline]
    pub fn signed_distance(&self, point: Vec3) -> f32 {
        self.normal.dot(point) + self.distance
    }
}

pub struct Frustum {
    pub planes: [Plane; 6],
}

impl From<Mat4> for Frustum {
    fn from(view_proj: Mat4) -> Self {
        let r0 = view_proj.row(0);
        let r1 = view_proj.row(1);
        let r2 = view_proj.row(2);
        let r3 = view_proj.row(3);

        let left = Plane::from_row(r3 + r0);
        let right = Plane::from_row(r3 - r0);
        let bottom = Plane::from_row(r3 + r1);
        let top = Plane::from_row(r3 - r1);
        let near = Plane::from_row(r2); // wgpu (D3D/Metal, 0..1 Z)
        let far = Plane::from_row(r3 - r2);

        Frustum {
            planes: [left, right, bottom, top, near, far],
        }
    }
}

impl Frustum {
    pub fn intersects_bounding_box(&self, b: &BoundingBox) -> bool {
        const EPS: f32 = 1e-5;
        for pl in &self.planes {
            let mask = pl.normal.cmplt(Vec3::ZERO);
            let p = Vec3::select(mask, b.min, b.max);
            if pl.signed_distance(p) < -EPS {
                return false;
            }
        }
        true
    }
}

#[derive(Debug)]
pub struct Ray {
    pub origin: Vec3,
    pub direction: Vec3,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BoundingBox {
    pub min: Vec3,
    pub max: Vec3,
}

impl BoundingBox {
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Slab test. Returns the entry distance along the ray, 0.0 if the origin
    /// is inside the box, or [None] on a miss.
    pub fn intersect_ray(&self, ray: &Ray) -> Option<f32> {
        let mut t_min = 0.0_f32;
        let mut t_max = f32::INFINITY;

        for axis in 0..3 {
            let origin = ray.origin[axis];
            let dir = ray.direction[axis];
            let min = self.min[axis];
            let max = self.max[axis];

            if dir.abs() < 1e-8 {
                // Parallel to the slab; must already be inside it.
                if origin < min || origin > max {
                    return None;
                }
                continue;
            }

            let inv = 1.0 / dir;
            let (t0, t1) = {
                let a = (min - origin) * inv;
                let b = (max - origin) * inv;
                if a <= b { (a, b) } else { (b, a) }
            };

            t_min = t_min.max(t0);
            t_max = t_max.min(t1);

            if t_max < t_min {
                return None;
            }
        }

        Some(t_min)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ray_hits_box_from_above() {
        let b = BoundingBox {
            min: Vec3::new(0.0, 0.0, 0.0),
            max: Vec3::new(10.0, 10.0, 5.0),
        };
        let ray = Ray {
            origin: Vec3::new(5.0, 5.0, 20.0),
            direction: Vec3::new(0.0, 0.0, -1.0),
        };
        let t = b.intersect_ray(&ray).unwrap();
        assert!((t - 15.0).abs() < 1e-4);
    }

    #[test]
    fn ray_hits_flat_box() {
        // Zero-thickness box, as produced by a flat heightfield region.
        let b = BoundingBox {
            min: Vec3::new(0.0, 0.0, 0.0),
            max: Vec3::new(4.0, 4.0, 0.0),
        };
        let ray = Ray {
            origin: Vec3::new(2.0, 2.0, 100.0),
            direction: Vec3::new(0.0, 0.0, -1.0),
        };
        let t = b.intersect_ray(&ray).unwrap();
        assert!((t - 100.0).abs() < 1e-3);
    }

    #[test]
    fn ray_misses_box() {
        let b = BoundingBox {
            min: Vec3::ZERO,
            max: Vec3::splat(1.0),
        };
        let ray = Ray {
            origin: Vec3::new(5.0, 5.0, 5.0),
            direction: Vec3::new(0.0, 0.0, -1.0),
        };
        assert!(b.intersect_ray(&ray).is_none());
    }

    #[test]
    fn ray_origin_inside_box() {
        let b = BoundingBox {
            min: Vec3::ZERO,
            max: Vec3::splat(2.0),
        };
        let ray = Ray {
            origin: Vec3::splat(1.0),
            direction: Vec3::X,
        };
        assert_eq!(b.intersect_ray(&ray), Some(0.0));
    }

    #[test]
    fn frustum_from_orthographic_contains_origin_box() {
        let proj = Mat4::orthographic_rh(-10.0, 10.0, -10.0, 10.0, 0.1, 100.0);
        let view = Mat4::look_at_rh(Vec3::new(0.0, 0.0, 50.0), Vec3::ZERO, Vec3::Y);
        let frustum = Frustum::from(proj * view);

        let inside = BoundingBox {
            min: Vec3::splat(-1.0),
            max: Vec3::splat(1.0),
        };
        assert!(frustum.intersects_bounding_box(&inside));

        let outside = BoundingBox {
            min: Vec3::new(100.0, 100.0, 0.0),
            max: Vec3::new(101.0, 101.0, 1.0),
        };
        assert!(!frustum.intersects_bounding_box(&outside));
    }
}

use glam::{Mat4, Vec3, Vec4};

use crate::depth::DepthRange;
use crate::error::DepthRangeError;

/// Pose and projection of the camera a frame is captured from.
///
/// Captures reuse the host's camera verbatim so every extra pass lines up
/// pixel-for-pixel with the main view. Right-handed, `-Z` forward, depth in
/// `[0, 1]`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CameraState {
    pub position: Vec3,
    pub forward: Vec3,
    pub up: Vec3,
    /// Vertical field of view in radians.
    pub fov_y: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for CameraState {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 0.0, 5.0),
            forward: Vec3::NEG_Z,
            up: Vec3::Y,
            fov_y: 70f32.to_radians(),
            aspect: 1.0,
            near: 0.05,
            far: 256.0,
        }
    }
}

impl CameraState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at(mut self, position: Vec3) -> Self {
        self.position = position;
        self
    }

    pub fn looking_at(mut self, target: Vec3) -> Self {
        let dir = target - self.position;
        if dir.length_squared() > 0.0 {
            self.forward = dir.normalize();
        }
        self
    }

    pub fn with_fov(mut self, fov_degrees: f32) -> Self {
        self.fov_y = fov_degrees.to_radians();
        self
    }

    pub fn with_aspect(mut self, aspect: f32) -> Self {
        self.aspect = aspect;
        self
    }

    /// Aspect ratio from a viewport size.
    pub fn with_viewport(self, width: u32, height: u32) -> Self {
        self.with_aspect(width as f32 / height.max(1) as f32)
    }

    pub fn with_clip(mut self, near: f32, far: f32) -> Self {
        self.near = near;
        self.far = far;
        self
    }

    /// Same camera moved by `offset` in world space.
    pub fn translated(mut self, offset: Vec3) -> Self {
        self.position += offset;
        self
    }

    pub fn view(&self) -> Mat4 {
        Mat4::look_to_rh(self.position, self.forward, self.up)
    }

    pub fn projection(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov_y, self.aspect, self.near, self.far)
    }

    pub fn view_projection(&self) -> Mat4 {
        self.projection() * self.view()
    }

    pub fn depth_range(&self) -> Result<DepthRange, DepthRangeError> {
        DepthRange::new(self.near, self.far)
    }

    pub fn frustum(&self) -> Frustum {
        Frustum::from_view_projection(self.view_projection())
    }
}

/// Six clip planes, normals pointing inward.
#[derive(Clone, Copy, Debug)]
pub struct Frustum {
    planes: [Vec4; 6],
}

impl Frustum {
    /// Extracts planes from a `[0, 1]`-depth view-projection matrix.
    pub fn from_view_projection(m: Mat4) -> Self {
        let (r0, r1, r2, r3) = (m.row(0), m.row(1), m.row(2), m.row(3));
        let planes = [r3 + r0, r3 - r0, r3 + r1, r3 - r1, r2, r3 - r2].map(|p| {
            let len = p.truncate().length();
            if len > 0.0 { p / len } else { p }
        });
        Self { planes }
    }

    pub fn contains_point(&self, p: Vec3) -> bool {
        self.planes.iter().all(|pl| pl.truncate().dot(p) + pl.w >= 0.0)
    }

    /// Conservative box test: false only when the box is fully outside one
    /// plane.
    pub fn intersects_aabb(&self, min: Vec3, max: Vec3) -> bool {
        self.planes.iter().all(|pl| {
            let n = pl.truncate();
            let positive = Vec3::select(n.cmpge(Vec3::ZERO), max, min);
            n.dot(positive) + pl.w >= 0.0
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frustum_sees_what_is_in_front() {
        let cam = CameraState::new().at(Vec3::ZERO).looking_at(Vec3::new(0.0, 0.0, -1.0));
        let frustum = cam.frustum();
        assert!(frustum.contains_point(Vec3::new(0.0, 0.0, -10.0)));
        assert!(!frustum.contains_point(Vec3::new(0.0, 0.0, 10.0)));
        assert!(!frustum.contains_point(Vec3::new(0.0, 0.0, -1000.0)));
        assert!(frustum.intersects_aabb(Vec3::new(-1.0, -1.0, -6.0), Vec3::new(1.0, 1.0, -4.0)));
        assert!(!frustum.intersects_aabb(Vec3::new(-1.0, -1.0, 4.0), Vec3::new(1.0, 1.0, 6.0)));
        assert!(!frustum.intersects_aabb(Vec3::new(100.0, -1.0, -6.0), Vec3::new(101.0, 1.0, -4.0)));
    }

    #[test]
    fn straddling_box_intersects() {
        let frustum = CameraState::new().at(Vec3::ZERO).frustum();
        assert!(frustum.intersects_aabb(Vec3::splat(-1.0), Vec3::splat(1.0)));
    }

    #[test]
    fn depth_range_follows_clip_planes() {
        let cam = CameraState::new().with_clip(0.1, 50.0);
        let range = cam.depth_range().unwrap();
        assert_eq!((range.near(), range.far()), (0.1, 50.0));
        assert!(CameraState::new().with_clip(1.0, 0.5).depth_range().is_err());
    }
}

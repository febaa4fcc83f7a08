//! Matrix-history optical flow.
//!
//! The flow pass re-projects every vertex through both the previous and the
//! current camera, and encodes the screen-space displacement as the vertex
//! color. Only camera motion and per-object transforms feed the displacement;
//! nothing is tracked across frames beyond the last view and projection.
//!
//! Displacement is in pixels with x pointing right and y pointing down, so a
//! camera moving toward `+x` makes static geometry move left (negative dx).
//!
//! | Channel | Meaning                                     |
//! |---------|---------------------------------------------|
//! | R       | `128 + dx * gain`, clamped to `[0, 255]`    |
//! | G       | `128 + dy * gain`, clamped to `[0, 255]`    |
//! | B       | 255 where motion is valid                   |
//!
//! Background pixels are `(0, 0, 0)`. On the first capture there is no
//! history and the whole image is [`FLOW_NO_HISTORY`]. Triangles with a
//! vertex that cannot be projected in both frames are not drawn, so the
//! blue channel of a drawn pixel is always 255.

use glam::{Mat4, Vec2, Vec3};

use crate::color::Rgb;
use crate::vertex::FlatVertex;

/// Flow value for pixels without geometry.
pub const FLOW_BACKGROUND: Rgb = Rgb::BACKGROUND;

/// Flow value when there is no previous frame, or a vertex cannot be
/// projected in one of the two frames.
pub const FLOW_NO_HISTORY: Rgb = Rgb::new(128, 128, 0);

/// Blue channel of a flow color that carries motion.
pub const FLOW_VALID: u8 = 255;

/// Default encoding gain, in color levels per pixel of displacement.
pub const DEFAULT_FLOW_GAIN: f32 = 1.0;

/// Camera matrices of one captured frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MotionFrameState {
    pub view: Mat4,
    pub projection: Mat4,
}

impl MotionFrameState {
    pub fn view_projection(&self) -> Mat4 {
        self.projection * self.view
    }
}

/// The previous frame's camera, overwritten after each successful capture.
#[derive(Clone, Copy, Debug, Default)]
pub struct MotionHistory {
    previous: Option<MotionFrameState>,
}

impl MotionHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, view: Mat4, projection: Mat4) {
        self.previous = Some(MotionFrameState { view, projection });
    }

    pub fn previous(&self) -> Option<&MotionFrameState> {
        self.previous.as_ref()
    }

    pub fn reset(&mut self) {
        self.previous = None;
    }
}

fn to_pixels(view_projection: Mat4, world: Vec3, viewport: (u32, u32)) -> Option<Vec2> {
    let clip = view_projection * world.extend(1.0);
    if clip.w <= f32::EPSILON {
        return None;
    }
    let ndc = clip.truncate() / clip.w;
    let (w, h) = (viewport.0 as f32, viewport.1 as f32);
    Some(Vec2::new(
        (ndc.x * 0.5 + 0.5) * w,
        (0.5 - ndc.y * 0.5) * h,
    ))
}

/// Pixel displacement of `local_position` between two camera states.
///
/// Returns `None` when the point is behind the camera in either frame.
#[allow(clippy::too_many_arguments)]
pub fn compute_flow(
    prev_view: Mat4,
    prev_proj: Mat4,
    curr_view: Mat4,
    curr_proj: Mat4,
    object_to_world: Mat4,
    local_position: Vec3,
    viewport: (u32, u32),
) -> Option<Vec2> {
    let world = object_to_world.transform_point3(local_position);
    let prev = to_pixels(prev_proj * prev_view, world, viewport)?;
    let curr = to_pixels(curr_proj * curr_view, world, viewport)?;
    Some(curr - prev)
}

/// Encodes a displacement as a flow color.
pub fn encode_flow(delta: Vec2, gain: f32) -> Rgb {
    let channel = |d: f32| (128.0 + d * gain).round().clamp(0.0, 255.0) as u8;
    Rgb::new(channel(delta.x), channel(delta.y), FLOW_VALID)
}

/// Keeps the triangles whose three vertices all carry valid motion.
pub fn retain_projected(vertices: Vec<FlatVertex>) -> Vec<FlatVertex> {
    if vertices.iter().all(|v| v.color[2] == FLOW_VALID) {
        return vertices;
    }
    vertices
        .chunks_exact(3)
        .filter(|tri| tri.iter().all(|v| v.color[2] == FLOW_VALID))
        .flatten()
        .copied()
        .collect()
}

/// Per-frame flow parameters shared by every object in the flow pass.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FlowFrame {
    pub previous: MotionFrameState,
    pub current: MotionFrameState,
    pub viewport: (u32, u32),
    pub gain: f32,
}

impl FlowFrame {
    /// Projector for one object placed by `object_to_world`.
    pub fn projector(&self, object_to_world: Mat4) -> FlowProjector {
        FlowProjector {
            previous: self.previous.view_projection(),
            current: self.current.view_projection(),
            object_to_world,
            viewport: self.viewport,
            gain: self.gain,
        }
    }
}

/// Computes flow colors for the vertices of one object.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FlowProjector {
    previous: Mat4,
    current: Mat4,
    object_to_world: Mat4,
    viewport: (u32, u32),
    gain: f32,
}

impl FlowProjector {
    pub fn displacement(&self, local_position: Vec3) -> Option<Vec2> {
        let world = self.object_to_world.transform_point3(local_position);
        let prev = to_pixels(self.previous, world, self.viewport)?;
        let curr = to_pixels(self.current, world, self.viewport)?;
        Some(curr - prev)
    }

    pub fn color(&self, local_position: Vec3) -> Rgb {
        match self.displacement(local_position) {
            Some(delta) => encode_flow(delta, self.gain),
            None => FLOW_NO_HISTORY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::CameraState;

    fn camera() -> CameraState {
        CameraState::new().at(Vec3::new(0.0, 0.0, 5.0)).with_viewport(64, 64)
    }

    #[test]
    fn static_camera_has_zero_flow() {
        let cam = camera();
        let flow = compute_flow(
            cam.view(),
            cam.projection(),
            cam.view(),
            cam.projection(),
            Mat4::IDENTITY,
            Vec3::new(0.3, -0.2, 0.0),
            (64, 64),
        )
        .unwrap();
        assert!(flow.length() < 1e-4);
        assert_eq!(encode_flow(flow, 1.0), Rgb::new(128, 128, 255));
    }

    #[test]
    fn camera_moving_right_moves_pixels_left() {
        let prev = camera();
        let curr = prev.translated(Vec3::X * 0.5);
        let flow = compute_flow(
            prev.view(),
            prev.projection(),
            curr.view(),
            curr.projection(),
            Mat4::IDENTITY,
            Vec3::ZERO,
            (64, 64),
        )
        .unwrap();
        assert!(flow.x < -1.0, "dx = {}", flow.x);
        assert!(flow.y.abs() < 1e-3);
        assert!(encode_flow(flow, DEFAULT_FLOW_GAIN).r < 128);
    }

    #[test]
    fn camera_moving_up_moves_pixels_down() {
        let prev = camera();
        let curr = prev.translated(Vec3::Y * 0.5);
        let flow = compute_flow(
            prev.view(),
            prev.projection(),
            curr.view(),
            curr.projection(),
            Mat4::IDENTITY,
            Vec3::ZERO,
            (64, 64),
        )
        .unwrap();
        assert!(flow.y > 1.0, "dy = {}", flow.y);
    }

    #[test]
    fn points_behind_the_camera_have_no_flow() {
        let cam = camera();
        let flow = compute_flow(
            cam.view(),
            cam.projection(),
            cam.view(),
            cam.projection(),
            Mat4::IDENTITY,
            Vec3::new(0.0, 0.0, 10.0),
            (64, 64),
        );
        assert_eq!(flow, None);
    }

    #[test]
    fn encoding_clamps() {
        assert_eq!(encode_flow(Vec2::new(-1000.0, 1000.0), 1.0), Rgb::new(0, 255, 255));
        assert_eq!(encode_flow(Vec2::new(2.0, -3.0), 2.0), Rgb::new(132, 122, 255));
    }

    #[test]
    fn history_overwrites_and_resets() {
        let mut history = MotionHistory::new();
        assert!(history.previous().is_none());
        history.update(Mat4::IDENTITY, Mat4::IDENTITY);
        let moved = Mat4::from_translation(Vec3::X);
        history.update(moved, Mat4::IDENTITY);
        assert_eq!(history.previous().unwrap().view, moved);
        history.reset();
        assert!(history.previous().is_none());
    }

    #[test]
    fn projector_matches_free_function() {
        let prev = camera();
        let curr = prev.translated(Vec3::new(0.2, 0.1, 0.0));
        let frame = FlowFrame {
            previous: MotionFrameState {
                view: prev.view(),
                projection: prev.projection(),
            },
            current: MotionFrameState {
                view: curr.view(),
                projection: curr.projection(),
            },
            viewport: (64, 64),
            gain: 1.0,
        };
        let model = Mat4::from_translation(Vec3::new(0.5, 0.0, -1.0));
        let local = Vec3::new(0.1, 0.2, 0.3);
        let expected = compute_flow(
            prev.view(),
            prev.projection(),
            curr.view(),
            curr.projection(),
            model,
            local,
            (64, 64),
        );
        assert_eq!(frame.projector(model).displacement(local), expected);
    }

    #[test]
    fn triangles_with_unprojected_vertices_are_dropped() {
        let vertex = |rgb: Rgb| FlatVertex {
            color: rgb.to_rgba(),
            ..Default::default()
        };
        let moving = vertex(encode_flow(Vec2::new(-3.0, 0.0), 1.0));
        let behind = vertex(FLOW_NO_HISTORY);

        let kept = retain_projected(vec![moving, moving, moving, moving, behind, moving]);
        assert_eq!(kept, vec![moving; 3]);
        assert_eq!(retain_projected(vec![moving; 6]).len(), 6);
    }
}

// SPDX-License-Identifier: CEPL-1.0
//! Turntable camera around the demo triangle.
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use glam::{Mat4, Vec3};
use vkswap_render::ViewListener;

pub struct Camera {
    aspect: f32,
    angle: f32,
    /// Radians per second.
    speed: f32,
    mvp: Rc<Cell<Mat4>>,
}

impl Camera {
    pub fn new(mvp: Rc<Cell<Mat4>>) -> Self {
        let camera = Self {
            aspect: 16.0 / 9.0,
            angle: 0.0,
            speed: 1.0,
            mvp,
        };
        camera.publish();
        camera
    }

    pub fn advance(&mut self, dt: Duration) {
        self.angle = (self.angle + self.speed * dt.as_secs_f32()) % std::f32::consts::TAU;
        self.publish();
    }

    pub fn aspect(&self) -> f32 {
        self.aspect
    }

    fn matrix(&self) -> Mat4 {
        let proj = Mat4::perspective_rh(45f32.to_radians(), self.aspect, 0.1, 10.0);
        let view = Mat4::look_at_rh(Vec3::new(0.0, 0.0, 2.5), Vec3::ZERO, Vec3::Y);
        let model = Mat4::from_rotation_y(self.angle);
        // Vulkan clip space has y pointing down
        let flip = Mat4::from_scale(Vec3::new(1.0, -1.0, 1.0));
        flip * proj * view * model
    }

    fn publish(&self) {
        self.mvp.set(self.matrix());
    }
}

/// The presenter-facing end of a shared camera.
pub struct CameraLink(pub Rc<RefCell<Camera>>);

impl ViewListener for CameraLink {
    fn aspect_ratio_changed(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        let mut camera = self.0.borrow_mut();
        camera.aspect = width as f32 / height as f32;
        camera.publish();
    }

    fn view_changed(&mut self) {
        self.0.borrow().publish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shared() -> (Rc<Cell<Mat4>>, Rc<RefCell<Camera>>) {
        let mvp = Rc::new(Cell::new(Mat4::IDENTITY));
        let camera = Rc::new(RefCell::new(Camera::new(mvp.clone())));
        (mvp, camera)
    }

    #[test]
    fn new_camera_publishes_immediately() {
        let (mvp, _camera) = shared();
        assert_ne!(mvp.get(), Mat4::IDENTITY);
    }

    #[test]
    fn origin_projects_to_screen_centre() {
        let (mvp, _camera) = shared();
        let p = mvp.get().project_point3(Vec3::ZERO);
        assert!(p.x.abs() < 1e-5 && p.y.abs() < 1e-5);
        assert!((0.0..=1.0).contains(&p.z));
    }

    #[test]
    fn resize_updates_aspect_and_matrix() {
        let (mvp, camera) = shared();
        let before = mvp.get();
        let mut link = CameraLink(camera.clone());
        link.aspect_ratio_changed(800, 800);
        assert_eq!(camera.borrow().aspect(), 1.0);
        assert_ne!(mvp.get(), before);
    }

    #[test]
    fn zero_height_is_ignored() {
        let (mvp, camera) = shared();
        let before = mvp.get();
        CameraLink(camera.clone()).aspect_ratio_changed(800, 0);
        assert_eq!(camera.borrow().aspect(), 16.0 / 9.0);
        assert_eq!(mvp.get(), before);
    }

    #[test]
    fn advancing_rotates() {
        let (mvp, camera) = shared();
        let before = mvp.get();
        camera.borrow_mut().advance(Duration::from_millis(250));
        assert_ne!(mvp.get(), before);
    }
}

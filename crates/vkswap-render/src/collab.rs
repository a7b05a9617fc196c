// SPDX-License-Identifier: CEPL-1.0
//! Interfaces to the components that consume swapchain images without
//! taking part in their lifecycle: the scene, the camera, the text overlay.
use ash::vk;

use crate::device::PresentDevice;
use crate::error::PresentError;

/// What the scene needs to build render-pass compatible objects.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TargetInfo {
    pub color_format: vk::Format,
    pub depth_format: vk::Format,
    pub extent: vk::Extent2D,
    pub image_count: u32,
}

/// The image a frame renders into.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameTarget {
    pub index: u32,
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub framebuffer: vk::Framebuffer,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FrameStats {
    pub total_frames: u64,
    pub fps: f32,
    pub frame_time_ms: f32,
}

/// Owns the render pass, pipelines and geometry.
pub trait SceneRenderer<D: PresentDevice> {
    /// Called on first prepare and whenever the color format changes.
    fn prepare(&mut self, device: &mut D, info: &TargetInfo) -> Result<vk::RenderPass, PresentError>;

    /// Records draw calls between begin and end of the render pass.
    fn record(&mut self, device: &mut D, cmd: vk::CommandBuffer, frame: &FrameTarget);

    /// Whether the pipeline declared viewport and scissor dynamic.
    fn dynamic_viewport(&self) -> bool {
        true
    }

    fn clear_color(&self) -> [f32; 4] {
        [0.02, 0.02, 0.04, 1.0]
    }

    /// Destroys everything `prepare` created.
    fn release(&mut self, device: &mut D);
}

/// Camera/input side, told about the new surface size after each resize.
pub trait ViewListener {
    fn aspect_ratio_changed(&mut self, width: u32, height: u32);
    fn view_changed(&mut self) {}
}

/// Debug/text overlay rendered after the scene, before present.
pub trait OverlayListener<D: PresentDevice> {
    /// Called after every rebuild; `frames` has one entry per swapchain image.
    fn reallocate_command_buffers(
        &mut self,
        device: &mut D,
        frames: &[FrameTarget],
    ) -> Result<(), PresentError>;

    /// `None` while the overlay is hidden.
    fn command_buffer(&self, image_index: u32) -> Option<vk::CommandBuffer>;

    fn update(&mut self, title: &str, stats: &FrameStats);

    fn release(&mut self, device: &mut D);
}

// SPDX-License-Identifier: CEPL-1.0
//! The GPU seam of the present core.
//!
//! Handles are plain `ash::vk` handles. Implementations own the instance,
//! surface, device, queue and command pool; the core only ever asks for the
//! objects listed here and gives each of them back exactly once.
use ash::prelude::VkResult;
use ash::vk;

use crate::swapchain::SwapchainConfig;

/// Depth/stencil attachment sized to the window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DepthTarget {
    pub image: vk::Image,
    pub memory: vk::DeviceMemory,
    pub view: vk::ImageView,
    pub format: vk::Format,
}

/// One queue submission. `cmd == None` submits an empty batch, which is how
/// a signaled semaphore is consumed without doing any work.
#[derive(Clone, Copy, Debug)]
pub struct Submission {
    pub cmd: Option<vk::CommandBuffer>,
    pub wait: vk::Semaphore,
    pub wait_stage: vk::PipelineStageFlags,
    pub signal: Option<vk::Semaphore>,
    pub fence: vk::Fence,
}

pub trait PresentDevice {
    // surface
    fn surface_capabilities(&self) -> VkResult<vk::SurfaceCapabilitiesKHR>;
    fn surface_formats(&self) -> VkResult<Vec<vk::SurfaceFormatKHR>>;
    fn surface_present_modes(&self) -> VkResult<Vec<vk::PresentModeKHR>>;
    fn format_features(&self, format: vk::Format) -> vk::FormatFeatureFlags;
    fn depth_format(&self) -> vk::Format;

    // swapchain and attachments
    fn create_swapchain(
        &mut self,
        config: &SwapchainConfig,
        old: vk::SwapchainKHR,
    ) -> VkResult<vk::SwapchainKHR>;
    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>>;
    fn destroy_swapchain(&mut self, swapchain: vk::SwapchainKHR);
    fn create_image_view(&mut self, image: vk::Image, format: vk::Format)
        -> VkResult<vk::ImageView>;
    fn destroy_image_view(&mut self, view: vk::ImageView);
    fn create_framebuffer(
        &mut self,
        render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> VkResult<vk::Framebuffer>;
    fn destroy_framebuffer(&mut self, framebuffer: vk::Framebuffer);
    fn create_depth_target(&mut self, extent: vk::Extent2D) -> VkResult<DepthTarget>;
    fn destroy_depth_target(&mut self, depth: DepthTarget);

    // command buffers
    fn allocate_command_buffers(&mut self, count: u32) -> VkResult<Vec<vk::CommandBuffer>>;
    fn free_command_buffers(&mut self, buffers: &[vk::CommandBuffer]);
    /// Resets and begins `cmd`.
    fn begin_commands(&mut self, cmd: vk::CommandBuffer) -> VkResult<()>;
    fn begin_render_pass(
        &mut self,
        cmd: vk::CommandBuffer,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear: &[vk::ClearValue],
    );
    fn set_viewport_scissor(&mut self, cmd: vk::CommandBuffer, extent: vk::Extent2D);
    fn end_render_pass(&mut self, cmd: vk::CommandBuffer);
    fn end_commands(&mut self, cmd: vk::CommandBuffer) -> VkResult<()>;

    // synchronization
    fn create_semaphore(&mut self) -> VkResult<vk::Semaphore>;
    fn destroy_semaphore(&mut self, semaphore: vk::Semaphore);
    fn create_fence(&mut self, signaled: bool) -> VkResult<vk::Fence>;
    fn destroy_fence(&mut self, fence: vk::Fence);
    fn wait_and_reset_fence(&mut self, fence: vk::Fence) -> VkResult<()>;

    // queue
    /// Returns the image index and the suboptimal flag.
    fn acquire_next_image(
        &mut self,
        swapchain: vk::SwapchainKHR,
        timeout_ns: u64,
        signal: vk::Semaphore,
    ) -> VkResult<(u32, bool)>;
    fn submit(&mut self, submission: &Submission) -> VkResult<()>;
    /// Returns the suboptimal flag.
    fn present(
        &mut self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> VkResult<bool>;
    fn queue_wait_idle(&mut self) -> VkResult<()>;
    fn device_wait_idle(&mut self) -> VkResult<()>;
}

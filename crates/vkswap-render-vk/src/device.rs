// SPDX-License-Identifier: CEPL-1.0
//! The `ash` side of [`PresentDevice`]: instance, surface, logical device,
//! one graphics+present queue and its command pool.
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use ash::khr::{surface, swapchain};
use ash::prelude::VkResult;
use ash::{vk, Entry, Instance};
use tracing::{debug, info, warn};
use vkswap_core::DiagnosticSink;
use vkswap_platform::{VkHost, WindowBackend};
use vkswap_render::{DepthTarget, PresentDevice, Submission, SwapchainConfig};

use crate::instance::{create_instance, DebugBridge};

#[derive(Clone, Copy, Debug, Default)]
pub struct DeviceOptions {
    pub validation: bool,
    /// Index into the physical device list; `None` takes the first usable.
    pub gpu: Option<usize>,
}

// Prefer 32f, then 24+S8, then 16.
const DEPTH_CANDIDATES: [vk::Format; 4] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D24_UNORM_S8_UINT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D16_UNORM,
];

pub(crate) fn choose_depth_format(
    optimal_features: impl Fn(vk::Format) -> vk::FormatFeatureFlags,
) -> vk::Format {
    DEPTH_CANDIDATES
        .into_iter()
        .find(|&f| optimal_features(f).contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT))
        .unwrap_or(vk::Format::D32_SFLOAT)
}

pub(crate) fn find_memory_type(
    props: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> Option<u32> {
    (0..props.memory_type_count).find(|&i| {
        type_bits & (1 << i) != 0
            && props.memory_types[i as usize]
                .property_flags
                .contains(required)
    })
}

pub(crate) fn full_rect(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D::default(),
        extent,
    }
}

/// Instance-level objects. Dropped after the device, so the surface goes
/// after the device and the instance goes last.
struct InstanceScope {
    entry: Entry,
    instance: Instance,
    debug: Option<DebugBridge>,
    surface_loader: surface::Instance,
    surface: vk::SurfaceKHR,
}

impl InstanceScope {
    fn host(&self) -> VkHost<'_> {
        VkHost {
            entry: &self.entry,
            instance: &self.instance,
        }
    }
}

impl Drop for InstanceScope {
    fn drop(&mut self) {
        unsafe {
            if self.surface != vk::SurfaceKHR::null() {
                self.surface_loader.destroy_surface(self.surface, None);
            }
            if let Some(debug) = self.debug.take() {
                debug.destroy();
            }
            self.instance.destroy_instance(None);
        }
        debug!("instance destroyed");
    }
}

unsafe fn pick_device_and_queue(
    scope: &InstanceScope,
    backend: &dyn WindowBackend,
    gpu: Option<usize>,
) -> Result<(vk::PhysicalDevice, u32)> {
    let instance = &scope.instance;
    let devices = unsafe { instance.enumerate_physical_devices() }
        .context("vkEnumeratePhysicalDevices")?;
    for (i, &phys) in devices.iter().enumerate() {
        if gpu.is_some_and(|g| g != i) {
            continue;
        }
        let props = unsafe { instance.get_physical_device_properties(phys) };
        let name = props
            .device_name_as_c_str()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let qprops = unsafe { instance.get_physical_device_queue_family_properties(phys) };
        for (qf, q) in qprops.iter().enumerate() {
            let qf = qf as u32;
            let surface_ok = unsafe {
                scope
                    .surface_loader
                    .get_physical_device_surface_support(phys, qf, scope.surface)
            }
            .unwrap_or(false);
            if q.queue_flags.contains(vk::QueueFlags::GRAPHICS)
                && surface_ok
                && backend.check_presentation_support(&scope.host(), phys, qf)
            {
                info!("gpu {i}: {name}, queue family {qf}");
                return Ok((phys, qf));
            }
        }
        debug!("gpu {i}: {name} cannot present to this surface");
    }
    match gpu {
        Some(g) => Err(anyhow!("gpu {g} is missing or cannot present ({} found)", devices.len())),
        None => Err(anyhow!("no physical device can present to this surface")),
    }
}

pub struct AshDevice {
    physical_device: vk::PhysicalDevice,
    queue_family: u32,
    device: ash::Device,
    queue: vk::Queue,
    swapchain_loader: swapchain::Device,
    command_pool: vk::CommandPool,
    depth_format: vk::Format,
    memory: vk::PhysicalDeviceMemoryProperties,
    scope: InstanceScope,
}

impl AshDevice {
    /// Instance, surface, device and command pool for `backend`'s window.
    /// The backend must outlive the returned device.
    pub fn new(
        backend: &mut dyn WindowBackend,
        options: DeviceOptions,
        sink: Arc<dyn DiagnosticSink>,
    ) -> Result<Self> {
        // STRICT ORDER:
        // 1) instance with the backend's WSI extensions
        // 2) surface from that instance
        // 3) physical device and queue checked against the surface
        // 4) logical device
        let entry = unsafe { Entry::load() }.context("loading the Vulkan library")?;
        let extensions = backend.required_extensions()?;
        let (instance, validation) =
            unsafe { create_instance(&entry, &extensions, options.validation) }?;

        let debug = if validation {
            match unsafe { DebugBridge::new(&entry, &instance, sink) } {
                Ok(d) => Some(d),
                Err(e) => {
                    warn!("debug messenger unavailable: {e:#}");
                    None
                }
            }
        } else {
            None
        };
        let surface_loader = surface::Instance::new(&entry, &instance);
        let mut scope = InstanceScope {
            entry,
            instance,
            debug,
            surface_loader,
            surface: vk::SurfaceKHR::null(),
        };
        scope.surface = unsafe { backend.create_surface(&scope.host()) }
            .with_context(|| format!("{} surface", backend.name()))?;

        let (physical_device, queue_family) =
            unsafe { pick_device_and_queue(&scope, &*backend, options.gpu) }?;

        let priorities = [1.0f32];
        let queue_info = [vk::DeviceQueueCreateInfo::default()
            .queue_family_index(queue_family)
            .queue_priorities(&priorities)];
        let device_extensions = [swapchain::NAME.as_ptr()];
        let device_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_info)
            .enabled_extension_names(&device_extensions);
        let device = unsafe {
            scope
                .instance
                .create_device(physical_device, &device_info, None)
        }
        .context("vkCreateDevice")?;
        let queue = unsafe { device.get_device_queue(queue_family, 0) };

        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let command_pool = match unsafe { device.create_command_pool(&pool_info, None) } {
            Ok(pool) => pool,
            Err(e) => {
                unsafe { device.destroy_device(None) };
                return Err(anyhow!("vkCreateCommandPool: {e:?}"));
            }
        };

        let swapchain_loader = swapchain::Device::new(&scope.instance, &device);
        let depth_format = choose_depth_format(|f| unsafe {
            scope
                .instance
                .get_physical_device_format_properties(physical_device, f)
                .optimal_tiling_features
        });
        let memory = unsafe {
            scope
                .instance
                .get_physical_device_memory_properties(physical_device)
        };
        info!("depth format = {depth_format:?}");

        Ok(Self {
            physical_device,
            queue_family,
            device,
            queue,
            swapchain_loader,
            command_pool,
            depth_format,
            memory,
            scope,
        })
    }

    /// The logical device, for scene and overlay objects.
    pub fn raw(&self) -> &ash::Device {
        &self.device
    }

    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    pub fn memory_type(&self, type_bits: u32, required: vk::MemoryPropertyFlags) -> Option<u32> {
        find_memory_type(&self.memory, type_bits, required)
    }

    pub fn device_name(&self) -> String {
        let props = unsafe {
            self.scope
                .instance
                .get_physical_device_properties(self.physical_device)
        };
        props
            .device_name_as_c_str()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    unsafe fn depth_image(&self, extent: vk::Extent2D) -> VkResult<DepthTarget> {
        let d = &self.device;
        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(self.depth_format)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let image = unsafe { d.create_image(&image_info, None) }?;

        let req = unsafe { d.get_image_memory_requirements(image) };
        let Some(type_index) =
            self.memory_type(req.memory_type_bits, vk::MemoryPropertyFlags::DEVICE_LOCAL)
        else {
            unsafe { d.destroy_image(image, None) };
            return Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        };
        let alloc = vk::MemoryAllocateInfo::default()
            .allocation_size(req.size)
            .memory_type_index(type_index);
        let memory = match unsafe { d.allocate_memory(&alloc, None) } {
            Ok(m) => m,
            Err(e) => {
                unsafe { d.destroy_image(image, None) };
                return Err(e);
            }
        };

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(self.depth_format)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(vk::ImageAspectFlags::DEPTH)
                    .level_count(1)
                    .layer_count(1),
            );
        let view = unsafe { d.bind_image_memory(image, memory, 0) }
            .and_then(|()| unsafe { d.create_image_view(&view_info, None) });
        match view {
            Ok(view) => Ok(DepthTarget {
                image,
                memory,
                view,
                format: self.depth_format,
            }),
            Err(e) => {
                unsafe {
                    d.destroy_image(image, None);
                    d.free_memory(memory, None);
                }
                Err(e)
            }
        }
    }
}

impl PresentDevice for AshDevice {
    fn surface_capabilities(&self) -> VkResult<vk::SurfaceCapabilitiesKHR> {
        unsafe {
            self.scope
                .surface_loader
                .get_physical_device_surface_capabilities(self.physical_device, self.scope.surface)
        }
    }

    fn surface_formats(&self) -> VkResult<Vec<vk::SurfaceFormatKHR>> {
        unsafe {
            self.scope
                .surface_loader
                .get_physical_device_surface_formats(self.physical_device, self.scope.surface)
        }
    }

    fn surface_present_modes(&self) -> VkResult<Vec<vk::PresentModeKHR>> {
        unsafe {
            self.scope
                .surface_loader
                .get_physical_device_surface_present_modes(self.physical_device, self.scope.surface)
        }
    }

    fn format_features(&self, format: vk::Format) -> vk::FormatFeatureFlags {
        unsafe {
            self.scope
                .instance
                .get_physical_device_format_properties(self.physical_device, format)
        }
        .optimal_tiling_features
    }

    fn depth_format(&self) -> vk::Format {
        self.depth_format
    }

    fn create_swapchain(
        &mut self,
        config: &SwapchainConfig,
        old: vk::SwapchainKHR,
    ) -> VkResult<vk::SwapchainKHR> {
        let info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.scope.surface)
            .min_image_count(config.image_count)
            .image_format(config.format)
            .image_color_space(config.color_space)
            .image_extent(config.extent)
            .image_array_layers(1)
            .image_usage(config.image_usage())
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(config.pre_transform)
            .composite_alpha(config.composite_alpha)
            .present_mode(config.present_mode)
            .clipped(true)
            .old_swapchain(old);
        unsafe { self.swapchain_loader.create_swapchain(&info, None) }
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>> {
        unsafe { self.swapchain_loader.get_swapchain_images(swapchain) }
    }

    fn destroy_swapchain(&mut self, swapchain: vk::SwapchainKHR) {
        unsafe { self.swapchain_loader.destroy_swapchain(swapchain, None) }
    }

    fn create_image_view(&mut self, image: vk::Image, format: vk::Format) -> VkResult<vk::ImageView> {
        let info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .components(vk::ComponentMapping::default())
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .level_count(1)
                    .layer_count(1),
            );
        unsafe { self.device.create_image_view(&info, None) }
    }

    fn destroy_image_view(&mut self, view: vk::ImageView) {
        unsafe { self.device.destroy_image_view(view, None) }
    }

    fn create_framebuffer(
        &mut self,
        render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> VkResult<vk::Framebuffer> {
        let info = vk::FramebufferCreateInfo::default()
            .render_pass(render_pass)
            .attachments(attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);
        unsafe { self.device.create_framebuffer(&info, None) }
    }

    fn destroy_framebuffer(&mut self, framebuffer: vk::Framebuffer) {
        unsafe { self.device.destroy_framebuffer(framebuffer, None) }
    }

    fn create_depth_target(&mut self, extent: vk::Extent2D) -> VkResult<DepthTarget> {
        unsafe { self.depth_image(extent) }
    }

    fn destroy_depth_target(&mut self, depth: DepthTarget) {
        unsafe {
            self.device.destroy_image_view(depth.view, None);
            self.device.destroy_image(depth.image, None);
            self.device.free_memory(depth.memory, None);
        }
    }

    fn allocate_command_buffers(&mut self, count: u32) -> VkResult<Vec<vk::CommandBuffer>> {
        let info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);
        unsafe { self.device.allocate_command_buffers(&info) }
    }

    fn free_command_buffers(&mut self, buffers: &[vk::CommandBuffer]) {
        if !buffers.is_empty() {
            unsafe { self.device.free_command_buffers(self.command_pool, buffers) }
        }
    }

    fn begin_commands(&mut self, cmd: vk::CommandBuffer) -> VkResult<()> {
        let info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            self.device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;
            self.device.begin_command_buffer(cmd, &info)
        }
    }

    fn begin_render_pass(
        &mut self,
        cmd: vk::CommandBuffer,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear: &[vk::ClearValue],
    ) {
        let info = vk::RenderPassBeginInfo::default()
            .render_pass(render_pass)
            .framebuffer(framebuffer)
            .render_area(full_rect(extent))
            .clear_values(clear);
        unsafe {
            self.device
                .cmd_begin_render_pass(cmd, &info, vk::SubpassContents::INLINE)
        }
    }

    fn set_viewport_scissor(&mut self, cmd: vk::CommandBuffer, extent: vk::Extent2D) {
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        unsafe {
            self.device.cmd_set_viewport(cmd, 0, &[viewport]);
            self.device.cmd_set_scissor(cmd, 0, &[full_rect(extent)]);
        }
    }

    fn end_render_pass(&mut self, cmd: vk::CommandBuffer) {
        unsafe { self.device.cmd_end_render_pass(cmd) }
    }

    fn end_commands(&mut self, cmd: vk::CommandBuffer) -> VkResult<()> {
        unsafe { self.device.end_command_buffer(cmd) }
    }

    fn create_semaphore(&mut self) -> VkResult<vk::Semaphore> {
        unsafe {
            self.device
                .create_semaphore(&vk::SemaphoreCreateInfo::default(), None)
        }
    }

    fn destroy_semaphore(&mut self, semaphore: vk::Semaphore) {
        unsafe { self.device.destroy_semaphore(semaphore, None) }
    }

    fn create_fence(&mut self, signaled: bool) -> VkResult<vk::Fence> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        unsafe {
            self.device
                .create_fence(&vk::FenceCreateInfo::default().flags(flags), None)
        }
    }

    fn destroy_fence(&mut self, fence: vk::Fence) {
        unsafe { self.device.destroy_fence(fence, None) }
    }

    fn wait_and_reset_fence(&mut self, fence: vk::Fence) -> VkResult<()> {
        unsafe {
            self.device.wait_for_fences(&[fence], true, u64::MAX)?;
            self.device.reset_fences(&[fence])
        }
    }

    fn acquire_next_image(
        &mut self,
        swapchain: vk::SwapchainKHR,
        timeout_ns: u64,
        signal: vk::Semaphore,
    ) -> VkResult<(u32, bool)> {
        unsafe {
            self.swapchain_loader
                .acquire_next_image(swapchain, timeout_ns, signal, vk::Fence::null())
        }
    }

    fn submit(&mut self, submission: &Submission) -> VkResult<()> {
        let waits: Vec<_> = [submission.wait]
            .into_iter()
            .filter(|s| *s != vk::Semaphore::null())
            .collect();
        let stages = vec![submission.wait_stage; waits.len()];
        let cmds: Vec<_> = submission.cmd.into_iter().collect();
        let signals: Vec<_> = submission.signal.into_iter().collect();
        let info = vk::SubmitInfo::default()
            .wait_semaphores(&waits)
            .wait_dst_stage_mask(&stages)
            .command_buffers(&cmds)
            .signal_semaphores(&signals);
        unsafe { self.device.queue_submit(self.queue, &[info], submission.fence) }
    }

    fn present(
        &mut self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> VkResult<bool> {
        let waits = [wait];
        let swapchains = [swapchain];
        let indices = [image_index];
        let info = vk::PresentInfoKHR::default()
            .wait_semaphores(&waits)
            .swapchains(&swapchains)
            .image_indices(&indices);
        unsafe { self.swapchain_loader.queue_present(self.queue, &info) }
    }

    fn queue_wait_idle(&mut self) -> VkResult<()> {
        unsafe { self.device.queue_wait_idle(self.queue) }
    }

    fn device_wait_idle(&mut self) -> VkResult<()> {
        unsafe { self.device.device_wait_idle() }
    }
}

// STRICT TEARDOWN ORDER:
// - swapchain, views, framebuffers, depth and sync objects are gone already
//   (the presenter releases them before its device field drops)
// - device_wait_idle()
// - command pool before device
// - surface after device, debug messenger before instance, instance last
//   (InstanceScope::drop, which runs after this body)
impl Drop for AshDevice {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                warn!("vkDeviceWaitIdle at shutdown: {e:?}");
            }
            self.device.destroy_command_pool(self.command_pool, None);
            self.device.destroy_device(None);
        }
        debug!("device destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_props(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len() as u32,
            ..Default::default()
        };
        for (i, &flags) in types.iter().enumerate() {
            props.memory_types[i].property_flags = flags;
        }
        props
    }

    #[test]
    fn memory_type_honours_bits_and_flags() {
        let props = memory_props(&[
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::DEVICE_LOCAL | vk::MemoryPropertyFlags::HOST_VISIBLE,
        ]);
        let local = vk::MemoryPropertyFlags::DEVICE_LOCAL;
        assert_eq!(find_memory_type(&props, 0b111, local), Some(1));
        assert_eq!(find_memory_type(&props, 0b100, local), Some(2));
        assert_eq!(find_memory_type(&props, 0b001, local), None);
        assert_eq!(find_memory_type(&props, 0, vk::MemoryPropertyFlags::empty()), None);
    }

    #[test]
    fn depth_format_follows_preference() {
        let all = |_: vk::Format| vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT;
        assert_eq!(choose_depth_format(all), vk::Format::D32_SFLOAT);

        let only_d24 = |f: vk::Format| {
            if f == vk::Format::D24_UNORM_S8_UINT {
                vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT
            } else {
                vk::FormatFeatureFlags::empty()
            }
        };
        assert_eq!(choose_depth_format(only_d24), vk::Format::D24_UNORM_S8_UINT);

        let none = |_: vk::Format| vk::FormatFeatureFlags::SAMPLED_IMAGE;
        assert_eq!(choose_depth_format(none), vk::Format::D32_SFLOAT);
    }
}

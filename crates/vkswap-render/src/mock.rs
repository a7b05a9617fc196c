// SPDX-License-Identifier: CEPL-1.0
//! A `PresentDevice` that hands out fake handles and keeps books on them:
//! every create must be matched by exactly one destroy, semaphores must be
//! signaled before they are waited on, and submitted work may only
//! reference live objects.
use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;

use ash::prelude::VkResult;
use ash::vk::{self, Handle};

use crate::collab::{FrameStats, FrameTarget, OverlayListener, SceneRenderer, TargetInfo, ViewListener};
use crate::device::{DepthTarget, PresentDevice, Submission};
use crate::error::PresentError;
use crate::swapchain::SwapchainConfig;

#[derive(Default)]
pub struct Tracker {
    next: u64,
    live: HashMap<&'static str, HashSet<u64>>,
    created: HashMap<&'static str, usize>,
    violations: Vec<String>,
}

impl Tracker {
    /// A raw handle that nobody owns.
    pub fn fresh(&mut self) -> u64 {
        self.next += 1;
        self.next
    }

    pub fn create(&mut self, kind: &'static str) -> u64 {
        let raw = self.fresh();
        self.live.entry(kind).or_default().insert(raw);
        *self.created.entry(kind).or_default() += 1;
        raw
    }

    pub fn destroy(&mut self, kind: &'static str, raw: u64) {
        if raw == 0 {
            self.violations.push(format!("destroy of null {kind}"));
            return;
        }
        if !self.live.entry(kind).or_default().remove(&raw) {
            self.violations
                .push(format!("{kind} {raw:#x} destroyed twice or never created"));
        }
    }

    pub fn is_live(&self, kind: &'static str, raw: u64) -> bool {
        self.live.get(kind).is_some_and(|set| set.contains(&raw))
    }

    pub fn live(&self, kind: &'static str) -> usize {
        self.live.get(kind).map_or(0, HashSet::len)
    }

    pub fn created(&self, kind: &'static str) -> usize {
        self.created.get(kind).copied().unwrap_or(0)
    }

    pub fn violate(&mut self, what: String) {
        self.violations.push(what);
    }

    pub fn assert_clean(&self) {
        assert!(self.violations.is_empty(), "violations: {:#?}", self.violations);
        for (kind, set) in &self.live {
            assert!(set.is_empty(), "{} {kind} leaked", set.len());
        }
    }
}

pub struct MockDevice {
    pub tracker: Tracker,
    pub caps: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
    pub format_features: vk::FormatFeatureFlags,

    pub acquire_script: VecDeque<VkResult<(u32, bool)>>,
    pub present_script: VecDeque<VkResult<bool>>,
    pub fail_next_swapchain: Option<vk::Result>,
    pub fail_next_depth_target: Option<vk::Result>,

    pub old_swapchain_hints: Vec<vk::SwapchainKHR>,
    pub swapchain_configs: Vec<SwapchainConfig>,
    pub submissions: Vec<Submission>,
    pub presents: Vec<(vk::SwapchainKHR, u32, vk::Semaphore)>,
    pub calls: Vec<&'static str>,
    pub viewport_sets: usize,
    pub max_in_flight: u32,

    chains: HashMap<u64, Vec<vk::Image>>,
    cursor: u32,
    signaled: HashSet<u64>,
    bound: HashMap<u64, u64>,
    in_flight: u32,
}

impl MockDevice {
    /// A surface of `width`x`height` offering BGRA SRGB with FIFO and MAILBOX.
    pub fn new(width: u32, height: u32) -> Self {
        let caps = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 8,
            current_extent: vk::Extent2D { width, height },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            max_image_array_layers: 1,
            supported_transforms: vk::SurfaceTransformFlagsKHR::IDENTITY,
            current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            supported_composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            supported_usage_flags: vk::ImageUsageFlags::COLOR_ATTACHMENT
                | vk::ImageUsageFlags::TRANSFER_SRC,
            ..Default::default()
        };
        Self {
            tracker: Tracker::default(),
            caps,
            formats: vec![vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            }],
            present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
            format_features: vk::FormatFeatureFlags::COLOR_ATTACHMENT
                | vk::FormatFeatureFlags::BLIT_DST,
            acquire_script: VecDeque::new(),
            present_script: VecDeque::new(),
            fail_next_swapchain: None,
            fail_next_depth_target: None,
            old_swapchain_hints: Vec::new(),
            swapchain_configs: Vec::new(),
            submissions: Vec::new(),
            presents: Vec::new(),
            calls: Vec::new(),
            viewport_sets: 0,
            max_in_flight: 0,
            chains: HashMap::new(),
            cursor: 0,
            signaled: HashSet::new(),
            bound: HashMap::new(),
            in_flight: 0,
        }
    }

    pub fn set_surface_extent(&mut self, width: u32, height: u32) {
        self.caps.current_extent = vk::Extent2D { width, height };
    }

    /// A live chain of `images` images, created outside the swapchain code.
    pub fn fake_swapchain(&mut self, images: u32) -> vk::SwapchainKHR {
        let raw = self.tracker.create("swapchain");
        let imgs = (0..images)
            .map(|_| vk::Image::from_raw(self.tracker.fresh()))
            .collect();
        self.chains.insert(raw, imgs);
        vk::SwapchainKHR::from_raw(raw)
    }

    pub fn fake_render_pass(&mut self) -> vk::RenderPass {
        vk::RenderPass::from_raw(self.tracker.fresh())
    }

    /// Position of the `nth` call named `name` in the call log.
    pub fn call_index(&self, name: &str, nth: usize) -> Option<usize> {
        self.calls
            .iter()
            .enumerate()
            .filter(|(_, c)| **c == name)
            .nth(nth)
            .map(|(i, _)| i)
    }

    pub fn count(&self, name: &str) -> usize {
        self.calls.iter().filter(|c| **c == name).count()
    }

    pub fn is_signaled(&self, semaphore: vk::Semaphore) -> bool {
        self.signaled.contains(&semaphore.as_raw())
    }

    pub fn violations(&self) -> &[String] {
        &self.tracker.violations
    }

    fn signal(&mut self, semaphore: vk::Semaphore) {
        if !self.signaled.insert(semaphore.as_raw()) {
            self.tracker
                .violate(format!("semaphore {:#x} signaled twice", semaphore.as_raw()));
        }
    }

    fn consume(&mut self, semaphore: vk::Semaphore) {
        if !self.signaled.remove(&semaphore.as_raw()) {
            self.tracker
                .violate(format!("wait on unsignaled semaphore {:#x}", semaphore.as_raw()));
        }
    }

    fn check_live(&mut self, kind: &'static str, raw: u64, during: &str) {
        if !self.tracker.is_live(kind, raw) {
            self.tracker
                .violate(format!("{during} uses dead {kind} {raw:#x}"));
        }
    }
}

impl PresentDevice for MockDevice {
    fn surface_capabilities(&self) -> VkResult<vk::SurfaceCapabilitiesKHR> {
        Ok(self.caps)
    }

    fn surface_formats(&self) -> VkResult<Vec<vk::SurfaceFormatKHR>> {
        Ok(self.formats.clone())
    }

    fn surface_present_modes(&self) -> VkResult<Vec<vk::PresentModeKHR>> {
        Ok(self.present_modes.clone())
    }

    fn format_features(&self, _format: vk::Format) -> vk::FormatFeatureFlags {
        self.format_features
    }

    fn depth_format(&self) -> vk::Format {
        vk::Format::D32_SFLOAT
    }

    fn create_swapchain(
        &mut self,
        config: &SwapchainConfig,
        old: vk::SwapchainKHR,
    ) -> VkResult<vk::SwapchainKHR> {
        self.calls.push("create_swapchain");
        if let Some(e) = self.fail_next_swapchain.take() {
            return Err(e);
        }
        if old != vk::SwapchainKHR::null() {
            self.check_live("swapchain", old.as_raw(), "create_swapchain");
        }
        self.old_swapchain_hints.push(old);
        self.swapchain_configs.push(*config);
        let handle = self.fake_swapchain(config.image_count);
        self.cursor = 0;
        Ok(handle)
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>> {
        self.chains
            .get(&swapchain.as_raw())
            .cloned()
            .ok_or(vk::Result::ERROR_SURFACE_LOST_KHR)
    }

    fn destroy_swapchain(&mut self, swapchain: vk::SwapchainKHR) {
        self.calls.push("destroy_swapchain");
        self.tracker.destroy("swapchain", swapchain.as_raw());
        self.chains.remove(&swapchain.as_raw());
    }

    fn create_image_view(&mut self, _image: vk::Image, _format: vk::Format) -> VkResult<vk::ImageView> {
        Ok(vk::ImageView::from_raw(self.tracker.create("image_view")))
    }

    fn destroy_image_view(&mut self, view: vk::ImageView) {
        self.tracker.destroy("image_view", view.as_raw());
    }

    fn create_framebuffer(
        &mut self,
        render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        _extent: vk::Extent2D,
    ) -> VkResult<vk::Framebuffer> {
        if render_pass == vk::RenderPass::null() {
            self.tracker.violate("framebuffer with null render pass".into());
        }
        for view in attachments {
            let raw = view.as_raw();
            if !self.tracker.is_live("image_view", raw) && !self.tracker.is_live("depth_view", raw) {
                self.tracker
                    .violate(format!("framebuffer attaches dead view {raw:#x}"));
            }
        }
        Ok(vk::Framebuffer::from_raw(self.tracker.create("framebuffer")))
    }

    fn destroy_framebuffer(&mut self, framebuffer: vk::Framebuffer) {
        self.tracker.destroy("framebuffer", framebuffer.as_raw());
    }

    fn create_depth_target(&mut self, _extent: vk::Extent2D) -> VkResult<DepthTarget> {
        self.calls.push("create_depth_target");
        if let Some(e) = self.fail_next_depth_target.take() {
            return Err(e);
        }
        Ok(DepthTarget {
            image: vk::Image::from_raw(self.tracker.create("depth_image")),
            memory: vk::DeviceMemory::from_raw(self.tracker.create("depth_memory")),
            view: vk::ImageView::from_raw(self.tracker.create("depth_view")),
            format: self.depth_format(),
        })
    }

    fn destroy_depth_target(&mut self, depth: DepthTarget) {
        self.tracker.destroy("depth_view", depth.view.as_raw());
        self.tracker.destroy("depth_image", depth.image.as_raw());
        self.tracker.destroy("depth_memory", depth.memory.as_raw());
    }

    fn allocate_command_buffers(&mut self, count: u32) -> VkResult<Vec<vk::CommandBuffer>> {
        self.calls.push("allocate_command_buffers");
        Ok((0..count)
            .map(|_| vk::CommandBuffer::from_raw(self.tracker.create("command_buffer")))
            .collect())
    }

    fn free_command_buffers(&mut self, buffers: &[vk::CommandBuffer]) {
        for cb in buffers {
            self.tracker.destroy("command_buffer", cb.as_raw());
            self.bound.remove(&cb.as_raw());
        }
    }

    fn begin_commands(&mut self, cmd: vk::CommandBuffer) -> VkResult<()> {
        self.calls.push("begin_commands");
        self.check_live("command_buffer", cmd.as_raw(), "begin_commands");
        Ok(())
    }

    fn begin_render_pass(
        &mut self,
        cmd: vk::CommandBuffer,
        _render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        _extent: vk::Extent2D,
        _clear: &[vk::ClearValue],
    ) {
        self.calls.push("begin_render_pass");
        self.check_live("framebuffer", framebuffer.as_raw(), "begin_render_pass");
        self.bound.insert(cmd.as_raw(), framebuffer.as_raw());
    }

    fn set_viewport_scissor(&mut self, _cmd: vk::CommandBuffer, _extent: vk::Extent2D) {
        self.viewport_sets += 1;
    }

    fn end_render_pass(&mut self, _cmd: vk::CommandBuffer) {
        self.calls.push("end_render_pass");
    }

    fn end_commands(&mut self, _cmd: vk::CommandBuffer) -> VkResult<()> {
        self.calls.push("end_commands");
        Ok(())
    }

    fn create_semaphore(&mut self) -> VkResult<vk::Semaphore> {
        Ok(vk::Semaphore::from_raw(self.tracker.create("semaphore")))
    }

    fn destroy_semaphore(&mut self, semaphore: vk::Semaphore) {
        self.tracker.destroy("semaphore", semaphore.as_raw());
        self.signaled.remove(&semaphore.as_raw());
    }

    fn create_fence(&mut self, _signaled: bool) -> VkResult<vk::Fence> {
        Ok(vk::Fence::from_raw(self.tracker.create("fence")))
    }

    fn destroy_fence(&mut self, fence: vk::Fence) {
        self.tracker.destroy("fence", fence.as_raw());
    }

    fn wait_and_reset_fence(&mut self, fence: vk::Fence) -> VkResult<()> {
        self.check_live("fence", fence.as_raw(), "wait_and_reset_fence");
        Ok(())
    }

    fn acquire_next_image(
        &mut self,
        swapchain: vk::SwapchainKHR,
        _timeout_ns: u64,
        signal: vk::Semaphore,
    ) -> VkResult<(u32, bool)> {
        self.calls.push("acquire_next_image");
        self.check_live("swapchain", swapchain.as_raw(), "acquire_next_image");

        let result = match self.acquire_script.pop_front() {
            Some(scripted) => scripted,
            None => {
                let n = self
                    .chains
                    .get(&swapchain.as_raw())
                    .map_or(1, |imgs| imgs.len().max(1) as u32);
                let index = self.cursor % n;
                self.cursor += 1;
                Ok((index, false))
            }
        };
        if result.is_ok() {
            self.signal(signal);
            self.in_flight += 1;
            self.max_in_flight = self.max_in_flight.max(self.in_flight);
        }
        result
    }

    fn submit(&mut self, submission: &Submission) -> VkResult<()> {
        self.calls.push("submit");
        if submission.wait != vk::Semaphore::null() {
            self.consume(submission.wait);
        }
        if let Some(cmd) = submission.cmd {
            self.check_live("command_buffer", cmd.as_raw(), "submit");
            if let Some(fb) = self.bound.get(&cmd.as_raw()).copied() {
                self.check_live("framebuffer", fb, "submit");
            }
        }
        if let Some(signal) = submission.signal {
            self.signal(signal);
        }
        self.submissions.push(*submission);
        Ok(())
    }

    fn present(
        &mut self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> VkResult<bool> {
        self.calls.push("present");
        self.check_live("swapchain", swapchain.as_raw(), "present");
        self.consume(wait);
        self.presents.push((swapchain, image_index, wait));
        self.present_script.pop_front().unwrap_or(Ok(false))
    }

    fn queue_wait_idle(&mut self) -> VkResult<()> {
        self.calls.push("queue_wait_idle");
        self.in_flight = 0;
        Ok(())
    }

    fn device_wait_idle(&mut self) -> VkResult<()> {
        self.calls.push("device_wait_idle");
        self.in_flight = 0;
        Ok(())
    }
}

/// Shared counters the tests keep after handing a collaborator to the
/// presenter.
#[derive(Default)]
pub struct Journal {
    pub scene_prepares: Vec<TargetInfo>,
    pub scene_releases: usize,
    pub recorded: Vec<FrameTarget>,
    pub aspect_changes: Vec<(u32, u32)>,
    pub overlay_reallocs: Vec<usize>,
    pub overlay_updates: Vec<(String, FrameStats)>,
    pub overlay_releases: usize,
}

pub type SharedJournal = Rc<RefCell<Journal>>;

pub struct MockScene {
    pub journal: SharedJournal,
    pass: Option<vk::RenderPass>,
}

impl MockScene {
    pub fn new(journal: SharedJournal) -> Self {
        Self { journal, pass: None }
    }
}

impl SceneRenderer<MockDevice> for MockScene {
    fn prepare(
        &mut self,
        device: &mut MockDevice,
        info: &TargetInfo,
    ) -> Result<vk::RenderPass, PresentError> {
        let pass = vk::RenderPass::from_raw(device.tracker.create("render_pass"));
        self.pass = Some(pass);
        self.journal.borrow_mut().scene_prepares.push(*info);
        Ok(pass)
    }

    fn record(&mut self, _device: &mut MockDevice, _cmd: vk::CommandBuffer, frame: &FrameTarget) {
        self.journal.borrow_mut().recorded.push(*frame);
    }

    fn release(&mut self, device: &mut MockDevice) {
        if let Some(pass) = self.pass.take() {
            device.tracker.destroy("render_pass", pass.as_raw());
        }
        self.journal.borrow_mut().scene_releases += 1;
    }
}

pub struct MockView(pub SharedJournal);

impl ViewListener for MockView {
    fn aspect_ratio_changed(&mut self, width: u32, height: u32) {
        self.0.borrow_mut().aspect_changes.push((width, height));
    }
}

pub struct MockOverlay {
    pub journal: SharedJournal,
    pub visible: bool,
    buffers: Vec<vk::CommandBuffer>,
}

impl MockOverlay {
    pub fn new(journal: SharedJournal) -> Self {
        Self {
            journal,
            visible: true,
            buffers: Vec::new(),
        }
    }
}

impl OverlayListener<MockDevice> for MockOverlay {
    fn reallocate_command_buffers(
        &mut self,
        device: &mut MockDevice,
        frames: &[FrameTarget],
    ) -> Result<(), PresentError> {
        device.free_command_buffers(&self.buffers);
        self.buffers = device
            .allocate_command_buffers(frames.len() as u32)
            .map_err(|e| PresentError::vk("vkAllocateCommandBuffers", e))?;
        self.journal.borrow_mut().overlay_reallocs.push(frames.len());
        Ok(())
    }

    fn command_buffer(&self, image_index: u32) -> Option<vk::CommandBuffer> {
        if !self.visible {
            return None;
        }
        self.buffers.get(image_index as usize).copied()
    }

    fn update(&mut self, title: &str, stats: &FrameStats) {
        self.journal
            .borrow_mut()
            .overlay_updates
            .push((title.to_owned(), *stats));
    }

    fn release(&mut self, device: &mut MockDevice) {
        device.free_command_buffers(&self.buffers);
        self.buffers.clear();
        self.journal.borrow_mut().overlay_releases += 1;
    }
}

// SPDX-License-Identifier: CEPL-1.0
//! The frame driver: owns the device seam, the current swapchain and its
//! dependent targets, and runs one acquire/record/submit/present cycle per
//! `render_frame` call.
use std::time::{Duration, Instant};

use ash::vk;
use tracing::{debug, info, warn};
use vkswap_core::PresentSettings;

use crate::collab::{FrameStats, FrameTarget, OverlayListener, SceneRenderer, TargetInfo, ViewListener};
use crate::device::{DepthTarget, PresentDevice};
use crate::error::{CallContext, PresentError};
use crate::negotiate::negotiate;
use crate::swapchain::Swapchain;
use crate::sync::{AcquireOutcome, FrameState, FrameSync, FrameSyncSet, PresentOutcome};
use crate::{RenderSize, Renderer};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented,
    /// The chain was stale and has been rebuilt; nothing reached the screen.
    Recreated,
    /// Acquire or present timed out; try again next iteration.
    Skipped,
    /// Zero-sized surface.
    Paused,
    NotPrepared,
}

/// Everything sized or counted by the current swapchain. Image, framebuffer
/// and command buffer counts always match.
pub(crate) struct FrameTargets {
    pub(crate) swapchain: Swapchain,
    pub(crate) depth: DepthTarget,
    pub(crate) command_buffers: Vec<vk::CommandBuffer>,
}

impl FrameTargets {
    pub(crate) fn destroy<D: PresentDevice>(self, device: &mut D) {
        device.free_command_buffers(&self.command_buffers);
        self.swapchain.destroy(device);
        device.destroy_depth_target(self.depth);
    }
}

struct StatsWindow {
    start: Instant,
    frames: u32,
    total: u64,
}

impl StatsWindow {
    fn new() -> Self {
        Self {
            start: Instant::now(),
            frames: 0,
            total: 0,
        }
    }

    fn tick(&mut self, now: Instant, interval: Duration) -> Option<FrameStats> {
        self.frames += 1;
        self.total += 1;
        let elapsed = now.duration_since(self.start);
        if elapsed < interval {
            return None;
        }
        let secs = elapsed.as_secs_f32().max(f32::EPSILON);
        let stats = FrameStats {
            total_frames: self.total,
            fps: self.frames as f32 / secs,
            frame_time_ms: secs * 1000.0 / self.frames as f32,
        };
        self.start = now;
        self.frames = 0;
        Some(stats)
    }
}

pub struct Presenter<D: PresentDevice> {
    pub(crate) device: D,
    pub(crate) settings: PresentSettings,
    title: String,
    pub(crate) scene: Box<dyn SceneRenderer<D>>,
    pub(crate) view: Option<Box<dyn ViewListener>>,
    pub(crate) overlay: Option<Box<dyn OverlayListener<D>>>,
    sync: Option<FrameSync>,
    pub(crate) targets: Option<FrameTargets>,
    pub(crate) render_pass: vk::RenderPass,
    pub(crate) requested: vk::Extent2D,
    pub(crate) prepared: bool,
    pub(crate) paused: bool,
    stats: StatsWindow,
    report: Option<FrameStats>,
}

impl<D: PresentDevice> Presenter<D> {
    pub fn new(
        device: D,
        scene: Box<dyn SceneRenderer<D>>,
        size: RenderSize,
        settings: PresentSettings,
    ) -> Self {
        Self {
            device,
            settings,
            title: String::new(),
            scene,
            view: None,
            overlay: None,
            sync: None,
            targets: None,
            render_pass: vk::RenderPass::null(),
            requested: vk::Extent2D {
                width: size.width,
                height: size.height,
            },
            prepared: false,
            paused: size.is_empty(),
            stats: StatsWindow::new(),
            report: None,
        }
    }

    pub fn with_view(mut self, view: Box<dyn ViewListener>) -> Self {
        self.view = Some(view);
        self
    }

    /// Must be attached before `prepare` so the overlay-complete semaphore
    /// exists.
    pub fn with_overlay(mut self, overlay: Box<dyn OverlayListener<D>>) -> Self {
        self.overlay = Some(overlay);
        self
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn is_prepared(&self) -> bool {
        self.prepared
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn frame_state(&self) -> FrameState {
        self.sync.as_ref().map_or(FrameState::Idle, FrameSync::state)
    }

    pub fn sync_set(&self) -> Option<FrameSyncSet> {
        self.sync.as_ref().map(|s| *s.set())
    }

    pub fn swapchain(&self) -> Option<&Swapchain> {
        self.targets.as_ref().map(|t| &t.swapchain)
    }

    pub fn depth_target(&self) -> Option<DepthTarget> {
        self.targets.as_ref().map(|t| t.depth)
    }

    pub fn command_buffers(&self) -> &[vk::CommandBuffer] {
        self.targets
            .as_ref()
            .map_or(&[][..], |t| t.command_buffers.as_slice())
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.requested
    }

    /// Stats produced since the last call, at most once per report interval.
    pub fn take_report(&mut self) -> Option<FrameStats> {
        self.report.take()
    }

    pub fn frame_targets(&self) -> Vec<FrameTarget> {
        let Some(targets) = &self.targets else {
            return Vec::new();
        };
        let extent = targets.swapchain.extent();
        let format = targets.swapchain.config().format;
        targets
            .swapchain
            .images()
            .iter()
            .enumerate()
            .map(|(i, img)| FrameTarget {
                index: i as u32,
                image: img.image,
                view: img.view,
                framebuffer: img.framebuffer.unwrap_or_default(),
                format,
                extent,
            })
            .collect()
    }

    pub(crate) fn target_info(&self, swapchain: &Swapchain) -> TargetInfo {
        TargetInfo {
            color_format: swapchain.config().format,
            depth_format: self.device.depth_format(),
            extent: swapchain.extent(),
            image_count: swapchain.len() as u32,
        }
    }

    /// Hands the new targets to the overlay and the new size to the view.
    pub(crate) fn notify_targets_changed(&mut self) -> Result<(), PresentError> {
        let frames = self.frame_targets();
        if let Some(overlay) = self.overlay.as_mut() {
            overlay.reallocate_command_buffers(&mut self.device, &frames)?;
        }
        if let Some(view) = self.view.as_mut() {
            view.aspect_ratio_changed(self.requested.width, self.requested.height);
            view.view_changed();
        }
        Ok(())
    }

    fn record(&mut self, cmd: vk::CommandBuffer, frame: &FrameTarget) -> Result<(), PresentError> {
        let clear = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.scene.clear_color(),
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        ];

        self.device
            .begin_commands(cmd)
            .call("vkBeginCommandBuffer")?;
        self.device
            .begin_render_pass(cmd, self.render_pass, frame.framebuffer, frame.extent, &clear);
        if self.scene.dynamic_viewport() {
            self.device.set_viewport_scissor(cmd, frame.extent);
        }
        self.scene.record(&mut self.device, cmd, frame);
        self.device.end_render_pass(cmd);
        self.device.end_commands(cmd).call("vkEndCommandBuffer")
    }

    /// Acquires the next image, rebuilding once if the chain is stale.
    /// `Ok(Err(outcome))` ends the frame early without an error.
    fn acquire(&mut self) -> Result<Result<u32, FrameOutcome>, PresentError> {
        let timeout = self.settings.acquire_timeout_ns();
        let mut rebuilt = false;
        loop {
            if self.paused {
                return Ok(Err(FrameOutcome::Paused));
            }
            let (Some(sync), Some(targets)) = (self.sync.as_mut(), self.targets.as_ref()) else {
                return Ok(Err(FrameOutcome::NotPrepared));
            };
            if !self.prepared {
                return Ok(Err(FrameOutcome::NotPrepared));
            }
            let handle = targets.swapchain.handle();
            match sync.acquire(&mut self.device, handle, timeout)? {
                AcquireOutcome::Ready(index) => return Ok(Ok(index)),
                AcquireOutcome::TimedOut => {
                    debug!("acquire timed out, skipping frame");
                    return Ok(Err(FrameOutcome::Skipped));
                }
                AcquireOutcome::Stale if rebuilt => return Ok(Err(FrameOutcome::Recreated)),
                AcquireOutcome::Stale => {
                    self.rebuild()?;
                    rebuilt = true;
                }
            }
        }
    }

    /// `Acquired → Idle` for one frame.
    fn run_cycle(
        &mut self,
        sync: &mut FrameSync,
        cmd: vk::CommandBuffer,
        overlay_cmd: Option<vk::CommandBuffer>,
        frame: &FrameTarget,
        swapchain: vk::SwapchainKHR,
    ) -> Result<PresentOutcome, PresentError> {
        sync.begin_recording(&mut self.device)?;
        self.record(cmd, frame)?;
        sync.submit(&mut self.device, cmd, overlay_cmd)?;
        let outcome = sync.present(&mut self.device, swapchain)?;
        sync.finish(&mut self.device)?;
        Ok(outcome)
    }

    fn report_stats(&mut self) {
        let Some(stats) = self.stats.tick(Instant::now(), self.settings.report_interval()) else {
            return;
        };
        debug!(
            "frames={} fps={:.1} frame_time={:.2}ms",
            stats.total_frames, stats.fps, stats.frame_time_ms
        );
        if let Some(overlay) = self.overlay.as_mut() {
            overlay.update(&self.title, &stats);
        }
        self.report = Some(stats);
    }

    fn teardown(&mut self) {
        if self.targets.is_none() && self.sync.is_none() {
            return;
        }
        if let Err(e) = self.device.device_wait_idle() {
            warn!("vkDeviceWaitIdle during shutdown: {e:?}");
        }
        // a failed rebuild leaves the overlay holding buffers with no targets
        if let Some(overlay) = self.overlay.as_mut() {
            overlay.release(&mut self.device);
        }
        if let Some(targets) = self.targets.take() {
            targets.destroy(&mut self.device);
        }
        if self.render_pass != vk::RenderPass::null() {
            self.scene.release(&mut self.device);
            self.render_pass = vk::RenderPass::null();
        }
        if let Some(sync) = self.sync.take() {
            sync.into_set().destroy(&mut self.device);
        }
        self.prepared = false;
        info!("presenter shut down");
    }
}

impl<D: PresentDevice> Renderer for Presenter<D> {
    /// First-time setup: sync objects, swapchain, depth, scene, framebuffers
    /// and command buffers, in that order.
    fn prepare(&mut self) -> Result<(), PresentError> {
        if self.targets.is_some() {
            return Ok(());
        }
        if self.sync.is_none() {
            let set = FrameSyncSet::create(&mut self.device, self.overlay.is_some())?;
            self.sync = Some(FrameSync::new(set));
        }

        let config = negotiate(&self.device, &mut self.requested, &self.settings)?;
        if config.extent.width == 0 || config.extent.height == 0 {
            info!("surface is zero-sized, deferring prepare");
            self.paused = true;
            return Ok(());
        }
        let mut swapchain = Swapchain::create(&mut self.device, config, None)?;

        let depth = match self.device.create_depth_target(config.extent) {
            Ok(depth) => depth,
            Err(e) => {
                swapchain.destroy(&mut self.device);
                return Err(PresentError::vk("create_depth_target", e));
            }
        };

        if self.render_pass == vk::RenderPass::null() {
            let info = self.target_info(&swapchain);
            match self.scene.prepare(&mut self.device, &info) {
                Ok(pass) => self.render_pass = pass,
                Err(e) => {
                    swapchain.destroy(&mut self.device);
                    self.device.destroy_depth_target(depth);
                    return Err(e);
                }
            }
        }

        let attached = swapchain.attach_framebuffers(&mut self.device, self.render_pass, depth.view);
        let command_buffers = attached.and_then(|()| {
            self.device
                .allocate_command_buffers(swapchain.len() as u32)
                .call("vkAllocateCommandBuffers")
        });
        let command_buffers = match command_buffers {
            Ok(cbs) => cbs,
            Err(e) => {
                swapchain.destroy(&mut self.device);
                self.device.destroy_depth_target(depth);
                return Err(e);
            }
        };

        info!(
            "presenter prepared: {}x{} {:?} {:?}, {} images",
            config.extent.width,
            config.extent.height,
            config.format,
            config.present_mode,
            swapchain.len()
        );
        self.targets = Some(FrameTargets {
            swapchain,
            depth,
            command_buffers,
        });
        self.paused = false;
        self.prepared = true;
        self.notify_targets_changed()
    }

    fn render_frame(&mut self) -> Result<FrameOutcome, PresentError> {
        let index = match self.acquire()? {
            Ok(index) => index,
            Err(outcome) => return Ok(outcome),
        };

        let frame = self
            .frame_targets()
            .get(index as usize)
            .copied()
            .ok_or(PresentError::vk("vkAcquireNextImageKHR", vk::Result::ERROR_UNKNOWN))?;
        let (cmd, handle) = match &self.targets {
            Some(t) => (t.command_buffers[index as usize], t.swapchain.handle()),
            None => return Ok(FrameOutcome::NotPrepared),
        };
        let overlay_cmd = self.overlay.as_ref().and_then(|o| o.command_buffer(index));

        let Some(mut sync) = self.sync.take() else {
            return Ok(FrameOutcome::NotPrepared);
        };
        let result = self.run_cycle(&mut sync, cmd, overlay_cmd, &frame, handle);
        self.sync = Some(sync);

        match result? {
            PresentOutcome::Presented => {
                self.report_stats();
                Ok(FrameOutcome::Presented)
            }
            PresentOutcome::Stale => {
                self.report_stats();
                self.rebuild()?;
                Ok(FrameOutcome::Recreated)
            }
            PresentOutcome::Dropped => Ok(FrameOutcome::Skipped),
        }
    }

    /// A zero-sized surface pauses rendering until a non-zero size arrives.
    fn on_resize(&mut self, size: RenderSize) -> Result<(), PresentError> {
        if size.is_empty() {
            if !self.paused {
                info!("surface minimized, pausing");
            }
            self.paused = true;
            return Ok(());
        }
        let unchanged = self.requested.width == size.width
            && self.requested.height == size.height
            && self.prepared
            && !self.paused;
        self.paused = false;
        self.requested = vk::Extent2D {
            width: size.width,
            height: size.height,
        };
        if unchanged {
            return Ok(());
        }
        if self.targets.is_none() {
            return self.prepare();
        }
        self.rebuild()
    }

    fn set_vsync(&mut self, on: bool) -> Result<(), PresentError> {
        if self.settings.vsync == on {
            return Ok(());
        }
        info!("vsync {}", if on { "on" } else { "off" });
        self.settings.vsync = on;
        self.rebuild()
    }

    fn shutdown(&mut self) {
        self.teardown();
    }
}

impl<D: PresentDevice> Drop for Presenter<D> {
    fn drop(&mut self) {
        self.teardown();
    }
}

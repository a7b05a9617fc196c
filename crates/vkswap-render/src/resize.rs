// SPDX-License-Identifier: CEPL-1.0
//! Swapchain rebuild after a resize, a stale acquire/present, or a present
//! mode change.
use ash::vk;
use tracing::info;

use crate::device::{DepthTarget, PresentDevice};
use crate::driver::{FrameTargets, Presenter};
use crate::error::{CallContext, PresentError};
use crate::negotiate::negotiate;
use crate::swapchain::Swapchain;

impl<D: PresentDevice> Presenter<D> {
    /// Strict order: stop frames, drain the device, renegotiate, build the new
    /// chain from the old one, then everything sized or counted by it. The
    /// sync set is left alone.
    pub(crate) fn rebuild(&mut self) -> Result<(), PresentError> {
        let Some(old) = self.targets.take() else {
            return Ok(());
        };

        // 1. no frame may start until the targets are consistent again
        self.prepared = false;

        // 2. the old images may still be in use
        if let Err(e) = self.device.device_wait_idle() {
            self.targets = Some(old);
            return Err(PresentError::vk("vkDeviceWaitIdle", e));
        }

        // 3.
        let config = match negotiate(&self.device, &mut self.requested, &self.settings) {
            Ok(config) => config,
            Err(e) => {
                self.targets = Some(old);
                return Err(e);
            }
        };
        if config.extent.width == 0 || config.extent.height == 0 {
            info!("surface is zero-sized, pausing until the next resize");
            self.targets = Some(old);
            self.paused = true;
            return Ok(());
        }

        let FrameTargets {
            swapchain: previous,
            depth,
            command_buffers,
        } = old;
        let format_changed = previous.config().format != config.format;

        // 4. the old chain is destroyed inside, after the new one exists
        let created = Swapchain::create(&mut self.device, config, Some(previous));

        // 5. and 7. the old depth target and command buffers go either way
        self.device.destroy_depth_target(depth);
        self.device.free_command_buffers(&command_buffers);
        let mut swapchain = created?;

        let depth = match self.device.create_depth_target(config.extent) {
            Ok(depth) => depth,
            Err(e) => {
                swapchain.destroy(&mut self.device);
                return Err(PresentError::vk("create_depth_target", e));
            }
        };

        let command_buffers = match self.fill_targets(&mut swapchain, depth, format_changed) {
            Ok(cbs) => cbs,
            Err(e) => {
                swapchain.destroy(&mut self.device);
                self.device.destroy_depth_target(depth);
                return Err(e);
            }
        };

        info!(
            "swapchain rebuilt: {}x{} {:?}, {} images",
            config.extent.width,
            config.extent.height,
            config.present_mode,
            swapchain.len()
        );
        self.targets = Some(FrameTargets {
            swapchain,
            depth,
            command_buffers,
        });

        // 8.
        self.prepared = true;
        self.notify_targets_changed()
    }

    /// Scene (on a format change), framebuffers (6.) and command buffers (7.)
    /// for a freshly built chain. The caller owns cleanup on error.
    fn fill_targets(
        &mut self,
        swapchain: &mut Swapchain,
        depth: DepthTarget,
        format_changed: bool,
    ) -> Result<Vec<vk::CommandBuffer>, PresentError> {
        let format = swapchain.config().format;
        if format_changed {
            info!("color format changed to {format:?}, rebuilding scene");
            self.scene.release(&mut self.device);
            self.render_pass = vk::RenderPass::null();
            let info = self.target_info(swapchain);
            self.render_pass = self.scene.prepare(&mut self.device, &info)?;
        }

        swapchain.attach_framebuffers(&mut self.device, self.render_pass, depth.view)?;

        self.device
            .allocate_command_buffers(swapchain.len() as u32)
            .call("vkAllocateCommandBuffers")
    }
}

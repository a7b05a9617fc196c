// SPDX-License-Identifier: CEPL-1.0
//! Frame-rate bar along the top edge, drawn in its own pass after the scene
//! and re-recorded whenever fresh stats arrive.
use std::cell::Cell;
use std::rc::Rc;

use ash::vk;
use tracing::{debug, warn};
use vkswap_render::{FrameStats, FrameTarget, OverlayListener, PresentDevice, PresentError};

use crate::{failed, AshDevice};

const BAR_HEIGHT: u32 = 6;

/// Bar rectangle for `fps` against `target_fps`; `None` when nothing shows.
pub(crate) fn bar_rect(extent: vk::Extent2D, fps: f32, target_fps: f32) -> Option<vk::Rect2D> {
    if target_fps <= 0.0 || fps <= 0.0 || extent.width == 0 || extent.height == 0 {
        return None;
    }
    let ratio = (fps / target_fps).min(1.0);
    let width = (extent.width as f32 * ratio) as u32;
    (width > 0).then_some(vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent: vk::Extent2D {
            width,
            height: BAR_HEIGHT.min(extent.height),
        },
    })
}

/// Red at zero, green at or above the target.
pub(crate) fn bar_color(fps: f32, target_fps: f32) -> [f32; 4] {
    let t = if target_fps > 0.0 {
        (fps / target_fps).clamp(0.0, 1.0)
    } else {
        0.0
    };
    [1.0 - t, t, 0.1, 1.0]
}

pub struct FrameBarOverlay {
    target_fps: f32,
    visible: Rc<Cell<bool>>,
    fps: f32,
    device: Option<ash::Device>,
    format: vk::Format,
    render_pass: vk::RenderPass,
    frames: Vec<FrameTarget>,
    framebuffers: Vec<vk::Framebuffer>,
    command_buffers: Vec<vk::CommandBuffer>,
}

impl FrameBarOverlay {
    /// `visible` is shared with whoever toggles the bar.
    pub fn new(target_fps: f32, visible: Rc<Cell<bool>>) -> Self {
        Self {
            target_fps,
            visible,
            fps: 0.0,
            device: None,
            format: vk::Format::UNDEFINED,
            render_pass: vk::RenderPass::null(),
            frames: Vec::new(),
            framebuffers: Vec::new(),
            command_buffers: Vec::new(),
        }
    }

    fn drop_targets(&mut self, device: &mut AshDevice) {
        device.free_command_buffers(&self.command_buffers);
        self.command_buffers.clear();
        for fb in self.framebuffers.drain(..) {
            device.destroy_framebuffer(fb);
        }
        self.frames.clear();
    }

    /// Loads what the scene left and returns the image to present layout.
    unsafe fn create_render_pass(d: &ash::Device, format: vk::Format) -> Result<vk::RenderPass, PresentError> {
        let attachments = [vk::AttachmentDescription::default()
            .format(format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::LOAD)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::PRESENT_SRC_KHR)
            .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)];
        let color_ref = [vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];
        let subpasses = [vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_ref)];
        let dependencies = [vk::SubpassDependency::default()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .src_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
            .dst_access_mask(
                vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            )];
        let info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);
        unsafe { d.create_render_pass(&info, None) }.map_err(failed("vkCreateRenderPass"))
    }

    /// Re-records every buffer. Only called while the queue is idle.
    fn record_all(&self) -> Result<(), vk::Result> {
        let Some(d) = &self.device else {
            return Ok(());
        };
        let rect = self
            .frames
            .first()
            .and_then(|f| bar_rect(f.extent, self.fps, self.target_fps));
        let color = bar_color(self.fps, self.target_fps);

        for ((frame, &fb), &cmd) in self
            .frames
            .iter()
            .zip(&self.framebuffers)
            .zip(&self.command_buffers)
        {
            let begin = vk::RenderPassBeginInfo::default()
                .render_pass(self.render_pass)
                .framebuffer(fb)
                .render_area(vk::Rect2D {
                    offset: vk::Offset2D::default(),
                    extent: frame.extent,
                });
            unsafe {
                d.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;
                d.begin_command_buffer(cmd, &vk::CommandBufferBeginInfo::default())?;
                d.cmd_begin_render_pass(cmd, &begin, vk::SubpassContents::INLINE);
                if let Some(rect) = rect {
                    let clear = vk::ClearAttachment {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        color_attachment: 0,
                        clear_value: vk::ClearValue {
                            color: vk::ClearColorValue { float32: color },
                        },
                    };
                    let region = vk::ClearRect {
                        rect,
                        base_array_layer: 0,
                        layer_count: 1,
                    };
                    d.cmd_clear_attachments(cmd, &[clear], &[region]);
                }
                d.cmd_end_render_pass(cmd);
                d.end_command_buffer(cmd)?;
            }
        }
        Ok(())
    }
}

impl OverlayListener<AshDevice> for FrameBarOverlay {
    fn reallocate_command_buffers(
        &mut self,
        device: &mut AshDevice,
        frames: &[FrameTarget],
    ) -> Result<(), PresentError> {
        self.drop_targets(device);
        let Some(first) = frames.first() else {
            return Ok(());
        };

        if self.render_pass == vk::RenderPass::null() || self.format != first.format {
            let d = device.raw();
            unsafe {
                d.destroy_render_pass(self.render_pass, None);
            }
            self.render_pass = vk::RenderPass::null();
            self.render_pass = unsafe { Self::create_render_pass(d, first.format) }?;
            self.format = first.format;
            debug!("frame bar pass rebuilt for {:?}", first.format);
        }
        self.device = Some(device.raw().clone());

        for frame in frames {
            let fb = device
                .create_framebuffer(self.render_pass, &[frame.view], frame.extent)
                .map_err(failed("vkCreateFramebuffer"))?;
            self.framebuffers.push(fb);
        }
        self.command_buffers = device
            .allocate_command_buffers(frames.len() as u32)
            .map_err(failed("vkAllocateCommandBuffers"))?;
        self.frames = frames.to_vec();
        self.record_all().map_err(failed("recording frame bar"))
    }

    fn command_buffer(&self, image_index: u32) -> Option<vk::CommandBuffer> {
        if !self.visible.get() {
            return None;
        }
        self.command_buffers.get(image_index as usize).copied()
    }

    fn update(&mut self, _title: &str, stats: &FrameStats) {
        self.fps = stats.fps;
        if let Err(e) = self.record_all() {
            warn!("frame bar not updated: {e:?}");
        }
    }

    fn release(&mut self, device: &mut AshDevice) {
        self.drop_targets(device);
        unsafe { device.raw().destroy_render_pass(self.render_pass, None) };
        self.render_pass = vk::RenderPass::null();
        self.format = vk::Format::UNDEFINED;
        self.device = None;
    }
}

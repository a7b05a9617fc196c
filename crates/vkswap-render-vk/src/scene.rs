// SPDX-License-Identifier: CEPL-1.0
//! A single colored triangle: render pass, pipeline, vertex buffer.
use std::cell::Cell;
use std::io::Cursor;
use std::rc::Rc;

use ash::util::read_spv;
use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use tracing::debug;
use vkswap_render::{FrameTarget, PresentError, SceneRenderer, TargetInfo};

use crate::{failed, AshDevice};

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct Vertex {
    pos: [f32; 2],
    color: [f32; 3],
}

const TRIANGLE: [Vertex; 3] = [
    Vertex {
        pos: [0.0, -0.6],
        color: [1.0, 0.2, 0.2],
    },
    Vertex {
        pos: [0.6, 0.5],
        color: [0.2, 1.0, 0.2],
    },
    Vertex {
        pos: [-0.6, 0.5],
        color: [0.2, 0.4, 1.0],
    },
];

pub struct TriangleScene {
    mvp: Rc<Cell<Mat4>>,
    render_pass: vk::RenderPass,
    layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,
    vertex_buffer: vk::Buffer,
    vertex_memory: vk::DeviceMemory,
}

impl TriangleScene {
    /// `mvp` is read every frame and pushed as a constant.
    pub fn new(mvp: Rc<Cell<Mat4>>) -> Self {
        Self {
            mvp,
            render_pass: vk::RenderPass::null(),
            layout: vk::PipelineLayout::null(),
            pipeline: vk::Pipeline::null(),
            vertex_buffer: vk::Buffer::null(),
            vertex_memory: vk::DeviceMemory::null(),
        }
    }

    unsafe fn build(&mut self, device: &AshDevice, info: &TargetInfo) -> Result<(), PresentError> {
        let d = device.raw();
        self.render_pass = unsafe { create_render_pass(d, info.color_format, info.depth_format) }?;
        self.layout = unsafe { create_layout(d) }?;
        self.pipeline = unsafe { create_pipeline(d, self.render_pass, self.layout) }?;
        let (buffer, memory) = unsafe { upload_vertices(device) }?;
        self.vertex_buffer = buffer;
        self.vertex_memory = memory;
        Ok(())
    }
}

impl SceneRenderer<AshDevice> for TriangleScene {
    fn prepare(&mut self, device: &mut AshDevice, info: &TargetInfo) -> Result<vk::RenderPass, PresentError> {
        match unsafe { self.build(device, info) } {
            Ok(()) => {
                debug!("triangle scene ready for {:?}", info.color_format);
                Ok(self.render_pass)
            }
            Err(e) => {
                self.release(device);
                Err(e)
            }
        }
    }

    fn record(&mut self, device: &mut AshDevice, cmd: vk::CommandBuffer, _frame: &FrameTarget) {
        let d = device.raw();
        let mvp = self.mvp.get().to_cols_array();
        unsafe {
            d.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipeline);
            d.cmd_push_constants(
                cmd,
                self.layout,
                vk::ShaderStageFlags::VERTEX,
                0,
                bytemuck::bytes_of(&mvp),
            );
            d.cmd_bind_vertex_buffers(cmd, 0, &[self.vertex_buffer], &[0]);
            d.cmd_draw(cmd, TRIANGLE.len() as u32, 1, 0, 0);
        }
    }

    fn release(&mut self, device: &mut AshDevice) {
        let d = device.raw();
        // destroying a null handle is a no-op
        unsafe {
            d.destroy_pipeline(self.pipeline, None);
            d.destroy_pipeline_layout(self.layout, None);
            d.destroy_render_pass(self.render_pass, None);
            d.destroy_buffer(self.vertex_buffer, None);
            d.free_memory(self.vertex_memory, None);
        }
        self.pipeline = vk::Pipeline::null();
        self.layout = vk::PipelineLayout::null();
        self.render_pass = vk::RenderPass::null();
        self.vertex_buffer = vk::Buffer::null();
        self.vertex_memory = vk::DeviceMemory::null();
    }
}

/// Color cleared and handed to present, depth cleared and discarded.
unsafe fn create_render_pass(
    d: &ash::Device,
    color: vk::Format,
    depth: vk::Format,
) -> Result<vk::RenderPass, PresentError> {
    let attachments = [
        vk::AttachmentDescription::default()
            .format(color)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::PRESENT_SRC_KHR),
        vk::AttachmentDescription::default()
            .format(depth)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::DONT_CARE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
    ];
    let color_ref = [vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    }];
    let depth_ref = vk::AttachmentReference {
        attachment: 1,
        layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    };
    let subpasses = [vk::SubpassDescription::default()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_ref)
        .depth_stencil_attachment(&depth_ref)];
    let stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS;
    let dependencies = [vk::SubpassDependency::default()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(stages)
        .dst_stage_mask(stages)
        .dst_access_mask(
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        )];
    let info = vk::RenderPassCreateInfo::default()
        .attachments(&attachments)
        .subpasses(&subpasses)
        .dependencies(&dependencies);
    unsafe { d.create_render_pass(&info, None) }.map_err(failed("vkCreateRenderPass"))
}

unsafe fn create_layout(d: &ash::Device) -> Result<vk::PipelineLayout, PresentError> {
    let ranges = [vk::PushConstantRange {
        stage_flags: vk::ShaderStageFlags::VERTEX,
        offset: 0,
        size: std::mem::size_of::<Mat4>() as u32,
    }];
    let info = vk::PipelineLayoutCreateInfo::default().push_constant_ranges(&ranges);
    unsafe { d.create_pipeline_layout(&info, None) }.map_err(failed("vkCreatePipelineLayout"))
}

unsafe fn shader_module(d: &ash::Device, bytes: &[u8]) -> Result<vk::ShaderModule, PresentError> {
    let code = read_spv(&mut Cursor::new(bytes)).map_err(|e| PresentError::Collaborator(Box::new(e)))?;
    let info = vk::ShaderModuleCreateInfo::default().code(&code);
    unsafe { d.create_shader_module(&info, None) }.map_err(failed("vkCreateShaderModule"))
}

unsafe fn create_pipeline(
    d: &ash::Device,
    render_pass: vk::RenderPass,
    layout: vk::PipelineLayout,
) -> Result<vk::Pipeline, PresentError> {
    let vs = unsafe { shader_module(d, include_bytes!(concat!(env!("OUT_DIR"), "/tri.vert.spv"))) }?;
    let fs = match unsafe { shader_module(d, include_bytes!(concat!(env!("OUT_DIR"), "/tri.frag.spv"))) } {
        Ok(m) => m,
        Err(e) => {
            unsafe { d.destroy_shader_module(vs, None) };
            return Err(e);
        }
    };

    let stages = [
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(vs)
            .name(c"main"),
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::FRAGMENT)
            .module(fs)
            .name(c"main"),
    ];

    let bindings = [vk::VertexInputBindingDescription {
        binding: 0,
        stride: std::mem::size_of::<Vertex>() as u32,
        input_rate: vk::VertexInputRate::VERTEX,
    }];
    let attributes = [
        vk::VertexInputAttributeDescription {
            location: 0,
            binding: 0,
            format: vk::Format::R32G32_SFLOAT,
            offset: 0,
        },
        vk::VertexInputAttributeDescription {
            location: 1,
            binding: 0,
            format: vk::Format::R32G32B32_SFLOAT,
            offset: std::mem::size_of::<[f32; 2]>() as u32,
        },
    ];
    let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
        .vertex_binding_descriptions(&bindings)
        .vertex_attribute_descriptions(&attributes);
    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
        .topology(vk::PrimitiveTopology::TRIANGLE_LIST);
    // viewport and scissor are set per frame
    let dyn_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dyn_states);
    let viewport = vk::PipelineViewportStateCreateInfo::default()
        .viewport_count(1)
        .scissor_count(1);
    let raster = vk::PipelineRasterizationStateCreateInfo::default()
        .polygon_mode(vk::PolygonMode::FILL)
        .cull_mode(vk::CullModeFlags::NONE)
        .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
        .line_width(1.0);
    let multisample = vk::PipelineMultisampleStateCreateInfo::default()
        .rasterization_samples(vk::SampleCountFlags::TYPE_1);
    let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
        .depth_test_enable(true)
        .depth_write_enable(true)
        .depth_compare_op(vk::CompareOp::LESS_OR_EQUAL);
    let blend_attachments = [vk::PipelineColorBlendAttachmentState::default()
        .color_write_mask(vk::ColorComponentFlags::RGBA)
        .blend_enable(false)];
    let blend = vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachments);

    let info = vk::GraphicsPipelineCreateInfo::default()
        .stages(&stages)
        .vertex_input_state(&vertex_input)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport)
        .rasterization_state(&raster)
        .multisample_state(&multisample)
        .depth_stencil_state(&depth_stencil)
        .color_blend_state(&blend)
        .dynamic_state(&dynamic)
        .layout(layout)
        .render_pass(render_pass)
        .subpass(0);

    let result = unsafe {
        d.create_graphics_pipelines(vk::PipelineCache::null(), std::slice::from_ref(&info), None)
    };
    unsafe {
        d.destroy_shader_module(vs, None);
        d.destroy_shader_module(fs, None);
    }
    match result {
        Ok(pipelines) => pipelines
            .into_iter()
            .next()
            .ok_or(PresentError::vk("vkCreateGraphicsPipelines", vk::Result::ERROR_UNKNOWN)),
        Err((_, e)) => Err(PresentError::vk("vkCreateGraphicsPipelines", e)),
    }
}

/// Host-visible vertex buffer filled once.
unsafe fn upload_vertices(device: &AshDevice) -> Result<(vk::Buffer, vk::DeviceMemory), PresentError> {
    let d = device.raw();
    let bytes: &[u8] = bytemuck::cast_slice(&TRIANGLE);
    let info = vk::BufferCreateInfo::default()
        .size(bytes.len() as vk::DeviceSize)
        .usage(vk::BufferUsageFlags::VERTEX_BUFFER)
        .sharing_mode(vk::SharingMode::EXCLUSIVE);
    let buffer = unsafe { d.create_buffer(&info, None) }.map_err(failed("vkCreateBuffer"))?;

    let req = unsafe { d.get_buffer_memory_requirements(buffer) };
    let host = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
    let uploaded = device
        .memory_type(req.memory_type_bits, host)
        .ok_or(PresentError::vk("vkAllocateMemory", vk::Result::ERROR_OUT_OF_DEVICE_MEMORY))
        .and_then(|type_index| {
            let alloc = vk::MemoryAllocateInfo::default()
                .allocation_size(req.size)
                .memory_type_index(type_index);
            unsafe { d.allocate_memory(&alloc, None) }.map_err(failed("vkAllocateMemory"))
        })
        .and_then(|memory| {
            let filled = unsafe {
                d.bind_buffer_memory(buffer, memory, 0)
                    .and_then(|()| d.map_memory(memory, 0, req.size, vk::MemoryMapFlags::empty()))
                    .map(|ptr| {
                        std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.cast::<u8>(), bytes.len());
                        d.unmap_memory(memory);
                    })
            };
            match filled {
                Ok(()) => Ok(memory),
                Err(e) => {
                    unsafe { d.free_memory(memory, None) };
                    Err(PresentError::vk("vkMapMemory", e))
                }
            }
        });

    match uploaded {
        Ok(memory) => Ok((buffer, memory)),
        Err(e) => {
            unsafe { d.destroy_buffer(buffer, None) };
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_layout_matches_the_shader_inputs() {
        assert_eq!(std::mem::size_of::<Vertex>(), 20);
        assert_eq!(bytemuck::cast_slice::<Vertex, u8>(&TRIANGLE).len(), 60);
    }

    #[test]
    fn push_constant_fits_the_guaranteed_minimum() {
        // 128 bytes is the smallest maxPushConstantsSize a device may report
        assert!(std::mem::size_of::<Mat4>() <= 128);
    }

    #[test]
    fn identity_mvp_keeps_the_triangle_on_screen() {
        let mvp = Mat4::IDENTITY;
        for v in TRIANGLE {
            let p = mvp.project_point3(glam::Vec3::new(v.pos[0], v.pos[1], 0.0));
            assert!(p.x.abs() <= 1.0 && p.y.abs() <= 1.0);
        }
    }
}

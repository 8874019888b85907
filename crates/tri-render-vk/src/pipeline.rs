// SPDX-License-Identifier: CEPL-1.0
//! The one graphics pipeline and its prerecorded per-image command buffers.

use std::io::Cursor;

use anyhow::{anyhow, Context, Result};
use ash::vk;
use tracing::debug;
use tri_render::shader::{ShaderBlob, ShaderPair};

use crate::context::{DeviceContext, RenderPath};
use crate::swapchain::Swapchain;

pub struct FramePipeline {
    device: ash::Device,
    path: RenderPath,
    extent: vk::Extent2D,
    // RenderPass path only; null / empty on the dynamic path.
    render_pass: vk::RenderPass,
    framebuffers: Vec<vk::Framebuffer>,
    layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,
    pool: vk::CommandPool,
    cmd_bufs: Vec<vk::CommandBuffer>,
    clear: vk::ClearValue,
}

fn clear_value(rgba: [f32; 4]) -> vk::ClearValue {
    vk::ClearValue {
        color: vk::ClearColorValue { float32: rgba },
    }
}

const COLOR_RANGE: vk::ImageSubresourceRange = vk::ImageSubresourceRange {
    aspect_mask: vk::ImageAspectFlags::COLOR,
    base_mip_level: 0,
    level_count: 1,
    base_array_layer: 0,
    layer_count: 1,
};

/// Native-order words of a checked blob. `read_spv` handles alignment and
/// swaps modules written in the other byte order.
fn spirv_words(blob: &ShaderBlob) -> Result<Vec<u32>> {
    ash::util::read_spv(&mut Cursor::new(blob.bytes())).context("read_spv")
}

unsafe fn create_shader_module(device: &ash::Device, blob: &ShaderBlob) -> Result<vk::ShaderModule> {
    let words = spirv_words(blob)?;
    let info = vk::ShaderModuleCreateInfo {
        s_type: vk::StructureType::SHADER_MODULE_CREATE_INFO,
        code_size: words.len() * 4,
        p_code: words.as_ptr(),
        ..Default::default()
    };
    device
        .create_shader_module(&info, None)
        .context("create_shader_module")
}

unsafe fn create_render_pass(device: &ash::Device, format: vk::Format) -> Result<vk::RenderPass> {
    let color = vk::AttachmentDescription {
        format,
        samples: vk::SampleCountFlags::TYPE_1,
        load_op: vk::AttachmentLoadOp::CLEAR,
        store_op: vk::AttachmentStoreOp::STORE,
        stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
        stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
        initial_layout: vk::ImageLayout::UNDEFINED,
        final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
        ..Default::default()
    };
    let color_ref = vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    };
    let subpass = vk::SubpassDescription {
        pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
        color_attachment_count: 1,
        p_color_attachments: &color_ref,
        ..Default::default()
    };
    // The layout transition must wait for the acquire semaphore, which is
    // waited at COLOR_ATTACHMENT_OUTPUT.
    let dependency = vk::SubpassDependency {
        src_subpass: vk::SUBPASS_EXTERNAL,
        dst_subpass: 0,
        src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        src_access_mask: vk::AccessFlags::empty(),
        dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        ..Default::default()
    };
    let info = vk::RenderPassCreateInfo {
        s_type: vk::StructureType::RENDER_PASS_CREATE_INFO,
        attachment_count: 1,
        p_attachments: &color,
        subpass_count: 1,
        p_subpasses: &subpass,
        dependency_count: 1,
        p_dependencies: &dependency,
        ..Default::default()
    };
    device
        .create_render_pass(&info, None)
        .context("create_render_pass")
}

impl FramePipeline {
    // STRICT ORDER (build):
    // 1) Command pool + one primary buffer per swapchain image
    // 2) Render pass + framebuffers (RenderPass path only)
    // 3) Shader modules -> layout -> pipeline; modules are dropped right after
    // 4) Record every command buffer once
    pub(crate) unsafe fn new(
        ctx: &DeviceContext,
        swapchain: &Swapchain,
        shaders: &ShaderPair,
        clear_color: [f32; 4],
    ) -> Result<Self> {
        let device = &ctx.device;

        // Everything starts null so Drop can clean up a partial build.
        let mut fp = FramePipeline {
            device: device.clone(),
            path: ctx.path,
            extent: swapchain.extent,
            render_pass: vk::RenderPass::null(),
            framebuffers: Vec::new(),
            layout: vk::PipelineLayout::null(),
            pipeline: vk::Pipeline::null(),
            pool: vk::CommandPool::null(),
            cmd_bufs: Vec::new(),
            clear: clear_value(clear_color),
        };

        let pool_info = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            queue_family_index: ctx.queue_family,
            // Recorded once at creation, never reset.
            flags: vk::CommandPoolCreateFlags::empty(),
            ..Default::default()
        };
        fp.pool = device
            .create_command_pool(&pool_info, None)
            .context("create_command_pool")?;
        let alloc_info = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: fp.pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: swapchain.image_count() as u32,
            ..Default::default()
        };
        fp.cmd_bufs = device
            .allocate_command_buffers(&alloc_info)
            .context("allocate_command_buffers")?;

        if fp.path == RenderPath::RenderPass {
            fp.render_pass = create_render_pass(device, swapchain.format)?;
            for &view in &swapchain.views {
                let fb_info = vk::FramebufferCreateInfo {
                    s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
                    render_pass: fp.render_pass,
                    attachment_count: 1,
                    p_attachments: &view,
                    width: fp.extent.width,
                    height: fp.extent.height,
                    layers: 1,
                    ..Default::default()
                };
                let fb = device
                    .create_framebuffer(&fb_info, None)
                    .context("create_framebuffer")?;
                fp.framebuffers.push(fb);
            }
        }

        let layout_info = vk::PipelineLayoutCreateInfo {
            s_type: vk::StructureType::PIPELINE_LAYOUT_CREATE_INFO,
            ..Default::default()
        };
        fp.layout = device
            .create_pipeline_layout(&layout_info, None)
            .context("create_pipeline_layout")?;

        let vs = create_shader_module(device, &shaders.vertex)?;
        let fs = match create_shader_module(device, &shaders.fragment) {
            Ok(m) => m,
            Err(e) => {
                device.destroy_shader_module(vs, None);
                return Err(e);
            }
        };
        let built = fp.create_pipeline(swapchain.format, vs, fs);
        device.destroy_shader_module(vs, None);
        device.destroy_shader_module(fs, None);
        fp.pipeline = built?;

        fp.record_all(swapchain)?;
        debug!(
            "frame pipeline: {:?}, {} command buffers",
            fp.path,
            fp.cmd_bufs.len()
        );
        Ok(fp)
    }

    unsafe fn create_pipeline(
        &self,
        color_format: vk::Format,
        vs: vk::ShaderModule,
        fs: vk::ShaderModule,
    ) -> Result<vk::Pipeline> {
        let entry = c"main";
        let stages = [
            vk::PipelineShaderStageCreateInfo {
                s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
                stage: vk::ShaderStageFlags::VERTEX,
                module: vs,
                p_name: entry.as_ptr(),
                ..Default::default()
            },
            vk::PipelineShaderStageCreateInfo {
                s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
                stage: vk::ShaderStageFlags::FRAGMENT,
                module: fs,
                p_name: entry.as_ptr(),
                ..Default::default()
            },
        ];

        // Positions come from gl_VertexIndex; no buffers bound.
        let vertex_input = vk::PipelineVertexInputStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_VERTEX_INPUT_STATE_CREATE_INFO,
            ..Default::default()
        };
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_INPUT_ASSEMBLY_STATE_CREATE_INFO,
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            ..Default::default()
        };

        // Fixed: the extent never changes for the life of the pipeline.
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: self.extent.width as f32,
            height: self.extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: self.extent,
        };
        let viewport_state = vk::PipelineViewportStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_VIEWPORT_STATE_CREATE_INFO,
            viewport_count: 1,
            p_viewports: &viewport,
            scissor_count: 1,
            p_scissors: &scissor,
            ..Default::default()
        };
        let raster = vk::PipelineRasterizationStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_RASTERIZATION_STATE_CREATE_INFO,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::NONE,
            front_face: vk::FrontFace::CLOCKWISE,
            line_width: 1.0,
            ..Default::default()
        };
        let multisample = vk::PipelineMultisampleStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_MULTISAMPLE_STATE_CREATE_INFO,
            rasterization_samples: vk::SampleCountFlags::TYPE_1,
            ..Default::default()
        };
        let color_blend_att = vk::PipelineColorBlendAttachmentState {
            color_write_mask: vk::ColorComponentFlags::RGBA,
            blend_enable: vk::FALSE,
            ..Default::default()
        };
        let color_blend = vk::PipelineColorBlendStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_COLOR_BLEND_STATE_CREATE_INFO,
            attachment_count: 1,
            p_attachments: &color_blend_att,
            ..Default::default()
        };

        let rendering = vk::PipelineRenderingCreateInfo {
            s_type: vk::StructureType::PIPELINE_RENDERING_CREATE_INFO,
            color_attachment_count: 1,
            p_color_attachment_formats: &color_format,
            ..Default::default()
        };
        let p_next = match self.path {
            RenderPath::Dynamic => (&rendering as *const vk::PipelineRenderingCreateInfo).cast(),
            RenderPath::RenderPass => std::ptr::null(),
        };

        let pipeline_info = vk::GraphicsPipelineCreateInfo {
            s_type: vk::StructureType::GRAPHICS_PIPELINE_CREATE_INFO,
            p_next,
            stage_count: stages.len() as u32,
            p_stages: stages.as_ptr(),
            p_vertex_input_state: &vertex_input,
            p_input_assembly_state: &input_assembly,
            p_viewport_state: &viewport_state,
            p_rasterization_state: &raster,
            p_multisample_state: &multisample,
            p_color_blend_state: &color_blend,
            layout: self.layout,
            render_pass: self.render_pass,
            subpass: 0,
            ..Default::default()
        };

        let pipelines = self
            .device
            .create_graphics_pipelines(
                vk::PipelineCache::null(),
                std::slice::from_ref(&pipeline_info),
                None,
            )
            .map_err(|(_, err)| anyhow!("create_graphics_pipelines failed: {:?}", err))?;
        pipelines
            .first()
            .copied()
            .ok_or_else(|| anyhow!("create_graphics_pipelines returned nothing"))
    }

    unsafe fn barrier(
        &self,
        cmd: vk::CommandBuffer,
        image: vk::Image,
        (src_stage, src_access, old_layout): (vk::PipelineStageFlags2, vk::AccessFlags2, vk::ImageLayout),
        (dst_stage, dst_access, new_layout): (vk::PipelineStageFlags2, vk::AccessFlags2, vk::ImageLayout),
    ) {
        let barrier = vk::ImageMemoryBarrier2 {
            s_type: vk::StructureType::IMAGE_MEMORY_BARRIER_2,
            src_stage_mask: src_stage,
            src_access_mask: src_access,
            dst_stage_mask: dst_stage,
            dst_access_mask: dst_access,
            old_layout,
            new_layout,
            image,
            subresource_range: COLOR_RANGE,
            ..Default::default()
        };
        let dep = vk::DependencyInfo {
            s_type: vk::StructureType::DEPENDENCY_INFO,
            image_memory_barrier_count: 1,
            p_image_memory_barriers: &barrier,
            ..Default::default()
        };
        self.device.cmd_pipeline_barrier2(cmd, &dep);
    }

    unsafe fn record_dynamic(&self, cmd: vk::CommandBuffer, image: vk::Image, view: vk::ImageView) {
        // UNDEFINED -> COLOR_ATTACHMENT_OPTIMAL; contents are cleared anyway.
        self.barrier(
            cmd,
            image,
            (
                vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
                vk::AccessFlags2::empty(),
                vk::ImageLayout::UNDEFINED,
            ),
            (
                vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
                vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            ),
        );

        let color_att = vk::RenderingAttachmentInfo {
            s_type: vk::StructureType::RENDERING_ATTACHMENT_INFO,
            image_view: view,
            image_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            clear_value: self.clear,
            ..Default::default()
        };
        let rendering_info = vk::RenderingInfo {
            s_type: vk::StructureType::RENDERING_INFO,
            render_area: vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: self.extent,
            },
            layer_count: 1,
            color_attachment_count: 1,
            p_color_attachments: &color_att,
            ..Default::default()
        };
        self.device.cmd_begin_rendering(cmd, &rendering_info);
        self.draw(cmd);
        self.device.cmd_end_rendering(cmd);

        self.barrier(
            cmd,
            image,
            (
                vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
                vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            ),
            (
                vk::PipelineStageFlags2::BOTTOM_OF_PIPE,
                vk::AccessFlags2::empty(),
                vk::ImageLayout::PRESENT_SRC_KHR,
            ),
        );
    }

    unsafe fn record_render_pass(&self, cmd: vk::CommandBuffer, framebuffer: vk::Framebuffer) {
        let begin = vk::RenderPassBeginInfo {
            s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
            render_pass: self.render_pass,
            framebuffer,
            render_area: vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: self.extent,
            },
            clear_value_count: 1,
            p_clear_values: &self.clear,
            ..Default::default()
        };
        self.device
            .cmd_begin_render_pass(cmd, &begin, vk::SubpassContents::INLINE);
        self.draw(cmd);
        self.device.cmd_end_render_pass(cmd);
    }

    #[inline]
    unsafe fn draw(&self, cmd: vk::CommandBuffer) {
        self.device
            .cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipeline);
        self.device.cmd_draw(cmd, 3, 1, 0, 0);
    }

    unsafe fn record_all(&self, swapchain: &Swapchain) -> Result<()> {
        for (i, &cmd) in self.cmd_bufs.iter().enumerate() {
            let begin = vk::CommandBufferBeginInfo {
                s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
                ..Default::default()
            };
            self.device
                .begin_command_buffer(cmd, &begin)
                .context("begin_command_buffer")?;

            match self.path {
                RenderPath::Dynamic => self.record_dynamic(cmd, swapchain.images[i], swapchain.views[i]),
                RenderPath::RenderPass => self.record_render_pass(cmd, self.framebuffers[i]),
            }

            self.device
                .end_command_buffer(cmd)
                .context("end_command_buffer")?;
        }
        Ok(())
    }

    pub fn command_buffers(&self) -> &[vk::CommandBuffer] {
        &self.cmd_bufs
    }
}

// STRICT ORDER (teardown):
// - Caller has idled the device (FrameSynchronizer::destroy)
// - Pipeline + layout, then framebuffers, then the render pass they use
// - Command buffers go back to the pool before the pool dies
// - Swapchain views are NOT ours; Swapchain drops after us
impl Drop for FramePipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline(self.pipeline, None);
            self.device.destroy_pipeline_layout(self.layout, None);
            for &fb in &self.framebuffers {
                self.device.destroy_framebuffer(fb, None);
            }
            self.device.destroy_render_pass(self.render_pass, None);
            if !self.cmd_bufs.is_empty() {
                self.device.free_command_buffers(self.pool, &self.cmd_bufs);
            }
            self.device.destroy_command_pool(self.pool, None);
        }
    }
}

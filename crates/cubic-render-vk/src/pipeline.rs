// SPDX-License-Identifier: CEPL-1.0
use std::borrow::Cow;
use std::ffi::CStr;
use std::io::Cursor;
use std::path::PathBuf;

use ash::util::read_spv;
use ash::vk;
use tracing::{debug, info};

use crate::error::{ShaderError, VkError, VkResultExt};
use crate::gpu::Gpu;

pub const VERTEX_SHADER: &str = "triangle.vert";
pub const FRAGMENT_SHADER: &str = "triangle.frag";

/// Supplies compiled SPIR-V by logical name.
pub trait ShaderSource {
    fn load(&self, name: &str) -> Result<Cow<'static, [u8]>, ShaderError>;
}

/// SPIR-V compiled by build.rs and baked into the binary.
#[cfg(feature = "embed-shaders")]
pub struct EmbeddedShaders;

#[cfg(feature = "embed-shaders")]
impl ShaderSource for EmbeddedShaders {
    fn load(&self, name: &str) -> Result<Cow<'static, [u8]>, ShaderError> {
        let bytes: &'static [u8] = match name {
            VERTEX_SHADER => include_bytes!(concat!(env!("OUT_DIR"), "/triangle.vert.spv")),
            FRAGMENT_SHADER => include_bytes!(concat!(env!("OUT_DIR"), "/triangle.frag.spv")),
            _ => {
                return Err(ShaderError::NotFound {
                    name: name.to_owned(),
                })
            }
        };
        Ok(Cow::Borrowed(bytes))
    }
}

/// Reads `<dir>/<name>.spv`.
pub struct ShaderDir(pub PathBuf);

impl ShaderSource for ShaderDir {
    fn load(&self, name: &str) -> Result<Cow<'static, [u8]>, ShaderError> {
        let path = self.0.join(format!("{name}.spv"));
        match std::fs::read(&path) {
            Ok(bytes) => {
                debug!("loaded {} ({} bytes)", path.display(), bytes.len());
                Ok(Cow::Owned(bytes))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ShaderError::NotFound {
                name: path.display().to_string(),
            }),
            Err(source) => Err(ShaderError::Io {
                name: path.display().to_string(),
                source,
            }),
        }
    }
}

pub fn load_spirv(source: &dyn ShaderSource, name: &str) -> Result<Vec<u32>, ShaderError> {
    let bytes = source.load(name)?;
    read_spv(&mut Cursor::new(&bytes[..])).map_err(|source| ShaderError::InvalidSpirv {
        name: name.to_owned(),
        source,
    })
}

/// One clear-and-store color attachment, UNDEFINED to PRESENT_SRC, one subpass.
pub unsafe fn create_render_pass<G: Gpu>(
    gpu: &G,
    format: vk::Format,
) -> Result<vk::RenderPass, VkError> {
    let color_att = vk::AttachmentDescription {
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
    let att_ref = vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    };
    let subpass = vk::SubpassDescription {
        pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
        color_attachment_count: 1,
        p_color_attachments: &att_ref,
        ..Default::default()
    };
    // The attachment write waits for the acquire semaphore's stage.
    let dependency = vk::SubpassDependency {
        src_subpass: vk::SUBPASS_EXTERNAL,
        dst_subpass: 0,
        src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        src_access_mask: vk::AccessFlags::empty(),
        dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        ..Default::default()
    };
    let rp_info = vk::RenderPassCreateInfo {
        s_type: vk::StructureType::RENDER_PASS_CREATE_INFO,
        attachment_count: 1,
        p_attachments: &color_att,
        subpass_count: 1,
        p_subpasses: &subpass,
        dependency_count: 1,
        p_dependencies: &dependency,
        ..Default::default()
    };
    gpu.create_render_pass(&rp_info).vk_call("vkCreateRenderPass")
}

/// Builds the triangle pipeline. Shader modules are destroyed before returning.
pub unsafe fn create_pipeline<G: Gpu>(
    gpu: &G,
    render_pass: vk::RenderPass,
    shaders: &dyn ShaderSource,
) -> Result<(vk::PipelineLayout, vk::Pipeline), VkError> {
    let vs_code = load_spirv(shaders, VERTEX_SHADER)?;
    let fs_code = load_spirv(shaders, FRAGMENT_SHADER)?;

    let vs = gpu.create_shader_module(&vs_code).vk_call("vkCreateShaderModule")?;
    let fs = match gpu.create_shader_module(&fs_code).vk_call("vkCreateShaderModule") {
        Ok(m) => m,
        Err(e) => {
            gpu.destroy_shader_module(vs);
            return Err(e);
        }
    };

    let result = build_pipeline(gpu, render_pass, vs, fs);
    gpu.destroy_shader_module(vs);
    gpu.destroy_shader_module(fs);
    result
}

unsafe fn build_pipeline<G: Gpu>(
    gpu: &G,
    render_pass: vk::RenderPass,
    vs: vk::ShaderModule,
    fs: vk::ShaderModule,
) -> Result<(vk::PipelineLayout, vk::Pipeline), VkError> {
    let entry: &CStr = c"main";
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

    // Vertices come from gl_VertexIndex.
    let vertex_input = vk::PipelineVertexInputStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_VERTEX_INPUT_STATE_CREATE_INFO,
        ..Default::default()
    };
    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_INPUT_ASSEMBLY_STATE_CREATE_INFO,
        topology: vk::PrimitiveTopology::TRIANGLE_LIST,
        primitive_restart_enable: vk::FALSE,
        ..Default::default()
    };
    let dyn_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state = vk::PipelineDynamicStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_DYNAMIC_STATE_CREATE_INFO,
        dynamic_state_count: dyn_states.len() as u32,
        p_dynamic_states: dyn_states.as_ptr(),
        ..Default::default()
    };
    let viewport_state = vk::PipelineViewportStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_VIEWPORT_STATE_CREATE_INFO,
        viewport_count: 1,
        p_viewports: std::ptr::null(), // dynamic
        scissor_count: 1,
        p_scissors: std::ptr::null(), // dynamic
        ..Default::default()
    };
    let raster = vk::PipelineRasterizationStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_RASTERIZATION_STATE_CREATE_INFO,
        polygon_mode: vk::PolygonMode::FILL,
        cull_mode: vk::CullModeFlags::BACK,
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
        color_write_mask: vk::ColorComponentFlags::R
            | vk::ColorComponentFlags::G
            | vk::ColorComponentFlags::B
            | vk::ColorComponentFlags::A,
        blend_enable: vk::FALSE,
        ..Default::default()
    };
    let color_blend = vk::PipelineColorBlendStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_COLOR_BLEND_STATE_CREATE_INFO,
        attachment_count: 1,
        p_attachments: &color_blend_att,
        ..Default::default()
    };

    // No descriptor sets, no push constants.
    let layout_info = vk::PipelineLayoutCreateInfo {
        s_type: vk::StructureType::PIPELINE_LAYOUT_CREATE_INFO,
        ..Default::default()
    };
    let layout = gpu
        .create_pipeline_layout(&layout_info)
        .vk_call("vkCreatePipelineLayout")?;

    let pipeline_info = vk::GraphicsPipelineCreateInfo {
        s_type: vk::StructureType::GRAPHICS_PIPELINE_CREATE_INFO,
        stage_count: stages.len() as u32,
        p_stages: stages.as_ptr(),
        p_vertex_input_state: &vertex_input,
        p_input_assembly_state: &input_assembly,
        p_viewport_state: &viewport_state,
        p_rasterization_state: &raster,
        p_multisample_state: &multisample,
        p_color_blend_state: &color_blend,
        p_dynamic_state: &dynamic_state,
        layout,
        render_pass,
        subpass: 0,
        ..Default::default()
    };

    match gpu
        .create_graphics_pipeline(&pipeline_info)
        .vk_call("vkCreateGraphicsPipelines")
    {
        Ok(pipeline) => Ok((layout, pipeline)),
        Err(e) => {
            gpu.destroy_pipeline_layout(layout);
            Err(e)
        }
    }
}

/// One framebuffer per view. All or nothing.
pub unsafe fn create_framebuffers<G: Gpu>(
    gpu: &G,
    render_pass: vk::RenderPass,
    views: &[vk::ImageView],
    extent: vk::Extent2D,
) -> Result<Vec<vk::Framebuffer>, VkError> {
    let mut framebuffers = Vec::with_capacity(views.len());
    for view in views {
        let fb_info = vk::FramebufferCreateInfo {
            s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
            render_pass,
            attachment_count: 1,
            p_attachments: view,
            width: extent.width,
            height: extent.height,
            layers: 1,
            ..Default::default()
        };
        match gpu.create_framebuffer(&fb_info).vk_call("vkCreateFramebuffer") {
            Ok(fb) => framebuffers.push(fb),
            Err(e) => {
                for fb in framebuffers {
                    gpu.destroy_framebuffer(fb);
                }
                return Err(e);
            }
        }
    }
    Ok(framebuffers)
}

/// Render pass, pipeline and per-image framebuffers for one swapchain generation.
#[derive(Debug)]
pub struct RenderPipelineState {
    pub render_pass: vk::RenderPass,
    pub layout: vk::PipelineLayout,
    pub pipeline: vk::Pipeline,
    pub framebuffers: Vec<vk::Framebuffer>,
}

impl RenderPipelineState {
    /// Builds the whole group for `format`/`extent` with one framebuffer per view.
    pub unsafe fn build<G: Gpu>(
        gpu: &G,
        format: vk::Format,
        extent: vk::Extent2D,
        views: &[vk::ImageView],
        shaders: &dyn ShaderSource,
    ) -> Result<Self, VkError> {
        let render_pass = create_render_pass(gpu, format)?;
        let (layout, pipeline) = match create_pipeline(gpu, render_pass, shaders) {
            Ok(p) => p,
            Err(e) => {
                gpu.destroy_render_pass(render_pass);
                return Err(e);
            }
        };
        let framebuffers = match create_framebuffers(gpu, render_pass, views, extent) {
            Ok(f) => f,
            Err(e) => {
                gpu.destroy_pipeline(pipeline);
                gpu.destroy_pipeline_layout(layout);
                gpu.destroy_render_pass(render_pass);
                return Err(e);
            }
        };
        info!("pipeline ready ({} framebuffers)", framebuffers.len());
        Ok(Self {
            render_pass,
            layout,
            pipeline,
            framebuffers,
        })
    }

    pub unsafe fn destroy<G: Gpu>(&mut self, gpu: &G) {
        for fb in self.framebuffers.drain(..) {
            gpu.destroy_framebuffer(fb);
        }
        if self.pipeline != vk::Pipeline::null() {
            gpu.destroy_pipeline(self.pipeline);
            self.pipeline = vk::Pipeline::null();
        }
        if self.layout != vk::PipelineLayout::null() {
            gpu.destroy_pipeline_layout(self.layout);
            self.layout = vk::PipelineLayout::null();
        }
        if self.render_pass != vk::RenderPass::null() {
            gpu.destroy_render_pass(self.render_pass);
            self.render_pass = vk::RenderPass::null();
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::fake_gpu::FakeGpu;
    use ash::vk::Handle;

    /// Minimal valid SPIR-V headers, enough for `read_spv`.
    pub(crate) struct TestShaders;

    impl ShaderSource for TestShaders {
        fn load(&self, name: &str) -> Result<Cow<'static, [u8]>, ShaderError> {
            match name {
                VERTEX_SHADER | FRAGMENT_SHADER => {
                    let words: [u32; 5] = [0x0723_0203, 0x0001_0000, 0, 1, 0];
                    Ok(Cow::Owned(words.iter().flat_map(|w| w.to_le_bytes()).collect()))
                }
                _ => Err(ShaderError::NotFound {
                    name: name.to_owned(),
                }),
            }
        }
    }

    struct Truncated;

    impl ShaderSource for Truncated {
        fn load(&self, _name: &str) -> Result<Cow<'static, [u8]>, ShaderError> {
            Ok(Cow::Borrowed(&[0x03, 0x02, 0x23]))
        }
    }

    fn views(n: u64) -> Vec<vk::ImageView> {
        (0..n).map(|i| vk::ImageView::from_raw(100 + i)).collect()
    }

    const EXTENT: vk::Extent2D = vk::Extent2D {
        width: 800,
        height: 600,
    };
    const FORMAT: vk::Format = vk::Format::B8G8R8A8_SRGB;

    #[test]
    fn render_pass_clears_stores_and_presents() {
        let gpu = FakeGpu::new();
        unsafe { create_render_pass(&gpu, vk::Format::B8G8R8A8_SRGB) }.unwrap();
        let rp = gpu.state().last_render_pass.unwrap();
        assert_eq!(rp.attachments, 1);
        assert_eq!(rp.subpasses, 1);
        assert_eq!(rp.load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(rp.store_op, vk::AttachmentStoreOp::STORE);
        assert_eq!(rp.initial_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(rp.final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
        assert_eq!(rp.dependencies, 1);
        assert_eq!(rp.dependency_src_subpass, vk::SUBPASS_EXTERNAL);
        assert_eq!(rp.dependency_dst_stage, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT);
    }

    #[test]
    fn pipeline_fixed_function_state() {
        let gpu = FakeGpu::new();
        let mut state = unsafe {
            RenderPipelineState::build(&gpu, FORMAT, EXTENT, &views(3), &TestShaders)
        }
        .unwrap();
        let p = gpu.state().last_pipeline.clone().unwrap();
        assert_eq!(p.stages, 2);
        assert_eq!((p.vertex_bindings, p.vertex_attributes), (0, 0));
        assert_eq!(p.topology, vk::PrimitiveTopology::TRIANGLE_LIST);
        assert_eq!(p.polygon_mode, vk::PolygonMode::FILL);
        assert_eq!(p.cull_mode, vk::CullModeFlags::BACK);
        assert_eq!(p.front_face, vk::FrontFace::CLOCKWISE);
        assert_eq!(p.samples, vk::SampleCountFlags::TYPE_1);
        assert_eq!(p.blend_enable, vk::FALSE);
        assert_eq!(p.dynamic_states, vec![vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR]);
        assert_eq!(p.render_pass, state.render_pass);

        assert_eq!(state.framebuffers.len(), 3);
        // Modules are gone once the pipeline exists.
        assert_eq!(gpu.live("shader_module"), 0);
        unsafe { state.destroy(&gpu) };
        assert!(gpu.leaked().is_empty(), "{:?}", gpu.leaked());
    }

    #[test]
    fn unreadable_shader_fails_the_build() {
        let gpu = FakeGpu::new();
        let err = unsafe {
            RenderPipelineState::build(&gpu, FORMAT, EXTENT, &views(2), &Truncated)
        }
        .unwrap_err();
        assert!(matches!(err, VkError::Shader(ShaderError::InvalidSpirv { .. })));
        assert!(gpu.leaked().is_empty(), "{:?}", gpu.leaked());
    }

    #[test]
    fn missing_shader_file_is_reported() {
        let dir = ShaderDir(std::env::temp_dir().join("cubic-no-such-shader-dir"));
        assert!(matches!(
            dir.load(VERTEX_SHADER),
            Err(ShaderError::NotFound { .. })
        ));
    }

    #[test]
    fn pipeline_failure_cleans_up_modules_and_layout() {
        let gpu = FakeGpu::new();
        gpu.fail_next("vkCreateGraphicsPipelines", vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        assert!(unsafe {
            RenderPipelineState::build(&gpu, FORMAT, EXTENT, &views(2), &TestShaders)
        }
        .is_err());
        assert!(gpu.leaked().is_empty(), "{:?}", gpu.leaked());
    }

    #[test]
    fn framebuffer_failure_is_all_or_nothing() {
        let gpu = FakeGpu::new();
        let rp = unsafe { create_render_pass(&gpu, vk::Format::B8G8R8A8_SRGB) }.unwrap();
        // Third of four fails.
        gpu.fail_nth("vkCreateFramebuffer", 2, vk::Result::ERROR_OUT_OF_HOST_MEMORY);
        assert!(unsafe { create_framebuffers(&gpu, rp, &views(4), EXTENT) }.is_err());
        assert_eq!(gpu.live("framebuffer"), 0);
    }

    #[cfg(feature = "embed-shaders")]
    #[test]
    fn embedded_shaders_are_valid_spirv() {
        for name in [VERTEX_SHADER, FRAGMENT_SHADER] {
            let words = load_spirv(&EmbeddedShaders, name).unwrap();
            assert_eq!(words[0], 0x0723_0203);
        }
        assert!(EmbeddedShaders.load("missing.frag").is_err());
    }
}

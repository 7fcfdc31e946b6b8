//! Ray tracing pipeline assembly.
//!
//! The pipeline is assembled from SPIR-V bytecode and a declared list of
//! shader groups. [`ShaderModule`]s are transient: they exist only while
//! the pipeline is created and are destroyed immediately afterwards, the
//! compiled pipeline does not reference them. Bad bytecode therefore fails
//! at module creation, with the shader's role in the error, never at
//! pipeline creation.
//!
//! The declared group order is recorded as [`ShaderGroupKind`]s; the
//! shader binding table builder consumes it to lay out handles.

use crate::{Device, Error, HasDevice, Result, descriptor::DescriptorSetLayout, utils::AsVkHandle};
use ash::vk;
use std::sync::Arc;

/// The shader stages a minimal ray tracing pipeline uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShaderStage {
    RayGen,
    ClosestHit,
    Miss,
}

impl ShaderStage {
    pub fn flags(self) -> vk::ShaderStageFlags {
        match self {
            ShaderStage::RayGen => vk::ShaderStageFlags::RAYGEN_KHR,
            ShaderStage::ClosestHit => vk::ShaderStageFlags::CLOSEST_HIT_KHR,
            ShaderStage::Miss => vk::ShaderStageFlags::MISS_KHR,
        }
    }

    pub fn role_name(self) -> &'static str {
        match self {
            ShaderStage::RayGen => "ray generation",
            ShaderStage::ClosestHit => "closest hit",
            ShaderStage::Miss => "miss",
        }
    }
}

/// A shader group declaration, referencing stages by index into the stage
/// list handed to [`RayTracingPipeline::new`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShaderGroup {
    /// A general group: one ray generation or miss stage.
    General { stage: u32 },
    /// A triangles hit group with a closest-hit stage; any-hit and
    /// intersection are unused.
    TrianglesHit { closest_hit: u32 },
}

/// The shader binding table section a group's handle belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderGroupKind {
    RayGen,
    Miss,
    HitGroup,
    Callable,
}

/// A transient SPIR-V shader module.
pub struct ShaderModule {
    device: Device,
    module: vk::ShaderModule,
}

impl ShaderModule {
    /// Creates a shader module from raw SPIR-V bytes.
    ///
    /// `role` names the shader's purpose in error messages.
    ///
    /// # Errors
    ///
    /// [`Error::ShaderLoadFailure`] when the bytecode is empty or not a
    /// multiple of four bytes.
    pub fn new(device: Device, code: &[u8], role: &'static str) -> Result<Self> {
        if code.is_empty() {
            return Err(Error::ShaderLoadFailure {
                role,
                reason: "bytecode is empty",
            });
        }
        if code.len() % 4 != 0 {
            return Err(Error::ShaderLoadFailure {
                role,
                reason: "bytecode length is not a multiple of 4",
            });
        }
        let words: Vec<u32> = code
            .chunks_exact(4)
            .map(|bytes| u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
            .collect();
        let create_info = vk::ShaderModuleCreateInfo::default().code(&words);
        let module = unsafe { device.create_shader_module(&create_info, None)? };
        Ok(Self { device, module })
    }
}

impl HasDevice for ShaderModule {
    fn device(&self) -> &Device {
        &self.device
    }
}
impl AsVkHandle for ShaderModule {
    type Handle = vk::ShaderModule;

    fn vk_handle(&self) -> Self::Handle {
        self.module
    }
}
impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_shader_module(self.module, None);
        }
    }
}

/// A pipeline layout, holding its descriptor set layouts alive.
pub struct PipelineLayout {
    device: Device,
    layout: vk::PipelineLayout,
    set_layouts: Vec<Arc<DescriptorSetLayout>>,
}

impl PipelineLayout {
    pub fn new(device: Device, set_layouts: Vec<Arc<DescriptorSetLayout>>) -> Result<Self> {
        let raw_layouts = set_layouts
            .iter()
            .map(|layout| layout.vk_handle())
            .collect::<Vec<_>>();
        let create_info = vk::PipelineLayoutCreateInfo::default().set_layouts(&raw_layouts);
        let layout = unsafe { device.create_pipeline_layout(&create_info, None)? };
        Ok(Self {
            device,
            layout,
            set_layouts,
        })
    }

    pub fn set_layouts(&self) -> &[Arc<DescriptorSetLayout>] {
        &self.set_layouts
    }
}

impl HasDevice for PipelineLayout {
    fn device(&self) -> &Device {
        &self.device
    }
}
impl AsVkHandle for PipelineLayout {
    type Handle = vk::PipelineLayout;

    fn vk_handle(&self) -> Self::Handle {
        self.layout
    }
}
impl Drop for PipelineLayout {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

/// A compiled ray tracing pipeline.
///
/// Owns its [`PipelineLayout`] and remembers the declared group order for
/// shader binding table construction.
pub struct RayTracingPipeline {
    device: Device,
    pipeline: vk::Pipeline,
    layout: PipelineLayout,
    group_kinds: Vec<ShaderGroupKind>,
}

impl RayTracingPipeline {
    /// Assembles a ray tracing pipeline.
    ///
    /// `stages` pairs each stage with its SPIR-V bytecode; every stage uses
    /// the `main` entry point. `groups` references stages by index.
    ///
    /// # Panics
    ///
    /// Panics if a group references a stage out of range, or a general
    /// group references a closest-hit stage.
    pub fn new(
        device: Device,
        stages: &[(ShaderStage, &[u8])],
        groups: &[ShaderGroup],
        set_layouts: Vec<Arc<DescriptorSetLayout>>,
        max_recursion_depth: u32,
    ) -> Result<Self> {
        let group_kinds = groups
            .iter()
            .map(|&group| match group {
                ShaderGroup::General { stage } => {
                    match stages[stage as usize].0 {
                        ShaderStage::RayGen => ShaderGroupKind::RayGen,
                        ShaderStage::Miss => ShaderGroupKind::Miss,
                        ShaderStage::ClosestHit => {
                            panic!("general group may not reference a closest hit stage")
                        }
                    }
                }
                ShaderGroup::TrianglesHit { closest_hit } => {
                    assert_eq!(
                        stages[closest_hit as usize].0,
                        ShaderStage::ClosestHit,
                        "hit group must reference a closest hit stage"
                    );
                    ShaderGroupKind::HitGroup
                }
            })
            .collect::<Vec<_>>();

        let modules = stages
            .iter()
            .map(|&(stage, code)| ShaderModule::new(device.clone(), code, stage.role_name()))
            .collect::<Result<Vec<_>>>()?;
        let stage_infos = stages
            .iter()
            .zip(&modules)
            .map(|(&(stage, _), module)| {
                vk::PipelineShaderStageCreateInfo::default()
                    .stage(stage.flags())
                    .module(module.vk_handle())
                    .name(c"main")
            })
            .collect::<Vec<_>>();
        let group_infos = groups
            .iter()
            .map(|&group| {
                let info = vk::RayTracingShaderGroupCreateInfoKHR::default()
                    .general_shader(vk::SHADER_UNUSED_KHR)
                    .closest_hit_shader(vk::SHADER_UNUSED_KHR)
                    .any_hit_shader(vk::SHADER_UNUSED_KHR)
                    .intersection_shader(vk::SHADER_UNUSED_KHR);
                match group {
                    ShaderGroup::General { stage } => info
                        .ty(vk::RayTracingShaderGroupTypeKHR::GENERAL)
                        .general_shader(stage),
                    ShaderGroup::TrianglesHit { closest_hit } => info
                        .ty(vk::RayTracingShaderGroupTypeKHR::TRIANGLES_HIT_GROUP)
                        .closest_hit_shader(closest_hit),
                }
            })
            .collect::<Vec<_>>();

        let layout = PipelineLayout::new(device.clone(), set_layouts)?;
        let create_info = vk::RayTracingPipelineCreateInfoKHR::default()
            .stages(&stage_infos)
            .groups(&group_infos)
            .max_pipeline_ray_recursion_depth(max_recursion_depth)
            .layout(layout.vk_handle());

        let loader = device.ray_tracing_loader()?;
        let mut pipeline = vk::Pipeline::null();
        // Safety: create_info and everything it points to outlives the call;
        // exactly one pipeline is written.
        unsafe {
            (loader.fp().create_ray_tracing_pipelines_khr)(
                device.handle(),
                vk::DeferredOperationKHR::null(),
                vk::PipelineCache::null(),
                1,
                &create_info,
                std::ptr::null(),
                &mut pipeline,
            )
            .result()?;
        }
        tracing::info!(
            stages = stages.len(),
            groups = groups.len(),
            "created ray tracing pipeline"
        );
        // Shader modules are destroyed here; the pipeline keeps its own
        // copy of the compiled code.
        Ok(Self {
            device,
            pipeline,
            layout,
            group_kinds,
        })
    }

    pub fn layout(&self) -> &PipelineLayout {
        &self.layout
    }

    /// Declared shader group kinds, in group declaration order.
    pub fn group_kinds(&self) -> &[ShaderGroupKind] {
        &self.group_kinds
    }
}

impl HasDevice for RayTracingPipeline {
    fn device(&self) -> &Device {
        &self.device
    }
}
impl AsVkHandle for RayTracingPipeline {
    type Handle = vk::Pipeline;

    fn vk_handle(&self) -> Self::Handle {
        self.pipeline
    }
}
impl Drop for RayTracingPipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline(self.pipeline, None);
        }
    }
}

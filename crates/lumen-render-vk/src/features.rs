// SPDX-License-Identifier: CEPL-1.0
//! Mapping between [`FeatureBundle`] names and the Vulkan feature structs.
//!
//! Flag names are the Vulkan spelling (`samplerAnisotropy`), categories are
//! `core`, `vulkan11`, `vulkan12` and `vulkan13`.

use ash::vk;
use std::ffi::c_void;

use crate::capability::{ApiVersion, FeatureBundle};

pub const CORE: &str = "core";
pub const VULKAN_11: &str = "vulkan11";
pub const VULKAN_12: &str = "vulkan12";
pub const VULKAN_13: &str = "vulkan13";

fn bool32(on: bool) -> vk::Bool32 {
    if on {
        vk::TRUE
    } else {
        vk::FALSE
    }
}

macro_rules! feature_table {
    ($read:ident, $write:ident, $ty:ty { $($name:literal => $field:ident),* $(,)? }) => {
        fn $read(s: &$ty, out: &mut FeatureBundle, category: &str) {
            $( out.set(category, $name, s.$field == vk::TRUE); )*
        }

        fn $write(s: &mut $ty, name: &str, on: bool) -> bool {
            match name {
                $( $name => { s.$field = bool32(on); true } )*
                _ => false,
            }
        }
    };
}

// Every VkBool32 member of each struct, in declaration order.
feature_table!(read_core, write_core, vk::PhysicalDeviceFeatures {
    "robustBufferAccess" => robust_buffer_access,
    "fullDrawIndexUint32" => full_draw_index_uint32,
    "imageCubeArray" => image_cube_array,
    "independentBlend" => independent_blend,
    "geometryShader" => geometry_shader,
    "tessellationShader" => tessellation_shader,
    "sampleRateShading" => sample_rate_shading,
    "dualSrcBlend" => dual_src_blend,
    "logicOp" => logic_op,
    "multiDrawIndirect" => multi_draw_indirect,
    "drawIndirectFirstInstance" => draw_indirect_first_instance,
    "depthClamp" => depth_clamp,
    "depthBiasClamp" => depth_bias_clamp,
    "fillModeNonSolid" => fill_mode_non_solid,
    "depthBounds" => depth_bounds,
    "wideLines" => wide_lines,
    "largePoints" => large_points,
    "alphaToOne" => alpha_to_one,
    "multiViewport" => multi_viewport,
    "samplerAnisotropy" => sampler_anisotropy,
    "textureCompressionETC2" => texture_compression_etc2,
    "textureCompressionASTC_LDR" => texture_compression_astc_ldr,
    "textureCompressionBC" => texture_compression_bc,
    "occlusionQueryPrecise" => occlusion_query_precise,
    "pipelineStatisticsQuery" => pipeline_statistics_query,
    "vertexPipelineStoresAndAtomics" => vertex_pipeline_stores_and_atomics,
    "fragmentStoresAndAtomics" => fragment_stores_and_atomics,
    "shaderTessellationAndGeometryPointSize" => shader_tessellation_and_geometry_point_size,
    "shaderImageGatherExtended" => shader_image_gather_extended,
    "shaderStorageImageExtendedFormats" => shader_storage_image_extended_formats,
    "shaderStorageImageMultisample" => shader_storage_image_multisample,
    "shaderStorageImageReadWithoutFormat" => shader_storage_image_read_without_format,
    "shaderStorageImageWriteWithoutFormat" => shader_storage_image_write_without_format,
    "shaderUniformBufferArrayDynamicIndexing" => shader_uniform_buffer_array_dynamic_indexing,
    "shaderSampledImageArrayDynamicIndexing" => shader_sampled_image_array_dynamic_indexing,
    "shaderStorageBufferArrayDynamicIndexing" => shader_storage_buffer_array_dynamic_indexing,
    "shaderStorageImageArrayDynamicIndexing" => shader_storage_image_array_dynamic_indexing,
    "shaderClipDistance" => shader_clip_distance,
    "shaderCullDistance" => shader_cull_distance,
    "shaderFloat64" => shader_float64,
    "shaderInt64" => shader_int64,
    "shaderInt16" => shader_int16,
    "shaderResourceResidency" => shader_resource_residency,
    "shaderResourceMinLod" => shader_resource_min_lod,
    "sparseBinding" => sparse_binding,
    "sparseResidencyBuffer" => sparse_residency_buffer,
    "sparseResidencyImage2D" => sparse_residency_image2_d,
    "sparseResidencyImage3D" => sparse_residency_image3_d,
    "sparseResidency2Samples" => sparse_residency2_samples,
    "sparseResidency4Samples" => sparse_residency4_samples,
    "sparseResidency8Samples" => sparse_residency8_samples,
    "sparseResidency16Samples" => sparse_residency16_samples,
    "sparseResidencyAliased" => sparse_residency_aliased,
    "variableMultisampleRate" => variable_multisample_rate,
    "inheritedQueries" => inherited_queries,
});

feature_table!(read_v11, write_v11, vk::PhysicalDeviceVulkan11Features<'_> {
    "storageBuffer16BitAccess" => storage_buffer16_bit_access,
    "uniformAndStorageBuffer16BitAccess" => uniform_and_storage_buffer16_bit_access,
    "storagePushConstant16" => storage_push_constant16,
    "storageInputOutput16" => storage_input_output16,
    "multiview" => multiview,
    "multiviewGeometryShader" => multiview_geometry_shader,
    "multiviewTessellationShader" => multiview_tessellation_shader,
    "variablePointersStorageBuffer" => variable_pointers_storage_buffer,
    "variablePointers" => variable_pointers,
    "protectedMemory" => protected_memory,
    "samplerYcbcrConversion" => sampler_ycbcr_conversion,
    "shaderDrawParameters" => shader_draw_parameters,
});

feature_table!(read_v12, write_v12, vk::PhysicalDeviceVulkan12Features<'_> {
    "samplerMirrorClampToEdge" => sampler_mirror_clamp_to_edge,
    "drawIndirectCount" => draw_indirect_count,
    "storageBuffer8BitAccess" => storage_buffer8_bit_access,
    "uniformAndStorageBuffer8BitAccess" => uniform_and_storage_buffer8_bit_access,
    "storagePushConstant8" => storage_push_constant8,
    "shaderBufferInt64Atomics" => shader_buffer_int64_atomics,
    "shaderSharedInt64Atomics" => shader_shared_int64_atomics,
    "shaderFloat16" => shader_float16,
    "shaderInt8" => shader_int8,
    "descriptorIndexing" => descriptor_indexing,
    "shaderInputAttachmentArrayDynamicIndexing" => shader_input_attachment_array_dynamic_indexing,
    "shaderUniformTexelBufferArrayDynamicIndexing" => shader_uniform_texel_buffer_array_dynamic_indexing,
    "shaderStorageTexelBufferArrayDynamicIndexing" => shader_storage_texel_buffer_array_dynamic_indexing,
    "shaderUniformBufferArrayNonUniformIndexing" => shader_uniform_buffer_array_non_uniform_indexing,
    "shaderSampledImageArrayNonUniformIndexing" => shader_sampled_image_array_non_uniform_indexing,
    "shaderStorageBufferArrayNonUniformIndexing" => shader_storage_buffer_array_non_uniform_indexing,
    "shaderStorageImageArrayNonUniformIndexing" => shader_storage_image_array_non_uniform_indexing,
    "shaderInputAttachmentArrayNonUniformIndexing" => shader_input_attachment_array_non_uniform_indexing,
    "shaderUniformTexelBufferArrayNonUniformIndexing" => shader_uniform_texel_buffer_array_non_uniform_indexing,
    "shaderStorageTexelBufferArrayNonUniformIndexing" => shader_storage_texel_buffer_array_non_uniform_indexing,
    "descriptorBindingUniformBufferUpdateAfterBind" => descriptor_binding_uniform_buffer_update_after_bind,
    "descriptorBindingSampledImageUpdateAfterBind" => descriptor_binding_sampled_image_update_after_bind,
    "descriptorBindingStorageImageUpdateAfterBind" => descriptor_binding_storage_image_update_after_bind,
    "descriptorBindingStorageBufferUpdateAfterBind" => descriptor_binding_storage_buffer_update_after_bind,
    "descriptorBindingUniformTexelBufferUpdateAfterBind" => descriptor_binding_uniform_texel_buffer_update_after_bind,
    "descriptorBindingStorageTexelBufferUpdateAfterBind" => descriptor_binding_storage_texel_buffer_update_after_bind,
    "descriptorBindingUpdateUnusedWhilePending" => descriptor_binding_update_unused_while_pending,
    "descriptorBindingPartiallyBound" => descriptor_binding_partially_bound,
    "descriptorBindingVariableDescriptorCount" => descriptor_binding_variable_descriptor_count,
    "runtimeDescriptorArray" => runtime_descriptor_array,
    "samplerFilterMinmax" => sampler_filter_minmax,
    "scalarBlockLayout" => scalar_block_layout,
    "imagelessFramebuffer" => imageless_framebuffer,
    "uniformBufferStandardLayout" => uniform_buffer_standard_layout,
    "shaderSubgroupExtendedTypes" => shader_subgroup_extended_types,
    "separateDepthStencilLayouts" => separate_depth_stencil_layouts,
    "hostQueryReset" => host_query_reset,
    "timelineSemaphore" => timeline_semaphore,
    "bufferDeviceAddress" => buffer_device_address,
    "bufferDeviceAddressCaptureReplay" => buffer_device_address_capture_replay,
    "bufferDeviceAddressMultiDevice" => buffer_device_address_multi_device,
    "vulkanMemoryModel" => vulkan_memory_model,
    "vulkanMemoryModelDeviceScope" => vulkan_memory_model_device_scope,
    "vulkanMemoryModelAvailabilityVisibilityChains" => vulkan_memory_model_availability_visibility_chains,
    "shaderOutputViewportIndex" => shader_output_viewport_index,
    "shaderOutputLayer" => shader_output_layer,
    "subgroupBroadcastDynamicId" => subgroup_broadcast_dynamic_id,
});

feature_table!(read_v13, write_v13, vk::PhysicalDeviceVulkan13Features<'_> {
    "robustImageAccess" => robust_image_access,
    "inlineUniformBlock" => inline_uniform_block,
    "descriptorBindingInlineUniformBlockUpdateAfterBind" => descriptor_binding_inline_uniform_block_update_after_bind,
    "pipelineCreationCacheControl" => pipeline_creation_cache_control,
    "privateData" => private_data,
    "shaderDemoteToHelperInvocation" => shader_demote_to_helper_invocation,
    "shaderTerminateInvocation" => shader_terminate_invocation,
    "subgroupSizeControl" => subgroup_size_control,
    "computeFullSubgroups" => compute_full_subgroups,
    "synchronization2" => synchronization2,
    "textureCompressionASTC_HDR" => texture_compression_astc_hdr,
    "shaderZeroInitializeWorkgroupMemory" => shader_zero_initialize_workgroup_memory,
    "dynamicRendering" => dynamic_rendering,
    "shaderIntegerDotProduct" => shader_integer_dot_product,
    "maintenance4" => maintenance4,
});

/// The four feature structs used for both querying and enabling.
///
/// `version` caps which structs take part: the 1.1/1.2 aggregates need 1.2,
/// the 1.3 aggregate needs 1.3, and below 1.1 only the core struct exists.
#[derive(Default)]
pub(crate) struct FeatureChain {
    pub core: vk::PhysicalDeviceFeatures2<'static>,
    pub v11: vk::PhysicalDeviceVulkan11Features<'static>,
    pub v12: vk::PhysicalDeviceVulkan12Features<'static>,
    pub v13: vk::PhysicalDeviceVulkan13Features<'static>,
    version: ApiVersion,
}

impl FeatureChain {
    pub fn new(version: ApiVersion) -> Self {
        Self {
            version: version.truncated(),
            ..Default::default()
        }
    }

    pub fn uses_features2(&self) -> bool {
        self.version >= ApiVersion::V1_1
    }

    /// Wires `p_next` through the structs allowed at this version and returns
    /// the head. The chain borrows `self`; it must not move while in use.
    pub fn link(&mut self) -> *mut c_void {
        let mut next: *mut c_void = std::ptr::null_mut();
        if self.version >= ApiVersion::V1_3 {
            self.v13.p_next = next;
            next = (&mut self.v13) as *mut _ as *mut c_void;
        }
        if self.version >= ApiVersion::V1_2 {
            self.v12.p_next = next;
            next = (&mut self.v12) as *mut _ as *mut c_void;
            self.v11.p_next = next;
            next = (&mut self.v11) as *mut _ as *mut c_void;
        }
        self.core.p_next = next;
        (&mut self.core) as *mut _ as *mut c_void
    }

    /// Report every known flag for the categories this version exposes.
    pub fn to_bundle(&self) -> FeatureBundle {
        let mut out = FeatureBundle::new();
        read_core(&self.core.features, &mut out, CORE);
        if self.version >= ApiVersion::V1_2 {
            read_v11(&self.v11, &mut out, VULKAN_11);
            read_v12(&self.v12, &mut out, VULKAN_12);
        }
        if self.version >= ApiVersion::V1_3 {
            read_v13(&self.v13, &mut out, VULKAN_13);
        }
        out
    }

    /// Sets every flag the bundle requests as `true`. Returns the names that
    /// did not map onto a known field.
    pub fn enable(&mut self, bundle: &FeatureBundle) -> Vec<String> {
        let mut unknown = Vec::new();
        for (category, flag) in bundle.requested() {
            let known = match category {
                CORE => write_core(&mut self.core.features, flag, true),
                VULKAN_11 if self.version >= ApiVersion::V1_2 => {
                    write_v11(&mut self.v11, flag, true)
                }
                VULKAN_12 if self.version >= ApiVersion::V1_2 => {
                    write_v12(&mut self.v12, flag, true)
                }
                VULKAN_13 if self.version >= ApiVersion::V1_3 => {
                    write_v13(&mut self.v13, flag, true)
                }
                _ => false,
            };
            if !known {
                unknown.push(format!("{category}.{flag}"));
            }
        }
        unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundle_reflects_struct_values() {
        let mut chain = FeatureChain::new(ApiVersion::V1_3);
        chain.core.features.sampler_anisotropy = vk::TRUE;
        chain.v13.dynamic_rendering = vk::TRUE;

        let b = chain.to_bundle();
        assert_eq!(b.get(CORE, "samplerAnisotropy"), Some(true));
        assert_eq!(b.get(CORE, "geometryShader"), Some(false));
        assert_eq!(b.get(VULKAN_13, "dynamicRendering"), Some(true));
        assert_eq!(b.get(VULKAN_12, "timelineSemaphore"), Some(false));
    }

    #[test]
    fn older_versions_hide_newer_categories() {
        let mut chain = FeatureChain::new(ApiVersion::new(1, 2, 198));
        chain.v13.dynamic_rendering = vk::TRUE;
        let b = chain.to_bundle();
        assert_eq!(b.get(VULKAN_13, "dynamicRendering"), None);
        assert!(b.get(VULKAN_12, "bufferDeviceAddress").is_some());

        let b10 = FeatureChain::new(ApiVersion::V1_0).to_bundle();
        assert!(b10.get(VULKAN_11, "multiview").is_none());
        assert!(b10.get(CORE, "wideLines").is_some());
    }

    #[test]
    fn enable_sets_only_requested_true_flags() {
        let want = FeatureBundle::new()
            .with(VULKAN_13, "synchronization2", true)
            .with(VULKAN_13, "dynamicRendering", false)
            .with(CORE, "fillModeNonSolid", true)
            .with(CORE, "noSuchFlag", true);
        let mut chain = FeatureChain::new(ApiVersion::V1_3);
        let unknown = chain.enable(&want);

        assert_eq!(chain.v13.synchronization2, vk::TRUE);
        assert_eq!(chain.v13.dynamic_rendering, vk::FALSE);
        assert_eq!(chain.core.features.fill_mode_non_solid, vk::TRUE);
        assert_eq!(unknown, vec!["core.noSuchFlag".to_owned()]);
    }

    #[test]
    fn uncommon_flags_are_reported_and_enabled() {
        let mut chain = FeatureChain::new(ApiVersion::V1_3);
        chain.core.features.depth_bounds = vk::TRUE;
        chain.core.features.shader_clip_distance = vk::TRUE;
        chain.v11.storage_push_constant16 = vk::TRUE;
        chain.v12.descriptor_binding_partially_bound = vk::TRUE;
        chain.v13.descriptor_binding_inline_uniform_block_update_after_bind = vk::TRUE;

        let b = chain.to_bundle();
        assert_eq!(b.get(CORE, "depthBounds"), Some(true));
        assert_eq!(b.get(CORE, "shaderClipDistance"), Some(true));
        assert_eq!(b.get(VULKAN_11, "storagePushConstant16"), Some(true));
        assert_eq!(b.get(VULKAN_12, "descriptorBindingPartiallyBound"), Some(true));
        assert_eq!(
            b.get(VULKAN_13, "descriptorBindingInlineUniformBlockUpdateAfterBind"),
            Some(true)
        );

        let want = FeatureBundle::new()
            .with(CORE, "depthBounds", true)
            .with(CORE, "shaderClipDistance", true)
            .with(VULKAN_11, "storagePushConstant16", true)
            .with(VULKAN_12, "descriptorBindingPartiallyBound", true)
            .with(VULKAN_13, "descriptorBindingInlineUniformBlockUpdateAfterBind", true);
        let mut fresh = FeatureChain::new(ApiVersion::V1_3);
        assert!(fresh.enable(&want).is_empty());
        assert_eq!(fresh.core.features.depth_bounds, vk::TRUE);
        assert_eq!(fresh.core.features.shader_clip_distance, vk::TRUE);
        assert_eq!(fresh.v11.storage_push_constant16, vk::TRUE);
        assert_eq!(fresh.v12.descriptor_binding_partially_bound, vk::TRUE);
        assert_eq!(
            fresh.v13.descriptor_binding_inline_uniform_block_update_after_bind,
            vk::TRUE
        );
    }

    /// Reads `count` Bool32 members laid out after `skip` leading words.
    fn bool_words<T>(s: &T, skip: usize, count: usize) -> Vec<vk::Bool32> {
        assert!(std::mem::size_of::<T>() >= (skip + count) * 4);
        // SAFETY: the feature structs are repr(C) and the size check above
        // keeps the read inside `s`.
        let words = unsafe {
            std::slice::from_raw_parts(s as *const T as *const vk::Bool32, skip + count)
        };
        words[skip..].to_vec()
    }

    #[test]
    fn tables_cover_every_member() {
        let all = FeatureChain::new(ApiVersion::V1_3).to_bundle();
        let mut want = FeatureBundle::new();
        for (cat, flags) in all.categories() {
            for name in flags.keys() {
                want.set(cat, name, true);
            }
        }
        let mut chain = FeatureChain::new(ApiVersion::V1_3);
        assert!(chain.enable(&want).is_empty());

        let count = |cat: &str| {
            all.categories()
                .find(|(c, _)| *c == cat)
                .map_or(0, |(_, f)| f.len())
        };
        // sType plus padding and pNext take four words on 64-bit targets.
        let header = 16 / 4;
        let ext_size = |n: usize| (16 + n * 4).next_multiple_of(8);

        let n = count(CORE);
        assert_eq!(n * 4, std::mem::size_of::<vk::PhysicalDeviceFeatures>());
        assert!(bool_words(&chain.core.features, 0, n).iter().all(|w| *w == vk::TRUE));

        let n = count(VULKAN_11);
        assert_eq!(ext_size(n), std::mem::size_of::<vk::PhysicalDeviceVulkan11Features>());
        assert!(bool_words(&chain.v11, header, n).iter().all(|w| *w == vk::TRUE));

        let n = count(VULKAN_12);
        assert_eq!(ext_size(n), std::mem::size_of::<vk::PhysicalDeviceVulkan12Features>());
        assert!(bool_words(&chain.v12, header, n).iter().all(|w| *w == vk::TRUE));

        let n = count(VULKAN_13);
        assert_eq!(ext_size(n), std::mem::size_of::<vk::PhysicalDeviceVulkan13Features>());
        assert!(bool_words(&chain.v13, header, n).iter().all(|w| *w == vk::TRUE));
    }

    #[test]
    fn link_orders_chain_by_version() {
        let mut chain = FeatureChain::new(ApiVersion::V1_3);
        let head = chain.link();
        assert_eq!(head, (&mut chain.core) as *mut _ as *mut c_void);
        assert_eq!(chain.core.p_next, (&mut chain.v11) as *mut _ as *mut c_void);
        assert_eq!(chain.v11.p_next, (&mut chain.v12) as *mut _ as *mut c_void);
        assert_eq!(chain.v12.p_next, (&mut chain.v13) as *mut _ as *mut c_void);
        assert!(chain.v13.p_next.is_null());

        let mut old = FeatureChain::new(ApiVersion::V1_1);
        old.link();
        assert!(old.core.p_next.is_null());
        assert!(old.uses_features2());
    }
}

//! Device feature chain construction.
//!
//! Optional features are collected as [`FeatureBlock`]s, each keyed by the
//! extension that provides it. Blocks are only accepted when their extension
//! is supported, and the whole list is linked into the device create info in
//! one step.

use ash::vk;
use std::collections::HashSet;
use std::ffi::CStr;

/// One optional feature structure, tagged by kind.
#[derive(Debug)]
pub enum FeatureBlock {
    Robustness2(vk::PhysicalDeviceRobustness2FeaturesEXT<'static>),
    ExtendedDynamicState(vk::PhysicalDeviceExtendedDynamicStateFeaturesEXT<'static>),
    Synchronization2(vk::PhysicalDeviceSynchronization2Features<'static>),
    BufferDeviceAddress(vk::PhysicalDeviceBufferDeviceAddressFeatures<'static>),
    AccelerationStructure(vk::PhysicalDeviceAccelerationStructureFeaturesKHR<'static>),
    RayTracingPipeline(vk::PhysicalDeviceRayTracingPipelineFeaturesKHR<'static>),
}

impl FeatureBlock {
    pub fn robustness2() -> Self {
        Self::Robustness2(vk::PhysicalDeviceRobustness2FeaturesEXT::default().null_descriptor(true))
    }

    pub fn extended_dynamic_state() -> Self {
        Self::ExtendedDynamicState(
            vk::PhysicalDeviceExtendedDynamicStateFeaturesEXT::default()
                .extended_dynamic_state(true),
        )
    }

    pub fn synchronization2() -> Self {
        Self::Synchronization2(
            vk::PhysicalDeviceSynchronization2Features::default().synchronization2(true),
        )
    }

    pub fn buffer_device_address() -> Self {
        Self::BufferDeviceAddress(
            vk::PhysicalDeviceBufferDeviceAddressFeatures::default().buffer_device_address(true),
        )
    }

    pub fn acceleration_structure() -> Self {
        Self::AccelerationStructure(
            vk::PhysicalDeviceAccelerationStructureFeaturesKHR::default()
                .acceleration_structure(true),
        )
    }

    pub fn ray_tracing_pipeline() -> Self {
        Self::RayTracingPipeline(
            vk::PhysicalDeviceRayTracingPipelineFeaturesKHR::default().ray_tracing_pipeline(true),
        )
    }

    /// Extension that must be enabled alongside this block.
    pub fn extension_name(&self) -> &'static CStr {
        match self {
            Self::Robustness2(_) => ash::ext::robustness2::NAME,
            Self::ExtendedDynamicState(_) => ash::ext::extended_dynamic_state::NAME,
            Self::Synchronization2(_) => ash::khr::synchronization2::NAME,
            Self::BufferDeviceAddress(_) => ash::khr::buffer_device_address::NAME,
            Self::AccelerationStructure(_) => ash::khr::acceleration_structure::NAME,
            Self::RayTracingPipeline(_) => ash::khr::ray_tracing_pipeline::NAME,
        }
    }
}

/// Accumulates feature blocks and the device extensions they need.
#[derive(Debug, Default)]
pub struct FeatureChainBuilder {
    supported: HashSet<String>,
    blocks: Vec<FeatureBlock>,
    extensions: Vec<&'static CStr>,
}

impl FeatureChainBuilder {
    /// Start a chain against the device's supported extension names.
    pub fn new(supported: &HashSet<String>) -> Self {
        Self {
            supported: supported.clone(),
            ..Default::default()
        }
    }

    fn supports(&self, name: &CStr) -> bool {
        name.to_str()
            .map(|n| self.supported.contains(n))
            .unwrap_or(false)
    }

    /// Add an extension without a feature struct. Returns whether it was accepted.
    pub fn extension(&mut self, name: &'static CStr) -> bool {
        if !self.supports(name) {
            tracing::debug!("Device extension {:?} not supported", name);
            return false;
        }
        if !self.extensions.contains(&name) {
            self.extensions.push(name);
        }
        true
    }

    /// Add a feature block if its extension is supported.
    pub fn add(&mut self, block: FeatureBlock) -> bool {
        let name = block.extension_name();
        if !self.extension(name) {
            return false;
        }
        self.blocks.push(block);
        true
    }

    /// Add the ray tracing group. All three extensions must be present,
    /// otherwise nothing from the group is added.
    pub fn add_ray_tracing(&mut self) -> bool {
        let all_present = self.supports(ash::khr::acceleration_structure::NAME)
            && self.supports(ash::khr::ray_tracing_pipeline::NAME)
            && self.supports(ash::khr::deferred_host_operations::NAME);
        if !all_present {
            tracing::info!("Ray tracing extensions unavailable, RTX path disabled");
            return false;
        }
        self.extension(ash::khr::deferred_host_operations::NAME);
        self.add(FeatureBlock::acceleration_structure());
        self.add(FeatureBlock::ray_tracing_pipeline());
        true
    }

    /// Whether a block of the same kind as `probe` was accepted.
    pub fn contains(&self, probe: &CStr) -> bool {
        self.blocks.iter().any(|b| b.extension_name() == probe)
    }

    /// Extensions to enable on the device, in insertion order.
    pub fn extension_names(&self) -> &[&'static CStr] {
        &self.extensions
    }

    /// Number of accepted feature blocks.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Link every accepted block into `info`.
    ///
    /// Must be called once per builder; the blocks' `p_next` pointers are
    /// rewritten by the link.
    pub fn link<'a>(&'a mut self, mut info: vk::DeviceCreateInfo<'a>) -> vk::DeviceCreateInfo<'a> {
        for block in self.blocks.iter_mut() {
            info = match block {
                FeatureBlock::Robustness2(f) => info.push_next(f),
                FeatureBlock::ExtendedDynamicState(f) => info.push_next(f),
                FeatureBlock::Synchronization2(f) => info.push_next(f),
                FeatureBlock::BufferDeviceAddress(f) => info.push_next(f),
                FeatureBlock::AccelerationStructure(f) => info.push_next(f),
                FeatureBlock::RayTracingPipeline(f) => info.push_next(f),
            };
        }
        info
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn supported(names: &[&str]) -> HashSet<String> {
        names.iter().map(|n| (*n).to_string()).collect()
    }

    #[test]
    fn unsupported_blocks_are_skipped() {
        let mut builder =
            FeatureChainBuilder::new(&supported(&["VK_EXT_robustness2", "VK_KHR_swapchain"]));
        assert!(builder.add(FeatureBlock::robustness2()));
        assert!(!builder.add(FeatureBlock::synchronization2()));
        assert!(builder.extension(ash::khr::swapchain::NAME));

        assert_eq!(builder.len(), 1);
        assert_eq!(
            builder.extension_names(),
            &[ash::ext::robustness2::NAME, ash::khr::swapchain::NAME]
        );
        assert!(builder.contains(ash::ext::robustness2::NAME));
    }

    #[test]
    fn ray_tracing_is_all_or_nothing() {
        let mut partial = FeatureChainBuilder::new(&supported(&[
            "VK_KHR_acceleration_structure",
            "VK_KHR_ray_tracing_pipeline",
        ]));
        assert!(!partial.add_ray_tracing());
        assert!(partial.is_empty());
        assert!(partial.extension_names().is_empty());

        let mut full = FeatureChainBuilder::new(&supported(&[
            "VK_KHR_acceleration_structure",
            "VK_KHR_ray_tracing_pipeline",
            "VK_KHR_deferred_host_operations",
        ]));
        assert!(full.add_ray_tracing());
        assert_eq!(full.len(), 2);
        assert_eq!(full.extension_names().len(), 3);
    }

    #[test]
    fn link_builds_a_chain_of_all_blocks() {
        let mut builder = FeatureChainBuilder::new(&supported(&[
            "VK_EXT_robustness2",
            "VK_EXT_extended_dynamic_state",
        ]));
        builder.add(FeatureBlock::robustness2());
        builder.add(FeatureBlock::extended_dynamic_state());

        let info = builder.link(vk::DeviceCreateInfo::default());

        let mut depth = 0;
        let mut next = info.p_next;
        while !next.is_null() {
            depth += 1;
            // SAFETY: every node in the chain is a live feature struct owned by `builder`.
            next = unsafe { (*next.cast::<vk::BaseInStructure>()).p_next.cast() };
        }
        assert_eq!(depth, 2);
    }
}

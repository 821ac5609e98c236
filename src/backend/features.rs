// Optional device feature toggles
//
// Each requested feature becomes one entry in a vector of tagged feature
// structs. The vector is linked into a pNext chain right before device
// creation and must outlive that call.

use ash::vk;
use serde::Deserialize;
use std::ffi::{c_void, CStr};
use std::ptr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceFeature {
    Synchronization2,
    DescriptorIndexing,
    MeshShadingNv,
}

impl DeviceFeature {
    /// Device extension that must be enabled alongside this feature, if any
    pub fn required_extension(self) -> Option<&'static CStr> {
        match self {
            // Core in Vulkan 1.3
            DeviceFeature::Synchronization2 | DeviceFeature::DescriptorIndexing => None,
            DeviceFeature::MeshShadingNv => Some(ash::extensions::nv::MeshShader::name()),
        }
    }
}

enum FeatureToggle {
    Synchronization2(vk::PhysicalDeviceSynchronization2Features),
    DescriptorIndexing(vk::PhysicalDeviceDescriptorIndexingFeatures),
    MeshShadingNv(vk::PhysicalDeviceMeshShaderFeaturesNV),
}

impl FeatureToggle {
    fn new(feature: DeviceFeature) -> Self {
        match feature {
            DeviceFeature::Synchronization2 => FeatureToggle::Synchronization2(
                vk::PhysicalDeviceSynchronization2Features::builder()
                    .synchronization2(true)
                    .build(),
            ),
            DeviceFeature::DescriptorIndexing => FeatureToggle::DescriptorIndexing(
                vk::PhysicalDeviceDescriptorIndexingFeatures::builder()
                    .shader_sampled_image_array_non_uniform_indexing(true)
                    .runtime_descriptor_array(true)
                    .descriptor_binding_partially_bound(true)
                    .descriptor_binding_variable_descriptor_count(true)
                    .build(),
            ),
            DeviceFeature::MeshShadingNv => FeatureToggle::MeshShadingNv(
                vk::PhysicalDeviceMeshShaderFeaturesNV::builder()
                    .task_shader(true)
                    .mesh_shader(true)
                    .build(),
            ),
        }
    }

    fn feature(&self) -> DeviceFeature {
        match self {
            FeatureToggle::Synchronization2(_) => DeviceFeature::Synchronization2,
            FeatureToggle::DescriptorIndexing(_) => DeviceFeature::DescriptorIndexing,
            FeatureToggle::MeshShadingNv(_) => DeviceFeature::MeshShadingNv,
        }
    }

    fn as_base_mut(&mut self) -> *mut vk::BaseOutStructure {
        // Every feature struct starts with sType + pNext.
        match self {
            FeatureToggle::Synchronization2(s) => s as *mut _ as *mut vk::BaseOutStructure,
            FeatureToggle::DescriptorIndexing(s) => s as *mut _ as *mut vk::BaseOutStructure,
            FeatureToggle::MeshShadingNv(s) => s as *mut _ as *mut vk::BaseOutStructure,
        }
    }
}

pub struct FeatureChain {
    toggles: Vec<FeatureToggle>,
}

impl FeatureChain {
    pub fn new(features: &[DeviceFeature]) -> Self {
        let mut toggles = Vec::with_capacity(features.len());
        for &feature in features {
            // A feature struct may appear only once in a pNext chain.
            if toggles.iter().any(|t: &FeatureToggle| t.feature() == feature) {
                log::warn!("Device feature {:?} requested twice, ignoring duplicate", feature);
                continue;
            }
            toggles.push(FeatureToggle::new(feature));
        }
        Self { toggles }
    }

    pub fn len(&self) -> usize {
        self.toggles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.toggles.is_empty()
    }

    /// Link the toggles in request order and return the head of the chain.
    ///
    /// The pointer is valid while `self` is alive and not modified.
    pub fn link(&mut self) -> *const c_void {
        let mut next: *mut vk::BaseOutStructure = ptr::null_mut();
        for toggle in self.toggles.iter_mut().rev() {
            let base = toggle.as_base_mut();
            unsafe { (*base).p_next = next };
            next = base;
        }
        next as *const c_void
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn walk(head: *const c_void) -> Vec<vk::StructureType> {
        let mut types = Vec::new();
        let mut cursor = head as *const vk::BaseOutStructure;
        while !cursor.is_null() {
            unsafe {
                types.push((*cursor).s_type);
                cursor = (*cursor).p_next;
            }
        }
        types
    }

    #[test]
    fn empty_chain_is_null() {
        let mut chain = FeatureChain::new(&[]);
        assert!(chain.is_empty());
        assert!(chain.link().is_null());
    }

    #[test]
    fn chain_follows_request_order() {
        let mut chain = FeatureChain::new(&[
            DeviceFeature::DescriptorIndexing,
            DeviceFeature::Synchronization2,
            DeviceFeature::MeshShadingNv,
        ]);
        let head = chain.link();

        assert_eq!(
            walk(head),
            vec![
                vk::StructureType::PHYSICAL_DEVICE_DESCRIPTOR_INDEXING_FEATURES,
                vk::StructureType::PHYSICAL_DEVICE_SYNCHRONIZATION_2_FEATURES,
                vk::StructureType::PHYSICAL_DEVICE_MESH_SHADER_FEATURES_NV,
            ]
        );
    }

    #[test]
    fn duplicates_are_dropped() {
        let mut chain = FeatureChain::new(&[
            DeviceFeature::Synchronization2,
            DeviceFeature::Synchronization2,
        ]);
        assert_eq!(chain.len(), 1);
        assert_eq!(walk(chain.link()).len(), 1);
    }

    #[test]
    fn relinking_is_stable() {
        let mut chain = FeatureChain::new(&[
            DeviceFeature::Synchronization2,
            DeviceFeature::DescriptorIndexing,
        ]);
        let first = chain.link();
        let second = chain.link();
        assert_eq!(first, second);
        assert_eq!(walk(second).len(), 2);
    }

    #[test]
    fn only_mesh_shading_needs_an_extension() {
        assert!(DeviceFeature::Synchronization2.required_extension().is_none());
        assert!(DeviceFeature::DescriptorIndexing.required_extension().is_none());
        assert_eq!(
            DeviceFeature::MeshShadingNv.required_extension().unwrap().to_str().unwrap(),
            "VK_NV_mesh_shader"
        );
    }
}

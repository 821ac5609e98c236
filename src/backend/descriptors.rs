// Descriptor pools, layouts and sets
//
// Every uniform block gets its own set with a single uniform buffer at
// binding 0. The overlay pool is handed to the UI collaborator untouched.

use anyhow::{Context, Result};
use ash::vk;
use crate::registry::{slot_keys, Registry, SlotKey};

slot_keys! {
    pub enum DescriptorPoolKind { Overlay, Default }
}

slot_keys! {
    /// Declaration order is the set number in the shaders
    pub enum DescriptorSetKind { Frame, Material, Light }
}

impl DescriptorSetKind {
    fn stage_flags(self) -> vk::ShaderStageFlags {
        match self {
            DescriptorSetKind::Frame => vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
            DescriptorSetKind::Material | DescriptorSetKind::Light => vk::ShaderStageFlags::FRAGMENT,
        }
    }
}

/// Fail early when the device cannot bind every uniform set at once
pub fn check_limits(limits: &vk::PhysicalDeviceLimits) -> Result<()> {
    let needed = DescriptorSetKind::ALL.len() as u32;
    anyhow::ensure!(
        limits.max_bound_descriptor_sets >= needed,
        "Device binds at most {} descriptor sets, {} needed",
        limits.max_bound_descriptor_sets,
        needed
    );
    Ok(())
}

/// Per-type size for the overlay pool; the overlay's needs are unknown here
const OVERLAY_DESCRIPTORS_PER_TYPE: u32 = 1000;

const OVERLAY_DESCRIPTOR_TYPES: [vk::DescriptorType; 11] = [
    vk::DescriptorType::SAMPLER,
    vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
    vk::DescriptorType::SAMPLED_IMAGE,
    vk::DescriptorType::STORAGE_IMAGE,
    vk::DescriptorType::UNIFORM_TEXEL_BUFFER,
    vk::DescriptorType::STORAGE_TEXEL_BUFFER,
    vk::DescriptorType::UNIFORM_BUFFER,
    vk::DescriptorType::STORAGE_BUFFER,
    vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
    vk::DescriptorType::STORAGE_BUFFER_DYNAMIC,
    vk::DescriptorType::INPUT_ATTACHMENT,
];

fn pool_sizes(kind: DescriptorPoolKind) -> Vec<vk::DescriptorPoolSize> {
    match kind {
        DescriptorPoolKind::Overlay => OVERLAY_DESCRIPTOR_TYPES
            .iter()
            .map(|&ty| vk::DescriptorPoolSize {
                ty,
                descriptor_count: OVERLAY_DESCRIPTORS_PER_TYPE,
            })
            .collect(),
        DescriptorPoolKind::Default => vec![vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: DescriptorSetKind::ALL.len() as u32,
        }],
    }
}

fn max_sets(kind: DescriptorPoolKind) -> u32 {
    match kind {
        DescriptorPoolKind::Overlay => OVERLAY_DESCRIPTORS_PER_TYPE,
        DescriptorPoolKind::Default => DescriptorSetKind::ALL.len() as u32,
    }
}

pub struct Descriptors {
    pub pools: Registry<DescriptorPoolKind, vk::DescriptorPool>,
    pub layouts: Registry<DescriptorSetKind, vk::DescriptorSetLayout>,
    pub sets: Registry<DescriptorSetKind, vk::DescriptorSet>,
}

impl Descriptors {
    pub fn new(device: &ash::Device) -> Result<Self> {
        let pools = Registry::try_build(|kind| {
            let sizes = pool_sizes(kind);
            let pool_info = vk::DescriptorPoolCreateInfo::builder()
                // Overlay backends free their own sets
                .flags(match kind {
                    DescriptorPoolKind::Overlay => vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET,
                    DescriptorPoolKind::Default => vk::DescriptorPoolCreateFlags::empty(),
                })
                .max_sets(max_sets(kind))
                .pool_sizes(&sizes);

            unsafe {
                device.create_descriptor_pool(&pool_info, None)
                    .with_context(|| format!("Failed to create {:?} descriptor pool", kind))
            }
        })?;

        let layouts = Registry::try_build(|kind: DescriptorSetKind| {
            let bindings = [vk::DescriptorSetLayoutBinding::builder()
                .binding(0)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .descriptor_count(1)
                .stage_flags(kind.stage_flags())
                .build()];
            let layout_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);

            unsafe {
                device.create_descriptor_set_layout(&layout_info, None)
                    .with_context(|| format!("Failed to create {:?} set layout", kind))
            }
        })?;

        let layout_list: Vec<vk::DescriptorSetLayout> = layouts.iter().map(|(_, &l)| l).collect();
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(pools[DescriptorPoolKind::Default])
            .set_layouts(&layout_list);

        let allocated = unsafe {
            device.allocate_descriptor_sets(&alloc_info)
                .context("Failed to allocate descriptor sets")?
        };
        let sets = Registry::try_build(|kind: DescriptorSetKind| Ok(allocated[kind.index()]))?;

        log::debug!("Descriptor sets allocated: {:?}", DescriptorSetKind::ALL);

        Ok(Self { pools, layouts, sets })
    }

    /// Layouts in set order, for the pipeline layout
    pub fn layout_list(&self) -> Vec<vk::DescriptorSetLayout> {
        self.layouts.iter().map(|(_, &l)| l).collect()
    }

    /// Sets in set order, for binding at first_set 0
    pub fn set_list(&self) -> Vec<vk::DescriptorSet> {
        self.sets.iter().map(|(_, &s)| s).collect()
    }

    /// Point a set's binding 0 at the whole of `buffer`
    pub fn write_uniform(&self, device: &ash::Device, kind: DescriptorSetKind, buffer: vk::Buffer) {
        let buffer_info = [vk::DescriptorBufferInfo {
            buffer,
            offset: 0,
            range: vk::WHOLE_SIZE,
        }];

        let write = vk::WriteDescriptorSet::builder()
            .dst_set(self.sets[kind])
            .dst_binding(0)
            .dst_array_element(0)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .buffer_info(&buffer_info)
            .build();

        unsafe { device.update_descriptor_sets(&[write], &[]) };
    }

    /// Sets are freed with their pools.
    pub fn destroy(&mut self, device: &ash::Device) {
        unsafe {
            for (_, pool) in self.pools.iter_rev_mut() {
                device.destroy_descriptor_pool(*pool, None);
                *pool = vk::DescriptorPool::null();
            }
            for (_, layout) in self.layouts.iter_rev_mut() {
                device.destroy_descriptor_set_layout(*layout, None);
                *layout = vk::DescriptorSetLayout::null();
            }
        }
        for (_, set) in self.sets.iter_rev_mut() {
            *set = vk::DescriptorSet::null();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_numbers_follow_declaration_order() {
        assert_eq!(DescriptorSetKind::Frame.index(), 0);
        assert_eq!(DescriptorSetKind::Material.index(), 1);
        assert_eq!(DescriptorSetKind::Light.index(), 2);
    }

    #[test]
    fn bound_set_limit_is_checked() {
        let mut limits = vk::PhysicalDeviceLimits::default();
        limits.max_bound_descriptor_sets = 2;
        assert!(check_limits(&limits).is_err());

        limits.max_bound_descriptor_sets = 4;
        assert!(check_limits(&limits).is_ok());
    }

    #[test]
    fn default_pool_fits_every_uniform_set() {
        let sizes = pool_sizes(DescriptorPoolKind::Default);
        assert_eq!(sizes.len(), 1);
        assert_eq!(sizes[0].ty, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(sizes[0].descriptor_count, 3);
        assert_eq!(max_sets(DescriptorPoolKind::Default), 3);
    }

    #[test]
    fn overlay_pool_covers_all_types() {
        let sizes = pool_sizes(DescriptorPoolKind::Overlay);
        assert_eq!(sizes.len(), OVERLAY_DESCRIPTOR_TYPES.len());
        assert!(sizes.iter().all(|s| s.descriptor_count == OVERLAY_DESCRIPTORS_PER_TYPE));
    }

    #[test]
    fn frame_set_is_visible_to_both_stages() {
        assert!(DescriptorSetKind::Frame.stage_flags().contains(vk::ShaderStageFlags::VERTEX));
        assert_eq!(DescriptorSetKind::Light.stage_flags(), vk::ShaderStageFlags::FRAGMENT);
    }
}

// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use std::ffi::{c_char, CString};
use std::ops::Deref;
use std::sync::Arc;
use tracing::{info, warn};

use crate::capability::{
    resolve_family, CapabilityRequirement, PhysicalDeviceCandidate, QueueFamilyInfo,
    QueueRequirement,
};
use crate::error::{Result, VkContext, VkError};
use crate::features::FeatureChain;
use crate::instance::GpuInstance;

/// How a resource is shared between queue families.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QueueSharing {
    Exclusive,
    Concurrent(Vec<u32>),
}

impl QueueSharing {
    /// Concurrent across the distinct families, or exclusive if there is
    /// only one.
    pub fn for_families(families: &[u32]) -> Self {
        let mut unique: Vec<u32> = Vec::with_capacity(families.len());
        for &f in families {
            if !unique.contains(&f) {
                unique.push(f);
            }
        }
        if unique.len() > 1 {
            Self::Concurrent(unique)
        } else {
            Self::Exclusive
        }
    }

    pub fn mode(&self) -> vk::SharingMode {
        match self {
            Self::Exclusive => vk::SharingMode::EXCLUSIVE,
            Self::Concurrent(_) => vk::SharingMode::CONCURRENT,
        }
    }

    pub fn families(&self) -> &[u32] {
        match self {
            Self::Exclusive => &[],
            Self::Concurrent(f) => f,
        }
    }
}

#[derive(Debug, PartialEq)]
pub(crate) struct QueuePlan {
    /// Resolved family for each requirement, by requirement index.
    pub families: Vec<u32>,
    /// One entry per distinct family: (family, priority per queue).
    pub create: Vec<(u32, Vec<f32>)>,
}

pub(crate) fn plan_queues(
    families: &[QueueFamilyInfo],
    reqs: &[QueueRequirement],
    device_name: &str,
) -> Result<QueuePlan> {
    let mut plan = QueuePlan {
        families: Vec::with_capacity(reqs.len()),
        create: Vec::new(),
    };
    for (index, req) in reqs.iter().enumerate() {
        let family =
            resolve_family(families, req).ok_or_else(|| VkError::QueueFamilyResolutionFailed {
                index,
                capability: req.capability.to_string(),
                device: device_name.to_owned(),
            })?;
        plan.families.push(family);

        let priorities = req.resolved_priorities();
        match plan.create.iter_mut().find(|(f, _)| *f == family) {
            Some((_, existing)) => {
                if priorities.len() > existing.len() {
                    existing.extend_from_slice(&priorities[existing.len()..]);
                }
            }
            None => plan.create.push((family, priorities)),
        }
    }
    Ok(plan)
}

/// The logical device plus its queues, addressable by requirement index.
pub struct LogicalDevice {
    device: ash::Device,
    physical: vk::PhysicalDevice,
    name: String,
    families: Vec<u32>,
    queues: Vec<Vec<vk::Queue>>,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    instance: Arc<GpuInstance>,
}

impl LogicalDevice {
    pub fn raw(&self) -> &ash::Device {
        &self.device
    }

    pub fn physical(&self) -> vk::PhysicalDevice {
        self.physical
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instance(&self) -> &Arc<GpuInstance> {
        &self.instance
    }

    pub fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.memory_properties
    }

    /// Family resolved for requirement `index`.
    pub fn family(&self, index: usize) -> Result<u32> {
        self.families
            .get(index)
            .copied()
            .ok_or(VkError::UnknownQueue(index))
    }

    pub fn queues(&self, index: usize) -> Result<&[vk::Queue]> {
        self.queues
            .get(index)
            .map(Vec::as_slice)
            .ok_or(VkError::UnknownQueue(index))
    }

    /// First queue of requirement `index`.
    pub fn queue(&self, index: usize) -> Result<vk::Queue> {
        self.queues(index)?
            .first()
            .copied()
            .ok_or(VkError::UnknownQueue(index))
    }

    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }.vk_context("vkDeviceWaitIdle")
    }
}

impl Deref for LogicalDevice {
    type Target = ash::Device;

    fn deref(&self) -> &ash::Device {
        &self.device
    }
}

impl Drop for LogicalDevice {
    fn drop(&mut self) {
        unsafe {
            // Every child object holds an Arc to us, so by now only queue work
            // can still reference the device.
            if let Err(e) = self.device.device_wait_idle() {
                warn!("device wait before teardown failed: {e}");
            }
            self.device.destroy_device(None);
        }
    }
}

pub struct LogicalDeviceBuilder;

impl LogicalDeviceBuilder {
    pub fn build(
        instance: &Arc<GpuInstance>,
        candidate: &PhysicalDeviceCandidate,
        requirement: &CapabilityRequirement,
    ) -> Result<Arc<LogicalDevice>> {
        let plan = plan_queues(&candidate.queue_families, &requirement.queues, &candidate.name)?;

        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = plan
            .create
            .iter()
            .map(|(family, priorities)| vk::DeviceQueueCreateInfo {
                s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
                queue_family_index: *family,
                queue_count: priorities.len() as u32,
                p_queue_priorities: priorities.as_ptr(),
                ..Default::default()
            })
            .collect();

        let ext_names: Vec<CString> = requirement
            .extensions
            .iter()
            .map(|n| CString::new(n.as_str()).map_err(|_| VkError::InvalidName(n.clone())))
            .collect::<Result<_>>()?;
        let ext_ptrs: Vec<*const c_char> = ext_names.iter().map(|c| c.as_ptr()).collect();

        let mut features =
            FeatureChain::new(candidate.api_version.min(instance.api_version()));
        let unknown = features.enable(&requirement.features);
        if !unknown.is_empty() {
            warn!("ignoring unrecognised feature flags: {}", unknown.join(", "));
        }

        let mut create_info = vk::DeviceCreateInfo {
            s_type: vk::StructureType::DEVICE_CREATE_INFO,
            queue_create_info_count: queue_infos.len() as u32,
            p_queue_create_infos: queue_infos.as_ptr(),
            enabled_extension_count: ext_ptrs.len() as u32,
            pp_enabled_extension_names: ext_ptrs.as_ptr(),
            ..Default::default()
        };
        if features.uses_features2() {
            create_info.p_next = features.link() as *const _;
        } else {
            create_info.p_enabled_features = &features.core.features;
        }

        let raw = instance.raw();
        let device = unsafe { raw.create_device(candidate.handle, &create_info, None) }
            .vk_context("vkCreateDevice")?;

        let queues: Vec<Vec<vk::Queue>> = requirement
            .queues
            .iter()
            .zip(&plan.families)
            .map(|(req, &family)| {
                (0..req.count())
                    .map(|j| unsafe { device.get_device_queue(family, j) })
                    .collect()
            })
            .collect();
        let memory_properties =
            unsafe { raw.get_physical_device_memory_properties(candidate.handle) };

        info!(
            "logical device on {}: families {:?}, {} extensions",
            candidate.name,
            plan.families,
            ext_ptrs.len()
        );

        Ok(Arc::new(LogicalDevice {
            device,
            physical: candidate.handle,
            name: candidate.name.clone(),
            families: plan.families,
            queues,
            memory_properties,
            instance: Arc::clone(instance),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::QueueCapability;

    fn families() -> Vec<QueueFamilyInfo> {
        vec![
            QueueFamilyInfo {
                flags: vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER,
                queue_count: 2,
                presentable: true,
            },
            QueueFamilyInfo {
                flags: vk::QueueFlags::TRANSFER,
                queue_count: 2,
                presentable: false,
            },
        ]
    }

    #[test]
    fn shared_family_is_created_once_with_max_count() {
        let reqs = [
            QueueRequirement::new(QueueCapability::graphics().with_present(), 1),
            QueueRequirement::new(QueueCapability::graphics(), 2).with_priorities(vec![1.0, 0.25]),
        ];
        let plan = plan_queues(&families(), &reqs, "gpu").unwrap();
        assert_eq!(plan.families, vec![0, 0]);
        assert_eq!(plan.create, vec![(0, vec![1.0, 0.25])]);
    }

    #[test]
    fn zero_count_requirement_still_creates_a_queue() {
        let reqs = [QueueRequirement::new(QueueCapability::transfer(), 0)];
        let plan = plan_queues(&families(), &reqs, "gpu").unwrap();
        assert_eq!(plan.create, vec![(0, vec![1.0])]);
    }

    #[test]
    fn families_are_reported_in_requirement_order() {
        let reqs = [
            QueueRequirement::new(QueueCapability::graphics(), 1),
            QueueRequirement::new(QueueCapability::transfer(), 2),
            QueueRequirement::new(QueueCapability::transfer(), 1),
        ];
        let plan = plan_queues(&families(), &reqs, "gpu").unwrap();
        // Transfer resolves to family 0 too: first match, no preference for
        // dedicated families.
        assert_eq!(plan.families, vec![0, 0, 0]);
        assert_eq!(plan.create.len(), 1);
        assert_eq!(plan.create[0].1.len(), 2);
    }

    #[test]
    fn unresolvable_requirement_is_a_contract_violation() {
        let reqs = [
            QueueRequirement::new(QueueCapability::graphics(), 1),
            QueueRequirement::new(QueueCapability::new(vk::QueueFlags::COMPUTE), 1),
        ];
        let err = plan_queues(&families(), &reqs, "gpu").unwrap_err();
        assert!(matches!(
            err,
            VkError::QueueFamilyResolutionFailed { index: 1, .. }
        ));
    }

    #[test]
    fn sharing_collapses_identical_families() {
        assert_eq!(QueueSharing::for_families(&[0, 0]), QueueSharing::Exclusive);
        assert_eq!(QueueSharing::for_families(&[]), QueueSharing::Exclusive);
        let s = QueueSharing::for_families(&[0, 2, 0]);
        assert_eq!(s, QueueSharing::Concurrent(vec![0, 2]));
        assert_eq!(s.mode(), vk::SharingMode::CONCURRENT);
        assert_eq!(s.families(), &[0, 2]);
    }
}

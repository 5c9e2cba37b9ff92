// SPDX-License-Identifier: CEPL-1.0
//! GPU selection: score every candidate on a fixed four-entry checklist and
//! take the first that passes all four.

use ash::vk;
use std::collections::BTreeSet;
use std::fmt;
use tracing::{debug, info};

use crate::capability::{
    resolve_family, ApiVersion, CapabilityRequirement, PhysicalDeviceCandidate, QueueFamilyInfo,
};
use crate::error::{Result, VkContext, VkError};
use crate::features::FeatureChain;
use crate::instance::GpuInstance;
use crate::surface::Surface;

/// One boolean per requirement category.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CapabilityScore {
    pub version: bool,
    pub queues: bool,
    pub extensions: bool,
    pub features: bool,
}

impl CapabilityScore {
    fn evaluate(req: &CapabilityRequirement, cand: &PhysicalDeviceCandidate) -> Self {
        Self {
            version: cand.api_version >= req.min_version,
            queues: req
                .queues
                .iter()
                .all(|q| resolve_family(&cand.queue_families, q).is_some()),
            extensions: req.extensions.iter().all(|e| cand.extensions.contains(e)),
            features: req.features.is_satisfied_by(&cand.features),
        }
    }

    pub fn is_suitable(&self) -> bool {
        self.version && self.queues && self.extensions && self.features
    }

    pub fn entries(&self) -> [(&'static str, bool); 4] {
        [
            ("Has minimum api version", self.version),
            (
                "Has all queue families and sufficient queues for each",
                self.queues,
            ),
            ("Has all required extensions", self.extensions),
            ("Has all required features", self.features),
        ]
    }
}

#[derive(Clone, Debug)]
pub struct CandidateReport {
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub api_version: ApiVersion,
    pub score: CapabilityScore,
    pub missing_extensions: Vec<String>,
    pub missing_features: Vec<String>,
}

/// Checklist for every candidate, carried by `NoSuitableDevice`.
#[derive(Clone, Debug, Default)]
pub struct SelectionReport {
    pub required_version: ApiVersion,
    pub candidates: Vec<CandidateReport>,
}

impl fmt::Display for SelectionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.candidates.is_empty() {
            return write!(f, "  (no physical devices enumerated)");
        }
        for (i, c) in self.candidates.iter().enumerate() {
            writeln!(
                f,
                "  [{i}] {} ({:?}, Vulkan {}; need {})",
                c.name, c.device_type, c.api_version, self.required_version
            )?;
            for (label, ok) in c.score.entries() {
                writeln!(f, "      [{}] {label}", if ok { "x" } else { " " })?;
            }
            if !c.missing_extensions.is_empty() {
                writeln!(f, "      missing extensions: {}", c.missing_extensions.join(", "))?;
            }
            if !c.missing_features.is_empty() {
                writeln!(f, "      missing features: {}", c.missing_features.join(", "))?;
            }
        }
        Ok(())
    }
}

pub struct DeviceSelector;

impl DeviceSelector {
    /// First candidate, in enumeration order, that passes every check.
    pub fn select(
        requirement: &CapabilityRequirement,
        candidates: &[PhysicalDeviceCandidate],
    ) -> Result<PhysicalDeviceCandidate> {
        let mut report = SelectionReport {
            required_version: requirement.min_version,
            candidates: Vec::with_capacity(candidates.len()),
        };

        for cand in candidates {
            let score = CapabilityScore::evaluate(requirement, cand);
            if score.is_suitable() {
                info!(
                    "Selected physical device: {} ({:?}, Vulkan {})",
                    cand.name, cand.device_type, cand.api_version
                );
                return Ok(cand.clone());
            }
            debug!("Skipping {}: {:?}", cand.name, score);
            report.candidates.push(CandidateReport {
                name: cand.name.clone(),
                device_type: cand.device_type,
                api_version: cand.api_version,
                score,
                missing_extensions: requirement
                    .extensions
                    .iter()
                    .filter(|e| !cand.extensions.contains(*e))
                    .cloned()
                    .collect(),
                missing_features: requirement.features.missing_from(&cand.features),
            });
        }

        Err(VkError::NoSuitableDevice(report))
    }

    /// Snapshot every physical device the instance can see, with queue-family
    /// presentation support evaluated against `surface`.
    pub fn enumerate_candidates(
        instance: &GpuInstance,
        surface: &Surface,
    ) -> Result<Vec<PhysicalDeviceCandidate>> {
        let raw = instance.raw();
        let devices = unsafe { raw.enumerate_physical_devices() }
            .vk_context("vkEnumeratePhysicalDevices")?;

        let mut out = Vec::with_capacity(devices.len());
        for phys in devices {
            let props = unsafe { raw.get_physical_device_properties(phys) };
            let name = props
                .device_name_as_c_str()
                .map(|c| c.to_string_lossy().into_owned())
                .unwrap_or_else(|_| "<unnamed device>".to_owned());
            let api_version = ApiVersion::from_raw(props.api_version);

            let families = unsafe { raw.get_physical_device_queue_family_properties(phys) };
            let mut queue_families = Vec::with_capacity(families.len());
            for (idx, fam) in families.iter().enumerate() {
                queue_families.push(QueueFamilyInfo {
                    flags: fam.queue_flags,
                    queue_count: fam.queue_count,
                    presentable: surface.supports_present(phys, idx as u32)?,
                });
            }

            let extensions: BTreeSet<String> =
                unsafe { raw.enumerate_device_extension_properties(phys) }
                    .vk_context("vkEnumerateDeviceExtensionProperties")?
                    .iter()
                    .filter_map(|e| e.extension_name_as_c_str().ok())
                    .map(|c| c.to_string_lossy().into_owned())
                    .collect();

            // Feature structs newer than either side of the instance/device
            // pair cannot be queried.
            let mut chain = FeatureChain::new(api_version.min(instance.api_version()));
            if chain.uses_features2() {
                chain.link();
                unsafe { raw.get_physical_device_features2(phys, &mut chain.core) };
            } else {
                chain.core.features = unsafe { raw.get_physical_device_features(phys) };
            }
            let features = chain.to_bundle();

            debug!(
                "candidate {name}: {:?} Vulkan {api_version}, {} queue families, {} extensions",
                props.device_type,
                queue_families.len(),
                extensions.len()
            );
            out.push(PhysicalDeviceCandidate {
                handle: phys,
                name,
                device_type: props.device_type,
                api_version,
                queue_families,
                extensions,
                features,
            });
        }
        Ok(out)
    }
}

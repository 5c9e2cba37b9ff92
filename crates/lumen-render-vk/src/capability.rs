// SPDX-License-Identifier: CEPL-1.0
//! What the engine asks of a GPU, and what a GPU says it has.

use ash::vk;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use crate::error::VkError;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ApiVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ApiVersion {
    pub const V1_0: Self = Self::new(1, 0, 0);
    pub const V1_1: Self = Self::new(1, 1, 0);
    pub const V1_2: Self = Self::new(1, 2, 0);
    pub const V1_3: Self = Self::new(1, 3, 0);

    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    pub fn from_raw(raw: u32) -> Self {
        Self::new(
            vk::api_version_major(raw),
            vk::api_version_minor(raw),
            vk::api_version_patch(raw),
        )
    }

    pub fn to_raw(self) -> u32 {
        vk::make_api_version(0, self.major, self.minor, self.patch)
    }

    /// Same version with the patch level dropped; feature availability
    /// only depends on major.minor.
    pub fn truncated(self) -> Self {
        Self::new(self.major, self.minor, 0)
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for ApiVersion {
    type Err = VkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || VkError::InvalidApiVersion(s.to_owned());
        let mut parts = s.trim().split('.');
        let mut next = |required: bool| -> Result<u32, VkError> {
            match parts.next() {
                Some(p) => p.parse().map_err(|_| bad()),
                None if required => Err(bad()),
                None => Ok(0),
            }
        };
        let v = Self::new(next(true)?, next(true)?, next(false)?);
        if parts.next().is_some() {
            return Err(bad());
        }
        Ok(v)
    }
}

/// Queue flags a family must expose, plus an opt-in for presentation to the
/// engine's surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueCapability {
    pub flags: vk::QueueFlags,
    pub present: bool,
}

impl QueueCapability {
    pub const fn new(flags: vk::QueueFlags) -> Self {
        Self {
            flags,
            present: false,
        }
    }

    pub const fn graphics() -> Self {
        Self::new(vk::QueueFlags::GRAPHICS)
    }

    pub const fn transfer() -> Self {
        Self::new(vk::QueueFlags::TRANSFER)
    }

    pub const fn with_present(mut self) -> Self {
        self.present = true;
        self
    }
}

impl fmt::Display for QueueCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.flags)?;
        if self.present {
            write!(f, " + present")?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct QueueRequirement {
    pub capability: QueueCapability,
    count: u32,
    /// Per-queue priorities; missing entries default to 1.0.
    pub priorities: Vec<f32>,
}

impl QueueRequirement {
    /// A count of zero is treated as one; a requirement always yields a queue.
    pub fn new(capability: QueueCapability, count: u32) -> Self {
        Self {
            capability,
            count: count.max(1),
            priorities: Vec::new(),
        }
    }

    pub fn with_priorities(mut self, priorities: Vec<f32>) -> Self {
        self.priorities = priorities;
        self
    }

    /// Number of queues to create, never zero.
    pub fn count(&self) -> u32 {
        self.count
    }

    pub(crate) fn resolved_priorities(&self) -> Vec<f32> {
        (0..self.count as usize)
            .map(|j| {
                self.priorities
                    .get(j)
                    .copied()
                    .unwrap_or(1.0)
                    .clamp(0.0, 1.0)
            })
            .collect()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilyInfo {
    pub flags: vk::QueueFlags,
    pub queue_count: u32,
    /// Can present to the surface the candidates were enumerated against.
    pub presentable: bool,
}

impl QueueFamilyInfo {
    pub fn satisfies(&self, req: &QueueRequirement) -> bool {
        self.flags.contains(req.capability.flags)
            && self.queue_count >= req.count()
            && (!req.capability.present || self.presentable)
    }
}

/// First family, in driver order, that satisfies `req`.
pub(crate) fn resolve_family(families: &[QueueFamilyInfo], req: &QueueRequirement) -> Option<u32> {
    families
        .iter()
        .position(|f| f.satisfies(req))
        .map(|i| i as u32)
}

/// Boolean feature flags grouped by category ("core", "vulkan13", ...).
///
/// Used both for what a caller requests and for what a device reports.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FeatureBundle {
    categories: BTreeMap<String, BTreeMap<String, bool>>,
}

impl FeatureBundle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, category: &str, flag: &str, value: bool) -> Self {
        self.set(category, flag, value);
        self
    }

    pub fn set(&mut self, category: &str, flag: &str, value: bool) {
        self.categories
            .entry(category.to_owned())
            .or_default()
            .insert(flag.to_owned(), value);
    }

    pub fn get(&self, category: &str, flag: &str) -> Option<bool> {
        self.categories.get(category)?.get(flag).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.values().all(BTreeMap::is_empty)
    }

    pub fn categories(&self) -> impl Iterator<Item = (&str, &BTreeMap<String, bool>)> {
        self.categories.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Flags set to `true`, as `(category, flag)`.
    pub fn requested(&self) -> impl Iterator<Item = (&str, &str)> {
        self.categories.iter().flat_map(|(cat, flags)| {
            flags
                .iter()
                .filter(|(_, on)| **on)
                .map(move |(flag, _)| (cat.as_str(), flag.as_str()))
        })
    }

    /// Requested flags that `available` does not report as enabled. Flags
    /// requested `false` never appear here.
    pub fn missing_from(&self, available: &FeatureBundle) -> Vec<String> {
        self.requested()
            .filter(|(cat, flag)| available.get(cat, flag) != Some(true))
            .map(|(cat, flag)| format!("{cat}.{flag}"))
            .collect()
    }

    pub fn is_satisfied_by(&self, available: &FeatureBundle) -> bool {
        self.requested()
            .all(|(cat, flag)| available.get(cat, flag) == Some(true))
    }

    /// Union of requested flags; `true` wins over `false`.
    pub fn merge(&mut self, other: &FeatureBundle) {
        for (cat, flags) in other.categories() {
            for (flag, on) in flags {
                let slot = self
                    .categories
                    .entry(cat.to_owned())
                    .or_default()
                    .entry(flag.clone())
                    .or_insert(false);
                *slot |= *on;
            }
        }
    }
}

/// Caller-supplied description of the GPU the engine needs.
#[derive(Clone, Debug, PartialEq)]
pub struct CapabilityRequirement {
    pub min_version: ApiVersion,
    /// Addressed by index everywhere downstream.
    pub queues: Vec<QueueRequirement>,
    pub extensions: Vec<String>,
    pub features: FeatureBundle,
}

impl Default for CapabilityRequirement {
    fn default() -> Self {
        Self {
            min_version: ApiVersion::V1_0,
            queues: Vec::new(),
            extensions: Vec::new(),
            features: FeatureBundle::new(),
        }
    }
}

impl CapabilityRequirement {
    pub fn with_min_version(mut self, v: ApiVersion) -> Self {
        self.min_version = v;
        self
    }

    pub fn with_queue(mut self, q: QueueRequirement) -> Self {
        self.queues.push(q);
        self
    }

    pub fn with_extension(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !self.extensions.contains(&name) {
            self.extensions.push(name);
        }
        self
    }

    pub fn with_features(mut self, features: FeatureBundle) -> Self {
        self.features = features;
        self
    }
}

/// Read-only snapshot of one physical device.
#[derive(Clone, Debug)]
pub struct PhysicalDeviceCandidate {
    pub handle: vk::PhysicalDevice,
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub api_version: ApiVersion,
    pub queue_families: Vec<QueueFamilyInfo>,
    pub extensions: BTreeSet<String>,
    pub features: FeatureBundle,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_version_parses_and_orders() {
        let v: ApiVersion = "1.3".parse().unwrap();
        assert_eq!(v, ApiVersion::V1_3);
        let p: ApiVersion = "1.2.198".parse().unwrap();
        assert!(p < v);
        assert!(p > ApiVersion::V1_2);
        assert!("1".parse::<ApiVersion>().is_err());
        assert!("1.x".parse::<ApiVersion>().is_err());
        assert!("1.2.3.4".parse::<ApiVersion>().is_err());
    }

    #[test]
    fn api_version_raw_round_trips() {
        let v = ApiVersion::new(1, 3, 250);
        assert_eq!(ApiVersion::from_raw(v.to_raw()), v);
        assert_eq!(ApiVersion::from_raw(vk::API_VERSION_1_2), ApiVersion::V1_2);
    }

    #[test]
    fn priorities_pad_and_clamp() {
        let q = QueueRequirement::new(QueueCapability::graphics(), 3)
            .with_priorities(vec![0.5, 7.0]);
        assert_eq!(q.resolved_priorities(), vec![0.5, 1.0, 1.0]);
        let req = QueueRequirement::new(QueueCapability::graphics(), 0);
        assert_eq!(req.count(), 1);
        assert_eq!(req.resolved_priorities(), vec![1.0]);
    }

    #[test]
    fn family_resolution_respects_flags_count_and_present() {
        let families = [
            QueueFamilyInfo {
                flags: vk::QueueFlags::TRANSFER,
                queue_count: 2,
                presentable: false,
            },
            QueueFamilyInfo {
                flags: vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE,
                queue_count: 1,
                presentable: false,
            },
            QueueFamilyInfo {
                flags: vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER,
                queue_count: 4,
                presentable: true,
            },
        ];
        let gfx = QueueRequirement::new(QueueCapability::graphics(), 1);
        assert_eq!(resolve_family(&families, &gfx), Some(1));

        let gfx_present = QueueRequirement::new(QueueCapability::graphics().with_present(), 1);
        assert_eq!(resolve_family(&families, &gfx_present), Some(2));

        let many = QueueRequirement::new(QueueCapability::transfer(), 3);
        assert_eq!(resolve_family(&families, &many), Some(2));

        let too_many = QueueRequirement::new(QueueCapability::graphics(), 5);
        assert_eq!(resolve_family(&families, &too_many), None);
    }

    #[test]
    fn feature_check_is_asymmetric() {
        let everything = FeatureBundle::new()
            .with("core", "samplerAnisotropy", true)
            .with("vulkan13", "dynamicRendering", true);
        let nothing = FeatureBundle::new()
            .with("core", "samplerAnisotropy", false)
            .with("vulkan13", "dynamicRendering", false);

        assert!(everything.is_satisfied_by(&everything));
        assert!(nothing.is_satisfied_by(&nothing));
        assert!(nothing.is_satisfied_by(&FeatureBundle::new()));
        assert!(!everything.is_satisfied_by(&nothing));
        assert_eq!(
            everything.missing_from(&nothing),
            vec!["core.samplerAnisotropy", "vulkan13.dynamicRendering"]
        );
    }

    #[test]
    fn unknown_flags_count_as_unsupported() {
        let want = FeatureBundle::new().with("vulkan14", "somethingNew", true);
        let have = FeatureBundle::new().with("core", "geometryShader", true);
        assert!(!want.is_satisfied_by(&have));
    }

    #[test]
    fn merge_keeps_true_flags() {
        let mut a = FeatureBundle::new().with("vulkan13", "synchronization2", false);
        let b = FeatureBundle::new()
            .with("vulkan13", "synchronization2", true)
            .with("core", "wideLines", false);
        a.merge(&b);
        assert_eq!(a.get("vulkan13", "synchronization2"), Some(true));
        assert_eq!(a.get("core", "wideLines"), Some(false));
        assert!(!FeatureBundle::new().with("core", "x", false).requested().any(|_| true));
    }

    #[test]
    fn requirement_extensions_are_deduplicated() {
        let r = CapabilityRequirement::default()
            .with_extension("VK_KHR_swapchain")
            .with_extension("VK_KHR_swapchain");
        assert_eq!(r.extensions, vec!["VK_KHR_swapchain".to_owned()]);
    }
}

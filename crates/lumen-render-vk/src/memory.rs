// SPDX-License-Identifier: CEPL-1.0
use ash::vk;

use crate::error::{Result, VkError};

/// First memory type allowed by `type_bits` whose properties include `required`.
pub fn find_memory_type(
    props: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> Result<u32> {
    let count = (props.memory_type_count as usize).min(props.memory_types.len());
    props.memory_types[..count]
        .iter()
        .enumerate()
        .find(|(i, ty)| type_bits & (1 << i) != 0 && ty.property_flags.contains(required))
        .map(|(i, _)| i as u32)
        .ok_or(VkError::NoSuitableMemoryType {
            type_bits,
            required,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut p = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len() as u32,
            ..Default::default()
        };
        for (i, flags) in types.iter().enumerate() {
            p.memory_types[i] = vk::MemoryType {
                property_flags: *flags,
                heap_index: 0,
            };
        }
        p
    }

    const DEVICE_LOCAL: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::DEVICE_LOCAL;
    const HOST: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::from_raw(
        vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw()
            | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw(),
    );

    #[test]
    fn picks_first_type_with_bit_and_superset_flags() {
        let p = props(&[
            DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            HOST | vk::MemoryPropertyFlags::HOST_CACHED,
            HOST,
        ]);
        assert_eq!(find_memory_type(&p, 0b1111, DEVICE_LOCAL).unwrap(), 0);
        assert_eq!(find_memory_type(&p, 0b1111, HOST).unwrap(), 2);
        assert_eq!(find_memory_type(&p, 0b1000, HOST).unwrap(), 3);
    }

    #[test]
    fn type_bit_must_be_set() {
        let p = props(&[DEVICE_LOCAL, DEVICE_LOCAL]);
        assert_eq!(find_memory_type(&p, 0b10, DEVICE_LOCAL).unwrap(), 1);
    }

    #[test]
    fn no_match_is_an_error() {
        let p = props(&[DEVICE_LOCAL]);
        let err = find_memory_type(&p, 0b1, HOST).unwrap_err();
        assert!(matches!(err, VkError::NoSuitableMemoryType { type_bits: 1, .. }));
        // Types past memory_type_count are ignored even if the mask names them.
        assert!(find_memory_type(&p, 0b10, DEVICE_LOCAL).is_err());
    }
}

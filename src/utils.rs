//! Small shared utilities.

use ash::vk;
use std::fmt::{self, Debug, Display};

/// A trait for types holding a raw Vulkan handle.
pub trait AsVkHandle {
    type Handle: vk::Handle;
    fn vk_handle(&self) -> Self::Handle;
}

/// A wrapper around the packed Vulkan version integer.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Version(pub u32);

impl Version {
    pub const V1_2: Self = Self(vk::API_VERSION_1_2);
    pub const V1_3: Self = Self(vk::API_VERSION_1_3);

    pub const fn new(variant: u32, major: u32, minor: u32, patch: u32) -> Self {
        Self(vk::make_api_version(variant, major, minor, patch))
    }
    pub const fn major(&self) -> u32 {
        vk::api_version_major(self.0)
    }
    pub const fn minor(&self) -> u32 {
        vk::api_version_minor(self.0)
    }
    pub const fn patch(&self) -> u32 {
        vk::api_version_patch(self.0)
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major(), self.minor(), self.patch())
    }
}
impl Debug for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_roundtrip() {
        let v = Version::new(0, 1, 3, 42);
        assert_eq!(v.major(), 1);
        assert_eq!(v.minor(), 3);
        assert_eq!(v.patch(), 42);
        assert_eq!(format!("{v}"), "1.3.42");
    }

    #[test]
    fn version_ordering() {
        assert!(Version::V1_3 > Version::V1_2);
    }
}

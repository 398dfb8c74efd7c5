//! Device capability probing

use crate::{
    backend::{Backend, DeviceInfo, PlatformInfo},
    error::BackendError,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    pub name: String,
    pub extensions: String,
}

/// Properties of a device, queried once and read only afterwards
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceProperties {
    pub platform: Platform,
    pub name: String,
    pub extensions: String,
    /// Device supports double precision (`cl_khr_fp64`)
    pub has_dp: bool,
    /// Device supports `cl_intel_subgroups` together with `cl_intel_required_subgroup_size`
    pub has_intel_subgroups: bool,
}

impl DeviceProperties {
    pub fn query<B: Backend>(backend: &B, device: B::Device) -> Result<Self, BackendError> {
        let platform = backend.device_platform(device)?;
        let platform = Platform {
            name: backend.platform_info(platform, PlatformInfo::Name)?,
            extensions: backend.platform_info(platform, PlatformInfo::Extensions)?,
        };
        let name = backend.device_info(device, DeviceInfo::Name)?;
        let extensions = backend.device_info(device, DeviceInfo::Extensions)?;
        Ok(Self::new(platform, name, extensions))
    }

    /// Derives capability flags from extension string
    #[must_use]
    pub fn new(platform: Platform, name: String, extensions: String) -> Self {
        let has_ext = |ext: &str| extensions.contains(ext);
        let has_dp = has_ext("cl_khr_fp64");
        let has_intel_subgroups =
            has_ext("cl_intel_subgroups") && has_ext("cl_intel_required_subgroup_size");
        DeviceProperties { platform, name, extensions, has_dp, has_intel_subgroups }
    }

    #[must_use]
    pub const fn support_level(&self) -> SupportLevel {
        if self.has_intel_subgroups {
            SupportLevel::Tuned
        } else {
            SupportLevel::Basic
        }
    }
}

/// How well is a device supported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u32)]
pub enum SupportLevel {
    /// Device could not be queried
    None = 1,
    /// Generic kernels only
    Basic = 2,
    /// Device has subgroup extensions used by tuned kernels
    Tuned = 3,
    /// Reserved for hand written device specific kernels
    Native = 4,
}

/// Support level of device, never fails, query failure means [`SupportLevel::None`]
pub fn get_support_level<B: Backend>(backend: &B, device: B::Device) -> SupportLevel {
    match DeviceProperties::query(backend, device) {
        Ok(props) => props.support_level(),
        Err(_) => SupportLevel::None,
    }
}

#[cfg(test)]
mod tests {
    use super::{DeviceProperties, Platform, SupportLevel};

    fn props(extensions: &str) -> DeviceProperties {
        let platform = Platform { name: "p".into(), extensions: String::new() };
        DeviceProperties::new(platform, "d".into(), extensions.into())
    }

    #[test]
    fn extension_flags() {
        let p = props("cl_khr_fp64 cl_intel_subgroups");
        assert!(p.has_dp);
        assert!(!p.has_intel_subgroups);
        assert_eq!(p.support_level(), SupportLevel::Basic);
        let p = props("cl_intel_required_subgroup_size cl_intel_subgroups");
        assert!(!p.has_dp);
        assert!(p.has_intel_subgroups);
        assert_eq!(p.support_level(), SupportLevel::Tuned);
        assert_eq!(SupportLevel::Native as u32, 4);
    }
}

//! # lamina-core
//! Core library for lamina.
//! Contains the basic types shared by the layer builder and the tools: error
//! handling, binary file helpers, optics (refractive indices and Fresnel
//! equations) and a handful of numeric utilities.
#![warn(missing_docs)]

use std::fmt::{Display, Formatter};

pub mod error;
pub mod io;
pub mod math;
pub mod optics;
pub mod utils;

#[cfg(feature = "cli")]
pub mod cli;

pub use error::Error;

/// Version of anything in lamina.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Version {
    /// Major version.
    pub major: u8,
    /// Minor version.
    pub minor: u8,
    /// Patch version.
    pub patch: u8,
}

impl Version {
    /// Creates a new version.
    pub const fn new(major: u8, minor: u8, patch: u8) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Returns the version as a u32.
    pub const fn as_u32(&self) -> u32 {
        (self.major as u32) << 16 | (self.minor as u32) << 8 | (self.patch as u32)
    }

    /// Converts a version from a u32.
    pub const fn from_u32(v: u32) -> Self {
        Self {
            major: ((v >> 16) & 0xFF) as u8,
            minor: ((v >> 8) & 0xFF) as u8,
            patch: (v & 0xFF) as u8,
        }
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[cfg(test)]
mod tests {
    use super::Version;

    #[test]
    fn version_packs_into_u32() {
        let v = Version::new(0, 1, 0);
        assert_eq!(v.as_u32(), 0x0000_0100);
        assert_eq!(Version::from_u32(v.as_u32()), v);
        assert_eq!(format!("{}", Version::new(1, 2, 3)), "v1.2.3");
    }
}

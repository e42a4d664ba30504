//! Native library version gate

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Oldest liboni release this crate speaks to
pub const MIN_SUPPORTED: LibraryVersion = LibraryVersion {
    major: 4,
    minor: 0,
    patch: 0,
};

/// liboni semantic version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LibraryVersion {
    pub major: i32,
    pub minor: i32,
    pub patch: i32,
}

impl LibraryVersion {
    pub const fn new(major: i32, minor: i32, patch: i32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Check this version against [`MIN_SUPPORTED`]. Only the major number matters.
    pub fn ensure_supported(self) -> Result<Self> {
        if self.major < MIN_SUPPORTED.major {
            return Err(Error::UnsupportedVersion {
                found: self,
                required: MIN_SUPPORTED,
            });
        }
        Ok(self)
    }
}

impl std::fmt::Display for LibraryVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supported_versions() {
        assert!(LibraryVersion::new(4, 0, 0).ensure_supported().is_ok());
        assert!(LibraryVersion::new(6, 2, 1).ensure_supported().is_ok());
    }

    #[test]
    fn test_old_major_rejected() {
        let err = LibraryVersion::new(3, 9, 9).ensure_supported().unwrap_err();
        assert_eq!(
            err.to_string(),
            "liboni version 3.9.9 not supported, required >= 4.0.0"
        );
    }

    #[test]
    fn test_json_form() {
        let version = LibraryVersion::new(4, 4, 0);
        let json = serde_json::to_string(&version).unwrap();
        assert_eq!(json, r#"{"major":4,"minor":4,"patch":0}"#);
        assert_eq!(serde_json::from_str::<LibraryVersion>(&json).unwrap(), version);
    }
}

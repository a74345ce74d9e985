//! Target platform identifiers and architecture naming.
//!
//! Build systems name architectures after the machine (`aarch64`, `x86_64`),
//! OCI names them after Go's `GOARCH` (`arm64`, `amd64`). Both directions are
//! handled here so the rest of the workspace only ever compares OCI names.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{OciError, Result};

/// OCI architecture names this workspace knows how to target.
pub const KNOWN_OCI_ARCHES: &[&str] = &[
    "amd64", "arm64", "arm", "386", "riscv64", "ppc64le", "mips64le", "s390x",
];

/// Map a machine architecture name to its OCI name.
///
/// Unknown names pass through unchanged.
pub fn normalize_arch_to_oci(arch: &str) -> String {
    let oci = match arch {
        "aarch64" | "arm64" => "arm64",
        "x86_64" | "amd64" => "amd64",
        "arm" => "arm",
        a if a.starts_with("armv7") => "arm",
        "i386" | "i486" | "i586" | "i686" | "386" => "386",
        "riscv64" => "riscv64",
        "ppc64le" | "powerpc64le" => "ppc64le",
        "mips64el" | "mips64le" => "mips64le",
        other => other,
    };
    oci.to_string()
}

/// Map an OCI architecture name back to the machine name.
pub fn normalize_arch_from_oci(arch: &str) -> String {
    let machine = match arch {
        "arm64" => "aarch64",
        "amd64" => "x86_64",
        "386" => "i686",
        "mips64le" => "mips64el",
        other => other,
    };
    machine.to_string()
}

/// Default OCI variant implied by a machine architecture name.
pub fn arch_variant(arch: &str) -> Option<&'static str> {
    if arch == "arm" || arch.starts_with("armv7") {
        Some("v7")
    } else {
        None
    }
}

/// The platform an image is built for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetPlatform {
    pub os: String,
    /// OCI architecture name.
    pub architecture: String,
    pub variant: Option<String>,
    /// Package-feed architecture; scopes the layer cache.
    pub package_arch: String,
}

impl TargetPlatform {
    /// Build a Linux platform from a machine or OCI architecture name.
    pub fn new(arch: &str) -> Result<Self> {
        Self::with_overrides(arch, None, None, "linux")
    }

    /// Build a platform, taking variant and package arch from the caller when given.
    pub fn with_overrides(
        arch: &str,
        variant: Option<&str>,
        package_arch: Option<&str>,
        os: &str,
    ) -> Result<Self> {
        let arch = arch.trim();
        if arch.is_empty() {
            return Err(OciError::config_with_hint(
                "target architecture is not set",
                "set platform.arch or pass --arch",
            ));
        }

        let architecture = normalize_arch_to_oci(arch);
        if !KNOWN_OCI_ARCHES.contains(&architecture.as_str()) {
            return Err(OciError::config_with_hint(
                format!("unknown target architecture '{}'", arch),
                format!("known OCI architectures: {}", KNOWN_OCI_ARCHES.join(", ")),
            ));
        }

        let variant = variant
            .map(String::from)
            .or_else(|| arch_variant(arch).map(String::from));
        let package_arch = package_arch
            .map(String::from)
            .unwrap_or_else(|| normalize_arch_from_oci(&architecture));

        Ok(Self {
            os: if os.is_empty() { "linux".to_string() } else { os.to_string() },
            architecture,
            variant,
            package_arch,
        })
    }

    /// Whether an OCI platform descriptor's architecture/variant matches this target.
    pub fn matches(&self, architecture: &str, variant: Option<&str>) -> bool {
        if normalize_arch_to_oci(architecture) != self.architecture {
            return false;
        }
        match (self.variant.as_deref(), variant) {
            (Some(want), Some(have)) => want == have,
            _ => true,
        }
    }
}

impl fmt::Display for TargetPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.architecture)?;
        if let Some(ref variant) = self.variant {
            write!(f, "/{}", variant)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_to_oci() {
        assert_eq!(normalize_arch_to_oci("aarch64"), "arm64");
        assert_eq!(normalize_arch_to_oci("arm64"), "arm64");
        assert_eq!(normalize_arch_to_oci("x86_64"), "amd64");
        assert_eq!(normalize_arch_to_oci("armv7l"), "arm");
        assert_eq!(normalize_arch_to_oci("i586"), "386");
        assert_eq!(normalize_arch_to_oci("powerpc64le"), "ppc64le");
        assert_eq!(normalize_arch_to_oci("mips64el"), "mips64le");
        assert_eq!(normalize_arch_to_oci("riscv64"), "riscv64");
        assert_eq!(normalize_arch_to_oci("sparc"), "sparc");
    }

    #[test]
    fn test_normalize_from_oci() {
        assert_eq!(normalize_arch_from_oci("arm64"), "aarch64");
        assert_eq!(normalize_arch_from_oci("amd64"), "x86_64");
        assert_eq!(normalize_arch_from_oci("386"), "i686");
        assert_eq!(normalize_arch_from_oci("riscv64"), "riscv64");
    }

    #[test]
    fn test_target_platform_defaults() {
        let p = TargetPlatform::new("aarch64").unwrap();
        assert_eq!(p.os, "linux");
        assert_eq!(p.architecture, "arm64");
        assert_eq!(p.variant, None);
        assert_eq!(p.package_arch, "aarch64");
        assert_eq!(p.to_string(), "linux/arm64");
    }

    #[test]
    fn test_target_platform_arm_variant() {
        let p = TargetPlatform::new("armv7a").unwrap();
        assert_eq!(p.architecture, "arm");
        assert_eq!(p.variant.as_deref(), Some("v7"));
        assert_eq!(p.to_string(), "linux/arm/v7");
    }

    #[test]
    fn test_target_platform_overrides() {
        let p = TargetPlatform::with_overrides("x86_64", None, Some("core2-64"), "linux").unwrap();
        assert_eq!(p.architecture, "amd64");
        assert_eq!(p.package_arch, "core2-64");
    }

    #[test]
    fn test_target_platform_rejects_unknown_and_empty() {
        assert!(TargetPlatform::new("").is_err());
        assert!(TargetPlatform::new("sparc").is_err());
    }

    #[test]
    fn test_target_platform_matches() {
        let p = TargetPlatform::new("aarch64").unwrap();
        assert!(p.matches("arm64", None));
        assert!(p.matches("aarch64", None));
        assert!(!p.matches("amd64", None));

        let arm = TargetPlatform::new("armv7l").unwrap();
        assert!(arm.matches("arm", Some("v7")));
        assert!(!arm.matches("arm", Some("v6")));
    }
}

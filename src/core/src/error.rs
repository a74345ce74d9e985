use thiserror::Error;

/// A3S OCI error types
#[derive(Error, Debug)]
pub enum OciError {
    /// Malformed build configuration, raised before any I/O
    #[error("Configuration error: {message}")]
    ConfigError {
        message: String,
        hint: Option<String>,
    },

    /// A base image or per-platform OCI directory could not be located
    #[error("Resolution error: {target} not found (searched: {})", .searched.join(", "))]
    ResolutionError { target: String, searched: Vec<String> },

    /// Package installation failed for a reason other than unresolved dependencies
    #[error("Install error: {0}")]
    InstallError(String),

    /// Layer cache failure
    #[error("Cache error: {0}")]
    CacheError(String),

    /// The image could not be assembled
    #[error("Assembly error: {0}")]
    AssemblyError(String),

    /// Multi-architecture merge failed
    #[error("Index merge error: {0}")]
    IndexMergeError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl OciError {
    /// Shorthand for a configuration error without a hint.
    pub fn config(message: impl Into<String>) -> Self {
        OciError::ConfigError {
            message: message.into(),
            hint: None,
        }
    }

    /// Shorthand for a configuration error carrying a corrective instruction.
    pub fn config_with_hint(message: impl Into<String>, hint: impl Into<String>) -> Self {
        OciError::ConfigError {
            message: message.into(),
            hint: Some(hint.into()),
        }
    }

    /// Corrective instruction attached to the error, if any.
    pub fn hint(&self) -> Option<&str> {
        match self {
            OciError::ConfigError { hint, .. } => hint.as_deref(),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for OciError {
    fn from(err: serde_json::Error) -> Self {
        OciError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for OciError {
    fn from(err: serde_yaml::Error) -> Self {
        OciError::SerializationError(err.to_string())
    }
}

/// Result type alias for A3S OCI operations
pub type Result<T> = std::result::Result<T, OciError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let error = OciError::config("unknown layer kind 'bogus'");
        assert_eq!(
            error.to_string(),
            "Configuration error: unknown layer kind 'bogus'"
        );
        assert!(error.hint().is_none());
    }

    #[test]
    fn test_config_error_with_hint() {
        let error = OciError::config_with_hint("remote base image", "pre-fetch it first");
        assert_eq!(error.to_string(), "Configuration error: remote base image");
        assert_eq!(error.hint(), Some("pre-fetch it first"));
    }

    #[test]
    fn test_resolution_error_lists_searched() {
        let error = OciError::ResolutionError {
            target: "base-image".to_string(),
            searched: vec!["/a/base-image-oci".to_string(), "/a/base-image".to_string()],
        };
        assert_eq!(
            error.to_string(),
            "Resolution error: base-image not found (searched: /a/base-image-oci, /a/base-image)"
        );
    }

    #[test]
    fn test_install_error_display() {
        let error = OciError::InstallError("package database corrupt".to_string());
        assert_eq!(error.to_string(), "Install error: package database corrupt");
    }

    #[test]
    fn test_cache_error_display() {
        let error = OciError::CacheError("disk full".to_string());
        assert_eq!(error.to_string(), "Cache error: disk full");
    }

    #[test]
    fn test_assembly_error_display() {
        let error = OciError::AssemblyError("image has no layers".to_string());
        assert_eq!(error.to_string(), "Assembly error: image has no layers");
    }

    #[test]
    fn test_index_merge_error_display() {
        let error = OciError::IndexMergeError("no manifests collected".to_string());
        assert_eq!(error.to_string(), "Index merge error: no manifests collected");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let error: OciError = io_error.into();
        assert!(matches!(error, OciError::IoError(_)));
        assert!(error.to_string().contains("file not found"));
    }

    #[test]
    fn test_serde_json_error_conversion() {
        let result: std::result::Result<serde_json::Value, _> = serde_json::from_str("{ nope }");
        let error: OciError = result.unwrap_err().into();
        assert!(matches!(error, OciError::SerializationError(_)));
    }

    #[test]
    fn test_serde_yaml_error_conversion() {
        let result: std::result::Result<serde_yaml::Value, _> =
            serde_yaml::from_str("invalid: yaml: content:");
        let error: OciError = result.unwrap_err().into();
        assert!(matches!(error, OciError::SerializationError(_)));
    }

    #[test]
    fn test_other_error_display() {
        let error = OciError::Other("something else".to_string());
        assert_eq!(error.to_string(), "something else");
    }
}

//! Degraded results.
//!
//! Operations that can succeed while something went wrong along the way
//! (an unresolved package, an unusable cache entry, a skipped platform)
//! return an [`Outcome`] so the caller decides whether the accumulated
//! warnings should escalate.

use serde::Serialize;
use std::fmt;

/// Category of a non-fatal condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    /// A package dependency could not be resolved during an attempt-only install.
    Installation,
    /// A cache read or write failed; the build continued without it.
    CacheDegradation,
    /// A per-platform OCI directory listed no manifests and was skipped.
    EmptyPlatform,
    /// A per-platform OCI directory listed more than one manifest; only the first is used.
    ExtraManifests,
    /// Part of the configuration has no effect in the selected mode.
    IgnoredConfig,
}

impl fmt::Display for WarningKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WarningKind::Installation => "installation",
            WarningKind::CacheDegradation => "cache",
            WarningKind::EmptyPlatform => "empty-platform",
            WarningKind::ExtraManifests => "extra-manifests",
            WarningKind::IgnoredConfig => "ignored-config",
        };
        f.write_str(s)
    }
}

/// A non-fatal condition raised during a build step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Warning {
    pub kind: WarningKind,
    pub message: String,
}

impl Warning {
    /// Create a warning and emit it through `tracing` at the point it is raised.
    pub fn new(kind: WarningKind, message: impl Into<String>) -> Self {
        let message = message.into();
        tracing::warn!(kind = %kind, "{}", message);
        Self { kind, message }
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

/// A value together with the warnings accumulated while producing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome<T> {
    pub value: T,
    pub warnings: Vec<Warning>,
}

impl<T> Outcome<T> {
    /// A clean result.
    pub fn ok(value: T) -> Self {
        Self {
            value,
            warnings: Vec::new(),
        }
    }

    pub fn with_warnings(value: T, warnings: Vec<Warning>) -> Self {
        Self { value, warnings }
    }

    pub fn push(&mut self, warning: Warning) {
        self.warnings.push(warning);
    }

    /// Move this outcome's warnings into `sink` and return the bare value.
    pub fn drain_into(self, sink: &mut Vec<Warning>) -> T {
        sink.extend(self.warnings);
        self.value
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        Outcome {
            value: f(self.value),
            warnings: self.warnings,
        }
    }

    pub fn count(&self, kind: WarningKind) -> usize {
        self.warnings.iter().filter(|w| w.kind == kind).count()
    }

    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_ok_is_clean() {
        let outcome = Outcome::ok(7);
        assert!(outcome.is_clean());
        assert_eq!(outcome.value, 7);
    }

    #[test]
    fn test_outcome_drain_into() {
        let mut outcome = Outcome::ok("layer");
        outcome.push(Warning::new(WarningKind::Installation, "libfoo unresolved"));
        outcome.push(Warning::new(WarningKind::CacheDegradation, "store failed"));

        let mut sink = Vec::new();
        let value = outcome.drain_into(&mut sink);
        assert_eq!(value, "layer");
        assert_eq!(sink.len(), 2);
        assert_eq!(sink[0].kind, WarningKind::Installation);
    }

    #[test]
    fn test_outcome_count_by_kind() {
        let outcome = Outcome::with_warnings(
            (),
            vec![
                Warning::new(WarningKind::Installation, "a"),
                Warning::new(WarningKind::Installation, "b"),
                Warning::new(WarningKind::EmptyPlatform, "c"),
            ],
        );
        assert_eq!(outcome.count(WarningKind::Installation), 2);
        assert_eq!(outcome.count(WarningKind::CacheDegradation), 0);
    }

    #[test]
    fn test_outcome_map_keeps_warnings() {
        let outcome = Outcome::with_warnings(2, vec![Warning::new(WarningKind::IgnoredConfig, "x")]);
        let mapped = outcome.map(|v| v * 10);
        assert_eq!(mapped.value, 20);
        assert_eq!(mapped.warnings.len(), 1);
    }

    #[test]
    fn test_warning_display() {
        let warning = Warning::new(WarningKind::EmptyPlatform, "aarch64 has no manifests");
        assert_eq!(warning.to_string(), "[empty-platform] aarch64 has no manifests");
    }
}

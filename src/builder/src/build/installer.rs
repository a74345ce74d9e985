//! Package installer capability.
//!
//! The builder never implements a package manager. `packages` layers are
//! populated through a [`PackageInstaller`], which installs a package set
//! into a root in attempt-only mode: dependencies it cannot resolve are
//! reported as warnings, expected to be provided by a layer stacked above.

use std::path::Path;
use std::process::Command;

use a3s_oci_core::config::InstallerConfig;
use a3s_oci_core::error::{OciError, Result};
use a3s_oci_core::outcome::{Outcome, Warning, WarningKind};

/// Installs package sets into a layer root.
pub trait PackageInstaller {
    /// Resolved `name version` strings for `packages`; they feed the cache key.
    fn resolve_versions(&self, packages: &[String]) -> Result<Vec<String>>;

    /// Install `packages` into `root`. With `attempt_only`, unresolved
    /// dependencies are returned as warnings instead of failing.
    fn install(&self, root: &Path, packages: &[String], attempt_only: bool) -> Result<Outcome<()>>;
}

/// Runs an external installer program.
///
/// `{root}` and `{packages}` in the configured arguments are substituted;
/// `{packages}` expands to one argument per package.
#[derive(Debug, Clone)]
pub struct CommandInstaller {
    config: InstallerConfig,
}

impl CommandInstaller {
    pub fn new(config: InstallerConfig) -> Result<Self> {
        if config.program.trim().is_empty() {
            return Err(OciError::config_with_hint(
                "installer program is not set",
                "set installer.program in the build description",
            ));
        }
        Ok(Self { config })
    }

    fn expand_args(args: &[String], root: Option<&Path>, packages: &[String]) -> Vec<String> {
        let mut out = Vec::new();
        for arg in args {
            if arg == "{packages}" {
                out.extend(packages.iter().cloned());
                continue;
            }
            let mut arg = arg.replace("{packages}", &packages.join(" "));
            if let Some(root) = root {
                arg = arg.replace("{root}", &root.display().to_string());
            }
            out.push(arg);
        }
        out
    }

    /// Lines of installer output that name an unresolved dependency.
    fn unresolved_lines<'a>(&self, output: &'a str) -> Vec<&'a str> {
        let patterns: Vec<String> = self
            .config
            .unresolved_patterns
            .iter()
            .map(|p| p.to_lowercase())
            .collect();
        output
            .lines()
            .filter(|line| {
                let lower = line.to_lowercase();
                patterns.iter().any(|p| lower.contains(p.as_str()))
            })
            .collect()
    }

    /// Lines that look like failures not explained by unresolved dependencies.
    fn other_errors<'a>(&self, output: &'a str) -> Vec<&'a str> {
        let unresolved = self.unresolved_lines(output);
        output
            .lines()
            .filter(|line| {
                let lower = line.to_lowercase();
                (lower.contains("error") || lower.contains("fatal")) && !unresolved.contains(line)
            })
            .collect()
    }
}

impl PackageInstaller for CommandInstaller {
    fn resolve_versions(&self, packages: &[String]) -> Result<Vec<String>> {
        let Some(ref program) = self.config.query_program else {
            return Ok(Vec::new());
        };

        let args = Self::expand_args(&self.config.query_args, None, packages);
        let output = Command::new(program).args(&args).output().map_err(|e| {
            OciError::InstallError(format!("failed to run {}: {}", program, e))
        })?;
        if !output.status.success() {
            return Err(OciError::InstallError(format!(
                "{} exited with {}: {}",
                program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut versions: Vec<String> = stdout
            .lines()
            .filter_map(|line| {
                let mut parts = line.split_whitespace();
                match (parts.next(), parts.next()) {
                    (Some(name), Some(version)) => Some(format!("{} {}", name, version)),
                    _ => None,
                }
            })
            .collect();
        versions.sort();
        Ok(versions)
    }

    fn install(&self, root: &Path, packages: &[String], attempt_only: bool) -> Result<Outcome<()>> {
        let args = Self::expand_args(&self.config.args, Some(root), packages);
        tracing::info!(
            program = %self.config.program,
            root = %root.display(),
            packages = packages.len(),
            attempt_only,
            "Installing packages"
        );

        let output = Command::new(&self.config.program)
            .args(&args)
            .output()
            .map_err(|e| {
                OciError::InstallError(format!("failed to run {}: {}", self.config.program, e))
            })?;

        let combined = format!(
            "{}\n{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        let unresolved = self.unresolved_lines(&combined);

        if !output.status.success() {
            let explained = attempt_only
                && !unresolved.is_empty()
                && self.other_errors(&combined).is_empty();
            if !explained {
                return Err(OciError::InstallError(format!(
                    "{} exited with {}: {}",
                    self.config.program,
                    output.status,
                    combined.trim()
                )));
            }
        }

        if !attempt_only && !unresolved.is_empty() {
            return Err(OciError::InstallError(format!(
                "unresolved dependencies: {}",
                unresolved.join("; ")
            )));
        }

        let warnings = unresolved
            .iter()
            .map(|line| Warning::new(WarningKind::Installation, line.trim().to_string()))
            .collect();
        Ok(Outcome::with_warnings((), warnings))
    }
}

/// Fail when a layer accumulated more unresolved dependencies than allowed.
pub fn check_unresolved_budget(
    layer: &str,
    outcome: &Outcome<()>,
    max_unresolved: Option<usize>,
) -> Result<()> {
    let Some(max) = max_unresolved else {
        return Ok(());
    };
    let count = outcome.count(WarningKind::Installation);
    if count > max {
        return Err(OciError::InstallError(format!(
            "layer '{}' has {} unresolved dependencies (limit {})",
            layer, count, max
        )));
    }
    Ok(())
}

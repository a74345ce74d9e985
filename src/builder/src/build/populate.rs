//! Layer content population.
//!
//! Materializes one layer's filesystem root in a scratch directory. Hashing
//! and caching happen elsewhere.

use std::collections::VecDeque;
use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

use a3s_oci_core::error::{OciError, Result};
use a3s_oci_core::layer::{LayerKind, LayerSpec};
use a3s_oci_core::outcome::Outcome;

use super::installer::{check_unresolved_budget, PackageInstaller};
use crate::cache::layer_cache::copy_entry;

/// What a layer can be populated from.
pub struct PopulateContext<'a> {
    /// Fully built source rootfs, for `directories` and `files` layers.
    pub source_rootfs: Option<&'a Path>,
    /// Installer, for `packages` layers.
    pub installer: Option<&'a dyn PackageInstaller>,
    /// Unresolved dependencies tolerated per layer.
    pub max_unresolved: Option<usize>,
}

/// Populate `scratch` with the content of `spec`.
pub fn populate_layer(spec: &LayerSpec, scratch: &Path, ctx: &PopulateContext<'_>) -> Result<Outcome<()>> {
    std::fs::create_dir_all(scratch)?;
    tracing::info!(layer = %spec.name, kind = %spec.kind, items = spec.items.len(), "Populating layer");

    match spec.kind {
        LayerKind::Packages => {
            let installer = ctx.installer.ok_or_else(|| {
                OciError::config_with_hint(
                    format!("layer '{}' installs packages but no installer is configured", spec.name),
                    "configure installer.program in the build description",
                )
            })?;
            let outcome = installer.install(scratch, &spec.items, true)?;
            check_unresolved_budget(&spec.name, &outcome, ctx.max_unresolved)?;
            Ok(outcome)
        }
        LayerKind::Directories | LayerKind::Files => {
            let rootfs = ctx.source_rootfs.ok_or_else(|| {
                OciError::config(format!(
                    "layer '{}' copies from the source rootfs but none is configured",
                    spec.name
                ))
            })?;
            for item in &spec.items {
                copy_item(spec, rootfs, scratch, item)?;
            }
            Ok(Outcome::ok(()))
        }
    }
}

/// Path of `item` relative to a root, rejecting `..` escapes.
fn relative_item(item: &str) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in Path::new(item).components() {
        match component {
            Component::RootDir | Component::CurDir => {}
            Component::Normal(c) => out.push(c),
            Component::ParentDir | Component::Prefix(_) => return None,
        }
    }
    if out.as_os_str().is_empty() {
        None
    } else {
        Some(out)
    }
}

/// An item located inside the source rootfs, with its symlinks resolved
/// against the rootfs rather than the build host.
#[derive(Debug, PartialEq, Eq)]
struct ResolvedItem {
    /// Symlinks crossed on the way, relative to the rootfs.
    links: Vec<PathBuf>,
    /// Location of the item itself, relative to the rootfs.
    real: PathBuf,
}

const MAX_LINK_HOPS: usize = 40;

fn link_parts(path: &Path) -> VecDeque<OsString> {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(p) => Some(p.to_os_string()),
            Component::ParentDir => Some(OsString::from("..")),
            _ => None,
        })
        .collect()
}

/// Walk `relative` one component at a time as if `rootfs` were `/`.
///
/// Absolute link targets restart at the rootfs; a target that climbs above
/// it is refused. The final component is only followed with `follow_last`.
fn resolve_in_rootfs(
    rootfs: &Path,
    relative: &Path,
    follow_last: bool,
) -> std::result::Result<ResolvedItem, String> {
    let mut pending = link_parts(relative);
    let mut real = PathBuf::new();
    let mut links = Vec::new();

    while let Some(part) = pending.pop_front() {
        if part == ".." {
            if !real.pop() {
                return Err("symlink target escapes the source rootfs".to_string());
            }
            continue;
        }

        let candidate = real.join(&part);
        let host = rootfs.join(&candidate);
        let is_link = std::fs::symlink_metadata(&host)
            .map(|m| m.file_type().is_symlink())
            .unwrap_or(false);
        if !is_link || (pending.is_empty() && !follow_last) {
            real = candidate;
            continue;
        }

        if links.len() >= MAX_LINK_HOPS {
            return Err("too many levels of symlinks".to_string());
        }
        let target = std::fs::read_link(&host).map_err(|e| e.to_string())?;
        if target.has_root() {
            real = PathBuf::new();
        }
        let mut next = link_parts(&target);
        next.extend(pending.drain(..));
        pending = next;
        links.push(candidate);
    }

    Ok(ResolvedItem { links, real })
}

fn copy_item(spec: &LayerSpec, rootfs: &Path, scratch: &Path, item: &str) -> Result<()> {
    let relative = relative_item(item).ok_or_else(|| {
        OciError::config(format!("layer '{}': invalid path '{}'", spec.name, item))
    })?;

    // A directory reached through a symlink is copied from its target; a
    // file that is itself a symlink is kept as the link.
    let follow_last = matches!(spec.kind, LayerKind::Directories);
    let resolved = resolve_in_rootfs(rootfs, &relative, follow_last).map_err(|reason| {
        OciError::AssemblyError(format!("layer '{}': {}: {}", spec.name, item, reason))
    })?;
    if resolved.real.as_os_str().is_empty() {
        return Err(OciError::AssemblyError(format!(
            "layer '{}': {} resolves to the rootfs root",
            spec.name, item
        )));
    }

    let meta = std::fs::symlink_metadata(rootfs.join(&resolved.real)).map_err(|_| {
        OciError::AssemblyError(format!(
            "layer '{}': {} not found in source rootfs {}",
            spec.name,
            item,
            rootfs.display()
        ))
    })?;

    match spec.kind {
        LayerKind::Directories if !meta.is_dir() => {
            return Err(OciError::AssemblyError(format!(
                "layer '{}': {} is not a directory",
                spec.name, item
            )));
        }
        LayerKind::Files if meta.is_dir() => {
            return Err(OciError::AssemblyError(format!(
                "layer '{}': {} is a directory; use a directories layer",
                spec.name, item
            )));
        }
        _ => {}
    }

    for link in &resolved.links {
        place(rootfs, scratch, link)?;
    }
    place(rootfs, scratch, &resolved.real)?;
    tracing::debug!(
        layer = %spec.name,
        item = %item,
        links = resolved.links.len(),
        "Copied into layer"
    );
    Ok(())
}

/// Copy the entry at `relative` from the rootfs into the same place in `scratch`.
fn place(rootfs: &Path, scratch: &Path, relative: &Path) -> Result<()> {
    if let Some(parent) = relative.parent() {
        create_parents(rootfs, scratch, parent)?;
    }
    copy_entry(&rootfs.join(relative), &scratch.join(relative))
}

/// Create the parent directories of an item, carrying their modes over
/// from the source rootfs.
fn create_parents(rootfs: &Path, scratch: &Path, parent: &Path) -> Result<()> {
    let mut current = PathBuf::new();
    for component in parent.components() {
        current.push(component);
        let dst = scratch.join(&current);
        match std::fs::symlink_metadata(&dst) {
            Ok(meta) if meta.is_dir() => continue,
            Ok(_) => {
                return Err(OciError::AssemblyError(format!(
                    "{} already exists in the layer and is not a directory",
                    current.display()
                )));
            }
            Err(_) => {}
        }
        std::fs::create_dir(&dst)?;
        if let Ok(meta) = std::fs::symlink_metadata(rootfs.join(&current)) {
            if meta.is_dir() {
                std::fs::set_permissions(&dst, meta.permissions())?;
            }
        }
    }
    Ok(())
}

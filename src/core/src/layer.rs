//! Layer declaration parser.
//!
//! A layer is declared as `name:kind:content`. Only the first two `:` split
//! the declaration; `content` may contain further colons and is split into
//! items on [`ITEM_DELIMITER`]:
//!
//! ```text
//! base:packages:base-files+busybox+netbase
//! app:directories:/opt/app+/etc/app
//! ```
//!
//! Parsing is pure. Every malformed declaration is rejected here, before
//! the build touches the filesystem.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{OciError, Result};
use crate::outcome::{Outcome, Warning, WarningKind};

/// Separator between items inside a declaration's content.
pub const ITEM_DELIMITER: char = '+';

/// How a layer's filesystem root is populated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerKind {
    /// Install the named packages with the target's package manager.
    Packages,
    /// Copy the named directories out of the source rootfs.
    Directories,
    /// Copy the named files out of the source rootfs.
    Files,
}

impl LayerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LayerKind::Packages => "packages",
            LayerKind::Directories => "directories",
            LayerKind::Files => "files",
        }
    }

    /// Whether items are paths inside the source rootfs.
    pub fn copies_from_rootfs(&self) -> bool {
        matches!(self, LayerKind::Directories | LayerKind::Files)
    }
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LayerKind {
    type Err = OciError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "packages" => Ok(LayerKind::Packages),
            "directories" => Ok(LayerKind::Directories),
            "files" => Ok(LayerKind::Files),
            other => Err(OciError::config_with_hint(
                format!("unknown layer kind '{}'", other),
                "expected one of: packages, directories, files",
            )),
        }
    }
}

/// Whether the image is one rootfs layer or an explicit list of layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerMode {
    /// The whole source rootfs becomes one layer (on top of any base layers).
    #[default]
    Single,
    /// The declared layers, in declaration order.
    Multi,
}

impl fmt::Display for LayerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayerMode::Single => f.write_str("single"),
            LayerMode::Multi => f.write_str("multi"),
        }
    }
}

/// A validated layer declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerSpec {
    pub name: String,
    pub kind: LayerKind,
    /// Items in declaration order.
    pub items: Vec<String>,
}

impl LayerSpec {
    /// Items sorted and deduplicated, as they enter the cache key.
    pub fn normalized_items(&self) -> Vec<String> {
        let mut items = self.items.clone();
        items.sort();
        items.dedup();
        items
    }
}

impl fmt::Display for LayerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.name,
            self.kind,
            self.items.join(&ITEM_DELIMITER.to_string())
        )
    }
}

fn is_valid_layer_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

/// Parse one `name:kind:content` declaration.
pub fn parse_layer(decl: &str) -> Result<LayerSpec> {
    let mut parts = decl.splitn(3, ':');
    let (name, kind, content) = match (parts.next(), parts.next(), parts.next()) {
        (Some(name), Some(kind), Some(content)) => (name.trim(), kind.trim(), content),
        _ => {
            return Err(OciError::config_with_hint(
                format!("malformed layer declaration '{}'", decl),
                "expected name:kind:content",
            ))
        }
    };

    if !is_valid_layer_name(name) {
        return Err(OciError::config_with_hint(
            format!("invalid layer name '{}' in '{}'", name, decl),
            "layer names may only contain letters, digits, '.', '_' and '-'",
        ));
    }

    let kind: LayerKind = kind.parse()?;

    let items: Vec<String> = content
        .split(ITEM_DELIMITER)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect();

    if items.is_empty() {
        return Err(OciError::config(format!(
            "layer '{}' declares no {}",
            name, kind
        )));
    }

    if kind.copies_from_rootfs() {
        if let Some(relative) = items.iter().find(|i| !i.starts_with('/')) {
            return Err(OciError::config_with_hint(
                format!("layer '{}': path '{}' is not absolute", name, relative),
                "directories and files items are absolute paths inside the source rootfs",
            ));
        }
    }

    Ok(LayerSpec {
        name: name.to_string(),
        kind,
        items,
    })
}

/// Parse the ordered declaration list for the given mode.
///
/// In single mode declarations have no effect; they are reported as a warning
/// and an empty list is returned. In multi mode at least one layer is required
/// and names must be unique.
pub fn parse_layers<S: AsRef<str>>(decls: &[S], mode: LayerMode) -> Result<Outcome<Vec<LayerSpec>>> {
    if mode == LayerMode::Single {
        let mut outcome = Outcome::ok(Vec::new());
        if !decls.is_empty() {
            outcome.push(Warning::new(
                WarningKind::IgnoredConfig,
                format!(
                    "{} layer declaration(s) ignored in single-layer mode",
                    decls.len()
                ),
            ));
        }
        return Ok(outcome);
    }

    if decls.is_empty() {
        return Err(OciError::config_with_hint(
            "multi-layer mode requires at least one layer declaration",
            "add entries to 'layers' or use mode: single",
        ));
    }

    let mut seen = HashSet::new();
    let mut layers = Vec::with_capacity(decls.len());
    for decl in decls {
        let spec = parse_layer(decl.as_ref())?;
        if !seen.insert(spec.name.clone()) {
            return Err(OciError::config(format!(
                "duplicate layer name '{}'",
                spec.name
            )));
        }
        layers.push(spec);
    }

    Ok(Outcome::ok(layers))
}

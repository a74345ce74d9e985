//! Integration tests: end-to-end image builds.
//!
//! Packages come from a directory-backed feed installer that records every
//! install, so cache hits and repopulation are observable without a real
//! package manager. Nothing here needs network access or root.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use a3s_oci_builder::oci::layout::{read_index, Manifest};
use a3s_oci_builder::{build, BlobStore, BuildConfig, BuildResult, DeployDirLocator, PackageInstaller};
use a3s_oci_core::outcome::{Outcome, Warning, WarningKind};
use a3s_oci_core::{ImageSpecFile, LayerMode, OciError, Result};
use tempfile::TempDir;

/// Installs packages by copying `<feed>/<package>/files/` into the root.
///
/// A package missing from the feed is reported the way an attempt-only
/// install reports an unresolved dependency.
struct FeedInstaller {
    feed: PathBuf,
    installs: RefCell<Vec<Vec<String>>>,
}

impl FeedInstaller {
    fn new(feed: &Path) -> Self {
        Self {
            feed: feed.to_path_buf(),
            installs: RefCell::new(Vec::new()),
        }
    }

    fn add_package(&self, name: &str, version: &str) {
        let files = self.feed.join(name).join("files/usr/bin");
        std::fs::create_dir_all(&files).unwrap();
        std::fs::write(files.join(name), format!("{} {}", name, version)).unwrap();
        std::fs::write(self.feed.join(name).join("version"), version).unwrap();
    }

    fn install_count(&self) -> usize {
        self.installs.borrow().len()
    }
}

impl PackageInstaller for FeedInstaller {
    fn resolve_versions(&self, packages: &[String]) -> Result<Vec<String>> {
        Ok(packages
            .iter()
            .filter_map(|p| {
                std::fs::read_to_string(self.feed.join(p).join("version"))
                    .ok()
                    .map(|v| format!("{} {}", p, v.trim()))
            })
            .collect())
    }

    fn install(&self, root: &Path, packages: &[String], _attempt_only: bool) -> Result<Outcome<()>> {
        self.installs.borrow_mut().push(packages.to_vec());
        let mut outcome = Outcome::ok(());
        for package in packages {
            let files = self.feed.join(package).join("files");
            if files.is_dir() {
                copy_tree(&files, root);
            } else {
                outcome.push(Warning::new(
                    WarningKind::Installation,
                    format!("nothing provides {}", package),
                ));
            }
        }
        Ok(outcome)
    }
}

fn copy_tree(src: &Path, dst: &Path) {
    std::fs::create_dir_all(dst).unwrap();
    for entry in std::fs::read_dir(src).unwrap() {
        let entry = entry.unwrap();
        let target = dst.join(entry.file_name());
        if entry.file_type().unwrap().is_dir() {
            copy_tree(&entry.path(), &target);
        } else {
            std::fs::copy(entry.path(), &target).unwrap();
        }
    }
}

struct Workspace {
    tmp: TempDir,
    installer: FeedInstaller,
}

impl Workspace {
    fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let installer = FeedInstaller::new(&tmp.path().join("feed"));
        installer.add_package("busybox", "1.36.1-r0");
        installer.add_package("netbase", "6.4-r0");
        installer.add_package("iproute2", "6.7.0-r0");

        let rootfs = tmp.path().join("rootfs");
        std::fs::create_dir_all(rootfs.join("opt/app")).unwrap();
        std::fs::write(rootfs.join("opt/app/run"), "#!/bin/sh\n").unwrap();
        std::fs::create_dir_all(rootfs.join("etc")).unwrap();
        std::fs::write(rootfs.join("etc/app.conf"), "port=8080\n").unwrap();

        Self { tmp, installer }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.tmp.path().join(name)
    }

    fn spec(&self, layers: &[&str]) -> ImageSpecFile {
        let mut spec = ImageSpecFile::default();
        spec.name = "app".to_string();
        spec.mode = LayerMode::Multi;
        spec.layers = layers.iter().map(|s| s.to_string()).collect();
        spec.rootfs = Some(self.path("rootfs"));
        spec.output = Some(self.path("out"));
        spec.platform.arch = "aarch64".to_string();
        spec.cache.dir = Some(self.path("cache"));
        spec.search_dirs = vec![self.path("deploy")];
        spec
    }

    fn build(&self, spec: &ImageSpecFile) -> Outcome<BuildResult> {
        let locator = DeployDirLocator::new(spec.search_dirs.clone(), None);
        let config = BuildConfig::from_spec(spec, &locator).unwrap().value;
        build(&config, Some(&self.installer)).unwrap()
    }
}

fn manifest_layers(result: &BuildResult) -> Vec<String> {
    let store = BlobStore::open(&result.output).unwrap();
    let manifest: Manifest =
        serde_json::from_slice(&store.read(&result.manifest_digest).unwrap()).unwrap();
    manifest.layers.into_iter().map(|l| l.digest).collect()
}

const LAYERS: &[&str] = &[
    "base:packages:busybox",
    "net:packages:netbase",
    "app:directories:/opt/app",
    "conf:files:/etc/app.conf",
];

#[test]
fn test_rebuild_is_idempotent_and_fully_cached() {
    let ws = Workspace::new();
    let spec = ws.spec(LAYERS);

    let first = ws.build(&spec).value;
    assert_eq!(ws.installer.install_count(), 2);
    assert!(first.layers.iter().all(|l| !l.from_cache));

    let second = ws.build(&spec).value;
    assert_eq!(ws.installer.install_count(), 2, "no layer repopulated");
    assert!(second.layers.iter().all(|l| l.from_cache));

    assert_eq!(first.manifest_digest, second.manifest_digest);
    assert_eq!(manifest_layers(&first), manifest_layers(&second));
    assert_eq!(read_index(&ws.path("out")).unwrap().manifests.len(), 1);
}

#[test]
fn test_changed_packages_layer_repopulates_only_itself() {
    let ws = Workspace::new();
    let first = ws.build(&ws.spec(LAYERS)).value;
    assert_eq!(ws.installer.install_count(), 2);

    let changed = ws.spec(&[
        "base:packages:busybox",
        "net:packages:netbase+iproute2",
        "app:directories:/opt/app",
        "conf:files:/etc/app.conf",
    ]);
    let second = ws.build(&changed).value;

    let installs = ws.installer.installs.borrow();
    assert_eq!(installs.len(), 3);
    assert_eq!(installs[2], vec!["netbase", "iproute2"]);

    let hits: Vec<bool> = second.layers.iter().map(|l| l.from_cache).collect();
    assert_eq!(hits, vec![true, false, true, true]);
    assert_eq!(first.layers[0].digest, second.layers[0].digest);
    assert_ne!(first.layers[1].digest, second.layers[1].digest);
}

#[test]
fn test_version_change_invalidates_layer() {
    let ws = Workspace::new();
    ws.build(&ws.spec(LAYERS));
    ws.installer.add_package("busybox", "1.36.1-r1");

    let second = ws.build(&ws.spec(LAYERS)).value;
    assert_eq!(ws.installer.install_count(), 3);
    assert!(!second.layers[0].from_cache);
    assert!(second.layers[1].from_cache);
}

#[test]
fn test_manifest_follows_declaration_order() {
    let ws = Workspace::new();
    let forward = ws.build(&ws.spec(LAYERS)).value;
    let by_name: BTreeMap<String, String> = forward
        .layers
        .iter()
        .map(|l| (l.name.clone(), l.digest.clone()))
        .collect();
    assert_eq!(
        manifest_layers(&forward),
        forward.layers.iter().map(|l| l.digest.clone()).collect::<Vec<_>>()
    );

    let permuted = [LAYERS[3], LAYERS[1], LAYERS[0], LAYERS[2]];
    let mut spec = ws.spec(&permuted);
    spec.output = Some(ws.path("out-permuted"));
    let reordered = ws.build(&spec).value;

    let expected: Vec<String> = ["conf", "net", "base", "app"]
        .iter()
        .map(|n| by_name[*n].clone())
        .collect();
    assert_eq!(manifest_layers(&reordered), expected);
}

#[test]
fn test_unresolved_dependency_is_a_warning() {
    let ws = Workspace::new();
    let spec = ws.spec(&["base:packages:busybox+libmissing", "app:directories:/opt/app"]);

    let outcome = ws.build(&spec);
    assert_eq!(outcome.count(WarningKind::Installation), 1);
    assert_eq!(outcome.value.layers.len(), 2);
}

#[test]
fn test_unknown_layer_kind_has_no_side_effects() {
    let ws = Workspace::new();
    let spec = ws.spec(&["x:bogus:y"]);
    let locator = DeployDirLocator::new(spec.search_dirs.clone(), None);

    let err = BuildConfig::from_spec(&spec, &locator).unwrap_err();
    assert!(matches!(err, OciError::ConfigError { .. }));
    assert!(!ws.path("out").exists());
    assert!(!ws.path("cache").exists());
    assert_eq!(ws.installer.install_count(), 0);
}

#[test]
fn test_remote_base_image_is_rejected() {
    let ws = Workspace::new();
    let mut spec = ws.spec(LAYERS);
    spec.base_image = "docker.io/library/alpine:3.19".to_string();
    let locator = DeployDirLocator::new(spec.search_dirs.clone(), None);

    let err = BuildConfig::from_spec(&spec, &locator).unwrap_err();
    assert!(matches!(err, OciError::ConfigError { .. }));
    assert!(err.hint().unwrap().contains("pre-fetch"));
    assert!(!ws.path("out").exists());
}

#[test]
fn test_base_image_layers_come_first() {
    let ws = Workspace::new();

    let mut base_spec = ws.spec(&[]);
    base_spec.name = "base".to_string();
    base_spec.mode = LayerMode::Single;
    base_spec.output = Some(ws.path("deploy").join("base-oci"));
    base_spec.image.env.insert("PATH".to_string(), "/usr/bin:/bin".to_string());
    let base = ws.build(&base_spec).value;

    let mut app_spec = ws.spec(&["app:directories:/opt/app"]);
    app_spec.base_image = "base".to_string();
    app_spec.image.entrypoint = Some(vec!["/opt/app/run".to_string()]);
    let app = ws.build(&app_spec).value;

    let layers = manifest_layers(&app);
    assert_eq!(layers.len(), 2);
    assert_eq!(layers[0], base.layers[0].digest);
    assert!(app.layers[0].base);
    assert_eq!(app.layers[1].name, "app");

    let config = a3s_oci_builder::build::read_image_config(&app.output, &app.manifest_digest).unwrap();
    assert_eq!(config.config.env, vec!["PATH=/usr/bin:/bin"]);
    assert_eq!(config.config.entrypoint, Some(vec!["/opt/app/run".to_string()]));
    assert_eq!(config.rootfs.diff_ids.len(), 2);
}

#[test]
fn test_missing_base_image_lists_searched_locations() {
    let ws = Workspace::new();
    let mut spec = ws.spec(LAYERS);
    spec.base_image = "nowhere".to_string();
    let locator = DeployDirLocator::new(spec.search_dirs.clone(), Some("qemuarm64".to_string()));

    match BuildConfig::from_spec(&spec, &locator).unwrap_err() {
        OciError::ResolutionError { searched, .. } => assert_eq!(searched.len(), 3),
        other => panic!("unexpected error: {other}"),
    }
}

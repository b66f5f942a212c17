//! Image relocation
//!
//! Copies every container image a manifest references into a target registry
//! and rewrites the manifest to point at the relocated, digest-pinned copies.
//!
//! Destination names are flat: the source registry host is dropped and the
//! remaining path segments are joined with `-`, so `gcr.io/knative/serving`
//! relocated to `registry.local` becomes `registry.local/knative-serving`.
//!
//! A manifest is only modified once every image has been copied. If any copy
//! fails, the manifest is left exactly as it was.

mod registry;

pub use registry::{without_digest, CraneRegistry, RegistryClient};
#[cfg(test)]
pub use registry::MockRegistryClient;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, trace};

use crate::crd::{BundleResource, Manifest};
use crate::fetch::{resolve_content, ContentReader};
use crate::scan::list_images;
use crate::Error;

/// Source image reference to relocated reference
pub type RelocationMap = BTreeMap<String, String>;

/// Relocates images referenced by a manifest into a target registry
pub struct RelocationEngine {
    registry: Arc<dyn RegistryClient>,
    reader: Arc<dyn ContentReader>,
    base_dir: PathBuf,
}

impl RelocationEngine {
    /// Create an engine
    ///
    /// `reader` and `base_dir` embed the content of resources that only carry
    /// a locator, so the rewritten content can be stored.
    pub fn new(
        registry: Arc<dyn RegistryClient>,
        reader: Arc<dyn ContentReader>,
        base_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            registry,
            reader,
            base_dir: base_dir.into(),
        }
    }

    /// Relocate every image of `manifest` to `target_registry`.
    ///
    /// An empty registry is a no-op.
    pub async fn relocate(&self, manifest: &mut Manifest, target_registry: &str) -> Result<(), Error> {
        let target = target_registry.trim();
        if target.is_empty() {
            debug!("No target registry, skipping image relocation");
            return Ok(());
        }

        let mut resources = manifest.spec.resources.clone();
        self.embed_content(&mut resources).await?;

        let mut images = Vec::new();
        for resource in &resources {
            if let Some(content) = resource.inline_content() {
                images.extend(list_images(content)?);
            }
        }

        let map = self.copy_images(&images, target).await?;
        rewrite_images(&mut resources, &map)?;

        manifest.spec.resources = resources;
        info!(registry = %target, images = map.len(), "Relocated images");
        Ok(())
    }

    async fn embed_content(&self, resources: &mut [BundleResource]) -> Result<(), Error> {
        for resource in resources.iter_mut() {
            if resource.inline_content().is_none() && resource.locator().is_some() {
                let content = resolve_content(self.reader.as_ref(), resource, &self.base_dir).await?;
                resource.content = Some(content);
            }
        }
        Ok(())
    }

    /// Copy each distinct image once, in first-seen order
    async fn copy_images(&self, images: &[String], target: &str) -> Result<RelocationMap, Error> {
        let mut map = RelocationMap::new();
        for image in images {
            if map.contains_key(image) {
                continue;
            }
            let to = destination(image, target);
            let relocated = self
                .registry
                .relocate(image, &to)
                .await
                .map_err(|e| Error::Relocation {
                    image: image.clone(),
                    message: e.to_string(),
                })?;
            trace!(from = %image, to = %relocated, "Image relocated");
            map.insert(image.clone(), relocated);
        }
        Ok(map)
    }
}

/// Apply a relocation mapping file to `manifest`, if the file exists.
///
/// Returns whether a mapping was applied.
pub async fn relocate_from_mapping_file(manifest: &mut Manifest, path: &Path) -> Result<bool, Error> {
    if !tokio::fs::try_exists(path).await? {
        trace!(path = %path.display(), "No relocation mapping present");
        return Ok(false);
    }

    let bytes = tokio::fs::read(path).await.map_err(|e| {
        Error::fetch(format!(
            "failed to read relocation mapping from {}: {}",
            path.display(),
            e
        ))
    })?;
    let map: RelocationMap = serde_json::from_slice(&bytes).map_err(|e| {
        Error::serialization(format!("failed to unmarshal relocation mapping: {}", e))
    })?;

    rewrite_images(&mut manifest.spec.resources, &map)?;
    info!(path = %path.display(), images = map.len(), "Applied relocation mapping");
    Ok(true)
}

/// Registry host of an image reference, if it names one
fn registry_host(image: &str) -> Option<&str> {
    let (first, _) = image.split_once('/')?;
    (first.contains('.') || first.contains(':') || first == "localhost").then_some(first)
}

/// Destination of `image` under `target_registry`.
///
/// The source registry host is dropped, remaining `/` become `-`, and any tag
/// or digest is kept.
pub fn destination(image: &str, target_registry: &str) -> String {
    let path = match registry_host(image) {
        Some(host) => &image[host.len() + 1..],
        None => image,
    };
    format!(
        "{}/{}",
        target_registry.trim_end_matches('/'),
        path.replace('/', "-")
    )
}

/// Replace every mapped image in each resource's content.
///
/// Content is scanned once from the left. At each position the longest
/// mapped reference wins, so `foo/bar:1.0` is never rewritten through a
/// shorter `foo/bar` entry, and replaced text is never scanned again.
pub fn rewrite_images(resources: &mut [BundleResource], map: &RelocationMap) -> Result<(), Error> {
    if map.contains_key("") {
        return Err(Error::validation(
            "relocation mapping contains an empty image reference",
        ));
    }
    if map.is_empty() {
        return Ok(());
    }

    let mut patterns: Vec<(&str, &str)> =
        map.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
    patterns.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

    for resource in resources.iter_mut() {
        if let Some(content) = resource.content.as_mut() {
            *content = replace_longest(content, &patterns);
        }
    }
    Ok(())
}

/// Single left-to-right pass; `patterns` must be sorted longest first
fn replace_longest(content: &str, patterns: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(content.len());
    let mut rest = content;

    while let Some(ch) = rest.chars().next() {
        match patterns.iter().find(|(from, _)| rest.starts_with(from)) {
            Some((from, to)) => {
                trace!(from = %from, to = %to, "Replacing image reference");
                out.push_str(to);
                rest = &rest[from.len()..];
            }
            None => {
                out.push(ch);
                rest = &rest[ch.len_utf8()..];
            }
        }
    }
    out
}

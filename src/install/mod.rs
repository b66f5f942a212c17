//! Bundle installation
//!
//! This module drives one installation end to end:
//!
//! 1. Patch the manifest (identity labels, NodePort rewrite, name)
//! 2. Relocate images to the target registry, or apply a mounted mapping
//! 3. Ensure the Manifest CRD exists
//! 4. Record the installation as a Manifest object, refusing duplicates
//! 5. Apply every non-deferred resource in order, waiting for its checks
//!
//! Steps run strictly in sequence and the first failure aborts the run.
//! Nothing is rolled back; a failed installation is removed with the
//! uninstaller.
//!
//! # Example
//!
//! ```ignore
//! use kab::install::Installer;
//!
//! let installer = Installer::new(config, cluster, resources, patcher, relocation);
//! let mut manifest = Manifest::from_path("/cnab/app/kab/manifest.yaml").await?;
//! installer.run(&mut manifest, Some("registry.local")).await?;
//! ```

use std::sync::Arc;

use kube::ResourceExt;
use tracing::{debug, info};

use crate::config::InstallerConfig;
use crate::crd::Manifest;
use crate::kube_client::{find_manifest, manifest_namespace, ClusterClient};
use crate::patch::ManifestPatcher;
use crate::relocate::{relocate_from_mapping_file, RelocationEngine};
use crate::resource::ResourceManager;
use crate::retry::{retry_with_backoff, BackoffError};
use crate::Error;

/// The bundle installer
pub struct Installer {
    config: InstallerConfig,
    cluster: Arc<dyn ClusterClient>,
    resources: ResourceManager,
    patcher: ManifestPatcher,
    relocation: RelocationEngine,
}

impl Installer {
    /// Create a new installer from its collaborators
    pub fn new(
        config: InstallerConfig,
        cluster: Arc<dyn ClusterClient>,
        resources: ResourceManager,
        patcher: ManifestPatcher,
        relocation: RelocationEngine,
    ) -> Self {
        Self {
            config,
            cluster,
            resources,
            patcher,
            relocation,
        }
    }

    /// Run the complete pipeline: patch, relocate, install.
    ///
    /// Without a target registry, a relocation mapping file is applied when
    /// one is mounted at the configured location.
    pub async fn run(&self, manifest: &mut Manifest, target_registry: Option<&str>) -> Result<(), Error> {
        self.patcher
            .patch_manifest(manifest)
            .await
            .map_err(|e| e.context("could not patch manifest"))?;

        match target_registry.map(str::trim).filter(|r| !r.is_empty()) {
            Some(registry) => self
                .relocation
                .relocate(manifest, registry)
                .await
                .map_err(|e| e.context("could not relocate images"))?,
            None => {
                relocate_from_mapping_file(manifest, &self.config.relocation_mapping)
                    .await
                    .map_err(|e| e.context("could not apply relocation mapping"))?;
            }
        }

        self.install(manifest).await
    }

    /// Install a patched manifest.
    ///
    /// Fails with [`Error::AlreadyInstalled`] (behind phase context) when a
    /// non-empty manifest with the same name already exists.
    pub async fn install(&self, manifest: &mut Manifest) -> Result<(), Error> {
        self.cluster
            .ensure_manifest_crd()
            .await
            .map_err(|e| e.context("could not create manifest CRD"))?;

        if manifest.namespace().map_or(true, |ns| ns.is_empty()) {
            manifest.metadata.namespace = Some(manifest_namespace(manifest));
        }

        self.create_manifest_object(manifest)
            .await
            .map_err(|e| e.context("could not install"))?;

        info!(name = %manifest.name_any(), "Installing bundle components");
        for resource in &manifest.spec.resources {
            if resource.deferred {
                debug!(resource = %resource.name, "Skipping deferred resource");
                continue;
            }
            self.resources
                .install(resource)
                .await
                .map_err(|e| e.context("could not install"))?;
            self.resources
                .check(resource)
                .await
                .map_err(|e| e.context("could not install"))?;
        }

        info!(name = %manifest.name_any(), "Bundle installed");
        Ok(())
    }

    /// Store the manifest, treating a non-empty one with the same name in any
    /// namespace as a conflict.
    ///
    /// Retryable lookup and create failures are transient. An existing empty
    /// manifest does not count as an installation and is replaced.
    async fn create_manifest_object(&self, manifest: &Manifest) -> Result<(), Error> {
        let name = manifest.name_any();
        debug!(name = %name, namespace = %manifest_namespace(manifest), "Creating manifest object");

        let cluster = self.cluster.as_ref();
        let name = name.as_str();

        let result = retry_with_backoff(&self.config.backoff, "create_manifest", || async move {
            match find_manifest(cluster, name).await {
                Err(e) => return transient("looking up manifest", e),
                Ok(Some(existing)) if !existing.is_empty() => {
                    return Err(Error::AlreadyInstalled(name.to_string()));
                }
                Ok(Some(existing)) => {
                    let namespace = manifest_namespace(&existing);
                    debug!(name = %name, namespace = %namespace, "Replacing empty manifest");
                    if let Err(e) = cluster.delete_manifest(&namespace, name).await {
                        return transient("replacing empty manifest", e);
                    }
                }
                Ok(None) => {}
            }

            match cluster.create_manifest(manifest).await {
                Ok(()) => Ok(Some(())),
                Err(e) => transient("creating manifest", e),
            }
        })
        .await;

        match result {
            Ok(()) => Ok(()),
            Err(BackoffError::Aborted(e)) => Err(e),
            Err(BackoffError::Exhausted { .. }) => Err(Error::ManifestCreateTimeout(name.to_string())),
        }
    }
}

/// Retry a retryable failure, abort on anything else
fn transient(action: &str, err: Error) -> Result<Option<()>, Error> {
    if !err.is_retryable() {
        return Err(err);
    }
    debug!(error = %err, "Error {}, retrying", action);
    Ok(None)
}

//! Manifest patching
//!
//! Before anything is applied, every resource is labeled with the
//! installation identity (plus its own labels) and, on clusters without a
//! load balancer, `LoadBalancer` services are rewritten to `NodePort`.
//!
//! Labels go first: the label injector re-serializes content, and the
//! `NodePort` rewrite is a literal substitution that relies on the injector's
//! output format.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use kube::ResourceExt;
#[cfg(test)]
use mockall::automock;
use serde_json::json;
use tracing::{debug, info, trace};

use crate::crd::{BundleResource, Manifest};
use crate::fetch::{resolve_content, ContentReader};
use crate::kube_client::ClusterClient;
use crate::kubectl::KubectlCli;
use crate::{Error, LABEL_KEY_NAME};

/// Node name that identifies a minikube cluster
pub const MINIKUBE_NODE_NAME: &str = "minikube";

/// Node name that identifies a Docker Desktop cluster
pub const DOCKER_FOR_DESKTOP_NODE_NAME: &str = "docker-for-desktop";

const LOAD_BALANCER_TYPE: &str = "type: LoadBalancer";
const NODE_PORT_TYPE: &str = "type: NodePort";

/// Inputs that shape how a manifest is patched
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PatchConfig {
    /// Installation name; overrides the manifest name when set
    pub installation_name: Option<String>,
    /// Rewrite `LoadBalancer` services to `NodePort`
    pub node_port: bool,
}

impl PatchConfig {
    /// The configured installation name, if non-empty
    pub fn installation_name(&self) -> Option<&str> {
        self.installation_name.as_deref().filter(|n| !n.is_empty())
    }
}

/// Trait for injecting labels into every object of a resource definition
#[cfg_attr(test, automock)]
#[async_trait]
pub trait LabelInjector: Send + Sync {
    /// Return `content` with `labels` applied to all of its objects
    async fn apply_labels(
        &self,
        content: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<String, Error>;
}

/// Label injector that renders a kustomization with `commonLabels`
pub struct KustomizeLabeler {
    kubectl: KubectlCli,
}

impl KustomizeLabeler {
    /// Create a labeler that runs `kubectl kustomize` through `kubectl`
    pub fn new(kubectl: KubectlCli) -> Self {
        Self { kubectl }
    }
}

/// The kustomization document applying `labels` to `resource_file`
pub fn kustomization_yaml(
    resource_file: &str,
    labels: &BTreeMap<String, String>,
) -> Result<String, Error> {
    let kustomization = json!({
        "apiVersion": "kustomize.config.k8s.io/v1beta1",
        "kind": "Kustomization",
        "commonLabels": labels,
        "resources": [resource_file],
    });
    serde_yaml::to_string(&kustomization)
        .map_err(|e| Error::serialization(format!("failed to render kustomization: {}", e)))
}

#[async_trait]
impl LabelInjector for KustomizeLabeler {
    async fn apply_labels(
        &self,
        content: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<String, Error> {
        let dir = tempfile::tempdir()?;
        let resource_file = "resource.yaml";

        tokio::fs::write(dir.path().join(resource_file), content).await?;
        tokio::fs::write(
            dir.path().join("kustomization.yaml"),
            kustomization_yaml(resource_file, labels)?,
        )
        .await?;

        self.kubectl.kustomize(dir.path()).await
    }
}

/// Applies labels, environment rewrites and the installation name
pub struct ManifestPatcher {
    config: PatchConfig,
    labeler: Arc<dyn LabelInjector>,
    reader: Arc<dyn ContentReader>,
    base_dir: PathBuf,
}

impl ManifestPatcher {
    /// Create a patcher
    ///
    /// `reader` and `base_dir` resolve resources that only carry a locator.
    pub fn new(
        config: PatchConfig,
        labeler: Arc<dyn LabelInjector>,
        reader: Arc<dyn ContentReader>,
        base_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            config,
            labeler,
            reader,
            base_dir: base_dir.into(),
        }
    }

    /// Patch every resource of `manifest` in place.
    pub async fn patch_manifest(&self, manifest: &mut Manifest) -> Result<(), Error> {
        let identity = self.identity(manifest);

        for resource in manifest.spec.resources.iter_mut() {
            self.apply_labels(resource, &identity).await.map_err(|e| {
                e.context(format!("failed to label resource {}", resource.name))
            })?;
        }

        if self.config.node_port {
            for resource in manifest.spec.resources.iter_mut() {
                patch_for_local_cluster(resource);
            }
        }

        self.set_name(manifest);
        Ok(())
    }

    /// Value of the identity label: the installation name, or the manifest's
    /// own name when none is configured.
    fn identity(&self, manifest: &Manifest) -> String {
        self.config
            .installation_name()
            .map(str::to_string)
            .unwrap_or_else(|| manifest.name_any())
    }

    async fn apply_labels(&self, resource: &mut BundleResource, identity: &str) -> Result<(), Error> {
        add_identity_label(&mut resource.labels, identity);
        trace!(resource = %resource.name, labels = ?resource.labels, "Applying labels");

        let content = resolve_content(self.reader.as_ref(), resource, &self.base_dir).await?;
        let labeled = self.labeler.apply_labels(&content, &resource.labels).await?;
        resource.content = Some(labeled);
        Ok(())
    }

    fn set_name(&self, manifest: &mut Manifest) {
        if let Some(name) = self.config.installation_name() {
            debug!(name = %name, "Assigning installation name to manifest");
            manifest.metadata.name = Some(name.to_string());
        }
    }
}

/// Merge the identity label into `labels`, keeping every existing entry
pub fn add_identity_label(labels: &mut BTreeMap<String, String>, identity: &str) {
    labels.insert(LABEL_KEY_NAME.to_string(), identity.to_string());
}

/// Replace every `type: LoadBalancer` with `type: NodePort`
pub fn patch_for_local_cluster(resource: &mut BundleResource) {
    if let Some(content) = resource.content.as_mut() {
        if content.contains(LOAD_BALANCER_TYPE) {
            trace!(resource = %resource.name, "Rewriting LoadBalancer services to NodePort");
            *content = content.replace(LOAD_BALANCER_TYPE, NODE_PORT_TYPE);
        }
    }
}

/// Whether the cluster is a local development cluster without load balancers
pub async fn detect_local_cluster<C: ClusterClient + ?Sized>(cluster: &C) -> Result<bool, Error> {
    for node in [MINIKUBE_NODE_NAME, DOCKER_FOR_DESKTOP_NODE_NAME] {
        if cluster.node_exists(node).await? {
            info!(node = %node, "Local cluster detected, exposing services as NodePort");
            return Ok(true);
        }
    }
    Ok(false)
}

/// Whether to rewrite `LoadBalancer` services: set explicitly by the flag,
/// otherwise decided by looking for a local cluster.
///
/// A failed node lookup fails the installation.
pub async fn resolve_node_port<C: ClusterClient + ?Sized>(
    flag: Option<&str>,
    cluster: &C,
) -> Result<bool, Error> {
    if parse_node_port(flag)? {
        return Ok(true);
    }
    detect_local_cluster(cluster)
        .await
        .map_err(|e| e.context("could not detect local cluster"))
}

/// Parse the node-port flag; unset or empty means false
pub fn parse_node_port(value: Option<&str>) -> Result<bool, Error> {
    match value.map(str::trim) {
        None | Some("") => Ok(false),
        Some("1" | "t" | "T" | "true" | "TRUE" | "True") => Ok(true),
        Some("0" | "f" | "F" | "false" | "FALSE" | "False") => Ok(false),
        Some(other) => Err(Error::validation(format!(
            "invalid NODE_PORT value '{}', expected a boolean",
            other
        ))),
    }
}

//! Installation removal
//!
//! The stored Manifest is the only record of what an installation created.
//! Uninstalling finds it (in whichever namespace it lives), deletes every
//! object of the kinds it declares that carries the installation's identity
//! label, and finally deletes the Manifest itself.

use std::collections::BTreeSet;
use std::sync::Arc;

use kube::ResourceExt;
use tracing::{debug, info};

use crate::crd::Manifest;
use crate::kube_client::{find_manifest, manifest_namespace, ClusterClient};
use crate::kubectl::Kubectl;
use crate::scan::list_kinds;
use crate::{Error, LABEL_KEY_NAME};

/// Removes a named installation from the cluster
pub struct Uninstaller {
    cluster: Arc<dyn ClusterClient>,
    kubectl: Arc<dyn Kubectl>,
}

impl Uninstaller {
    /// Create an uninstaller
    pub fn new(cluster: Arc<dyn ClusterClient>, kubectl: Arc<dyn Kubectl>) -> Self {
        Self { cluster, kubectl }
    }

    /// Find the manifest named `name` in any namespace.
    ///
    /// See [`find_manifest`]; a missing installation is
    /// [`Error::ManifestNotFound`].
    pub async fn lookup_manifest(&self, name: &str) -> Result<Manifest, Error> {
        find_manifest(self.cluster.as_ref(), name)
            .await?
            .ok_or_else(|| Error::ManifestNotFound(name.to_string()))
    }

    /// Delete everything the installation `name` created, then its manifest.
    pub async fn uninstall(&self, name: &str) -> Result<(), Error> {
        let manifest = self
            .lookup_manifest(name)
            .await
            .map_err(|e| e.context("unable to lookup manifest"))?;

        let kinds = declared_kinds(&manifest)?;
        info!(name = %name, "Uninstalling");

        if kinds.is_empty() {
            debug!(name = %name, "Manifest declares no kinds, nothing to delete");
        } else {
            let kinds = kinds.into_iter().collect::<Vec<_>>().join(",");
            let selector = format!("{}={}", LABEL_KEY_NAME, name);
            debug!(kinds = %kinds, selector = %selector, "Deleting installed objects");

            let output = self
                .kubectl
                .delete(&kinds, &selector)
                .await
                .map_err(uninstall_error)?;
            debug!(output = %output, "kubectl delete finished");
        }

        info!(name = %name, "Uninstalling bundle manifest from cluster");
        self.cluster
            .delete_manifest(&manifest_namespace(&manifest), &manifest.name_any())
            .await
            .map_err(|e| Error::ManifestDelete(e.to_string()))
    }
}

/// Distinct kinds declared across every resource's content
fn declared_kinds(manifest: &Manifest) -> Result<BTreeSet<String>, Error> {
    let mut kinds = BTreeSet::new();
    for resource in &manifest.spec.resources {
        if let Some(content) = resource.inline_content() {
            kinds.extend(list_kinds(content)?);
        }
    }
    Ok(kinds)
}

fn uninstall_error(err: Error) -> Error {
    match err {
        Error::CommandFailed { command, message } => Error::Uninstall {
            message: format!("{} exited unsuccessfully", command),
            output: message,
        },
        other => Error::Uninstall {
            message: other.to_string(),
            output: String::new(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{BundleResource, ManifestSpec};
    use crate::kube_client::{MockClusterClient, NamespacePage};
    use crate::kubectl::MockKubectl;
    use mockall::predicate::*;

    fn page(names: &[&str], continue_token: Option<&str>) -> NamespacePage {
        NamespacePage {
            names: names.iter().map(|n| n.to_string()).collect(),
            continue_token: continue_token.map(str::to_string),
        }
    }

    fn stored_manifest() -> Manifest {
        let resources = vec![
            BundleResource {
                name: "istio".to_string(),
                content: Some(
                    "kind: Namespace\nmetadata:\n  name: istio-system\n---\nkind: Service\n"
                        .to_string(),
                ),
                ..Default::default()
            },
            BundleResource {
                name: "riff".to_string(),
                content: Some("kind: Deployment\n---\nkind: Service\n".to_string()),
                ..Default::default()
            },
        ];
        Manifest::new("my-riff", ManifestSpec { resources })
    }

    fn uninstaller(cluster: MockClusterClient, kubectl: MockKubectl) -> Uninstaller {
        Uninstaller::new(Arc::new(cluster), Arc::new(kubectl))
    }

    // ==========================================================================
    // Story: finding an installation across namespaces
    // ==========================================================================

    /// With three namespaces and the manifest in the second, the scan stops
    /// after two reads and reports the second namespace.
    #[tokio::test]
    async fn story_lookup_stops_at_first_hit() {
        let mut cluster = MockClusterClient::new();
        cluster
            .expect_list_namespaces()
            .times(1)
            .returning(|_| Ok(page(&["default", "riff-system", "kube-system"], None)));
        cluster
            .expect_get_manifest()
            .with(eq("default"), eq("my-riff"))
            .times(1)
            .returning(|_, _| Ok(None));
        cluster
            .expect_get_manifest()
            .with(eq("riff-system"), eq("my-riff"))
            .times(1)
            .returning(|_, _| Ok(Some(stored_manifest())));
        cluster
            .expect_get_manifest()
            .with(eq("kube-system"), always())
            .never();

        let manifest = uninstaller(cluster, MockKubectl::new())
            .lookup_manifest("my-riff")
            .await
            .unwrap();
        assert_eq!(manifest.namespace().as_deref(), Some("riff-system"));
    }

    #[tokio::test]
    async fn lookup_follows_continue_tokens() {
        let mut cluster = MockClusterClient::new();
        cluster
            .expect_list_namespaces()
            .with(eq(None::<String>))
            .times(1)
            .returning(|_| Ok(page(&["default"], Some("next"))));
        cluster
            .expect_list_namespaces()
            .with(eq(Some("next".to_string())))
            .times(1)
            .returning(|_| Ok(page(&["riff-system"], None)));
        cluster
            .expect_get_manifest()
            .with(eq("default"), always())
            .returning(|_, _| Ok(None));
        cluster
            .expect_get_manifest()
            .with(eq("riff-system"), always())
            .returning(|_, _| Ok(Some(stored_manifest())));

        let manifest = uninstaller(cluster, MockKubectl::new())
            .lookup_manifest("my-riff")
            .await
            .unwrap();
        assert_eq!(manifest.namespace().as_deref(), Some("riff-system"));
    }

    #[tokio::test]
    async fn lookup_reports_missing_installation() {
        let mut cluster = MockClusterClient::new();
        cluster
            .expect_list_namespaces()
            .returning(|_| Ok(page(&["default", "kube-system"], None)));
        cluster.expect_get_manifest().times(2).returning(|_, _| Ok(None));

        let err = uninstaller(cluster, MockKubectl::new())
            .lookup_manifest("my-riff")
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "could not find manifest for installation name: my-riff"
        );
    }

    #[tokio::test]
    async fn lookup_aborts_on_read_errors() {
        let mut cluster = MockClusterClient::new();
        cluster
            .expect_list_namespaces()
            .returning(|_| Ok(page(&["default", "riff-system"], None)));
        cluster
            .expect_get_manifest()
            .times(1)
            .returning(|_, _| Err(Error::fetch("apiserver unavailable")));

        let err = uninstaller(cluster, MockKubectl::new())
            .lookup_manifest("my-riff")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Fetch(_)));
    }

    // ==========================================================================
    // Story: removing an installation
    // ==========================================================================

    fn cluster_with_stored_manifest() -> MockClusterClient {
        let mut cluster = MockClusterClient::new();
        cluster
            .expect_list_namespaces()
            .returning(|_| Ok(page(&["riff-system"], None)));
        cluster
            .expect_get_manifest()
            .returning(|_, _| Ok(Some(stored_manifest())));
        cluster
    }

    #[tokio::test]
    async fn story_uninstall_deletes_labeled_objects_then_manifest() {
        let mut cluster = cluster_with_stored_manifest();
        cluster
            .expect_delete_manifest()
            .with(eq("riff-system"), eq("my-riff"))
            .times(1)
            .returning(|_, _| Ok(()));

        let mut kubectl = MockKubectl::new();
        kubectl
            .expect_delete()
            .with(
                eq("Deployment,Namespace,Service"),
                eq("cnab-k8s-installer-installation-name=my-riff"),
            )
            .times(1)
            .returning(|_, _| Ok("deleted".to_string()));

        uninstaller(cluster, kubectl).uninstall("my-riff").await.unwrap();
    }

    #[tokio::test]
    async fn failed_delete_keeps_the_manifest() {
        let mut cluster = cluster_with_stored_manifest();
        cluster.expect_delete_manifest().never();

        let mut kubectl = MockKubectl::new();
        kubectl.expect_delete().returning(|_, _| {
            Err(Error::command_failed(
                "kubectl delete",
                "error: the server doesn't have a resource type \"Foo\"",
            ))
        });

        let err = uninstaller(cluster, kubectl)
            .uninstall("my-riff")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Uninstall { ref output, .. } if output.contains("resource type")));
        assert!(err.to_string().starts_with("error while uninstalling"));
    }

    #[tokio::test]
    async fn manifest_delete_failure_is_reported() {
        let mut cluster = cluster_with_stored_manifest();
        cluster
            .expect_delete_manifest()
            .returning(|_, _| Err(Error::fetch("apiserver unavailable")));

        let mut kubectl = MockKubectl::new();
        kubectl.expect_delete().returning(|_, _| Ok(String::new()));

        let err = uninstaller(cluster, kubectl)
            .uninstall("my-riff")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ManifestDelete(_)));
    }

    #[tokio::test]
    async fn manifest_without_kinds_skips_kubectl() {
        let mut cluster = MockClusterClient::new();
        cluster
            .expect_list_namespaces()
            .returning(|_| Ok(page(&["default"], None)));
        cluster
            .expect_get_manifest()
            .returning(|_, _| Ok(Some(Manifest::new("my-riff", ManifestSpec::default()))));
        cluster
            .expect_delete_manifest()
            .with(eq("default"), eq("my-riff"))
            .times(1)
            .returning(|_, _| Ok(()));

        let mut kubectl = MockKubectl::new();
        kubectl.expect_delete().never();

        uninstaller(cluster, kubectl).uninstall("my-riff").await.unwrap();
    }
}

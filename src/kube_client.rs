//! Kubernetes API access
//!
//! Everything the installer reads from or writes to the cluster object store
//! goes through [`ClusterClient`], so the orchestration logic can be tested
//! against mocks while production uses kube-rs.

use std::path::Path;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, Node, Pod};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config, CustomResourceExt, ResourceExt};
#[cfg(test)]
use mockall::automock;
use tracing::{debug, info, trace};

use crate::crd::Manifest;
use crate::{Error, DEFAULT_NAMESPACE};

/// Number of namespaces fetched per list call during manifest lookup
pub const NAMESPACE_PAGE_SIZE: u32 = 50;

/// One page of namespace names
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NamespacePage {
    /// Namespace names in server order
    pub names: Vec<String>,
    /// Token for the next page, if there is one
    pub continue_token: Option<String>,
}

/// Trait abstracting Kubernetes object store operations
///
/// This trait allows mocking the Kubernetes client in tests while using
/// the real client in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Create the Manifest CRD; an existing CRD counts as success
    async fn ensure_manifest_crd(&self) -> Result<(), Error>;

    /// Read a manifest; `Ok(None)` when it does not exist
    async fn get_manifest(&self, namespace: &str, name: &str) -> Result<Option<Manifest>, Error>;

    /// Create a manifest in its namespace
    async fn create_manifest(&self, manifest: &Manifest) -> Result<(), Error>;

    /// Delete a manifest
    async fn delete_manifest(&self, namespace: &str, name: &str) -> Result<(), Error>;

    /// List one page of namespaces, starting at `continue_token`
    async fn list_namespaces(&self, continue_token: Option<String>)
        -> Result<NamespacePage, Error>;

    /// List pods matching a label selector; `None` searches all namespaces
    async fn list_pods(&self, namespace: Option<String>, selector: &str)
        -> Result<Vec<Pod>, Error>;

    /// Whether a node with the given name exists
    async fn node_exists(&self, name: &str) -> Result<bool, Error>;
}

/// Namespace a manifest is stored in
pub fn manifest_namespace(manifest: &Manifest) -> String {
    manifest
        .namespace()
        .filter(|ns| !ns.is_empty())
        .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string())
}

/// Find the manifest named `name` in any namespace.
///
/// Manifest names are unique across the cluster. Namespaces are listed one
/// page at a time and the scan stops at the first hit, whose namespace is
/// recorded on the returned manifest.
pub async fn find_manifest(
    cluster: &dyn ClusterClient,
    name: &str,
) -> Result<Option<Manifest>, Error> {
    let mut continue_token = None;

    loop {
        let page = cluster.list_namespaces(continue_token.take()).await?;

        for namespace in &page.names {
            match cluster.get_manifest(namespace, name).await {
                Ok(Some(mut manifest)) => {
                    debug!(name = %name, namespace = %namespace, "Found manifest");
                    manifest.metadata.namespace = Some(namespace.clone());
                    return Ok(Some(manifest));
                }
                Ok(None) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }

        match page.continue_token {
            Some(token) => continue_token = Some(token),
            None => return Ok(None),
        }
    }
}

/// Create a kube client from an optional kubeconfig path
///
/// Without a path the configuration is inferred (in-cluster service account,
/// then `KUBECONFIG`/`~/.kube/config`).
pub async fn create_client(kubeconfig: Option<&Path>) -> Result<Client, Error> {
    let config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path)
                .map_err(|e| Error::config(format!("failed to read kubeconfig: {}", e)))?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| Error::config(format!("failed to load kubeconfig: {}", e)))?
        }
        None => Config::infer()
            .await
            .map_err(|e| Error::config(format!("failed to infer config: {}", e)))?,
    };
    Client::try_from(config).map_err(|e| Error::config(format!("failed to create client: {}", e)))
}

/// Real Kubernetes client implementation
pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    /// Create a new KubeClusterClient wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn manifests(&self, namespace: &str) -> Api<Manifest> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn ensure_manifest_crd(&self) -> Result<(), Error> {
        let crds: Api<CustomResourceDefinition> = Api::all(self.client.clone());
        trace!("Creating Manifest CRD");

        match crds.create(&PostParams::default(), &Manifest::crd()).await {
            Ok(_) => {
                info!("Manifest CRD created");
                Ok(())
            }
            Err(kube::Error::Api(resp)) if resp.code == 409 => {
                trace!("Manifest CRD already existed");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get_manifest(&self, namespace: &str, name: &str) -> Result<Option<Manifest>, Error> {
        Ok(self.manifests(namespace).get_opt(name).await?)
    }

    async fn create_manifest(&self, manifest: &Manifest) -> Result<(), Error> {
        let namespace = manifest_namespace(manifest);
        self.manifests(&namespace)
            .create(&PostParams::default(), manifest)
            .await?;
        debug!(name = %manifest.name_any(), namespace = %namespace, "Created manifest object");
        Ok(())
    }

    async fn delete_manifest(&self, namespace: &str, name: &str) -> Result<(), Error> {
        self.manifests(namespace)
            .delete(name, &DeleteParams::default())
            .await?;
        Ok(())
    }

    async fn list_namespaces(
        &self,
        continue_token: Option<String>,
    ) -> Result<NamespacePage, Error> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let mut params = ListParams::default().limit(NAMESPACE_PAGE_SIZE);
        if let Some(token) = continue_token {
            params = params.continue_token(&token);
        }

        let list = api.list(&params).await?;
        Ok(NamespacePage {
            names: list.items.iter().map(|ns| ns.name_any()).collect(),
            continue_token: list.metadata.continue_.filter(|t| !t.is_empty()),
        })
    }

    async fn list_pods(
        &self,
        namespace: Option<String>,
        selector: &str,
    ) -> Result<Vec<Pod>, Error> {
        let api: Api<Pod> = match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), &ns),
            None => Api::all(self.client.clone()),
        };
        let pods = api.list(&ListParams::default().labels(selector)).await?;
        Ok(pods.items)
    }

    async fn node_exists(&self, name: &str) -> Result<bool, Error> {
        let api: Api<Node> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?.is_some())
    }
}

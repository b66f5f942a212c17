//! Manifest Custom Resource Definition
//!
//! A Manifest is the stored record of one installation: the ordered list of
//! resources that were (or will be) applied, after label injection and image
//! relocation. It is the sole source of truth for a later uninstall.

use std::collections::BTreeMap;
use std::path::Path;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::Error;

/// Specification for a Manifest
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "projectriff.io",
    version = "v1alpha1",
    kind = "Manifest",
    plural = "manifests",
    singular = "manifest",
    namespaced,
    status = "ManifestStatus",
    derive = "PartialEq",
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ManifestSpec {
    /// Resources in install order
    #[serde(default)]
    pub resources: Vec<BundleResource>,
}

/// Status for a Manifest
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct ManifestStatus {
    /// Free-form installation status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// One deployable unit of a manifest
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BundleResource {
    /// Resource name, used in logs and errors
    #[serde(default)]
    pub name: String,

    /// Relative file path or URL of the resource definition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Inline resource definition; takes precedence over `path`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    /// Default namespace for the readiness checks of this resource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Labels injected into every object of the resource
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// Skip this resource during automatic installation
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deferred: bool,

    /// Readiness checks evaluated after apply, in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub checks: Vec<ResourceCheck>,
}

impl BundleResource {
    /// Inline content, if present and non-empty
    pub fn inline_content(&self) -> Option<&str> {
        self.content.as_deref().filter(|c| !c.is_empty())
    }

    /// Source locator, if present and non-empty
    pub fn locator(&self) -> Option<&str> {
        self.path.as_deref().filter(|p| !p.is_empty())
    }
}

/// A readiness assertion over live objects matching a selector
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceCheck {
    /// Kind of object to inspect (currently only `Pod`)
    pub kind: String,

    /// Namespace to search; falls back to the resource namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Objects to inspect
    #[serde(default)]
    pub selector: CheckSelector,

    /// Field to extract from each object, e.g. `{.status.phase}`
    #[serde(
        default,
        rename = "jsonpath",
        skip_serializing_if = "Option::is_none"
    )]
    pub json_path: Option<String>,

    /// Value every extracted field must equal, ignoring case
    #[serde(default)]
    pub pattern: String,
}

impl ResourceCheck {
    /// The selector rendered as a Kubernetes label selector string
    pub fn label_selector(&self) -> String {
        self.selector
            .match_labels
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Equality-based label selector
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CheckSelector {
    /// Every label must be present with exactly this value
    #[serde(default)]
    pub match_labels: BTreeMap<String, String>,
}

impl Manifest {
    /// Parse a manifest from YAML
    pub fn from_yaml(yaml: &str) -> Result<Self, Error> {
        serde_yaml::from_str(yaml)
            .map_err(|e| Error::serialization(format!("invalid manifest YAML: {}", e)))
    }

    /// Read and parse a manifest file
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let yaml = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::fetch(format!("error while reading from {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&yaml)
    }

    /// A manifest without resources does not count as an installation
    pub fn is_empty(&self) -> bool {
        self.spec.resources.is_empty()
    }
}

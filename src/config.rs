//! Installer configuration
//!
//! Everything the pipeline used to pick up from the process environment is
//! passed in explicitly through [`InstallerConfig`]; the binary fills it from
//! flags and environment variables.

use std::path::PathBuf;

use crate::patch::PatchConfig;
use crate::retry::{Backoff, DEFAULT_JITTER};

/// Directory that relative resource locators resolve against
pub const DEFAULT_BASE_DIR: &str = "/cnab/app/kab";

/// Default location of the manifest file inside the bundle
pub const DEFAULT_MANIFEST_FILE: &str = "/cnab/app/kab/manifest.yaml";

/// Where the bundle runtime mounts a pre-computed image relocation mapping
pub const DEFAULT_RELOCATION_MAPPING: &str = "/cnab/app/relocation-mapping.json";

/// Configuration for one installer invocation
#[derive(Clone, Debug, PartialEq)]
pub struct InstallerConfig {
    /// Installation name; becomes the manifest name and identity label value
    pub installation_name: Option<String>,
    /// Rewrite `LoadBalancer` services to `NodePort`
    pub node_port: bool,
    /// Registry to relocate images to; `None` or empty disables relocation
    pub target_registry: Option<String>,
    /// Base directory for relative resource locators
    pub base_dir: PathBuf,
    /// Relocation mapping file applied when no target registry is given
    pub relocation_mapping: PathBuf,
    /// Backoff for creating the manifest object and applying resources;
    /// jittered by default
    pub backoff: Backoff,
    /// Backoff for each readiness check
    pub check_backoff: Backoff,
}

impl Default for InstallerConfig {
    fn default() -> Self {
        Self {
            installation_name: None,
            node_port: false,
            target_registry: None,
            base_dir: PathBuf::from(DEFAULT_BASE_DIR),
            relocation_mapping: PathBuf::from(DEFAULT_RELOCATION_MAPPING),
            backoff: Backoff::default().with_jitter(DEFAULT_JITTER),
            check_backoff: Backoff::default(),
        }
    }
}

impl InstallerConfig {
    /// The patch settings derived from this configuration
    pub fn patch_config(&self) -> PatchConfig {
        PatchConfig {
            installation_name: self.installation_name.clone(),
            node_port: self.node_port,
        }
    }

    /// The target registry, if relocation is enabled
    pub fn target_registry(&self) -> Option<&str> {
        self.target_registry
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
    }
}

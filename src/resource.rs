//! Resource installation and readiness
//!
//! Each resource goes through two phases, both bounded by a [`Backoff`]:
//!
//! 1. **Apply** - the resolved content is piped to `kubectl apply`. Failures
//!    are retried, except a `forbidden` response, which no amount of retrying
//!    will fix.
//! 2. **Check** - every readiness check is polled with its own fresh backoff
//!    until it passes. Unknown check kinds fail immediately.
//!
//! [`Error::is_retryable`] decides which failures are worth another attempt.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::crd::{BundleResource, ResourceCheck};
use crate::fetch::{resolve_content, ContentReader};
use crate::kubectl::Kubectl;
use crate::readiness::ReadinessChecker;
use crate::retry::{retry_with_backoff, Backoff, BackoffError};
use crate::Error;

/// Printed when the cluster refuses an apply for lack of permissions
pub const FORBIDDEN_REMEDIATION: &str = "It looks like you don't have cluster-admin permissions.

To fix this you need to:
 1. Delete the current failed installation.
 2. Give the user account used for installation cluster-admin permissions, you can use the following command:
      kubectl create clusterrolebinding cluster-admin-binding \\
        --clusterrole=cluster-admin \\
        --user=<install-user>
 3. Re-install.";

/// Applies resources and waits for them to become ready
pub struct ResourceManager {
    kubectl: Arc<dyn Kubectl>,
    readiness: Arc<dyn ReadinessChecker>,
    reader: Arc<dyn ContentReader>,
    base_dir: PathBuf,
    backoff: Backoff,
    check_backoff: Backoff,
}

impl ResourceManager {
    /// Create a resource manager
    pub fn new(
        kubectl: Arc<dyn Kubectl>,
        readiness: Arc<dyn ReadinessChecker>,
        reader: Arc<dyn ContentReader>,
        base_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            kubectl,
            readiness,
            reader,
            base_dir: base_dir.into(),
            backoff: Backoff::default(),
            check_backoff: Backoff::default(),
        }
    }

    /// Use `backoff` for applies and `check_backoff` for each readiness check
    pub fn with_backoff(mut self, backoff: Backoff, check_backoff: Backoff) -> Self {
        self.backoff = backoff;
        self.check_backoff = check_backoff;
        self
    }

    /// Apply a resource, retrying transient failures.
    pub async fn install(&self, resource: &BundleResource) -> Result<(), Error> {
        info!(resource = %resource.name, "Installing resource");
        let content = resolve_content(self.reader.as_ref(), resource, &self.base_dir).await?;

        let kubectl = self.kubectl.as_ref();
        let name = resource.name.as_str();
        let content = content.as_str();

        let result = retry_with_backoff(&self.backoff, "apply_resource", || async move {
            match kubectl.apply(content).await {
                Ok(_) => Ok(Some(())),
                Err(e) => {
                    let err = classify_apply_error(name, e);
                    if matches!(err, Error::Forbidden { .. }) {
                        warn!("{}", FORBIDDEN_REMEDIATION);
                    }
                    if !err.is_retryable() {
                        return Err(err);
                    }
                    debug!(resource = %name, error = %err, "Retrying resource apply");
                    Ok(None)
                }
            }
        })
        .await;

        match result {
            Ok(()) => Ok(()),
            Err(BackoffError::Aborted(e)) => Err(e),
            Err(BackoffError::Exhausted { .. }) => Err(Error::ResourceNotCreated(name.to_string())),
        }
    }

    /// Wait for every check of a resource to pass, in order.
    pub async fn check(&self, resource: &BundleResource) -> Result<(), Error> {
        for check in &resource.checks {
            let check = effective_check(check, resource);
            self.wait_for(&check, &resource.name).await?;
        }
        info!(resource = %resource.name, "Done installing resource");
        Ok(())
    }

    async fn wait_for(&self, check: &ResourceCheck, resource_name: &str) -> Result<(), Error> {
        let readiness = self.readiness.as_ref();

        let result = retry_with_backoff(&self.check_backoff, "check_resource", || async move {
            match readiness.is_ready(check).await {
                Ok(true) => Ok(Some(())),
                Ok(false) => Ok(None),
                Err(e) if !e.is_retryable() => Err(e),
                Err(e) => {
                    debug!(resource = %resource_name, error = %e, "Readiness check failed, retrying");
                    Ok(None)
                }
            }
        })
        .await;

        match result {
            Ok(()) => Ok(()),
            Err(BackoffError::Aborted(e)) => Err(e),
            Err(BackoffError::Exhausted { .. }) => {
                Err(Error::ResourceNotReady(resource_name.to_string()))
            }
        }
    }
}

/// `check` with its namespace defaulted to the resource namespace
pub fn effective_check(check: &ResourceCheck, resource: &BundleResource) -> ResourceCheck {
    let mut check = check.clone();
    if check.namespace.as_deref().map_or(true, str::is_empty) {
        check.namespace = resource.namespace.clone().filter(|ns| !ns.is_empty());
    }
    check
}

/// An apply failure whose output mentions `forbidden` becomes
/// [`Error::Forbidden`]; anything else is returned unchanged
fn classify_apply_error(resource: &str, err: Error) -> Error {
    let output = err.to_string();
    if output.to_lowercase().contains("forbidden") {
        Error::Forbidden {
            resource: resource.to_string(),
            message: output,
        }
    } else {
        err
    }
}

//! Readiness evaluation for resource checks
//!
//! A check is satisfied when at least one live object matches its selector
//! and every matching object's extracted field equals the check pattern,
//! ignoring case. Zero matches means "not ready yet", never success.

use std::sync::Arc;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde_json::Value;
use tracing::trace;

use crate::crd::ResourceCheck;
use crate::kube_client::ClusterClient;
use crate::Error;

/// Field inspected when a check does not name one
pub const DEFAULT_FIELD_PATH: &str = ".status.phase";

/// Trait for evaluating a single readiness check
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ReadinessChecker: Send + Sync {
    /// Whether the objects selected by `check` are ready.
    ///
    /// Unsupported kinds fail with [`Error::UnknownResourceKind`].
    async fn is_ready(&self, check: &ResourceCheck) -> Result<bool, Error>;
}

/// Readiness checker backed by live cluster state
pub struct ClusterReadiness {
    cluster: Arc<dyn ClusterClient>,
}

impl ClusterReadiness {
    /// Create a checker that lists objects through `cluster`
    pub fn new(cluster: Arc<dyn ClusterClient>) -> Self {
        Self { cluster }
    }

    async fn pods_ready(&self, check: &ResourceCheck) -> Result<bool, Error> {
        let selector = check.label_selector();
        let pods = self
            .cluster
            .list_pods(check.namespace.clone(), &selector)
            .await?;

        let objects = pods
            .iter()
            .map(|pod| {
                serde_json::to_value(pod)
                    .map_err(|e| Error::serialization(format!("failed to encode pod: {}", e)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let path = check.json_path.as_deref().unwrap_or(DEFAULT_FIELD_PATH);
        let ready = all_match(&objects, path, &check.pattern);
        trace!(
            selector = %selector,
            matched = objects.len(),
            ready,
            "Evaluated pod readiness"
        );
        Ok(ready)
    }
}

#[async_trait]
impl ReadinessChecker for ClusterReadiness {
    async fn is_ready(&self, check: &ResourceCheck) -> Result<bool, Error> {
        match check.kind.to_uppercase().as_str() {
            "POD" => self.pods_ready(check).await,
            _ => Err(Error::UnknownResourceKind(check.kind.clone())),
        }
    }
}

/// True when `objects` is non-empty and every object's field at `path`
/// equals `pattern`, ignoring case.
pub fn all_match(objects: &[Value], path: &str, pattern: &str) -> bool {
    let pointer = json_pointer(path);
    let wanted = pattern.to_lowercase();
    !objects.is_empty()
        && objects.iter().all(|obj| {
            obj.pointer(&pointer)
                .and_then(Value::as_str)
                .is_some_and(|value| value.to_lowercase() == wanted)
        })
}

/// Convert a simple kubectl-style JSONPath (`{.status.phase}`,
/// `.status.conditions[0].type`) into a JSON pointer.
pub fn json_pointer(path: &str) -> String {
    let trimmed = path
        .trim()
        .trim_start_matches('{')
        .trim_end_matches('}')
        .trim_start_matches('.');

    trimmed
        .replace('[', ".")
        .replace(']', "")
        .split('.')
        .filter(|segment| !segment.is_empty())
        .map(|segment| format!("/{}", segment.replace('~', "~0").replace('/', "~1")))
        .collect()
}

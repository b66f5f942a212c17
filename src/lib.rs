//! kab - Kubernetes application bundle installer
//!
//! Installs a declarative bundle of cluster resources (a [`crd::Manifest`])
//! exactly once per installation name, waits for each resource to become
//! ready, optionally relocates every referenced container image to a private
//! registry, and removes a named installation again later.
//!
//! # Architecture
//!
//! An installation is a strictly sequential pipeline:
//! - The manifest is patched: identity labels, NodePort rewrite, name
//! - Images are relocated to the target registry (or a mounted mapping is applied)
//! - The manifest is stored as a custom resource, refusing duplicates
//! - Each resource is applied with `kubectl` and its readiness checks polled
//!
//! Every cluster-facing step retries transient failures with a bounded
//! exponential [`retry::Backoff`].
//!
//! # Modules
//!
//! - [`crd`] - Manifest Custom Resource Definition
//! - [`install`] - Installation pipeline and idempotency guard
//! - [`patch`] - Label injection and environment rewrites
//! - [`relocate`] - Image relocation into a target registry
//! - [`resource`] - Apply-with-retry and readiness polling
//! - [`readiness`] - Readiness check evaluation against live objects
//! - [`uninstall`] - Cross-namespace lookup and teardown
//! - [`scan`] - Kind and image discovery in resource YAML
//! - [`fetch`] - Resource content resolution from files and URLs
//! - [`kubectl`] - kubectl execution
//! - [`kube_client`] - Kubernetes API access
//! - [`retry`] - Bounded exponential backoff
//! - [`config`] - Installer configuration
//! - [`error`] - Error types for the installer

#![deny(missing_docs)]

pub mod config;
pub mod crd;
pub mod error;
pub mod fetch;
pub mod install;
pub mod kube_client;
pub mod kubectl;
pub mod patch;
pub mod readiness;
pub mod relocate;
pub mod resource;
pub mod retry;
pub mod scan;
pub mod uninstall;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Shared Constants
// =============================================================================

/// Label carrying the installation name on every installed object
///
/// Uninstall deletes by this label, so it must never change between releases.
pub const LABEL_KEY_NAME: &str = "cnab-k8s-installer-installation-name";

/// Namespace for manifests that do not name one
pub const DEFAULT_NAMESPACE: &str = "default";

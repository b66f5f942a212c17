//! Custom Resource Definitions for the bundle installer
//!
//! This module contains the Manifest CRD used to record installations.

mod manifest;

pub use manifest::{
    BundleResource, CheckSelector, Manifest, ManifestSpec, ManifestStatus, ResourceCheck,
};

//! Registry copy collaborator
//!
//! Image bytes are moved by `crane`, which speaks the registry protocol and
//! picks up credentials from the ambient docker config.

use std::process::Stdio;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tokio::process::Command;
use tracing::{debug, trace};

use crate::Error;

/// Trait for copying an image between registries
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Copy `from` to `to` and return the digest-qualified destination
    async fn relocate(&self, from: &str, to: &str) -> Result<String, Error>;
}

/// Registry client backed by the `crane` binary
#[derive(Debug, Clone, Default)]
pub struct CraneRegistry;

impl CraneRegistry {
    /// Create a registry client using `crane` from the PATH
    pub fn new() -> Self {
        Self
    }

    async fn crane(&self, args: &[&str]) -> Result<String, Error> {
        let command_line = format!("crane {}", args.join(" "));
        trace!(command = %command_line, "Running crane");

        let output = Command::new("crane")
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await?;

        if !output.status.success() {
            return Err(Error::command_failed(
                command_line,
                String::from_utf8_lossy(&output.stderr).trim(),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// The reference without any `@digest` suffix
pub fn without_digest(reference: &str) -> &str {
    reference.split('@').next().unwrap_or(reference)
}

#[async_trait]
impl RegistryClient for CraneRegistry {
    async fn relocate(&self, from: &str, to: &str) -> Result<String, Error> {
        // a pushed reference can't be addressed by digest before it exists
        let target = without_digest(to);
        debug!(from = %from, to = %target, "Relocating image");

        self.crane(&["copy", from, target]).await?;
        let digest = self.crane(&["digest", target]).await?;
        if digest.is_empty() {
            return Err(Error::command_failed(
                format!("crane digest {}", target),
                "no digest reported",
            ));
        }
        Ok(format!("{}@{}", target, digest))
    }
}

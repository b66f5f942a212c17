//! kubectl execution
//!
//! Resources are applied and deleted by piping them through `kubectl`, which
//! handles arbitrary kinds, multi-document payloads and client-side discovery.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, trace};

use crate::Error;

/// Trait abstracting kubectl invocations for testability
///
/// Failures are reported as [`Error::CommandFailed`] whose message carries the
/// command's diagnostic output, so callers can inspect it (e.g. for
/// `forbidden`).
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Kubectl: Send + Sync {
    /// `kubectl apply -f -` with `content` on stdin; returns the command output
    async fn apply(&self, content: &str) -> Result<String, Error>;

    /// `kubectl delete <kinds> -l <selector>`; returns the command output
    async fn delete(&self, kinds: &str, selector: &str) -> Result<String, Error>;
}

/// kubectl binary on the PATH
#[derive(Debug, Clone, Default)]
pub struct KubectlCli {
    kubeconfig: Option<PathBuf>,
}

impl KubectlCli {
    /// Create a runner that uses the ambient kubeconfig
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a runner that passes `--kubeconfig` explicitly
    pub fn with_kubeconfig(path: impl Into<PathBuf>) -> Self {
        Self {
            kubeconfig: Some(path.into()),
        }
    }

    fn args<'a>(&'a self, args: &[&'a str]) -> Vec<&'a str> {
        let mut full = Vec::with_capacity(args.len() + 2);
        if let Some(kc) = self.kubeconfig.as_deref().and_then(Path::to_str) {
            full.extend(["--kubeconfig", kc]);
        }
        full.extend_from_slice(args);
        full
    }

    /// Run kubectl with optional stdin and return combined stdout/stderr.
    async fn run(&self, args: &[&str], stdin: Option<&str>) -> Result<String, Error> {
        let args = self.args(args);
        let command_line = format!("kubectl {}", args.join(" "));
        trace!(command = %command_line, "Running kubectl");

        let mut child = Command::new("kubectl")
            .args(&args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input.as_bytes()).await?;
        }

        let output = child.wait_with_output().await?;
        let combined = format!(
            "{}{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );

        if !output.status.success() {
            return Err(Error::command_failed(command_line, combined));
        }

        debug!(command = %command_line, "kubectl succeeded");
        Ok(combined)
    }

    /// `kubectl kustomize <dir>`; returns the rendered YAML
    pub async fn kustomize(&self, dir: &Path) -> Result<String, Error> {
        let dir = dir
            .to_str()
            .ok_or_else(|| Error::validation(format!("non UTF-8 path {}", dir.display())))?;
        self.run(&["kustomize", dir], None).await
    }
}

#[async_trait]
impl Kubectl for KubectlCli {
    async fn apply(&self, content: &str) -> Result<String, Error> {
        self.run(&["apply", "-f", "-"], Some(content)).await
    }

    async fn delete(&self, kinds: &str, selector: &str) -> Result<String, Error> {
        self.run(&["delete", kinds, "-l", selector], None).await
    }
}

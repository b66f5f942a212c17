//! Error types for the bundle installer

use thiserror::Error;

/// Main error type for installer operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// I/O error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid input, such as a resource without content or locator
    #[error("validation error: {0}")]
    Validation(String),

    /// A readiness check names a kind the evaluator cannot inspect
    #[error("unknown resource kind: {0}")]
    UnknownResourceKind(String),

    /// Fetching resource content from its locator failed
    #[error("fetch error: {0}")]
    Fetch(String),

    /// Cluster connection could not be configured
    #[error("configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// An external command exited unsuccessfully
    #[error("command failed: {command} - {message}")]
    CommandFailed {
        /// The command that failed
        command: String,
        /// Captured stderr/stdout of the command
        message: String,
    },

    /// The cluster refused the apply for lack of permissions
    #[error("insufficient permissions to install {resource}: {message}")]
    Forbidden {
        /// Resource being installed
        resource: String,
        /// Output returned by the apply
        message: String,
    },

    /// A non-empty manifest with the same name already exists
    #[error("{0} already installed")]
    AlreadyInstalled(String),

    /// No namespace holds a manifest with the requested name
    #[error("could not find manifest for installation name: {0}")]
    ManifestNotFound(String),

    /// The manifest object could not be created within the retry budget
    #[error("timed out creating manifest custom resource {0}")]
    ManifestCreateTimeout(String),

    /// The resource could not be applied within the retry budget
    #[error("could not create resource: {0}")]
    ResourceNotCreated(String),

    /// A readiness check did not pass within the retry budget
    #[error("the resource {0} did not initialize")]
    ResourceNotReady(String),

    /// Relocating a single image failed
    #[error("failed to relocate image {image}: {message}")]
    Relocation {
        /// Source image reference
        image: String,
        /// Failure reported by the registry client
        message: String,
    },

    /// Deleting the installed objects failed
    #[error("error while uninstalling: {message}, due to: {output}")]
    Uninstall {
        /// Underlying error
        message: String,
        /// Diagnostic output of the delete
        output: String,
    },

    /// Deleting the stored manifest object failed
    #[error("error while deleting the manifest: {0}")]
    ManifestDelete(String),

    /// Another error, annotated with the phase that produced it
    #[error("{context}: {source}")]
    Context {
        /// Phase description
        context: String,
        /// The wrapped error
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a fetch error with the given message
    pub fn fetch(msg: impl Into<String>) -> Self {
        Self::Fetch(msg.into())
    }

    /// Create a configuration error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create a command failure for the given command line and output
    pub fn command_failed(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CommandFailed {
            command: command.into(),
            message: message.into(),
        }
    }

    /// Wrap this error with a description of the phase that failed
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, looking through any phase context
    pub fn root_cause(&self) -> &Error {
        match self {
            Self::Context { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// True if the kube API reported that the object does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(
            self.root_cause(),
            Self::Kube(kube::Error::Api(resp)) if resp.code == 404
        )
    }

    /// True if the kube API reported that the object already exists
    pub fn is_already_exists(&self) -> bool {
        matches!(
            self.root_cause(),
            Self::Kube(kube::Error::Api(resp)) if resp.code == 409
        )
    }

    /// Whether a backoff loop may try the failed operation again.
    ///
    /// Input validation, authorization and definitive state conflicts are
    /// final; infrastructure failures are not.
    pub fn is_retryable(&self) -> bool {
        match self.root_cause() {
            Self::Kube(_) | Self::Io(_) | Self::Fetch(_) | Self::CommandFailed { .. } => true,
            Self::Validation(_)
            | Self::UnknownResourceKind(_)
            | Self::Config(_)
            | Self::Serialization(_)
            | Self::Forbidden { .. }
            | Self::AlreadyInstalled(_)
            | Self::ManifestNotFound(_)
            | Self::ManifestCreateTimeout(_)
            | Self::ResourceNotCreated(_)
            | Self::ResourceNotReady(_)
            | Self::Relocation { .. }
            | Self::Uninstall { .. }
            | Self::ManifestDelete(_)
            | Self::Context { .. } => false,
        }
    }
}

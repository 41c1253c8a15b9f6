use thiserror::Error;

/// REITTI controller errors
#[derive(Error, Debug)]
pub enum ReittiError {
    #[error("Kubernetes error: {0}")]
    Kubernetes(#[from] kube::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
}

/// Errors produced by a single reconcile pass.
///
/// These never escalate past the worker loop: they are retried up to the
/// configured budget and then dropped with a log line.
#[derive(Error, Debug)]
pub enum ReconcileError {
    /// Object from the local replica is missing required fields
    #[error("malformed object: {0}")]
    MalformedObject(String),

    #[error("render failed: {0}")]
    Render(String),
}

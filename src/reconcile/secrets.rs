//! Secrets reconciler (extension seam)
//!
//! Participates fully in the queue/retry/lifecycle machinery but projects
//! nothing yet. A future TLS-material projection (certificates keyed by
//! secret identity, `kubernetes.io/tls` type filter) slots in here without
//! touching the processor or the controller.

use super::{object_id, Reconcile};
use crate::error::ReconcileError;
use crate::state::{ObjectId, SharedState};
use k8s_openapi::api::core::v1::Secret;
use std::sync::Arc;
use tracing::trace;

const TLS_SECRET_TYPE: &str = "kubernetes.io/tls";

pub struct SecretsReconciler {
    #[allow(dead_code)] // Wired for the future TLS projection
    state: Arc<SharedState>,
}

impl SecretsReconciler {
    pub fn new(state: Arc<SharedState>) -> Self {
        Self { state }
    }

    /// Whether a secret carries TLS material this controller would project.
    pub fn is_tls(secret: &Secret) -> bool {
        secret.type_.as_deref() == Some(TLS_SECRET_TYPE)
    }
}

impl Reconcile<Secret> for SecretsReconciler {
    fn apply(&self, secret: &Secret) -> Result<(), ReconcileError> {
        let id = object_id(secret)?;
        trace!(object = %id, tls = Self::is_tls(secret), "secret observed");
        Ok(())
    }

    fn delete(&self, id: &ObjectId) -> Result<(), ReconcileError> {
        trace!(object = %id, "secret removed");
        Ok(())
    }
}

//! Per-kind reconciliation strategies
//!
//! One strategy per watched resource kind, all driven by the same generic
//! processor. A strategy re-derives its object's contribution to the shared
//! state from the current replica entry; the `apply` path serves both
//! creation and modification and must be idempotent, because the queue
//! coalesces bursts and a handler may never see intermediate states.

mod endpoints;
mod ingress;
mod secrets;

pub use endpoints::EndpointsReconciler;
pub use ingress::IngressReconciler;
pub use secrets::SecretsReconciler;

use crate::error::ReconcileError;
use crate::state::ObjectId;
use kube::ResourceExt;

/// Reconciliation strategy for one resource kind.
pub trait Reconcile<K>: Send + Sync + 'static {
    /// The object exists in the local replica: project its current spec
    /// into the shared state, replacing any prior contribution.
    fn apply(&self, obj: &K) -> Result<(), ReconcileError>;

    /// The object is gone: retract everything it contributed.
    fn delete(&self, id: &ObjectId) -> Result<(), ReconcileError>;
}

/// Identity of a replica object, or a malformed-object error if the
/// metadata is missing a name or namespace.
pub(crate) fn object_id<K>(obj: &K) -> Result<ObjectId, ReconcileError>
where
    K: kube::Resource,
{
    let name = obj.meta().name.clone().ok_or_else(|| {
        ReconcileError::MalformedObject("object has no metadata.name".to_string())
    })?;
    let namespace = obj.namespace().ok_or_else(|| {
        ReconcileError::MalformedObject(format!("object {name} has no metadata.namespace"))
    })?;
    Ok(ObjectId::new(namespace, name))
}

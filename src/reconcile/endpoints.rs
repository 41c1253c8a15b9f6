//! Endpoints reconciler
//!
//! Rebuilds the backend URL lists for a service from its Endpoints object.
//! Every pass first clears all entries previously attributed to the object
//! (all port names), so an edit that drops a port cannot leave orphans, and
//! an object with zero subsets resolves to "service has no backends".

use super::{object_id, Reconcile};
use crate::error::ReconcileError;
use crate::state::{ObjectId, ServiceKey, SharedState, Upstream};
use k8s_openapi::api::core::v1::Endpoints;
use std::sync::Arc;
use tracing::debug;

pub struct EndpointsReconciler {
    state: Arc<SharedState>,
}

impl EndpointsReconciler {
    pub fn new(state: Arc<SharedState>) -> Self {
        Self { state }
    }
}

impl Reconcile<Endpoints> for EndpointsReconciler {
    fn apply(&self, eps: &Endpoints) -> Result<(), ReconcileError> {
        let id = object_id(eps)?;

        let mut sets = Vec::new();
        for subset in eps.subsets.iter().flatten() {
            let Some(ports) = &subset.ports else {
                continue;
            };
            for port in ports {
                let key = ServiceKey::new(
                    id.namespace.clone(),
                    id.name.clone(),
                    port.name.clone().unwrap_or_default(),
                );
                // Only ready addresses become backends
                let upstreams: Vec<Upstream> = subset
                    .addresses
                    .iter()
                    .flatten()
                    .map(|addr| Upstream::for_port(addr.ip.clone(), port.port))
                    .collect();
                sets.push((key, upstreams));
            }
        }

        debug!(object = %id, port_groups = sets.len(), "rebuilding endpoints");
        self.state.apply_endpoints(&id, sets);
        Ok(())
    }

    fn delete(&self, id: &ObjectId) -> Result<(), ReconcileError> {
        debug!(object = %id, "clearing endpoints");
        self.state.clear_endpoints(id);
        Ok(())
    }
}

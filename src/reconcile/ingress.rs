//! Ingress reconciler
//!
//! Projects matching Ingress objects into the routing table. An object is
//! projected only while it carries this controller's class tag and matches
//! the configured label selector; an update that stops matching (or a
//! delete) retracts everything the object previously contributed, so the
//! table is always a pure function of currently-matching specs.

use super::{object_id, Reconcile};
use crate::config::LabelSelector;
use crate::error::ReconcileError;
use crate::state::{ObjectId, RouteEntry, ServiceKey, SharedState};
use k8s_openapi::api::networking::v1::Ingress;
use std::sync::Arc;
use tracing::debug;

/// Legacy class annotation, still honored alongside `spec.ingressClassName`.
const CLASS_ANNOTATION: &str = "kubernetes.io/ingress.class";

pub struct IngressReconciler {
    state: Arc<SharedState>,
    class: String,
    selector: LabelSelector,
}

impl IngressReconciler {
    pub fn new(state: Arc<SharedState>, class: String, selector: LabelSelector) -> Self {
        Self {
            state,
            class,
            selector,
        }
    }

    fn matches(&self, ing: &Ingress) -> bool {
        let class_matches = ing
            .spec
            .as_ref()
            .and_then(|spec| spec.ingress_class_name.as_deref())
            .map(|class| class == self.class)
            .unwrap_or_else(|| {
                ing.metadata
                    .annotations
                    .as_ref()
                    .and_then(|a| a.get(CLASS_ANNOTATION))
                    .is_some_and(|class| *class == self.class)
            });
        class_matches && self.selector.matches(ing.metadata.labels.as_ref())
    }
}

impl Reconcile<Ingress> for IngressReconciler {
    fn apply(&self, ing: &Ingress) -> Result<(), ReconcileError> {
        let id = object_id(ing)?;

        if !self.matches(ing) {
            // A previously-matching object may have lost its tag or labels;
            // its contributions must still be retracted
            debug!(object = %id, "ingress does not match class/selector");
            self.state.clear_routes(&id);
            return Ok(());
        }

        let mut entries = Vec::new();
        for rule in ing
            .spec
            .iter()
            .flat_map(|spec| spec.rules.iter().flatten())
        {
            let Some(host) = rule.host.clone().filter(|h| !h.is_empty()) else {
                continue;
            };
            for path in rule.http.iter().flat_map(|http| &http.paths) {
                let Some(service) = &path.backend.service else {
                    continue;
                };
                // A backend that names its port joins the endpoint group of
                // that name; a numeric port joins the unnamed group, like
                // endpoint ports that carry no name
                let port_name = service
                    .port
                    .as_ref()
                    .and_then(|port| port.name.clone())
                    .unwrap_or_default();
                entries.push((
                    host.clone(),
                    RouteEntry {
                        path: path.path.clone().unwrap_or_else(|| "/".to_string()),
                        service: ServiceKey::new(
                            id.namespace.clone(),
                            service.name.clone(),
                            port_name,
                        ),
                    },
                ));
            }
        }

        debug!(object = %id, entries = entries.len(), "rebuilding routes");
        self.state.apply_routes(&id, entries);
        Ok(())
    }

    fn delete(&self, id: &ObjectId) -> Result<(), ReconcileError> {
        debug!(object = %id, "clearing routes");
        self.state.clear_routes(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::networking::v1::{
        HTTPIngressPath, HTTPIngressRuleValue, IngressBackend, IngressRule, IngressServiceBackend,
        IngressSpec, ServiceBackendPort,
    };
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;

    fn ingress(name: &str, class: Option<&str>, rules: Vec<IngressRule>) -> Ingress {
        Ingress {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            spec: Some(IngressSpec {
                ingress_class_name: class.map(str::to_string),
                rules: Some(rules),
                ..Default::default()
            }),
            status: None,
        }
    }

    fn rule(host: &str, paths: Vec<(&str, &str, &str)>) -> IngressRule {
        IngressRule {
            host: Some(host.to_string()),
            http: Some(HTTPIngressRuleValue {
                paths: paths
                    .into_iter()
                    .map(|(path, service, port)| HTTPIngressPath {
                        path: Some(path.to_string()),
                        path_type: "Prefix".to_string(),
                        backend: IngressBackend {
                            service: Some(IngressServiceBackend {
                                name: service.to_string(),
                                port: Some(ServiceBackendPort {
                                    name: Some(port.to_string()),
                                    number: None,
                                }),
                            }),
                            ..Default::default()
                        },
                    })
                    .collect(),
            }),
        }
    }

    fn reconciler(state: &Arc<SharedState>, selector: &str) -> IngressReconciler {
        IngressReconciler::new(
            state.clone(),
            "reitti".to_string(),
            selector.parse().unwrap(),
        )
    }

    #[test]
    fn test_matching_ingress_is_projected() {
        let state = Arc::new(SharedState::new());
        let reconciler = reconciler(&state, "");

        reconciler
            .apply(&ingress(
                "site",
                Some("reitti"),
                vec![rule("foo.example.com", vec![("/", "web", "http")])],
            ))
            .unwrap();

        let snap = state.snapshot();
        assert_eq!(
            snap.routes["foo.example.com"],
            vec![RouteEntry {
                path: "/".to_string(),
                service: ServiceKey::new("default", "web", "http"),
            }]
        );
    }

    #[test]
    fn test_wrong_class_contributes_nothing() {
        let state = Arc::new(SharedState::new());
        let reconciler = reconciler(&state, "");

        reconciler
            .apply(&ingress(
                "site",
                Some("nginx"),
                vec![rule("foo.example.com", vec![("/", "web", "http")])],
            ))
            .unwrap();

        assert!(state.snapshot().routes.is_empty());
    }

    #[test]
    fn test_legacy_class_annotation_is_honored() {
        let state = Arc::new(SharedState::new());
        let reconciler = reconciler(&state, "");

        let mut ing = ingress(
            "site",
            None,
            vec![rule("foo.example.com", vec![("/", "web", "http")])],
        );
        let mut annotations = BTreeMap::new();
        annotations.insert(CLASS_ANNOTATION.to_string(), "reitti".to_string());
        ing.metadata.annotations = Some(annotations);

        reconciler.apply(&ing).unwrap();
        assert_eq!(state.snapshot().routes.len(), 1);
    }

    #[test]
    fn test_selector_mismatch_contributes_nothing() {
        let state = Arc::new(SharedState::new());
        let reconciler = reconciler(&state, "team=edge");

        reconciler
            .apply(&ingress(
                "site",
                Some("reitti"),
                vec![rule("foo.example.com", vec![("/", "web", "http")])],
            ))
            .unwrap();

        assert!(state.snapshot().routes.is_empty());
    }

    #[test]
    fn test_update_that_stops_matching_retracts_contribution() {
        let state = Arc::new(SharedState::new());
        let reconciler = reconciler(&state, "");

        reconciler
            .apply(&ingress(
                "site",
                Some("reitti"),
                vec![rule("foo.example.com", vec![("/", "web", "http")])],
            ))
            .unwrap();
        assert_eq!(state.snapshot().routes.len(), 1);

        // Same object re-tagged for another controller
        reconciler
            .apply(&ingress(
                "site",
                Some("nginx"),
                vec![rule("foo.example.com", vec![("/", "web", "http")])],
            ))
            .unwrap();

        assert!(state.snapshot().routes.is_empty());
    }

    #[test]
    fn test_edit_dropping_a_rule_retracts_it() {
        let state = Arc::new(SharedState::new());
        let reconciler = reconciler(&state, "");

        reconciler
            .apply(&ingress(
                "site",
                Some("reitti"),
                vec![rule(
                    "foo.example.com",
                    vec![("/", "web", "http"), ("/api", "api", "http")],
                )],
            ))
            .unwrap();
        reconciler
            .apply(&ingress(
                "site",
                Some("reitti"),
                vec![rule("foo.example.com", vec![("/", "web", "http")])],
            ))
            .unwrap();

        let snap = state.snapshot();
        assert_eq!(snap.routes["foo.example.com"].len(), 1);
        assert_eq!(snap.routes["foo.example.com"][0].path, "/");
    }

    #[test]
    fn test_delete_clears_contribution() {
        let state = Arc::new(SharedState::new());
        let reconciler = reconciler(&state, "");

        reconciler
            .apply(&ingress(
                "site",
                Some("reitti"),
                vec![rule("foo.example.com", vec![("/", "web", "http")])],
            ))
            .unwrap();
        reconciler
            .delete(&ObjectId::new("default", "site"))
            .unwrap();

        assert!(state.snapshot().routes.is_empty());
    }

    #[test]
    fn test_numeric_backend_port_maps_to_unnamed_group() {
        let state = Arc::new(SharedState::new());
        let reconciler = reconciler(&state, "");

        let mut ing = ingress("site", Some("reitti"), vec![]);
        ing.spec.as_mut().unwrap().rules = Some(vec![IngressRule {
            host: Some("foo.example.com".to_string()),
            http: Some(HTTPIngressRuleValue {
                paths: vec![HTTPIngressPath {
                    path: Some("/".to_string()),
                    path_type: "Prefix".to_string(),
                    backend: IngressBackend {
                        service: Some(IngressServiceBackend {
                            name: "web".to_string(),
                            port: Some(ServiceBackendPort {
                                name: None,
                                number: Some(8080),
                            }),
                        }),
                        ..Default::default()
                    },
                }],
            }),
        }]);

        reconciler.apply(&ing).unwrap();

        let snap = state.snapshot();
        assert_eq!(
            snap.routes["foo.example.com"][0].service,
            ServiceKey::new("default", "web", "")
        );
    }
}

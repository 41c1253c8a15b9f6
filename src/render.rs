//! Snapshot renderers for the configuration endpoint
//!
//! The exact payload the downstream proxy consumes is a pluggable concern:
//! a renderer turns a point-in-time snapshot into one response body. The
//! default renders JSON of the shape
//! `{hostname: [{path, service, upstreams: [url]}]}`, joining the routing
//! table against the endpoint sets. A route whose service has no known
//! backends renders with an empty upstream list, not an error.

use crate::error::ReconcileError;
use crate::state::Snapshot;
use serde_json::json;

pub trait Render: Send + Sync + 'static {
    fn content_type(&self) -> &'static str;
    fn render(&self, snapshot: &Snapshot) -> Result<String, ReconcileError>;
}

/// Default JSON renderer.
#[derive(Default)]
pub struct JsonRender;

impl Render for JsonRender {
    fn content_type(&self) -> &'static str {
        "application/json"
    }

    fn render(&self, snapshot: &Snapshot) -> Result<String, ReconcileError> {
        let mut hosts = serde_json::Map::new();
        for (hostname, entries) in &snapshot.routes {
            let rules: Vec<_> = entries
                .iter()
                .map(|entry| {
                    let upstreams: Vec<String> = snapshot
                        .upstreams(&entry.service)
                        .iter()
                        .map(ToString::to_string)
                        .collect();
                    json!({
                        "path": entry.path,
                        "service": entry.service.to_string(),
                        "upstreams": upstreams,
                    })
                })
                .collect();
            hosts.insert(hostname.clone(), rules.into());
        }
        serde_json::to_string_pretty(&serde_json::Value::Object(hosts))
            .map_err(|e| ReconcileError::Render(e.to_string()))
    }
}

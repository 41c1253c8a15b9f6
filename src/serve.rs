//! Configuration and health HTTP surface
//!
//! Exposes the rendered snapshot at `/config`, a readiness probe at
//! `/healthz` and Prometheus metrics at `/metrics`. Both read paths are
//! gated on the initial sync: consumers see 503 until every replica has
//! listed, and stale-but-available data ever after.

use crate::controller::ReadyGate;
use crate::error::ReittiError;
use crate::metrics;
use crate::render::Render;
use crate::state::SharedState;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::CONTENT_TYPE;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{HeaderMap, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct ServeContext {
    pub state: Arc<SharedState>,
    pub gate: ReadyGate,
    pub renderer: Arc<dyn Render>,
}

/// Serves the HTTP surface until `shutdown` is cancelled.
pub async fn serve(
    bind_addr: &str,
    ctx: ServeContext,
    shutdown: CancellationToken,
) -> Result<(), ReittiError> {
    let listener = TcpListener::bind(bind_addr).await?;
    info!(addr = bind_addr, "config endpoint listening");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, peer_addr)) => {
                        debug!(%peer_addr, "accepted connection");
                        let ctx = ctx.clone();
                        tokio::spawn(async move {
                            let io = TokioIo::new(stream);
                            let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                                let ctx = ctx.clone();
                                async move { Ok::<_, Infallible>(handle(&req, &ctx)) }
                            });
                            if let Err(error) = http1::Builder::new().serve_connection(io, service).await {
                                debug!(%error, "connection error");
                            }
                        });
                    }
                    Err(error) => {
                        warn!(%error, "accept error");
                    }
                }
            }
            _ = shutdown.cancelled() => {
                info!("config endpoint shutting down");
                return Ok(());
            }
        }
    }
}

fn handle<B>(req: &Request<B>, ctx: &ServeContext) -> Response<Full<Bytes>> {
    match req.uri().path() {
        "/healthz" => {
            // Only the status code is load-bearing here
            if ctx.gate.is_ready() {
                text(StatusCode::OK, "ok")
            } else {
                text(StatusCode::SERVICE_UNAVAILABLE, "not synced yet")
            }
        }
        "/config" => {
            if !ctx.gate.is_ready() {
                return text(StatusCode::SERVICE_UNAVAILABLE, "not synced yet");
            }
            let snapshot = ctx.state.snapshot();
            match ctx.renderer.render(&snapshot) {
                Ok(body) => with_content_type(
                    text(StatusCode::OK, body),
                    ctx.renderer.content_type(),
                ),
                Err(error) => {
                    warn!(%error, "failed to render configuration");
                    text(StatusCode::INTERNAL_SERVER_ERROR, "render failed")
                }
            }
        }
        "/metrics" => with_content_type(
            text(StatusCode::OK, metrics::gather()),
            "text/plain; version=0.0.4",
        ),
        _ => text(StatusCode::NOT_FOUND, "not found"),
    }
}

fn text(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
}

fn with_content_type(
    mut response: Response<Full<Bytes>>,
    content_type: &'static str,
) -> Response<Full<Bytes>> {
    let headers: &mut HeaderMap = response.headers_mut();
    headers.insert(CONTENT_TYPE, hyper::header::HeaderValue::from_static(content_type));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::JsonRender;
    use crate::state::{ObjectId, RouteEntry, ServiceKey, Upstream};
    use std::sync::atomic::{AtomicBool, Ordering};

    fn context(ready: bool) -> ServeContext {
        let flag = Arc::new(AtomicBool::new(ready));
        ServeContext {
            state: Arc::new(SharedState::new()),
            gate: ReadyGate::new(vec![flag]),
            renderer: Arc::new(JsonRender),
        }
    }

    fn get(path: &str) -> Request<()> {
        Request::builder().uri(path).body(()).unwrap()
    }

    #[test]
    fn test_healthz_not_ready_before_sync() {
        let response = handle(&get("/healthz"), &context(false));
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_healthz_ready_after_sync() {
        let response = handle(&get("/healthz"), &context(true));
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_readiness_flips_with_the_gate() {
        let flag = Arc::new(AtomicBool::new(false));
        let ctx = ServeContext {
            state: Arc::new(SharedState::new()),
            gate: ReadyGate::new(vec![Arc::clone(&flag)]),
            renderer: Arc::new(JsonRender),
        };
        assert_eq!(
            handle(&get("/healthz"), &ctx).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        flag.store(true, Ordering::SeqCst);
        assert_eq!(handle(&get("/healthz"), &ctx).status(), StatusCode::OK);
    }

    #[test]
    fn test_config_unavailable_before_sync() {
        let response = handle(&get("/config"), &context(false));
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_config_renders_snapshot_when_synced() {
        let ctx = context(true);
        let key = ServiceKey::new("default", "web", "http");
        ctx.state.apply_routes(
            &ObjectId::new("default", "site"),
            vec![(
                "foo.example.com".to_string(),
                RouteEntry {
                    path: "/".to_string(),
                    service: key.clone(),
                },
            )],
        );
        ctx.state.apply_endpoints(
            &ObjectId::new("default", "web"),
            vec![(key, vec![Upstream::for_port("10.0.0.1", 80)])],
        );

        let response = handle(&get("/config"), &ctx);
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[CONTENT_TYPE].to_str().unwrap(),
            "application/json"
        );
    }

    #[test]
    fn test_metrics_endpoint_responds() {
        let response = handle(&get("/metrics"), &context(false));
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_unknown_path_is_404() {
        let response = handle(&get("/nope"), &context(true));
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}

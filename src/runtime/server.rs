//! Gateway HTTP server.
//!
//! Accepts connections, converts hyper requests into the transport-neutral
//! [`ApiRequest`] shape, and hands them to the [`Router`]. One task per
//! connection; the router and its route table are shared read-only.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::http::{ApiRequest, ApiResponse, Method, StatusCode};
use crate::runtime::config::GatewayConfig;
use crate::runtime::router::Router;

/// The gateway server: a bound [`Router`] behind a hyper accept loop.
pub struct GatewayServer {
    config: GatewayConfig,
    router: Arc<Router>,
}

impl GatewayServer {
    pub fn new(config: GatewayConfig, router: Router) -> Self {
        let router = Arc::new(router.with_request_timeout(config.deadline()));
        Self { config, router }
    }

    /// The shared router, for embedding in another host.
    pub fn router(&self) -> Arc<Router> {
        self.router.clone()
    }

    /// Start serving.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr: SocketAddr = self.config.bind_addr().parse()?;
        let listener = TcpListener::bind(addr).await?;

        info!("gateway listening on {}", addr);

        loop {
            let (stream, remote_addr) = listener.accept().await?;
            let io = TokioIo::new(stream);

            let router = self.router.clone();
            let config = self.config.clone();

            tokio::task::spawn(async move {
                let service = service_fn(move |req| {
                    let router = router.clone();
                    let config = config.clone();
                    async move { handle_request(req, router, config, remote_addr).await }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    error!("error serving connection: {err:?}");
                }
            });
        }
    }
}

async fn handle_request(
    req: Request<Incoming>,
    router: Arc<Router>,
    config: GatewayConfig,
    remote_addr: SocketAddr,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let path = req.uri().path().to_string();
    debug!(method = %req.method(), %path, remote = %remote_addr, "handling request");

    if config.enable_health && path == "/_health" {
        return Ok(build_response(
            ApiResponse::new(StatusCode::OK).body("OK"),
        ));
    }

    if config.enable_routes && path == "/_routes" {
        let routes = router
            .routes()
            .iter()
            .map(|route| {
                serde_json::json!({
                    "method": route.method.as_str(),
                    "path": route.path,
                    "handler": route.handler_reference,
                    "api": route.source_api_id,
                })
            })
            .collect::<Vec<_>>();
        let body = serde_json::json!({ "routes": routes }).to_string();
        return Ok(build_response(
            ApiResponse::new(StatusCode::OK)
                .header("Content-Type", "application/json")
                .body(body),
        ));
    }

    let Some(method) = Method::from_http(req.method()) else {
        return Ok(build_response(ApiResponse::not_found()));
    };

    let request = match convert_request(req, method, &path, &config, remote_addr).await? {
        Ok(request) => request,
        Err(response) => return Ok(build_response(response)),
    };

    Ok(build_response(router.dispatch(request).await))
}

/// Convert a hyper request; an oversized body short-circuits into a 413.
async fn convert_request(
    req: Request<Incoming>,
    method: Method,
    path: &str,
    config: &GatewayConfig,
    remote_addr: SocketAddr,
) -> Result<Result<ApiRequest, ApiResponse>, hyper::Error> {
    let query = req.uri().query().unwrap_or_default().to_string();

    let mut headers = Vec::with_capacity(req.headers().len());
    for (name, value) in req.headers() {
        if let Ok(value) = value.to_str() {
            headers.push((name.as_str().to_string(), value.to_string()));
        } else {
            warn!(header = %name, "dropping non-UTF-8 header value");
        }
    }

    let body = req.collect().await?.to_bytes();
    if body.len() > config.max_body_size {
        return Ok(Err(ApiResponse::message(
            StatusCode::PAYLOAD_TOO_LARGE,
            "Request body too large",
        )));
    }

    let mut request = ApiRequest::new(method, path)
        .query(query)
        .source_ip(remote_addr.ip().to_string());
    request.headers = headers;
    request.body = body;

    Ok(Ok(request))
}

/// Build a hyper response from the gateway's response shape.
fn build_response(response: ApiResponse) -> Response<Full<Bytes>> {
    let status = hyper::StatusCode::from_u16(response.status.into()).unwrap_or_else(|_| {
        warn!(status = u16::from(response.status), "invalid status code, answering 500");
        hyper::StatusCode::INTERNAL_SERVER_ERROR
    });

    let mut builder = Response::builder().status(status);
    for (name, value) in response.headers {
        builder = builder.header(name, value);
    }

    builder.body(Full::new(response.body)).unwrap_or_else(|e| {
        warn!("failed to assemble response: {e}");
        let mut fallback = Response::new(Full::new(Bytes::from_static(b"Internal Server Error")));
        *fallback.status_mut() = hyper::StatusCode::INTERNAL_SERVER_ERROR;
        fallback
    })
}

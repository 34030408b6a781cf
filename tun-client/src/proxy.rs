//! Local mediation server.
//!
//! Accepts visitor traffic, logs it, runs the magic auth gate, and forwards
//! admitted requests to the local service over HTTP/1.1.

use crate::gate::{AuthGate, GateConfig, ProxyChannel, ResponseSlot};
use crate::logger::RequestLogger;
use crate::plugins::ClassificationEngine;
use axum::{
    body::Body,
    extract::State,
    http::{Request, Response, StatusCode},
    routing::any,
    Router,
};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::Method;
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tracing::{debug, error, info};
use tun_core::error::{ErrorCategory, MediationError, MediationResult, ResultExt};
use tun_core::protocol::{HttpMethod, HttpRequestData, HttpResponseData, HttpVersion};

const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Everything a request handler needs.
pub struct MediationState {
    pub gate: AuthGate,
    pub logger: Arc<RequestLogger>,
    /// Local service address (host:port).
    pub target: String,
}

impl MediationState {
    pub fn new(
        gate_config: GateConfig,
        engine: ClassificationEngine,
        max_logged_requests: usize,
        target: impl Into<String>,
    ) -> Self {
        let logger = Arc::new(RequestLogger::new(engine, max_logged_requests));
        let gate = AuthGate::new(gate_config).with_response_log(logger.clone());
        Self {
            gate,
            logger,
            target: target.into(),
        }
    }

    /// Log, gate and answer one request.
    pub async fn process(&self, mut request: HttpRequestData) -> HttpResponseData {
        let request_id = self.logger.log_request(&mut request);

        let (slot, rx) = ResponseSlot::new();
        match self.gate.handle(request, Some(&slot as &dyn ProxyChannel)) {
            Some(request) => {
                let response = forward_http_request(&self.target, &request).await;
                self.logger.log_response(&request_id, response.clone());
                response
            }
            // The gate logged its own response under the request id.
            None => match rx.await {
                Ok(raw) => HttpResponseData::from_raw(&raw).unwrap_or_else(|e| {
                    error!("Gate produced an unparseable response: {}", e);
                    text_response(500, "Internal error")
                }),
                Err(_) => {
                    error!("Gate answered request {} without a response", request_id);
                    text_response(500, "Internal error")
                }
            },
        }
    }
}

/// Build the catch-all router.
pub fn router(state: Arc<MediationState>) -> Router {
    Router::new()
        .route("/", any(mediate))
        .route("/*path", any(mediate))
        .with_state(state)
}

/// Run the mediation server until the process exits.
pub async fn serve(addr: SocketAddr, state: Arc<MediationState>) -> anyhow::Result<()> {
    let target = state.target.clone();
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Mediation server listening on {} -> {}", addr, target);

    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn mediate(State(state): State<Arc<MediationState>>, request: Request<Body>) -> Response<Body> {
    let http_request = match convert_request(request).await {
        Ok(r) => r,
        Err(e) => {
            debug!("Rejected request: {}", e);
            return build_response(text_response(e.http_status(), &e.message));
        }
    };

    build_response(state.process(http_request).await)
}

async fn convert_request(request: Request<Body>) -> MediationResult<HttpRequestData> {
    let method: HttpMethod = request
        .method()
        .as_str()
        .parse()
        .map_err(MediationError::input)?;

    let uri = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    let version = match request.version() {
        axum::http::Version::HTTP_10 => HttpVersion::Http10,
        axum::http::Version::HTTP_2 => HttpVersion::H2,
        axum::http::Version::HTTP_3 => HttpVersion::H3,
        _ => HttpVersion::Http11,
    };

    let headers: Vec<(String, String)> = request
        .headers()
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
        .collect();

    let body = axum::body::to_bytes(request.into_body(), MAX_BODY_BYTES)
        .await
        .map_err(|e| MediationError::input(format!("Failed to read body: {}", e)))?;

    Ok(HttpRequestData {
        method,
        uri,
        headers,
        body: body.to_vec(),
        version,
    })
}

fn build_response(data: HttpResponseData) -> Response<Body> {
    let mut builder =
        Response::builder().status(StatusCode::from_u16(data.status).unwrap_or(StatusCode::OK));

    for (key, value) in data.headers {
        let key_lower = key.to_lowercase();
        if key_lower == "transfer-encoding" || key_lower == "connection" || key_lower == "keep-alive"
        {
            continue;
        }

        if let Ok(header_name) = axum::http::HeaderName::try_from(key.as_str()) {
            if let Ok(header_value) = axum::http::HeaderValue::try_from(value.as_str()) {
                builder = builder.header(header_name, header_value);
            }
        }
    }

    builder.body(Body::from(data.body)).unwrap_or_else(|e| {
        error!("Failed to build response: {}", e);
        let mut response = Response::new(Body::from("Failed to build response"));
        *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
        response
    })
}

fn text_response(status: u16, message: &str) -> HttpResponseData {
    HttpResponseData::new(status)
        .with_header("Content-Type", "text/plain")
        .with_header("Content-Length", message.len().to_string())
        .with_body(message)
}

/// Forward a request to the local service, answering 502 when it fails.
pub async fn forward_http_request(local_addr: &str, request: &HttpRequestData) -> HttpResponseData {
    debug!(
        "Forwarding {} {} {} to {}",
        request.version, request.method, request.uri, local_addr
    );

    match forward_with_http1(local_addr, request).await {
        Ok(response) => response,
        Err(e) => {
            error!("Failed to forward request: {}", e);
            text_response(502, &format!("Failed to connect to local service: {}", e))
        }
    }
}

async fn forward_with_http1(
    local_addr: &str,
    request_data: &HttpRequestData,
) -> MediationResult<HttpResponseData> {
    let stream = TcpStream::connect(local_addr)
        .await
        .with_context(ErrorCategory::Upstream, "target", local_addr)?;
    let io = TokioIo::new(stream);

    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .with_category(ErrorCategory::Upstream)?;

    tokio::spawn(async move {
        if let Err(e) = conn.await {
            debug!("HTTP/1.1 connection error: {}", e);
        }
    });

    let req = build_hyper_request(request_data, local_addr)?;
    let response = sender
        .send_request(req)
        .await
        .with_category(ErrorCategory::Upstream)?;

    convert_hyper_response(response).await
}

fn build_hyper_request(
    request_data: &HttpRequestData,
    local_addr: &str,
) -> MediationResult<hyper::Request<Full<Bytes>>> {
    let method = match request_data.method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Delete => Method::DELETE,
        HttpMethod::Patch => Method::PATCH,
        HttpMethod::Head => Method::HEAD,
        HttpMethod::Options => Method::OPTIONS,
        HttpMethod::Connect => Method::CONNECT,
        HttpMethod::Trace => Method::TRACE,
    };

    let uri = if request_data.uri.is_empty() {
        "/"
    } else {
        request_data.uri.as_str()
    };

    let mut builder = hyper::Request::builder().method(method).uri(uri);

    let mut has_host = false;
    for (key, value) in &request_data.headers {
        if key.eq_ignore_ascii_case("host") {
            has_host = true;
        }
        builder = builder.header(key.as_str(), value.as_str());
    }
    if !has_host {
        builder = builder.header("Host", local_addr);
    }

    builder
        .body(Full::new(Bytes::from(request_data.body.clone())))
        .with_category(ErrorCategory::Input)
}

async fn convert_hyper_response(
    response: hyper::Response<Incoming>,
) -> MediationResult<HttpResponseData> {
    let status = response.status().as_u16();

    let version = match response.version() {
        hyper::Version::HTTP_10 => HttpVersion::Http10,
        _ => HttpVersion::Http11,
    };

    let headers: Vec<(String, String)> = response
        .headers()
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
        .collect();

    let body = response
        .collect()
        .await
        .with_category(ErrorCategory::Upstream)?
        .to_bytes()
        .to_vec();

    Ok(HttpResponseData {
        status,
        headers,
        body,
        version,
    })
}

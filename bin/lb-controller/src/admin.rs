//! Admin HTTP endpoint: `/metrics` and `/healthz`

use anyhow::Result;
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::tokio::TokioIo;
use lb_avi::Metrics;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

pub struct AdminState {
    metrics: Metrics,
    ready: AtomicBool,
}

impl AdminState {
    pub fn new(metrics: Metrics) -> Self {
        Self {
            metrics,
            ready: AtomicBool::new(false),
        }
    }

    /// Healthy once the first full sync has run
    pub fn set_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }
}

fn text(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
}

pub fn respond(method: &Method, path: &str, state: &AdminState) -> Response<Full<Bytes>> {
    match (method, path) {
        (&Method::GET, "/metrics") => match state.metrics.gather() {
            Ok(body) => {
                let mut response = text(StatusCode::OK, body);
                response
                    .headers_mut()
                    .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; version=0.0.4"));
                response
            }
            Err(e) => {
                warn!("Failed to gather metrics: {}", e);
                text(StatusCode::INTERNAL_SERVER_ERROR, "Failed to gather metrics\n")
            }
        },
        (&Method::GET, "/healthz") => {
            if state.ready.load(Ordering::Acquire) {
                text(StatusCode::OK, "OK\n")
            } else {
                text(StatusCode::SERVICE_UNAVAILABLE, "starting\n")
            }
        }
        _ => text(StatusCode::NOT_FOUND, "Not Found\n"),
    }
}

async fn handle(req: Request<Incoming>, state: Arc<AdminState>) -> std::result::Result<Response<Full<Bytes>>, Infallible> {
    debug!("{} {}", req.method(), req.uri().path());
    Ok(respond(req.method(), req.uri().path(), &state))
}

pub async fn serve(addr: SocketAddr, state: Arc<AdminState>) -> Result<()> {
    let listener = TcpListener::bind(&addr).await?;
    info!("Admin server listening on {}", addr);

    loop {
        let (stream, peer_addr) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let state = state.clone();

        tokio::task::spawn(async move {
            let service = service_fn(move |req| handle(req, state.clone()));
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                debug!("Error serving admin connection from {}: {}", peer_addr, e);
            }
        });
    }
}

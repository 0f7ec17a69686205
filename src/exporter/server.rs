//! Scrape listener serving `GET /metrics`.

use super::encoding;
use crate::errors::ExporterError;
use crate::registry::MetricRegistry;
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub struct MetricsServer {
    local_addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl MetricsServer {
    pub async fn bind(addr: SocketAddr, registry: Arc<MetricRegistry>) -> Result<Self, ExporterError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ExporterError::Bind { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ExporterError::Bind { addr, source })?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(run_http(listener, registry, shutdown_rx));
        info!(addr = %local_addr, "scrape listener started");

        Ok(Self {
            local_addr,
            shutdown: Some(shutdown_tx),
            handle,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting connections. Requests already being served run to completion.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Err(e) = (&mut self.handle).await {
            warn!(error = %e, "scrape listener task failed");
        }
        info!(addr = %self.local_addr, "scrape listener stopped");
    }
}

async fn run_http(listener: TcpListener, registry: Arc<MetricRegistry>, mut shutdown: oneshot::Receiver<()>) {
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, peer)) => {
                        let registry = Arc::clone(&registry);
                        tokio::spawn(async move {
                            if let Err(e) = serve_connection(stream, registry).await {
                                debug!(peer = %peer, error = %e, "scrape connection error");
                            }
                        });
                    }
                    Err(e) => warn!(error = %e, "scrape accept error"),
                }
            }
        }
    }
}

async fn serve_connection(stream: TcpStream, registry: Arc<MetricRegistry>) -> Result<(), hyper::Error> {
    let io = TokioIo::new(stream);
    let service = service_fn(move |req: Request<Incoming>| {
        let registry = Arc::clone(&registry);
        async move { Ok::<_, Infallible>(handle_request(req, registry).await) }
    });
    http1::Builder::new().serve_connection(io, service).await
}

async fn handle_request(req: Request<Incoming>, registry: Arc<MetricRegistry>) -> Response<Full<Bytes>> {
    if req.method() != Method::GET || req.uri().path() != "/metrics" {
        return response(StatusCode::NOT_FOUND, "text/plain", Bytes::from_static(b"not found"));
    }

    let samples = registry.gather().await;
    debug!(count = samples.len(), "serving scrape");
    match encoding::render_text(&samples) {
        Ok(body) => response(StatusCode::OK, prometheus::TEXT_FORMAT, Bytes::from(body)),
        Err(e) => {
            warn!(error = %e, "failed to render scrape");
            response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "text/plain",
                Bytes::from(e.to_string()),
            )
        }
    }
}

fn response(status: StatusCode, content_type: &'static str, body: Bytes) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

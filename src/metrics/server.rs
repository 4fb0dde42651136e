//! Prometheus metrics HTTP endpoint.
//!
//! A minimal HTTP/1 server exposing the collector registry in Prometheus
//! text format, plus a liveness check.

use crate::metrics::MetricsCollector;
use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus_client::encoding::text::encode;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

/// Prometheus metrics HTTP server.
pub struct MetricsServer {
    address: SocketAddr,
    path: String,
    collector: MetricsCollector,
}

impl MetricsServer {
    pub fn new(address: SocketAddr, path: String, collector: MetricsCollector) -> Self {
        Self {
            address,
            path,
            collector,
        }
    }

    /// Serve requests until shutdown. A bind failure only disables the
    /// endpoint; the proxy keeps running without it.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let listener = match TcpListener::bind(self.address).await {
            Ok(l) => l,
            Err(e) => {
                error!(error = %e, address = %self.address, "failed to bind metrics server");
                return;
            }
        };

        info!(address = %self.address, path = %self.path, "metrics server started");

        let collector = Arc::new(self.collector);
        let path = Arc::new(self.path);

        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    let (stream, _addr) = match accept_result {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            error!(error = %e, "failed to accept metrics connection");
                            continue;
                        }
                    };

                    let collector = Arc::clone(&collector);
                    let path = Arc::clone(&path);
                    tokio::spawn(async move {
                        let service = service_fn(move |req| {
                            let collector = Arc::clone(&collector);
                            let path = Arc::clone(&path);
                            async move { handle_request(req, &collector, &path).await }
                        });

                        if let Err(e) = http1::Builder::new()
                            .serve_connection(TokioIo::new(stream), service)
                            .await
                        {
                            debug!(error = %e, "metrics connection error");
                        }
                    });
                }

                _ = shutdown.recv() => {
                    info!("metrics server shutting down");
                    break;
                }
            }
        }
    }
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    collector: &MetricsCollector,
    metrics_path: &str,
) -> Result<Response<Full<Bytes>>, Infallible> {
    debug!(path = %req.uri().path(), method = %req.method(), "metrics request");

    if req.method() != Method::GET {
        return Ok(plain(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed\n"));
    }

    let response = match req.uri().path() {
        path if path == metrics_path => {
            let mut buffer = String::new();
            match encode(&mut buffer, collector.registry()) {
                Ok(()) => Response::builder()
                    .status(StatusCode::OK)
                    .header("content-type", "text/plain; version=0.0.4; charset=utf-8")
                    .body(Full::new(Bytes::from(buffer)))
                    .unwrap(),
                Err(e) => {
                    error!(error = %e, "failed to encode metrics");
                    plain(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "Failed to encode metrics\n",
                    )
                }
            }
        }
        "/healthz" => plain(StatusCode::OK, "OK\n"),
        _ => plain(StatusCode::NOT_FOUND, "Not found\n"),
    };

    Ok(response)
}

fn plain(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::new(Bytes::from(body)))
        .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_server_new() {
        let collector = MetricsCollector::new();
        let server = MetricsServer::new(
            "127.0.0.1:9090".parse().unwrap(),
            "/metrics".to_string(),
            collector,
        );
        assert_eq!(server.address, "127.0.0.1:9090".parse().unwrap());
        assert_eq!(server.path, "/metrics");
    }
}

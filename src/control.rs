//! The HTTP control surface for the worker pool.
//!
//! Thin request routing only: four GET routes map one-to-one onto pool
//! operations and reply with a small JSON message. Anything the pool
//! reports as a no-op -- starting twice, stopping an idle pool, a zero
//! scale factor -- is a benign 200, never an error.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full, combinators::BoxBody};
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::generator::pool::{Pool, ScaleOutcome, StartStatus, StopStatus};
use crate::signals::Shutdown;

fn default_binding_addr() -> SocketAddr {
    "0.0.0.0:8000".parse().expect("static addr parses")
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
/// Configuration for [`Control`].
pub struct Config {
    /// address -- IP plus port -- to bind to
    #[serde(default = "default_binding_addr")]
    pub binding_addr: SocketAddr,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            binding_addr: default_binding_addr(),
        }
    }
}

#[derive(thiserror::Error, Debug)]
/// Errors produced by [`Control`].
pub enum Error {
    /// IO error
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug)]
/// The control surface server.
pub struct Control {
    binding_addr: SocketAddr,
    pool: Arc<Pool>,
    shutdown: Shutdown,
}

impl Control {
    /// Create a new [`Control`] server instance.
    #[must_use]
    pub fn new(config: Config, pool: Arc<Pool>, shutdown: Shutdown) -> Self {
        Self {
            binding_addr: config.binding_addr,
            pool,
            shutdown,
        }
    }

    /// Run [`Control`] to completion
    ///
    /// This function serves control requests forever, unless a shutdown
    /// signal is received or an unrecoverable error is encountered.
    ///
    /// # Errors
    ///
    /// Function will return an error if binding to the assigned address
    /// fails.
    pub async fn run(mut self) -> Result<(), Error> {
        let listener = TcpListener::bind(self.binding_addr).await?;
        info!(addr = %self.binding_addr, "control surface listening");

        let mut connections = JoinSet::new();
        loop {
            tokio::select! {
                incoming = listener.accept() => {
                    let (stream, peer) = match incoming {
                        Ok(pair) => pair,
                        Err(err) => {
                            error!("failed to accept connection: {err}");
                            continue;
                        }
                    };
                    debug!(%peer, "control connection accepted");

                    let pool = Arc::clone(&self.pool);
                    connections.spawn(async move {
                        let service =
                            service_fn(move |req| srv(req, Arc::clone(&pool)));
                        let builder = auto::Builder::new(TokioExecutor::new());
                        if let Err(err) = builder
                            .serve_connection(TokioIo::new(stream), service)
                            .await
                        {
                            debug!(%peer, "control connection error: {err}");
                        }
                    });
                }
                () = self.shutdown.recv() => {
                    info!("shutdown signal received");
                    break;
                }
            }
        }

        drop(listener);
        while connections.join_next().await.is_some() {}
        Ok(())
    }
}

#[derive(Deserialize, Debug, Clone, Copy)]
#[serde(deny_unknown_fields)]
struct ScaleQuery {
    #[serde(default = "default_scale_factor")]
    n: u32,
}

fn default_scale_factor() -> u32 {
    2
}

/// Pull the scale factor out of the query string, defaulting to 2 on an
/// absent or malformed query.
fn scale_factor(query: Option<&str>) -> u32 {
    query
        .and_then(|q| serde_qs::from_str::<ScaleQuery>(q).ok())
        .map_or_else(default_scale_factor, |q| q.n)
}

fn start_message(status: StartStatus) -> String {
    match status {
        StartStatus::Started { count } => {
            format!("Traffic generation started with {count} workers.")
        }
        StartStatus::AlreadyRunning => "Traffic generation already running.".to_string(),
    }
}

fn scale_message(outcome: ScaleOutcome) -> String {
    format!(
        "{start} Target worker count is now {target}.",
        start = start_message(outcome.start),
        target = outcome.target
    )
}

async fn srv<B>(
    req: Request<B>,
    pool: Arc<Pool>,
) -> Result<Response<BoxBody<Bytes, hyper::Error>>, hyper::Error> {
    if req.method() != Method::GET {
        return Ok(json_response(
            StatusCode::METHOD_NOT_ALLOWED,
            "Only GET is supported.",
        ));
    }

    let response = match req.uri().path() {
        "/start" => {
            let status = pool.start().await;
            json_response(StatusCode::OK, &start_message(status))
        }
        "/stop" => {
            let message = match pool.stop().await {
                StopStatus::Stopped { .. } => "Traffic generation stopped.",
                StopStatus::NotRunning => "No active traffic generation.",
            };
            json_response(StatusCode::OK, message)
        }
        "/increase" => {
            let outcome = pool.increase(scale_factor(req.uri().query())).await;
            json_response(StatusCode::OK, &scale_message(outcome))
        }
        "/decrease" => {
            let outcome = pool.decrease(scale_factor(req.uri().query())).await;
            json_response(StatusCode::OK, &scale_message(outcome))
        }
        other => {
            debug!("unknown control path: {other:?}");
            json_response(StatusCode::NOT_FOUND, "No such operation.")
        }
    };

    Ok(response)
}

fn json_response(status: StatusCode, message: &str) -> Response<BoxBody<Bytes, hyper::Error>> {
    let body = json!({ "message": message }).to_string();
    let builder = Response::builder()
        .status(status)
        .header("content-type", "application/json");

    match builder.body(full(body)) {
        Ok(response) => response,
        Err(err) => {
            error!("failed to build response: {err}");
            match Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .header("content-type", "text/plain")
                .body(full("Internal error building response"))
            {
                Ok(response) => response,
                Err(inner_err) => {
                    // Building a fallback failed, panic.
                    panic!("Catastrophic error: {inner_err}");
                }
            }
        }
    }
}

fn full<T: Into<Bytes>>(chunk: T) -> BoxBody<Bytes, hyper::Error> {
    Full::new(chunk.into())
        .map_err(|never| match never {})
        .boxed()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use http_body_util::BodyExt;
    use hyper::{Request, StatusCode};

    use super::{scale_factor, srv};
    use crate::catalog::Catalog;
    use crate::generator::pool::{Config as PoolConfig, Pool};

    fn test_pool() -> Arc<Pool> {
        Arc::new(Pool::new(
            PoolConfig {
                endpoint: "ws://127.0.0.1:1/ws".to_string(),
                default_workers: 2,
                max_workers: 4,
                min_delay: 0.001,
                max_delay: 0.002,
                reconnect_delay: 0.005,
                stagger_min: 0.0,
                stagger_max: 0.001,
                seed: Some(1),
            },
            Arc::new(Catalog::fallback()),
        ))
    }

    async fn get(pool: &Arc<Pool>, path_and_query: &str) -> (StatusCode, String) {
        let req = Request::builder()
            .uri(path_and_query)
            .body(())
            .expect("request builds");
        let response = srv(req, Arc::clone(pool)).await.expect("srv is infallible");

        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body collects")
            .to_bytes();
        (status, String::from_utf8_lossy(&bytes).to_string())
    }

    #[test]
    fn scale_factor_parses_and_defaults() {
        assert_eq!(scale_factor(Some("n=4")), 4);
        assert_eq!(scale_factor(Some("nonsense")), 2);
        assert_eq!(scale_factor(None), 2);
    }

    #[tokio::test]
    async fn start_stop_round_trip() {
        let pool = test_pool();

        let (status, body) = get(&pool, "/start").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("started with 2 workers"), "body: {body}");

        let (status, body) = get(&pool, "/start").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("already running"), "body: {body}");

        let (status, body) = get(&pool, "/stop").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("stopped"), "body: {body}");

        let (status, body) = get(&pool, "/stop").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("No active traffic generation"), "body: {body}");
    }

    #[tokio::test]
    async fn increase_reports_new_target() {
        let pool = test_pool();

        let (status, body) = get(&pool, "/increase?n=3").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("Target worker count is now 6"), "body: {body}");

        let (_, _) = get(&pool, "/stop").await;
    }

    #[tokio::test]
    async fn unknown_route_is_not_found() {
        let pool = test_pool();
        let (status, _body) = get(&pool, "/restart").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}

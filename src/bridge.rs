//! The ingestion bridge.
//!
//! Accepts one persistent `WebSocket` connection per client and relays every
//! received text frame into Kafka, waiting for each publish to be confirmed
//! before reading the next frame from that connection. The bridge holds no
//! state across clients: a disconnect tears down that connection task only
//! and the accept loop keeps serving.
//!
//! ## Metrics
//!
//! `connection_accepted`: Incoming connections received
//! `messages_received`: Text frames received
//! `bytes_received`: Total frame bytes received
//! `messages_published`: Frames confirmed by the broker
//! `publish_failure`: Frames the broker did not confirm
//!

use std::collections::HashMap;
use std::net::SocketAddr;

use futures::StreamExt;
use metrics::counter;
use rdkafka::ClientConfig;
use rdkafka::config::FromClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::signals::Shutdown;

/// Fixed logical key under which every relayed message is published.
const RECORD_KEY: &str = "log";

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
/// Configuration for [`Bridge`].
pub struct Config {
    /// address -- IP plus port -- to bind to
    pub binding_addr: SocketAddr,
    /// Bootstrap server for Kafka. Used identically like the flag of the
    /// same name present on Kafka CLI tooling.
    pub bootstrap_server: String,
    /// Topic to publish relayed messages to.
    pub topic: String,
    /// Map of rdkafka-specific overrides to apply to the producer.
    #[serde(default)]
    pub producer_config: Option<HashMap<String, String>>,
}

#[derive(thiserror::Error, Debug)]
/// Errors produced by [`Bridge`].
pub enum Error {
    /// IO error
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// Creating the Kafka producer failed.
    #[error("Kafka producer error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),
}

#[derive(Debug)]
/// The ingestion bridge server.
pub struct Bridge {
    config: Config,
    shutdown: Shutdown,
    metric_labels: Vec<(String, String)>,
}

impl Bridge {
    /// Create a new [`Bridge`] server instance.
    #[must_use]
    pub fn new(config: Config, shutdown: Shutdown) -> Self {
        let metric_labels = vec![
            ("component".to_string(), "bridge".to_string()),
            ("topic".to_string(), config.topic.clone()),
        ];

        Self {
            config,
            shutdown,
            metric_labels,
        }
    }

    /// Run [`Bridge`] to completion
    ///
    /// This function runs the bridge forever, unless a shutdown signal is
    /// received or an unrecoverable error is encountered.
    ///
    /// # Errors
    ///
    /// Function will return an error if binding to the assigned address
    /// fails or the Kafka producer cannot be created.
    pub async fn run(self) -> Result<(), Error> {
        let listener = TcpListener::bind(self.config.binding_addr).await?;
        info!(addr = %self.config.binding_addr, "listening for client connections");
        self.serve(listener).await
    }

    async fn serve(mut self, listener: TcpListener) -> Result<(), Error> {
        let mut client_config = ClientConfig::new();
        let mut values = self.config.producer_config.clone().unwrap_or_default();
        values.insert(
            "bootstrap.servers".to_string(),
            self.config.bootstrap_server.clone(),
        );
        for (k, v) in values.drain() {
            client_config.set(k, v);
        }
        let producer = FutureProducer::from_config(&client_config)?;

        let mut connections = JoinSet::new();
        loop {
            tokio::select! {
                conn = listener.accept() => {
                    match conn {
                        Ok((socket, peer)) => {
                            counter!("connection_accepted", &self.metric_labels).increment(1);
                            connections.spawn(handle_client(
                                socket,
                                peer,
                                producer.clone(),
                                self.config.topic.clone(),
                                self.shutdown.clone(),
                                self.metric_labels.clone(),
                            ));
                        }
                        Err(err) => error!("failed to accept connection: {err}"),
                    }
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

/// Serve one client for the lifetime of its connection.
///
/// Per-connection backpressure: at most one publish is in flight, and the
/// next frame is not read until the broker confirms the previous one. Any
/// unexpected mid-loop error closes this connection and nothing else.
async fn handle_client(
    socket: TcpStream,
    peer: SocketAddr,
    producer: FutureProducer,
    topic: String,
    mut shutdown: Shutdown,
    metric_labels: Vec<(String, String)>,
) {
    let mut stream = match accept_async(socket).await {
        Ok(stream) => stream,
        Err(err) => {
            warn!(%peer, "websocket handshake failed: {err}");
            return;
        }
    };
    info!(%peer, "client connected");

    loop {
        tokio::select! {
            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        counter!("messages_received", &metric_labels).increment(1);
                        counter!("bytes_received", &metric_labels).increment(text.len() as u64);

                        let record = FutureRecord::to(&topic)
                            .key(RECORD_KEY)
                            .payload(text.as_str());
                        match producer.send(record, Timeout::Never).await {
                            Ok((partition, offset)) => {
                                counter!("messages_published", &metric_labels).increment(1);
                                debug!(%peer, partition, offset, "message published");
                            }
                            Err((err, _message)) => {
                                counter!("publish_failure", &metric_labels).increment(1);
                                warn!(%peer, "publish failed, dropping client: {err}");
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!(%peer, "client disconnected, ready for new connections");
                        break;
                    }
                    Some(Ok(_)) => {
                        // Pings and pongs are answered by the protocol layer.
                    }
                    Some(Err(err)) => {
                        warn!(%peer, "connection error: {err}");
                        break;
                    }
                }
            }
            () = shutdown.recv() => {
                let _ = stream.close(None).await;
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;
    use tokio_tungstenite::connect_async;

    use super::{Bridge, Config};
    use crate::signals::Shutdown;

    fn test_config(binding_addr: std::net::SocketAddr) -> Config {
        Config {
            binding_addr,
            // No broker behind this address; producer creation is lazy and
            // nothing is published in this test.
            bootstrap_server: "127.0.0.1:1".to_string(),
            topic: "video-stream-logs".to_string(),
            producer_config: None,
        }
    }

    #[tokio::test]
    async fn serves_successive_clients_without_restart() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");

        let shutdown = Shutdown::new();
        let bridge = Bridge::new(test_config(addr), shutdown.clone());
        let handle = tokio::spawn(bridge.serve(listener));

        for _ in 0..3 {
            let (mut stream, _response) = connect_async(format!("ws://{addr}/ws"))
                .await
                .expect("handshake succeeds");
            stream.close(None).await.expect("clean close");
        }

        shutdown.signal().expect("bridge is alive");
        handle.await.expect("bridge task").expect("bridge run");
    }

    #[tokio::test]
    async fn shutdown_closes_open_connections() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");

        let shutdown = Shutdown::new();
        let bridge = Bridge::new(test_config(addr), shutdown.clone());
        let handle = tokio::spawn(bridge.serve(listener));

        let (_stream, _response) = connect_async(format!("ws://{addr}/ws"))
            .await
            .expect("handshake succeeds");

        shutdown.signal().expect("bridge is alive");
        handle.await.expect("bridge task").expect("bridge run");
    }
}

//! The simulated viewer worker.
//!
//! ## Metrics
//!
//! `connection_failure`: Number of failed connection attempts
//! `request_failure`: Number of failed sends; each occurrence causes a reconnect
//! `events_sent`: Events sent successfully
//! `sessions_started`: Watch sessions begun
//! `sessions_stopped`: Watch sessions ended by an explicit stop event
//!

use std::sync::Arc;

use futures::SinkExt;
use metrics::counter;
use rand::{Rng, rngs::StdRng};
use tokio::net::TcpStream;
use tokio::time::{Duration, sleep};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{debug, info, trace};

use crate::catalog::Catalog;
use crate::event::EventKind;
use crate::session::Session;
use crate::signals::Shutdown;

type Connection = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(thiserror::Error, Debug)]
/// Errors produced by [`Viewer`].
pub enum Error {
    /// Event serialization failed.
    #[error("failed to serialize event: {0}")]
    Json(#[from] serde_json::Error),
}

/// One simulated viewer.
///
/// Runs as an independent tokio task. Transport failures are never fatal:
/// the worker drops its connection, waits a fixed backoff and reconnects,
/// carrying the in-progress session so it resumes from its current watched
/// time rather than restarting at zero.
#[derive(Debug)]
pub(crate) struct Viewer {
    /// Identity of this worker within its pool, also the wire `user_id`.
    pub(crate) id: u32,
    /// `WebSocket` URL of the ingestion endpoint.
    pub(crate) endpoint: String,
    /// Fixed backoff between reconnection attempts.
    pub(crate) reconnect_delay: Duration,
    /// Bounds of the pacing delay between events, seconds.
    pub(crate) min_delay: f64,
    pub(crate) max_delay: f64,
    /// Shared read-only catalog to draw items from.
    pub(crate) catalog: Arc<Catalog>,
    /// Source of all session randomness, seeded per worker.
    pub(crate) rng: StdRng,
    pub(crate) shutdown: Shutdown,
    pub(crate) metric_labels: Vec<(String, String)>,
}

impl Viewer {
    /// Run this [`Viewer`] until the pool signals shutdown.
    ///
    /// # Errors
    ///
    /// Function will return an error if an event cannot be serialized, which
    /// indicates a programming error rather than an operational condition.
    pub(crate) async fn spin(mut self) -> Result<(), Error> {
        let user_id = format!("User-{id}", id = self.id);
        let mut connection: Option<Connection> = None;
        let mut session: Option<Session> = None;

        loop {
            if self.shutdown.try_recv() {
                break;
            }

            // (Re)establish the outbound connection if the last one died.
            let Some(ref mut conn) = connection else {
                match connect_async(self.endpoint.as_str()).await {
                    Ok((stream, _response)) => {
                        debug!(worker = self.id, "connected to ingestion endpoint");
                        connection = Some(stream);
                    }
                    Err(err) => {
                        trace!(
                            worker = self.id,
                            "failed to connect to {endpoint}: {err}",
                            endpoint = self.endpoint
                        );

                        let mut error_labels = self.metric_labels.clone();
                        error_labels.push(("error".to_string(), err.to_string()));
                        counter!("connection_failure", &error_labels).increment(1);
                        if self.pause(self.reconnect_delay).await {
                            break;
                        }
                    }
                }
                continue;
            };

            // A session ends by explicit stop or by running out of item;
            // everything else -- reconnects included -- carries it forward
            // from its current watched time.
            if session.as_ref().is_some_and(Session::is_complete) {
                session = None;
            }
            let sess = session.get_or_insert_with(|| {
                let item = self.catalog.draw(&mut self.rng).clone();
                debug!(
                    worker = self.id,
                    video = %item.id,
                    duration = item.duration_seconds,
                    "starting session"
                );
                counter!("sessions_started", &self.metric_labels).increment(1);
                Session::new(user_id.clone(), item)
            });

            let event = sess.tick(&mut self.rng);
            let frame = serde_json::to_string(&event)?;
            if let Err(err) = conn.send(Message::Text(frame)).await {
                trace!(worker = self.id, "send failed: {err}");

                let mut error_labels = self.metric_labels.clone();
                error_labels.push(("error".to_string(), err.to_string()));
                counter!("request_failure", &error_labels).increment(1);
                connection = None;
                if self.pause(self.reconnect_delay).await {
                    break;
                }
                continue;
            }
            counter!("events_sent", &self.metric_labels).increment(1);

            // Pacing draws come from the ambient rng so the session event
            // stream depends only on the worker seed.
            let pacing =
                Duration::from_secs_f64(rand::rng().random_range(self.min_delay..=self.max_delay));
            if self.pause(pacing).await {
                break;
            }

            if event.kind == EventKind::Stop {
                counter!("sessions_stopped", &self.metric_labels).increment(1);
            }
        }

        if let Some(mut stream) = connection.take() {
            let _ = stream.close(None).await;
        }
        info!(worker = self.id, "shutdown signal received");
        Ok(())
    }

    /// Sleep for `delay` unless shutdown arrives first. Returns true when
    /// the worker should exit.
    async fn pause(&mut self, delay: Duration) -> bool {
        tokio::select! {
            () = sleep(delay) => false,
            () = self.shutdown.recv() => true,
        }
    }
}

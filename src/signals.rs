//! Module to control shutdown in binge.
//!
//! Both halves of this program run open-ended loops: viewer workers emit
//! events until told otherwise and the ingestion bridge accepts connections
//! forever. Controlled teardown -- a pool stop, a SIGINT drain -- is the
//! responsibility of the code in this module, specifically [`Shutdown`].

use std::sync::Arc;

use tokio::sync::broadcast;

#[derive(thiserror::Error, Debug)]
/// Errors produced by [`Shutdown`]
pub enum Error {
    /// The mechanism underlaying [`Shutdown`] failed catastrophically.
    #[error("shutdown broadcast failed: {0}")]
    Broadcast(#[from] broadcast::error::SendError<()>),
}

#[derive(Debug)]
/// Mechanism to signal cooperative shutdown.
///
/// Every loop that participates in controlled teardown holds a clone of this
/// struct and polls it at its suspension points. The signal is one-way and
/// latched: once received, all further receives return immediately.
pub struct Shutdown {
    /// The broadcast sender, singleton for all `Shutdown` instances derived
    /// from the same root `Shutdown`.
    sender: Arc<broadcast::Sender<()>>,

    /// The receive half of the channel used to listen for shutdown. One per
    /// instance.
    notify: broadcast::Receiver<()>,

    /// `true` if the shutdown signal has been received
    received: bool,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    /// Create a new `Shutdown` instance. There should be only one call to this
    /// function per teardown domain and all subsequent instances should be
    /// created through clones.
    #[must_use]
    pub fn new() -> Self {
        let (shutdown_snd, shutdown_rcv) = broadcast::channel(1);

        Self {
            sender: Arc::new(shutdown_snd),
            notify: shutdown_rcv,
            received: false,
        }
    }

    /// Receive the shutdown notice. This function will block if a notice has
    /// not already been sent.
    pub async fn recv(&mut self) {
        // If the shutdown signal has already been received, then return
        // immediately.
        if self.received {
            return;
        }

        // Cannot receive a "lag error" as only one value is ever sent.
        let _ = self.notify.recv().await;

        // Remember that the signal has been received.
        self.received = true;
    }

    /// Check for the shutdown notice without blocking, returning `true` if it
    /// has been sent. Useful at loop boundaries where awaiting would delay the
    /// work at hand.
    pub fn try_recv(&mut self) -> bool {
        if self.received {
            return true;
        }

        match self.notify.try_recv() {
            Ok(()) | Err(broadcast::error::TryRecvError::Closed) => {
                self.received = true;
                true
            }
            Err(_) => false,
        }
    }

    /// Send the shutdown signal through to this and all derived `Shutdown`
    /// instances. Returns the number of active instances, or error.
    ///
    /// # Errors
    ///
    /// Function will return an error if there are no live instances left to
    /// receive the signal.
    pub fn signal(&self) -> Result<usize, Error> {
        Ok(self.sender.send(())?)
    }
}

impl Clone for Shutdown {
    fn clone(&self) -> Self {
        let notify = self.sender.subscribe();

        Self {
            received: self.received,
            notify,
            sender: Arc::clone(&self.sender),
        }
    }
}

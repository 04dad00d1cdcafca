//! Queue poller loop
//!
//! Each poller repeatedly fetches a batch from the queue and pushes the
//! messages onto the pool's shared output channel. Fetch errors go to the
//! error channel and are followed by a backoff wait owned by this poller.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, instrument, trace, warn};

use super::latch::Latch;
use super::message::Message;
use super::pool::PoolContext;
use crate::reliability::Backoff;
use crate::transport::{FetchRequest, TransportError};

/// Outcome of pushing onto a shared channel
enum Push {
    Delivered,
    Stopped,
    Closed,
}

/// A single poller task
pub(crate) struct QueuePoller {
    id: usize,
    context: Arc<PoolContext>,
    request: FetchRequest,
    backoff: Backoff,
    stop: Arc<Latch>,
    messages: mpsc::Sender<Message>,
    errors: mpsc::Sender<TransportError>,
}

impl QueuePoller {
    pub(crate) fn new(
        id: usize,
        context: Arc<PoolContext>,
        request: FetchRequest,
        backoff: Backoff,
        stop: Arc<Latch>,
        messages: mpsc::Sender<Message>,
        errors: mpsc::Sender<TransportError>,
    ) -> Self {
        Self {
            id,
            context,
            request,
            backoff,
            stop,
            messages,
            errors,
        }
    }

    /// Poll until the stop latch is set
    ///
    /// An in-flight fetch is never interrupted; the latch is checked after it
    /// returns. Waits and blocked pushes end early once the latch is set.
    #[instrument(skip(self), fields(poller_id = self.id, queue_url = %self.context.queue_url))]
    pub(crate) async fn run(mut self) {
        debug!("Poller listening for messages");

        'poll: while !self.stop.is_set() {
            match self.context.receiver.fetch(self.request.clone()).await {
                Ok(batch) => {
                    self.backoff.reset();

                    if batch.is_empty() {
                        trace!("Fetch returned no messages");
                        // Long-poll wait paces the loop; receivers without
                        // one return immediately
                        tokio::task::yield_now().await;
                        continue;
                    }

                    debug!(count = batch.len(), "Found messages");
                    for raw in batch {
                        let message = Message::new(raw, &self.context);
                        match self.push_message(message).await {
                            Push::Delivered => {}
                            Push::Stopped => break 'poll,
                            Push::Closed => {
                                debug!("Message receiver dropped");
                                break 'poll;
                            }
                        }
                    }
                }
                Err(error) => {
                    let delay = self.backoff.next();
                    warn!(
                        error = %error,
                        attempt = self.backoff.attempt(),
                        delay_ms = delay.as_millis() as u64,
                        "Fetch failed, backing off"
                    );

                    match self.push_error(error).await {
                        Push::Stopped => break,
                        Push::Closed => trace!("Error receiver dropped"),
                        Push::Delivered => {}
                    }

                    if self.wait(delay).await {
                        break;
                    }
                }
            }
        }

        debug!("Poller exited");
    }

    async fn push_message(&self, message: Message) -> Push {
        tokio::select! {
            biased;
            sent = self.messages.send(message) => match sent {
                Ok(()) => Push::Delivered,
                Err(_) => Push::Closed,
            },
            _ = self.stop.wait() => Push::Stopped,
        }
    }

    async fn push_error(&self, error: TransportError) -> Push {
        tokio::select! {
            biased;
            sent = self.errors.send(error) => match sent {
                Ok(()) => Push::Delivered,
                Err(_) => Push::Closed,
            },
            _ = self.stop.wait() => Push::Stopped,
        }
    }

    /// Sleep for `delay`, returning true if the pool was stopped meanwhile
    async fn wait(&self, delay: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(delay) => false,
            _ = self.stop.wait() => {
                debug!("Stop requested during backoff");
                true
            }
        }
    }
}

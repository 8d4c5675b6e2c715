use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{Bus, BusError, TopicHandler, TopicMessage};

/// In-process stand-in for a message broker (spec §4.2). No broker crate
/// appears anywhere in the example pack, so rather than pull in an
/// unvetted dependency this models the same contract — per-topic FIFO
/// ordering, at-least-once delivery, nack-triggered redelivery — on top of
/// `tokio::sync::mpsc`, the same primitive the teacher already builds its
/// scheduler loops on.
const REDELIVER_DELAY: Duration = Duration::from_secs(2);
/// The in-process model bounds redeliveries (a real broker would retry
/// indefinitely via its own DLQ policy); this avoids a single poison
/// message spinning a consumer task forever.
const MAX_REDELIVERIES: u32 = 5;

struct Envelope {
    body: Vec<u8>,
    attempt: u32,
}

pub struct InMemoryBus {
    senders: StdMutex<HashMap<String, mpsc::UnboundedSender<Envelope>>>,
}

impl InMemoryBus {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            senders: StdMutex::new(HashMap::new()),
        })
    }
}

#[async_trait]
impl Bus for InMemoryBus {
    fn register_topic_handler(&self, topic: &str, handler: Arc<dyn TopicHandler>) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.lock().unwrap().insert(topic.to_string(), tx);
        // Spawned eagerly rather than deferred to `start()`, which remains
        // a no-op hook kept only for symmetry with the spec's Bus
        // lifecycle (`Start()`/`Close()`). Dropping all senders in
        // `close()` drains the queue (recv returns the backlog before
        // `None`) and lets this task return on its own.
        tokio::spawn(consume(topic.to_string(), rx, handler));
    }

    async fn publish_on_topic(&self, message: &dyn TopicMessage) -> Result<(), BusError> {
        let body = message.body()?;
        let topic = message.topic_name();
        let sender = self.senders.lock().unwrap().get(topic).cloned();
        match sender {
            Some(tx) => tx
                .send(Envelope { body, attempt: 0 })
                .map_err(|_| BusError::PublishFailed {
                    topic: topic.to_string(),
                    reason: "no active consumer".to_string(),
                }),
            None => {
                tracing::debug!(topic, "publish with no registered handler, dropping");
                Ok(())
            }
        }
    }

    async fn start(&self) {}

    async fn close(&self) {
        self.senders.lock().unwrap().clear();
    }
}

async fn consume(
    topic: String,
    mut rx: mpsc::UnboundedReceiver<Envelope>,
    handler: Arc<dyn TopicHandler>,
) {
    while let Some(envelope) = rx.recv().await {
        let failed = {
            let span = tracing::info_span!("bus_handler", topic = %topic, attempt = envelope.attempt);
            let _enter = span.enter();
            handler.handle(&envelope.body).await.err()
        };
        if let Some(e) = failed {
            if envelope.attempt < MAX_REDELIVERIES {
                tracing::warn!(error = %e, attempt = envelope.attempt, "handler nacked, scheduling redelivery");
                let next = Envelope {
                    body: envelope.body.clone(),
                    attempt: envelope.attempt + 1,
                };
                tokio::spawn(redeliver(topic.clone(), next, Arc::clone(&handler)));
            } else {
                tracing::error!(error = %e, "handler failed after max redeliveries, dropping message");
            }
        }
    }
}

/// Sleeps, retries, and on repeated failure reschedules itself (as a loop,
/// not recursion, since an `async fn` can't call itself without boxing)
/// until `envelope.attempt` reaches `MAX_REDELIVERIES`. Runs off the main
/// consumer task so a sleeping redelivery never blocks the topic's queue
/// from processing the next message.
async fn redeliver(topic: String, mut envelope: Envelope, handler: Arc<dyn TopicHandler>) {
    loop {
        tokio::time::sleep(REDELIVER_DELAY).await;
        let failed = {
            let span = tracing::info_span!("bus_handler", topic = %topic, attempt = envelope.attempt);
            let _enter = span.enter();
            handler.handle(&envelope.body).await.err()
        };
        let Some(e) = failed else { return };
        if envelope.attempt < MAX_REDELIVERIES {
            tracing::warn!(error = %e, attempt = envelope.attempt, "handler nacked, scheduling redelivery");
            envelope.attempt += 1;
        } else {
            tracing::error!(error = %e, "handler failed after max redeliveries, dropping message");
            return;
        }
    }
}

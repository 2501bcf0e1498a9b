//! Stream events and fan-out tees.
//!
//! A [`StreamEvent`] sequence has exactly one terminal event — `Finish` or `Error`
//! (§3 invariant). `text-delta` is only valid for ports declaring `x-stream: append`
//! unless the task explicitly advertises delta streaming; the scheduler enforces
//! this when it builds a consumer's `inputStreams` map (§4.2).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::warn;

use crate::error::GraphError;

/// Discriminated stream event union (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum StreamEvent {
    /// Concatenate `text_delta` onto the accumulator for `port`.
    #[serde(rename = "text-delta")]
    TextDelta { port: String, text_delta: String },

    /// Opaque incremental object update.
    #[serde(rename = "object-delta")]
    ObjectDelta { port: String, patch: Value },

    /// Replaces the task's current output snapshot.
    Snapshot { data: Value },

    /// Terminates the stream with the authoritative (possibly partial) output.
    Finish { data: Value },

    /// Terminates the stream with failure. `err` is a serialized error message —
    /// the runner reconstructs a [`GraphError::Failed`] from it at the boundary.
    Error { err: String },
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Finish { .. } | StreamEvent::Error { .. })
    }

    pub fn as_error(&self) -> Option<&str> {
        match self {
            StreamEvent::Error { err } => Some(err),
            _ => None,
        }
    }
}

/// Default per-consumer tee buffer capacity. Overflow beyond this is a fatal
/// `BACKPRESSURE` error (§4.2).
pub const DEFAULT_TEE_BUFFER: usize = 64;

/// Duplicate a stream of events into `n` independent, backpressure-bounded
/// consumer channels, preserving emission order within each branch (§5 "Ordering
/// guarantees": "each consumer observes events in the producer's emission order;
/// there is no cross-consumer synchronisation").
///
/// Returns one `Receiver` per consumer. The caller must feed events via the
/// returned sender; when every consumer branch has been read, the tee task exits.
pub fn tee(n: usize, buffer: usize) -> (mpsc::Sender<StreamEvent>, Vec<mpsc::Receiver<StreamEvent>>) {
    let (producer_tx, mut producer_rx) = mpsc::channel::<StreamEvent>(buffer.max(1));
    let mut senders = Vec::with_capacity(n);
    let mut receivers = Vec::with_capacity(n);
    for _ in 0..n {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        senders.push(tx);
        receivers.push(rx);
    }

    tokio::spawn(async move {
        while let Some(event) = producer_rx.recv().await {
            for (i, sender) in senders.iter().enumerate() {
                // try_send: a consumer slower than its bounded buffer allows is a
                // fatal BACKPRESSURE condition (§4.2), not a point to silently stall
                // the whole tee and starve faster consumers.
                if sender.try_send(event.clone()).is_err() {
                    warn!(consumer = i, "tee buffer overflow, consumer lagging");
                    let overflow = StreamEvent::Error {
                        err: GraphError::Backpressure {
                            producer: "tee".to_string(),
                            port: format!("consumer-{i}"),
                        }
                        .to_string(),
                    };
                    let _ = sender.send(overflow).await;
                }
            }
            if event.is_terminal() {
                break;
            }
        }
    });

    (producer_tx, receivers)
}

/// Fan an already-live single-producer stream out to `n` independent,
/// backpressure-bounded consumers. Used by the scheduler to distribute a streaming
/// task's live events to every eager downstream edge (§4.2 "fan-out tees").
pub fn fan_out(mut source: mpsc::Receiver<StreamEvent>, n: usize, buffer: usize) -> Vec<mpsc::Receiver<StreamEvent>> {
    let mut senders = Vec::with_capacity(n);
    let mut receivers = Vec::with_capacity(n);
    for _ in 0..n {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        senders.push(tx);
        receivers.push(rx);
    }

    tokio::spawn(async move {
        while let Some(event) = source.recv().await {
            for (i, sender) in senders.iter().enumerate() {
                if sender.try_send(event.clone()).is_err() {
                    warn!(consumer = i, "tee buffer overflow, consumer lagging");
                    let overflow = StreamEvent::Error {
                        err: GraphError::Backpressure {
                            producer: "fan_out".to_string(),
                            port: format!("consumer-{i}"),
                        }
                        .to_string(),
                    };
                    let _ = sender.send(overflow).await;
                }
            }
            if event.is_terminal() {
                break;
            }
        }
    });

    receivers
}

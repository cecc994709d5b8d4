//! Server-Sent Events Wire Encoding
//!
//! Every event goes out as one `data: <json>\n\n` frame; the response ends
//! with `data: [DONE]\n\n`.

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;

use crate::events::StreamEvent;

/// Terminal frame
pub const DONE_FRAME: &str = "data: [DONE]\n\n";

/// How a pump ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PumpOutcome {
    /// Every event and the terminal frame were written
    Completed,
    /// The sink closed first
    ClientDisconnected,
}

/// Encode one event as an SSE frame
#[must_use]
pub fn encode_event(event: &StreamEvent) -> Bytes {
    match serde_json::to_string(event) {
        Ok(json) => Bytes::from(format!("data: {json}\n\n")),
        Err(e) => {
            tracing::error!(error = %e, kind = event.kind(), "Failed to encode stream event");
            let fallback = StreamEvent::error(event.model().unwrap_or_default(), "failed to encode event");
            let json = serde_json::to_string(&fallback).unwrap_or_default();
            Bytes::from(format!("data: {json}\n\n"))
        }
    }
}

/// Write `events` into `sink` as frames, followed by [`DONE_FRAME`]
///
/// Stops as soon as the sink is closed, dropping `events` so any upstream
/// work behind it is cancelled. The sink is watched while waiting for the
/// next event too, so a quiet upstream does not hold a dead client open.
pub async fn pump<S>(events: S, sink: &mpsc::Sender<Bytes>) -> PumpOutcome
where
    S: Stream<Item = StreamEvent>,
{
    futures::pin_mut!(events);

    loop {
        let next = tokio::select! {
            () = sink.closed() => {
                tracing::info!("Client disconnected while waiting for upstream");
                return PumpOutcome::ClientDisconnected;
            }
            event = events.next() => event,
        };
        let Some(event) = next else { break };

        if sink.send(encode_event(&event)).await.is_err() {
            tracing::info!("Client disconnected mid-stream");
            return PumpOutcome::ClientDisconnected;
        }
    }

    if sink.send(Bytes::from_static(DONE_FRAME.as_bytes())).await.is_err() {
        return PumpOutcome::ClientDisconnected;
    }
    PumpOutcome::Completed
}

//! Push Channel client.
//!
//! One WebSocket connection per authenticated session. Inbound text frames
//! are JSON envelopes `{"type": "reading"|"alert"|"topology", "payload": ...}`
//! and are forwarded, decoded, to the reconciler. The channel gives no
//! delivery or replay guarantee, so after a drop we simply reconnect and let
//! the reconciler's idempotent merges absorb duplicates.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::models::{Alert, NetworkLink, SensorReading};
use crate::service::HttpDataService;

// ---

/// Typed inbound push message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "lowercase")]
pub enum PushEvent {
    Reading(SensorReading),
    Alert(Alert),
    /// Full link set. Topology pushes are snapshots, not deltas.
    Topology(Vec<NetworkLink>),
}

impl PushEvent {
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[derive(Debug, Error)]
pub enum PushError {
    #[error("websocket error: {0}")]
    Socket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("event receiver closed")]
    ReceiverClosed,
}

/// Where the channel gets the bearer token it connects with.
pub trait TokenSource: Send + Sync {
    /// `None` once the session is gone.
    fn access_token(&self) -> impl Future<Output = Option<String>> + Send;
}

impl TokenSource for HttpDataService {
    async fn access_token(&self) -> Option<String> {
        HttpDataService::access_token(self).await
    }
}

/// How a single connection ended.
enum SessionEnd {
    Closed,
    Shutdown,
}

pub struct PushChannel {
    // ---
    url: Url,
    reconnect_delay: Duration,
    keepalive: Duration,
}

impl PushChannel {
    // ---
    pub fn new(url: Url, reconnect_delay: Duration, keepalive: Duration) -> Self {
        Self {
            url,
            reconnect_delay,
            keepalive,
        }
    }

    /// Connect, forward events, reconnect on failure.
    ///
    /// Stops when `shutdown` flips to `true` (or its sender is dropped), when
    /// the session has no access token left, or when `events` is closed.
    pub async fn run<T: TokenSource>(
        self,
        tokens: Arc<T>,
        events: mpsc::Sender<PushEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        // ---
        loop {
            if *shutdown.borrow() {
                break;
            }

            let Some(token) = tokens.access_token().await else {
                info!("No active session, push channel stopping");
                break;
            };
            let mut url = self.url.clone();
            url.query_pairs_mut().append_pair("token", &token);

            match self.connection(&url, &events, &mut shutdown).await {
                Ok(SessionEnd::Shutdown) => break,
                Ok(SessionEnd::Closed) => info!("Push channel closed by server"),
                Err(PushError::ReceiverClosed) => {
                    debug!("Push event receiver dropped, stopping");
                    break;
                }
                Err(e) => warn!("Push channel error: {}", e),
            }

            debug!("Reconnecting push channel in {:?}", self.reconnect_delay);
            tokio::select! {
                _ = tokio::time::sleep(self.reconnect_delay) => {}
                _ = shutdown.changed() => break,
            }
        }
        info!("Push channel stopped");
    }

    async fn connection(
        &self,
        url: &Url,
        events: &mpsc::Sender<PushEvent>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<SessionEnd, PushError> {
        // ---
        let (ws_stream, _) = connect_async(url.as_str()).await?;
        info!("Push channel connected to {}", self.url);
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        let mut keepalive = tokio::time::interval(self.keepalive);
        keepalive.tick().await;

        loop {
            tokio::select! {
                msg = ws_receiver.next() => match msg {
                    Some(Ok(Message::Text(text))) => forward(&text, events).await?,
                    Some(Ok(Message::Close(_))) | None => return Ok(SessionEnd::Closed),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                },
                _ = keepalive.tick() => {
                    ws_sender.send(Message::Ping(Vec::new())).await?;
                }
                _ = shutdown.changed() => {
                    if let Err(e) = ws_sender.send(Message::Close(None)).await {
                        debug!("Close frame not sent: {}", e);
                    }
                    return Ok(SessionEnd::Shutdown);
                }
            }
        }
    }
}

/// Decode one frame and hand it to the reconciler. Malformed frames are
/// logged and dropped.
async fn forward(text: &str, events: &mpsc::Sender<PushEvent>) -> Result<(), PushError> {
    // ---
    match PushEvent::decode(text) {
        Ok(event) => events
            .send(event)
            .await
            .map_err(|_| PushError::ReceiverClosed),
        Err(e) => {
            error!("Dropping malformed push frame: {} - Raw frame: {}", e, text);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_decode_reading() {
        // ---
        let text = r#"{"type":"reading","payload":{"sensorId":"temp-1","nodeId":"node-1","value":21.5,"timestamp":"2025-03-26T18:45:00Z"}}"#;
        match PushEvent::decode(text).unwrap() {
            PushEvent::Reading(r) => {
                assert_eq!(r.sensor_id, "temp-1");
                assert_eq!(r.value, 21.5);
                assert!(r.sensor_type.is_none());
            }
            other => panic!("expected reading, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_topology() {
        // ---
        let text = r#"{"type":"topology","payload":[
            {"linkId":1,"sourceNodeId":"a","targetNodeId":"b","signalStrength":80,"lastUpdated":"2025-03-26T18:45:00Z"},
            {"linkId":2,"sourceNodeId":"b","targetNodeId":"c","signalStrength":35,"lastUpdated":"2025-03-26T18:45:00Z"}
        ]}"#;
        match PushEvent::decode(text).unwrap() {
            PushEvent::Topology(links) => assert_eq!(links.len(), 2),
            other => panic!("expected topology, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_rejects_unknown_type() {
        // ---
        assert!(PushEvent::decode(r#"{"type":"heartbeat","payload":{}}"#).is_err());
        assert!(PushEvent::decode("not json").is_err());
    }

    #[tokio::test]
    async fn test_forward_skips_malformed_frames() {
        // ---
        let (tx, mut rx) = mpsc::channel(4);
        forward("garbage", &tx).await.unwrap();
        forward(
            r#"{"type":"alert","payload":{"alertId":1,"nodeId":"n","sensorId":"s","level":"INFO","message":"m","timestamp":"2025-03-26T18:45:00Z"}}"#,
            &tx,
        )
        .await
        .unwrap();
        drop(tx);

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, PushEvent::Alert(ref a) if a.alert_id == 1));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_forward_reports_closed_receiver() {
        // ---
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let text = r#"{"type":"topology","payload":[]}"#;
        assert!(matches!(
            forward(text, &tx).await,
            Err(PushError::ReceiverClosed)
        ));
    }
}

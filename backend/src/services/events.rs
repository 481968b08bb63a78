//! Fire-and-forget event publishing
//!
//! Ledger and workflow changes are announced to external subscribers after
//! the owning transaction commits. Delivery is best-effort, at-least-once:
//! consumers treat events as a signal to re-query, never as the source of
//! truth, so a failed webhook is logged and dropped.

use base64::Engine;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use tokio::sync::broadcast;

use crate::config::EventsConfig;

pub const EVENT_MOVEMENT_APPLIED: &str = "stock.movement.applied";
pub const EVENT_LOW_STOCK: &str = "lowStock.triggered";
pub const EVENT_PO_STATUS_CHANGED: &str = "purchaseOrder.statusChanged";
pub const EVENT_STOCK_COUNT_APPLIED: &str = "stockCount.applied";

/// One published platform event.
#[derive(Debug, Clone, Serialize)]
pub struct PlatformEvent {
    pub event_type: String,
    pub payload: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}

/// Publisher handle shared through [`crate::AppState`].
#[derive(Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<PlatformEvent>,
    http_client: reqwest::Client,
    webhook_url: Option<String>,
    webhook_secret: Option<String>,
}

impl EventPublisher {
    pub fn new(config: &EventsConfig) -> Self {
        let (sender, _) = broadcast::channel(config.channel_capacity.max(1));
        Self {
            sender,
            http_client: reqwest::Client::new(),
            webhook_url: config.webhook_url.clone(),
            webhook_secret: config.webhook_secret.clone(),
        }
    }

    /// Subscribe to the in-process event stream (live UI refresh).
    pub fn subscribe(&self) -> broadcast::Receiver<PlatformEvent> {
        self.sender.subscribe()
    }

    /// Publish an event. Never blocks and never fails the caller.
    pub fn publish(&self, event_type: &str, payload: serde_json::Value) {
        let event = PlatformEvent {
            event_type: event_type.to_string(),
            payload,
            occurred_at: Utc::now(),
        };

        // In-process subscribers; a lagging or absent receiver is fine.
        let _ = self.sender.send(event.clone());

        let Some(url) = self.webhook_url.clone() else {
            return;
        };
        let client = self.http_client.clone();
        let secret = self.webhook_secret.clone();

        tokio::spawn(async move {
            let body = match serde_json::to_vec(&event) {
                Ok(body) => body,
                Err(e) => {
                    tracing::error!("Failed to serialize event {}: {}", event.event_type, e);
                    return;
                }
            };

            let mut request = client
                .post(&url)
                .header("Content-Type", "application/json")
                .body(body.clone());
            if let Some(secret) = &secret {
                request = request.header("X-Rops-Signature", sign_payload(secret, &body));
            }

            match request.send().await {
                Ok(response) if response.status().is_success() => {
                    tracing::debug!(event_type = %event.event_type, "Event delivered");
                }
                Ok(response) => {
                    tracing::error!(
                        event_type = %event.event_type,
                        status = %response.status(),
                        "Event webhook rejected"
                    );
                }
                Err(e) => {
                    tracing::error!(event_type = %event.event_type, "Event webhook failed: {}", e);
                }
            }
        });
    }
}

/// HMAC-SHA256 signature of the payload, base64-encoded.
fn sign_payload(secret: &str, body: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(body);
    base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn publisher() -> EventPublisher {
        EventPublisher::new(&EventsConfig {
            webhook_url: None,
            webhook_secret: None,
            channel_capacity: 8,
        })
    }

    #[test]
    fn publish_reaches_in_process_subscribers() {
        let events = publisher();
        let mut rx = events.subscribe();
        events.publish(EVENT_LOW_STOCK, serde_json::json!({ "on_hand": 2 }));

        let event = rx.try_recv().unwrap();
        assert_eq!(event.event_type, EVENT_LOW_STOCK);
        assert_eq!(event.payload["on_hand"], 2);
    }

    #[test]
    fn publish_without_subscribers_does_not_panic() {
        publisher().publish(EVENT_MOVEMENT_APPLIED, serde_json::json!({}));
    }

    #[test]
    fn signature_is_stable_for_same_input() {
        let a = sign_payload("secret", b"payload");
        let b = sign_payload("secret", b"payload");
        assert_eq!(a, b);
        assert_ne!(a, sign_payload("other", b"payload"));
    }
}

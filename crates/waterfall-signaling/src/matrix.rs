//! A minimal Matrix Client-Server API client for to-device call signaling.
//!
//! Scope is deliberately narrow: `PUT /sendToDevice` to deliver one event to
//! one (user, device) pair, and a `/sync` long-poll loop filtered to
//! `m.call.*` to-device events. Everything else a full Matrix SDK would do
//! (rooms, E2EE, presence) is out of scope — the engine only needs the
//! signaling transport, not a general-purpose client.

use std::sync::Arc;

use futures_util::stream;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};
use waterfall_common::error::SignalingError;
use waterfall_proto::signaling::SignalingEnvelope;

use crate::adapter::{InboundEvents, SignalingAdapter};

const SYNC_TIMEOUT_MS: u64 = 30_000;

pub struct MatrixSignalingAdapter {
    http: reqwest::Client,
    homeserver_url: String,
    access_token: String,
    since_token: Arc<Mutex<Option<String>>>,
}

impl MatrixSignalingAdapter {
    pub fn new(homeserver_url: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            homeserver_url: homeserver_url.into(),
            access_token: access_token.into(),
            since_token: Arc::new(Mutex::new(None)),
        }
    }

    async fn sync_once(&self, since: Option<&str>) -> Result<Value, SignalingError> {
        let mut url = format!(
            "{}/_matrix/client/v3/sync?timeout={}",
            self.homeserver_url.trim_end_matches('/'),
            SYNC_TIMEOUT_MS
        );
        if let Some(since) = since {
            url.push_str("&since=");
            url.push_str(since);
        }

        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| SignalingError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(SignalingError::Sync(format!(
                "homeserver returned {}",
                response.status()
            )));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| SignalingError::Sync(e.to_string()))
    }
}

/// Merges the Matrix event-level `type` field into `content` so it can be
/// deserialized as a flattened, internally-tagged `SignalingEnvelope`.
fn event_to_envelope(event: &Value) -> Option<SignalingEnvelope> {
    let event_type = event.get("type")?.as_str()?;
    if !event_type.starts_with("m.call.") {
        return None;
    }
    let sender = event.get("sender")?.as_str()?;
    let mut content = event.get("content")?.clone();
    let obj = content.as_object_mut()?;
    obj.insert("type".to_string(), json!(event_type));
    obj.insert("sender_user_id".to_string(), json!(sender));
    serde_json::from_value(content).ok()
}

#[async_trait::async_trait]
impl SignalingAdapter for MatrixSignalingAdapter {
    async fn send(
        &self,
        dest_user_id: &str,
        dest_device_id: &str,
        envelope: SignalingEnvelope,
    ) -> Result<(), SignalingError> {
        let event_type = envelope.event.event_type();
        let mut content = serde_json::to_value(&envelope).map_err(SignalingError::Decode)?;
        if let Some(obj) = content.as_object_mut() {
            obj.remove("type");
            obj.remove("sender_user_id");
        }

        let txn_id = uuid::Uuid::new_v4();
        let url = format!(
            "{}/_matrix/client/v3/sendToDevice/{}/{}",
            self.homeserver_url.trim_end_matches('/'),
            event_type,
            txn_id
        );
        let body = json!({
            "messages": {
                dest_user_id: { dest_device_id: content }
            }
        });

        let response = self
            .http
            .put(&url)
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| SignalingError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(SignalingError::Transport(format!(
                "sendToDevice returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    fn inbound(&self) -> InboundEvents {
        let http = self.http.clone();
        let homeserver_url = self.homeserver_url.clone();
        let access_token = self.access_token.clone();
        let since_token = self.since_token.clone();

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let client = MatrixSignalingAdapter {
                http,
                homeserver_url,
                access_token,
                since_token: since_token.clone(),
            };
            let mut attempts: u32 = 0;
            loop {
                let since = since_token.lock().await.clone();
                let body = match client.sync_once(since.as_deref()).await {
                    Ok(body) => {
                        attempts = 0;
                        body
                    }
                    Err(e) => {
                        attempts += 1;
                        let delay = std::time::Duration::from_secs(u64::min(2u64.pow(attempts.min(30)), 30));
                        tracing::warn!(error = %e, ?delay, attempt = attempts, "signaling sync failed, backing off");
                        if tx.send(Err(e)).is_err() {
                            return;
                        }
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                };

                if let Some(next_batch) = body.get("next_batch").and_then(|v| v.as_str()) {
                    *since_token.lock().await = Some(next_batch.to_string());
                }

                let events = body
                    .pointer("/to_device/events")
                    .and_then(|v| v.as_array())
                    .cloned()
                    .unwrap_or_default();

                for event in &events {
                    if let Some(envelope) = event_to_envelope(event) {
                        if tx.send(Ok(envelope)).is_err() {
                            return;
                        }
                    }
                }
            }
        });

        Box::pin(stream::unfold(rx, |mut rx| async move {
            let item = rx.recv().await?;
            Some((item, rx))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use waterfall_proto::signaling::HangupReason;

    #[test]
    fn merges_event_type_into_content_before_decoding() {
        let event = json!({
            "sender": "@alice:example.org",
            "type": "m.call.hangup",
            "content": {
                "call_id": "call1",
                "conf_id": "!conf:example.org",
                "device_id": "DEVICE1",
                "sender_session_id": "abc",
                "dest_session_id": "sfu",
                "party_id": "party1",
                "version": "1",
                "reason": "user_hangup"
            }
        });
        let envelope = event_to_envelope(&event).unwrap();
        assert_eq!(envelope.sender_user_id, "@alice:example.org");
        assert!(envelope.is_for_sfu());
        assert!(matches!(
            envelope.event,
            waterfall_proto::signaling::ToDeviceEvent::Hangup {
                reason: HangupReason::UserHangup
            }
        ));
    }

    #[test]
    fn ignores_non_call_to_device_events() {
        let event = json!({
            "sender": "@alice:example.org",
            "type": "m.room_key",
            "content": {}
        });
        assert!(event_to_envelope(&event).is_none());
    }
}

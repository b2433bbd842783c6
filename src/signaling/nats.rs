//! NATS-backed signaling transport.
//!
//! Subjects:
//! - `mesh.presence.<session>.<participant>` carries presence heartbeats
//! - `mesh.signal.<session>.<participant>` is the per-recipient signaling
//!   inbox
//! - `mesh.session.<session>.info` serves the session document over
//!   request/reply, answered by the host
//! - `mesh.session.<session>.doc` broadcasts the session document for
//!   observers
//!
//! The adapter aggregates presence heartbeats into roster snapshots locally,
//! expiring participants that stay silent past the grace period. This is the
//! push-based signaling strategy; no polling path exists.

use anyhow::{Context, Result};
use async_nats::Client;
use chrono::Utc;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info, warn};

use super::messages::{
    InboxMessage, Participant, Presence, RosterSnapshot, SessionDoc, SignalingMessage,
};
use super::transport::SignalingTransport;

const FETCH_TIMEOUT: Duration = Duration::from_secs(2);
const ROSTER_CHANNEL: usize = 64;
const INBOX_CHANNEL: usize = 256;

pub struct NatsTransport {
    client: Client,
    presence_grace: Duration,
    /// Session documents this node serves info requests for (host side)
    served: Arc<Mutex<HashMap<String, Arc<RwLock<SessionDoc>>>>>,
}

impl NatsTransport {
    pub async fn connect(url: &str, presence_grace: Duration) -> Result<Self> {
        info!("Connecting to NATS at {}", url);

        let client = async_nats::connect(url)
            .await
            .context("Failed to connect to NATS")?;

        info!("Connected to NATS successfully");

        Ok(Self {
            client,
            presence_grace,
            served: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    fn presence_subject(session_id: &str, participant_id: &str) -> String {
        format!("mesh.presence.{}.{}", session_id, participant_id)
    }

    fn signal_subject(session_id: &str, participant_id: &str) -> String {
        format!("mesh.signal.{}.{}", session_id, participant_id)
    }

    fn info_subject(session_id: &str) -> String {
        format!("mesh.session.{}.info", session_id)
    }

    fn doc_subject(session_id: &str) -> String {
        format!("mesh.session.{}.doc", session_id)
    }
}

#[async_trait::async_trait]
impl SignalingTransport for NatsTransport {
    async fn watch_roster(&self, session_id: &str) -> Result<mpsc::Receiver<RosterSnapshot>> {
        let subject = format!("mesh.presence.{}.*", session_id);
        let mut subscriber = self
            .client
            .subscribe(subject.clone())
            .await
            .context("Failed to subscribe to presence")?;

        info!("Watching roster on {}", subject);

        let (tx, rx) = mpsc::channel(ROSTER_CHANNEL);
        let session_id = session_id.to_string();
        let grace = self.presence_grace;

        tokio::spawn(async move {
            let mut known: HashMap<String, Participant> = HashMap::new();
            let mut sweep = tokio::time::interval(grace / 2);

            loop {
                let changed = tokio::select! {
                    msg = subscriber.next() => {
                        let Some(msg) = msg else { break };
                        match serde_json::from_slice::<Participant>(&msg.payload) {
                            Ok(mut participant) => {
                                participant.last_seen = Utc::now();
                                if participant.presence == Presence::Left {
                                    known.remove(&participant.id).is_some()
                                } else {
                                    let previous =
                                        known.insert(participant.id.clone(), participant.clone());
                                    match previous {
                                        None => true,
                                        // Heartbeats only bump last_seen; emit a
                                        // snapshot when something visible changed.
                                        Some(prev) => {
                                            prev.display_name != participant.display_name
                                                || prev.audio_enabled != participant.audio_enabled
                                                || prev.video_enabled != participant.video_enabled
                                                || prev.display_language
                                                    != participant.display_language
                                        }
                                    }
                                }
                            }
                            Err(e) => {
                                warn!("Dropping malformed presence document: {}", e);
                                false
                            }
                        }
                    }
                    _ = sweep.tick() => {
                        let cutoff = Utc::now()
                            - chrono::Duration::from_std(grace).unwrap_or_else(|_| chrono::Duration::seconds(10));
                        let before = known.len();
                        known.retain(|_, p| p.last_seen > cutoff);
                        known.len() != before
                    }
                };

                if changed {
                    let snapshot = RosterSnapshot {
                        session_id: session_id.clone(),
                        participants: known.values().cloned().collect(),
                        at: Utc::now(),
                    };
                    if tx.send(snapshot).await.is_err() {
                        break; // watcher gone
                    }
                }
            }

            debug!("roster watcher for {} stopped", session_id);
        });

        Ok(rx)
    }

    async fn watch_inbox(
        &self,
        session_id: &str,
        self_id: &str,
    ) -> Result<mpsc::Receiver<InboxMessage>> {
        let subject = Self::signal_subject(session_id, self_id);
        let mut subscriber = self
            .client
            .subscribe(subject.clone())
            .await
            .context("Failed to subscribe to signaling inbox")?;

        info!("Watching signaling inbox on {}", subject);

        let (tx, rx) = mpsc::channel(INBOX_CHANNEL);
        let self_id = self_id.to_string();

        tokio::spawn(async move {
            while let Some(msg) = subscriber.next().await {
                // Validate at the boundary: anything that doesn't parse as a
                // known payload kind never reaches the session layer.
                let message = match serde_json::from_slice::<SignalingMessage>(&msg.payload) {
                    Ok(m) => m,
                    Err(e) => {
                        warn!("Dropping malformed signaling message: {}", e);
                        continue;
                    }
                };

                if message.to != self_id {
                    warn!(
                        "Dropping misrouted signaling message for {} on {}",
                        message.to, msg.subject
                    );
                    continue;
                }

                let envelope = InboxMessage {
                    token: uuid::Uuid::new_v4().to_string(),
                    message,
                };

                if tx.send(envelope).await.is_err() {
                    break;
                }
            }
            debug!("inbox watcher for {} stopped", self_id);
        });

        Ok(rx)
    }

    async fn send(&self, message: SignalingMessage) -> Result<()> {
        let subject = Self::signal_subject(&message.session_id, &message.to);
        let payload = serde_json::to_vec(&message)?;

        self.client
            .publish(subject.clone(), payload.into())
            .await
            .context("Failed to publish signaling message")?;

        debug!(
            "Sent {} {} -> {} (seq={})",
            message.payload.kind(),
            message.from,
            message.to,
            message.seq
        );

        Ok(())
    }

    async fn ack(&self, message: &InboxMessage) -> Result<()> {
        // Core NATS delivers each inbox message to this subscriber exactly
        // once, so there is nothing to delete on the wire. Kept as a trait
        // obligation for stores that retain messages.
        debug!(
            "acked {} from {} (token={})",
            message.message.payload.kind(),
            message.message.from,
            message.token
        );
        Ok(())
    }

    async fn upsert_self_presence(
        &self,
        session_id: &str,
        participant: &Participant,
    ) -> Result<()> {
        let subject = Self::presence_subject(session_id, &participant.id);
        let payload = serde_json::to_vec(participant)?;

        self.client
            .publish(subject, payload.into())
            .await
            .context("Failed to publish presence")?;

        Ok(())
    }

    async fn publish_session(&self, doc: &SessionDoc) -> Result<()> {
        let payload = serde_json::to_vec(doc)?;
        self.client
            .publish(Self::doc_subject(&doc.id), payload.into())
            .await
            .context("Failed to publish session document")?;

        // First publish for a session makes this node its info responder;
        // later publishes just swap the served document.
        let mut served = self.served.lock().await;
        if let Some(slot) = served.get(&doc.id) {
            *slot.write().await = doc.clone();
            return Ok(());
        }

        let slot = Arc::new(RwLock::new(doc.clone()));
        served.insert(doc.id.clone(), Arc::clone(&slot));

        let mut requests = self
            .client
            .subscribe(Self::info_subject(&doc.id))
            .await
            .context("Failed to subscribe to session info requests")?;
        let client = self.client.clone();
        let session_id = doc.id.clone();

        tokio::spawn(async move {
            while let Some(request) = requests.next().await {
                let Some(reply) = request.reply else { continue };
                let doc = slot.read().await.clone();
                match serde_json::to_vec(&doc) {
                    Ok(payload) => {
                        if let Err(e) = client.publish(reply, payload.into()).await {
                            warn!("Failed to answer session info request: {}", e);
                        }
                    }
                    Err(e) => warn!("Failed to serialize session document: {}", e),
                }
            }
            debug!("session info responder for {} stopped", session_id);
        });

        info!("Serving session document for {}", doc.id);
        Ok(())
    }

    async fn fetch_session(&self, session_id: &str) -> Result<Option<SessionDoc>> {
        let request = self
            .client
            .request(Self::info_subject(session_id), "".into());

        let response = match tokio::time::timeout(FETCH_TIMEOUT, request).await {
            Ok(Ok(msg)) => msg,
            // No responder or timeout: nobody is serving this session
            Ok(Err(e)) => {
                debug!("session info request for {} failed: {}", session_id, e);
                return Ok(None);
            }
            Err(_) => return Ok(None),
        };

        let doc = serde_json::from_slice::<SessionDoc>(&response.payload)
            .context("Malformed session document")?;
        Ok(Some(doc))
    }
}

//! NATS-backed speech service client.
//!
//! Each client owns a private duplex channel: requests are published to
//! `speech.request.<client>`, results arrive on `speech.result.<client>`.
//! The channel is per listener because transcription targets the listener's
//! display language.

use anyhow::{Context, Result};
use async_nats::Client;
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::client::SpeechService;
use super::messages::{SpeechEvent, SpeechRequest};

const RESULT_CHANNEL: usize = 256;

pub struct NatsSpeechClient {
    client: Client,
    client_id: String,
    available: Arc<AtomicBool>,
}

impl NatsSpeechClient {
    pub async fn connect(url: &str, client_id: &str) -> Result<Self> {
        info!("Connecting speech client to NATS at {}", url);

        let client = async_nats::connect(url)
            .await
            .context("Failed to connect to NATS for speech")?;

        Ok(Self {
            client,
            client_id: client_id.to_string(),
            available: Arc::new(AtomicBool::new(true)),
        })
    }

    fn request_subject(&self) -> String {
        format!("speech.request.{}", self.client_id)
    }

    fn result_subject(&self) -> String {
        format!("speech.result.{}", self.client_id)
    }
}

#[async_trait::async_trait]
impl SpeechService for NatsSpeechClient {
    async fn submit(&self, request: SpeechRequest) -> Result<()> {
        let payload = serde_json::to_vec(&request)?;

        match self
            .client
            .publish(self.request_subject(), payload.into())
            .await
        {
            Ok(()) => {
                self.available.store(true, Ordering::SeqCst);
                Ok(())
            }
            Err(e) => {
                self.available.store(false, Ordering::SeqCst);
                Err(e).context("Failed to publish speech request")
            }
        }
    }

    async fn subscribe(&self) -> Result<mpsc::Receiver<SpeechEvent>> {
        let subject = self.result_subject();
        let mut subscriber = self
            .client
            .subscribe(subject.clone())
            .await
            .context("Failed to subscribe to speech results")?;

        info!("Subscribed to speech results on {}", subject);

        let (tx, rx) = mpsc::channel(RESULT_CHANNEL);
        let available = Arc::clone(&self.available);

        tokio::spawn(async move {
            while let Some(msg) = subscriber.next().await {
                match serde_json::from_slice::<SpeechEvent>(&msg.payload) {
                    Ok(event) => {
                        available.store(true, Ordering::SeqCst);
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("Dropping malformed speech result: {}", e);
                    }
                }
            }
            debug!("speech result stream closed");
        });

        Ok(rx)
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }
}

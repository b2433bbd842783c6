use anyhow::Result;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use super::config::SessionConfig;
use super::context::SessionContext;
use super::events::SessionCommand;
use super::roster;
use crate::audio::{AudioBackend, Chunker};
use crate::error::SessionError;
use crate::media::MediaEvent;
use crate::peer::{Backoff, PeerLink, PeerState};
use crate::signaling::{
    InboxMessage, Participant, ParticipantRole, Presence, RosterSnapshot, SessionDoc,
    SessionStatus, SignalPayload, SignalingMessage,
};
use crate::speech::Correlator;
use crate::store::StateStore;

const COMMAND_CHANNEL: usize = 16;
const CHUNK_CHANNEL: usize = 64;
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Creates and joins mesh sessions.
///
/// Holds no per-session state itself; each `create`/`join` spawns a
/// [`SessionRuntime`] task that owns everything for that session.
pub struct Orchestrator {
    config: SessionConfig,
    context: SessionContext,
}

impl Orchestrator {
    pub fn new(config: SessionConfig, context: SessionContext) -> Self {
        Self { config, context }
    }

    pub fn self_id(&self) -> &str {
        &self.config.self_id
    }

    /// Host a new session. The session starts in `Waiting` and flips to
    /// `Active` when the second participant arrives.
    pub async fn create_session(&self, topic: &str) -> Result<SessionHandle, SessionError> {
        let doc = SessionDoc {
            id: uuid::Uuid::new_v4().to_string(),
            topic: topic.to_string(),
            host_id: self.config.self_id.clone(),
            status: SessionStatus::Waiting,
            max_participants: self.config.max_participants,
            participant_count: 1,
            created_at: chrono::Utc::now(),
            ended_at: None,
        };

        info!("creating session {} ({})", doc.id, topic);

        self.context
            .signaling
            .publish_session(&doc)
            .await
            .map_err(|e| SessionError::SignalingDeliveryFailed(e.to_string()))?;

        self.start(doc, ParticipantRole::Host).await
    }

    /// Join an existing session by id. Validates the session document before
    /// any media is opened.
    pub async fn join_session(&self, session_id: &str) -> Result<SessionHandle, SessionError> {
        let doc = self
            .context
            .signaling
            .fetch_session(session_id)
            .await
            .map_err(|e| SessionError::SignalingDeliveryFailed(e.to_string()))?
            .ok_or_else(|| SessionError::SessionNotFound(session_id.to_string()))?;

        if doc.status == SessionStatus::Ended {
            return Err(SessionError::SessionEnded(session_id.to_string()));
        }
        if doc.participant_count >= doc.max_participants {
            return Err(SessionError::SessionFull {
                session_id: session_id.to_string(),
                max_participants: doc.max_participants,
            });
        }

        info!("joining session {} ({})", doc.id, doc.topic);
        self.start(doc, ParticipantRole::Guest).await
    }

    async fn start(
        &self,
        doc: SessionDoc,
        role: ParticipantRole,
    ) -> Result<SessionHandle, SessionError> {
        let config = self.config.clone();
        let context = self.context.clone();
        let session_id = doc.id.clone();

        // Local capture comes up before anything is announced: a user who
        // cannot be heard should not appear in the roster at all.
        let mut backend = context
            .audio
            .create(config.backend.clone())
            .map_err(|e| SessionError::MediaAccessDenied(e.to_string()))?;
        let local_frames = backend
            .start()
            .await
            .map_err(|e| SessionError::MediaAccessDenied(e.to_string()))?;
        debug!("local capture started via {}", backend.name());

        let store = StateStore::new();
        store.set_session(doc.clone()).await;

        let self_participant = Participant::new(
            &config.self_id,
            &config.display_name,
            role,
            &config.display_language,
        );
        store.upsert_participant(self_participant.clone()).await;

        context
            .signaling
            .upsert_self_presence(&session_id, &self_participant)
            .await
            .map_err(|e| SessionError::SignalingDeliveryFailed(e.to_string()))?;

        let rosters = context
            .signaling
            .watch_roster(&session_id)
            .await
            .map_err(|e| SessionError::SignalingDeliveryFailed(e.to_string()))?;
        let inbox = context
            .signaling
            .watch_inbox(&session_id, &config.self_id)
            .await
            .map_err(|e| SessionError::SignalingDeliveryFailed(e.to_string()))?;

        // Subtitles are best-effort; an unreachable speech service must not
        // block joining the call.
        let speech_events = match context.speech.subscribe().await {
            Ok(rx) => rx,
            Err(e) => {
                warn!("speech service unavailable, subtitles suspended: {}", e);
                store.set_speech_available(false).await;
                mpsc::channel(1).1
            }
        };

        let (chunk_tx, chunks) = mpsc::channel(CHUNK_CHANNEL);
        let mut chunker = Chunker::new(config.chunker.clone(), chunk_tx);
        chunker.attach(&config.self_id, &config.display_name, local_frames);

        let correlator = Correlator::new(
            config.correlator.clone(),
            Arc::clone(&context.speech),
            Arc::clone(&store),
        );

        let (commands_tx, commands) = mpsc::channel(COMMAND_CHANNEL);
        let (peer_events_tx, peer_events) = mpsc::unbounded_channel();
        let (retry_tx, retries) = mpsc::unbounded_channel();

        let runtime = SessionRuntime {
            config,
            context,
            doc,
            role,
            self_participant,
            store: Arc::clone(&store),
            links: HashMap::new(),
            backoffs: HashMap::new(),
            known: BTreeSet::new(),
            orphan_signals: Vec::new(),
            chunker,
            correlator,
            backend,
            peer_events_tx,
            retry_tx,
        };

        let self_id = runtime.config.self_id.clone();
        tokio::spawn(runtime.run(rosters, inbox, peer_events, chunks, speech_events, commands, retries));

        Ok(SessionHandle {
            session_id,
            self_id,
            store,
            commands: commands_tx,
        })
    }
}

/// Client-side handle to a running session. Cloneable; dropping every clone
/// tears the session down.
#[derive(Clone)]
pub struct SessionHandle {
    session_id: String,
    self_id: String,
    store: Arc<StateStore>,
    commands: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn self_id(&self) -> &str {
        &self.self_id
    }

    pub fn store(&self) -> Arc<StateStore> {
        Arc::clone(&self.store)
    }

    pub async fn set_audio_enabled(&self, enabled: bool) {
        let _ = self
            .commands
            .send(SessionCommand::SetAudioEnabled(enabled))
            .await;
    }

    pub async fn set_video_enabled(&self, enabled: bool) {
        let _ = self
            .commands
            .send(SessionCommand::SetVideoEnabled(enabled))
            .await;
    }

    /// Leave the session and wait for teardown. Idempotent: leaving a
    /// session that already stopped resolves immediately.
    pub async fn leave(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self
            .commands
            .send(SessionCommand::Leave(done_tx))
            .await
            .is_ok()
        {
            let _ = done_rx.await;
        }
    }
}

/// The single task that owns all mutable state for one session.
///
/// Every input (roster snapshots, signaling inbox, media events, audio
/// chunks, speech results, handle commands) funnels into one `select!` loop,
/// so peer links and the chunker are mutated from exactly one place and need
/// no locking.
struct SessionRuntime {
    config: SessionConfig,
    context: SessionContext,
    doc: SessionDoc,
    role: ParticipantRole,
    self_participant: Participant,
    store: Arc<StateStore>,
    /// Peer links by remote id; the runtime is the sole owner
    links: HashMap<String, PeerLink>,
    backoffs: HashMap<String, Backoff>,
    /// Remote ids currently reconciled into the mesh
    known: BTreeSet<String>,
    /// Signals from peers the roster has not shown us yet, kept briefly
    orphan_signals: Vec<(Instant, SignalingMessage)>,
    chunker: Chunker,
    correlator: Correlator,
    backend: Box<dyn AudioBackend>,
    peer_events_tx: mpsc::UnboundedSender<(String, MediaEvent)>,
    retry_tx: mpsc::UnboundedSender<String>,
}

impl SessionRuntime {
    #[allow(clippy::too_many_arguments)]
    async fn run(
        mut self,
        mut rosters: mpsc::Receiver<RosterSnapshot>,
        mut inbox: mpsc::Receiver<InboxMessage>,
        mut peer_events: mpsc::UnboundedReceiver<(String, MediaEvent)>,
        mut chunks: mpsc::Receiver<crate::audio::AudioChunk>,
        mut speech_events: mpsc::Receiver<crate::speech::SpeechEvent>,
        mut commands: mpsc::Receiver<SessionCommand>,
        mut retries: mpsc::UnboundedReceiver<String>,
    ) {
        let mut heartbeat = interval(self.config.heartbeat);
        let mut sweep = interval(SWEEP_INTERVAL);

        info!(
            "session {} event loop started as {}",
            self.doc.id, self.config.self_id
        );

        loop {
            tokio::select! {
                Some(snapshot) = rosters.recv() => {
                    self.reconcile_roster(snapshot).await;
                }
                Some(message) = inbox.recv() => {
                    self.handle_inbox(message).await;
                }
                Some((remote_id, event)) = peer_events.recv() => {
                    self.handle_media_event(remote_id, event).await;
                }
                Some(chunk) = chunks.recv() => {
                    if let Err(e) = self.correlator.submit(chunk).await {
                        warn!("chunk submission failed: {}", e);
                    }
                }
                Some(event) = speech_events.recv() => {
                    self.correlator.handle_event(event).await;
                }
                Some(remote_id) = retries.recv() => {
                    self.retry_peer(remote_id).await;
                }
                _ = heartbeat.tick() => {
                    self.heartbeat().await;
                }
                _ = sweep.tick() => {
                    self.sweep().await;
                }
                command = commands.recv() => {
                    match command {
                        Some(SessionCommand::SetAudioEnabled(enabled)) => {
                            self.set_audio_enabled(enabled).await;
                        }
                        Some(SessionCommand::SetVideoEnabled(enabled)) => {
                            self.set_video_enabled(enabled).await;
                        }
                        Some(SessionCommand::Leave(done)) => {
                            self.shutdown().await;
                            let _ = done.send(());
                            break;
                        }
                        None => {
                            // Every handle dropped
                            self.shutdown().await;
                            break;
                        }
                    }
                }
            }
        }

        info!("session {} event loop stopped", self.doc.id);
    }

    // ------------------------------------------------------------------
    // Roster reconciliation
    // ------------------------------------------------------------------

    async fn reconcile_roster(&mut self, snapshot: RosterSnapshot) {
        if snapshot.session_id != self.doc.id {
            return;
        }

        let changes = roster::reconcile(&self.known, &snapshot, &self.config.self_id);
        if !changes.is_empty() {
            debug!("roster for {}: {:?}", snapshot.session_id, snapshot.ids());
        }

        // Refresh documents for everyone still present (names, mute flags).
        // A lingering `Left` document must not resurrect a participant the
        // teardown below (or an earlier snapshot) already removed.
        for participant in &snapshot.participants {
            if participant.id != self.config.self_id
                && participant.presence == Presence::Active
            {
                self.store.upsert_participant(participant.clone()).await;
            }
        }

        for removed in &changes.removed {
            info!("participant {} left, tearing down link", removed);
            if let Some(mut link) = self.links.remove(removed) {
                link.close();
            }
            self.backoffs.remove(removed);
            self.known.remove(removed);
            self.chunker.detach(removed);
            self.correlator.drop_speaker(removed).await;
            self.store.remove_participant(removed).await;
        }

        for added in changes.added {
            info!("participant {} joined ({})", added.id, added.display_name);
            self.known.insert(added.id.clone());
            self.open_link(&added.id).await;
        }

        let active_count = snapshot
            .participants
            .iter()
            .filter(|p| p.presence == Presence::Active)
            .count();

        self.replay_orphans().await;
        self.refresh_session_doc(active_count).await;
    }

    /// Create the link for a newly visible peer. The lexicographically lower
    /// id offers; the other side idles until the offer arrives.
    async fn open_link(&mut self, remote_id: &str) {
        let mut link = PeerLink::new(
            &self.doc.id,
            &self.config.self_id,
            remote_id,
            Arc::clone(&self.context.signaling),
            Arc::clone(&self.context.media),
        );

        self.store
            .set_link_state(remote_id, PeerState::Idle)
            .await;

        if link.is_initiator() {
            if let Err(e) = link.begin_offer(self.peer_events_tx.clone()).await {
                warn!("offer to {} failed: {}", remote_id, e);
                self.links.insert(remote_id.to_string(), link);
                self.link_failed(remote_id).await;
                return;
            }
        }

        self.store.set_link_state(remote_id, link.state()).await;
        self.links.insert(remote_id.to_string(), link);
    }

    /// Host-only: keep the published session document in step with the
    /// roster.
    async fn refresh_session_doc(&mut self, participant_count: usize) {
        if self.role != ParticipantRole::Host || self.doc.status == SessionStatus::Ended {
            return;
        }

        let status = if participant_count > 1 {
            SessionStatus::Active
        } else {
            SessionStatus::Waiting
        };

        if self.doc.participant_count == participant_count && self.doc.status == status {
            return;
        }

        self.doc.participant_count = participant_count;
        self.doc.status = status;
        self.store.set_session(self.doc.clone()).await;

        if let Err(e) = self.context.signaling.publish_session(&self.doc).await {
            warn!("session document publish failed: {}", e);
        }
    }

    // ------------------------------------------------------------------
    // Signaling inbox
    // ------------------------------------------------------------------

    async fn handle_inbox(&mut self, inbox_message: InboxMessage) {
        if let Err(e) = self.context.signaling.ack(&inbox_message).await {
            debug!("signaling ack failed: {}", e);
        }
        let message = inbox_message.message;

        if !self.links.contains_key(&message.from) {
            // The roster snapshot announcing this peer may still be in
            // flight; hold the signal instead of dropping it.
            debug!(
                "stashing {} signal from unknown peer {}",
                message.payload.kind(),
                message.from
            );
            self.orphan_signals.push((Instant::now(), message));
            return;
        }

        self.dispatch_signal(message).await;
    }

    async fn dispatch_signal(&mut self, message: SignalingMessage) {
        let remote_id = message.from.clone();
        let Some(link) = self.links.get_mut(&remote_id) else {
            return;
        };

        let result = match message.payload {
            SignalPayload::Offer { sdp } => {
                link.handle_offer(sdp, self.peer_events_tx.clone()).await
            }
            SignalPayload::Answer { sdp } => link.handle_answer(sdp).await,
            SignalPayload::IceCandidate { candidate } => link.handle_candidate(candidate).await,
        };

        match result {
            Ok(()) => {
                let state = link.state();
                self.store.set_link_state(&remote_id, state).await;
                if state == PeerState::Connected {
                    if let Some(backoff) = self.backoffs.get_mut(&remote_id) {
                        backoff.reset();
                    }
                }
            }
            Err(e) => {
                warn!("signal handling for {} failed: {}", remote_id, e);
                self.link_failed(&remote_id).await;
            }
        }
    }

    async fn replay_orphans(&mut self) {
        if self.orphan_signals.is_empty() {
            return;
        }
        let (ready, waiting): (Vec<_>, Vec<_>) = self
            .orphan_signals
            .drain(..)
            .partition(|(_, message)| self.links.contains_key(&message.from));
        self.orphan_signals = waiting;

        for (_, message) in ready {
            debug!("replaying stashed signal from {}", message.from);
            self.dispatch_signal(message).await;
        }
    }

    // ------------------------------------------------------------------
    // Media events / peer recovery
    // ------------------------------------------------------------------

    async fn handle_media_event(&mut self, remote_id: String, event: MediaEvent) {
        match event {
            MediaEvent::LocalCandidate(candidate) => {
                let relay = match self.links.get_mut(&remote_id) {
                    Some(link) => link.send_candidate(candidate).await,
                    None => return,
                };
                if let Err(e) = relay {
                    warn!("candidate relay to {} failed: {}", remote_id, e);
                    self.link_failed(&remote_id).await;
                }
            }
            MediaEvent::Connectivity(connectivity) => {
                let Some(link) = self.links.get_mut(&remote_id) else {
                    return;
                };
                let state = link.handle_connectivity(connectivity);
                self.store.set_link_state(&remote_id, state).await;

                match state {
                    PeerState::Connected => {
                        if let Some(backoff) = self.backoffs.get_mut(&remote_id) {
                            backoff.reset();
                        }
                    }
                    PeerState::Disconnected | PeerState::Failed => {
                        self.chunker.detach(&remote_id);
                        self.link_failed(&remote_id).await;
                    }
                    _ => {}
                }
            }
            MediaEvent::RemoteAudioTrack(track) => {
                let name = self
                    .store
                    .snapshot()
                    .await
                    .participants
                    .iter()
                    .find(|view| view.participant.id == remote_id)
                    .map(|view| view.participant.display_name.clone())
                    .unwrap_or_else(|| remote_id.clone());
                self.chunker.attach(&remote_id, &name, track.frames);
            }
        }
    }

    /// One peer's negotiation or transport failed. The initiator retries
    /// with bounded backoff; the other side idles and waits for a fresh
    /// offer. Exhausting the backoff fails that link only.
    async fn link_failed(&mut self, remote_id: &str) {
        let Some(link) = self.links.get(remote_id) else {
            return;
        };

        if !link.is_initiator() {
            return;
        }

        let backoff = self
            .backoffs
            .entry(remote_id.to_string())
            .or_insert_with(|| {
                Backoff::new(self.config.backoff_base, self.config.backoff_max_attempts)
            });

        match backoff.next_delay() {
            Some(delay) => {
                info!(
                    "retrying peer {} in {:?} (attempt {})",
                    remote_id,
                    delay,
                    backoff.attempts()
                );
                let retry_tx = self.retry_tx.clone();
                let remote_id = remote_id.to_string();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = retry_tx.send(remote_id);
                });
            }
            None => {
                error!(
                    "{}",
                    SessionError::PeerNegotiationFailed(remote_id.to_string())
                );
                if let Some(link) = self.links.get_mut(remote_id) {
                    link.close();
                }
                self.store
                    .set_link_state(remote_id, PeerState::Failed)
                    .await;
            }
        }
    }

    /// Backoff timer fired: rebuild the link from scratch and offer again
    async fn retry_peer(&mut self, remote_id: String) {
        if !self.known.contains(&remote_id) {
            return; // peer left while we were waiting
        }
        if let Some(link) = self.links.get(&remote_id) {
            if link.state() == PeerState::Connected {
                return; // recovered on its own
            }
        }

        if let Some(mut link) = self.links.remove(&remote_id) {
            link.close();
        }
        self.open_link(&remote_id).await;
    }

    // ------------------------------------------------------------------
    // Presence and housekeeping
    // ------------------------------------------------------------------

    async fn heartbeat(&mut self) {
        self.self_participant.last_seen = chrono::Utc::now();
        if let Err(e) = self
            .context
            .signaling
            .upsert_self_presence(&self.doc.id, &self.self_participant)
            .await
        {
            warn!("presence heartbeat failed: {}", e);
        }
    }

    async fn sweep(&mut self) {
        self.correlator.sweep().await;

        let ttl = self.config.orphan_signal_ttl;
        let before = self.orphan_signals.len();
        self.orphan_signals
            .retain(|(stashed_at, _)| stashed_at.elapsed() < ttl);
        if self.orphan_signals.len() != before {
            debug!(
                "dropped {} stale orphan signals",
                before - self.orphan_signals.len()
            );
        }
    }

    async fn set_audio_enabled(&mut self, enabled: bool) {
        if self.self_participant.audio_enabled == enabled {
            return;
        }
        self.self_participant.audio_enabled = enabled;

        if enabled {
            match self.backend.start().await {
                Ok(frames) => {
                    self.chunker
                        .attach(&self.config.self_id, &self.config.display_name, frames);
                }
                Err(e) => {
                    warn!("could not resume local capture: {}", e);
                    self.self_participant.audio_enabled = false;
                    return;
                }
            }
        } else {
            // Muting discards anything buffered mid-utterance
            self.chunker.detach(&self.config.self_id);
            if let Err(e) = self.backend.stop().await {
                warn!("local capture stop failed: {}", e);
            }
            self.correlator.drop_speaker(&self.config.self_id).await;
        }

        self.announce_self().await;
    }

    async fn set_video_enabled(&mut self, enabled: bool) {
        if self.self_participant.video_enabled == enabled {
            return;
        }
        self.self_participant.video_enabled = enabled;
        self.announce_self().await;
    }

    async fn announce_self(&mut self) {
        self.store
            .upsert_participant(self.self_participant.clone())
            .await;
        if let Err(e) = self
            .context
            .signaling
            .upsert_self_presence(&self.doc.id, &self.self_participant)
            .await
        {
            warn!("presence update failed: {}", e);
        }
    }

    /// Full teardown, in dependency order: announce departure, end the
    /// session document if hosting, then release media and local state.
    async fn shutdown(&mut self) {
        info!("leaving session {}", self.doc.id);

        self.self_participant.presence = Presence::Left;
        if let Err(e) = self
            .context
            .signaling
            .upsert_self_presence(&self.doc.id, &self.self_participant)
            .await
        {
            debug!("departure presence publish failed: {}", e);
        }

        if self.role == ParticipantRole::Host {
            self.doc.status = SessionStatus::Ended;
            self.doc.ended_at = Some(chrono::Utc::now());
            if let Err(e) = self.context.signaling.publish_session(&self.doc).await {
                debug!("session end publish failed: {}", e);
            }
        }
        self.store.set_session(self.doc.clone()).await;

        for (_, link) in self.links.iter_mut() {
            link.close();
        }
        self.links.clear();
        self.backoffs.clear();
        self.known.clear();
        self.orphan_signals.clear();

        self.chunker.detach_all();
        self.correlator.clear();
        self.store.drop_pending_subtitles().await;

        if let Err(e) = self.backend.stop().await {
            debug!("local capture stop failed: {}", e);
        }
    }
}

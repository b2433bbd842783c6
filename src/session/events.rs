use tokio::sync::oneshot;

/// Commands sent from a [`super::SessionHandle`] into the session event loop
#[derive(Debug)]
pub enum SessionCommand {
    /// Toggle local microphone capture
    SetAudioEnabled(bool),

    /// Toggle the advertised video flag
    SetVideoEnabled(bool),

    /// Leave the session and tear everything down; the sender is resolved
    /// once teardown finishes
    Leave(oneshot::Sender<()>),
}

use std::sync::Arc;

use crate::audio::AudioSourceFactory;
use crate::media::MediaTransport;
use crate::signaling::SignalingTransport;
use crate::speech::SpeechService;

/// The external collaborators a session runs against, bundled so they can be
/// handed around as one value and swapped wholesale in tests.
#[derive(Clone)]
pub struct SessionContext {
    pub signaling: Arc<dyn SignalingTransport>,
    pub media: Arc<dyn MediaTransport>,
    pub speech: Arc<dyn SpeechService>,
    pub audio: Arc<dyn AudioSourceFactory>,
}

impl SessionContext {
    pub fn new(
        signaling: Arc<dyn SignalingTransport>,
        media: Arc<dyn MediaTransport>,
        speech: Arc<dyn SpeechService>,
        audio: Arc<dyn AudioSourceFactory>,
    ) -> Self {
        Self {
            signaling,
            media,
            speech,
            audio,
        }
    }
}

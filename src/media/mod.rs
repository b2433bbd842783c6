pub mod loopback;
pub mod transport;

pub use loopback::{LoopbackMediaTransport, LoopbackRegistry};
pub use transport::{
    ConnectivityState, IceCandidate, LocalTrack, MediaEvent, MediaSession, MediaSessionConfig,
    MediaTransport, RemoteTrack, SdpKind, SessionDescription, TrackKind,
};

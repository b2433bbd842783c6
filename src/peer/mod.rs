pub mod backoff;
pub mod link;
pub mod state;

pub use backoff::Backoff;
pub use link::PeerLink;
pub use state::PeerState;

pub mod messages;
pub mod nats;
pub mod transport;

pub use messages::{
    InboxMessage, Participant, ParticipantRole, Presence, RosterSnapshot, SessionDoc,
    SessionStatus, SignalPayload, SignalingMessage,
};
pub use nats::NatsTransport;
pub use transport::SignalingTransport;

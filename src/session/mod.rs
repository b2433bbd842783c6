//! Mesh session orchestration.
//!
//! One [`orchestrator::SessionRuntime`] task per joined session owns every
//! piece of mutable session state (peer links, chunker, correlator) and
//! serializes all mutations through a single event loop. The outside world
//! talks to it through a [`orchestrator::SessionHandle`] and observes it
//! through the [`crate::store::StateStore`].

pub mod config;
pub mod context;
pub mod events;
pub mod orchestrator;
pub mod roster;

pub use config::SessionConfig;
pub use context::SessionContext;
pub use events::SessionCommand;
pub use orchestrator::{Orchestrator, SessionHandle};

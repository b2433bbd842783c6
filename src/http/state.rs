use crate::session::{Orchestrator, SessionHandle};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Shared application state for HTTP handlers.
///
/// The control surface drives one session at a time (this is a client core,
/// not a multi-tenant server); the active handle lives behind a lock.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    /// Session currently joined, if any
    pub active: Arc<RwLock<Option<SessionHandle>>>,
}

impl AppState {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            active: Arc::new(RwLock::new(None)),
        }
    }
}

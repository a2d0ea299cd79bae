use std::sync::Arc;

use crate::config::Config;
use crate::formation::TeamFormationEngine;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    /// Immutable settings plus the injected MILP solver and team judge.
    pub engine: Arc<TeamFormationEngine>,
}

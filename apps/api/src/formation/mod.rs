// Team Formation
// Implements: coverage model, exact enumeration, redundancy-penalised MILP with λ sweep,
// quality gate, judge-assisted final selection.
// CPU-bound selection runs inside tokio::task::spawn_blocking (see engine).

pub mod engine;
pub mod error;
pub mod exact;
pub mod handlers;
pub mod judge;
pub mod milp;
pub mod model;
pub mod program;
pub mod prompts;
pub mod quality;
pub mod ranker;
pub mod redundancy;

// Re-export the public API consumed by main and the router.
pub use engine::{EngineSettings, TeamFormationEngine};
pub use error::FormationError;

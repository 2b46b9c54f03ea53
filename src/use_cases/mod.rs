// Use cases layer: application workflows for the game server. `hub` and
// `lifecycle` are the orchestration core; the rest are the collaborators
// they route into.

pub mod clock;
pub mod connection_limiter;
pub mod finalizer;
pub mod game_registry;
pub mod hub;
pub mod lifecycle;
pub mod lobby;
pub mod rate_limiter;

// Domain layer: chess rules adapter, game state, and the pure, DB-free
// computations (Elo, achievement unlocking) the use-case layer calls into.

pub mod achievements;
pub mod elo;
pub mod game;
pub mod ports;
pub mod rules;

pub use game::{EndReason, Game, GameOutcome, GameStatus, IdentityKey, Player, TimeControl};
pub use rules::{GameOverReason, MoveError, MoveOutcome, RulesEngine, WinnerColor};

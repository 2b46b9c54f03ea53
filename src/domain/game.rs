// Plain game-state types. No I/O, no locking policy: that lives in `use_cases`.

use crate::domain::achievements::GameFlags;
use crate::domain::rules::{RulesEngine, WinnerColor};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Notify;

/// Identifies a participant for active-game-count and cooldown bookkeeping:
/// authenticated players are counted per user id, anonymous ones per IP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdentityKey {
    User(u64),
    Ip(IpAddr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameStatus {
    Waiting,
    Active,
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GameOutcome {
    White,
    Black,
    Draw,
}

impl From<WinnerColor> for GameOutcome {
    fn from(winner: WinnerColor) -> Self {
        match winner {
            WinnerColor::White => GameOutcome::White,
            WinnerColor::Black => GameOutcome::Black,
            WinnerColor::Draw => GameOutcome::Draw,
        }
    }
}

impl GameOutcome {
    /// The color that did *not* win; `None` for a draw.
    pub fn loser(self) -> Option<chess::Color> {
        match self {
            GameOutcome::White => Some(chess::Color::Black),
            GameOutcome::Black => Some(chess::Color::White),
            GameOutcome::Draw => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    Checkmate,
    Stalemate,
    InsufficientMaterial,
    ThreefoldRepetition,
    FiftyMoveRule,
    Resignation,
    Timeout,
    Disconnection,
    Abandonment,
}

impl EndReason {
    pub fn as_str(self) -> &'static str {
        match self {
            EndReason::Checkmate => "checkmate",
            EndReason::Stalemate => "stalemate",
            EndReason::InsufficientMaterial => "insufficient_material",
            EndReason::ThreefoldRepetition => "threefold_repetition",
            EndReason::FiftyMoveRule => "fifty_move_rule",
            EndReason::Resignation => "resignation",
            EndReason::Timeout => "timeout",
            EndReason::Disconnection => "disconnection",
            EndReason::Abandonment => "abandonment",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TimeControl {
    pub initial_secs: u32,
    pub increment_secs: u32,
}

#[derive(Debug, Clone)]
pub struct Player {
    pub connection_id: u64,
    pub user_id: Option<u64>,
    pub display_name: String,
    pub rating: Option<i32>,
    pub identity: IdentityKey,
}

/// One chess game and every piece of bookkeeping the lifecycle state machine needs.
/// Every field is mutated exclusively under the owning `Mutex<Game>` in the registry.
pub struct Game {
    pub id: String,
    pub white: Player,
    pub black: Option<Player>,
    pub rules: RulesEngine,
    pub moves: Vec<String>,
    pub move_num: u32,
    pub status: GameStatus,
    pub result: Option<GameOutcome>,
    pub reason: Option<EndReason>,
    pub time_control: Option<TimeControl>,
    pub white_time_ms: i64,
    pub black_time_ms: i64,
    pub rated: bool,
    pub last_move_at: Instant,
    pub created_at: Instant,
    pub clock_running: bool,
    // Stop signal for the dedicated clock task; `Some` only while `clock_running`.
    pub clock_stop: Option<Arc<Notify>>,
    // Halfmove clock for the fifty-move rule; reset on pawn move or capture.
    pub halfmove_clock: u32,
    // Position (FEN sans move counters) occurrence counts for threefold repetition.
    pub position_counts: HashMap<String, u8>,
    pub flags: GameFlags,
}

impl Game {
    pub fn new(id: String, white: Player, time_control: Option<TimeControl>, rated: bool) -> Self {
        let rules = RulesEngine::new_standard();
        let now = Instant::now();
        let initial_ms = time_control.map(|tc| tc.initial_secs as i64 * 1000).unwrap_or(0);
        let mut position_counts = HashMap::new();
        position_counts.insert(repetition_key(&rules.fen()), 1);
        Self {
            id,
            white,
            black: None,
            rules,
            moves: Vec::new(),
            move_num: 1,
            status: GameStatus::Waiting,
            result: None,
            reason: None,
            time_control,
            white_time_ms: initial_ms,
            black_time_ms: initial_ms,
            rated,
            last_move_at: now,
            created_at: now,
            clock_running: false,
            clock_stop: None,
            halfmove_clock: 0,
            position_counts,
            flags: GameFlags::default(),
        }
    }

    /// Records a just-applied move's position for repetition tracking and returns true
    /// if the position (by board+turn+castling+en-passant, ignoring clocks) has now
    /// occurred a third time.
    pub fn record_position(&mut self, fen: &str) -> bool {
        let key = repetition_key(fen);
        let count = self.position_counts.entry(key).or_insert(0);
        *count += 1;
        *count >= 3
    }

    /// Starts the clock if a time control is set, returning the handle the caller
    /// must hand to a freshly spawned ticker task. A no-op (returns `None`) for
    /// untimed games. Idempotent-by-construction: only called from the single
    /// waiting-to-active transition.
    pub fn start_clock(&mut self) -> Option<Arc<Notify>> {
        self.time_control?;
        let stop = Arc::new(Notify::new());
        self.clock_running = true;
        self.clock_stop = Some(stop.clone());
        Some(stop)
    }

    /// Signals the clock task to exit. Must be called with the game lock held;
    /// safe to call on a game whose clock is not running (pure no-op).
    pub fn stop_clock(&mut self) {
        if !self.clock_running {
            return;
        }
        if let Some(stop) = self.clock_stop.take() {
            stop.notify_waiters();
        }
        self.clock_running = false;
    }

    /// Remaining milliseconds for `color`, floored at zero.
    pub fn remaining_ms(&self, color: chess::Color) -> i64 {
        match color {
            chess::Color::White => self.white_time_ms,
            chess::Color::Black => self.black_time_ms,
        }
    }

    /// Applies `delta_ms` (positive=add, e.g. increment; negative=spend) to
    /// `color`'s clock, flooring at zero.
    pub fn adjust_remaining_ms(&mut self, color: chess::Color, delta_ms: i64) {
        let field = match color {
            chess::Color::White => &mut self.white_time_ms,
            chess::Color::Black => &mut self.black_time_ms,
        };
        *field = (*field + delta_ms).max(0);
    }

    pub fn participates(&self, identity: IdentityKey) -> bool {
        self.white.identity == identity
            || self.black.as_ref().is_some_and(|b| b.identity == identity)
    }
}

// FEN fields beyond the first four never affect repetition.
fn repetition_key(fen: &str) -> String {
    fen.split_whitespace().take(4).collect::<Vec<_>>().join(" ")
}

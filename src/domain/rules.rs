// Authoritative chess position tracking and move legality.
//
// Wraps `chess::Board` behind a narrow surface so the rest of the system only ever
// deals with UCI squares, FEN strings, SAN strings and a small outcome enum. Game-level
// bookkeeping that the board itself does not retain (halfmove clock, repetition) lives
// one layer up in [`crate::domain::game::Game`].

use chess::{Board, BoardStatus, ChessMove, Color, MoveGen, Piece, Rank, Square};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameOverReason {
    Checkmate,
    Stalemate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WinnerColor {
    White,
    Black,
    Draw,
}

#[derive(Debug, Clone)]
pub struct MoveOutcome {
    pub san: String,
    pub is_check: bool,
    pub fen: String,
    pub is_capture: bool,
    pub is_en_passant: bool,
    pub promotion: Option<Piece>,
    pub game_over: Option<(WinnerColor, GameOverReason)>,
}

#[derive(Debug, thiserror::Error)]
pub enum MoveError {
    #[error("no piece on the source square")]
    NoPieceOnSquare,
    #[error("illegal move")]
    Illegal,
    #[error("invalid square or promotion notation")]
    BadNotation,
}

/// Thin adapter over `chess::Board`; the only mutator of the authoritative position.
pub struct RulesEngine {
    board: Board,
}

impl RulesEngine {
    pub fn new_standard() -> Self {
        Self {
            board: Board::default(),
        }
    }

    pub fn side_to_move(&self) -> Color {
        self.board.side_to_move()
    }

    pub fn fen(&self) -> String {
        self.board.to_string()
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    /// Validates and applies `from`-`to` (plus optional promotion letter) against the
    /// current position. On success the position is advanced and a full outcome,
    /// including SAN and game-over detection, is returned.
    pub fn try_move(
        &mut self,
        from: &str,
        to: &str,
        promotion: Option<char>,
    ) -> Result<MoveOutcome, MoveError> {
        let source = Square::from_str(from).map_err(|_| MoveError::BadNotation)?;
        let dest = Square::from_str(to).map_err(|_| MoveError::BadNotation)?;
        let promo = promotion.map(promotion_piece).transpose()?;

        let mover = self
            .board
            .piece_on(source)
            .ok_or(MoveError::NoPieceOnSquare)?;
        let is_en_passant = is_en_passant_capture(&self.board, source, dest, mover);
        let is_capture = self.board.piece_on(dest).is_some() || is_en_passant;

        let candidate = ChessMove::new(source, dest, promo);
        if !MoveGen::new_legal(&self.board).any(|m| m == candidate) {
            return Err(MoveError::Illegal);
        }

        let san_body = build_san(&self.board, candidate, mover, is_capture);

        let mut next = Board::default();
        self.board.make_move(candidate, &mut next);
        self.board = next;

        let is_check = self.board.checkers().popcnt() > 0;
        let status = self.board.status();
        let game_over = match status {
            BoardStatus::Checkmate => {
                let winner = match self.board.side_to_move() {
                    Color::White => WinnerColor::Black,
                    Color::Black => WinnerColor::White,
                };
                Some((winner, GameOverReason::Checkmate))
            }
            BoardStatus::Stalemate => Some((WinnerColor::Draw, GameOverReason::Stalemate)),
            BoardStatus::Ongoing => None,
        };

        let san = match &game_over {
            Some((_, GameOverReason::Checkmate)) => format!("{san_body}#"),
            _ if is_check => format!("{san_body}+"),
            _ => san_body,
        };

        Ok(MoveOutcome {
            san,
            is_check,
            fen: self.board.to_string(),
            is_capture,
            is_en_passant,
            promotion: promo,
            game_over,
        })
    }

    /// Coarse insufficient-material check (king vs king, king+minor vs king).
    pub fn has_insufficient_material(&self) -> bool {
        let mut minors = 0u32;
        let mut has_major_or_pawn = false;
        for sq in *self.board.combined() {
            match self.board.piece_on(sq) {
                Some(Piece::Pawn) | Some(Piece::Rook) | Some(Piece::Queen) => {
                    has_major_or_pawn = true;
                }
                Some(Piece::Knight) | Some(Piece::Bishop) => minors += 1,
                _ => {}
            }
        }
        !has_major_or_pawn && minors <= 1
    }
}

/// True if the losing king, at checkmate, never left its home rank.
pub fn is_back_rank_mate(board: &Board, checkmated: Color) -> bool {
    let king_sq = board.king_square(checkmated);
    let home_rank = match checkmated {
        Color::White => Rank::First,
        Color::Black => Rank::Eighth,
    };
    king_sq.get_rank() == home_rank
}

fn is_en_passant_capture(board: &Board, source: Square, dest: Square, mover: Piece) -> bool {
    mover == Piece::Pawn && board.piece_on(dest).is_none() && source.get_file() != dest.get_file()
}

fn promotion_piece(c: char) -> Result<Piece, MoveError> {
    match c.to_ascii_lowercase() {
        'q' => Ok(Piece::Queen),
        'r' => Ok(Piece::Rook),
        'b' => Ok(Piece::Bishop),
        'n' => Ok(Piece::Knight),
        _ => Err(MoveError::BadNotation),
    }
}

fn piece_letter(p: Piece) -> char {
    match p {
        Piece::Knight => 'N',
        Piece::Bishop => 'B',
        Piece::Rook => 'R',
        Piece::Queen => 'Q',
        Piece::King => 'K',
        Piece::Pawn => unreachable!("pawns have no SAN piece letter"),
    }
}

fn build_san(board: &Board, mv: ChessMove, mover: Piece, is_capture: bool) -> String {
    let dest = mv.get_dest();
    let dest_str = dest.to_string();

    if mover == Piece::Pawn {
        let mut s = String::new();
        if is_capture {
            s.push(file_char(mv.get_source()));
            s.push('x');
        }
        s.push_str(&dest_str);
        if let Some(p) = mv.get_promotion() {
            s.push('=');
            s.push(piece_letter(p));
        }
        return s;
    }

    if mover == Piece::King {
        let src = mv.get_source();
        let delta = dest.get_file().to_index() as i8 - src.get_file().to_index() as i8;
        if delta.abs() == 2 {
            return if delta > 0 { "O-O".to_string() } else { "O-O-O".to_string() };
        }
    }

    let mut s = String::new();
    s.push(piece_letter(mover));
    s.push_str(&disambiguation(board, mv, mover));
    if is_capture {
        s.push('x');
    }
    s.push_str(&dest_str);
    s
}

fn disambiguation(board: &Board, mv: ChessMove, mover: Piece) -> String {
    let src = mv.get_source();
    let dest = mv.get_dest();
    let others: Vec<Square> = MoveGen::new_legal(board)
        .filter(|m| {
            m.get_dest() == dest
                && m.get_source() != src
                && board.piece_on(m.get_source()) == Some(mover)
        })
        .map(|m| m.get_source())
        .collect();

    if others.is_empty() {
        return String::new();
    }
    let same_file = others.iter().any(|s| s.get_file() == src.get_file());
    let same_rank = others.iter().any(|s| s.get_rank() == src.get_rank());
    if !same_file {
        file_char(src).to_string()
    } else if !same_rank {
        rank_char(src).to_string()
    } else {
        format!("{}{}", file_char(src), rank_char(src))
    }
}

fn file_char(sq: Square) -> char {
    (b'a' + sq.get_file().to_index() as u8) as char
}

fn rank_char(sq: Square) -> char {
    (b'1' + sq.get_rank().to_index() as u8) as char
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opening_move_is_legal_and_not_check() {
        let mut rules = RulesEngine::new_standard();
        let outcome = rules.try_move("e2", "e4", None).expect("legal move");
        assert_eq!(outcome.san, "e4");
        assert!(!outcome.is_check);
        assert!(outcome.game_over.is_none());
    }

    #[test]
    fn rejects_illegal_move() {
        let mut rules = RulesEngine::new_standard();
        let err = rules.try_move("e2", "e5", None).unwrap_err();
        assert!(matches!(err, MoveError::Illegal));
    }

    #[test]
    fn scholars_mate_ends_in_checkmate() {
        let mut rules = RulesEngine::new_standard();
        for (from, to) in [
            ("e2", "e4"),
            ("e7", "e5"),
            ("f1", "c4"),
            ("b8", "c6"),
            ("d1", "h5"),
            ("g8", "f6"),
        ] {
            rules.try_move(from, to, None).expect("legal move");
        }
        let mate = rules.try_move("h5", "f7", None).expect("legal move");
        assert!(matches!(
            mate.game_over,
            Some((WinnerColor::White, GameOverReason::Checkmate))
        ));
        assert!(mate.san.ends_with('#'));
    }
}

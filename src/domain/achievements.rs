// Achievement catalog and pure unlock-evaluation logic. No datastore access here:
// callers supply the already-fetched win streak / games-played / existing-unlocks state
// and persist whatever comes back (see `use_cases::finalizer`).

use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rarity {
    Common,
    Uncommon,
    Rare,
    Epic,
    Legendary,
}

#[derive(Debug, Clone, Copy)]
pub struct Achievement {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub category: &'static str,
    pub rarity: Rarity,
    pub points: u32,
}

pub const CATALOG: &[Achievement] = &[
    Achievement { id: "first_win", name: "First Blood", description: "Win your first game", category: "chess_moments", rarity: Rarity::Common, points: 10 },
    Achievement { id: "scholars_mate", name: "Scholar's Mate", description: "Win by checkmate in the opening moves", category: "chess_moments", rarity: Rarity::Uncommon, points: 25 },
    Achievement { id: "back_rank_mate", name: "Back Rank Blunder", description: "Deliver checkmate with the enemy king trapped on its home rank", category: "chess_moments", rarity: Rarity::Uncommon, points: 25 },
    Achievement { id: "promotion", name: "Promoted", description: "Promote a pawn", category: "chess_moments", rarity: Rarity::Common, points: 10 },
    Achievement { id: "underpromotion", name: "Underdog", description: "Promote a pawn to anything but a queen", category: "chess_moments", rarity: Rarity::Rare, points: 50 },
    Achievement { id: "en_passant", name: "En Passant", description: "Capture a pawn en passant", category: "chess_moments", rarity: Rarity::Uncommon, points: 25 },
    Achievement { id: "win_streak_3", name: "On a Roll", description: "Win 3 games in a row", category: "streaks", rarity: Rarity::Common, points: 15 },
    Achievement { id: "win_streak_5", name: "Hot Streak", description: "Win 5 games in a row", category: "streaks", rarity: Rarity::Uncommon, points: 30 },
    Achievement { id: "win_streak_10", name: "Unstoppable", description: "Win 10 games in a row", category: "streaks", rarity: Rarity::Rare, points: 75 },
    Achievement { id: "win_streak_20", name: "Dominant", description: "Win 20 games in a row", category: "streaks", rarity: Rarity::Epic, points: 150 },
    Achievement { id: "rating_1600", name: "Club Player", description: "Reach a rating of 1600", category: "rating", rarity: Rarity::Common, points: 20 },
    Achievement { id: "rating_1800", name: "Strong Club Player", description: "Reach a rating of 1800", category: "rating", rarity: Rarity::Uncommon, points: 30 },
    Achievement { id: "rating_2000", name: "Expert", description: "Reach a rating of 2000", category: "rating", rarity: Rarity::Rare, points: 50 },
    Achievement { id: "rating_2200", name: "Candidate Master", description: "Reach a rating of 2200", category: "rating", rarity: Rarity::Rare, points: 75 },
    Achievement { id: "rating_2400", name: "Master", description: "Reach a rating of 2400", category: "rating", rarity: Rarity::Epic, points: 100 },
    Achievement { id: "rating_2600", name: "Senior Master", description: "Reach a rating of 2600", category: "rating", rarity: Rarity::Epic, points: 150 },
    Achievement { id: "rating_3000", name: "Grandmaster", description: "Reach a rating of 3000", category: "rating", rarity: Rarity::Legendary, points: 300 },
    Achievement { id: "games_10", name: "Getting Started", description: "Play 10 games", category: "volume", rarity: Rarity::Common, points: 10 },
    Achievement { id: "games_50", name: "Regular", description: "Play 50 games", category: "volume", rarity: Rarity::Common, points: 20 },
    Achievement { id: "games_100", name: "Dedicated", description: "Play 100 games", category: "volume", rarity: Rarity::Uncommon, points: 30 },
    Achievement { id: "games_500", name: "Veteran", description: "Play 500 games", category: "volume", rarity: Rarity::Rare, points: 75 },
    Achievement { id: "games_1000", name: "Lifer", description: "Play 1000 games", category: "volume", rarity: Rarity::Epic, points: 150 },
];

/// Move-tag flags accumulated over the course of a game, plus final-position flags
/// filled in once the game ends. Mirrors the original service's move-by-move analyzer.
#[derive(Debug, Clone, Copy, Default)]
pub struct GameFlags {
    pub has_promotion: bool,
    pub has_underpromotion: bool,
    pub has_en_passant: bool,
    pub is_back_rank_mate: bool,
    pub is_scholars_mate: bool,
    pub move_count: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct AchievementContext {
    pub won: bool,
    pub new_rating: i32,
    pub win_streak: u32,
    pub games_played: u32,
    pub flags: GameFlags,
}

/// Returns every achievement `ctx` newly qualifies for, skipping ids already in `existing`.
/// Order matches the catalog's intent, not the grant order, callers treat this as a set.
pub fn check_game_achievements(
    ctx: &AchievementContext,
    existing: &HashSet<String>,
) -> Vec<&'static Achievement> {
    let mut unlocked = Vec::new();
    let mut grant = |id: &'static str, unlocked: &mut Vec<&'static Achievement>| {
        if existing.contains(id) {
            return;
        }
        if let Some(a) = CATALOG.iter().find(|a| a.id == id) {
            unlocked.push(a);
        }
    };

    if ctx.won {
        grant("first_win", &mut unlocked);
        if ctx.flags.is_scholars_mate {
            grant("scholars_mate", &mut unlocked);
        }
        if ctx.flags.is_back_rank_mate {
            grant("back_rank_mate", &mut unlocked);
        }
    }
    if ctx.flags.has_promotion {
        grant("promotion", &mut unlocked);
    }
    if ctx.flags.has_underpromotion {
        grant("underpromotion", &mut unlocked);
    }
    if ctx.flags.has_en_passant {
        grant("en_passant", &mut unlocked);
    }

    for (threshold, id) in [
        (3, "win_streak_3"),
        (5, "win_streak_5"),
        (10, "win_streak_10"),
        (20, "win_streak_20"),
    ] {
        if ctx.win_streak >= threshold {
            grant(id, &mut unlocked);
        }
    }
    for (threshold, id) in [
        (1600, "rating_1600"),
        (1800, "rating_1800"),
        (2000, "rating_2000"),
        (2200, "rating_2200"),
        (2400, "rating_2400"),
        (2600, "rating_2600"),
        (3000, "rating_3000"),
    ] {
        if ctx.new_rating >= threshold {
            grant(id, &mut unlocked);
        }
    }
    for (threshold, id) in [
        (10, "games_10"),
        (50, "games_50"),
        (100, "games_100"),
        (500, "games_500"),
        (1000, "games_1000"),
    ] {
        if ctx.games_played >= threshold {
            grant(id, &mut unlocked);
        }
    }

    unlocked
}

/// A crude but source-faithful heuristic: a checkmate delivered in 4-7 plies.
pub fn is_scholars_mate_shape(ply_count: usize) -> bool {
    (4..=7).contains(&ply_count)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(flags: GameFlags) -> AchievementContext {
        AchievementContext {
            won: true,
            new_rating: 1500,
            win_streak: 1,
            games_played: 1,
            flags,
        }
    }

    #[test]
    fn first_win_grants_once() {
        let existing = HashSet::new();
        let unlocked = check_game_achievements(&ctx(GameFlags::default()), &existing);
        assert!(unlocked.iter().any(|a| a.id == "first_win"));
    }

    #[test]
    fn already_held_achievements_are_not_regranted() {
        let mut existing = HashSet::new();
        existing.insert("first_win".to_string());
        let unlocked = check_game_achievements(&ctx(GameFlags::default()), &existing);
        assert!(!unlocked.iter().any(|a| a.id == "first_win"));
    }

    #[test]
    fn rating_threshold_grants_are_cumulative() {
        let existing = HashSet::new();
        let mut context = ctx(GameFlags::default());
        context.new_rating = 2100;
        let unlocked = check_game_achievements(&context, &existing);
        assert!(unlocked.iter().any(|a| a.id == "rating_1600"));
        assert!(unlocked.iter().any(|a| a.id == "rating_1800"));
        assert!(unlocked.iter().any(|a| a.id == "rating_2000"));
        assert!(!unlocked.iter().any(|a| a.id == "rating_2200"));
    }

    #[test]
    fn scholars_mate_shape_bounds() {
        assert!(!is_scholars_mate_shape(3));
        assert!(is_scholars_mate_shape(4));
        assert!(is_scholars_mate_shape(7));
        assert!(!is_scholars_mate_shape(8));
    }
}

//! Per-market settlement rules
//!
//! One settlement function per market tag, looked up from a table. The
//! predictor prices markets by summing scoreline cells through the same
//! functions, so pricing and settlement can never disagree.

use serde::{Deserialize, Serialize};

use crate::types::{FinalScore, MarketKind, MarketTag, Selection};

/// Result of applying a market rule to a final score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Settlement {
    Win,
    Loss,
    /// Exact landing on a whole-number line; stake returned
    Push,
}

pub type SettleFn = fn(&MarketKind, &Selection, FinalScore) -> Settlement;

/// Adding a market means adding a row here
pub const SETTLEMENT_TABLE: [(MarketTag, SettleFn); 5] = [
    (MarketTag::MatchResult, settle_match_result),
    (MarketTag::BothTeamsToScore, settle_both_teams_to_score),
    (MarketTag::TotalGoals, settle_total_goals),
    (MarketTag::Handicap, settle_handicap),
    (MarketTag::CorrectScore, settle_correct_score),
];

pub fn settlement_fn(tag: MarketTag) -> SettleFn {
    SETTLEMENT_TABLE
        .iter()
        .find(|(t, _)| *t == tag)
        .map(|(_, f)| *f)
        .unwrap_or(settle_unknown)
}

/// Settle `selection` in `market` against `score`
pub fn settle(market: &MarketKind, selection: &Selection, score: FinalScore) -> Settlement {
    settlement_fn(market.tag())(market, selection, score)
}

fn win_if(cond: bool) -> Settlement {
    if cond {
        Settlement::Win
    } else {
        Settlement::Loss
    }
}

/// Compare two values given in half-goal units
fn against_line(value_halves: i32, line_halves: i32, over: bool) -> Settlement {
    match value_halves.cmp(&line_halves) {
        std::cmp::Ordering::Equal => Settlement::Push,
        std::cmp::Ordering::Greater => win_if(over),
        std::cmp::Ordering::Less => win_if(!over),
    }
}

fn settle_match_result(_: &MarketKind, selection: &Selection, score: FinalScore) -> Settlement {
    match selection {
        Selection::Home => win_if(score.home > score.away),
        Selection::Draw => win_if(score.home == score.away),
        Selection::Away => win_if(score.home < score.away),
        _ => Settlement::Loss,
    }
}

fn settle_both_teams_to_score(
    _: &MarketKind,
    selection: &Selection,
    score: FinalScore,
) -> Settlement {
    match selection {
        Selection::Yes => win_if(score.both_scored()),
        Selection::No => win_if(!score.both_scored()),
        _ => Settlement::Loss,
    }
}

fn settle_total_goals(market: &MarketKind, selection: &Selection, score: FinalScore) -> Settlement {
    let MarketKind::TotalGoals { line } = market else {
        return Settlement::Loss;
    };
    let total_halves = score.total() as i32 * 2;
    match selection {
        Selection::Over => against_line(total_halves, line.half_goals(), true),
        Selection::Under => against_line(total_halves, line.half_goals(), false),
        _ => Settlement::Loss,
    }
}

/// The line is added to the home score; the away side carries the mirror line
fn settle_handicap(market: &MarketKind, selection: &Selection, score: FinalScore) -> Settlement {
    let MarketKind::Handicap { line } = market else {
        return Settlement::Loss;
    };
    let adjusted_home = score.home as i32 * 2 + line.half_goals();
    let away = score.away as i32 * 2;
    match selection {
        Selection::Home => against_line(adjusted_home, away, true),
        Selection::Away => against_line(adjusted_home, away, false),
        _ => Settlement::Loss,
    }
}

fn settle_correct_score(_: &MarketKind, selection: &Selection, score: FinalScore) -> Settlement {
    match selection {
        Selection::Score { home, away } => win_if(*home == score.home && *away == score.away),
        _ => Settlement::Loss,
    }
}

fn settle_unknown(_: &MarketKind, _: &Selection, _: FinalScore) -> Settlement {
    Settlement::Loss
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Line;

    fn s(h: u8, a: u8) -> FinalScore {
        FinalScore::new(h, a)
    }

    fn total(line: f64) -> MarketKind {
        MarketKind::TotalGoals {
            line: Line::new(line).unwrap(),
        }
    }

    fn hcp(line: f64) -> MarketKind {
        MarketKind::Handicap {
            line: Line::new(line).unwrap(),
        }
    }

    #[test]
    fn every_tag_has_a_table_entry() {
        for tag in [
            MarketTag::MatchResult,
            MarketTag::BothTeamsToScore,
            MarketTag::TotalGoals,
            MarketTag::Handicap,
            MarketTag::CorrectScore,
        ] {
            assert!(SETTLEMENT_TABLE.iter().any(|(t, _)| *t == tag), "{tag}");
        }
    }

    #[test]
    fn match_result() {
        let m = MarketKind::MatchResult;
        assert_eq!(settle(&m, &Selection::Home, s(2, 1)), Settlement::Win);
        assert_eq!(settle(&m, &Selection::Draw, s(2, 1)), Settlement::Loss);
        assert_eq!(settle(&m, &Selection::Draw, s(0, 0)), Settlement::Win);
        assert_eq!(settle(&m, &Selection::Away, s(0, 3)), Settlement::Win);
    }

    #[test]
    fn both_teams_to_score() {
        let m = MarketKind::BothTeamsToScore;
        assert_eq!(settle(&m, &Selection::Yes, s(1, 1)), Settlement::Win);
        assert_eq!(settle(&m, &Selection::Yes, s(3, 0)), Settlement::Loss);
        assert_eq!(settle(&m, &Selection::No, s(3, 0)), Settlement::Win);
    }

    #[test]
    fn half_lines_never_push() {
        assert_eq!(settle(&total(2.5), &Selection::Over, s(1, 1)), Settlement::Loss);
        assert_eq!(settle(&total(2.5), &Selection::Under, s(1, 1)), Settlement::Win);
        assert_eq!(settle(&total(2.5), &Selection::Over, s(2, 1)), Settlement::Win);
    }

    #[test]
    fn whole_lines_push_on_exact_total() {
        assert_eq!(settle(&total(3.0), &Selection::Over, s(2, 1)), Settlement::Push);
        assert_eq!(settle(&total(3.0), &Selection::Under, s(2, 1)), Settlement::Push);
        assert_eq!(settle(&total(3.0), &Selection::Over, s(2, 2)), Settlement::Win);
    }

    #[test]
    fn handicap_adjusts_home_score() {
        // Home -1.5: needs to win by 2
        assert_eq!(settle(&hcp(-1.5), &Selection::Home, s(2, 1)), Settlement::Loss);
        assert_eq!(settle(&hcp(-1.5), &Selection::Away, s(2, 1)), Settlement::Win);
        assert_eq!(settle(&hcp(-1.5), &Selection::Home, s(3, 1)), Settlement::Win);
        // Home -1: one-goal win is a push
        assert_eq!(settle(&hcp(-1.0), &Selection::Home, s(2, 1)), Settlement::Push);
        assert_eq!(settle(&hcp(-1.0), &Selection::Away, s(2, 1)), Settlement::Push);
        // Home +1: a one-goal defeat is a push
        assert_eq!(settle(&hcp(1.0), &Selection::Home, s(0, 1)), Settlement::Push);
        assert_eq!(settle(&hcp(1.0), &Selection::Home, s(1, 1)), Settlement::Win);
    }

    #[test]
    fn correct_score() {
        let m = MarketKind::CorrectScore;
        let pick = Selection::Score { home: 2, away: 1 };
        assert_eq!(settle(&m, &pick, s(2, 1)), Settlement::Win);
        assert_eq!(settle(&m, &pick, s(1, 2)), Settlement::Loss);
    }
}

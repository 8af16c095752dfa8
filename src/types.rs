//! Core types used throughout OddsBreaker
//!
//! Defines fixtures, historical results, market quotes, feature snapshots
//! and bet records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{EngineError, Result};

/// Fixture identifier assigned by the data provider
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FixtureId(pub String);

impl FixtureId {
    pub fn new(id: impl Into<String>) -> Self {
        FixtureId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FixtureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Team identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TeamId(pub String);

impl TeamId {
    pub fn new(id: impl Into<String>) -> Self {
        TeamId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TeamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Bet identifier (UUID v4)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BetId(pub String);

impl BetId {
    pub fn generate() -> Self {
        BetId(uuid::Uuid::new_v4().to_string())
    }
}

impl fmt::Display for BetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A scheduled match. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchFixture {
    pub id: FixtureId,
    pub home: TeamId,
    pub away: TeamId,
    /// Scheduled kickoff
    pub kickoff: DateTime<Utc>,
    pub league: String,
}

impl fmt::Display for MatchFixture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} vs {} ({})", self.home, self.away, self.id)
    }
}

/// Full-time score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FinalScore {
    pub home: u8,
    pub away: u8,
}

impl FinalScore {
    pub fn new(home: u8, away: u8) -> Self {
        Self { home, away }
    }

    pub fn total(&self) -> u32 {
        self.home as u32 + self.away as u32
    }

    pub fn both_scored(&self) -> bool {
        self.home > 0 && self.away > 0
    }
}

impl fmt::Display for FinalScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.home, self.away)
    }
}

/// What the results provider knows about a fixture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchOutcome {
    Final(FinalScore),
    NotFinished,
}

/// Closing 1X2 prices stored alongside historical results (used by replay)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClosingOdds {
    pub home: f64,
    pub draw: f64,
    pub away: f64,
}

/// One played match from the raw history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalMatch {
    pub fixture_id: FixtureId,
    pub league: String,
    pub played_at: DateTime<Utc>,
    pub home: TeamId,
    pub away: TeamId,
    pub home_goals: u8,
    pub away_goals: u8,
    #[serde(default)]
    pub closing_odds: Option<ClosingOdds>,
}

impl HistoricalMatch {
    pub fn involves(&self, team: &TeamId) -> bool {
        &self.home == team || &self.away == team
    }

    /// Goals (for, against) and whether `team` played at home.
    pub fn perspective(&self, team: &TeamId) -> Option<(u8, u8, bool)> {
        if &self.home == team {
            Some((self.home_goals, self.away_goals, true))
        } else if &self.away == team {
            Some((self.away_goals, self.home_goals, false))
        } else {
            None
        }
    }

    pub fn score(&self) -> FinalScore {
        FinalScore::new(self.home_goals, self.away_goals)
    }
}

/// Recency-weighted rates for one venue
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct VenueSplit {
    pub matches: usize,
    pub scored_rate: f64,
    pub conceded_rate: f64,
}

/// Record of recent meetings against a given opponent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeadToHead {
    pub opponent: TeamId,
    pub meetings: usize,
    pub wins: usize,
    pub draws: usize,
    pub losses: usize,
    pub goals_for: u32,
    pub goals_against: u32,
}

/// Per-team statistical snapshot. Always derivable from raw history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamStatsSnapshot {
    pub team: TeamId,
    pub league: String,
    pub as_of: DateTime<Utc>,
    /// Matches inside the recency window
    pub matches_used: usize,
    /// Sum of recency weights over the window
    pub effective_weight: f64,
    /// Weighted goals scored per match
    pub scored_rate: f64,
    /// Weighted goals conceded per match
    pub conceded_rate: f64,
    pub home: VenueSplit,
    pub away: VenueSplit,
    /// League average home-side goals per match
    pub league_home_goals: f64,
    /// League average away-side goals per match
    pub league_away_goals: f64,
    pub head_to_head: Option<HeadToHead>,
    /// Rates were replaced by league averages (too little history)
    pub league_fallback: bool,
}

impl TeamStatsSnapshot {
    /// League average goals per team per match
    pub fn league_goals_per_team(&self) -> f64 {
        (self.league_home_goals + self.league_away_goals) / 2.0
    }
}

/// Numeric inputs a prediction was built from. Stored on bets so the
/// learner can re-price a settled bet under candidate parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchupFeatures {
    /// League goals per team per match
    pub base_goals: f64,
    /// Home side attack relative to league (1.0 = average)
    pub home_attack: f64,
    /// Home side goals conceded relative to league (1.0 = average)
    pub home_defense: f64,
    pub away_attack: f64,
    pub away_defense: f64,
    pub home_samples: usize,
    pub away_samples: usize,
}

impl MatchupFeatures {
    /// Smallest sample behind either side
    pub fn sample_size(&self) -> usize {
        self.home_samples.min(self.away_samples)
    }
}

/// Goal line in half-goal units (2.5 is stored as 5)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Line(i32);

impl Line {
    pub fn new(value: f64) -> Result<Self> {
        if !value.is_finite() {
            return Err(EngineError::invalid_quote(format!(
                "line {} is not finite",
                value
            )));
        }
        let halves = value * 2.0;
        if (halves - halves.round()).abs() > 1e-9 {
            return Err(EngineError::invalid_quote(format!(
                "line {} is not a multiple of 0.5",
                value
            )));
        }
        Ok(Line(halves.round() as i32))
    }

    pub fn value(self) -> f64 {
        self.0 as f64 / 2.0
    }

    pub fn half_goals(self) -> i32 {
        self.0
    }

    /// Whole-number lines can land exactly on the line (push)
    pub fn is_whole(self) -> bool {
        self.0 % 2 == 0
    }
}

impl TryFrom<f64> for Line {
    type Error = EngineError;

    fn try_from(value: f64) -> Result<Self> {
        Line::new(value)
    }
}

impl From<Line> for f64 {
    fn from(line: Line) -> f64 {
        line.value()
    }
}

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1}", self.value())
    }
}

/// Market tag, the key of the settlement table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MarketTag {
    MatchResult,
    BothTeamsToScore,
    TotalGoals,
    Handicap,
    CorrectScore,
}

impl fmt::Display for MarketTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarketTag::MatchResult => write!(f, "1X2"),
            MarketTag::BothTeamsToScore => write!(f, "BTTS"),
            MarketTag::TotalGoals => write!(f, "O/U"),
            MarketTag::Handicap => write!(f, "HCP"),
            MarketTag::CorrectScore => write!(f, "CS"),
        }
    }
}

/// Market type with its parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MarketKind {
    MatchResult,
    BothTeamsToScore,
    /// Over/under total goals at `line`
    TotalGoals { line: Line },
    /// Goal handicap applied to the home side's score
    Handicap { line: Line },
    CorrectScore,
}

impl MarketKind {
    pub fn tag(&self) -> MarketTag {
        match self {
            MarketKind::MatchResult => MarketTag::MatchResult,
            MarketKind::BothTeamsToScore => MarketTag::BothTeamsToScore,
            MarketKind::TotalGoals { .. } => MarketTag::TotalGoals,
            MarketKind::Handicap { .. } => MarketTag::Handicap,
            MarketKind::CorrectScore => MarketTag::CorrectScore,
        }
    }

    /// Whether `selection` is a valid outcome of this market
    pub fn accepts(&self, selection: &Selection) -> bool {
        match (self, selection) {
            (MarketKind::MatchResult, Selection::Home | Selection::Draw | Selection::Away) => true,
            (MarketKind::BothTeamsToScore, Selection::Yes | Selection::No) => true,
            (MarketKind::TotalGoals { .. }, Selection::Over | Selection::Under) => true,
            (MarketKind::Handicap { .. }, Selection::Home | Selection::Away) => true,
            (MarketKind::CorrectScore, Selection::Score { .. }) => true,
            _ => false,
        }
    }

    /// The mutually-exclusive selections of this market. Correct score is
    /// enumerated up to `max_goals` per side.
    pub fn selections(&self, max_goals: u8) -> Vec<Selection> {
        match self {
            MarketKind::MatchResult => vec![Selection::Home, Selection::Draw, Selection::Away],
            MarketKind::BothTeamsToScore => vec![Selection::Yes, Selection::No],
            MarketKind::TotalGoals { .. } => vec![Selection::Over, Selection::Under],
            MarketKind::Handicap { .. } => vec![Selection::Home, Selection::Away],
            MarketKind::CorrectScore => (0..=max_goals)
                .flat_map(|home| (0..=max_goals).map(move |away| Selection::Score { home, away }))
                .collect(),
        }
    }

    /// Markets that can settle as void on an exact line
    pub fn can_push(&self) -> bool {
        match self {
            MarketKind::TotalGoals { line } | MarketKind::Handicap { line } => line.is_whole(),
            _ => false,
        }
    }
}

impl fmt::Display for MarketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarketKind::TotalGoals { line } => write!(f, "O/U {}", line),
            MarketKind::Handicap { line } => write!(f, "HCP {:+.1}", line.value()),
            other => write!(f, "{}", other.tag()),
        }
    }
}

/// Outcome selected within a market
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Selection {
    Home,
    Draw,
    Away,
    Yes,
    No,
    Over,
    Under,
    Score { home: u8, away: u8 },
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selection::Home => write!(f, "1"),
            Selection::Draw => write!(f, "X"),
            Selection::Away => write!(f, "2"),
            Selection::Yes => write!(f, "YES"),
            Selection::No => write!(f, "NO"),
            Selection::Over => write!(f, "OVER"),
            Selection::Under => write!(f, "UNDER"),
            Selection::Score { home, away } => write!(f, "{}-{}", home, away),
        }
    }
}

/// Immutable snapshot of one offered price
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketQuote {
    pub fixture_id: FixtureId,
    /// Bookmaker or source name
    pub provider: String,
    pub market: MarketKind,
    pub selection: Selection,
    /// Decimal odds
    pub odds: f64,
    /// Provider timestamp
    pub quoted_at: DateTime<Utc>,
}

impl MarketQuote {
    /// Reject malformed prices before they reach the detector
    pub fn validate(&self) -> Result<()> {
        if !self.odds.is_finite() || self.odds <= 1.0 {
            return Err(EngineError::invalid_quote(format!(
                "{} {} {}: odds {} must be finite and above 1.0",
                self.fixture_id, self.market, self.selection, self.odds
            )));
        }
        if !self.market.accepts(&self.selection) {
            return Err(EngineError::invalid_quote(format!(
                "{}: selection {} does not belong to market {}",
                self.fixture_id, self.selection, self.market
            )));
        }
        Ok(())
    }

    /// Raw implied probability (1 / odds, margin included)
    pub fn implied_probability(&self) -> f64 {
        1.0 / self.odds
    }

    pub fn key(&self) -> BetKey {
        BetKey {
            fixture_id: self.fixture_id.clone(),
            market: self.market,
        }
    }
}

/// Community prediction votes for a match result (auxiliary signal)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommunityVotes {
    pub home: u64,
    pub draw: u64,
    pub away: u64,
}

impl CommunityVotes {
    pub fn total(&self) -> u64 {
        self.home + self.draw + self.away
    }

    /// Vote shares (home, draw, away); None without votes
    pub fn shares(&self) -> Option<(f64, f64, f64)> {
        let total = self.total();
        if total == 0 {
            return None;
        }
        let t = total as f64;
        Some((
            self.home as f64 / t,
            self.draw as f64 / t,
            self.away as f64 / t,
        ))
    }
}

/// Uniqueness key for open bets
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BetKey {
    pub fixture_id: FixtureId,
    pub market: MarketKind,
}

impl fmt::Display for BetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.fixture_id, self.market)
    }
}

/// Bet lifecycle. `Pending` moves exactly once to a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BetStatus {
    Pending,
    Won,
    Lost,
    Void,
}

impl BetStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, BetStatus::Pending)
    }
}

impl fmt::Display for BetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BetStatus::Pending => write!(f, "PENDING"),
            BetStatus::Won => write!(f, "WON"),
            BetStatus::Lost => write!(f, "LOST"),
            BetStatus::Void => write!(f, "VOID"),
        }
    }
}

/// A placed bet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BetRecord {
    pub id: BetId,
    pub fixture: MatchFixture,
    pub market: MarketKind,
    pub selection: Selection,
    pub stake: f64,
    /// Decimal odds at placement
    pub odds: f64,
    /// Provider of the quote this bet was placed against
    pub quote_provider: String,
    /// Timestamp of that quote snapshot
    pub quoted_at: DateTime<Utc>,
    pub predicted_probability: f64,
    pub edge: f64,
    /// ModelParameters version used for the prediction
    pub parameter_version: u64,
    pub matchup: MatchupFeatures,
    pub placed_at: DateTime<Utc>,
    pub status: BetStatus,
    #[serde(default)]
    pub settled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub final_score: Option<FinalScore>,
    /// Amount returned on settlement (stake included)
    #[serde(default)]
    pub payout: Option<f64>,
    /// Parameter version produced by the learning batch that consumed this bet
    #[serde(default)]
    pub learned_in_version: Option<u64>,
}

impl BetRecord {
    pub fn key(&self) -> BetKey {
        BetKey {
            fixture_id: self.fixture.id.clone(),
            market: self.market,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == BetStatus::Pending
    }

    /// Realized profit/loss, once settled
    pub fn pnl(&self) -> Option<f64> {
        self.payout.map(|p| p - self.stake)
    }

    pub fn potential_payout(&self) -> f64 {
        self.stake * self.odds
    }
}

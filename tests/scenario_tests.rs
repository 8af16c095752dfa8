//! Tests de escenarios de punta a punta sobre la API pública

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone, Utc};
    use std::sync::Arc;

    use oddsbreaker::betting::{
        AutoBetExecutor, OutcomeVerifier, ValueDetector, ValueGrade, Verification,
    };
    use oddsbreaker::config::{AppConfig, StakingPolicy};
    use oddsbreaker::error::{BankrollRule, EngineError};
    use oddsbreaker::ml_engine::predictor::ExpectedGoals;
    use oddsbreaker::ml_engine::{ModelParameters, PoissonPredictor};
    use oddsbreaker::persistence::{BetLedger, LocalBetLedger};
    use oddsbreaker::risk::RiskManager;
    use oddsbreaker::types::{
        BetId, BetRecord, BetStatus, FinalScore, FixtureId, Line, MarketKind, MarketQuote,
        MatchFixture, MatchOutcome, MatchupFeatures, Selection, TeamId,
    };

    fn kickoff() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 8, 17, 14, 0, 0).unwrap()
    }

    fn fixture() -> MatchFixture {
        MatchFixture {
            id: FixtureId::new("epl-2024-001"),
            home: TeamId::new("MUN"),
            away: TeamId::new("FUL"),
            kickoff: kickoff(),
            league: "EPL".into(),
        }
    }

    fn quote(selection: Selection, odds: f64) -> MarketQuote {
        MarketQuote {
            fixture_id: fixture().id,
            provider: "book".into(),
            market: MarketKind::MatchResult,
            selection,
            odds,
            quoted_at: kickoff() - chrono::Duration::hours(2),
        }
    }

    fn pending_bet(market: MarketKind, selection: Selection, stake: f64, odds: f64) -> BetRecord {
        BetRecord {
            id: BetId::generate(),
            fixture: fixture(),
            market,
            selection,
            stake,
            odds,
            quote_provider: "book".into(),
            quoted_at: kickoff(),
            predicted_probability: 0.5,
            edge: 0.5 * odds - 1.0,
            parameter_version: 1,
            matchup: MatchupFeatures {
                base_goals: 1.35,
                home_attack: 1.0,
                home_defense: 1.0,
                away_attack: 1.0,
                away_defense: 1.0,
                home_samples: 8,
                away_samples: 8,
            },
            placed_at: kickoff() - chrono::Duration::hours(1),
            status: BetStatus::Pending,
            settled_at: None,
            final_score: None,
            payout: None,
            learned_in_version: None,
        }
    }

    async fn stored(ledger: &LocalBetLedger, bet: BetRecord) -> BetRecord {
        ledger.create(bet.clone()).await.unwrap();
        bet
    }

    // ============================================================================
    // Escenario A: predicción 1X2 y edges
    // ============================================================================

    #[test]
    fn test_scenario_a_probabilities_and_edges() {
        let config = AppConfig::default();
        let params = ModelParameters::genesis(&config.learning);
        let predictor = PoissonPredictor::new(config.prediction.clone());
        let prediction = predictor.predict_rates(
            &fixture().id,
            ExpectedGoals {
                home: 1.8,
                away: 1.1,
            },
            &params,
        );

        let home = prediction.probability(&MarketKind::MatchResult, &Selection::Home);
        let draw = prediction.probability(&MarketKind::MatchResult, &Selection::Draw);
        let away = prediction.probability(&MarketKind::MatchResult, &Selection::Away);
        assert!((home + draw + away - 1.0).abs() < 1e-9);
        assert!((home - 0.5376).abs() < 1e-3);
        assert!((draw - 0.2314).abs() < 1e-3);
        assert!((away - 0.2310).abs() < 1e-3);
        assert!(prediction.matrix.truncated_tail() < 1e-4);

        let quotes = vec![
            quote(Selection::Home, 2.10),
            quote(Selection::Draw, 3.40),
            quote(Selection::Away, 3.80),
        ];
        let detector = ValueDetector::new(config.value.clone());
        let bets = detector.detect(&prediction, &quotes);

        // Only the home price clears the 0.05 threshold (edge ~0.129)
        assert_eq!(bets.len(), 1);
        assert_eq!(bets[0].quote.selection, Selection::Home);
        assert!((bets[0].edge - 0.129).abs() < 1e-3);
        assert_eq!(bets[0].grade, ValueGrade::Gold);
        let margin = bets[0].margin.unwrap();
        assert!((margin - (1.0 / 2.1 + 1.0 / 3.4 + 1.0 / 3.8 - 1.0)).abs() < 1e-9);
    }

    // ============================================================================
    // Escenario B: liquidación ganada
    // ============================================================================

    #[tokio::test]
    async fn test_scenario_b_home_win_pays_stake_times_odds() {
        let ledger = Arc::new(LocalBetLedger::in_memory());
        let bet = stored(
            &ledger,
            pending_bet(MarketKind::MatchResult, Selection::Home, 10.0, 2.5),
        )
        .await;
        let verifier = OutcomeVerifier::new(ledger.clone());

        let result = verifier
            .verify(&bet, MatchOutcome::Final(FinalScore::new(2, 1)))
            .await
            .unwrap();
        let settled = result.bet();
        assert_eq!(settled.status, BetStatus::Won);
        assert!((settled.payout.unwrap() - 25.0).abs() < 1e-9);
        assert!((settled.pnl().unwrap() - 15.0).abs() < 1e-9);
    }

    // ============================================================================
    // Escenario C: líneas de goles con y sin empate posible
    // ============================================================================

    #[tokio::test]
    async fn test_scenario_c_half_line_never_voids_whole_line_pushes() {
        let ledger = Arc::new(LocalBetLedger::in_memory());
        let verifier = OutcomeVerifier::new(ledger.clone());

        let half = stored(
            &ledger,
            pending_bet(
                MarketKind::TotalGoals {
                    line: Line::new(2.5).unwrap(),
                },
                Selection::Over,
                10.0,
                1.9,
            ),
        )
        .await;
        let v = verifier
            .verify(&half, MatchOutcome::Final(FinalScore::new(1, 1)))
            .await
            .unwrap();
        assert_eq!(v.status(), BetStatus::Lost);
        assert_eq!(v.bet().payout, Some(0.0));

        let mut whole_bet = pending_bet(
            MarketKind::TotalGoals {
                line: Line::new(3.0).unwrap(),
            },
            Selection::Over,
            10.0,
            2.2,
        );
        whole_bet.fixture.id = FixtureId::new("epl-2024-002");
        let whole = stored(&ledger, whole_bet).await;
        let v = verifier
            .verify(&whole, MatchOutcome::Final(FinalScore::new(2, 1)))
            .await
            .unwrap();
        assert_eq!(v.status(), BetStatus::Void);
        assert_eq!(v.bet().payout, Some(10.0));
    }

    // ============================================================================
    // Escenario D: tope de bankroll
    // ============================================================================

    #[tokio::test]
    async fn test_scenario_d_oversized_stake_rejected_without_record() {
        let mut config = AppConfig::default();
        config.staking.initial_capital = 1000.0;
        config.staking.bankroll_fraction = 0.05;
        config.staking.policy = StakingPolicy::Flat;
        config.staking.flat_stake = 60.0;

        let risk = RiskManager::new(config.staking.clone());
        assert!((risk.stake_cap(1000.0) - 50.0).abs() < 1e-9);

        let predictor = PoissonPredictor::new(config.prediction.clone());
        let prediction = predictor.predict_rates(
            &fixture().id,
            ExpectedGoals {
                home: 1.8,
                away: 1.1,
            },
            &ModelParameters::genesis(&config.learning),
        );
        let candidates = ValueDetector::new(config.value.clone())
            .detect(&prediction, &[quote(Selection::Home, 2.10)]);
        assert_eq!(candidates.len(), 1);

        let ledger = Arc::new(LocalBetLedger::in_memory());
        let executor = AutoBetExecutor::new(risk, ledger.clone());
        let err = executor.place(&fixture(), &candidates[0]).await.unwrap_err();
        match err {
            EngineError::BankrollExceeded { stake, limit, rule } => {
                assert_eq!(rule, BankrollRule::StakeFraction);
                assert!((stake - 60.0).abs() < 1e-9);
                assert!((limit - 50.0).abs() < 1e-9);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(ledger.list_all().await.unwrap().is_empty());
        assert_eq!(executor.risk().snapshot().open_exposure, 0.0);
    }

    // ============================================================================
    // Escenario E: verificación idempotente
    // ============================================================================

    #[tokio::test]
    async fn test_scenario_e_second_verification_changes_nothing() {
        let ledger = Arc::new(LocalBetLedger::in_memory());
        let bet = stored(
            &ledger,
            pending_bet(MarketKind::MatchResult, Selection::Home, 10.0, 2.5),
        )
        .await;
        let verifier = OutcomeVerifier::new(ledger.clone());
        let outcome = MatchOutcome::Final(FinalScore::new(3, 0));

        let first = verifier.verify(&bet, outcome).await.unwrap();
        assert!(matches!(first, Verification::Settled(_)));

        // The caller may still hold the stale pending copy
        let second = verifier.verify(&bet, outcome).await.unwrap();
        assert!(matches!(second, Verification::AlreadySettled(_)));
        assert_eq!(second.status(), BetStatus::Won);
        assert_eq!(second.bet().placed_at, bet.placed_at);
        assert_eq!(second.bet().stake, bet.stake);
        assert_eq!(second.bet().odds, bet.odds);
        assert_eq!(second.bet().settled_at, first.bet().settled_at);

        let all = ledger.list_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0], *second.bet());
    }

    #[test]
    fn test_ledger_usable_from_sync_code() {
        let ledger = LocalBetLedger::in_memory();
        let bet = pending_bet(MarketKind::BothTeamsToScore, Selection::Yes, 5.0, 1.8);
        tokio_test::block_on(async {
            ledger.create(bet.clone()).await.unwrap();
            assert_eq!(ledger.list_pending().await.unwrap(), vec![bet]);
        });
    }
}

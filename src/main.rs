//! OddsBreaker - value-betting engine
//!
//! Each subcommand runs one batch and exits; an external scheduler (cron,
//! systemd timer) decides when to stake and when to verify.

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use oddsbreaker::backtesting::{
    BacktestConfig, Backtester, MonteCarloConfig, MonteCarloSimulator, PerformanceMetrics,
};
use oddsbreaker::config::AppConfig;
use oddsbreaker::cycle::Engine;
use oddsbreaker::ml_engine::ModelParameters;
use oddsbreaker::persistence::{
    rollback_to, BetLedger, LocalBetLedger, LocalParameterStore, ParameterStore,
    SettlementJournal, LEDGER_FILE, PARAMETERS_FILE,
};
use oddsbreaker::providers::{HistoryProvider, LocalProvider, RetryPolicy, Retrying};

/// OddsBreaker - football value betting with a self-correcting Poisson model
#[derive(Parser, Debug)]
#[command(name = "oddsbreaker")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Override persistence.data_dir
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Use JSON log format instead of pretty
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Predict, detect value and stake on upcoming fixtures
    Stake {
        /// Fixtures kicking off within this many days
        #[arg(long, default_value_t = 3)]
        days: i64,
    },

    /// Settle pending bets and learn from the settled ones
    Verify,

    /// Inspect or roll back model parameters
    #[command(subcommand)]
    Params(ParamsCommand),

    /// Performance of every settled bet in the ledger
    Report {
        /// Window of the recent log-loss metric
        #[arg(long, default_value_t = 50)]
        recent: usize,
    },

    /// Replay the local match history against its closing odds
    Backtest {
        /// Retrain after this many settled bets (0 disables learning)
        #[arg(long, default_value_t = 20)]
        retrain_every: usize,

        /// Write the replayed settlements as CSV
        #[arg(long)]
        csv: Option<PathBuf>,
    },

    /// Monte Carlo bankroll simulation of a repeated bet
    Simulate {
        #[arg(long, default_value_t = 10_000)]
        paths: usize,
        #[arg(long, default_value_t = 500)]
        bets: usize,
        #[arg(long, default_value_t = 0.55)]
        probability: f64,
        #[arg(long, default_value_t = 2.0)]
        odds: f64,
        /// Stake as a fraction of the current bankroll
        #[arg(long, default_value_t = 0.02)]
        fraction: f64,
        #[arg(long, default_value_t = 1000.0)]
        bankroll: f64,
        #[arg(long)]
        seed: Option<u64>,
    },
}

#[derive(Subcommand, Debug)]
enum ParamsCommand {
    /// Show the latest version
    Show,
    /// List every version, oldest first
    History,
    /// Re-append an earlier version as the new latest
    Rollback { version: u64 },
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        fmt().json().with_env_filter(filter).init();
    } else {
        fmt().with_env_filter(filter).init();
    }
}

fn parameter_store(config: &AppConfig, dir: &Path) -> Result<Arc<LocalParameterStore>> {
    let genesis = ModelParameters::genesis(&config.learning);
    let store = LocalParameterStore::open(dir.join(PARAMETERS_FILE), genesis)
        .context("Failed to open parameter history")?;
    Ok(Arc::new(store))
}

fn build_engine(config: &AppConfig, dir: &Path) -> Result<(Engine, Arc<Retrying<LocalProvider>>)> {
    let provider = LocalProvider::load(dir).context("Failed to load provider data")?;
    let provider = Arc::new(Retrying::new(
        provider,
        RetryPolicy::from_config(&config.providers),
    ));
    let ledger = Arc::new(
        LocalBetLedger::open(dir.join(LEDGER_FILE)).context("Failed to open bet ledger")?,
    );
    let journal = if config.persistence.journal_enabled {
        Some(Arc::new(
            SettlementJournal::open(dir).context("Failed to open settlement journal")?,
        ))
    } else {
        None
    };

    let engine = Engine::new(
        config,
        ledger,
        parameter_store(config, dir)?,
        provider.clone(),
        provider.clone(),
        provider.clone(),
        journal,
    );
    Ok((engine, provider))
}

fn print_metrics(m: &PerformanceMetrics) {
    println!(
        "bets {} (settled {}, pending {}) | W/L/V {}/{}/{}",
        m.total_bets, m.settled, m.pending, m.wins, m.losses, m.voids
    );
    println!(
        "staked {:.2} | profit {:+.2} | ROI {:+.2}% | win rate {:.1}%",
        m.staked,
        m.profit,
        m.roi * 100.0,
        m.win_rate * 100.0
    );
    println!(
        "profit factor {:.2} | max drawdown {:.1}% | sharpe {:.3} | avg edge {:.3}",
        m.profit_factor,
        m.max_drawdown * 100.0,
        m.sharpe_ratio,
        m.avg_edge
    );
    println!(
        "brier {:.4} | log-loss {:.4} | ECE {:.4} | recent log-loss {}",
        m.brier,
        m.log_loss,
        m.calibration_error,
        m.recent_log_loss
            .map(|l| format!("{:.4}", l))
            .unwrap_or_else(|| "-".to_string())
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.json_logs);

    let mut config = AppConfig::load()?;
    if let Some(dir) = &cli.data_dir {
        config.persistence.data_dir = dir.display().to_string();
    }
    let dir = config.persistence.data_path();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create data dir {}", dir.display()))?;
    info!(config = %config, "configuration loaded");

    match cli.command {
        Command::Stake { days } => {
            let (engine, provider) = build_engine(&config, &dir)?;
            let now = Utc::now();
            let fixtures = provider
                .upcoming_fixtures(now, now + Duration::days(days))
                .await
                .context("Failed to list upcoming fixtures")?;
            let report = engine.stake_batch(&fixtures).await?;
            println!(
                "v{} | fixtures {} | skipped {} | value bets {} | placed {} ({:.2} staked) | duplicates {} | rejected {}",
                report.parameter_version,
                report.fixtures,
                report.skipped.len(),
                report.value_bets,
                report.placed.len(),
                report.total_staked(),
                report.duplicates,
                report.rejected
            );
            for bet in &report.placed {
                println!(
                    "  {} {} {} @ {:.2} stake {:.2} (p={:.3}, edge {:+.3})",
                    bet.fixture,
                    bet.market,
                    bet.selection,
                    bet.odds,
                    bet.stake,
                    bet.predicted_probability,
                    bet.edge
                );
            }
        }
        Command::Verify => {
            let (engine, _) = build_engine(&config, &dir)?;
            let report = engine.verify_and_learn().await?;
            println!(
                "settled {} | still pending {} | unavailable {} | already settled {} | failed {} | learned {} | new version {}",
                report.settled.len(),
                report.still_pending,
                report.unavailable,
                report.already_settled,
                report.failed.len(),
                report.learned_bets,
                report
                    .new_version
                    .map(|v| format!("v{}", v))
                    .unwrap_or_else(|| "-".to_string())
            );
            for (bet_id, reason) in &report.failed {
                println!("  {} not settled: {}", bet_id, reason);
            }
        }
        Command::Params(cmd) => {
            let store = parameter_store(&config, &dir)?;
            match cmd {
                ParamsCommand::Show => println!("{}", store.latest().await?),
                ParamsCommand::History => {
                    for params in store.history().await? {
                        println!("{}", params);
                    }
                }
                ParamsCommand::Rollback { version } => {
                    let restored = rollback_to(store.as_ref(), version).await?;
                    println!("restored v{} as {}", version, restored);
                }
            }
        }
        Command::Report { recent } => {
            let ledger =
                LocalBetLedger::open(dir.join(LEDGER_FILE)).context("Failed to open bet ledger")?;
            let bets = ledger.list_all().await?;
            print_metrics(&PerformanceMetrics::from_bets(
                &bets,
                config.staking.initial_capital,
                recent,
            ));
        }
        Command::Backtest { retrain_every, csv } => {
            let provider = LocalProvider::load(&dir).context("Failed to load provider data")?;
            let genesis = ModelParameters::genesis(&config.learning);
            let backtester = Backtester::new(
                config.clone(),
                BacktestConfig {
                    retrain_every,
                    ..Default::default()
                },
            );
            let report = backtester.run(provider.history(), genesis).await?;
            println!(
                "fixtures with closing odds {} | skipped {} | parameters v{} -> v{}",
                report.fixtures_evaluated,
                report.fixtures_skipped,
                report.initial_version,
                report.final_parameters.version
            );
            print_metrics(&report.metrics);
            if let Some(path) = csv {
                std::fs::write(&path, report.export_csv()?)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                println!("settlements written to {}", path.display());
            }
        }
        Command::Simulate {
            paths,
            bets,
            probability,
            odds,
            fraction,
            bankroll,
            seed,
        } => {
            let result = MonteCarloSimulator::new(MonteCarloConfig {
                paths,
                bets_per_path: bets,
                initial_bankroll: bankroll,
                win_probability: probability,
                odds,
                stake_fraction: fraction,
                seed,
            })
            .run();
            println!(
                "paths {} | ruin {:.2}% | profit {:.2}%",
                result.paths,
                result.probability_of_ruin * 100.0,
                result.probability_of_profit * 100.0
            );
            println!(
                "final bankroll mean {:.2} | median {:.2} | p5 {:.2} | p25 {:.2} | p75 {:.2} | p95 {:.2}",
                result.final_bankroll_mean,
                result.final_bankroll_median,
                result.percentile_5,
                result.percentile_25,
                result.percentile_75,
                result.percentile_95
            );
            println!(
                "mean max drawdown {:.1}% | sharpe {:.3}",
                result.max_drawdown_mean * 100.0,
                result.sharpe_ratio
            );
        }
    }

    Ok(())
}

//! ML Engine - modelo de goles de OddsBreaker
//!
//! Este módulo implementa:
//! - Matriz de marcadores Poisson (con corrección Dixon-Coles opcional)
//! - Predicción de probabilidades por mercado
//! - Parámetros de calibración versionados y reglas de puntuación
//! - Aprendizaje a partir de apuestas liquidadas

pub mod calibration;
pub mod poisson;
pub mod predictor;
pub mod training;

pub use calibration::{ModelParameters, ScoringRule};
pub use poisson::ScorelineMatrix;
pub use predictor::{ExpectedGoals, MarketDistribution, ModelPrediction, PoissonPredictor};
pub use training::{BatchSummary, LearningResult, LearningUpdater};

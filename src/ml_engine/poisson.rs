//! Scoreline matrix - distribución conjunta de goles
//!
//! Independent Poisson per side, truncated at `max_goals`, with the
//! optional Dixon-Coles low-score correction. The matrix is renormalized
//! so the truncated tail is spread proportionally and the cells sum to 1.

use serde::{Deserialize, Serialize};

/// Poisson pmf for k = 0..=max, built iteratively (p_k = p_{k-1} * λ / k)
pub fn poisson_pmf(lambda: f64, max: u8) -> Vec<f64> {
    let mut pmf = Vec::with_capacity(max as usize + 1);
    let mut p = (-lambda).exp();
    pmf.push(p);
    for k in 1..=max as usize {
        p *= lambda / k as f64;
        pmf.push(p);
    }
    pmf
}

/// Dixon-Coles tau adjustment for the four low-score cells
pub fn low_score_tau(home: u8, away: u8, lambda_home: f64, lambda_away: f64, rho: f64) -> f64 {
    let tau = match (home, away) {
        (0, 0) => 1.0 - lambda_home * lambda_away * rho,
        (0, 1) => 1.0 + lambda_home * rho,
        (1, 0) => 1.0 + lambda_away * rho,
        (1, 1) => 1.0 - rho,
        _ => 1.0,
    };
    tau.max(0.0)
}

/// Joint probability of every scoreline up to `max_goals` per side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScorelineMatrix {
    max_goals: u8,
    /// Row-major: cells[home * (max_goals + 1) + away]
    cells: Vec<f64>,
    /// Independent-Poisson mass beyond the truncation bound, before renormalizing
    truncated_tail: f64,
}

impl ScorelineMatrix {
    /// Plain independent Poisson
    pub fn independent(lambda_home: f64, lambda_away: f64, max_goals: u8) -> Self {
        Self::build(lambda_home, lambda_away, 0.0, max_goals)
    }

    /// Independent Poisson with the low-score cells scaled by tau(rho).
    /// `rho = 0` gives exactly the independent matrix.
    pub fn build(lambda_home: f64, lambda_away: f64, rho: f64, max_goals: u8) -> Self {
        let home_pmf = poisson_pmf(lambda_home, max_goals);
        let away_pmf = poisson_pmf(lambda_away, max_goals);
        let side = max_goals as usize + 1;

        let mut cells = Vec::with_capacity(side * side);
        let mut raw_total = 0.0;
        for (h, ph) in home_pmf.iter().enumerate() {
            for (a, pa) in away_pmf.iter().enumerate() {
                let p = ph * pa;
                raw_total += p;
                let tau = if rho != 0.0 && h <= 1 && a <= 1 {
                    low_score_tau(h as u8, a as u8, lambda_home, lambda_away, rho)
                } else {
                    1.0
                };
                cells.push(p * tau);
            }
        }

        let sum: f64 = cells.iter().sum();
        if sum > 0.0 {
            for c in cells.iter_mut() {
                *c /= sum;
            }
        }

        Self {
            max_goals,
            cells,
            truncated_tail: (1.0 - raw_total).max(0.0),
        }
    }

    pub fn max_goals(&self) -> u8 {
        self.max_goals
    }

    /// Probability of exactly `home`-`away`; zero beyond the bound
    pub fn get(&self, home: u8, away: u8) -> f64 {
        if home > self.max_goals || away > self.max_goals {
            return 0.0;
        }
        let side = self.max_goals as usize + 1;
        self.cells[home as usize * side + away as usize]
    }

    /// (home goals, away goals, probability) for every cell
    pub fn iter(&self) -> impl Iterator<Item = (u8, u8, f64)> + '_ {
        let side = self.max_goals as usize + 1;
        self.cells
            .iter()
            .enumerate()
            .map(move |(i, p)| ((i / side) as u8, (i % side) as u8, *p))
    }

    pub fn total(&self) -> f64 {
        self.cells.iter().sum()
    }

    pub fn truncated_tail(&self) -> f64 {
        self.truncated_tail
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pmf_matches_closed_form() {
        let pmf = poisson_pmf(1.8, 10);
        assert!((pmf[0] - (-1.8f64).exp()).abs() < 1e-15);
        // P(3) = e^-1.8 * 1.8^3 / 6
        let p3 = (-1.8f64).exp() * 1.8f64.powi(3) / 6.0;
        assert!((pmf[3] - p3).abs() < 1e-15);
    }

    #[test]
    fn matrix_sums_to_one_after_truncation() {
        for &(lh, la) in &[(1.8, 1.1), (0.2, 4.5), (5.9, 5.9)] {
            let m = ScorelineMatrix::independent(lh, la, 10);
            assert!((m.total() - 1.0).abs() < 1e-12);
        }
        let small = ScorelineMatrix::independent(3.0, 3.0, 3);
        assert!((small.total() - 1.0).abs() < 1e-12);
        assert!(small.truncated_tail() > 0.1);
    }

    #[test]
    fn truncation_tail_is_tiny_at_ten_goals() {
        let m = ScorelineMatrix::independent(1.8, 1.1, 10);
        assert!(m.truncated_tail() < 1e-5);
        assert!(m.truncated_tail() > 1e-7);
    }

    #[test]
    fn zero_rho_is_plain_poisson() {
        let a = ScorelineMatrix::independent(1.4, 1.2, 8);
        let b = ScorelineMatrix::build(1.4, 1.2, 0.0, 8);
        assert_eq!(a, b);
    }

    #[test]
    fn negative_rho_inflates_draws_at_low_scores() {
        let plain = ScorelineMatrix::independent(1.2, 1.0, 10);
        let dc = ScorelineMatrix::build(1.2, 1.0, -0.1, 10);
        assert!(dc.get(0, 0) > plain.get(0, 0));
        assert!(dc.get(1, 1) > plain.get(1, 1));
        assert!(dc.get(1, 0) < plain.get(1, 0));
        assert!((dc.total() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn out_of_bound_cells_are_zero() {
        let m = ScorelineMatrix::independent(1.0, 1.0, 5);
        assert_eq!(m.get(6, 0), 0.0);
        assert_eq!(m.iter().count(), 36);
    }
}

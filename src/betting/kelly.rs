#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KellyQuote {
    /// Net decimal odds (odds - 1)
    pub b: f64,
    pub f_raw: f64,
    pub f_fractional: f64,
    pub stake: f64,
}

/// Fractional Kelly on decimal odds: f* = (b·p - q) / b
pub fn compute_fractional_kelly(
    p_model: f64,
    odds: f64,
    fractional: f64,
    capital: f64,
) -> KellyQuote {
    let p = p_model.clamp(0.0, 1.0);
    let q = 1.0 - p;
    let b = (odds - 1.0).max(0.0);

    let f_raw = if b > 0.0 { (b * p - q) / b } else { 0.0 };
    let f_fractional = f_raw.max(0.0) * fractional.max(0.0);
    let stake = (capital.max(0.0) * f_fractional).max(0.0);

    KellyQuote {
        b,
        f_raw,
        f_fractional,
        stake,
    }
}

//! Glicko-2 rating engine
//!
//! Ratings live on the familiar display scale (centre 1500). Updates convert
//! to the internal Glicko-2 scale, run one rating period over the supplied
//! results and convert back. `update` is a pure function of its inputs.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

pub const DEFAULT_RATING: f64 = 1500.0;
pub const DEFAULT_DEVIATION: f64 = 350.0;
pub const DEFAULT_VOLATILITY: f64 = 0.06;

pub const MIN_DEVIATION: f64 = 30.0;
pub const MAX_DEVIATION: f64 = 350.0;

/// Display-scale to internal-scale conversion factor
const SCALE: f64 = 173.7178;
/// System constant constraining volatility change
const TAU: f64 = 0.5;
const CONVERGENCE: f64 = 1e-6;
const MAX_ITERATIONS: usize = 100;

/// Match-quality weighting
const RATING_WEIGHT: f64 = 0.4;
const DEVIATION_WEIGHT: f64 = 0.3;
const OUTCOME_WEIGHT: f64 = 0.3;
/// Decay lengths for the match-quality terms (display scale)
const RATING_DECAY: f64 = 1200.0;
const DEVIATION_DECAY: f64 = 700.0;

/// A player's skill estimate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rating {
    pub rating: f64,
    pub deviation: f64,
    pub volatility: f64,
    pub wins: u32,
    pub losses: u32,
}

impl Rating {
    pub fn new(rating: f64, deviation: f64, volatility: f64) -> Self {
        Self {
            rating,
            deviation,
            volatility,
            wins: 0,
            losses: 0,
        }
    }

    fn mu(&self) -> f64 {
        (self.rating - DEFAULT_RATING) / SCALE
    }

    fn phi(&self) -> f64 {
        self.deviation / SCALE
    }
}

impl Default for Rating {
    fn default() -> Self {
        Self::new(DEFAULT_RATING, DEFAULT_DEVIATION, DEFAULT_VOLATILITY)
    }
}

/// One game against one opponent within a rating period
#[derive(Debug, Clone, Copy)]
pub struct MatchOutcome {
    pub opponent: Rating,
    /// 1.0 win, 0.5 draw, 0.0 loss
    pub score: f64,
}

impl MatchOutcome {
    pub fn win(opponent: Rating) -> Self {
        Self { opponent, score: 1.0 }
    }

    pub fn loss(opponent: Rating) -> Self {
        Self { opponent, score: 0.0 }
    }

    pub fn draw(opponent: Rating) -> Self {
        Self { opponent, score: 0.5 }
    }
}

fn g(phi: f64) -> f64 {
    1.0 / (1.0 + 3.0 * phi * phi / (PI * PI)).sqrt()
}

fn expected_score(mu: f64, mu_j: f64, phi_j: f64) -> f64 {
    1.0 / (1.0 + (-g(phi_j) * (mu - mu_j)).exp())
}

/// Apply one rating period's results to `old`.
///
/// An empty result set returns `old` unchanged; deviation does not inflate
/// with idle time.
pub fn update(old: &Rating, results: &[MatchOutcome]) -> Rating {
    if results.is_empty() {
        return *old;
    }

    let mu = old.mu();
    let phi = old.phi();

    let mut variance_inv = 0.0;
    let mut improvement_sum = 0.0;
    for result in results {
        let phi_j = result.opponent.phi();
        let g_j = g(phi_j);
        let e = expected_score(mu, result.opponent.mu(), phi_j);
        variance_inv += g_j * g_j * e * (1.0 - e);
        improvement_sum += g_j * (result.score - e);
    }

    let v = 1.0 / variance_inv;
    if !v.is_finite() {
        return *old;
    }
    let delta = v * improvement_sum;

    let sigma = new_volatility(phi, old.volatility, v, delta);
    let phi_star = (phi * phi + sigma * sigma).sqrt();
    let phi_new = 1.0 / (1.0 / (phi_star * phi_star) + 1.0 / v).sqrt();
    let mu_new = mu + phi_new * phi_new * improvement_sum;

    let mean_score = results.iter().map(|r| r.score).sum::<f64>() / results.len() as f64;

    Rating {
        rating: SCALE * mu_new + DEFAULT_RATING,
        deviation: (SCALE * phi_new).clamp(MIN_DEVIATION, MAX_DEVIATION),
        volatility: sigma,
        wins: old.wins + u32::from(mean_score > 0.6),
        losses: old.losses + u32::from(mean_score < 0.4),
    }
}

/// Solve for the new volatility with the Illinois variant of regula falsi.
///
/// Uses Glickman's full form: `f` carries `v` in its denominator
/// (`φ² + v + eˣ`, not the shortened `φ² + eˣ`), and when `Δ² ≤ φ² + v` the
/// lower bracket steps down `A − kτ` until `f` turns non-negative instead of
/// stopping at a single `A − τ`.
fn new_volatility(phi: f64, sigma: f64, v: f64, delta: f64) -> f64 {
    let a = (sigma * sigma).ln();
    let phi_sq = phi * phi;
    let delta_sq = delta * delta;

    let f = |x: f64| {
        let ex = x.exp();
        let denom = phi_sq + v + ex;
        ex * (delta_sq - phi_sq - v - ex) / (2.0 * denom * denom) - (x - a) / (TAU * TAU)
    };

    let mut lower = a;
    let mut upper = if delta_sq > phi_sq + v {
        (delta_sq - phi_sq - v).ln()
    } else {
        let mut k = 1.0;
        while f(a - k * TAU) < 0.0 && k < MAX_ITERATIONS as f64 {
            k += 1.0;
        }
        a - k * TAU
    };

    let mut f_lower = f(lower);
    let mut f_upper = f(upper);

    for _ in 0..MAX_ITERATIONS {
        if (upper - lower).abs() <= CONVERGENCE {
            break;
        }
        let c = lower + (lower - upper) * f_lower / (f_upper - f_lower);
        let f_c = f(c);
        if f_c * f_upper <= 0.0 {
            lower = upper;
            f_lower = f_upper;
        } else {
            f_lower /= 2.0;
        }
        upper = c;
        f_upper = f_c;
    }

    (lower / 2.0).exp()
}

/// Closeness of the predicted outcome to a coin flip, in [0, 1]
pub fn outcome_balance(a: &Rating, b: &Rating) -> f64 {
    let diff = (a.rating - b.rating).abs();
    let spread = (a.deviation + b.deviation).max(f64::EPSILON);
    2.0 / (1.0 + (3.0 * diff / spread).exp())
}

/// Scalar quality of pairing `a` against `b`, in [0, 1].
///
/// Weighted blend of rating-difference decay, average-deviation decay and
/// outcome balance. Strictly decreasing in |rating difference| for fixed
/// deviations.
pub fn match_quality(a: &Rating, b: &Rating) -> f64 {
    let diff = (a.rating - b.rating).abs();
    let rating_term = (-diff / RATING_DECAY).exp();

    let avg_deviation = (a.deviation + b.deviation) / 2.0;
    let deviation_term = (-avg_deviation / DEVIATION_DECAY).exp();

    let quality = RATING_WEIGHT * rating_term
        + DEVIATION_WEIGHT * deviation_term
        + OUTCOME_WEIGHT * outcome_balance(a, b);
    quality.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64, tol: f64) -> bool {
        (a - b).abs() <= tol
    }

    #[test]
    fn test_empty_results_leave_rating_unchanged() {
        let r = Rating::new(1720.0, 80.0, 0.05);
        assert_eq!(update(&r, &[]), r);
    }

    #[test]
    fn test_reference_rating_period() {
        // Worked example from Glickman's Glicko-2 paper
        let player = Rating::new(1500.0, 200.0, 0.06);
        let results = [
            MatchOutcome::win(Rating::new(1400.0, 30.0, 0.06)),
            MatchOutcome::loss(Rating::new(1550.0, 100.0, 0.06)),
            MatchOutcome::loss(Rating::new(1700.0, 300.0, 0.06)),
        ];

        let updated = update(&player, &results);
        assert!(approx(updated.rating, 1464.06, 0.1), "rating {}", updated.rating);
        assert!(approx(updated.deviation, 151.52, 0.1), "rd {}", updated.deviation);
        assert!(approx(updated.volatility, 0.05999, 1e-4), "vol {}", updated.volatility);
        assert_eq!(updated.wins, 0);
        assert_eq!(updated.losses, 1);
    }

    #[test]
    fn test_update_is_deterministic() {
        let player = Rating::new(1610.0, 240.0, 0.06);
        let results = [
            MatchOutcome::win(Rating::new(1580.0, 120.0, 0.06)),
            MatchOutcome::draw(Rating::new(1700.0, 90.0, 0.05)),
        ];
        assert_eq!(update(&player, &results), update(&player, &results));
    }

    #[test]
    fn test_deviation_does_not_spike() {
        let cases = [
            Rating::new(1500.0, 350.0, 0.06),
            Rating::new(2100.0, 45.0, 0.09),
            Rating::new(900.0, 150.0, 0.03),
        ];
        for player in cases {
            for opponent in cases {
                for outcome in [MatchOutcome::win(opponent), MatchOutcome::loss(opponent)] {
                    let updated = update(&player, &[outcome]);
                    let pre = (player.deviation.powi(2)
                        + (updated.volatility * SCALE).powi(2))
                    .sqrt();
                    assert!(updated.deviation <= pre + 1e-6);
                    assert!(updated.rating.is_finite());
                }
            }
        }
    }

    #[test]
    fn test_win_raises_rating_and_counts() {
        let player = Rating::default();
        let updated = update(&player, &[MatchOutcome::win(Rating::default())]);
        assert!(updated.rating > player.rating);
        assert!(updated.deviation < player.deviation);
        assert_eq!(updated.wins, 1);
        assert_eq!(updated.losses, 0);

        let drawn = update(&player, &[MatchOutcome::draw(Rating::default())]);
        assert_eq!(drawn.wins, 0);
        assert_eq!(drawn.losses, 0);
    }

    #[test]
    fn test_match_quality_decreases_with_rating_gap() {
        let base = Rating::new(1500.0, 200.0, 0.06);
        let mut previous = match_quality(&base, &base);
        for gap in (25..=1500).step_by(25) {
            let other = Rating::new(1500.0 + gap as f64, 200.0, 0.06);
            let quality = match_quality(&base, &other);
            assert!(quality < previous, "gap {gap}: {quality} !< {previous}");
            assert!((0.0..=1.0).contains(&quality));
            previous = quality;
        }
    }

    #[test]
    fn test_match_quality_is_symmetric() {
        let a = Rating::new(1450.0, 310.0, 0.06);
        let b = Rating::new(1790.0, 60.0, 0.06);
        assert!(approx(match_quality(&a, &b), match_quality(&b, &a), 1e-12));
    }

    #[test]
    fn test_close_new_players_form_good_duel() {
        let a = Rating::new(1500.0, 350.0, 0.06);
        let b = Rating::new(1650.0, 300.0, 0.06);
        assert!(match_quality(&a, &b) >= 0.7);
    }
}

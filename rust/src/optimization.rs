//! Budget optimization using constrained optimization.
//!
//! Maximizes the total response of all channels subject to per-channel spend
//! bounds and the total budget, by projected gradient ascent: step along the
//! marginal returns scaled by each channel's curvature, then project back onto
//! the feasible set. Step length comes from Armijo backtracking.

use std::collections::HashSet;

use ndarray::{Array1, Zip};
use tracing::{debug, instrument, trace, warn};

use crate::allocation::{Allocation, ChannelAllocation, Termination};
use crate::channel::Channel;
use crate::config::{OptimizerConfig, SpendPolicy};
use crate::error::{AllocationError, Result};

/// Sufficient-increase constant for the backtracking line search.
const ARMIJO: f64 = 1e-4;
const MAX_BISECTIONS: usize = 200;
/// Smallest curvature, relative to marginal return per unit of bound width,
/// used to scale a channel's step.
const CURVATURE_FLOOR: f64 = 1e-6;

#[derive(Debug, Clone, Default)]
pub struct AllocationOptimizer {
    config: OptimizerConfig,
}

impl AllocationOptimizer {
    pub fn new(config: OptimizerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Allocates `budget` across `channels` to maximize the summed response.
    ///
    /// Fails with [`AllocationError::InvalidChannel`] for malformed bounds and
    /// [`AllocationError::InfeasibleConstraints`] when the minimum bounds do
    /// not fit in the budget. When several allocations are optimal, the one
    /// the solver reaches first from the even split is returned.
    ///
    /// The optimum is global only when every response curve is concave over
    /// its bounds. With S-shaped curves (Hill with S > 1) the result is a
    /// local optimum; identical S-shaped channels stay at the even split
    /// even when concentrating spend would return more.
    #[instrument(level = "debug", skip_all, fields(channels = channels.len(), budget = budget))]
    pub fn optimize(&self, channels: &[Channel<'_>], budget: f64) -> Result<Allocation> {
        if !budget.is_finite() || budget < 0.0 {
            return Err(AllocationError::InvalidBudget(budget));
        }
        if channels.is_empty() {
            return Err(AllocationError::NoChannels);
        }

        let problem = Problem::new(channels, budget, &self.config)?;
        let (spend, iterations, termination) = problem.solve(&self.config)?;

        let entries = channels
            .iter()
            .zip(spend.iter())
            .map(|(channel, &spend)| ChannelAllocation {
                channel: channel.id().to_string(),
                spend,
                response: channel.response(spend),
                marginal_return: channel.marginal(spend),
            })
            .collect();
        Ok(Allocation::new(entries, iterations, termination))
    }
}

/// Optimizes with the default configuration.
pub fn optimize(channels: &[Channel<'_>], budget: f64) -> Result<Allocation> {
    AllocationOptimizer::default().optimize(channels, budget)
}

/// Validated problem: resolved bounds plus the total-spend constraint.
struct Problem<'c, 'a> {
    channels: &'c [Channel<'a>],
    budget: f64,
    lower: Array1<f64>,
    upper: Array1<f64>,
    policy: SpendPolicy,
}

impl<'c, 'a> Problem<'c, 'a> {
    fn new(channels: &'c [Channel<'a>], budget: f64, config: &OptimizerConfig) -> Result<Self> {
        let mut seen = HashSet::with_capacity(channels.len());
        let mut lower = Vec::with_capacity(channels.len());
        let mut upper = Vec::with_capacity(channels.len());

        for channel in channels {
            let id = channel.id();
            if !seen.insert(id) {
                return Err(AllocationError::invalid_channel(id, "duplicate channel identifier"));
            }

            let min = channel.min_spend().unwrap_or(config.default_min_share * budget);
            let max = channel.max_spend().unwrap_or(config.default_max_share * budget);
            if !min.is_finite() || !max.is_finite() {
                return Err(AllocationError::invalid_channel(
                    id,
                    format!("spend bounds must be finite, got [{min}, {max}]"),
                ));
            }
            if min < 0.0 || max < 0.0 {
                return Err(AllocationError::invalid_channel(
                    id,
                    format!("spend bounds must be non-negative, got [{min}, {max}]"),
                ));
            }
            if min > max {
                return Err(AllocationError::invalid_channel(
                    id,
                    format!("minimum spend {min} exceeds maximum spend {max}"),
                ));
            }

            lower.push(min);
            // Nothing can be spent beyond the budget itself
            upper.push(max.min(budget));
        }

        let lower = Array1::from(lower);
        let upper = Array1::from(upper);
        let minimum = lower.sum();
        let maximum = upper.sum();
        let infeasible = minimum > budget || (config.spend_policy == SpendPolicy::Exhaust && maximum < budget);
        if infeasible {
            return Err(AllocationError::InfeasibleConstraints {
                minimum,
                maximum,
                budget,
            });
        }

        Ok(Self {
            channels,
            budget,
            lower,
            upper,
            policy: config.spend_policy,
        })
    }

    fn solve(&self, config: &OptimizerConfig) -> Result<(Array1<f64>, usize, Termination)> {
        // Start from an even split of whatever the minimum bounds leave over
        let slack = self.budget - self.lower.sum();
        let start = &self.lower + slack / self.channels.len() as f64;
        let mut x = self.project(&start, &Array1::ones(start.len()));
        let mut value = self.objective(&x)?;

        let x_tol = config.tolerance * self.budget.max(1.0);
        let mut iterations = 0;

        loop {
            let grad = self.gradient(&x)?;
            if grad.iter().all(|&g| g == 0.0) {
                debug!(iterations, total_response = value, "allocation stationary");
                return Ok((x, iterations, Termination::Stationary));
            }
            let scale = self.curvature(&x, &grad);
            let direction = &grad / &scale;

            // A full step that barely moves means x is a projected-gradient
            // fixed point
            let full = self.project(&(&direction + &x), &scale);
            let full_move = max_abs(&(&full - &x));
            if full_move <= x_tol {
                debug!(iterations, total_response = value, "allocation converged");
                return Ok((x, iterations, Termination::Converged));
            }
            if iterations == config.max_iterations {
                break;
            }
            iterations += 1;

            let mut step = 1.0;
            let mut candidate = full;
            loop {
                let moved = &candidate - &x;
                if max_abs(&moved) <= x_tol {
                    debug!(
                        iterations,
                        full_move,
                        total_response = value,
                        "line search stalled"
                    );
                    return Ok((x, iterations, Termination::Stalled));
                }

                let candidate_value = self.objective(&candidate)?;
                if candidate_value >= value + ARMIJO * grad.dot(&moved) {
                    trace!(iterations, step, total_response = candidate_value, "accepted step");
                    x = candidate;
                    value = candidate_value;
                    break;
                }
                step *= 0.5;
                candidate = self.project(&(&direction * step + &x), &scale);
            }
        }

        warn!(
            iterations = config.max_iterations,
            total_response = value,
            "allocation did not converge"
        );
        Err(AllocationError::NonConvergence {
            iterations: config.max_iterations,
        })
    }

    fn objective(&self, x: &Array1<f64>) -> Result<f64> {
        let mut total = 0.0;
        for (channel, &spend) in self.channels.iter().zip(x.iter()) {
            let value = channel.response(spend);
            if !value.is_finite() {
                return Err(AllocationError::NonFiniteResponse {
                    channel: channel.id().to_string(),
                    spend,
                });
            }
            total += value;
        }
        Ok(total)
    }

    /// Marginal returns; channels pinned by their bounds contribute zero.
    fn gradient(&self, x: &Array1<f64>) -> Result<Array1<f64>> {
        let mut grad = Array1::zeros(x.len());
        for (i, channel) in self.channels.iter().enumerate() {
            if self.lower[i] == self.upper[i] {
                continue;
            }
            let marginal = channel.marginal(x[i]);
            if !marginal.is_finite() {
                return Err(AllocationError::NonFiniteResponse {
                    channel: channel.id().to_string(),
                    spend: x[i],
                });
            }
            grad[i] = marginal;
        }
        Ok(grad)
    }

    /// Per-channel step scaling: magnitude of the response curvature.
    ///
    /// The response is separable, so this diagonal is the whole Hessian and
    /// a unit step is a Newton step. Near-linear channels are floored so
    /// their step stays within a bounded multiple of their bound width.
    fn curvature(&self, x: &Array1<f64>, grad: &Array1<f64>) -> Array1<f64> {
        let mut scale = Array1::ones(x.len());
        for (i, channel) in self.channels.iter().enumerate() {
            let width = self.upper[i] - self.lower[i];
            if width <= 0.0 {
                continue;
            }
            let delta = 1e-4 * width;
            let (a, b) = if x[i] + delta <= self.upper[i] {
                (x[i], x[i] + delta)
            } else {
                (x[i] - delta, x[i])
            };
            let second = (channel.marginal(b) - channel.marginal(a)) / delta;
            let floor = (CURVATURE_FLOOR * grad[i].abs() / width).max(f64::MIN_POSITIVE);
            scale[i] = if second.is_finite() { second.abs().max(floor) } else { floor };
        }
        scale
    }

    /// Projection onto the bounds and the total-spend constraint in the
    /// metric weighted by `weights`.
    ///
    /// The projection has the form `clamp(y - shift / weight, lower, upper)`;
    /// the shift is zero when the clamped point already satisfies the budget
    /// and is otherwise found by bisection, since the clamped total is
    /// non-increasing in the shift.
    fn project(&self, y: &Array1<f64>, weights: &Array1<f64>) -> Array1<f64> {
        let clamped = self.shifted(y, weights, 0.0);
        let total = clamped.sum();
        let within = match self.policy {
            SpendPolicy::UpTo => total <= self.budget,
            SpendPolicy::Exhaust => total == self.budget,
        };
        if within {
            return clamped;
        }

        // Invariant: total(lo) >= budget >= total(hi)
        let (mut lo, mut hi) = if total > self.budget {
            let mut hi = y
                .iter()
                .zip(self.lower.iter())
                .zip(weights.iter())
                .map(|((v, l), c)| c * (v - l))
                .fold(0.0, f64::max);
            while self.shifted(y, weights, hi).sum() > self.budget {
                hi = 2.0 * hi + f64::MIN_POSITIVE;
            }
            (0.0, hi)
        } else {
            let mut lo = y
                .iter()
                .zip(self.upper.iter())
                .zip(weights.iter())
                .map(|((v, u), c)| c * (v - u))
                .fold(0.0, f64::min);
            while self.shifted(y, weights, lo).sum() < self.budget {
                lo = 2.0 * lo - f64::MIN_POSITIVE;
            }
            (lo, 0.0)
        };

        for _ in 0..MAX_BISECTIONS {
            let mid = 0.5 * (lo + hi);
            if mid <= lo || mid >= hi {
                break;
            }
            if self.shifted(y, weights, mid).sum() > self.budget {
                lo = mid;
            } else {
                hi = mid;
            }
        }

        // The upper end never overspends
        self.shifted(y, weights, hi)
    }

    fn shifted(&self, y: &Array1<f64>, weights: &Array1<f64>, shift: f64) -> Array1<f64> {
        Zip::from(y)
            .and(weights)
            .and(&self.lower)
            .and(&self.upper)
            .map_collect(|&v, &c, &l, &u| (v - shift / c).max(l).min(u))
    }
}

fn max_abs(values: &Array1<f64>) -> f64 {
    values.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::saturation::{ResponseCurve, SaturationCurve};

    fn linear(id: &str, rate: f64, min: f64, max: f64) -> Channel<'static> {
        Channel::new(id, SaturationCurve::Linear { rate }).with_bounds(min, max)
    }

    fn campaign_curves() -> Vec<Channel<'static>> {
        vec![
            Channel::new("campaign_a", SaturationCurve::Exponential { cap: 2000.0, rate: 0.0003 }),
            Channel::new("campaign_b", SaturationCurve::Exponential { cap: 1500.0, rate: 0.0004 }),
        ]
    }

    #[test]
    fn test_higher_roi_channel_fills_first() {
        let channels = vec![linear("a", 2.0, 0.0, 50.0), linear("b", 1.0, 0.0, 50.0)];
        let allocation = optimize(&channels, 60.0).unwrap();

        assert!((allocation.spend("a").unwrap() - 50.0).abs() < 1e-6);
        assert!((allocation.spend("b").unwrap() - 10.0).abs() < 1e-6);
        assert!((allocation.total_response() - 110.0).abs() < 1e-6);
        assert!(allocation.total_spend() <= 60.0 + 1e-9);
        assert_eq!(allocation.termination(), Termination::Converged);
    }

    #[test]
    fn test_zero_budget_allocates_nothing() {
        let channels = vec![linear("a", 2.0, 0.0, 50.0), linear("b", 1.0, 0.0, 50.0)];
        let allocation = optimize(&channels, 0.0).unwrap();

        assert_eq!(allocation.spend("a"), Some(0.0));
        assert_eq!(allocation.spend("b"), Some(0.0));
        assert_eq!(allocation.total_response(), 0.0);
        assert_eq!(allocation.termination(), Termination::Stationary);
        assert_eq!(allocation.iterations(), 0);
    }

    #[test]
    fn test_minimum_bounds_over_budget_is_infeasible() {
        let channels = vec![linear("a", 2.0, 40.0, 50.0), linear("b", 1.0, 30.0, 50.0)];
        let err = optimize(&channels, 60.0).unwrap_err();

        assert_eq!(
            err,
            AllocationError::InfeasibleConstraints {
                minimum: 70.0,
                maximum: 100.0,
                budget: 60.0,
            }
        );
    }

    #[test]
    fn test_malformed_bounds_are_rejected() {
        let inverted = vec![linear("a", 1.0, 10.0, 5.0)];
        assert!(matches!(
            optimize(&inverted, 60.0),
            Err(AllocationError::InvalidChannel { channel, .. }) if channel == "a"
        ));

        let negative = vec![linear("b", 1.0, -1.0, 5.0)];
        assert!(matches!(optimize(&negative, 60.0), Err(AllocationError::InvalidChannel { .. })));

        let unbounded = vec![linear("c", 1.0, 0.0, f64::INFINITY)];
        assert!(matches!(optimize(&unbounded, 60.0), Err(AllocationError::InvalidChannel { .. })));

        let duplicated = vec![linear("d", 1.0, 0.0, 5.0), linear("d", 2.0, 0.0, 5.0)];
        assert!(matches!(optimize(&duplicated, 60.0), Err(AllocationError::InvalidChannel { .. })));
    }

    #[test]
    fn test_bad_budget_and_empty_input() {
        let channels = vec![linear("a", 1.0, 0.0, 5.0)];
        assert_eq!(optimize(&channels, -1.0).unwrap_err(), AllocationError::InvalidBudget(-1.0));
        assert!(matches!(optimize(&channels, f64::NAN), Err(AllocationError::InvalidBudget(_))));
        assert_eq!(optimize(&[], 10.0).unwrap_err(), AllocationError::NoChannels);
    }

    #[test]
    fn test_exhaust_equalizes_marginal_returns() {
        let optimizer = AllocationOptimizer::new(OptimizerConfig {
            spend_policy: SpendPolicy::Exhaust,
            ..OptimizerConfig::default()
        })
        .unwrap();
        let allocation = optimizer.optimize(&campaign_curves(), 10_000.0).unwrap();

        let a = allocation.get("campaign_a").unwrap();
        let b = allocation.get("campaign_b").unwrap();
        assert!((allocation.total_spend() - 10_000.0).abs() < 1e-6);
        // 0.0003 a = 0.0004 b at the optimum
        assert!((a.spend - 40_000.0 / 7.0).abs() < 0.5, "a = {}", a.spend);
        assert!((a.marginal_return - b.marginal_return).abs() < 1e-4);
    }

    #[test]
    fn test_up_to_matches_exhaust_when_returns_stay_positive() {
        let allocation = optimize(&campaign_curves(), 10_000.0).unwrap();
        assert!((allocation.total_spend() - 10_000.0).abs() < 1e-3);
    }

    #[test]
    fn test_exhaust_needs_enough_headroom() {
        let optimizer = AllocationOptimizer::new(OptimizerConfig {
            spend_policy: SpendPolicy::Exhaust,
            ..OptimizerConfig::default()
        })
        .unwrap();
        let channels = vec![linear("a", 2.0, 0.0, 20.0), linear("b", 1.0, 0.0, 20.0)];
        assert!(matches!(
            optimizer.optimize(&channels, 60.0),
            Err(AllocationError::InfeasibleConstraints { .. })
        ));
    }

    #[test]
    fn test_up_to_leaves_budget_unspent_past_the_peak() {
        // response peaks at spend 50
        let channels = vec![Channel::new("display", |x: f64| x * (100.0 - x)).with_bounds(0.0, 200.0)];
        let allocation = optimize(&channels, 150.0).unwrap();

        assert!((allocation.spend("display").unwrap() - 50.0).abs() < 1e-3);
        assert!(allocation.total_spend() < 150.0);
    }

    #[test]
    fn test_equal_returns_keep_the_even_split() {
        let channels = vec![linear("a", 1.0, 0.0, 50.0), linear("b", 1.0, 0.0, 50.0)];
        let allocation = optimize(&channels, 60.0).unwrap();

        assert!((allocation.spend("a").unwrap() - 30.0).abs() < 1e-9);
        assert!((allocation.spend("b").unwrap() - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_default_shares_bound_unconstrained_channels() {
        let optimizer = AllocationOptimizer::new(OptimizerConfig {
            default_max_share: 0.7,
            ..OptimizerConfig::default()
        })
        .unwrap();
        let channels = vec![
            Channel::new("search", SaturationCurve::Linear { rate: 3.0 }),
            Channel::new("social", SaturationCurve::Linear { rate: 1.0 }),
        ];
        let allocation = optimizer.optimize(&channels, 100.0).unwrap();

        assert!((allocation.spend("search").unwrap() - 70.0).abs() < 1e-6);
        assert!((allocation.spend("social").unwrap() - 30.0).abs() < 1e-6);
    }

    #[test]
    fn test_minimum_bounds_are_honoured() {
        let channels = vec![linear("a", 2.0, 0.0, 50.0), linear("b", 1.0, 25.0, 50.0)];
        let allocation = optimize(&channels, 60.0).unwrap();

        assert!((allocation.spend("a").unwrap() - 35.0).abs() < 1e-6);
        assert!((allocation.spend("b").unwrap() - 25.0).abs() < 1e-6);
    }

    #[test]
    fn test_non_finite_response_is_reported() {
        let channels = vec![Channel::new("broken", |x: f64| if x > 10.0 { f64::NAN } else { x })
            .with_bounds(0.0, 100.0)];
        assert!(matches!(
            optimize(&channels, 100.0),
            Err(AllocationError::NonFiniteResponse { channel, .. }) if channel == "broken"
        ));
    }

    #[test]
    fn test_iteration_cap_reports_non_convergence() {
        let optimizer = AllocationOptimizer::new(OptimizerConfig {
            max_iterations: 1,
            ..OptimizerConfig::default()
        })
        .unwrap();
        assert_eq!(
            optimizer.optimize(&campaign_curves(), 10_000.0).unwrap_err(),
            AllocationError::NonConvergence { iterations: 1 }
        );
    }

    #[test]
    fn test_last_iteration_reaching_the_optimum_converges() {
        let optimizer = AllocationOptimizer::new(OptimizerConfig {
            max_iterations: 1,
            ..OptimizerConfig::default()
        })
        .unwrap();
        // One scaled step takes the even split straight to the vertex
        let channels = vec![linear("a", 2.0, 0.0, 50.0), linear("b", 1.0, 0.0, 50.0)];
        let allocation = optimizer.optimize(&channels, 60.0).unwrap();

        assert!((allocation.spend("a").unwrap() - 50.0).abs() < 1e-6);
        assert!((allocation.spend("b").unwrap() - 10.0).abs() < 1e-6);
        assert_eq!(allocation.iterations(), 1);
        assert_eq!(allocation.termination(), Termination::Converged);
    }

    /// Claims a positive marginal return while its response falls.
    struct Misreported;

    impl ResponseCurve for Misreported {
        fn response(&self, spend: f64) -> f64 {
            -spend
        }

        fn marginal(&self, _spend: f64) -> f64 {
            2.0
        }
    }

    #[test]
    fn test_failed_line_search_is_a_stall() {
        let channels = vec![
            linear("honest", 1.0, 0.0, 50.0),
            Channel::new("misreported", Misreported).with_bounds(0.0, 50.0),
        ];
        let allocation = optimize(&channels, 60.0).unwrap();

        // The marginals point away from the even split but no step improves it
        assert_eq!(allocation.termination(), Termination::Stalled);
        assert_eq!(allocation.iterations(), 1);
        assert!((allocation.spend("honest").unwrap() - 30.0).abs() < 1e-9);
        assert!((allocation.spend("misreported").unwrap() - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_symmetric_s_curves_stay_at_even_split() {
        let hill = SaturationCurve::Hill { k: 100.0, s: 4.0, coef: 1.0 };
        let channels = vec![Channel::new("a", hill), Channel::new("b", hill)];
        let allocation = optimize(&channels, 120.0).unwrap();

        assert!((allocation.spend("a").unwrap() - 60.0).abs() < 1e-6);
        assert!((allocation.spend("b").unwrap() - 60.0).abs() < 1e-6);
        assert_eq!(allocation.termination(), Termination::Converged);
        // Putting everything on one channel returns more; the even split is
        // only a local optimum
        assert!(allocation.total_response() < hill.response(120.0));
    }

    #[test]
    fn test_projection_respects_bounds_and_budget() {
        let channels = vec![linear("a", 1.0, 5.0, 40.0), linear("b", 1.0, 0.0, 40.0), linear("c", 1.0, 0.0, 10.0)];
        let problem = Problem::new(&channels, 60.0, &OptimizerConfig::default()).unwrap();

        let euclidean = Array1::ones(3);
        let projected = problem.project(&Array1::from(vec![100.0, 80.0, -20.0]), &euclidean);
        assert!(projected.sum() <= 60.0);
        assert!((projected.sum() - 60.0).abs() < 1e-9);
        assert!(projected[0] >= 5.0 && projected[0] <= 40.0);
        assert_eq!(projected[2], 0.0);

        let inside = Array1::from(vec![10.0, 10.0, 5.0]);
        assert_eq!(problem.project(&inside, &euclidean), inside);

        // A heavier weight moves that coordinate less
        let weighted = problem.project(&Array1::from(vec![30.0, 30.0, 10.0]), &Array1::from(vec![1.0, 4.0, 1.0]));
        assert!((weighted.sum() - 60.0).abs() < 1e-9);
        assert!(30.0 - weighted[1] < 30.0 - weighted[0]);
    }
}

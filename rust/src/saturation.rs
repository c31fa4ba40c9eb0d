//! Response curves - diminishing returns in media spend.

use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};

use crate::error::{AllocationError, Result};

/// Maps spend on a channel to its expected return.
///
/// Any `Fn(f64) -> f64` is a response curve, so ad-hoc ROI functions can be
/// passed straight to the optimizer.
pub trait ResponseCurve {
    /// Expected return at `spend`.
    fn response(&self, spend: f64) -> f64;

    /// Marginal return (derivative of the response) at `spend`.
    ///
    /// Defaults to a finite difference; closed-form curves override it.
    fn marginal(&self, spend: f64) -> f64 {
        numeric_marginal(|x| self.response(x), spend)
    }
}

impl<F> ResponseCurve for F
where
    F: Fn(f64) -> f64,
{
    fn response(&self, spend: f64) -> f64 {
        self(spend)
    }
}

/// Central difference, falling back to a forward difference near zero so
/// the curve is never evaluated at negative spend.
pub fn numeric_marginal<F>(f: F, spend: f64) -> f64
where
    F: Fn(f64) -> f64,
{
    let h = 1e-6 * spend.abs().max(1.0);
    if spend >= h {
        (f(spend + h) - f(spend - h)) / (2.0 * h)
    } else {
        (f(spend + h) - f(spend)) / h
    }
}

/// Built-in saturation curves.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SaturationCurve {
    /// Constant ROI: `rate * x`.
    Linear { rate: f64 },

    /// Exponential saturation: `cap * (1 - exp(-rate * x))`.
    ///
    /// Approaches `cap` as spend grows; the marginal return at zero spend
    /// is `cap * rate`.
    Exponential { cap: f64, rate: f64 },

    /// Hill saturation: `coef * x^S / (K^S + x^S)`.
    ///
    /// This models diminishing returns where:
    /// - K is the half-saturation point
    /// - S controls the steepness (S=1 is Michaelis-Menten)
    Hill { k: f64, s: f64, coef: f64 },
}

impl SaturationCurve {
    /// Builds a curve from a kind name and its positional parameters:
    /// `linear` (rate), `exponential` (cap, rate), `hill` (K, S, coef).
    pub fn from_params(kind: &str, params: &[f64]) -> Result<Self> {
        let curve = match (kind.to_ascii_lowercase().as_str(), params) {
            ("linear", &[rate]) => Self::Linear { rate },
            ("exponential", &[cap, rate]) => Self::Exponential { cap, rate },
            ("hill", &[k, s, coef]) => Self::Hill { k, s, coef },
            ("linear" | "exponential" | "hill", _) => {
                return Err(AllocationError::InvalidCurve(format!(
                    "wrong number of parameters for '{kind}': {}",
                    params.len()
                )))
            }
            _ => {
                return Err(AllocationError::InvalidCurve(format!(
                    "unknown curve kind '{kind}'"
                )))
            }
        };
        curve.validate()?;
        Ok(curve)
    }

    pub fn validate(&self) -> Result<()> {
        let finite = match *self {
            Self::Linear { rate } => rate.is_finite(),
            Self::Exponential { cap, rate } => cap.is_finite() && rate.is_finite(),
            Self::Hill { k, s, coef } => k.is_finite() && s.is_finite() && coef.is_finite(),
        };
        if !finite {
            return Err(AllocationError::InvalidCurve(format!(
                "non-finite parameter in {self:?}"
            )));
        }
        if let Self::Hill { k, s, .. } = *self {
            if k <= 0.0 || s <= 0.0 {
                return Err(AllocationError::InvalidCurve(format!(
                    "Hill curve needs K > 0 and S > 0, got K={k}, S={s}"
                )));
            }
        }
        Ok(())
    }
}

impl ResponseCurve for SaturationCurve {
    fn response(&self, spend: f64) -> f64 {
        let x_val = spend.max(0.0);
        match *self {
            Self::Linear { rate } => rate * x_val,
            Self::Exponential { cap, rate } => cap * (1.0 - (-rate * x_val).exp()),
            Self::Hill { k, s, coef } => hill_response(x_val, k, s, coef),
        }
    }

    fn marginal(&self, spend: f64) -> f64 {
        let x_val = spend.max(0.0);
        match *self {
            Self::Linear { rate } => rate,
            Self::Exponential { cap, rate } => cap * rate * (-rate * x_val).exp(),
            Self::Hill { k, s, coef } => marginal_hill_response(x_val, k, s, coef),
        }
    }
}

fn hill_response(x: f64, k: f64, s: f64, coef: f64) -> f64 {
    let k_pow_s = k.powf(s);
    let x_pow_s = x.powf(s);
    coef * x_pow_s / (k_pow_s + x_pow_s)
}

fn marginal_hill_response(x: f64, k: f64, s: f64, coef: f64) -> f64 {
    // x^(S-1) blows up at zero when S < 1
    let x_val = if s < 1.0 { x.max(f64::EPSILON * k) } else { x };
    let k_pow_s = k.powf(s);
    let x_pow_s = x_val.powf(s);
    let denom = k_pow_s + x_pow_s;

    if denom == 0.0 {
        return 0.0;
    }

    // Derivative: coef * s * k^s * x^(s-1) / (k^s + x^s)^2
    coef * s * k_pow_s * x_val.powf(s - 1.0) / (denom * denom)
}

/// Applies a response curve to every spend level in `x`.
pub fn evaluate_response<C>(x: &ArrayView1<f64>, curve: &C) -> Array1<f64>
where
    C: ResponseCurve + ?Sized,
{
    x.mapv(|val| curve.response(val))
}

/// Marginal return of a curve at every spend level in `x`.
pub fn evaluate_marginal<C>(x: &ArrayView1<f64>, curve: &C) -> Array1<f64>
where
    C: ResponseCurve + ?Sized,
{
    x.mapv(|val| curve.marginal(val))
}

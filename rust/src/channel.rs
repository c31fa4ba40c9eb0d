//! Marketing channels competing for budget.

use std::fmt;

use crate::saturation::ResponseCurve;

/// A channel: an identifier, its response curve and optional spend bounds.
///
/// Missing bounds are filled in from the optimizer configuration as shares of
/// the budget.
pub struct Channel<'a> {
    id: String,
    curve: Box<dyn ResponseCurve + 'a>,
    min_spend: Option<f64>,
    max_spend: Option<f64>,
}

impl<'a> Channel<'a> {
    pub fn new(id: impl Into<String>, curve: impl ResponseCurve + 'a) -> Self {
        Self {
            id: id.into(),
            curve: Box::new(curve),
            min_spend: None,
            max_spend: None,
        }
    }

    /// Sets both spend bounds.
    pub fn with_bounds(self, min_spend: f64, max_spend: f64) -> Self {
        self.with_min_spend(min_spend).with_max_spend(max_spend)
    }

    pub fn with_min_spend(mut self, min_spend: f64) -> Self {
        self.min_spend = Some(min_spend);
        self
    }

    pub fn with_max_spend(mut self, max_spend: f64) -> Self {
        self.max_spend = Some(max_spend);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn min_spend(&self) -> Option<f64> {
        self.min_spend
    }

    pub fn max_spend(&self) -> Option<f64> {
        self.max_spend
    }

    pub fn response(&self, spend: f64) -> f64 {
        self.curve.response(spend)
    }

    pub fn marginal(&self, spend: f64) -> f64 {
        self.curve.marginal(spend)
    }
}

impl fmt::Debug for Channel<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("min_spend", &self.min_spend)
            .field("max_spend", &self.max_spend)
            .finish_non_exhaustive()
    }
}

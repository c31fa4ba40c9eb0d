//! Result of a budget optimization.

use serde::Serialize;

/// Spend assigned to a single channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelAllocation {
    pub channel: String,
    pub spend: f64,
    /// Expected return at `spend`.
    pub response: f64,
    /// Marginal return at `spend`.
    pub marginal_return: f64,
}

/// Why the solver stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// Every free channel has zero marginal return.
    Stationary,
    /// A full projected step moves no channel by more than the tolerance.
    Converged,
    /// The full projected step is still large, but no shorter step along it
    /// improves the total response. Usually noise in the marginal returns.
    Stalled,
}

/// Spend per channel, in the order the channels were supplied.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Allocation {
    channels: Vec<ChannelAllocation>,
    total_response: f64,
    iterations: usize,
    termination: Termination,
}

impl Allocation {
    pub(crate) fn new(channels: Vec<ChannelAllocation>, iterations: usize, termination: Termination) -> Self {
        let total_response = channels.iter().map(|c| c.response).sum();
        Self {
            channels,
            total_response,
            iterations,
            termination,
        }
    }

    /// Spend assigned to `channel`, if it was part of the problem.
    pub fn spend(&self, channel: &str) -> Option<f64> {
        self.get(channel).map(|c| c.spend)
    }

    pub fn get(&self, channel: &str) -> Option<&ChannelAllocation> {
        self.channels.iter().find(|c| c.channel == channel)
    }

    pub fn channels(&self) -> &[ChannelAllocation] {
        &self.channels
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.channels.iter().map(|c| (c.channel.as_str(), c.spend))
    }

    pub fn total_spend(&self) -> f64 {
        self.channels.iter().map(|c| c.spend).sum()
    }

    /// Sum of every channel's response at its assigned spend.
    pub fn total_response(&self) -> f64 {
        self.total_response
    }

    /// Solver iterations used to reach this allocation.
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    pub fn termination(&self) -> Termination {
        self.termination
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

impl<'a> IntoIterator for &'a Allocation {
    type Item = &'a ChannelAllocation;
    type IntoIter = std::slice::Iter<'a, ChannelAllocation>;

    fn into_iter(self) -> Self::IntoIter {
        self.channels.iter()
    }
}

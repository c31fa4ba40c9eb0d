//! ROI allocator core: budget allocation across marketing channels.
//!
//! This crate provides:
//! - Response curves (linear, exponential saturation, Hill) and a
//!   [`ResponseCurve`] trait for arbitrary ROI functions
//! - Budget optimization (constrained projected gradient ascent)
//!
//! With the `python` feature it is also a PyO3 extension module.

mod allocation;
mod channel;
mod config;
mod error;
mod optimization;
mod saturation;

#[cfg(feature = "python")]
mod python;

pub use allocation::{Allocation, ChannelAllocation, Termination};
pub use channel::Channel;
pub use config::{OptimizerConfig, SpendPolicy};
pub use error::{AllocationError, Result};
pub use optimization::{optimize, AllocationOptimizer};
pub use saturation::{evaluate_marginal, evaluate_response, numeric_marginal, ResponseCurve, SaturationCurve};

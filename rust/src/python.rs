//! Python bindings via PyO3.
//!
//! Channels come in as `(name, curve, min_spend, max_spend)` tuples where
//! `curve` is either a callable `f(spend) -> float` or a `(kind, [params])`
//! tuple naming a built-in saturation curve.

use numpy::{IntoPyArray, PyArray1, PyReadonlyArray1};
use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::PyDict;
use tracing::debug;

use crate::channel::Channel;
use crate::config::OptimizerConfig;
use crate::error::AllocationError;
use crate::optimization::AllocationOptimizer;
use crate::saturation::{evaluate_marginal, evaluate_response, ResponseCurve, SaturationCurve};

/// Python module definition
#[pymodule]
fn roi_allocator_core(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(optimize_allocation_rust, m)?)?;
    m.add_function(wrap_pyfunction!(response_curve_rust, m)?)?;
    m.add_function(wrap_pyfunction!(marginal_curve_rust, m)?)?;
    Ok(())
}

impl From<AllocationError> for PyErr {
    fn from(err: AllocationError) -> PyErr {
        match &err {
            AllocationError::NonConvergence { .. } | AllocationError::NonFiniteResponse { .. } => {
                PyRuntimeError::new_err(err.to_string())
            }
            _ => PyValueError::new_err(err.to_string()),
        }
    }
}

enum PyResponseCurve {
    Callable(PyObject),
    Builtin(SaturationCurve),
}

impl PyResponseCurve {
    fn from_py(py: Python, curve: PyObject) -> PyResult<Self> {
        if curve.as_ref(py).is_callable() {
            return Ok(Self::Callable(curve));
        }
        let (kind, params): (String, Vec<f64>) = curve.extract(py).map_err(|_| {
            PyValueError::new_err("curve must be a callable or a (kind, params) tuple")
        })?;
        Ok(Self::Builtin(SaturationCurve::from_params(&kind, &params)?))
    }
}

impl ResponseCurve for PyResponseCurve {
    fn response(&self, spend: f64) -> f64 {
        match self {
            Self::Builtin(curve) => curve.response(spend),
            // A raised exception surfaces as a non-finite response
            Self::Callable(func) => Python::with_gil(|py| {
                func.call1(py, (spend,))
                    .and_then(|value| value.extract::<f64>(py))
                    .unwrap_or_else(|err| {
                        debug!(error = %err, spend, "response callable failed");
                        f64::NAN
                    })
            }),
        }
    }

    fn marginal(&self, spend: f64) -> f64 {
        match self {
            Self::Builtin(curve) => curve.marginal(spend),
            Self::Callable(_) => crate::saturation::numeric_marginal(|x| self.response(x), spend),
        }
    }
}

/// Budget allocation across channels.
///
/// Returns `(allocation, total_response)` where `allocation` maps each
/// channel name to its spend.
#[pyfunction]
#[pyo3(signature = (channels, total_budget, config_json = None))]
fn optimize_allocation_rust(
    py: Python,
    channels: Vec<(String, PyObject, Option<f64>, Option<f64>)>,
    total_budget: f64,
    config_json: Option<&str>,
) -> PyResult<(Py<PyDict>, f64)> {
    let config = match config_json {
        Some(payload) => OptimizerConfig::from_json(payload)?,
        None => OptimizerConfig::default(),
    };
    let optimizer = AllocationOptimizer::new(config)?;

    let channels = channels
        .into_iter()
        .map(|(name, curve, min_spend, max_spend)| {
            let mut channel = Channel::new(name, PyResponseCurve::from_py(py, curve)?);
            if let Some(min_spend) = min_spend {
                channel = channel.with_min_spend(min_spend);
            }
            if let Some(max_spend) = max_spend {
                channel = channel.with_max_spend(max_spend);
            }
            Ok(channel)
        })
        .collect::<PyResult<Vec<_>>>()?;

    let allocation = optimizer.optimize(&channels, total_budget)?;

    let dict = PyDict::new(py);
    for (channel, spend) in allocation.iter() {
        dict.set_item(channel, spend)?;
    }
    Ok((dict.into(), allocation.total_response()))
}

/// Built-in response curve evaluated over an array of spend levels.
#[pyfunction]
fn response_curve_rust(
    py: Python,
    x: PyReadonlyArray1<f64>,
    kind: &str,
    params: Vec<f64>,
) -> PyResult<Py<PyArray1<f64>>> {
    let curve = SaturationCurve::from_params(kind, &params)?;
    let x_array = x.as_array();
    let result = evaluate_response(&x_array, &curve);
    Ok(result.into_pyarray(py).to_owned())
}

/// Marginal return of a built-in curve over an array of spend levels.
#[pyfunction]
fn marginal_curve_rust(
    py: Python,
    x: PyReadonlyArray1<f64>,
    kind: &str,
    params: Vec<f64>,
) -> PyResult<Py<PyArray1<f64>>> {
    let curve = SaturationCurve::from_params(kind, &params)?;
    let x_array = x.as_array();
    let result = evaluate_marginal(&x_array, &curve);
    Ok(result.into_pyarray(py).to_owned())
}

//! Python bindings for the simulation kernel using PyO3

use pyo3::prelude::*;

use crate::config::SimConfig;
use crate::orchestrator::{run_and_aggregate, BatchReport};

fn value_error(context: &str, e: impl std::fmt::Display) -> PyErr {
    PyErr::new::<pyo3::exceptions::PyValueError, _>(format!("{context}: {e}"))
}

fn to_json(report: &BatchReport) -> PyResult<String> {
    serde_json::to_string(report)
        .map_err(|e| PyErr::new::<pyo3::exceptions::PyRuntimeError, _>(format!("Failed to serialize results: {e}")))
}

/// Apply per-call overrides on top of the file's trial settings.
fn with_overrides(mut config: SimConfig, num_trials: Option<usize>, parallel: Option<bool>) -> SimConfig {
    if let Some(n) = num_trials {
        config.trials.num_trials = n;
    }
    if let Some(p) = parallel {
        config.trials.parallel = p;
    }
    config
}

/// Run a scenario given as a JSON string; returns the batch report as JSON
#[pyfunction]
#[pyo3(signature = (config_json, num_trials=None, parallel=None))]
fn simulate_json(py: Python<'_>, config_json: &str, num_trials: Option<usize>, parallel: Option<bool>) -> PyResult<String> {
    let config = SimConfig::from_json(config_json).map_err(|e| value_error("Invalid config JSON", e))?;
    let scenario = with_overrides(config, num_trials, parallel)
        .build()
        .map_err(|e| value_error("Invalid scenario", e))?;

    // Release GIL during computation
    let report = py.allow_threads(|| run_and_aggregate(&scenario));
    to_json(&report)
}

/// Run a scenario from a YAML or JSON file
#[pyfunction]
#[pyo3(signature = (config_path, num_trials=None, parallel=None))]
fn simulate_from_file(
    py: Python<'_>,
    config_path: &str,
    num_trials: Option<usize>,
    parallel: Option<bool>,
) -> PyResult<String> {
    let config = SimConfig::from_file(config_path)
        .map_err(|e| PyErr::new::<pyo3::exceptions::PyIOError, _>(format!("Failed to load config: {e}")))?;
    let scenario = with_overrides(config, num_trials, parallel)
        .build()
        .map_err(|e| value_error("Invalid scenario", e))?;

    let report = py.allow_threads(|| run_and_aggregate(&scenario));
    to_json(&report)
}

/// Run several scenarios one after another; each may still run its own
/// trials in parallel
#[pyfunction]
#[pyo3(signature = (config_jsons, num_trials=None, parallel=None))]
fn simulate_batch(
    py: Python<'_>,
    config_jsons: Vec<String>,
    num_trials: Option<usize>,
    parallel: Option<bool>,
) -> PyResult<Vec<String>> {
    // Parse and validate everything before releasing the GIL
    let scenarios = config_jsons
        .iter()
        .map(|json| {
            let config = SimConfig::from_json(json).map_err(|e| value_error("Invalid config JSON", e))?;
            with_overrides(config, num_trials, parallel)
                .build()
                .map_err(|e| value_error("Invalid scenario", e))
        })
        .collect::<PyResult<Vec<_>>>()?;

    let reports = py.allow_threads(|| scenarios.iter().map(run_and_aggregate).collect::<Vec<_>>());
    reports.iter().map(to_json).collect()
}

/// Get number of threads in rayon's global pool
#[pyfunction]
fn get_thread_count() -> PyResult<usize> {
    Ok(rayon::current_num_threads())
}

/// Get number of available CPU cores
#[pyfunction]
fn get_available_cores() -> PyResult<usize> {
    Ok(num_cpus::get())
}

/// Python module definition
#[pymodule]
fn spellsim(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(simulate_json, m)?)?;
    m.add_function(wrap_pyfunction!(simulate_from_file, m)?)?;
    m.add_function(wrap_pyfunction!(simulate_batch, m)?)?;
    m.add_function(wrap_pyfunction!(get_thread_count, m)?)?;
    m.add_function(wrap_pyfunction!(get_available_cores, m)?)?;
    Ok(())
}

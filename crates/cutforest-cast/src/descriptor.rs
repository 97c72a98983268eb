//! Forecast result descriptor

use cutforest_core::types::{DiVector, RangeVector};
use serde::{Deserialize, Serialize};

/// Derived error statistics attached to a forecast. Data only; filled by
/// [`ErrorHandler::augment_descriptor`](crate::ErrorHandler::augment_descriptor).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastDescriptor {
    /// Mean error per (leadtime, coordinate) position
    pub error_mean: Vec<f32>,
    /// Signed RMSE: positive-error and negative-error components
    pub error_rmse: DiVector,
    /// Empirical error quantiles (median, upper, lower)
    pub observed_error_distribution: RangeVector,
    /// Fraction of past intervals that contained the realized actual
    pub interval_precision: Vec<f32>,
}

impl ForecastDescriptor {
    /// An empty descriptor for the given forecast dimensions
    pub fn new(forecast_horizon: usize, input_length: usize) -> Self {
        let length = forecast_horizon * input_length;
        Self {
            error_mean: vec![0.0; length],
            error_rmse: DiVector::new(length),
            observed_error_distribution: RangeVector::new(length),
            interval_precision: vec![0.0; length],
        }
    }
}

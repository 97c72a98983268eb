//! Flattened error-handler state and its reconstruction

use crate::error_handler::{ErrorHandler, ErrorHandlerConfig};
use cutforest_core::error::{ForestError, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Flattened snapshot of an [`ErrorHandler`].
///
/// `actuals_flat` holds `k * input_length` values for `k` stored steps;
/// `past_forecasts_flat` holds `k * 3 * forecast_horizon * input_length`
/// values, each step flattened as values, then upper, then lower bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorHandlerState {
    /// Sequence position of the next update
    pub sequence_index: u64,
    /// Number of leadtimes per forecast
    pub forecast_horizon: usize,
    /// Number of past pairs tracked per leadtime
    pub error_horizon: usize,
    /// Quantile used for the distribution bounds
    pub percentile: f64,
    /// Number of input coordinates per observation
    pub input_length: usize,
    /// Ring of actuals, flattened
    pub actuals_flat: Vec<f32>,
    /// Ring of forecasts, flattened
    pub past_forecasts_flat: Vec<f32>,
    /// Deviations stored for warm-up calibration
    pub last_deviations: Vec<f32>,
}

impl ErrorHandler {
    /// Capture the handler as a flattened snapshot
    pub fn to_state(&self) -> ErrorHandlerState {
        let length = self.forecast_horizon() * self.input_length();
        let mut actuals_flat = Vec::with_capacity(self.actuals.len() * self.input_length());
        let mut past_forecasts_flat = Vec::with_capacity(self.past_forecasts.len() * 3 * length);
        for (actual, forecast) in self.actuals.iter().zip(&self.past_forecasts) {
            actuals_flat.extend_from_slice(actual);
            past_forecasts_flat.extend_from_slice(&forecast.values);
            past_forecasts_flat.extend_from_slice(&forecast.upper);
            past_forecasts_flat.extend_from_slice(&forecast.lower);
        }
        ErrorHandlerState {
            sequence_index: self.sequence_index(),
            forecast_horizon: self.forecast_horizon(),
            error_horizon: self.error_horizon(),
            percentile: self.percentile(),
            input_length: self.input_length(),
            actuals_flat,
            past_forecasts_flat,
            last_deviations: self.last_deviations.clone(),
        }
    }

    /// Rebuild a handler from a flattened snapshot; the rings are restored
    /// and every derived statistic is recomputed from them.
    pub fn from_state(state: &ErrorHandlerState) -> Result<Self> {
        let config = ErrorHandlerConfig {
            forecast_horizon: state.forecast_horizon,
            error_horizon: state.error_horizon,
            percentile: state.percentile,
            input_length: state.input_length,
        };
        let mut handler = ErrorHandler::new(&config)?;
        if state.last_deviations.len() < state.input_length {
            return Err(ForestError::Misaligned(
                "deviations shorter than the input length".to_string(),
            ));
        }
        if state.actuals_flat.len() % state.input_length != 0 {
            return Err(ForestError::Misaligned(
                "actuals array is not a whole number of steps".to_string(),
            ));
        }
        let stored_steps = state.actuals_flat.len() / state.input_length;
        let ring_length = state.error_horizon + state.forecast_horizon;
        if stored_steps > ring_length {
            return Err(ForestError::Misaligned(
                "more stored steps than the ring holds".to_string(),
            ));
        }
        let length = state.forecast_horizon * state.input_length;
        if state.past_forecasts_flat.len() != stored_steps * 3 * length {
            return Err(ForestError::Misaligned(
                "misaligned forecasts".to_string(),
            ));
        }

        for step in 0..stored_steps {
            handler.actuals[step].copy_from_slice(
                &state.actuals_flat[step * state.input_length..(step + 1) * state.input_length],
            );
            let base = step * 3 * length;
            let forecast = &mut handler.past_forecasts[step];
            forecast
                .values
                .copy_from_slice(&state.past_forecasts_flat[base..base + length]);
            forecast
                .upper
                .copy_from_slice(&state.past_forecasts_flat[base + length..base + 2 * length]);
            forecast
                .lower
                .copy_from_slice(&state.past_forecasts_flat[base + 2 * length..base + 3 * length]);
        }
        handler.last_deviations = state.last_deviations.clone();
        handler.set_sequence_index(state.sequence_index);
        handler.recompute_errors();
        debug!(
            sequence_index = state.sequence_index,
            stored_steps, "restored error handler"
        );
        Ok(handler)
    }
}

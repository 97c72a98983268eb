//! Forecast-vs-actual error tracking and range calibration
//!
//! Two parallel rings of length `error_horizon + forecast_horizon` record the
//! forecast issued at each sequence position and the actual observed there.
//! Indexing is modulo the ring length with a monotonically increasing
//! sequence index. Derived statistics are recomputed from ring state alone,
//! so recomputation is idempotent.
//!
//! Per step the caller must invoke [`ErrorHandler::update_actuals`] and then
//! [`ErrorHandler::update_forecasts`]. Violating the order pairs stale
//! forecasts with new actuals; statistics degrade but nothing breaks.

use crate::descriptor::ForecastDescriptor;
use cutforest_core::error::{check_argument, Result};
use cutforest_core::types::{DiVector, RangeVector};
use serde::{Deserialize, Serialize};

/// Bound on the error horizon, constraining state size
pub const MAX_ERROR_HORIZON: usize = 1024;

/// How empirical error quantiles adjust a new forecast's ranges
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Calibration {
    /// Leave the forecast untouched
    None,
    /// Shift the central values and widen both bounds by the observed error
    /// quantiles
    Simple,
    /// Shift the central values but base both bounds on the uncalibrated
    /// values
    Minimal,
}

/// Configuration for [`ErrorHandler`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorHandlerConfig {
    /// Number of leadtimes per forecast
    pub forecast_horizon: usize,
    /// Number of past (forecast, actual) pairs per leadtime
    pub error_horizon: usize,
    /// Quantile used for the error distribution bounds
    pub percentile: f64,
    /// Number of input coordinates per observation
    pub input_length: usize,
}

impl ErrorHandlerConfig {
    /// Configuration with the default percentile of 0.1
    pub fn new(forecast_horizon: usize, error_horizon: usize, input_length: usize) -> Self {
        Self {
            forecast_horizon,
            error_horizon,
            percentile: 0.1,
            input_length,
        }
    }
}

/// Ring-buffer tracker of forecast errors with additive range calibration
#[derive(Debug, Clone)]
pub struct ErrorHandler {
    sequence_index: u64,
    percentile: f64,
    forecast_horizon: usize,
    error_horizon: usize,
    input_length: usize,
    pub(crate) past_forecasts: Vec<RangeVector>,
    pub(crate) actuals: Vec<Vec<f32>>,
    error_distribution: RangeVector,
    error_rmse: DiVector,
    error_mean: Vec<f32>,
    interval_precision: Vec<f32>,
    pub(crate) last_deviations: Vec<f32>,
    // reserved for a future multiplicative scheme; never consulted
    multipliers: RangeVector,
    adders: RangeVector,
}

impl ErrorHandler {
    /// Validate the configuration and create an empty handler
    pub fn new(config: &ErrorHandlerConfig) -> Result<Self> {
        check_argument(config.forecast_horizon > 0, "forecast horizon has to be positive")?;
        check_argument(
            config.error_horizon >= config.forecast_horizon,
            "error horizon should be at least as large as the forecast horizon",
        )?;
        check_argument(
            config.error_horizon <= MAX_ERROR_HORIZON,
            "reduce the error horizon",
        )?;
        check_argument(config.input_length > 0, "input length has to be positive")?;
        check_argument(
            (config.percentile - 0.25).abs() < 0.24,
            "percentile has to be inside (0.01, 0.49)",
        )?;

        let ring_length = config.error_horizon + config.forecast_horizon;
        let length = config.forecast_horizon * config.input_length;
        let mut multipliers = RangeVector::new(length);
        multipliers.values.fill(1.0);
        multipliers.upper.fill(1.0);
        multipliers.lower.fill(1.0);

        Ok(Self {
            sequence_index: 0,
            percentile: config.percentile,
            forecast_horizon: config.forecast_horizon,
            error_horizon: config.error_horizon,
            input_length: config.input_length,
            past_forecasts: vec![RangeVector::new(length); ring_length],
            actuals: vec![vec![0.0; config.input_length]; ring_length],
            error_distribution: RangeVector::new(length),
            error_rmse: DiVector::new(length),
            error_mean: vec![0.0; length],
            interval_precision: vec![0.0; length],
            last_deviations: vec![0.0; config.input_length],
            multipliers,
            adders: RangeVector::new(length),
        })
    }

    /// Record the actual observed at the previous position, advance the
    /// sequence and recompute the derived statistics. `deviations` feed the
    /// warm-up widening of the next calibration.
    pub fn update_actuals(&mut self, input: &[f32], deviations: &[f32]) -> Result<()> {
        check_argument(
            input.len() == self.input_length,
            "input length mismatch",
        )?;
        check_argument(
            deviations.len() >= self.input_length,
            "deviations length mismatch",
        )?;
        let ring_length = self.past_forecasts.len();
        if self.sequence_index > 0 {
            // the slot just behind the sequence is the first empty one
            let input_index = (self.sequence_index as usize + ring_length - 1) % ring_length;
            self.actuals[input_index].copy_from_slice(input);
        }
        // advance first: the recomputation depends on state alone
        self.sequence_index += 1;
        self.recompute_errors();
        self.last_deviations = deviations.to_vec();
        Ok(())
    }

    /// Record the forecast issued for the current position. Must follow
    /// [`update_actuals`](ErrorHandler::update_actuals) for the same step.
    pub fn update_forecasts(&mut self, vector: &RangeVector) -> Result<()> {
        check_argument(
            vector.len() == self.forecast_horizon * self.input_length,
            "forecast length mismatch",
        )?;
        let ring_length = self.past_forecasts.len();
        let stored_index = (self.sequence_index as usize + ring_length - 1) % ring_length;
        self.past_forecasts[stored_index] = vector.clone();
        Ok(())
    }

    /// Copy the derived statistics into a descriptor
    pub fn augment_descriptor(&self, descriptor: &mut ForecastDescriptor) {
        descriptor.error_mean = self.error_mean.clone();
        descriptor.error_rmse = self.error_rmse.clone();
        descriptor.observed_error_distribution = self.error_distribution.clone();
        descriptor.interval_precision = self.interval_precision.clone();
    }

    // number of (forecast, actual) pairs available for a leadtime; clamps to
    // zero during warm-up
    fn window_length(&self, leadtime: usize) -> usize {
        if self.sequence_index > (self.error_horizon + leadtime + 1) as u64 {
            self.error_horizon
        } else {
            (self.sequence_index as i64 - leadtime as i64 - 1).max(0) as usize
        }
    }

    pub(crate) fn recompute_errors(&mut self) {
        let ring_length = self.past_forecasts.len();
        // the last filled entry sits two behind the advanced sequence
        let input_index =
            (self.sequence_index as usize + 2 * ring_length - 2) % ring_length;
        let mut window_errors = vec![0.0f64; self.error_horizon];

        self.interval_precision.fill(0.0);
        for i in 0..self.forecast_horizon {
            let len = self.window_length(i);
            for j in 0..self.input_length {
                let pos = i * self.input_length + j;
                if len > 0 {
                    let mut positive_sum = 0.0f64;
                    let mut positive_sq_sum = 0.0f64;
                    let mut positive_count = 0usize;
                    let mut negative_sum = 0.0f64;
                    let mut negative_sq_sum = 0.0f64;
                    for (k, window_error) in window_errors.iter_mut().enumerate().take(len) {
                        // the forecast issued for a step and the actual
                        // realized there share a ring slot
                        let past_index = (input_index + ring_length - i - k) % ring_length;
                        let index = (input_index + ring_length - k) % ring_length;
                        let actual = self.actuals[index][j];
                        let error =
                            actual as f64 - self.past_forecasts[past_index].values[pos] as f64;
                        *window_error = error;
                        if self.past_forecasts[past_index].upper[pos] >= actual
                            && actual >= self.past_forecasts[past_index].lower[pos]
                        {
                            self.interval_precision[pos] += 1.0;
                        }
                        if error >= 0.0 {
                            positive_sum += error;
                            positive_sq_sum += error * error;
                            positive_count += 1;
                        } else {
                            negative_sum += error;
                            negative_sq_sum += error * error;
                        }
                    }
                    self.error_mean[pos] = ((positive_sum + negative_sum) / len as f64) as f32;
                    self.error_rmse.high[pos] = if positive_count > 0 {
                        (positive_sq_sum / positive_count as f64).sqrt() as f32
                    } else {
                        0.0
                    };
                    self.error_rmse.low[pos] = if positive_count < len {
                        -((negative_sq_sum / (len - positive_count) as f64).sqrt()) as f32
                    } else {
                        0.0
                    };
                    if len as f64 * self.percentile >= 1.0 {
                        let sorted = &mut window_errors[..len];
                        sorted.sort_by(|a, b| a.partial_cmp(b).expect("finite errors"));
                        self.error_distribution.values[pos] = interpolated_median(sorted);
                        self.error_distribution.upper[pos] =
                            interpolated_upper_rank(sorted, len as f64 * self.percentile);
                        self.error_distribution.lower[pos] =
                            interpolated_lower_rank(sorted, len as f64 * self.percentile);
                    }
                    self.interval_precision[pos] /= len as f32;
                } else {
                    self.error_mean[pos] = 0.0;
                    self.error_rmse.high[pos] = 0.0;
                    self.error_rmse.low[pos] = 0.0;
                    self.error_distribution.values[pos] = 0.0;
                    self.error_distribution.upper[pos] = 0.0;
                    self.error_distribution.lower[pos] = 0.0;
                    self.adders.values[pos] = 0.0;
                    self.adders.upper[pos] = 0.0;
                    self.adders.lower[pos] = 0.0;
                    self.interval_precision[pos] = 0.0;
                }
            }
        }
    }

    /// Calibrate a new forecast in place.
    ///
    /// Positions whose error window is too small for the quantile widen
    /// symmetrically by `1.3 x` the last deviations; positions with enough
    /// samples shift by the observed error distribution according to the
    /// chosen method.
    pub fn calibrate(&self, calibration: Calibration, ranges: &mut RangeVector) -> Result<()> {
        check_argument(
            ranges.len() == self.forecast_horizon * self.input_length,
            "mismatched lengths",
        )?;
        for i in 0..self.forecast_horizon {
            let len = self.window_length(i);
            for j in 0..self.input_length {
                let pos = i * self.input_length + j;
                if len == 0 || calibration == Calibration::None {
                    continue;
                }
                if (len as f64) * self.percentile < 1.0 {
                    let deviation = 1.3 * self.last_deviations[j];
                    ranges.upper[pos] = ranges.upper[pos].max(ranges.values[pos] + deviation);
                    ranges.lower[pos] = ranges.lower[pos].min(ranges.values[pos] - deviation);
                } else {
                    match calibration {
                        Calibration::Simple => adjust(pos, ranges, &self.error_distribution),
                        Calibration::Minimal => {
                            adjust_minimal(pos, ranges, &self.error_distribution)
                        }
                        Calibration::None => {}
                    }
                }
            }
        }
        Ok(())
    }

    /// Observed error quantiles per position (copy)
    pub fn error_distribution(&self) -> RangeVector {
        self.error_distribution.clone()
    }

    /// Mean error per position (copy)
    pub fn error_mean(&self) -> Vec<f32> {
        self.error_mean.clone()
    }

    /// Signed RMSE per position (copy)
    pub fn error_rmse(&self) -> DiVector {
        self.error_rmse.clone()
    }

    /// Interval hit rate per position (copy)
    pub fn interval_precision(&self) -> Vec<f32> {
        self.interval_precision.clone()
    }

    /// Reserved multiplicative channel (copy); all ones
    pub fn multipliers(&self) -> RangeVector {
        self.multipliers.clone()
    }

    /// Reserved additive channel (copy)
    pub fn adders(&self) -> RangeVector {
        self.adders.clone()
    }

    /// Sequence position of the next update
    pub fn sequence_index(&self) -> u64 {
        self.sequence_index
    }

    /// Number of leadtimes per forecast
    pub fn forecast_horizon(&self) -> usize {
        self.forecast_horizon
    }

    /// Number of past pairs tracked per leadtime
    pub fn error_horizon(&self) -> usize {
        self.error_horizon
    }

    /// Quantile used for the distribution bounds
    pub fn percentile(&self) -> f64 {
        self.percentile
    }

    /// Number of input coordinates per observation
    pub fn input_length(&self) -> usize {
        self.input_length
    }

    pub(crate) fn set_sequence_index(&mut self, sequence_index: u64) {
        self.sequence_index = sequence_index;
    }
}

fn adjust(pos: usize, ranges: &mut RangeVector, other: &RangeVector) {
    ranges.values[pos] += other.values[pos];
    ranges.upper[pos] = ranges.values[pos].max(ranges.upper[pos] + other.upper[pos]);
    ranges.lower[pos] = ranges.values[pos].min(ranges.lower[pos] + other.lower[pos]);
}

fn adjust_minimal(pos: usize, ranges: &mut RangeVector, other: &RangeVector) {
    let old_value = ranges.values[pos];
    ranges.values[pos] += other.values[pos];
    ranges.upper[pos] = ranges.values[pos].max(old_value + other.upper[pos]);
    ranges.lower[pos] = ranges.values[pos].min(old_value + other.lower[pos]);
}

// zero-biased interpolated median of a sorted window: when the two middle
// values straddle zero the median is exactly zero
pub(crate) fn interpolated_median(ascending: &[f64]) -> f32 {
    let len = ascending.len();
    let lower = if len % 2 == 0 {
        ascending[len / 2 - 1]
    } else {
        (ascending[len / 2] + ascending[len / 2 - 1]) / 2.0
    };
    let upper = if len % 2 == 0 {
        ascending[len / 2]
    } else {
        (ascending[len / 2] + ascending[len / 2 + 1]) / 2.0
    };
    if lower <= 0.0 && 0.0 <= upper {
        0.0
    } else {
        ((upper + lower) / 2.0) as f32
    }
}

pub(crate) fn interpolated_lower_rank(ascending: &[f64], fractional_rank: f64) -> f32 {
    let rank = fractional_rank.floor() as usize;
    (ascending[rank - 1] + (fractional_rank - rank as f64) * (ascending[rank] - ascending[rank - 1]))
        as f32
}

pub(crate) fn interpolated_upper_rank(ascending: &[f64], fractional_rank: f64) -> f32 {
    let len = ascending.len();
    let rank = fractional_rank.floor() as usize;
    (ascending[len - rank]
        + (fractional_rank - rank as f64) * (ascending[len - rank - 1] - ascending[len - rank]))
        as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constant_forecast(length: usize, value: f32, slack: f32) -> RangeVector {
        RangeVector::from_parts(
            vec![value; length],
            vec![value + slack; length],
            vec![value - slack; length],
        )
        .unwrap()
    }

    #[test]
    fn test_config_validation() {
        assert!(ErrorHandler::new(&ErrorHandlerConfig::new(3, 10, 1)).is_ok());
        assert!(ErrorHandler::new(&ErrorHandlerConfig::new(0, 10, 1)).is_err());
        assert!(ErrorHandler::new(&ErrorHandlerConfig::new(3, 2, 1)).is_err());
        assert!(ErrorHandler::new(&ErrorHandlerConfig::new(3, 2000, 1)).is_err());
        let mut config = ErrorHandlerConfig::new(3, 10, 1);
        config.percentile = 0.5;
        assert!(ErrorHandler::new(&config).is_err());
    }

    #[test]
    fn test_median_zero_bias() {
        assert_eq!(interpolated_median(&[-0.5, -0.1, 0.2, 0.6]), 0.0);
        assert!(interpolated_median(&[0.1, 0.2, 0.3, 0.4]) > 0.0);
        assert!(interpolated_median(&[-0.4, -0.3, -0.2, -0.1]) < 0.0);
    }

    #[test]
    fn test_interpolated_ranks() {
        let sorted = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(interpolated_lower_rank(&sorted, 1.0), 1.0);
        assert_eq!(interpolated_lower_rank(&sorted, 1.5), 1.5);
        assert_eq!(interpolated_upper_rank(&sorted, 1.0), 4.0);
        assert_eq!(interpolated_upper_rank(&sorted, 1.5), 3.5);
    }

    #[test]
    fn test_constant_stream_statistics() {
        let config = ErrorHandlerConfig {
            forecast_horizon: 2,
            error_horizon: 8,
            percentile: 0.25,
            input_length: 1,
        };
        let mut handler = ErrorHandler::new(&config).unwrap();
        // every forecast says 1.0 with [0, 2] bounds, every actual is 1.5
        for _ in 0..20 {
            handler.update_actuals(&[1.5], &[0.1]).unwrap();
            handler
                .update_forecasts(&constant_forecast(2, 1.0, 1.0))
                .unwrap();
        }
        let mean = handler.error_mean();
        let rmse = handler.error_rmse();
        let precision = handler.interval_precision();
        for pos in 0..2 {
            assert!((mean[pos] - 0.5).abs() < 1e-6);
            assert!((rmse.high[pos] - 0.5).abs() < 1e-6);
            assert_eq!(rmse.low[pos], 0.0);
            assert_eq!(precision[pos], 1.0);
        }
        let distribution = handler.error_distribution();
        for pos in 0..2 {
            assert!((distribution.values[pos] - 0.5).abs() < 1e-6);
        }
    }

    #[test]
    fn test_interval_precision_bounds() {
        let config = ErrorHandlerConfig::new(3, 10, 2);
        let mut handler = ErrorHandler::new(&config).unwrap();
        for step in 0..30 {
            let value = (step as f32 * 0.37).sin();
            handler.update_actuals(&[value, -value], &[0.2, 0.2]).unwrap();
            handler
                .update_forecasts(&constant_forecast(6, 0.0, 0.5))
                .unwrap();
        }
        for &p in &handler.interval_precision() {
            assert!((0.0..=1.0).contains(&p));
        }
    }

    #[test]
    fn test_recompute_is_idempotent() {
        let config = ErrorHandlerConfig::new(2, 6, 1);
        let mut handler = ErrorHandler::new(&config).unwrap();
        for step in 0..10 {
            handler
                .update_actuals(&[step as f32 * 0.3 - 1.0], &[0.05])
                .unwrap();
            handler
                .update_forecasts(&constant_forecast(2, 0.2, 0.4))
                .unwrap();
        }
        let before = (
            handler.error_mean(),
            handler.error_rmse(),
            handler.error_distribution(),
            handler.interval_precision(),
        );
        handler.recompute_errors();
        let after = (
            handler.error_mean(),
            handler.error_rmse(),
            handler.error_distribution(),
            handler.interval_precision(),
        );
        assert_eq!(before, after);
    }

    #[test]
    fn test_calibration_warm_up_widens_by_deviation() {
        let config = ErrorHandlerConfig {
            forecast_horizon: 3,
            error_horizon: 10,
            percentile: 0.25,
            input_length: 1,
        };
        let mut handler = ErrorHandler::new(&config).unwrap();
        for _ in 0..2 {
            handler.update_actuals(&[2.0], &[1.0]).unwrap();
            handler
                .update_forecasts(&constant_forecast(3, 1.0, 0.1))
                .unwrap();
        }

        // every leadtime window is still below the quantile threshold
        let mut ranges = constant_forecast(3, 1.0, 0.1);
        handler.calibrate(Calibration::Simple, &mut ranges).unwrap();
        // leadtime 0 has one sample: widened by 1.3 x deviation
        assert!((ranges.upper[0] - (1.0 + 1.3)).abs() < 1e-6);
        assert!((ranges.lower[0] - (1.0 - 1.3)).abs() < 1e-6);
        // leadtimes without any sample stay untouched
        assert_eq!(ranges.upper[2], 1.1);
        assert_eq!(ranges.lower[2], 0.9);

        // after eight more pairs the distribution takes over
        for _ in 0..8 {
            handler.update_actuals(&[2.0], &[1.0]).unwrap();
            handler
                .update_forecasts(&constant_forecast(3, 1.0, 0.1))
                .unwrap();
        }
        let mut calibrated = constant_forecast(3, 1.0, 0.1);
        handler
            .calibrate(Calibration::Simple, &mut calibrated)
            .unwrap();
        let distribution = handler.error_distribution();
        assert!(distribution.values[0] > 0.9);
        assert!((calibrated.values[0] - (1.0 + distribution.values[0])).abs() < 1e-6);
    }

    #[test]
    fn test_minimal_versus_simple_calibration() {
        let length = 1;
        let mut ranges_simple =
            RangeVector::from_parts(vec![1.0; length], vec![2.0; length], vec![0.0; length])
                .unwrap();
        let mut ranges_minimal = ranges_simple.clone();
        let distribution =
            RangeVector::from_parts(vec![0.5; length], vec![0.6; length], vec![-0.6; length])
                .unwrap();
        adjust(0, &mut ranges_simple, &distribution);
        adjust_minimal(0, &mut ranges_minimal, &distribution);

        assert_eq!(ranges_simple.values[0], 1.5);
        assert_eq!(ranges_minimal.values[0], 1.5);
        // simple compounds the old bound, minimal re-bases on the old value
        assert_eq!(ranges_simple.upper[0], 2.6);
        assert_eq!(ranges_minimal.upper[0], 1.6);
    }

    #[test]
    fn test_calibration_none_is_identity() {
        let config = ErrorHandlerConfig::new(2, 4, 1);
        let mut handler = ErrorHandler::new(&config).unwrap();
        for _ in 0..10 {
            handler.update_actuals(&[3.0], &[0.5]).unwrap();
            handler
                .update_forecasts(&constant_forecast(2, 1.0, 0.2))
                .unwrap();
        }
        let ranges = constant_forecast(2, 1.0, 0.2);
        let mut calibrated = ranges.clone();
        handler
            .calibrate(Calibration::None, &mut calibrated)
            .unwrap();
        assert_eq!(ranges, calibrated);
    }

    #[test]
    fn test_multipliers_stay_reserved() {
        let config = ErrorHandlerConfig::new(2, 4, 1);
        let mut handler = ErrorHandler::new(&config).unwrap();
        for _ in 0..10 {
            handler.update_actuals(&[3.0], &[0.5]).unwrap();
            handler
                .update_forecasts(&constant_forecast(2, 1.0, 0.2))
                .unwrap();
        }
        let multipliers = handler.multipliers();
        assert!(multipliers.values.iter().all(|&v| v == 1.0));
        assert!(multipliers.upper.iter().all(|&v| v == 1.0));
        assert!(multipliers.lower.iter().all(|&v| v == 1.0));
    }
}

//! Property-based tests for the error handler
//!
//! The expected statistics are recomputed independently from the step
//! history: the forecast issued at step `m - 1 - leadtime` is paired with the
//! actual observed at step `m`.

use cutforest_cast::{Calibration, ErrorHandler, ErrorHandlerConfig};
use cutforest_core::types::RangeVector;
use proptest::prelude::*;

const FORECAST_HORIZON: usize = 2;
const ERROR_HORIZON: usize = 6;

fn drive(
    actuals: &[f32],
    forecasts: &[f32],
    slack: f32,
) -> ErrorHandler {
    let config = ErrorHandlerConfig {
        forecast_horizon: FORECAST_HORIZON,
        error_horizon: ERROR_HORIZON,
        percentile: 0.25,
        input_length: 1,
    };
    let mut handler = ErrorHandler::new(&config).unwrap();
    for (&actual, &forecast) in actuals.iter().zip(forecasts) {
        handler.update_actuals(&[actual], &[0.5]).unwrap();
        let ranges = RangeVector::from_parts(
            vec![forecast; FORECAST_HORIZON],
            vec![forecast + slack; FORECAST_HORIZON],
            vec![forecast - slack; FORECAST_HORIZON],
        )
        .unwrap();
        handler.update_forecasts(&ranges).unwrap();
    }
    handler
}

// errors for a leadtime, newest first: actual at step m against the forecast
// issued at step m - 1 - leadtime (steps are 1-based)
fn window_errors(actuals: &[f32], forecasts: &[f32], leadtime: usize) -> Vec<f64> {
    let steps = actuals.len();
    let len = ERROR_HORIZON.min(steps.saturating_sub(leadtime + 1));
    (0..len)
        .map(|k| {
            let m = steps - k;
            actuals[m - 1] as f64 - forecasts[m - 2 - leadtime] as f64
        })
        .collect()
}

proptest! {
    // The reported mean error equals the arithmetic mean of the window.
    #[test]
    fn test_error_mean_matches_window(
        actuals in prop::collection::vec(-50i16..50, 3..40),
        forecasts in prop::collection::vec(-50i16..50, 40)
    ) {
        let actuals: Vec<f32> = actuals.iter().map(|&v| v as f32 * 0.1).collect();
        let forecasts: Vec<f32> = forecasts[..actuals.len()]
            .iter()
            .map(|&v| v as f32 * 0.1)
            .collect();
        let handler = drive(&actuals, &forecasts, 1.0);

        for leadtime in 0..FORECAST_HORIZON {
            let window = window_errors(&actuals, &forecasts, leadtime);
            let reported = handler.error_mean()[leadtime];
            if window.is_empty() {
                prop_assert_eq!(reported, 0.0);
            } else {
                let expected = window.iter().sum::<f64>() / window.len() as f64;
                prop_assert!(
                    (reported as f64 - expected).abs() < 1e-4,
                    "leadtime {}: reported {} expected {}",
                    leadtime, reported, expected
                );
            }
        }
    }

    // Interval precision is the hit fraction of the window, always in [0, 1].
    #[test]
    fn test_interval_precision_matches_window(
        actuals in prop::collection::vec(-20i16..20, 3..40),
        forecasts in prop::collection::vec(-20i16..20, 40)
    ) {
        let slack = 1.0f32;
        let actuals: Vec<f32> = actuals.iter().map(|&v| v as f32 * 0.1).collect();
        let forecasts: Vec<f32> = forecasts[..actuals.len()]
            .iter()
            .map(|&v| v as f32 * 0.1)
            .collect();
        let handler = drive(&actuals, &forecasts, slack);

        for leadtime in 0..FORECAST_HORIZON {
            let steps = actuals.len();
            let len = ERROR_HORIZON.min(steps.saturating_sub(leadtime + 1));
            let reported = handler.interval_precision()[leadtime];
            prop_assert!((0.0..=1.0).contains(&reported));
            if len > 0 {
                let hits = (0..len)
                    .filter(|&k| {
                        let m = steps - k;
                        let actual = actuals[m - 1];
                        let forecast = forecasts[m - 2 - leadtime];
                        forecast + slack >= actual && actual >= forecast - slack
                    })
                    .count();
                let expected = hits as f32 / len as f32;
                prop_assert!((reported - expected).abs() < 1e-6);
            } else {
                prop_assert_eq!(reported, 0.0);
            }
        }
    }

    // Signed RMSE components bracket the mean: low <= mean <= high.
    #[test]
    fn test_rmse_brackets_mean(
        actuals in prop::collection::vec(-50i16..50, 8..40),
        forecasts in prop::collection::vec(-50i16..50, 40)
    ) {
        let actuals: Vec<f32> = actuals.iter().map(|&v| v as f32 * 0.1).collect();
        let forecasts: Vec<f32> = forecasts[..actuals.len()]
            .iter()
            .map(|&v| v as f32 * 0.1)
            .collect();
        let handler = drive(&actuals, &forecasts, 1.0);
        let mean = handler.error_mean();
        let rmse = handler.error_rmse();
        for pos in 0..FORECAST_HORIZON {
            prop_assert!(rmse.high[pos] >= 0.0);
            prop_assert!(rmse.low[pos] <= 0.0);
            prop_assert!(mean[pos] <= rmse.high[pos] + 1e-6);
            prop_assert!(mean[pos] >= rmse.low[pos] - 1e-6);
        }
    }

    // Calibration never narrows a forecast interval.
    #[test]
    fn test_calibration_never_narrows(
        actuals in prop::collection::vec(-50i16..50, 3..40),
        forecasts in prop::collection::vec(-50i16..50, 40),
        center in -20i16..20,
    ) {
        let actuals: Vec<f32> = actuals.iter().map(|&v| v as f32 * 0.1).collect();
        let forecasts: Vec<f32> = forecasts[..actuals.len()]
            .iter()
            .map(|&v| v as f32 * 0.1)
            .collect();
        let handler = drive(&actuals, &forecasts, 1.0);

        let base = RangeVector::from_parts(
            vec![center as f32 * 0.1; FORECAST_HORIZON],
            vec![center as f32 * 0.1 + 0.2; FORECAST_HORIZON],
            vec![center as f32 * 0.1 - 0.2; FORECAST_HORIZON],
        )
        .unwrap();
        let mut simple = base.clone();
        handler.calibrate(Calibration::Simple, &mut simple).unwrap();
        for pos in 0..FORECAST_HORIZON {
            let width_before = base.upper[pos] - base.lower[pos];
            let width_after = simple.upper[pos] - simple.lower[pos];
            prop_assert!(width_after >= width_before - 1e-6);
            prop_assert!(simple.upper[pos] >= simple.values[pos]);
            prop_assert!(simple.lower[pos] <= simple.values[pos]);
        }

        // minimal calibration re-bases on the uncalibrated values and may
        // narrow, but the bound ordering always survives
        let mut minimal = base.clone();
        handler.calibrate(Calibration::Minimal, &mut minimal).unwrap();
        for pos in 0..FORECAST_HORIZON {
            prop_assert!(minimal.upper[pos] >= minimal.values[pos]);
            prop_assert!(minimal.lower[pos] <= minimal.values[pos]);
        }
    }
}

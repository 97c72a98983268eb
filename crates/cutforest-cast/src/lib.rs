//! # Cutforest Cast
//!
//! Forecast-error tracking and interval calibration for cutforest.
//!
//! [`ErrorHandler`] keeps ring buffers of past forecasts and realized actuals,
//! derives per-leadtime, per-coordinate error statistics (mean, signed RMSE,
//! empirical error quantiles, interval precision) and applies them to widen or
//! shift the ranges of new forecasts.
//!
//! Calibration is additive over two fixed quantiles. Multiplicative,
//! scale-free schemes raise the question of the current scale of the stream
//! and are out of scope; the `multipliers` channel is allocated for such a
//! scheme but never consulted.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod descriptor;
pub mod error_handler;
pub mod state;

pub use cutforest_core::error::{ForestError, Result};
pub use descriptor::ForecastDescriptor;
pub use error_handler::{Calibration, ErrorHandler, ErrorHandlerConfig, MAX_ERROR_HORIZON};
pub use state::ErrorHandlerState;

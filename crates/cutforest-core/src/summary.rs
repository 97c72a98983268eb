//! Weighted per-coordinate statistics over a collection of points

use crate::error::{check_argument, Result};
use serde::{Deserialize, Serialize};

/// Default lower quantile fraction used by store summaries
pub const DEFAULT_LOWER_FRACTION: f64 = 0.1;

/// Default upper quantile fraction used by store summaries
pub const DEFAULT_UPPER_FRACTION: f64 = 0.9;

/// Basic weighted statistics of a point collection: per-coordinate mean,
/// median, deviation and quantile bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleSummary {
    /// Sum of the point weights
    pub total_weight: f32,
    /// Weighted per-coordinate mean
    pub mean: Vec<f32>,
    /// Weighted per-coordinate median
    pub median: Vec<f32>,
    /// Weighted per-coordinate standard deviation
    pub deviation: Vec<f32>,
    /// Weighted upper-quantile value per coordinate
    pub upper: Vec<f32>,
    /// Weighted lower-quantile value per coordinate
    pub lower: Vec<f32>,
}

impl SampleSummary {
    /// Compute a summary of weighted points.
    ///
    /// Weights must be non-negative with a positive finite total; every
    /// coordinate must be finite. `lower_fraction` must be below 0.5 and
    /// `upper_fraction` above it.
    pub fn from_weighted_points(
        dimensions: usize,
        points: &[(Vec<f32>, f32)],
        lower_fraction: f64,
        upper_fraction: f64,
    ) -> Result<Self> {
        check_argument(dimensions > 0, "dimensions must be greater than 0")?;
        check_argument(!points.is_empty(), "point list must not be empty")?;
        check_argument(lower_fraction < 0.5, "lower fraction must be below one half")?;
        check_argument(upper_fraction > 0.5, "upper fraction must be above one half")?;

        let total_weight: f64 = points.iter().map(|(_, w)| *w as f64).sum();
        check_argument(total_weight > 0.0, "weights must not all be zero")?;
        check_argument(total_weight.is_finite(), "total weight must be finite")?;

        let mut sum = vec![0.0f64; dimensions];
        let mut sum_sq = vec![0.0f64; dimensions];
        for (point, weight) in points {
            check_argument(*weight >= 0.0, "weights must be non-negative")?;
            check_argument(point.len() == dimensions, "point has wrong dimension")?;
            for (j, &value) in point.iter().enumerate() {
                check_argument(value.is_finite(), "coordinates must be finite")?;
                sum[j] += *weight as f64 * value as f64;
                sum_sq[j] += *weight as f64 * value as f64 * value as f64;
            }
        }

        let mut mean = vec![0.0f32; dimensions];
        let mut deviation = vec![0.0f32; dimensions];
        for j in 0..dimensions {
            mean[j] = (sum[j] / total_weight) as f32;
            let variance = sum_sq[j] / total_weight - (sum[j] / total_weight).powi(2);
            deviation[j] = variance.max(0.0).sqrt() as f32;
        }

        let mut median = vec![0.0f32; dimensions];
        let mut upper = vec![0.0f32; dimensions];
        let mut lower = vec![0.0f32; dimensions];
        for j in 0..dimensions {
            let mut column: Vec<(f32, f32)> = points.iter().map(|(p, w)| (p[j], *w)).collect();
            column.sort_by(|a, b| a.0.partial_cmp(&b.0).expect("finite coordinates"));
            lower[j] = Self::weighted_value(&column, total_weight * lower_fraction);
            median[j] = Self::weighted_value(&column, total_weight * 0.5);
            upper[j] = Self::weighted_value(&column, total_weight * upper_fraction);
        }

        Ok(Self {
            total_weight: total_weight as f32,
            mean,
            median,
            deviation,
            upper,
            lower,
        })
    }

    // value at the first entry whose cumulative weight reaches `target`
    fn weighted_value(column: &[(f32, f32)], target: f64) -> f32 {
        let mut running = 0.0f64;
        for &(value, weight) in column {
            running += weight as f64;
            if running >= target {
                return value;
            }
        }
        column.last().map(|&(v, _)| v).unwrap_or(0.0)
    }
}

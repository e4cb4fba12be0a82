//! Standardisation scalers fitted at training time

use serde::{Deserialize, Serialize};

/// Affine standardisation `x' = (x - mean) / scale` for one column.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    pub mean: f64,
    /// Standard deviation of the training column
    pub scale: f64,
}

impl StandardScaler {
    pub fn new(mean: f64, scale: f64) -> Self {
        Self { mean, scale }
    }

    /// Scale a single value. A zero scale (constant training column) leaves
    /// the centred value unscaled.
    pub fn transform(&self, value: f64) -> f64 {
        let scale = if self.scale == 0.0 { 1.0 } else { self.scale };
        (value - self.mean) / scale
    }

    /// Fit to a sample using the population standard deviation.
    #[cfg(test)]
    pub fn fit(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self::new(0.0, 1.0);
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        Self::new(mean, variance.sqrt())
    }
}

/// The two scalers shipped alongside a classifier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScalerBundle {
    pub scaler_time: StandardScaler,
    pub scaler_amount: StandardScaler,
}

//! Scalar Kalman filter for noisy ADC readings.

/// One-dimensional Kalman filter with a fixed process noise.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KalmanFilter {
    measurement_error: f64,
    estimate_error: f64,
    process_noise: f64,
    estimate: f64,
}

impl KalmanFilter {
    /// Create a filter.
    #[must_use]
    pub fn new(measurement_error: f64, estimate_error: f64, process_noise: f64) -> Self {
        Self {
            measurement_error,
            estimate_error,
            process_noise,
            estimate: 0.0,
        }
    }

    /// Fold one measurement into the estimate and return the new estimate.
    pub fn update(&mut self, measurement: f64) -> f64 {
        let gain = self.estimate_error / (self.estimate_error + self.measurement_error);
        let current = self.estimate + gain * (measurement - self.estimate);
        self.estimate_error = (1.0 - gain) * self.estimate_error
            + (self.estimate - current).abs() * self.process_noise;
        self.estimate = current;
        current
    }

    /// Latest estimate.
    #[must_use]
    pub fn estimate(&self) -> f64 {
        self.estimate
    }
}

impl Default for KalmanFilter {
    /// Tuning used for the tank pressure input.
    fn default() -> Self {
        Self::new(100.0, 100.0, 0.1)
    }
}

// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains a second-order low-pass filter for smoothing joint velocities and positions.

/// Coefficient used if none is configured.
pub static DEFAULT_FILTER_COEFF: f64 = 2.0;

/// Discrete second-order (Butterworth shaped) low-pass filter.
///
/// Keeps the last three raw samples and the last two filtered samples. A higher
/// `filter_coeff` means more smoothing and a longer settling time.
#[derive(Debug, Clone)]
pub struct LowPassFilter {
    filter_coeff: f64,
    prev_msrmts: [f64; 3],
    prev_filtered_msrmts: [f64; 2],
}

impl LowPassFilter {
    /// Creates a filter with all history slots set to zero.
    /// # Panics
    /// * if `filter_coeff` is not positive and finite.
    pub fn new(filter_coeff: f64) -> Self {
        assert!(filter_coeff > 0. && filter_coeff.is_finite());
        LowPassFilter {
            filter_coeff,
            prev_msrmts: [0.; 3],
            prev_filtered_msrmts: [0.; 2],
        }
    }

    pub fn filter_coeff(&self) -> f64 {
        self.filter_coeff
    }

    /// Sets every raw and filtered history slot to `data`, so the next outputs start at
    /// `data` instead of jumping from stale history.
    pub fn reset(&mut self, data: f64) {
        self.prev_msrmts = [data; 3];
        self.prev_filtered_msrmts = [data; 2];
    }

    /// Pushes a new measurement into the filter and returns the filtered value.
    pub fn filter(&mut self, new_msrmt: f64) -> f64 {
        let c = self.filter_coeff;
        self.prev_msrmts[2] = self.prev_msrmts[1];
        self.prev_msrmts[1] = self.prev_msrmts[0];
        self.prev_msrmts[0] = new_msrmt;

        // prev_filtered_msrmts[0] is y[n-1], prev_filtered_msrmts[1] is y[n-2]
        let new_filtered_msrmt = (1. / (1. + c * c + 1.414 * c))
            * (self.prev_msrmts[2] + 2. * self.prev_msrmts[1] + self.prev_msrmts[0]
                - (c * c - 1.414 * c + 1.) * self.prev_filtered_msrmts[1]
                - (-2. * c * c + 2.) * self.prev_filtered_msrmts[0]);

        self.prev_filtered_msrmts[1] = self.prev_filtered_msrmts[0];
        self.prev_filtered_msrmts[0] = new_filtered_msrmt;
        new_filtered_msrmt
    }
}

impl Default for LowPassFilter {
    fn default() -> Self {
        LowPassFilter::new(DEFAULT_FILTER_COEFF)
    }
}

/// Descriptive statistics over one metric of the analyzed slice.
///
/// Standard deviation is the sample (n−1) form; it is 0.0 for a constant
/// series and for slices shorter than two values, which callers treat as
/// "skip the z-score pass".
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DescriptiveStats {
    pub count: usize,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub std_dev: f64,
}

impl DescriptiveStats {
    pub fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }

        let count = values.len();
        let sum: f64 = values.iter().sum();
        let mean = sum / count as f64;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for &v in values {
            min = min.min(v);
            max = max.max(v);
        }

        let std_dev = if count < 2 {
            0.0
        } else {
            let sq_sum: f64 = values.iter().map(|v| (v - mean) * (v - mean)).sum();
            (sq_sum / (count - 1) as f64).sqrt()
        };

        Some(Self {
            count,
            mean,
            min,
            max,
            std_dev,
        })
    }

    /// Standardized score of `value` against this distribution, or `None`
    /// for a constant series.
    pub fn z_score(&self, value: f64) -> Option<f64> {
        if self.std_dev == 0.0 {
            return None;
        }
        Some((value - self.mean) / self.std_dev)
    }
}

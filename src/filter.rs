//! Statistical outlier rejection for sensor windows.
//!
//! DHT22-class sensors occasionally report single wild values. A window's
//! mean and population standard deviation are computed, and anything at or
//! beyond `std_factor` deviations from the mean is discarded.

pub const DEFAULT_STD_FACTOR: f64 = 2.0;

/// Arithmetic mean; `None` for an empty slice.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Population standard deviation (divides by N, not N-1).
pub fn population_std_dev(values: &[f64]) -> Option<f64> {
    let mu = mean(values)?;
    let variance = values.iter().map(|v| (v - mu).powi(2)).sum::<f64>() / values.len() as f64;
    Some(variance.sqrt())
}

/// Keep the values strictly inside `(mean - k*sigma, mean + k*sigma)`.
///
/// If every value is identical (sigma 0) the input is returned unchanged.
/// The result preserves input order and may be empty, as it is for an
/// empty slice.
pub fn eliminate_noise(values: &[f64], std_factor: f64) -> Vec<f64> {
    let Some(&first) = values.first() else {
        return Vec::new();
    };
    // Rounding leaves a tiny nonzero sigma for identical values, so compare directly.
    if values.iter().all(|&v| v == first) {
        return values.to_vec();
    }
    let (Some(mu), Some(sigma)) = (mean(values), population_std_dev(values)) else {
        return Vec::new();
    };

    let lower = mu - std_factor * sigma;
    let upper = mu + std_factor * sigma;

    // Both passes use the same mu/sigma from the full window.
    let above_lower: Vec<f64> = values.iter().copied().filter(|&v| v > lower).collect();
    above_lower.into_iter().filter(|&v| v < upper).collect()
}

/// Mean of the window after noise elimination, or `None` if nothing survives.
pub fn filtered_mean(values: &[f64], std_factor: f64) -> Option<f64> {
    mean(&eliminate_noise(values, std_factor))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn population_std_dev_divides_by_n() {
        let sigma = population_std_dev(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap();
        assert!((sigma - 2.0).abs() < 1e-12);
    }

    #[test]
    fn empty_input_has_no_statistics() {
        assert_eq!(mean(&[]), None);
        assert_eq!(population_std_dev(&[]), None);
        assert!(eliminate_noise(&[], DEFAULT_STD_FACTOR).is_empty());
    }
}

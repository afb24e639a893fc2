use crate::Sample;

/// Simple moving average over consecutive windows of `window` values.
///
/// Returns the input unchanged when it is shorter than the window (or the
/// window is zero); otherwise the result has `len - window + 1` entries.
pub fn moving_average(values: &[f64], window: usize) -> Vec<f64> {
    if window == 0 || values.len() < window {
        return values.to_vec();
    }

    let mut out = Vec::with_capacity(values.len() - window + 1);
    let mut sum: f64 = values[..window].iter().sum();
    out.push(sum / window as f64);
    for i in window..values.len() {
        sum += values[i] - values[i - window];
        out.push(sum / window as f64);
    }
    out
}

/// Smooths a buffer snapshot. Each averaged value takes the timestamp of the
/// newest sample in its window.
pub fn smooth_samples(samples: &[Sample], window: usize) -> Vec<Sample> {
    if window == 0 || samples.len() < window {
        return samples.to_vec();
    }

    let values: Vec<f64> = samples.iter().map(|s| s.value).collect();
    moving_average(&values, window)
        .into_iter()
        .zip(&samples[window - 1..])
        .map(|(value, s)| Sample::new(value, s.timestamp))
        .collect()
}

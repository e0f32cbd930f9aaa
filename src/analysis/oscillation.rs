// THEORY:
// The `OscillationAnalyzer` reduces one angle series to a tail-beat summary: the mean
// half-peak-to-peak amplitude and the beat frequency.
//
// Steps, in order:
// 1.  **Clean**: samples whose time or angle is not finite (degenerate frames) are
//     dropped.
// 2.  **Smooth**: centered moving average; the window shrinks near both ends.
// 3.  **Resample**: every `knot_stride`-th sample, plus the final one, becomes a knot
//     of a natural cubic spline.
// 4.  **Extrema**: the roots of the spline's derivative are the candidate turning
//     points.
// 5.  **Denoise**: two neighbouring roots closer than `noise_time_ms` *and* whose
//     spline values differ by less than `noise_value_ratio` of the series range are
//     noise. Every run of roots chained by noise pairs collapses to its median time.
// 6.  **Reduce**: amplitude is the mean of `|S(r[i]) - S(r[i-1])| / 2`, frequency is
//     `(n - 1) / 2` cycles over the time between the first and last extremum.
//
// Fewer than two extrema leave both values undetermined (NaN).

use crate::analysis::spline::CubicSpline;
use crate::config::OscillationConfig;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OscillationSummary {
    pub mean_amplitude: f64,
    pub frequency_hz: f64,
    /// Extrema left after noise filtering.
    pub extrema: usize,
}

impl OscillationSummary {
    pub fn undetermined(extrema: usize) -> Self {
        Self {
            mean_amplitude: f64::NAN,
            frequency_hz: f64::NAN,
            extrema,
        }
    }

    pub fn is_determined(&self) -> bool {
        self.mean_amplitude.is_finite() && self.frequency_hz.is_finite()
    }
}

#[derive(Debug, Clone)]
pub struct OscillationAnalyzer {
    config: OscillationConfig,
}

impl OscillationAnalyzer {
    pub fn new(config: OscillationConfig) -> Self {
        Self { config }
    }

    /// `time_ms` and `angle` are parallel series.
    pub fn analyze(&self, time_ms: &[f64], angle: &[f64]) -> OscillationSummary {
        // --- 1. Clean ---
        let (times, values): (Vec<f64>, Vec<f64>) = time_ms
            .iter()
            .zip(angle.iter())
            .filter(|(t, a)| t.is_finite() && a.is_finite())
            .map(|(t, a)| (*t, *a))
            .unzip();

        // --- 2. Smooth ---
        let smoothed = moving_average(&values, self.config.smoothing_window);

        // --- 3. Resample ---
        let (knot_t, knot_v) = knots(&times, &smoothed, self.config.knot_stride);
        let Some(spline) = CubicSpline::natural(&knot_t, &knot_v) else {
            debug!(samples = times.len(), "too few samples to fit a spline");
            return OscillationSummary::undetermined(0);
        };

        // --- 4. Extrema ---
        let roots = spline.derivative_roots();

        // --- 5. Denoise ---
        let range = value_range(&smoothed);
        let extrema = collapse_noise(
            &roots,
            |t| spline.eval(t),
            self.config.noise_time_ms,
            self.config.noise_value_ratio * range,
        );
        debug!(roots = roots.len(), extrema = extrema.len(), range, "oscillation extrema");

        // --- 6. Reduce ---
        reduce(&extrema, |t| spline.eval(t))
    }
}

fn reduce(extrema: &[f64], value_at: impl Fn(f64) -> f64) -> OscillationSummary {
    let (Some(first), Some(last)) = (extrema.first(), extrema.last()) else {
        return OscillationSummary::undetermined(0);
    };
    let span = last - first;
    if extrema.len() < 2 || span <= 0.0 {
        return OscillationSummary::undetermined(extrema.len());
    }
    let values: Vec<f64> = extrema.iter().map(|&t| value_at(t)).collect();
    let half_swings: Vec<f64> = values.windows(2).map(|w| (w[1] - w[0]).abs() / 2.0).collect();
    let mean_amplitude = half_swings.iter().sum::<f64>() / half_swings.len() as f64;
    let cycles = (extrema.len() - 1) as f64 / 2.0;
    OscillationSummary {
        mean_amplitude,
        frequency_hz: cycles * 1000.0 / span,
        extrema: extrema.len(),
    }
}

/// Centered moving average of width `window`, shrinking at the edges.
pub fn moving_average(values: &[f64], window: usize) -> Vec<f64> {
    let half = window / 2;
    let n = values.len();
    (0..n)
        .map(|i| {
            let lo = i.saturating_sub(half);
            let hi = (i + half).min(n - 1);
            let slice = &values[lo..=hi];
            slice.iter().sum::<f64>() / slice.len() as f64
        })
        .collect()
}

/// Every `stride`-th sample plus the last one, keeping times strictly increasing.
fn knots(times: &[f64], values: &[f64], stride: usize) -> (Vec<f64>, Vec<f64>) {
    let n = times.len();
    let mut indices: Vec<usize> = (0..n).step_by(stride.max(1)).collect();
    if n > 0 && indices.last() != Some(&(n - 1)) {
        indices.push(n - 1);
    }
    let mut kt: Vec<f64> = Vec::with_capacity(indices.len());
    let mut kv: Vec<f64> = Vec::with_capacity(indices.len());
    for i in indices {
        if kt.last().is_none_or(|&prev| times[i] > prev) {
            kt.push(times[i]);
            kv.push(values[i]);
        }
    }
    (kt, kv)
}

fn value_range(values: &[f64]) -> f64 {
    let (lo, hi) = values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    if hi >= lo { hi - lo } else { 0.0 }
}

/// Collapses runs of roots chained by noise pairs to their median time.
pub fn collapse_noise(
    roots: &[f64],
    value_at: impl Fn(f64) -> f64,
    noise_time: f64,
    noise_value: f64,
) -> Vec<f64> {
    let mut kept = Vec::with_capacity(roots.len());
    let mut run: Vec<f64> = Vec::new();
    for &root in roots {
        if let Some(&prev) = run.last() {
            let is_noise = root - prev < noise_time && (value_at(root) - value_at(prev)).abs() < noise_value;
            if !is_noise {
                kept.push(median(&run));
                run.clear();
            }
        }
        run.push(root);
    }
    if !run.is_empty() {
        kept.push(median(&run));
    }
    kept
}

/// Median of an ascending, non-empty run.
fn median(run: &[f64]) -> f64 {
    let mid = run.len() / 2;
    if run.len() % 2 == 1 {
        run[mid]
    } else {
        (run[mid - 1] + run[mid]) / 2.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn analyzer() -> OscillationAnalyzer {
        OscillationAnalyzer::new(OscillationConfig::default())
    }

    #[test]
    fn two_hertz_sinusoid() {
        let time: Vec<f64> = (0..2000).map(|t| t as f64).collect();
        let angle: Vec<f64> = time.iter().map(|t| 10.0 * (2.0 * PI * 2.0 * t / 1000.0).sin()).collect();
        let summary = analyzer().analyze(&time, &angle);
        assert!(summary.is_determined());
        assert!((summary.frequency_hz - 2.0).abs() < 0.2, "{summary:?}");
        assert!((summary.mean_amplitude - 10.0).abs() < 1.5, "{summary:?}");
        assert_eq!(summary.extrema, 8);
    }

    #[test]
    fn nan_samples_are_skipped() {
        let time: Vec<f64> = (0..2000).map(|t| t as f64).collect();
        let angle: Vec<f64> = time
            .iter()
            .map(|t| {
                if (*t as usize) % 97 == 0 {
                    f64::NAN
                } else {
                    10.0 * (2.0 * PI * 2.0 * t / 1000.0).sin()
                }
            })
            .collect();
        let summary = analyzer().analyze(&time, &angle);
        assert!((summary.frequency_hz - 2.0).abs() < 0.2, "{summary:?}");
    }

    #[test]
    fn flat_or_short_series_are_undetermined() {
        let time: Vec<f64> = (0..300).map(|t| t as f64).collect();
        let flat = vec![5.0; 300];
        assert!(!analyzer().analyze(&time, &flat).is_determined());
        assert!(!analyzer().analyze(&[0.0], &[1.0]).is_determined());
        assert!(!analyzer().analyze(&[], &[]).is_determined());
    }

    #[test]
    fn noise_runs_collapse_to_their_median() {
        let values = |t: f64| match t as i64 {
            100 => 10.0,
            105 => 9.9,
            110 => 10.0,
            300 => -10.0,
            400 => -10.0,
            406 => -9.8,
            _ => 0.0,
        };
        let kept = collapse_noise(&[100.0, 105.0, 110.0, 300.0, 400.0, 406.0], values, 20.0, 1.0);
        assert_eq!(kept, vec![105.0, 300.0, 403.0]);
    }

    #[test]
    fn close_but_large_swings_are_not_noise() {
        let values = |t: f64| if t < 102.0 { 10.0 } else { -10.0 };
        let kept = collapse_noise(&[100.0, 105.0], values, 20.0, 1.0);
        assert_eq!(kept, vec![100.0, 105.0]);
    }

    #[test]
    fn moving_average_shrinks_at_the_edges() {
        let smoothed = moving_average(&[0.0, 3.0, 6.0, 9.0, 12.0], 3);
        assert_eq!(smoothed, vec![1.5, 3.0, 6.0, 9.0, 10.5]);
    }
}

use rustfft::num_complex::Complex;
use rustfft::FftPlanner;

/// Smallest power of two that is at least `value`, never below 2.
pub fn next_power_of_two(value: usize) -> usize {
    value.max(2).next_power_of_two()
}

/// Locates watermark windows inside a larger signal by circular
/// cross-correlation.
///
/// Holds an FFT planner so repeated alignments of equal-length signals reuse
/// the same plans.
pub struct SignalAligner {
    planner: FftPlanner<f64>,
}

impl Default for SignalAligner {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalAligner {
    pub fn new() -> Self {
        Self {
            planner: FftPlanner::new(),
        }
    }

    /// Sample offset in `subject` where `pattern` matches best.
    ///
    /// Both signals are zero-padded to the next power of two of the subject
    /// length. The first index of the maximum correlation magnitude wins.
    pub fn find_offset(&mut self, subject: &[i16], pattern: &[i16]) -> usize {
        if subject.is_empty() || pattern.is_empty() {
            return 0;
        }

        let n = next_power_of_two(subject.len());
        let forward = self.planner.plan_fft_forward(n);
        let inverse = self.planner.plan_fft_inverse(n);
        let scale = 1.0 / (n as f64).sqrt();

        let mut subject_spectrum = padded(subject, n);
        let mut pattern_spectrum = padded(pattern, n);
        forward.process(&mut subject_spectrum);
        forward.process(&mut pattern_spectrum);

        let mut correlation: Vec<Complex<f64>> = subject_spectrum
            .iter()
            .zip(&pattern_spectrum)
            .map(|(s, p)| (*s * scale) * (*p * scale).conj())
            .collect();
        inverse.process(&mut correlation);

        let mut best_index = 0;
        let mut best = f64::NEG_INFINITY;
        for (i, value) in correlation.iter().enumerate() {
            let magnitude = (*value * scale).norm();
            if magnitude > best {
                best = magnitude;
                best_index = i;
            }
        }
        best_index
    }
}

/// Convenience wrapper around a one-off [`SignalAligner`].
pub fn find_offset(subject: &[i16], pattern: &[i16]) -> usize {
    SignalAligner::new().find_offset(subject, pattern)
}

fn padded(samples: &[i16], n: usize) -> Vec<Complex<f64>> {
    let mut buffer = vec![Complex::new(0.0, 0.0); n];
    for (slot, &sample) in buffer.iter_mut().zip(samples) {
        slot.re = f64::from(sample);
    }
    buffer
}

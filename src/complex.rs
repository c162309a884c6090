pub use num_complex::Complex32;

/// The type of a single transmit sample handed to the radio
pub type Sample = Complex32;

/// Convert a gain in dB to the linear amplitude factor applied to every sample
pub fn db_to_linear(gain_db: f32) -> f32 {
    10f32.powf(gain_db / 20.0)
}

/// Flatten complex samples into `[re, im, re, im, ...]` (cf32 layout)
pub fn interleave(samples: &[Sample], out: &mut Vec<f32>) {
    out.clear();
    out.reserve(samples.len() * 2);
    for s in samples {
        out.push(s.re);
        out.push(s.im);
    }
}

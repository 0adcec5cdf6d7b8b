//! Biquad filters using Transposed Direct Form II
//!
//! TDF-II is numerically optimal for floating-point arithmetic,
//! minimizing quantization noise and ensuring stability.
//!
//! Coefficients come from [`butterworth_lowpass`], which designs a
//! low-pass cascade from a passband/stopband/attenuation specification;
//! that is what the baseband preprocessor needs for its anti-alias stage.

use std::f64::consts::PI;

use tf_core::{Sample, TfError, TfResult};

use crate::Processor;

/// Hard cap on designed Butterworth order; ratios close to 1 would
/// otherwise demand orders the cascade cannot realise cleanly.
const MAX_BUTTERWORTH_ORDER: usize = 16;

/// Biquad coefficients (a0 normalised to 1)
#[derive(Debug, Clone, Copy, Default)]
pub struct BiquadCoeffs {
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
    pub a1: f64,
    pub a2: f64,
}

/// Single biquad section, TDF-II state
#[derive(Debug, Clone, Copy, Default)]
pub struct Biquad {
    coeffs: BiquadCoeffs,
    z1: f64,
    z2: f64,
}

impl Biquad {
    pub fn new(coeffs: BiquadCoeffs) -> Self {
        Self {
            coeffs,
            z1: 0.0,
            z2: 0.0,
        }
    }

    #[inline]
    pub fn process(&mut self, input: Sample) -> Sample {
        let c = &self.coeffs;
        let output = c.b0 * input + self.z1;
        self.z1 = c.b1 * input - c.a1 * output + self.z2;
        self.z2 = c.b2 * input - c.a2 * output;
        output
    }
}

impl Processor for Biquad {
    fn reset(&mut self) {
        self.z1 = 0.0;
        self.z2 = 0.0;
    }
}

/// Cascade of biquad sections sharing one delay-line channel
#[derive(Debug, Clone, Default)]
pub struct BiquadCascade {
    sections: Vec<Biquad>,
}

impl BiquadCascade {
    pub fn new(coeffs: &[BiquadCoeffs]) -> Self {
        Self {
            sections: coeffs.iter().copied().map(Biquad::new).collect(),
        }
    }

    #[inline]
    pub fn process(&mut self, input: Sample) -> Sample {
        self.sections
            .iter_mut()
            .fold(input, |x, section| section.process(x))
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }
}

impl Processor for BiquadCascade {
    fn reset(&mut self) {
        for section in &mut self.sections {
            section.reset();
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// BUTTERWORTH DESIGN
// ═══════════════════════════════════════════════════════════════════════════

/// Design a Butterworth low-pass cascade meeting a passband/stopband spec
///
/// `passband_hz` carries at most `ripple_db` of droop; `stopband_hz` is
/// attenuated by at least `atten_db` (up to the order cap). Returns one
/// coefficient set per second-order section; odd orders get a degenerate
/// first-order section (b2 = a2 = 0).
pub fn butterworth_lowpass(
    passband_hz: f64,
    stopband_hz: f64,
    ripple_db: f64,
    atten_db: f64,
    sample_rate: f64,
) -> TfResult<Vec<BiquadCoeffs>> {
    let nyquist = sample_rate / 2.0;
    if !(0.0 < passband_hz && passband_hz < stopband_hz && stopband_hz < nyquist) {
        return Err(TfError::InvalidConfig(format!(
            "butterworth edges {passband_hz}/{stopband_hz} Hz invalid at fs {sample_rate}"
        )));
    }

    // Prewarp both edges for the bilinear transform.
    let k = 2.0 * sample_rate;
    let wp = k * (PI * passband_hz / sample_rate).tan();
    let ws = k * (PI * stopband_hz / sample_rate).tan();

    let ep2 = 10.0_f64.powf(ripple_db / 10.0) - 1.0;
    let es2 = 10.0_f64.powf(atten_db / 10.0) - 1.0;

    let exact = (es2 / ep2).log10() / (2.0 * (ws / wp).log10());
    let order = (exact.ceil() as usize).max(1);
    if order > MAX_BUTTERWORTH_ORDER {
        log::debug!(
            "butterworth order {order} clamped to {MAX_BUTTERWORTH_ORDER} \
             (edges {passband_hz:.1}/{stopband_hz:.1} Hz, {atten_db:.0} dB)"
        );
    }
    let order = order.min(MAX_BUTTERWORTH_ORDER);

    // Cutoff placed to meet the passband edge exactly.
    let wc = wp / ep2.powf(1.0 / (2.0 * order as f64));

    let mut sections = Vec::with_capacity(order.div_ceil(2));

    // Conjugate pole pairs of the analog prototype, bilinear-transformed.
    for pair in 0..order / 2 {
        let theta = PI * (2.0 * pair as f64 + order as f64 + 1.0) / (2.0 * order as f64);
        let damping = -2.0 * wc * theta.cos();

        let a0 = k * k + damping * k + wc * wc;
        sections.push(BiquadCoeffs {
            b0: wc * wc / a0,
            b1: 2.0 * wc * wc / a0,
            b2: wc * wc / a0,
            a1: (2.0 * wc * wc - 2.0 * k * k) / a0,
            a2: (k * k - damping * k + wc * wc) / a0,
        });
    }

    // Odd order: one real pole at -wc.
    if order % 2 == 1 {
        let a0 = k + wc;
        sections.push(BiquadCoeffs {
            b0: wc / a0,
            b1: wc / a0,
            b2: 0.0,
            a1: (wc - k) / a0,
            a2: 0.0,
        });
    }

    Ok(sections)
}

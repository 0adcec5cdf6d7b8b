//! Streaming baseband preprocessor
//!
//! Shifts a narrow band around a target frequency to baseband, suppresses
//! everything else, and decimates:
//!
//! 1. Heterodyne: `y[n] = x[n] * exp(-j(w*n + phi0))`, phase carried
//!    across blocks in a modular accumulator
//! 2. Butterworth anti-alias low-pass, real and imaginary channels with
//!    independent delay lines
//! 3. Keep-every-D decimation with a phase counter carried across blocks
//!
//! All three stages are stateful so arbitrary block boundaries are
//! seamless.

use std::f64::consts::TAU;

use num_complex::Complex;
use serde::{Deserialize, Serialize};

use tf_core::{TfError, TfResult};

use crate::Processor;
use crate::biquad::{BiquadCascade, butterworth_lowpass};

/// Passband ripple of the anti-alias design, dB
const PASSBAND_RIPPLE_DB: f64 = 0.5;

/// Oversampling guard: the decimated rate stays 2.5x above the two-sided
/// band edge
const BANDWIDTH_GUARD: f64 = 2.5;

/// Baseband preprocessor configuration
///
/// Derived fields are computed once at construction; the orchestrator
/// rebuilds the whole config whenever the target moves by more than 1 Hz.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PreprocessorConfig {
    /// Original capture rate fs0, Hz
    pub sample_rate: f64,
    /// Baseband centre frequency, Hz
    pub center_hz: f64,
    /// Half-width of the band of interest, cents
    pub cents_margin: f64,
    /// Stop-band attenuation of the anti-alias filter, dB
    pub stopband_db: f64,
    /// Derived: two-sided bandwidth of interest, Hz
    pub bandwidth_hz: f64,
    /// Derived: integer decimation factor D
    pub decimation: usize,
    /// Derived: output rate fs0 / D, Hz
    pub output_rate: f64,
}

impl PreprocessorConfig {
    /// Validate and derive a configuration
    pub fn new(
        sample_rate: f64,
        center_hz: f64,
        cents_margin: f64,
        stopband_db: f64,
    ) -> TfResult<Self> {
        if sample_rate <= 0.0 {
            return Err(TfError::InvalidSampleRate(sample_rate));
        }
        if !(0.0 < center_hz && center_hz < sample_rate / 2.0) {
            return Err(TfError::FrequencyOutOfRange(center_hz));
        }
        if cents_margin <= 1.0 {
            return Err(TfError::InvalidConfig(format!(
                "cents margin must exceed 1, got {cents_margin}"
            )));
        }

        let half = cents_margin / 1200.0;
        let bandwidth_hz = center_hz * (2.0_f64.powf(half) - 2.0_f64.powf(-half));
        let decimation =
            ((sample_rate / (2.0 * BANDWIDTH_GUARD * bandwidth_hz)).floor() as usize).max(1);
        let output_rate = sample_rate / decimation as f64;

        Ok(Self {
            sample_rate,
            center_hz,
            cents_margin,
            stopband_db,
            bandwidth_hz,
            decimation,
            output_rate,
        })
    }

    /// Whether `target_hz` is close enough to keep this configuration
    pub fn matches_target(&self, target_hz: f64) -> bool {
        (self.center_hz - target_hz).abs() <= 1.0
    }
}

/// Streaming heterodyne + low-pass + decimate
pub struct Preprocessor {
    config: PreprocessorConfig,
    /// Radians advanced per input sample
    omega: f64,
    /// Heterodyne phase accumulator, reduced mod 2*pi per block
    phase: f64,
    /// Input-sample counter modulo D, carried across blocks
    decim_phase: usize,
    lowpass_re: BiquadCascade,
    lowpass_im: BiquadCascade,
}

impl Preprocessor {
    /// Build a preprocessor; the anti-alias cascade is designed here
    pub fn new(config: PreprocessorConfig) -> TfResult<Self> {
        let passband = 0.8 * config.output_rate / 2.0;
        let stopband = config.output_rate / 2.0;
        let sections = butterworth_lowpass(
            passband,
            stopband,
            PASSBAND_RIPPLE_DB,
            config.stopband_db,
            config.sample_rate,
        )?;

        log::debug!(
            "preprocessor: centre {:.2} Hz, bw {:.2} Hz, D {}, fs_o {:.1} Hz, {} sections",
            config.center_hz,
            config.bandwidth_hz,
            config.decimation,
            config.output_rate,
            sections.len()
        );

        Ok(Self {
            config,
            omega: TAU * config.center_hz / config.sample_rate,
            phase: 0.0,
            decim_phase: 0,
            lowpass_re: BiquadCascade::new(&sections),
            lowpass_im: BiquadCascade::new(&sections),
        })
    }

    /// Configuration this preprocessor was built from
    pub fn config(&self) -> &PreprocessorConfig {
        &self.config
    }

    /// Push a block of raw samples; decimated baseband samples are
    /// appended to `output`
    pub fn process(&mut self, input: &[f32], output: &mut Vec<Complex<f64>>) {
        let d = self.config.decimation;

        for &x in input {
            let (sin, cos) = self.phase.sin_cos();
            // x * exp(-j*phase)
            let re = self.lowpass_re.process(x as f64 * cos);
            let im = self.lowpass_im.process(-(x as f64) * sin);

            if self.decim_phase == 0 {
                output.push(Complex::new(re, im));
            }
            self.decim_phase = (self.decim_phase + 1) % d;
            self.phase += self.omega;
        }

        // Keep the accumulator bounded so long runs never lose precision.
        self.phase %= TAU;
    }
}

impl Processor for Preprocessor {
    fn reset(&mut self) {
        self.phase = 0.0;
        self.decim_phase = 0;
        self.lowpass_re.reset();
        self.lowpass_im.reset();
    }
}

//! Spectrum-to-display bin mapping
//!
//! Precomputes, per display bin, the fractional source-bin position for a
//! linear or logarithmic axis over a viewport, then maps spectra by linear
//! interpolation with optional EWMA smoothing against the mapper's own
//! previous output.

use serde::{Deserialize, Serialize};

/// Display-side mapping configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BinMapConfig {
    /// Number of display bins
    pub display_bins: usize,
    /// Viewport lower edge, Hz
    pub min_hz: f64,
    /// Viewport upper edge, Hz
    pub max_hz: f64,
    /// Logarithmic axis when true, linear otherwise
    pub log_scale: bool,
    /// EWMA weight on the previous output; 0 disables smoothing
    pub smoothing: f64,
}

/// Source-axis description: uniform bins starting at `start_hz`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceAxis {
    pub bins: usize,
    pub start_hz: f64,
    pub step_hz: f64,
}

/// Precomputed display mapping
pub struct BinMap {
    config: BinMapConfig,
    source: SourceAxis,
    /// Per display bin: (low source bin, high source bin, interpolation frac)
    entries: Vec<(usize, usize, f64)>,
    /// Display bin centre frequencies
    frequencies_hz: Vec<f64>,
    /// Previous output for EWMA smoothing
    previous: Vec<f64>,
    output: Vec<f64>,
    primed: bool,
}

impl BinMap {
    /// Build the mapping table
    pub fn new(source: SourceAxis, config: BinMapConfig) -> Self {
        let bins = config.display_bins.max(2);
        let mut entries = Vec::with_capacity(bins);
        let mut frequencies_hz = Vec::with_capacity(bins);

        let last = (bins - 1) as f64;
        for d in 0..bins {
            let t = d as f64 / last;
            let freq = if config.log_scale {
                config.min_hz * (config.max_hz / config.min_hz).powf(t)
            } else {
                config.min_hz + t * (config.max_hz - config.min_hz)
            };

            let pos = ((freq - source.start_hz) / source.step_hz)
                .clamp(0.0, (source.bins - 1) as f64);
            let low = pos.floor() as usize;
            let high = (low + 1).min(source.bins - 1);
            entries.push((low, high, pos - low as f64));
            frequencies_hz.push(freq);
        }

        Self {
            config,
            source,
            entries,
            frequencies_hz,
            previous: vec![0.0; bins],
            output: vec![0.0; bins],
            primed: false,
        }
    }

    /// Whether this table still fits the given axis and configuration
    pub fn matches(&self, source: SourceAxis, config: BinMapConfig) -> bool {
        self.source == source && self.config == config
    }

    /// Display bin centre frequencies
    pub fn frequencies_hz(&self) -> &[f64] {
        &self.frequencies_hz
    }

    /// Map a source spectrum to display bins
    ///
    /// `input` must have the source axis length. The returned slice is
    /// owned by the mapper and valid until the next call.
    pub fn map(&mut self, input: &[f64]) -> &[f64] {
        debug_assert_eq!(input.len(), self.source.bins);

        let alpha = self.config.smoothing.clamp(0.0, 0.999);
        let smooth = self.primed && alpha > 0.0;

        for (d, &(low, high, frac)) in self.entries.iter().enumerate() {
            let raw = input[low] * (1.0 - frac) + input[high] * frac;
            self.output[d] = if smooth {
                alpha * self.previous[d] + (1.0 - alpha) * raw
            } else {
                raw
            };
        }

        self.previous.copy_from_slice(&self.output);
        self.primed = true;
        &self.output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn half_axis(fft_size: usize, sample_rate: f64) -> SourceAxis {
        SourceAxis {
            bins: fft_size / 2 + 1,
            start_hz: 0.0,
            step_hz: sample_rate / fft_size as f64,
        }
    }

    #[test]
    fn test_linear_full_range_is_identity() {
        let fs = 48_000.0;
        let source = half_axis(4096, fs);
        let mut map = BinMap::new(
            source,
            BinMapConfig {
                display_bins: source.bins,
                min_hz: 0.0,
                max_hz: fs / 2.0,
                log_scale: false,
                smoothing: 0.0,
            },
        );

        let input: Vec<f64> = (0..source.bins).map(|i| (i as f64).sin()).collect();
        let output = map.map(&input);
        for (a, b) in input.iter().zip(output) {
            assert!((a - b).abs() < 1e-9);
        }
    }

    #[test]
    fn test_uniform_input_maps_to_uniform_output() {
        let source = half_axis(4096, 48_000.0);
        for log_scale in [false, true] {
            let mut map = BinMap::new(
                source,
                BinMapConfig {
                    display_bins: 300,
                    min_hz: 20.0,
                    max_hz: 20_000.0,
                    log_scale,
                    smoothing: 0.0,
                },
            );
            let input = vec![-30.0; source.bins];
            for &v in map.map(&input) {
                assert!((v + 30.0).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn test_log_axis_frequencies() {
        let source = half_axis(4096, 48_000.0);
        let map = BinMap::new(
            source,
            BinMapConfig {
                display_bins: 101,
                min_hz: 20.0,
                max_hz: 20_000.0,
                log_scale: true,
                smoothing: 0.0,
            },
        );

        let freqs = map.frequencies_hz();
        assert!((freqs[0] - 20.0).abs() < 1e-9);
        assert!((freqs[100] - 20_000.0).abs() < 1e-6);
        // Constant ratio between adjacent display bins.
        let ratio = freqs[1] / freqs[0];
        for pair in freqs.windows(2) {
            assert!((pair[1] / pair[0] - ratio).abs() < 1e-9);
        }
    }

    #[test]
    fn test_smoothing_converges_to_input() {
        let source = half_axis(4096, 48_000.0);
        let mut map = BinMap::new(
            source,
            BinMapConfig {
                display_bins: 64,
                min_hz: 100.0,
                max_hz: 10_000.0,
                log_scale: true,
                smoothing: 0.5,
            },
        );

        let quiet = vec![-80.0; source.bins];
        let loud = vec![-10.0; source.bins];

        // First call is unsmoothed (nothing to smooth against).
        assert!((map.map(&quiet)[0] + 80.0).abs() < 1e-9);

        // Step input: output approaches -10 geometrically.
        let first = map.map(&loud)[0];
        assert!((first + 45.0).abs() < 1e-9);
        for _ in 0..40 {
            map.map(&loud);
        }
        assert!((map.map(&loud)[0] + 10.0).abs() < 1e-3);
    }

    #[test]
    fn test_matches_detects_changes() {
        let source = half_axis(4096, 48_000.0);
        let config = BinMapConfig {
            display_bins: 64,
            min_hz: 100.0,
            max_hz: 10_000.0,
            log_scale: true,
            smoothing: 0.0,
        };
        let map = BinMap::new(source, config);

        assert!(map.matches(source, config));
        assert!(!map.matches(source, BinMapConfig { min_hz: 200.0, ..config }));
        assert!(!map.matches(half_axis(2048, 48_000.0), config));
    }
}

//! Study orchestrator
//!
//! Owns the full analysis path on one thread: pull raw samples, keep the
//! baseband chain aligned with the target, run the FFTs, map the display
//! spectrum, drive the selected estimator, publish the frame, feed the
//! jobs. The tick never raises; a stage that cannot run this tick is
//! skipped and the loop continues.

use std::sync::Arc;
use std::time::Instant;

use num_complex::Complex;

use tf_audio::{Bookmark, FrameMailbox, ReadRequest, SampleRing};
use tf_core::{EstimatorKind, ParamStore, TfResult, TuningParams, ZoomState, db_to_linear};
use tf_dsp::binmap::{BinMap, BinMapConfig, SourceAxis};
use tf_dsp::fft::{FftEngine, Spectrum};
use tf_dsp::noise_floor::{QuantileFloor, QuantileFloorConfig, robust_floor_db};
use tf_dsp::preprocessor::{Preprocessor, PreprocessorConfig};
use tf_estimate::anf::{AnfConfig, NotchCascade};
use tf_estimate::ekf::{EkfConfig, ToneEkf};
use tf_estimate::hps::{HpsConfig, HpsEstimator};
use tf_estimate::music::{MusicConfig, MusicEstimator};
use tf_estimate::pll::{PllBank, PllBankConfig};
use tf_estimate::{ImmConfig, ToneImmFilter, TrackedPeak};

use crate::frame::StudyFrame;
use crate::job::JobRegistry;

/// Fewest baseband samples worth analysing
const MIN_BASEBAND_SAMPLES: usize = 256;

/// Raw-window length fed to the notch cascade per tick, seconds
const CASCADE_WINDOW_SECS: f64 = 0.1;

/// Baseband window fed to MUSIC and the PLL bank, seconds
const SUBSPACE_WINDOW_SECS: f64 = 1.0;

/// Orchestrator rates and estimator sizing
#[derive(Debug, Clone, Copy)]
pub struct StudyConfig {
    /// Control/update rate, Hz
    pub update_rate_hz: f64,
    /// Analysis rate, Hz
    pub analysis_rate_hz: f64,
    /// Stop-band attenuation handed to the preprocessor, dB
    pub stopband_db: f64,
    /// Tones tracked by the EKF family
    pub ekf_tones: usize,
}

impl Default for StudyConfig {
    fn default() -> Self {
        Self {
            update_rate_hz: 60.0,
            analysis_rate_hz: 30.0,
            stopband_db: 40.0,
            ekf_tones: 1,
        }
    }
}

/// The baseband half of the signal path; rebuilt when the target moves
struct BasebandChain {
    preprocessor: Preprocessor,
    ring: SampleRing<Complex<f64>>,
}

/// The estimator currently feeding tracked peaks
enum ActiveEstimator {
    Ekf(ToneEkf),
    Imm(ToneImmFilter),
    Cascade(NotchCascade),
    Music(MusicEstimator),
    Pll(PllBank),
}

impl ActiveEstimator {
    fn kind(&self) -> EstimatorKind {
        match self {
            Self::Ekf(_) => EstimatorKind::Ekf,
            Self::Imm(_) => EstimatorKind::Imm,
            Self::Cascade(_) => EstimatorKind::NotchCascade,
            Self::Music(_) => EstimatorKind::Music,
            Self::Pll(_) => EstimatorKind::PllBank,
        }
    }
}

/// The per-session analysis driver
pub struct Study {
    config: StudyConfig,
    params: Arc<ParamStore>,
    raw_ring: Arc<SampleRing<f32>>,
    mailbox: Arc<FrameMailbox<StudyFrame>>,
    registry: JobRegistry,
    fft: FftEngine,
    hps: HpsEstimator,
    hps_snr_db: f64,
    quantile_floor: QuantileFloor,
    floor_knobs: (f64, f64),
    display_map: Option<BinMap>,
    baseband: Option<BasebandChain>,
    raw_bookmark: Bookmark,
    estimator: Option<ActiveEstimator>,
    /// Baseband samples produced this tick, reused across ticks
    fresh_baseband: Vec<Complex<f64>>,
    frame_number: u64,
    last_analysis: Option<Instant>,
}

impl Study {
    /// Build the orchestrator; fails on unusable initial parameters
    pub fn new(
        params: Arc<ParamStore>,
        config: StudyConfig,
        registry: JobRegistry,
    ) -> TfResult<Self> {
        let snapshot = params.snapshot();
        if snapshot.audio_sample_rate <= 0.0 {
            return Err(tf_core::TfError::InvalidSampleRate(snapshot.audio_sample_rate));
        }
        let fft = FftEngine::new(snapshot.fft_size, true)?;
        let raw_ring = Arc::new(SampleRing::new(snapshot.circular_buffer_size));

        Ok(Self {
            config,
            params,
            raw_ring,
            mailbox: Arc::new(FrameMailbox::new()),
            registry,
            fft,
            hps: HpsEstimator::new(HpsConfig {
                snr_needed_db: snapshot.snr_threshold_db,
                ..Default::default()
            }),
            hps_snr_db: snapshot.snr_threshold_db,
            quantile_floor: QuantileFloor::new(QuantileFloorConfig {
                quantile: snapshot.noise_floor_quantile,
                semitones: snapshot.noise_floor_semitones,
                ..Default::default()
            }),
            floor_knobs: (snapshot.noise_floor_quantile, snapshot.noise_floor_semitones),
            display_map: None,
            baseband: None,
            raw_bookmark: Bookmark::START,
            estimator: None,
            fresh_baseband: Vec::new(),
            frame_number: 0,
            last_analysis: None,
        })
    }

    /// The ring the capture sink writes into
    pub fn raw_ring(&self) -> &Arc<SampleRing<f32>> {
        &self.raw_ring
    }

    /// The latest-wins frame mailbox
    pub fn mailbox(&self) -> &Arc<FrameMailbox<StudyFrame>> {
        &self.mailbox
    }

    /// Job registry (analysis thread only)
    pub fn registry_mut(&mut self) -> &mut JobRegistry {
        &mut self.registry
    }

    /// Update-rate period the worker sleeps toward
    pub fn update_period(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(1.0 / self.config.update_rate_hz)
    }

    /// One control-rate tick; produces a frame on analysis ticks
    pub fn tick(&mut self, now: Instant) -> Option<StudyFrame> {
        let params = self.params.snapshot();

        // Engine-size changes rebuild the FFT outside the analysis path.
        if self.fft.size() != params.fft_size {
            match FftEngine::new(params.fft_size, true) {
                Ok(engine) => {
                    self.fft = engine;
                    self.display_map = None;
                }
                Err(error) => log::warn!("fft rebuild skipped: {error}"),
            }
        }

        let due = self
            .last_analysis
            .is_none_or(|t| now.duration_since(t).as_secs_f64() >= 1.0 / self.config.analysis_rate_hz);
        if !due {
            return None;
        }
        self.last_analysis = Some(now);

        let target = params.target_frequency();
        self.ensure_preprocessor(&params, target);

        // Advance the raw bookmark and stream new samples to baseband.
        let raw_view = self.raw_ring.read(ReadRequest::Since(self.raw_bookmark));
        self.raw_bookmark = raw_view.bookmark;
        self.fresh_baseband.clear();
        if let Some(chain) = &mut self.baseband {
            chain
                .preprocessor
                .process(&raw_view.samples, &mut self.fresh_baseband);
            chain.ring.write(&self.fresh_baseband);
        }

        // Full spectrum over the latest engine-sized raw window.
        let latest = self.raw_ring.read(ReadRequest::Latest(self.fft.size()));
        if latest.samples.is_empty() {
            return None;
        }
        let full = self
            .fft
            .real_spectrum(&latest.samples, params.audio_sample_rate);

        // Noise-floor knobs live in the store; rebuild on change.
        if self.hps_snr_db != params.snr_threshold_db {
            self.hps = HpsEstimator::new(HpsConfig {
                snr_needed_db: params.snr_threshold_db,
                ..Default::default()
            });
            self.hps_snr_db = params.snr_threshold_db;
        }
        if self.floor_knobs != (params.noise_floor_quantile, params.noise_floor_semitones) {
            self.quantile_floor = QuantileFloor::new(QuantileFloorConfig {
                quantile: params.noise_floor_quantile,
                semitones: params.noise_floor_semitones,
                ..Default::default()
            });
            self.floor_knobs = (params.noise_floor_quantile, params.noise_floor_semitones);
        }

        let noise_floor_db = robust_floor_db(&full.magnitudes_db);
        let noise_floor_shape_db = self
            .quantile_floor
            .estimate(&full.magnitudes_db, &full.frequencies_hz)
            .to_vec();
        let hps = self.hps.estimate(&full);

        // Baseband spectrum over at least a second of history.
        let mut baseband_spectrum = None;
        if let Some(chain) = &self.baseband {
            if chain.ring.has(MIN_BASEBAND_SAMPLES) {
                let cfg = *chain.preprocessor.config();
                let want = ((cfg.output_rate * SUBSPACE_WINDOW_SECS).ceil() as usize)
                    .clamp(MIN_BASEBAND_SAMPLES, self.fft.size());
                let view = chain.ring.read(ReadRequest::Latest(want));
                baseband_spectrum = Some(self.fft.baseband_spectrum(
                    &view.samples,
                    cfg.center_hz,
                    cfg.output_rate,
                ));
            }
        }

        // Seed baseband trackers from the spectrum's own in-window peak;
        // it resolves to a fraction of a baseband bin.
        let seed_hz = baseband_spectrum
            .as_ref()
            .and_then(|s| find_primary_peak(s, target, params.target_bandwidth_cents));
        let tracked_peaks = self.run_estimator(&params, seed_hz, now);

        // Display spectrum choice and mapping.
        let use_baseband = params.zoom_state == ZoomState::TargetFundamental
            && baseband_spectrum.is_some();
        let source = if use_baseband {
            baseband_spectrum.as_ref().expect("baseband display")
        } else {
            &full
        };
        let (display_db, display_hz) = self.map_display(source, &params);

        let peak_source = baseband_spectrum.as_ref().unwrap_or(&full);
        let primary_peak_hz =
            find_primary_peak(peak_source, target, params.target_bandwidth_cents);
        let cents_error = primary_peak_hz.map(|peak| tf_core::cents_between(target, peak));

        self.frame_number += 1;
        let frame = StudyFrame {
            frame_number: self.frame_number,
            display_db,
            display_hz,
            baseband: baseband_spectrum,
            tracked_peaks,
            primary_peak_hz,
            cents_error,
            hps,
            noise_floor_db,
            noise_floor_shape_db,
            center_hz: self
                .baseband
                .as_ref()
                .map_or(0.0, |chain| chain.preprocessor.config().center_hz),
            baseband_rate: self
                .baseband
                .as_ref()
                .map(|chain| chain.preprocessor.config().output_rate),
            sample_rate: params.audio_sample_rate,
        };

        self.mailbox.publish(frame.clone());
        self.registry
            .dispatch(&frame, &params, now, self.baseband.is_some());
        Some(frame)
    }

    /// Rebuild the baseband chain when the target leaves the 1 Hz window
    fn ensure_preprocessor(&mut self, params: &TuningParams, target: f64) {
        let up_to_date = self
            .baseband
            .as_ref()
            .is_some_and(|chain| chain.preprocessor.config().matches_target(target));
        if up_to_date {
            return;
        }

        let margin = params.target_bandwidth_cents.max(2.0);
        let built = PreprocessorConfig::new(
            params.audio_sample_rate,
            target,
            margin,
            self.config.stopband_db,
        )
        .and_then(Preprocessor::new);

        match built {
            Ok(preprocessor) => {
                let capacity = (preprocessor.config().output_rate * 4.0).ceil() as usize;
                self.baseband = Some(BasebandChain {
                    preprocessor,
                    ring: SampleRing::new(capacity.max(MIN_BASEBAND_SAMPLES * 2)),
                });
            }
            Err(error) => {
                // Skip baseband analysis this tick rather than fail.
                log::warn!("preprocessor rebuild failed: {error}");
                self.baseband = None;
            }
        }
        // Baseband-fed estimator state is invalid against a new centre.
        self.estimator = None;
    }

    /// Run (and lazily build) the selected estimator
    fn run_estimator(
        &mut self,
        params: &TuningParams,
        seed_hz: Option<f64>,
        now: Instant,
    ) -> Vec<TrackedPeak> {
        let selected = params.estimator;
        if self
            .estimator
            .as_ref()
            .is_none_or(|active| active.kind() != selected)
        {
            self.estimator = self.build_estimator(params, seed_hz);
        }

        let Some(active) = &mut self.estimator else {
            return Vec::new();
        };

        let center = self
            .baseband
            .as_ref()
            .map_or(0.0, |chain| chain.preprocessor.config().center_hz);

        match active {
            ActiveEstimator::Ekf(ekf) => {
                for &sample in &self.fresh_baseband {
                    ekf.update(sample);
                }
                ekf.tones()
                    .into_iter()
                    .map(|tone| TrackedPeak {
                        frequency_hz: center + tone.frequency_hz,
                        amplitude: tone.amplitude,
                    })
                    .collect()
            }
            ActiveEstimator::Imm(imm) => {
                for &sample in &self.fresh_baseband {
                    imm.update(sample);
                }
                imm.tones()
                    .into_iter()
                    .map(|tone| TrackedPeak {
                        frequency_hz: center + tone.frequency_hz,
                        amplitude: tone.amplitude,
                    })
                    .collect()
            }
            ActiveEstimator::Cascade(cascade) => {
                let window = (params.audio_sample_rate * CASCADE_WINDOW_SECS) as usize;
                let view = self.raw_ring.read(ReadRequest::Latest(window));
                if view.samples.is_empty() {
                    Vec::new()
                } else {
                    cascade.process(&view.samples)
                }
            }
            ActiveEstimator::Music(music) => {
                let window = (params.audio_sample_rate * SUBSPACE_WINDOW_SECS) as usize;
                let view = self.raw_ring.read(ReadRequest::Latest(window));
                let complex: Vec<Complex<f64>> = view
                    .samples
                    .iter()
                    .map(|&x| Complex::new(x as f64, 0.0))
                    .collect();
                if !music.refresh(&complex) {
                    return Vec::new();
                }
                let (lo, hi) = params.viewport();
                music.estimate(lo, hi, params.audio_sample_rate)
            }
            ActiveEstimator::Pll(bank) => {
                let Some(chain) = &self.baseband else {
                    return Vec::new();
                };
                let cfg = chain.preprocessor.config();
                let window = (cfg.output_rate * SUBSPACE_WINDOW_SECS) as usize;
                let view = chain.ring.read(ReadRequest::Latest(window));
                bank.track(&view.samples, cfg.center_hz, params.target_frequency(), now)
            }
        }
    }

    fn build_estimator(
        &self,
        params: &TuningParams,
        seed_hz: Option<f64>,
    ) -> Option<ActiveEstimator> {
        let chain = self.baseband.as_ref();
        let target = params.target_frequency();

        // Seed baseband trackers at the observed in-window offset when
        // the spectrum already shows one; 0 Hz otherwise.
        let seed_offset = |cfg: &PreprocessorConfig| -> f64 {
            seed_hz
                .map(|hz| hz - cfg.center_hz)
                .filter(|offset| offset.abs() < cfg.output_rate / 2.0 * 0.8)
                .unwrap_or(0.0)
        };

        match params.estimator {
            EstimatorKind::Ekf => {
                let cfg = chain?.preprocessor.config();
                let seeds = vec![seed_offset(cfg); self.config.ekf_tones.max(1)];
                Some(ActiveEstimator::Ekf(ToneEkf::with_initial_frequencies(
                    EkfConfig::slow(cfg.output_rate, self.config.ekf_tones.max(1)),
                    &seeds,
                )))
            }
            EstimatorKind::Imm => {
                let cfg = chain?.preprocessor.config();
                let tones = self.config.ekf_tones.max(1);
                let seeds = vec![seed_offset(cfg); tones];
                Some(ActiveEstimator::Imm(ToneImmFilter::with_initial_frequencies(
                    EkfConfig::fast(cfg.output_rate, tones),
                    EkfConfig::slow(cfg.output_rate, tones),
                    ImmConfig::default(),
                    &seeds,
                )))
            }
            EstimatorKind::NotchCascade => {
                let anf = AnfConfig {
                    sample_rate: params.audio_sample_rate,
                    ..Default::default()
                };
                Some(ActiveEstimator::Cascade(NotchCascade::new(
                    anf,
                    target,
                    4,
                    2.0 * params.target_bandwidth_cents,
                )))
            }
            EstimatorKind::Music => Some(ActiveEstimator::Music(MusicEstimator::new(
                MusicConfig {
                    snapshot_rows: 32,
                    sources: 4,
                    ..Default::default()
                },
            ))),
            EstimatorKind::PllBank => {
                let cfg = chain?.preprocessor.config();
                Some(ActiveEstimator::Pll(PllBank::new(PllBankConfig::new(
                    cfg.output_rate,
                ))))
            }
        }
    }

    /// Map the chosen spectrum onto display bins, rebuilding the table
    /// when the viewport or axis changed
    fn map_display(&mut self, source: &Spectrum, params: &TuningParams) -> (Vec<f64>, Vec<f64>) {
        let (min_hz, max_hz) = params.viewport();
        let axis = SourceAxis {
            bins: source.len(),
            start_hz: source.frequencies_hz[0],
            step_hz: if source.len() > 1 {
                source.frequencies_hz[1] - source.frequencies_hz[0]
            } else {
                1.0
            },
        };
        let config = BinMapConfig {
            display_bins: params.display_bin_count,
            min_hz,
            max_hz,
            log_scale: params.use_log_scale(),
            smoothing: params.animation_smoothing,
        };

        let rebuild = self
            .display_map
            .as_ref()
            .is_none_or(|map| !map.matches(axis, config));
        if rebuild {
            self.display_map = Some(BinMap::new(axis, config));
        }

        let map = self.display_map.as_mut().expect("display map");
        (map.map(&source.magnitudes_db).to_vec(), map.frequencies_hz().to_vec())
    }
}

/// Strongest in-window bin refined by three-point centroid interpolation
fn find_primary_peak(spectrum: &Spectrum, target_hz: f64, bandwidth_cents: f64) -> Option<f64> {
    let ratio = 2.0_f64.powf(bandwidth_cents / 1200.0);
    let lo_hz = target_hz / ratio;
    let hi_hz = target_hz * ratio;

    let freqs = &spectrum.frequencies_hz;
    let lo = freqs.partition_point(|&f| f < lo_hz);
    let hi = freqs.partition_point(|&f| f <= hi_hz);
    if hi.saturating_sub(lo) < 3 {
        return None;
    }

    let mags = &spectrum.magnitudes_db;
    let peak = (lo..hi).max_by(|&a, &b| mags[a].total_cmp(&mags[b]))?;
    if peak == 0 || peak + 1 >= mags.len() {
        return Some(freqs[peak]);
    }

    // Centroid over the linear magnitudes of the three adjacent bins.
    let alpha = db_to_linear(mags[peak - 1]);
    let beta = db_to_linear(mags[peak]);
    let gamma = db_to_linear(mags[peak + 1]);
    let total = alpha + beta + gamma;
    if total <= 0.0 {
        return Some(freqs[peak]);
    }
    let delta = (gamma - alpha) / total;
    let step = freqs[1] - freqs[0];
    Some(freqs[peak] + delta * step)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::TAU;
    use std::time::Duration;

    use tf_core::{TuningParams, linear_to_db};

    fn study_with_params(params: TuningParams) -> (Study, crossbeam_channel::Receiver<Box<dyn crate::job::StudyJob>>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let store = Arc::new(ParamStore::new(params));
        let study = Study::new(store, StudyConfig::default(), JobRegistry::new(tx)).unwrap();
        (study, rx)
    }

    fn feed_sine(study: &Study, freq: f64, seconds: f64, sample_rate: f64) {
        let len = (seconds * sample_rate) as usize;
        let samples: Vec<f32> = (0..len)
            .map(|n| (TAU * freq * n as f64 / sample_rate).sin() as f32)
            .collect();
        study.raw_ring().write(&samples);
    }

    /// Drive enough analysis ticks, 34 ms apart, collecting frames.
    fn run_ticks(study: &mut Study, count: usize) -> Vec<StudyFrame> {
        let mut now = Instant::now();
        let mut frames = Vec::new();
        for _ in 0..count {
            now += Duration::from_millis(34);
            if let Some(frame) = study.tick(now) {
                frames.push(frame);
            }
        }
        frames
    }

    #[test]
    fn test_rejects_invalid_fft_size() {
        let (tx, _rx) = crossbeam_channel::unbounded();
        let params = TuningParams {
            fft_size: 1000,
            ..Default::default()
        };
        let store = Arc::new(ParamStore::new(params));
        assert!(Study::new(store, StudyConfig::default(), JobRegistry::new(tx)).is_err());
    }

    #[test]
    fn test_empty_capture_produces_no_frames() {
        let (mut study, _rx) = study_with_params(TuningParams::default());
        assert!(run_ticks(&mut study, 5).is_empty());
    }

    #[test]
    fn test_frame_numbers_strictly_increase() {
        let (mut study, _rx) = study_with_params(TuningParams::default());
        feed_sine(&study, 440.0, 2.0, 48_000.0);

        let frames = run_ticks(&mut study, 20);
        assert!(frames.len() >= 10);
        for pair in frames.windows(2) {
            assert!(pair[1].frame_number > pair[0].frame_number);
            assert!(pair[1].sample_rate > 0.0);
        }
    }

    #[test]
    fn test_analysis_rate_gates_ticks() {
        let (mut study, _rx) = study_with_params(TuningParams::default());
        feed_sine(&study, 440.0, 1.0, 48_000.0);

        // Ticks 5 ms apart: the 30 Hz analysis rate skips most of them.
        let mut now = Instant::now();
        let mut produced = 0;
        for _ in 0..100 {
            now += Duration::from_millis(5);
            if study.tick(now).is_some() {
                produced += 1;
            }
        }
        // 500 ms of 5 ms ticks at a 33 ms analysis period.
        assert!(produced <= 16, "produced {produced}");
        assert!(produced >= 10, "produced {produced}");
    }

    #[test]
    fn test_tone_appears_in_frame() {
        let (mut study, _rx) = study_with_params(TuningParams::default());
        feed_sine(&study, 440.0, 2.0, 48_000.0);

        let frames = run_ticks(&mut study, 30);
        let last = frames.last().unwrap();

        // HPS sees the fundamental.
        let hps = last.hps.expect("hps estimate");
        assert!((hps.frequency_hz - 440.0).abs() < 3.0, "hps {}", hps.frequency_hz);
        assert!(hps.snr_db > 30.0);

        // Primary peak centroid lands near the tone, so the headline
        // cents error is small.
        let primary = last.primary_peak_hz.expect("primary peak");
        assert!((primary - 440.0).abs() < 2.0, "primary {primary}");
        let cents = last.cents_error.expect("cents error");
        assert!(cents.abs() < 8.0, "cents {cents}");

        // Baseband chain is running and centred on the target.
        assert!((last.center_hz - 440.0).abs() < 1e-9);
        assert!(last.baseband.is_some());
        assert!(last.baseband_rate.unwrap() > 0.0);

        // The default EKF tracks the tone in absolute Hz.
        let peak = last.tracked_peaks.first().expect("tracked peak");
        assert!((peak.frequency_hz - 440.0).abs() < 0.5, "tracked {}", peak.frequency_hz);
    }

    #[test]
    fn test_display_uses_baseband_when_zoomed() {
        let params = TuningParams {
            zoom_state: ZoomState::TargetFundamental,
            animation_smoothing: 0.0,
            ..Default::default()
        };
        let (mut study, _rx) = study_with_params(params);
        feed_sine(&study, 440.0, 2.0, 48_000.0);

        let frames = run_ticks(&mut study, 30);
        let last = frames.last().unwrap();

        // Linear axis covering about one semitone either side of 440.
        let first = *last.display_hz.first().unwrap();
        let final_hz = *last.display_hz.last().unwrap();
        assert!(first > 400.0 && final_hz < 480.0, "axis {first}..{final_hz}");

        // The display peak sits at the tone.
        let peak_bin = last
            .display_db
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        assert!((last.display_hz[peak_bin] - 440.0).abs() < 2.0);
    }

    #[test]
    fn test_target_change_rebuilds_preprocessor() {
        let (mut study, _rx) = study_with_params(TuningParams::default());
        feed_sine(&study, 440.0, 1.0, 48_000.0);
        let frames = run_ticks(&mut study, 5);
        assert!((frames.last().unwrap().center_hz - 440.0).abs() < 1e-9);

        // Retarget to G4 (392 Hz): well beyond the 1 Hz window.
        study.params.update(|p| p.target_note = 67);
        feed_sine(&study, 392.0, 1.0, 48_000.0);
        let frames = run_ticks(&mut study, 5);
        let center = frames.last().unwrap().center_hz;
        assert!((center - 392.0).abs() < 1.0, "center {center}");
    }

    #[test]
    fn test_primary_peak_centroid_refines_between_bins() {
        // Synthetic spectrum with an asymmetric three-bin peak.
        let n = 2049;
        let step = 48_000.0 / 4096.0;
        let mut mags = vec![-90.0; n];
        let bin = 37; // 433.6 Hz
        mags[bin - 1] = linear_to_db(0.2);
        mags[bin] = linear_to_db(1.0);
        mags[bin + 1] = linear_to_db(0.6);
        let spectrum = Spectrum {
            magnitudes_db: mags,
            frequencies_hz: (0..n).map(|i| i as f64 * step).collect(),
            is_baseband: false,
            sample_rate: 48_000.0,
        };

        let peak = find_primary_peak(&spectrum, 440.0, 100.0).unwrap();
        let centroid = (0.6 - 0.2) / (0.2 + 1.0 + 0.6);
        let expected = bin as f64 * step + centroid * step;
        assert!((peak - expected).abs() < 1e-6, "peak {peak}, expected {expected}");
    }

    #[test]
    fn test_estimator_switch_takes_effect() {
        let (mut study, _rx) = study_with_params(TuningParams::default());
        feed_sine(&study, 440.0, 2.0, 48_000.0);
        run_ticks(&mut study, 10);

        study.params.update(|p| p.estimator = EstimatorKind::NotchCascade);
        feed_sine(&study, 440.0, 1.0, 48_000.0);
        let frames = run_ticks(&mut study, 20);

        let last = frames.last().unwrap();
        let peak = last.tracked_peaks.first().expect("cascade peak");
        assert!((peak.frequency_hz - 440.0).abs() < 10.0, "cascade {}", peak.frequency_hz);
    }
}

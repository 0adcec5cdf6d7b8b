//! Feed a slightly sharp A4 into the engine and watch it report.
//!
//! Runs entirely on synthesized audio: a 441.5 Hz sine pushed through the
//! capture sink in real-time-sized blocks while the analysis thread
//! publishes frames and an auto-tune job resolves the note.

use std::f64::consts::TAU;
use std::sync::Arc;
use std::time::Duration;

use tf_audio::PcmFrameSource;
use tf_core::{ParamStore, TuningParams};
use tf_engine::orchestrator::{Study, StudyConfig};

fn main() {
    env_logger::init();

    let params = Arc::new(ParamStore::new(TuningParams::default()));
    let handle = Study::start(Arc::clone(&params), StudyConfig::default()).expect("engine start");
    let sink = handle.capture_sink();

    let job = handle.auto_tune();

    // Capture-thread stand-in: 512-sample blocks at 48 kHz.
    let feeder = std::thread::spawn(move || {
        let sample_rate = 48_000.0;
        let mut n = 0u64;
        for block_index in 0..280 {
            let block: Vec<f32> = (0..512)
                .map(|i| {
                    let t = (n + i) as f64 / sample_rate;
                    (TAU * 441.5 * t).sin() as f32 * 0.5
                })
                .collect();
            sink.on_frame(&block, block_index + 1);
            n += 512;
            std::thread::sleep(Duration::from_micros(10_667));
        }
    });

    // UI stand-in: poll the mailbox at its own rate.
    for _ in 0..20 {
        std::thread::sleep(Duration::from_millis(100));
        if let Some(frame) = handle.mailbox().take() {
            let cents = frame
                .cents_error
                .map_or("--".into(), |c| format!("{c:+.1}"));
            let tracked = frame
                .tracked_peaks
                .first()
                .map_or("--".into(), |p| format!("{:.2} Hz", p.frequency_hz));
            println!(
                "frame {:>3}  peak {}  error {} cents  floor {:.0} dB",
                frame.frame_number, tracked, cents, frame.noise_floor_db
            );
        }
    }

    match job.wait_timeout(Duration::from_secs(11)) {
        Some(Some(result)) => println!(
            "auto-tune: {} ({:+.1} cents at {:.2} Hz)",
            result.note.name(),
            result.cents_error,
            result.frequency_hz
        ),
        Some(None) => println!("auto-tune: no stable tone"),
        None => println!("auto-tune: cancelled"),
    }

    feeder.join().expect("feeder thread");
    handle.stop();
}

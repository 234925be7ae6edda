//! pest_watch - camera pest detector with GPIO alert output
//!
//! This binary:
//! 1. Loads configuration (file named by --config / PEST_WATCH_CONFIG, env overrides)
//! 2. Installs the SIGINT/SIGTERM handler, then claims the alert output
//!    (driven LOW) and the reserved trigger input
//! 3. Loads the model and opens the capture device
//! 4. Runs the paced detection loop until end of stream or a stop signal
//! 5. Releases the camera, drops the alert line LOW and frees the GPIO lines

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use pest_watch::config::CONFIG_ENV;
use pest_watch::{
    AlertActuator, CancelToken, Clock, Collaborators, LoopExit, MonotonicClock, PestWatchConfig,
    Runner,
};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Run a pest detection model against a camera and pulse a GPIO line on detection"
)]
struct Args {
    /// Model to run: an Edge Impulse .eim runner, an .onnx classifier
    /// (backend-tract), or stub://detection / stub://classification.
    model: String,

    /// Capture device id (0 for /dev/video0, a device path, or stub://name).
    /// Probed automatically when omitted.
    device: Option<String>,

    /// Configuration file (TOML when it ends in .toml, JSON otherwise).
    #[arg(long, env = CONFIG_ENV)]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let cfg = PestWatchConfig::load_from(args.config.as_deref())?;
    let policy = cfg.alert_policy();
    log::info!(
        "alerting on {} >= {:.2}, hold {}ms, cadence {}ms",
        policy.target_label,
        policy.confidence_threshold,
        policy.hold_duration_ms,
        cfg.cadence_ms
    );

    let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());
    let cameras = cfg.camera_provider(clock.clone())?;

    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    // Covers SIGINT, SIGTERM and SIGHUP; ctrlc does not say which one arrived.
    ctrlc::set_handler(move || {
        log::info!("interrupt or termination signal received, finishing current frame...");
        handler_token.cancel();
    })
    .context("error setting signal handler")?;

    // GPIO is claimed last.
    let (alert_pin, trigger_pin) = cfg.open_gpio()?;
    let actuator = AlertActuator::new(alert_pin, clock.clone(), policy.hold_duration_ms)
        .context("failed to drive alert line LOW")?;

    let runner = Runner::new(
        args.model,
        args.device,
        cfg.cadence_ms,
        policy,
        clock,
        cancel,
    );
    let report = runner.run(Collaborators {
        cameras,
        models: Box::new(cfg.model_loader()),
        actuator,
        trigger: Some(trigger_pin),
    })?;

    match report.loop_report.exit {
        LoopExit::EndOfStream => log::info!("stream on {} ended", report.device),
        LoopExit::Cancelled => log::info!("stopped by signal"),
    }
    log::info!(
        "pest_watch done: project {}, {} frames, {} alerts",
        report.project,
        report.loop_report.frames,
        report.alerts
    );
    Ok(())
}

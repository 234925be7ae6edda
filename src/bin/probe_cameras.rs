//! probe_cameras - list capture devices that open and deliver a frame.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use pest_watch::config::CONFIG_ENV;
use pest_watch::{Clock, MonotonicClock, PestWatchConfig};

#[derive(Parser, Debug)]
#[command(author, version, about = "List working capture devices")]
struct Args {
    /// Probe device indices 0..N (overrides camera.max_probe).
    #[arg(long)]
    max_probe: Option<u32>,

    /// Configuration file (TOML when it ends in .toml, JSON otherwise).
    #[arg(long, env = CONFIG_ENV)]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = PestWatchConfig::load_from(args.config.as_deref())?;
    if let Some(max_probe) = args.max_probe {
        cfg.camera.max_probe = max_probe;
    }

    let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());
    let provider = cfg.camera_provider(clock)?;
    let cameras = provider.candidates()?;
    if cameras.is_empty() {
        log::warn!("no working capture devices found");
    }
    for camera in &cameras {
        println!(
            "{}\t{}\t{}x{}",
            camera.id, camera.driver, camera.width, camera.height
        );
    }
    Ok(())
}

//! Runs a capture session against the synthetic driver and logs what the
//! consumer receives.
//!
//! Usage: `framebridge [config.json]`

mod config;

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use framebridge::CaptureSession;
use framebridge_driver::synthetic::{SyntheticDriver, SyntheticInput};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "framebridge=debug,framebridge_driver=debug,framebridge_cli=info".into()),
        )
        .init();

    let path = std::env::args().nth(1).map(PathBuf::from);
    let config = config::load(path.as_deref())?;
    info!(
        "Capturing {} / {} from device {} for {:?}",
        config.session.display_mode,
        config.session.pixel_format,
        config.session.device_index,
        config.run_for()
    );

    let driver = SyntheticDriver::new().with_device(config.device_name.clone(), SyntheticInput::paced());
    let mut session = CaptureSession::new(Arc::new(driver), config.session.clone());
    session.configure().context("failed to configure capture session")?;

    let delivered = Arc::new(AtomicU64::new(0));
    let counter = delivered.clone();
    session
        .do_capture(move |video, audio| {
            let n = counter.fetch_add(1, Ordering::Relaxed) + 1;
            if n <= 3 || n % 100 == 0 {
                info!(
                    "Frame {}: video {:?} bytes, audio {:?} bytes",
                    n,
                    video.as_ref().map(Vec::len),
                    audio.as_ref().map(Vec::len)
                );
            }
        })
        .context("failed to start capture")?;

    tokio::select! {
        _ = tokio::time::sleep(config.run_for()) => {}
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Failed to listen for Ctrl-C: {e}");
            }
            info!("Interrupted");
        }
    }

    let stats = session.stats();
    session.stop();

    info!("Delivered {} frames", delivered.load(Ordering::Relaxed));
    if let Some(stats) = stats {
        info!("Slot stats: {}", serde_json::to_string(&stats)?);
    }
    Ok(())
}

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use vocalog::{Config, FfmpegBackend, SessionController, SessionEvent, StopOutcome};

#[derive(Parser)]
#[command(name = "vocalog", about = "Desktop audio capture with live level metering")]
struct Args {
    /// Record for this many seconds, then stop (Ctrl-C also stops).
    #[arg(long)]
    seconds: Option<u64>,

    /// Where to write the recording (defaults to the configured directory).
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Config file path (without extension), layered over defaults.
    #[arg(long, default_value = "config/vocalog")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let cfg = Config::load(&args.config)?;

    let backend = Arc::new(FfmpegBackend::new(cfg.capture.clone()));
    let (controller, mut events) = SessionController::new(cfg, backend);

    let path = controller.start(args.output_dir).await?;
    info!("recording into {}", path.display());

    let event_task = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                SessionEvent::Tick {
                    elapsed_secs,
                    level,
                } => {
                    let bar = "#".repeat((level * 30.0) as usize);
                    info!("{elapsed_secs:>4}s [{bar:<30}] {level:.3}");
                }
                SessionEvent::SegmentRotated { path } => {
                    info!("segment rotated -> {}", path.display());
                }
                SessionEvent::CaptureRecovered { path } => {
                    warn!("capture recovered -> {}", path.display());
                }
                SessionEvent::Failed { message } => {
                    warn!("recording failed: {message}");
                    break;
                }
                _ => {}
            }
        }
    });

    match args.seconds {
        Some(seconds) => {
            tokio::select! {
                _ = tokio::time::sleep(std::time::Duration::from_secs(seconds)) => {}
                _ = tokio::signal::ctrl_c() => {}
            }
        }
        None => {
            tokio::signal::ctrl_c().await?;
        }
    }

    match controller.stop().await? {
        StopOutcome::Stopped { path, duration } => {
            info!(
                "saved {} ({}s)",
                path.display(),
                duration.as_secs()
            );
        }
        StopOutcome::Discarded { path } => {
            info!("discarded zero-duration recording {}", path.display());
        }
    }

    event_task.abort();
    Ok(())
}

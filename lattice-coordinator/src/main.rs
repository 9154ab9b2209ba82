//! lattice coordinator entry point.
//!
//! ```text
//! lattice-coordinator                  Run with lattice.toml or defaults
//! lattice-coordinator --frames <n>     Override the number of frames
//! lattice-coordinator --latency <n>    Override the frame latency
//! lattice-coordinator --config <path>  Load a custom settings TOML
//! lattice-coordinator --gen-config     Write default settings to stdout
//! ```

use std::path::PathBuf;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use lattice_coordinator::app::ClusterApp;
use lattice_coordinator::settings::CoordinatorSettings;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "lattice-coordinator", about = "lattice cluster coordinator")]
struct Cli {
    /// Path to settings TOML file.
    #[arg(short, long, default_value = "lattice.toml")]
    config: PathBuf,

    /// Number of frames to render.
    #[arg(short, long)]
    frames: Option<u32>,

    /// Frames the cluster may lag behind.
    #[arg(short, long)]
    latency: Option<u32>,

    /// Print the default settings to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        let text = toml::to_string_pretty(&CoordinatorSettings::default())?;
        println!("{text}");
        return Ok(());
    }

    let (mut settings, source) = CoordinatorSettings::load(&cli.config);
    if let Some(frames) = cli.frames {
        settings.cluster.frames = frames;
    }
    if let Some(latency) = cli.latency {
        settings.cluster.latency = latency;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    source.log(&cli.config);

    info!("lattice-coordinator v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "{} node(s), {} frame(s), latency {}",
        settings.nodes.len(),
        settings.cluster.frames,
        settings.cluster.latency
    );

    let mut app = ClusterApp::new(settings);
    let report = app.run().await?;
    if report.clean_exit {
        info!("run complete: {} frame(s) on {} node(s)", report.frames, report.nodes);
    } else {
        warn!("run ended uncleanly after {} frame(s)", report.frames);
    }
    Ok(())
}

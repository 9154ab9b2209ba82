//! lattice worker entry point.
//!
//! ```text
//! lattice-worker                  Serve with lattice-worker.toml or defaults
//! lattice-worker --port <n>       Override the listen port
//! lattice-worker --config <path>  Load a custom settings TOML
//! lattice-worker --gen-config     Write default settings to stdout
//! ```

use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use lattice_worker::service::WorkerService;
use lattice_worker::settings::WorkerSettings;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "lattice-worker", about = "lattice render worker")]
struct Cli {
    /// Path to settings TOML file.
    #[arg(short, long, default_value = "lattice-worker.toml")]
    config: PathBuf,

    /// Port to accept the coordinator on.
    #[arg(short, long)]
    port: Option<u16>,

    /// Print the default settings to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        let text = toml::to_string_pretty(&WorkerSettings::default())?;
        println!("{text}");
        return Ok(());
    }

    let (mut settings, source) = WorkerSettings::load(&cli.config);
    if let Some(port) = cli.port {
        settings.network.listen_port = port;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    source.log(&cli.config);

    info!("lattice-worker v{}", env!("CARGO_PKG_VERSION"));
    info!("listening on {}", settings.listen_address());
    info!("frame cost: {:?}", settings.frame_cost());

    let service = WorkerService::new(settings);
    let stop = service.stop_handle();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, shutting down");
        stop.store(false, std::sync::atomic::Ordering::SeqCst);
    });

    service.run().await?;
    Ok(())
}

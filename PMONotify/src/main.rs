mod logs;
mod simulator;

use std::sync::Arc;

use pmoconfig::{Config, get_config};
use tracing::{Level, info};

/// `--config <dir>` selects the configuration directory, `--verbose` forces
/// the DEBUG level whatever the configuration says.
fn config_dir_arg(args: &[String]) -> Option<&str> {
    args.iter()
        .position(|arg| arg == "--config")
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let config = match config_dir_arg(&args) {
        Some(dir) => Arc::new(Config::load_config(dir)?),
        None => get_config(),
    };

    let log_state = logs::init_logging(&config);
    if args.iter().any(|arg| arg == "--verbose" || arg == "-v") {
        log_state.set_max_level(Level::DEBUG);
    }
    info!(level = %log_state.get_max_level(), config = config.get_config_file(), "📋 Configuration loaded");

    if !config.get_notification_enabled()? {
        info!("🔕 Notifications disabled in configuration, nothing to do");
        return Ok(());
    }

    let settings = config.get_simulator_settings()?;
    info!(
        producers = settings.producers,
        event_interval_ms = settings.event_interval_ms,
        duration_ms = settings.duration_ms,
        pause_every = settings.pause_every,
        "🎵 Starting PMONotify simulator"
    );

    let summary = simulator::run_simulation(&settings)?;
    info!("✅ Simulation finished");
    println!("{summary}");
    Ok(())
}

use clap::Parser;
use device_manager::config::{CliOverrides, Config};
use device_manager::logging;

#[derive(Parser)]
#[command(name = "device-manager", version, about = "Serializes exclusive access to a single neural accelerator")]
struct Cli {
    #[command(flatten)]
    overrides: CliOverrides,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();
    logging::lifecycle::server_startup(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    let cli = Cli::parse();
    let config_path_used = cli.overrides.config.clone();
    let config = Config::load(&cli.overrides).await?;
    logging::lifecycle::config_loaded(config_path_used.as_deref().map(|p| p.to_string_lossy().into_owned()).as_deref());

    let handle = device_manager::start(config).await?;
    device_manager::lifecycle::run_until_shutdown(handle).await;

    Ok(())
}

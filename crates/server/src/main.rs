use std::sync::Arc;

use anyhow::bail;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use mc_model::{ModelProvider, ScriptedProvider};
use mc_server::bootstrap;
use mc_server::cli::{self, Cli, Command, ConfigCommand};
use mc_server::control::MissionControl;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        // Default to serve when no subcommand is given.
        None | Some(Command::Serve) => {
            init_tracing();
            let (config, _config_path) = cli::load_config(cli.config.as_deref())?;
            run_server(config).await
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            let (config, config_path) = cli::load_config(cli.config.as_deref())?;
            config.validate()?;
            println!("{}: ok", config_path.display());
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            let (config, _config_path) = cli::load_config(cli.config.as_deref())?;
            cli::show(&config)
        }
        Some(Command::Version) => {
            println!("missionctl {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

async fn run_server(config: mc_domain::config::Config) -> anyhow::Result<()> {
    let provider: Arc<dyn ModelProvider> = match config.model.provider.as_str() {
        // The scripted provider echoes when its scripts run out, which is
        // all a transport-less dev server needs.
        "scripted" => Arc::new(ScriptedProvider::new(Vec::new())),
        other => bail!("unknown model provider: {other}"),
    };

    let state = bootstrap::build_state(config, provider)?;
    let control = MissionControl::new(state);
    let stall = control.spawn_stall_detector();

    tracing::info!("mission control running (ctrl-c to stop)");
    tokio::signal::ctrl_c().await?;

    control.shutdown().await;
    let _ = stall.await;
    Ok(())
}

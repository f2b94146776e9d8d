use std::path::PathBuf;
use std::thread;

use anyhow::Context;
use clap::Parser;
use tiling_plugin::common::config::Config;
use tiling_plugin::common::log::init_logging;
use tiling_plugin::sys::run_loop;
use tiling_plugin::{Backends, PLUGIN_NAME, PLUGIN_VERSION, Plugin};
use tracing::{info, warn};

/// Runs the tiling plugin standalone, listening for lifecycle messages on
/// the loopback daemon port.
#[derive(Parser, Debug)]
#[command(name = "tiling-host", version, about)]
struct Cli {
    /// Configuration file. Defaults to `<config dir>/tiling/config.toml`.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Overrides `daemon.port`.
    #[arg(long)]
    port: Option<u16>,

    /// Overrides `observer.settle_delay_ms`.
    #[arg(long)]
    settle_delay_ms: Option<u64>,
}

fn main() -> anyhow::Result<()> {
    sigpipe::reset();
    let cli = Cli::parse();

    let mut config = match cli.config.or_else(Config::default_path) {
        Some(path) => Config::read(&path)?,
        None => Config::default(),
    };
    if let Some(port) = cli.port {
        config.daemon.port = port;
    }
    if let Some(ms) = cli.settle_delay_ms {
        config.observer.settle_delay_ms = ms;
    }

    init_logging(&config.log.filter);
    info!(pid = nix::unistd::getpid().as_raw(), "{PLUGIN_NAME} {PLUGIN_VERSION} starting");

    let backends = Backends::system().context("could not create the subscription queue")?;
    let plugin = Plugin::init(&config, backends).context("plugin initialization failed")?;

    let degradations = plugin.degradations().clone();
    thread::Builder::new()
        .name("degradations".to_string())
        .spawn(move || {
            for degradation in degradations {
                warn!(?degradation, "plugin degraded");
            }
        })
        .context("could not spawn the degradation reader")?;

    run_loop::run_main();
    drop(plugin);
    Ok(())
}

use anyhow::Context;
use clap::Parser;
use config::{Config, Mode};
use sensor::{
    Artifactor, Execution, FileExecution, IpcExecution, KernelMonitors, cli::Cli, controlled,
    signals, standalone,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

const SIGNAL_QUEUE: usize = 64;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // NOTE: The verbosity flag takes precedence over the environment variable
    // for log control. `SENSOR_LOG` can only set the level per crate, e.g.
    // `SENSOR_LOG=ipc=trace sensor -v`.
    let env_filter = EnvFilter::builder()
        .with_env_var("SENSOR_LOG")
        .from_env()?
        .add_directive(cli.verbosity.log_level_filter().as_str().parse()?);

    let layer = tracing_subscriber::fmt::layer()
        .with_level(true)
        .with_file(false)
        .with_line_number(false);

    tracing_subscriber::registry()
        .with(layer)
        .with(env_filter)
        .init();

    // load config
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        _ => {
            let mut candidates = glob::glob("/etc/sensor/config.d/*.toml")?
                .filter_map(Result::ok)
                .collect::<Vec<_>>();
            candidates.insert(0, "/etc/sensor/config.toml".into());
            trace!(?candidates, "config file candidates");
            Config::load_multiple(candidates)?
        }
    };
    cli.apply(&mut config);
    debug!(?config, ?cli);

    let (signals_tx, signals_rx) = mpsc::channel(SIGNAL_QUEUE);
    let _relays = signals::relay_signals(signals_tx).context("failed to install signal handlers")?;

    let artifactor = Artifactor::new(&config.sensor, std::env::args().collect());
    let factory = KernelMonitors::new(config.clone());

    info!(mode = ?config.sensor.mode, "sensor starting");
    match config.sensor.mode {
        Mode::Controlled => {
            let shutdown = CancellationToken::new();
            let mut exe = IpcExecution::start(&config.transport, shutdown.clone()).await?;
            let result = {
                let run = controlled::run(&mut exe, &factory, &artifactor, shutdown.clone());
                tokio::pin!(run);
                let mut signals_rx = signals_rx;
                loop {
                    tokio::select! {
                        result = &mut run => break result,
                        Some(sig) = signals_rx.recv() => {
                            if signals::is_shutdown(sig) {
                                info!(%sig, "shutting down");
                                shutdown.cancel();
                            } else {
                                debug!(%sig, "ignoring signal");
                            }
                        }
                    }
                }
            };
            exe.close();
            result?;
        }
        Mode::Standalone => {
            let mut exe = FileExecution::open(&config.sensor.command_file, &config.sensor.event_file)?;
            let result = standalone::run(&mut exe, &factory, &artifactor, &cli.cmd, signals_rx).await;
            exe.close();
            result?;
        }
    }
    info!("sensor is done");
    Ok(())
}

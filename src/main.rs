mod workers;

use swaz::utils::data_dir;
use swaz::utils::sos::SignalOfStop;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use workers::args::{log_filter, Args, Command};
use workers::commands;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::load();

    // RUST_LOG wins over -v when set.
    let filter_layer = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_filter(args.verbose)));
    tracing_subscriber::registry()
        .with(filter_layer)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config = args.settings()?;
    let data_dir = data_dir::resolve(config.data_dir.as_deref())?;

    let sos = SignalOfStop::new();

    // Ctrl+C handler
    let sos_clone = sos.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        sos_clone.cancel();
    });

    match args.command {
        Command::Signal { .. } => commands::signal(&config.signal, sos).await,
        Command::History { clear } => commands::history(&data_dir, clear),
        Command::Schedule { clear } => commands::schedule(&data_dir, clear),
    }
}

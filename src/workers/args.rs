//! Command-line arguments.
//!
//! Settings come from the TOML config file first; flags given on the
//! command line override the file.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use swaz::core::config::{AppConfig, DEFAULT_CONFIG_FILE};

/// Swaz - encrypted peer-to-peer file transfer.
#[derive(Parser, Clone, Debug)]
#[command(author, version, about)]
#[command(propagate_version = true)]
pub struct Args {
    /// Verbosity level (-v, -vv, -vvv).
    #[clap(short = 'v', long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Configuration file. Defaults to ./config.toml when present.
    #[clap(long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory for persistent data (history, scheduled job).
    /// Defaults to ~/.swaz/
    #[clap(long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Run the rendezvous (signaling) server until Ctrl+C.
    Signal {
        /// Address to listen on.
        #[clap(long)]
        host: Option<String>,
        /// TCP port to listen on.
        #[clap(long)]
        port: Option<u16>,
    },
    /// Print the transfer history.
    History {
        /// Remove all history entries instead.
        #[clap(long)]
        clear: bool,
    },
    /// Print the pending scheduled transfer.
    Schedule {
        /// Remove the pending job instead.
        #[clap(long)]
        clear: bool,
    },
}

impl Args {
    pub fn load() -> Self {
        let mut args = Args::parse();
        // Resolve relative paths before anything changes the working directory.
        args.config = args.config.map(resolve_path);
        args.data_dir = args.data_dir.map(resolve_path);
        args
    }

    /// Config file contents merged with CLI overrides.
    pub fn settings(&self) -> anyhow::Result<AppConfig> {
        let path = match &self.config {
            Some(path) if !path.exists() => {
                anyhow::bail!("config file {} does not exist", path.display())
            }
            Some(path) => path.clone(),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };
        let mut config = AppConfig::load(&path)?;
        self.apply(&mut config);
        Ok(config)
    }

    fn apply(&self, config: &mut AppConfig) {
        if self.data_dir.is_some() {
            config.data_dir = self.data_dir.clone();
        }
        if let Command::Signal { host, port } = &self.command {
            if let Some(host) = host {
                config.signal.host = host.clone();
            }
            if let Some(port) = port {
                config.signal.port = *port;
            }
        }
    }
}

fn resolve_path(p: PathBuf) -> PathBuf {
    if p.is_absolute() {
        p
    } else {
        std::env::current_dir().unwrap_or_default().join(p)
    }
}

/// Default filter for a `-v` count.
pub fn log_filter(verbose: u8) -> &'static str {
    // webrtc_ice warns on every late STUN response.
    match verbose {
        0 => "warn,swaz=info,webrtc_ice::agent=error",
        1 => "info,webrtc_ice::agent=error",
        2 => "debug,webrtc_ice::agent=error",
        _ => "trace",
    }
}

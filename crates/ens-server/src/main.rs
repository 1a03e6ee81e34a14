//! Ensemble - Live Performance Server
//!
//! Usage:
//!   ensemble                          - defaults / ./ensemble.config.json
//!   ensemble --config show.json       - explicit config file
//!   ensemble --listen 0.0.0.0:8080    - override the HTTP address
//!   ensemble --no-osc                 - disable the datagram listener

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use ens_server::ServerConfig;

#[derive(Parser)]
#[command(name = "ensemble", about = "Ensemble live performance server")]
struct Cli {
    /// Config file (otherwise $ENSEMBLE_CONFIG or ./ensemble.config.json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// HTTP / WebSocket listen address
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// UDP address for datagram commands
    #[arg(long, conflicts_with = "no_osc")]
    osc: Option<SocketAddr>,

    /// Do not listen for datagram commands
    #[arg(long)]
    no_osc: bool,
}

impl Cli {
    fn apply(&self, cfg: &mut ServerConfig) {
        if let Some(listen) = self.listen {
            cfg.listen_addr = listen;
        }
        if let Some(osc) = self.osc {
            cfg.osc_addr = Some(osc);
        }
        if self.no_osc {
            cfg.osc_addr = None;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let mut cfg = ServerConfig::load(cli.config.as_deref()).context("loading configuration")?;
    cli.apply(&mut cfg);
    cfg.validate().context("validating configuration")?;

    log::info!(
        "Starting Ensemble (http {}, osc {}, {} mp3 slots)",
        cfg.listen_addr,
        cfg.osc_addr
            .map(|a| a.to_string())
            .unwrap_or_else(|| "off".into()),
        cfg.mp3_slots
    );

    ens_server::run(cfg).await.context("server terminated")?;
    Ok(())
}

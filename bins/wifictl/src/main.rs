//! wifictl - query wiphys, interfaces, stations and scans via nl80211.

mod commands;

use std::rc::Rc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::task::LocalSet;
use wificond::netlink::{NetlinkManager, TokioEventLoop, TransportConfig};

#[derive(Parser)]
#[command(name = "wifictl", version, about = "Wi-Fi query and scan tool")]
struct Cli {
    /// Output JSON.
    #[arg(short = 'j', long, global = true)]
    json: bool,

    /// Pretty print JSON.
    #[arg(short = 'p', long, global = true)]
    pretty: bool,

    /// Log at debug level.
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Budget for each synchronous request, in milliseconds.
    #[arg(long, default_value_t = 300, global = true)]
    timeout_ms: u64,

    /// Generic netlink family to talk to.
    #[arg(long, default_value = "nl80211", global = true)]
    family: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show the wiphy index.
    Phy(commands::phy::PhyCmd),

    /// Show the station interface of a wiphy.
    Iface(commands::phy::IfaceCmd),

    /// Show bands, scan limits and features of a wiphy.
    Info(commands::phy::InfoCmd),

    /// Show transmit statistics for a station.
    #[command(visible_alias = "sta")]
    Station(commands::phy::StationCmd),

    /// Trigger a scan.
    Scan(commands::scan::ScanCmd),

    /// Show the kernel's scan results.
    #[command(visible_alias = "res")]
    Results(commands::scan::ResultsCmd),

    /// Print scan notifications until interrupted.
    #[command(visible_alias = "m", visible_alias = "mon")]
    Monitor(commands::scan::MonitorCmd),
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    // The transport is single-threaded; its async socket is serviced by
    // tasks on this set.
    let local = Rc::new(LocalSet::new());
    let result = local.run_until(run(cli, local.clone())).await;

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}

async fn run(cli: Cli, local: Rc<LocalSet>) -> anyhow::Result<()> {
    let config = TransportConfig::default()
        .family_name(cli.family.clone())
        .sync_timeout(Duration::from_millis(cli.timeout_ms));
    let manager = NetlinkManager::new(Rc::new(TokioEventLoop::new(local)), config);
    manager.start()?;

    let out = commands::Output {
        json: cli.json,
        pretty: cli.pretty,
    };

    match cli.command {
        Command::Phy(cmd) => cmd.run(&manager, &out),
        Command::Iface(cmd) => cmd.run(&manager, &out),
        Command::Info(cmd) => cmd.run(&manager, &out),
        Command::Station(cmd) => cmd.run(&manager, &out),
        Command::Scan(cmd) => cmd.run(&manager, &out).await,
        Command::Results(cmd) => cmd.run(&manager, &out),
        Command::Monitor(cmd) => cmd.run(&manager, &out).await,
    }
}

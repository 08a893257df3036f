//! wmediumd - a wireless medium simulator for mac80211_hwsim

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{info, warn};
use wmedium_radio::netlink::HWSIM_FAMILY_NAME;
use wmedium_radio::{ingest, Medium, MediumConfig, NetlinkLink, PerModel, PerTable, SharedChannel};
use wmedium_sim::{log_filter, Topology};

#[derive(Parser, Debug)]
#[command(name = "wmediumd", version, about = "a wireless medium simulator for mac80211_hwsim")]
struct Args {
    /// Topology file (TOML)
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Packet error rate table
    #[arg(short = 'x', long = "per")]
    per: Option<PathBuf>,

    /// RFC 5424 severity: >= 3 errors, >= 5 startup, >= 6 dropped packets, 7 every packet
    #[arg(short = 'l', long = "log-level", value_parser = clap::value_parser!(u8).range(0..=7))]
    log_level: Option<u8>,

    /// Register unknown radios on the fly instead of loading a topology
    #[arg(short = 'd', long)]
    dynamic: bool,

    /// Leave medium ids as configured
    #[arg(long)]
    no_detect: bool,

    /// Do not listen for side-channel deliveries
    #[arg(long)]
    no_side_channel: bool,
}

fn init_logging(level: Option<u8>) {
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if let Some(severity) = level {
        builder.filter_level(log_filter(severity));
    }
    builder.init();
}

fn load_topology(args: &Args) -> Result<Topology> {
    let mut topology = match (&args.config, args.dynamic) {
        (Some(_), true) => bail!("cannot use dynamic mode with a config file"),
        (None, false) => bail!("a config file must be supplied (-c FILE), or use dynamic mode (-d)"),
        (None, true) => {
            info!("Using dynamic mode instead of a config file");
            Topology::empty(MediumConfig::default())
        }
        (Some(path), false) => {
            info!("Input configuration file: {}", path.display());
            Topology::from_file(path).with_context(|| format!("loading {}", path.display()))?
        }
    };
    topology.config.dynamic = args.dynamic;
    if args.no_detect {
        topology.config.detect_mediums = false;
    }
    if args.no_side_channel {
        topology.config.side_channel = false;
    }
    Ok(topology)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.log_level);

    let Topology { config, stations, tables } = load_topology(&args)?;

    let per = match &args.per {
        Some(path) => {
            info!("Input packet error rate file: {}", path.display());
            Some(PerTable::from_file(path).with_context(|| format!("loading PER table {}", path.display()))?)
        }
        None => None,
    };

    let link = NetlinkLink::connect(HWSIM_FAMILY_NAME)
        .await
        .with_context(|| format!("family {} not available; is mac80211_hwsim loaded?", HWSIM_FAMILY_NAME))?;

    let side_channel = config.side_channel.then_some(config.side_channel_port);
    let (medium, handle) = Medium::new(
        config,
        stations,
        SharedChannel::new(tables),
        Arc::new(PerModel::new(per)),
        Arc::new(link),
    );
    medium.register().await.context("registering with the kernel")?;

    match side_channel {
        Some(port) => {
            ingest::spawn_listener(port, handle.deliveries.clone()).context("starting side-channel listener")?;
        }
        None => warn!("Side-channel disabled"),
    }

    // control senders stay open for the life of the reactor
    let _handle = handle;
    medium.run().await?;
    Ok(())
}

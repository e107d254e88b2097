//! wifictl phy / iface / info / station.

use clap::Args;
use serde::Serialize;
use wificond::netlink::NetlinkManager;
use wificond::nl80211::{MacAddr, utils};

use super::{Output, join, resolve_ifindex, resolve_wiphy};

#[derive(Args)]
pub struct PhyCmd {}

#[derive(Serialize)]
struct Phy {
    wiphy: u32,
}

impl PhyCmd {
    pub fn run(&self, manager: &NetlinkManager, out: &Output) -> anyhow::Result<()> {
        let wiphy = utils::get_wiphy_index(manager)?;
        out.emit(&Phy { wiphy }, |w| writeln!(w, "phy#{}", wiphy))
    }
}

#[derive(Args)]
pub struct IfaceCmd {
    /// Wiphy index (default: the one the kernel reports).
    #[arg(long)]
    wiphy: Option<u32>,
}

impl IfaceCmd {
    pub fn run(&self, manager: &NetlinkManager, out: &Output) -> anyhow::Result<()> {
        let wiphy = resolve_wiphy(manager, self.wiphy)?;
        let iface = utils::get_interface_info(manager, wiphy)?;
        out.emit(&iface, |w| {
            writeln!(w, "{}: ifindex {} addr {}", iface.name, iface.index, iface.mac)
        })
    }
}

#[derive(Args)]
pub struct InfoCmd {
    /// Wiphy index (default: the one the kernel reports).
    #[arg(long)]
    wiphy: Option<u32>,
}

impl InfoCmd {
    pub fn run(&self, manager: &NetlinkManager, out: &Output) -> anyhow::Result<()> {
        let wiphy = resolve_wiphy(manager, self.wiphy)?;
        let info = utils::get_wiphy_info(manager, wiphy)?;
        out.emit(&info, |w| {
            writeln!(w, "phy#{}", wiphy)?;
            writeln!(w, "  2.4 GHz: {}", join(&info.bands.band_2g))?;
            writeln!(w, "  5 GHz:   {}", join(&info.bands.band_5g))?;
            writeln!(w, "  DFS:     {}", join(&info.bands.band_dfs))?;
            let caps = &info.scan_capabilities;
            writeln!(
                w,
                "  max scan ssids {} sched scan ssids {} match sets {}",
                caps.max_num_scan_ssids, caps.max_num_sched_scan_ssids, caps.max_match_sets
            )?;
            writeln!(
                w,
                "  random mac: scan {} sched scan {}",
                info.features.supports_random_mac_oneshot_scan,
                info.features.supports_random_mac_sched_scan
            )
        })
    }
}

#[derive(Args)]
pub struct StationCmd {
    /// Interface index (default: the station interface).
    #[arg(long)]
    ifindex: Option<u32>,

    /// Station MAC address.
    #[arg(long)]
    mac: MacAddr,
}

impl StationCmd {
    pub fn run(&self, manager: &NetlinkManager, out: &Output) -> anyhow::Result<()> {
        let ifindex = resolve_ifindex(manager, self.ifindex)?;
        let sta = utils::get_station_info(manager, ifindex, self.mac)?;
        out.emit(&sta, |w| {
            writeln!(w, "Station {}", self.mac)?;
            writeln!(w, "  tx packets: {}", sta.station_tx_packets)?;
            writeln!(w, "  tx failed:  {}", sta.station_tx_failed)?;
            writeln!(w, "  tx bitrate: {:.1} MBit/s", sta.tx_bitrate_mbps())?;
            writeln!(w, "  signal:     {} dBm", sta.current_rssi)
        })
    }
}

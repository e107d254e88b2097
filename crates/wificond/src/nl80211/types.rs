//! Result types produced by nl80211 queries.
//!
//! All of these are plain snapshots: once returned they are owned by the
//! caller and have no tie to the transport.

use std::fmt;
use std::str::FromStr;

use crate::netlink::{Error, Result};

/// 48-bit hardware address.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    /// Build from a slice that must be exactly six bytes.
    pub fn from_slice(data: &[u8]) -> Result<Self> {
        let bytes: [u8; 6] = data.try_into().map_err(|_| {
            Error::InvalidAttribute(format!("MAC address must be 6 bytes, got {}", data.len()))
        })?;
        Ok(Self(bytes))
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl FromStr for MacAddr {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut bytes = [0u8; 6];
        let mut parts = s.split(':');
        for byte in bytes.iter_mut() {
            let part = parts
                .next()
                .ok_or_else(|| Error::InvalidAttribute(format!("short MAC address: {}", s)))?;
            if part.len() != 2 {
                return Err(Error::InvalidAttribute(format!("bad MAC octet: {}", part)));
            }
            *byte = u8::from_str_radix(part, 16)
                .map_err(|_| Error::InvalidAttribute(format!("bad MAC octet: {}", part)))?;
        }
        if parts.next().is_some() {
            return Err(Error::InvalidAttribute(format!("long MAC address: {}", s)));
        }
        Ok(Self(bytes))
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for MacAddr {
    fn serialize<S: serde::Serializer>(
        &self,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(feature = "serde")]
fn serialize_ssid<S: serde::Serializer>(
    ssid: &[u8],
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&String::from_utf8_lossy(ssid))
}

#[cfg(feature = "serde")]
fn serialize_ssids<S: serde::Serializer>(
    ssids: &[Vec<u8>],
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_seq(ssids.iter().map(|s| String::from_utf8_lossy(s)))
}

/// A network interface bound to a wiphy.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct InterfaceInfo {
    pub name: String,
    pub index: u32,
    pub mac: MacAddr,
}

/// Channels supported by a wiphy, in MHz, split by band.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct BandInfo {
    pub band_2g: Vec<u32>,
    pub band_5g: Vec<u32>,
    pub band_dfs: Vec<u32>,
}

impl BandInfo {
    /// Sort a channel into its band. 2.4 GHz is 2400..=2500 MHz; outside that
    /// range, channels carrying a DFS state go to the DFS list.
    pub fn insert(&mut self, freq: u32, has_dfs_state: bool) {
        if (2400..=2500).contains(&freq) {
            self.band_2g.push(freq);
        } else if has_dfs_state {
            self.band_dfs.push(freq);
        } else {
            self.band_5g.push(freq);
        }
    }
}

/// Scan limits advertised by the wiphy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ScanCapabilities {
    pub max_num_scan_ssids: u8,
    pub max_num_sched_scan_ssids: u8,
    pub max_match_sets: u8,
}

/// Driver features relevant to scanning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct WiphyFeatures {
    pub supports_random_mac_oneshot_scan: bool,
    pub supports_random_mac_sched_scan: bool,
}

impl WiphyFeatures {
    pub fn from_flags(flags: u32) -> Self {
        Self {
            supports_random_mac_oneshot_scan: flags & super::FEATURE_SCAN_RANDOM_MAC_ADDR != 0,
            supports_random_mac_sched_scan: flags & super::FEATURE_SCHED_SCAN_RANDOM_MAC_ADDR != 0,
        }
    }
}

/// Everything `get_wiphy_info` reports.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct WiphyInfo {
    pub bands: BandInfo,
    pub scan_capabilities: ScanCapabilities,
    pub features: WiphyFeatures,
}

/// Transmit counters for one associated station.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct StationInfo {
    pub station_tx_packets: u32,
    pub station_tx_failed: u32,
    /// Units of 100 kbit/s, as reported by the kernel.
    pub station_tx_bitrate: u32,
    /// dBm.
    pub current_rssi: i8,
}

impl StationInfo {
    /// Transmit bitrate in Mbit/s.
    pub fn tx_bitrate_mbps(&self) -> f64 {
        f64::from(self.station_tx_bitrate) / 10.0
    }
}

/// One BSS from a scan dump.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ScanResult {
    /// Raw SSID bytes; may be empty for hidden networks.
    #[cfg_attr(feature = "serde", serde(serialize_with = "serialize_ssid"))]
    pub ssid: Vec<u8>,
    pub bssid: MacAddr,
    /// Raw information elements as received.
    #[cfg_attr(feature = "serde", serde(skip))]
    pub info_element: Vec<u8>,
    /// MHz.
    pub frequency: u32,
    /// Signal strength in mBm (1/100 dBm).
    pub signal_mbm: i32,
    /// Timing synchronization function value, microseconds.
    pub tsf: u64,
    pub capability: u16,
    pub associated: bool,
}

impl ScanResult {
    /// Signal strength in dBm.
    pub fn signal_dbm(&self) -> f64 {
        f64::from(self.signal_mbm) / 100.0
    }

    /// SSID decoded as UTF-8, replacing invalid sequences.
    pub fn ssid_lossy(&self) -> String {
        String::from_utf8_lossy(&self.ssid).into_owned()
    }
}

impl fmt::Display for ScanResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:>5} MHz {:>6.1} dBm{} {}",
            self.bssid,
            self.frequency,
            self.signal_dbm(),
            if self.associated { " *" } else { "  " },
            self.ssid_lossy()
        )
    }
}

/// Contents of a `NEW_SCAN_RESULTS` or `SCAN_ABORTED` notification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ScanNotification {
    pub ifindex: u32,
    pub aborted: bool,
    #[cfg_attr(feature = "serde", serde(serialize_with = "serialize_ssids"))]
    pub ssids: Vec<Vec<u8>>,
    pub frequencies: Vec<u32>,
}

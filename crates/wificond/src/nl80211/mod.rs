//! NL80211 (Wi-Fi) generic netlink family.
//!
//! Wiphy, interface and station queries live in [`utils`]; scan triggers,
//! scan results and scheduled scans live in [`scan`]. Both are written
//! against the [`NetlinkTransport`](crate::netlink::NetlinkTransport) trait,
//! so they run the same over the real [`NetlinkManager`](crate::netlink::NetlinkManager)
//! and over a scripted transport in tests.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::rc::Rc;
//! use tokio::task::LocalSet;
//! use wificond::netlink::{NetlinkManager, TokioEventLoop, TransportConfig};
//! use wificond::nl80211::{scan, utils};
//!
//! # fn example() -> wificond::Result<()> {
//! let local = Rc::new(LocalSet::new());
//! let event_loop = Rc::new(TokioEventLoop::new(local.clone()));
//! let manager = NetlinkManager::new(event_loop, TransportConfig::default());
//! manager.start()?;
//!
//! let wiphy = utils::get_wiphy_index(&manager)?;
//! let iface = utils::get_interface_info(&manager, wiphy)?;
//! scan::trigger_scan(&manager, iface.index, &[], &[], false)?;
//! # Ok(())
//! # }
//! ```

mod ie;
pub mod scan;
pub mod types;
pub mod utils;

pub use ie::{ELEMENT_ID_SSID, InfoElements, ssid_from_info_elements};
pub use types::{
    BandInfo, InterfaceInfo, MacAddr, ScanCapabilities, ScanNotification, ScanResult, StationInfo,
    WiphyFeatures, WiphyInfo,
};

/// nl80211 commands used by this crate.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Nl80211Cmd {
    Unspec = 0,
    GetWiphy = 1,
    NewWiphy = 3,
    GetInterface = 5,
    NewInterface = 7,
    GetStation = 17,
    NewStation = 19,
    GetScan = 32,
    TriggerScan = 33,
    NewScanResults = 34,
    ScanAborted = 35,
    StartSchedScan = 75,
    StopSchedScan = 76,
    SchedScanResults = 77,
    SchedScanStopped = 78,
}

impl Nl80211Cmd {
    /// Map a raw command byte back to a known command.
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => Self::Unspec,
            1 => Self::GetWiphy,
            3 => Self::NewWiphy,
            5 => Self::GetInterface,
            7 => Self::NewInterface,
            17 => Self::GetStation,
            19 => Self::NewStation,
            32 => Self::GetScan,
            33 => Self::TriggerScan,
            34 => Self::NewScanResults,
            35 => Self::ScanAborted,
            75 => Self::StartSchedScan,
            76 => Self::StopSchedScan,
            77 => Self::SchedScanResults,
            78 => Self::SchedScanStopped,
            _ => return None,
        })
    }
}

/// Top-level nl80211 attributes.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Nl80211Attr {
    Unspec = 0,
    Wiphy = 1,
    WiphyName = 2,
    Ifindex = 3,
    Ifname = 4,
    Iftype = 5,
    Mac = 6,
    StaInfo = 21,
    WiphyBands = 22,
    WiphyFreq = 38,
    Ie = 42,
    MaxNumScanSsids = 43,
    ScanFrequencies = 44,
    ScanSsids = 45,
    Generation = 46,
    Bss = 47,
    SchedScanInterval = 119,
    MaxNumSchedScanSsids = 123,
    SchedScanMatch = 132,
    MaxMatchSets = 133,
    FeatureFlags = 143,
    Wdev = 153,
    ScanFlags = 158,
    SplitWiphyDump = 174,
}

/// Attributes inside one `WIPHY_BANDS` entry.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BandAttr {
    Invalid = 0,
    Freqs = 1,
    Rates = 2,
}

/// Attributes of one channel inside `BandAttr::Freqs`.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrequencyAttr {
    Invalid = 0,
    Freq = 1,
    Disabled = 2,
    NoIr = 3,
    NoIbss = 4,
    Radar = 5,
    MaxTxPower = 6,
    DfsState = 7,
}

/// Attributes inside `Nl80211Attr::Bss`.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BssAttr {
    Invalid = 0,
    Bssid = 1,
    Frequency = 2,
    Tsf = 3,
    BeaconInterval = 4,
    Capability = 5,
    InformationElements = 6,
    SignalMbm = 7,
    SignalUnspec = 8,
    Status = 9,
    SeenMsAgo = 10,
}

/// Values of `BssAttr::Status`.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BssStatus {
    Authenticated = 0,
    Associated = 1,
    IbssJoined = 2,
}

/// Attributes inside `Nl80211Attr::StaInfo`.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaInfoAttr {
    Invalid = 0,
    InactiveTime = 1,
    RxBytes = 2,
    TxBytes = 3,
    Signal = 7,
    TxBitrate = 8,
    RxPackets = 9,
    TxPackets = 10,
    TxRetries = 11,
    TxFailed = 12,
}

/// Attributes inside `StaInfoAttr::TxBitrate`.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateInfoAttr {
    Invalid = 0,
    /// u16, units of 100 kbit/s; saturates for very high rates.
    Bitrate = 1,
    Mcs = 2,
    /// u32, units of 100 kbit/s.
    Bitrate32 = 5,
}

/// Attributes of one `Nl80211Attr::SchedScanMatch` set.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedScanMatchAttr {
    Invalid = 0,
    Ssid = 1,
    Rssi = 2,
}

/// Interface types (`Nl80211Attr::Iftype`).
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceType {
    Unspecified = 0,
    Adhoc = 1,
    Station = 2,
    Ap = 3,
    ApVlan = 4,
    Wds = 5,
    Monitor = 6,
    MeshPoint = 7,
    P2pClient = 8,
    P2pGo = 9,
    P2pDevice = 10,
}

/// `Nl80211Attr::FeatureFlags` bits.
pub const FEATURE_SCAN_RANDOM_MAC_ADDR: u32 = 1 << 29;
pub const FEATURE_SCHED_SCAN_RANDOM_MAC_ADDR: u32 = 1 << 30;

/// `Nl80211Attr::ScanFlags` bits.
pub const SCAN_FLAG_RANDOM_ADDR: u32 = 1 << 3;

/// Multicast group carrying scan notifications.
pub const MULTICAST_GROUP_SCAN: &str = "scan";
pub const MULTICAST_GROUP_CONFIG: &str = "config";
pub const MULTICAST_GROUP_MLME: &str = "mlme";
pub const MULTICAST_GROUP_REGULATORY: &str = "regulatory";

/// Driver quirk: reported as a station interface but never usable as one.
pub const P2P_DEVICE_NAME: &str = "p2p0";

//! Transport configuration.

use std::time::Duration;

/// Default budget for one synchronous request/response exchange.
pub const DEFAULT_SYNC_TIMEOUT: Duration = Duration::from_millis(300);

/// Default datagram ceiling and socket receive buffer size.
pub const DEFAULT_RECV_BUFFER_SIZE: usize = 8 * 1024;

/// Settings for a [`NetlinkManager`](super::NetlinkManager).
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use wificond::netlink::TransportConfig;
///
/// let config = TransportConfig::default()
///     .sync_timeout(Duration::from_millis(500))
///     .multicast_groups(["scan", "mlme"]);
/// assert_eq!(config.family_name, "nl80211");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct TransportConfig {
    /// Generic netlink family to discover at startup.
    pub family_name: String,
    /// Wall-clock budget for a synchronous exchange, across all poll wakeups.
    pub sync_timeout: Duration,
    /// Receive buffer size; datagrams larger than this are lost.
    pub recv_buffer_size: usize,
    /// Multicast groups joined on the asynchronous socket at startup.
    pub multicast_groups: Vec<String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            family_name: "nl80211".to_string(),
            sync_timeout: DEFAULT_SYNC_TIMEOUT,
            recv_buffer_size: DEFAULT_RECV_BUFFER_SIZE,
            multicast_groups: vec!["scan".to_string()],
        }
    }
}

impl TransportConfig {
    /// Set the family to discover.
    pub fn family_name(mut self, name: impl Into<String>) -> Self {
        self.family_name = name.into();
        self
    }

    /// Set the synchronous exchange budget.
    pub fn sync_timeout(mut self, timeout: Duration) -> Self {
        self.sync_timeout = timeout;
        self
    }

    /// Set the receive buffer size.
    pub fn recv_buffer_size(mut self, size: usize) -> Self {
        self.recv_buffer_size = size;
        self
    }

    /// Replace the multicast groups joined at startup.
    pub fn multicast_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.multicast_groups = groups.into_iter().map(Into::into).collect();
        self
    }
}

//! Common test utilities for integration tests.
//!
//! Provides a started transport on the test's runtime and macros that skip
//! tests on hosts without root or without a wireless device.

use std::rc::Rc;

use tokio::task::LocalSet;
use wificond::Result;
use wificond::netlink::{NetlinkManager, TokioEventLoop, TransportConfig};
use wificond::nl80211::utils;

/// A started transport and the set servicing its asynchronous socket.
///
/// Run test bodies inside `local.run_until(..)` so the socket watch is
/// polled.
pub struct TestTransport {
    pub manager: NetlinkManager,
    pub local: Rc<LocalSet>,
}

impl TestTransport {
    /// Build a transport with `config`. Nothing is opened yet.
    pub fn new(config: TransportConfig) -> Self {
        let local = Rc::new(LocalSet::new());
        let manager = NetlinkManager::new(Rc::new(TokioEventLoop::new(local.clone())), config);
        Self { manager, local }
    }
}

/// Start a default transport. Must be called from inside the runtime.
pub fn started() -> Result<TestTransport> {
    let transport = TestTransport::new(TransportConfig::default());
    transport.manager.start()?;
    Ok(transport)
}

/// Check if running as root.
pub fn is_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

/// Whether the kernel reports at least one wiphy.
pub fn has_wiphy(manager: &NetlinkManager) -> bool {
    utils::get_wiphy_index(manager).is_ok()
}

/// Skip the test if not running as root.
#[macro_export]
macro_rules! require_root {
    () => {
        if !crate::common::is_root() {
            eprintln!("Skipping test: requires root");
            return Ok(());
        }
    };
}

/// Skip the test if the host has no wireless device.
#[macro_export]
macro_rules! require_wiphy {
    ($manager:expr) => {
        if !crate::common::has_wiphy($manager) {
            eprintln!("Skipping test: no wireless device");
            return Ok(());
        }
    };
}

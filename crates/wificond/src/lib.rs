//! Netlink transport and nl80211 codec for a Wi-Fi daemon.
//!
//! This crate talks to the kernel's nl80211 generic netlink family: it
//! discovers the family, sends requests over a synchronous socket with a
//! bounded wait, and routes asynchronous replies and scan notifications
//! through a host event loop.
//!
//! # Features
//!
//! - `serde` - Serialize result types and deserialize [`netlink::TransportConfig`]
//! - `integration` - Build the tests that need real hardware and root
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
//! let manager = NetlinkManager::new(
//!     Rc::new(TokioEventLoop::new(local.clone())),
//!     TransportConfig::default(),
//! );
//! manager.start()?;
//!
//! let wiphy = utils::get_wiphy_index(&manager)?;
//! let iface = utils::get_interface_info(&manager, wiphy)?;
//! for bss in scan::get_scan_results(&manager, iface.index)? {
//!     println!("{}", bss);
//! }
//! # Ok(())
//! # }
//! ```

pub mod netlink;
pub mod nl80211;

pub use netlink::{Error, Result};

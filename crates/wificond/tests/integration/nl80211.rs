//! nl80211 queries against the first wireless device on the host.
//!
//! Every test is skipped on hosts without one.

use std::time::Duration;

use tokio_stream::StreamExt;
use wificond::netlink::NetlinkTransport;
use wificond::nl80211::{ScanNotification, scan, utils};
use wificond::{Error, Result};

use crate::common::started;

/// Start the transport, or skip when nl80211 is not registered.
macro_rules! transport_or_skip {
    () => {
        match started() {
            Err(Error::FamilyNotFound { .. }) => {
                eprintln!("Skipping test: nl80211 not registered");
                return Ok(());
            }
            other => other?,
        }
    };
}

#[tokio::test]
async fn test_get_interface_info() -> Result<()> {
    require_root!();
    let transport = transport_or_skip!();
    let manager = &transport.manager;
    require_wiphy!(manager);

    let wiphy = utils::get_wiphy_index(manager)?;
    let iface = utils::get_interface_info(manager, wiphy)?;
    assert!(!iface.name.is_empty());
    assert_ne!(iface.name, "p2p0");
    assert!(iface.index > 0);
    Ok(())
}

#[tokio::test]
async fn test_get_wiphy_info() -> Result<()> {
    require_root!();
    let transport = transport_or_skip!();
    let manager = &transport.manager;
    require_wiphy!(manager);

    let wiphy = utils::get_wiphy_index(manager)?;
    let info = utils::get_wiphy_info(manager, wiphy)?;
    assert!(info.scan_capabilities.max_num_scan_ssids > 0);

    let bands = &info.bands;
    assert!(!(bands.band_2g.is_empty() && bands.band_5g.is_empty() && bands.band_dfs.is_empty()));
    assert!(bands.band_2g.iter().all(|f| (2400..=2500).contains(f)));
    assert!(bands.band_5g.iter().chain(&bands.band_dfs).all(|f| *f > 2500));
    Ok(())
}

#[tokio::test]
async fn test_scan_results_belong_to_interface() -> Result<()> {
    require_root!();
    let transport = transport_or_skip!();
    let manager = &transport.manager;
    require_wiphy!(manager);

    let wiphy = utils::get_wiphy_index(manager)?;
    let iface = utils::get_interface_info(manager, wiphy)?;
    match scan::get_scan_results(manager, iface.index) {
        Ok(results) => {
            for bss in results {
                assert!(bss.frequency > 0);
                assert!(!bss.info_element.is_empty());
            }
        }
        // An idle interface has nothing cached.
        Err(Error::EmptyResponse) => {}
        // A down interface refuses the dump.
        Err(e) if e.errno() == Some(libc::ENETDOWN) => {}
        Err(e) => return Err(e),
    }
    Ok(())
}

#[tokio::test]
async fn test_scan_and_wait_for_notification() -> Result<()> {
    require_root!();
    let transport = transport_or_skip!();
    let manager = transport.manager.clone();
    require_wiphy!(&manager);

    let wiphy = utils::get_wiphy_index(&manager)?;
    let iface = utils::get_interface_info(&manager, wiphy)?;

    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    manager.subscribe_scan_result_notification(
        iface.index,
        Box::new(move |n: &ScanNotification| {
            let _ = tx.send(n.clone());
        }),
    );

    match scan::trigger_scan(&manager, iface.index, &[Vec::new()], &[], false) {
        Ok(()) => {}
        // Interface down or a scan already running.
        Err(e) if matches!(e.errno(), Some(libc::ENETDOWN) | Some(libc::EBUSY)) => {
            eprintln!("Skipping test: cannot scan now ({})", e);
            return Ok(());
        }
        Err(e) => return Err(e),
    }

    let mut notifications = tokio_stream::wrappers::UnboundedReceiverStream::new(rx);
    let notification = transport
        .local
        .run_until(tokio::time::timeout(Duration::from_secs(15), notifications.next()))
        .await;
    manager.unsubscribe_scan_result_notification(iface.index);

    if let Ok(Some(n)) = notification {
        assert_eq!(n.ifindex, iface.index);
        // A wildcard probe is reported as one empty SSID.
        if !n.aborted {
            assert!(n.ssids.iter().any(Vec::is_empty));
        }
    } else {
        // Some drivers are slow; a missed notification is not a failure here.
    }
    Ok(())
}

#[tokio::test]
async fn test_stop_scheduled_scan_when_idle() -> Result<()> {
    require_root!();
    let transport = transport_or_skip!();
    let manager = &transport.manager;
    require_wiphy!(manager);

    let wiphy = utils::get_wiphy_index(manager)?;
    let iface = utils::get_interface_info(manager, wiphy)?;
    match scan::stop_scheduled_scan(manager, iface.index) {
        Ok(()) => Ok(()),
        Err(e) if e.errno() == Some(libc::EOPNOTSUPP) => Ok(()),
        Err(e) => Err(e),
    }
}

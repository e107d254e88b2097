//! Transport startup against the real generic netlink controller.

use std::time::Duration;

use wificond::netlink::{GENL_ID_CTRL, NetlinkTransport, TransportConfig};
use wificond::{Error, Result};

use crate::common::{TestTransport, started};

#[tokio::test]
async fn test_start_discovers_nl80211() -> Result<()> {
    require_root!();

    let transport = TestTransport::new(TransportConfig::default());
    let local = transport.local.clone();
    local
        .run_until(async move {
            let manager = &transport.manager;
            // cfg80211 may not be loaded on a wireless-less host.
            match manager.start() {
                Err(Error::FamilyNotFound { .. }) => {
                    eprintln!("Skipping test: nl80211 not registered");
                    return Ok(());
                }
                other => other?,
            }
            assert!(manager.is_started());

            let id = manager.family_id()?;
            assert!(id > GENL_ID_CTRL);

            let family = manager.family("nl80211").expect("family cached after start");
            assert_eq!(family.id, id);
            assert!(family.group("scan").is_some());
            assert!(family.group("mlme").is_some());

            // Second start is a no-op.
            manager.start()?;
            Ok(())
        })
        .await
}

#[tokio::test]
async fn test_unknown_family() -> Result<()> {
    require_root!();

    let transport =
        TestTransport::new(TransportConfig::default().family_name("wificond_no_such_family"));
    let local = transport.local.clone();
    local
        .run_until(async move {
            let err = transport.manager.start().unwrap_err();
            let Error::FamilyNotFound { name } = &err else {
                panic!("expected FamilyNotFound, got {:?}", err);
            };
            assert_eq!(name, "wificond_no_such_family");
            assert!(!transport.manager.is_started());
            Ok(())
        })
        .await
}

#[tokio::test]
async fn test_unknown_group() -> Result<()> {
    require_root!();

    let transport = TestTransport::new(
        TransportConfig::default()
            .multicast_groups(["scan", "no-such-group"])
            .sync_timeout(Duration::from_millis(500)),
    );
    let local = transport.local.clone();
    local
        .run_until(async move {
            match transport.manager.start() {
                Err(Error::FamilyNotFound { .. }) => Ok(()),
                Err(Error::GroupNotFound { group, .. }) => {
                    assert_eq!(group, "no-such-group");
                    Ok(())
                }
                other => panic!("expected GroupNotFound, got {:?}", other),
            }
        })
        .await
}

#[tokio::test]
async fn test_subscribe_extra_groups() -> Result<()> {
    require_root!();

    let transport = match started() {
        Err(Error::FamilyNotFound { .. }) => return Ok(()),
        other => other?,
    };
    transport.manager.subscribe("mlme")?;
    transport.manager.unsubscribe("mlme")?;
    assert!(matches!(
        transport.manager.subscribe("no-such-group"),
        Err(Error::GroupNotFound { .. })
    ));
    Ok(())
}

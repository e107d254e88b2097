//! Scanning: one-shot and scheduled scans, scan result dumps and the
//! notifications the kernel multicasts when a scan ends.

use std::time::Duration;

use tracing::{debug, error, warn};

use super::ie::ssid_from_info_elements;
use super::types::{MacAddr, ScanNotification, ScanResult};
use super::utils::collect;
use super::{BssAttr, BssStatus, Nl80211Attr, Nl80211Cmd, SCAN_FLAG_RANDOM_ADDR, SchedScanMatchAttr};
use crate::netlink::attr::{AttrIter, find, find_value, get};
use crate::netlink::message::{NLM_F_ACK, NLM_F_DUMP, NlMsgType};
use crate::netlink::{Attribute, Error, NetlinkTransport, NlPacket, PacketKind, Result};

/// Build a container whose children are typed by their position.
fn indexed<'a, I>(kind: u16, items: I) -> Result<Attribute>
where
    I: IntoIterator<Item = &'a [u8]>,
{
    let mut container = Attribute::nested(kind);
    for (i, item) in items.into_iter().enumerate() {
        container.add_child(&Attribute::new(i as u16, item)?)?;
    }
    Ok(container)
}

fn frequencies(freqs: &[u32]) -> Result<Attribute> {
    let mut container = Attribute::nested(Nl80211Attr::ScanFrequencies as u16);
    for (i, freq) in freqs.iter().enumerate() {
        container.add_child(&Attribute::encode(i as u16, freq)?)?;
    }
    Ok(container)
}

/// Expect exactly one reply, an acknowledgement.
fn expect_ack(responses: &[NlPacket], operation: &str) -> Result<()> {
    if responses.len() > 1 {
        warn!(operation, count = responses.len(), "expected a single ack");
    }
    let reply = responses.first().ok_or(Error::EmptyResponse)?;
    match reply.kind() {
        PacketKind::Ack => Ok(()),
        PacketKind::Error(errno) => {
            let err = Error::from_errno_with_context(-errno, operation);
            error!(%err, "kernel rejected request");
            Err(err)
        }
        _ => {
            error!(operation, kind = reply.message_type(), "expected an ack");
            Err(Error::UnexpectedType {
                expected: NlMsgType::ERROR,
                actual: reply.message_type(),
            })
        }
    }
}

/// Start a one-shot scan on `interface_index`.
///
/// An empty `ssids` list still sends an empty `SCAN_SSIDS` container, which
/// the kernel treats as a passive scan; pass a single empty SSID for a
/// wildcard active scan. An empty `freqs` list scans every channel.
pub fn trigger_scan<T: NetlinkTransport + ?Sized>(
    transport: &T,
    interface_index: u32,
    ssids: &[Vec<u8>],
    freqs: &[u32],
    random_mac: bool,
) -> Result<()> {
    let mut request = transport.new_request(Nl80211Cmd::TriggerScan as u8)?;
    request.add_flag(NLM_F_ACK);
    request.add_value(Nl80211Attr::Ifindex as u16, &interface_index)?;
    request.add_attribute(&indexed(
        Nl80211Attr::ScanSsids as u16,
        ssids.iter().map(Vec::as_slice),
    )?);
    if !freqs.is_empty() {
        request.add_attribute(&frequencies(freqs)?);
    }
    if random_mac {
        request.add_value(Nl80211Attr::ScanFlags as u16, &SCAN_FLAG_RANDOM_ADDR)?;
    }

    let responses = collect(transport, &request, "trigger scan")?;
    expect_ack(&responses, "trigger scan")
}

/// Start a scheduled scan that wakes the host only for matching networks.
///
/// Every SSID in `match_ssids` forms a match set with `rssi_threshold`
/// (dBm).
#[allow(clippy::too_many_arguments)]
pub fn start_scheduled_scan<T: NetlinkTransport + ?Sized>(
    transport: &T,
    interface_index: u32,
    interval: Duration,
    rssi_threshold: i32,
    random_mac: bool,
    scan_ssids: &[Vec<u8>],
    match_ssids: &[Vec<u8>],
    freqs: &[u32],
) -> Result<()> {
    let interval_ms = u32::try_from(interval.as_millis()).map_err(|_| {
        Error::InvalidAttribute(format!("scheduled scan interval {:?} too long", interval))
    })?;

    let mut request = transport.new_request(Nl80211Cmd::StartSchedScan as u8)?;
    request.add_flag(NLM_F_ACK);
    request.add_value(Nl80211Attr::Ifindex as u16, &interface_index)?;
    request.add_value(Nl80211Attr::SchedScanInterval as u16, &interval_ms)?;
    request.add_attribute(&indexed(
        Nl80211Attr::ScanSsids as u16,
        scan_ssids.iter().map(Vec::as_slice),
    )?);

    let mut matches = Attribute::nested(Nl80211Attr::SchedScanMatch as u16);
    for (i, ssid) in match_ssids.iter().enumerate() {
        let mut set = Attribute::nested(i as u16);
        set.add_child(&Attribute::new(SchedScanMatchAttr::Ssid as u16, ssid)?)?;
        set.add_child(&Attribute::encode(SchedScanMatchAttr::Rssi as u16, &rssi_threshold)?)?;
        matches.add_child(&set)?;
    }
    request.add_attribute(&matches);

    if !freqs.is_empty() {
        request.add_attribute(&frequencies(freqs)?);
    }
    if random_mac {
        request.add_value(Nl80211Attr::ScanFlags as u16, &SCAN_FLAG_RANDOM_ADDR)?;
    }

    let responses = collect(transport, &request, "start scheduled scan")?;
    expect_ack(&responses, "start scheduled scan")
}

/// Stop the scheduled scan on `interface_index`.
///
/// Succeeds if none was running (`ENOENT`). A missing interface is still an
/// error.
pub fn stop_scheduled_scan<T: NetlinkTransport + ?Sized>(
    transport: &T,
    interface_index: u32,
) -> Result<()> {
    let mut request = transport.new_request(Nl80211Cmd::StopSchedScan as u8)?;
    request.add_flag(NLM_F_ACK);
    request.add_value(Nl80211Attr::Ifindex as u16, &interface_index)?;

    let responses = collect(transport, &request, "stop scheduled scan")?;
    match expect_ack(&responses, "stop scheduled scan") {
        Err(err) if err.errno() == Some(libc::ENOENT) => {
            debug!(ifindex = interface_index, "no scheduled scan running");
            Ok(())
        }
        other => other,
    }
}

/// Dump the kernel's scan results for `interface_index`.
///
/// Replies for other interfaces, error replies and malformed BSS entries
/// are logged and skipped.
pub fn get_scan_results<T: NetlinkTransport + ?Sized>(
    transport: &T,
    interface_index: u32,
) -> Result<Vec<ScanResult>> {
    let mut request = transport.new_request(Nl80211Cmd::GetScan as u8)?;
    request.add_flag(NLM_F_DUMP);
    request.add_value(Nl80211Attr::Ifindex as u16, &interface_index)?;

    let family_id = transport.family_id()?;
    let mut results = Vec::new();
    for packet in collect(transport, &request, "get scan results")? {
        if let PacketKind::Error(errno) = packet.kind() {
            let err = Error::from_errno(-errno);
            error!(%err, "error reply in scan result dump");
            continue;
        }
        if packet.message_type() != family_id {
            error!(kind = packet.message_type(), "wrong message type in scan result dump");
            continue;
        }
        match packet.get_attribute_value::<u32>(Nl80211Attr::Ifindex as u16) {
            Some(index) if index == interface_index => {}
            Some(index) => {
                error!(index, expected = interface_index, "scan result for another interface");
                continue;
            }
            None => {
                error!("scan result without interface index");
                continue;
            }
        }
        match parse_scan_result(&packet) {
            Ok(result) => results.push(result),
            Err(err) => warn!(%err, "ignoring invalid scan result"),
        }
    }
    Ok(results)
}

/// Decode one `NEW_SCAN_RESULTS` dump entry.
pub fn parse_scan_result(packet: &NlPacket) -> Result<ScanResult> {
    if packet.command() != Nl80211Cmd::NewScanResults as u8 {
        return Err(Error::UnexpectedCommand {
            expected: Nl80211Cmd::NewScanResults as u8,
            actual: packet.command(),
        });
    }
    let bss = packet
        .get_attribute(Nl80211Attr::Bss as u16)
        .ok_or(Error::MissingAttribute("NL80211_ATTR_BSS"))?;

    let bssid = find(bss, BssAttr::Bssid as u16)
        .ok_or(Error::MissingAttribute("NL80211_BSS_BSSID"))
        .and_then(MacAddr::from_slice)?;
    let frequency = find_value::<u32>(bss, BssAttr::Frequency as u16)
        .ok_or(Error::MissingAttribute("NL80211_BSS_FREQUENCY"))?;
    let info_element = find(bss, BssAttr::InformationElements as u16)
        .ok_or(Error::MissingAttribute("NL80211_BSS_INFORMATION_ELEMENTS"))?
        .to_vec();
    let ssid = ssid_from_info_elements(&info_element)?;
    let tsf = find_value::<u64>(bss, BssAttr::Tsf as u16)
        .ok_or(Error::MissingAttribute("NL80211_BSS_TSF"))?;
    let signal_mbm = find_value::<i32>(bss, BssAttr::SignalMbm as u16)
        .ok_or(Error::MissingAttribute("NL80211_BSS_SIGNAL_MBM"))?;
    let capability = find_value::<u16>(bss, BssAttr::Capability as u16).unwrap_or_default();
    let associated = find_value::<u32>(bss, BssAttr::Status as u16)
        .is_some_and(|status| status == BssStatus::Associated as u32);

    Ok(ScanResult {
        ssid,
        bssid,
        info_element,
        frequency,
        signal_mbm,
        tsf,
        capability,
        associated,
    })
}

/// Decode a `NEW_SCAN_RESULTS` or `SCAN_ABORTED` multicast.
///
/// `None` if the message names no interface.
pub fn parse_scan_notification(packet: &NlPacket) -> Option<ScanNotification> {
    let ifindex = packet.get_attribute_value::<u32>(Nl80211Attr::Ifindex as u16)?;
    let ssids = packet
        .get_attribute(Nl80211Attr::ScanSsids as u16)
        .map(nested_ssids)
        .unwrap_or_default();
    let frequencies = packet
        .get_nested(Nl80211Attr::ScanFrequencies as u16)
        .map(|iter| iter.filter_map(|(_, freq)| get::u32(freq).ok()).collect())
        .unwrap_or_default();
    Some(ScanNotification {
        ifindex,
        aborted: packet.command() == Nl80211Cmd::ScanAborted as u8,
        ssids,
        frequencies,
    })
}

/// SSIDs carried in a container attribute, in order.
pub fn nested_ssids(data: &[u8]) -> Vec<Vec<u8>> {
    AttrIter::new(data).map(|(_, ssid)| ssid.to_vec()).collect()
}

//! Wiphy, interface and station queries.

use tracing::{debug, error, trace, warn};

use super::types::{BandInfo, InterfaceInfo, MacAddr, StationInfo, WiphyFeatures, WiphyInfo};
use super::{
    BandAttr, FrequencyAttr, Nl80211Attr, Nl80211Cmd, P2P_DEVICE_NAME, RateInfoAttr, StaInfoAttr,
};
use crate::netlink::attr::{AttrIter, find, find_value};
use crate::netlink::message::NLM_F_DUMP;
use crate::netlink::{AttrValue, Attribute, Error, NetlinkTransport, NlPacket, PacketKind, Result};

/// Reject a reply that is a kernel error, belongs to another family, or
/// carries the wrong command.
pub(crate) fn check_reply(
    packet: &NlPacket,
    family_id: u16,
    expected: Nl80211Cmd,
    operation: &str,
) -> Result<()> {
    if let PacketKind::Error(errno) = packet.kind() {
        let err = Error::from_errno_with_context(-errno, operation);
        error!(%err, "kernel returned an error");
        return Err(err);
    }
    if packet.message_type() != family_id {
        error!(operation, kind = packet.message_type(), "wrong message type in reply");
        return Err(Error::UnexpectedType {
            expected: family_id,
            actual: packet.message_type(),
        });
    }
    if packet.command() != expected as u8 {
        error!(operation, cmd = packet.command(), "wrong command in reply");
        return Err(Error::UnexpectedCommand {
            expected: expected as u8,
            actual: packet.command(),
        });
    }
    Ok(())
}

/// Send a request and require at least one reply.
pub(crate) fn collect<T: NetlinkTransport + ?Sized>(
    transport: &T,
    request: &NlPacket,
    operation: &str,
) -> Result<Vec<NlPacket>> {
    let responses = transport.send_and_collect(request).inspect_err(|e| {
        error!(operation, error = %e, "request failed");
    })?;
    if responses.is_empty() {
        error!(operation, "unexpected empty response from kernel");
        return Err(Error::EmptyResponse);
    }
    Ok(responses)
}

/// Index of the wiphy reported by a full wiphy dump.
///
/// Every reply must be a well-formed `NEW_WIPHY` carrying the index; the
/// last one wins.
pub fn get_wiphy_index<T: NetlinkTransport + ?Sized>(transport: &T) -> Result<u32> {
    let mut request = transport.new_request(Nl80211Cmd::GetWiphy as u8)?;
    request.add_flag(NLM_F_DUMP);

    let family_id = transport.family_id()?;
    let mut wiphy = None;
    for packet in collect(transport, &request, "get wiphy")? {
        check_reply(&packet, family_id, Nl80211Cmd::NewWiphy, "get wiphy")?;
        let index = packet
            .get_attribute_value::<u32>(Nl80211Attr::Wiphy as u16)
            .ok_or(Error::MissingAttribute("NL80211_ATTR_WIPHY"))?;
        wiphy = Some(index);
    }
    wiphy.ok_or(Error::EmptyResponse)
}

/// First usable network interface on `wiphy_index`.
///
/// Entries without a name (wireless devices with no netdev) and the
/// `p2p0` device are skipped.
pub fn get_interface_info<T: NetlinkTransport + ?Sized>(
    transport: &T,
    wiphy_index: u32,
) -> Result<InterfaceInfo> {
    let mut request = transport.new_request(Nl80211Cmd::GetInterface as u8)?;
    request.add_flag(NLM_F_DUMP);
    request.add_value(Nl80211Attr::Wiphy as u16, &wiphy_index)?;

    let family_id = transport.family_id()?;
    for packet in collect(transport, &request, "get interface")? {
        check_reply(&packet, family_id, Nl80211Cmd::NewInterface, "get interface")?;

        let Some(name) = packet.get_attribute_value::<String>(Nl80211Attr::Ifname as u16) else {
            debug!(
                wdev = packet.get_attribute_value::<u64>(Nl80211Attr::Wdev as u16),
                "skipping interface without a name"
            );
            continue;
        };
        if name == P2P_DEVICE_NAME {
            debug!("skipping {} reported as a station interface", name);
            continue;
        }
        let Some(index) = packet.get_attribute_value::<u32>(Nl80211Attr::Ifindex as u16) else {
            debug!(name, "skipping interface without an index");
            continue;
        };
        let mac = match packet.get_attribute(Nl80211Attr::Mac as u16).map(MacAddr::from_slice) {
            Some(Ok(mac)) => mac,
            Some(Err(e)) => {
                warn!(name, error = %e, "ignoring malformed interface MAC address");
                MacAddr::default()
            }
            None => {
                warn!(name, "interface has no MAC address");
                MacAddr::default()
            }
        };
        return Ok(InterfaceInfo { name, index, mac });
    }

    error!(wiphy = wiphy_index, "no usable interface reported by kernel");
    Err(Error::NoUsableInterface { wiphy: wiphy_index })
}

/// Bands, scan limits and features of `wiphy_index`.
///
/// Uses a split dump; the attributes of every fragment for the wiphy are
/// merged.
pub fn get_wiphy_info<T: NetlinkTransport + ?Sized>(
    transport: &T,
    wiphy_index: u32,
) -> Result<WiphyInfo> {
    let mut request = transport.new_request(Nl80211Cmd::GetWiphy as u8)?;
    request.add_flag(NLM_F_DUMP);
    request.add_value(Nl80211Attr::Wiphy as u16, &wiphy_index)?;
    request.add_attribute(&Attribute::flag(Nl80211Attr::SplitWiphyDump as u16));

    let family_id = transport.family_id()?;
    let mut info = WiphyInfo::default();
    let mut has_scan_capabilities = false;
    let mut matched = 0usize;

    for packet in collect(transport, &request, "get wiphy info")? {
        check_reply(&packet, family_id, Nl80211Cmd::NewWiphy, "get wiphy info")?;
        match packet.get_attribute_value::<u32>(Nl80211Attr::Wiphy as u16) {
            Some(index) if index == wiphy_index => {}
            other => {
                trace!(wiphy = ?other, "skipping fragment for another wiphy");
                continue;
            }
        }
        matched += 1;

        for (kind, payload) in packet.attributes() {
            match kind {
                k if k == Nl80211Attr::WiphyBands as u16 => parse_bands(payload, &mut info.bands),
                k if k == Nl80211Attr::MaxNumScanSsids as u16 => {
                    info.scan_capabilities.max_num_scan_ssids = decode(payload, "max scan ssids")?;
                    has_scan_capabilities = true;
                }
                k if k == Nl80211Attr::MaxNumSchedScanSsids as u16 => {
                    info.scan_capabilities.max_num_sched_scan_ssids =
                        decode(payload, "max sched scan ssids")?;
                }
                k if k == Nl80211Attr::MaxMatchSets as u16 => {
                    info.scan_capabilities.max_match_sets = decode(payload, "max match sets")?;
                }
                k if k == Nl80211Attr::FeatureFlags as u16 => {
                    info.features = WiphyFeatures::from_flags(decode(payload, "feature flags")?);
                }
                _ => {}
            }
        }
    }

    if matched == 0 {
        error!(wiphy = wiphy_index, "no reply for requested wiphy");
        return Err(Error::EmptyResponse);
    }
    if !has_scan_capabilities {
        return Err(Error::MissingAttribute("NL80211_ATTR_MAX_NUM_SCAN_SSIDS"));
    }
    debug!(
        wiphy = wiphy_index,
        band_2g = info.bands.band_2g.len(),
        band_5g = info.bands.band_5g.len(),
        band_dfs = info.bands.band_dfs.len(),
        "parsed wiphy info"
    );
    Ok(info)
}

fn decode<V: AttrValue>(payload: &[u8], what: &str) -> Result<V> {
    V::from_payload(payload).map_err(|_| {
        Error::InvalidAttribute(format!("{}: unexpected payload of {} bytes", what, payload.len()))
    })
}

/// Walk `WIPHY_BANDS`: band entries, each holding a list of channels.
fn parse_bands(data: &[u8], bands: &mut BandInfo) {
    for (band, band_data) in AttrIter::new(data) {
        let Some(freqs) = find(band_data, BandAttr::Freqs as u16) else {
            trace!(band, "band without frequency list");
            continue;
        };
        for (_, channel) in AttrIter::new(freqs) {
            let Some(freq) = find_value::<u32>(channel, FrequencyAttr::Freq as u16) else {
                continue;
            };
            if find(channel, FrequencyAttr::Disabled as u16).is_some() {
                trace!(freq, "skipping disabled channel");
                continue;
            }
            let dfs = find(channel, FrequencyAttr::DfsState as u16).is_some();
            bands.insert(freq, dfs);
        }
    }
}

/// Transmit statistics for the station `mac` on `interface_index`.
pub fn get_station_info<T: NetlinkTransport + ?Sized>(
    transport: &T,
    interface_index: u32,
    mac: MacAddr,
) -> Result<StationInfo> {
    let mut request = transport.new_request(Nl80211Cmd::GetStation as u8)?;
    request.add_value(Nl80211Attr::Ifindex as u16, &interface_index)?;
    request.add_value(Nl80211Attr::Mac as u16, &mac.octets().to_vec())?;

    let family_id = transport.family_id()?;
    let responses = collect(transport, &request, "get station")?;
    if responses.len() > 1 {
        warn!(count = responses.len(), "unexpected number of station replies");
    }
    let packet = &responses[0];
    check_reply(packet, family_id, Nl80211Cmd::NewStation, "get station")?;

    let sta_info = packet
        .get_attribute(Nl80211Attr::StaInfo as u16)
        .ok_or(Error::MissingAttribute("NL80211_ATTR_STA_INFO"))?;

    let station_tx_packets = find_value::<u32>(sta_info, StaInfoAttr::TxPackets as u16)
        .ok_or(Error::MissingAttribute("NL80211_STA_INFO_TX_PACKETS"))?;
    let station_tx_failed = find_value::<u32>(sta_info, StaInfoAttr::TxFailed as u16)
        .ok_or(Error::MissingAttribute("NL80211_STA_INFO_TX_FAILED"))?;
    let current_rssi = find_value::<i8>(sta_info, StaInfoAttr::Signal as u16)
        .ok_or(Error::MissingAttribute("NL80211_STA_INFO_SIGNAL"))?;
    let rate = find(sta_info, StaInfoAttr::TxBitrate as u16)
        .ok_or(Error::MissingAttribute("NL80211_STA_INFO_TX_BITRATE"))?;
    // The 32-bit field is authoritative; the 16-bit one saturates.
    let station_tx_bitrate = find_value::<u32>(rate, RateInfoAttr::Bitrate32 as u16)
        .or_else(|| find_value::<u16>(rate, RateInfoAttr::Bitrate as u16).map(u32::from))
        .ok_or(Error::MissingAttribute("NL80211_RATE_INFO_BITRATE"))?;

    Ok(StationInfo {
        station_tx_packets,
        station_tx_failed,
        station_tx_bitrate,
        current_rssi,
    })
}

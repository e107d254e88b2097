//! Generic Netlink header and control-family discovery.
//!
//! GENL messages have an additional header after the standard netlink header:
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │ nlmsghdr (16 bytes)                     │
//! │   nlmsg_len, nlmsg_type (family_id),    │
//! │   nlmsg_flags, nlmsg_seq, nlmsg_pid     │
//! ├─────────────────────────────────────────┤
//! │ genlmsghdr (4 bytes)                    │
//! │   cmd (u8), version (u8), reserved (u16)│
//! ├─────────────────────────────────────────┤
//! │ Attributes (TLV format)                 │
//! └─────────────────────────────────────────┘
//! ```
//!
//! Family ids are assigned by the kernel at module load time, so every
//! session starts by asking the control family (fixed id `0x10`) for the id
//! and multicast groups of the family it wants.

use std::collections::HashMap;

use tracing::warn;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use super::attr::{AttrIter, get};
use super::error::{Error, Result};
use super::packet::{NlPacket, PacketKind};

/// Generic Netlink message header.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct GenlMsgHdr {
    /// Command identifier (family-specific)
    pub cmd: u8,
    /// Interface version
    pub version: u8,
    /// Reserved for future use
    pub reserved: u16,
}

/// Size of the GENL header in bytes.
pub const GENL_HDRLEN: usize = std::mem::size_of::<GenlMsgHdr>();

/// Version written into outgoing requests.
pub const GENL_VERSION: u8 = 1;

impl GenlMsgHdr {
    /// Create a new GENL header with the given command and version.
    #[inline]
    pub const fn new(cmd: u8, version: u8) -> Self {
        Self {
            cmd,
            version,
            reserved: 0,
        }
    }

    /// Read a header from the start of `data`.
    ///
    /// Returns `None` if the slice is too short.
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        Self::read_from_prefix(data).ok().map(|(hdr, _)| hdr)
    }

    /// Get the header as a byte slice.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        <Self as IntoBytes>::as_bytes(self)
    }
}

// Control family constants (fixed, not dynamically assigned)
pub const GENL_ID_CTRL: u16 = 0x10;

/// Control family commands
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CtrlCmd {
    Unspec = 0,
    NewFamily = 1,
    DelFamily = 2,
    GetFamily = 3,
}

/// Control family attributes
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CtrlAttr {
    Unspec = 0,
    FamilyId = 1,
    FamilyName = 2,
    Version = 3,
    HdrSize = 4,
    MaxAttr = 5,
    Ops = 6,
    McastGroups = 7,
}

/// Control family multicast group attributes
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CtrlAttrMcastGrp {
    Unspec = 0,
    Name = 1,
    Id = 2,
}

/// Registry entry for a discovered Generic Netlink family.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FamilyInfo {
    /// Family name as registered in the kernel.
    pub name: String,
    /// Dynamically assigned family ID (used as nlmsg_type).
    pub id: u16,
    /// Family version.
    pub version: u32,
    /// Multicast groups: name -> group ID.
    pub mcast_groups: HashMap<String, u32>,
}

impl FamilyInfo {
    /// Look up a multicast group id by name.
    pub fn group(&self, name: &str) -> Option<u32> {
        self.mcast_groups.get(name).copied()
    }

    /// Parse a `CTRL_CMD_NEWFAMILY` reply.
    pub fn from_packet(packet: &NlPacket) -> Result<Self> {
        if let PacketKind::Error(errno) = packet.kind() {
            return Err(Error::from_errno(-errno).with_context("get family"));
        }
        if packet.message_type() != GENL_ID_CTRL {
            return Err(Error::UnexpectedType {
                expected: GENL_ID_CTRL,
                actual: packet.message_type(),
            });
        }
        if packet.command() != CtrlCmd::NewFamily as u8 {
            return Err(Error::UnexpectedCommand {
                expected: CtrlCmd::NewFamily as u8,
                actual: packet.command(),
            });
        }

        let mut info = FamilyInfo::default();
        let mut id = None;
        let mut name = None;

        for (attr_type, payload) in packet.attributes() {
            match attr_type {
                t if t == CtrlAttr::FamilyId as u16 => {
                    id = Some(get::u16(payload)?);
                }
                t if t == CtrlAttr::FamilyName as u16 => {
                    name = Some(get::string(payload)?.to_string());
                }
                t if t == CtrlAttr::Version as u16 => {
                    info.version = get::u32(payload)?;
                }
                t if t == CtrlAttr::McastGroups as u16 => {
                    info.mcast_groups = parse_mcast_groups(payload)?;
                }
                _ => {}
            }
        }

        info.id = id.ok_or(Error::MissingAttribute("CTRL_ATTR_FAMILY_ID"))?;
        info.name = name.ok_or(Error::MissingAttribute("CTRL_ATTR_FAMILY_NAME"))?;
        Ok(info)
    }
}

/// Build a `CTRL_CMD_GETFAMILY` request for `name`.
pub fn get_family_request(name: &str, sequence: u32, pid: u32) -> Result<NlPacket> {
    let mut request = NlPacket::new(GENL_ID_CTRL, CtrlCmd::GetFamily as u8, sequence, pid);
    request.add_value(CtrlAttr::FamilyName as u16, &name.to_string())?;
    Ok(request)
}

/// Parse `CTRL_ATTR_MCAST_GROUPS`.
///
/// The kernel numbers the group entries 1..=n (index 0 is never used), but
/// the numbering carries no meaning, so every entry is read regardless of
/// its type.
pub fn parse_mcast_groups(data: &[u8]) -> Result<HashMap<String, u32>> {
    let mut groups = HashMap::new();

    for (_group_idx, group_payload) in AttrIter::new(data) {
        let mut name: Option<String> = None;
        let mut grp_id: Option<u32> = None;

        for (attr_type, payload) in AttrIter::new(group_payload) {
            match attr_type {
                t if t == CtrlAttrMcastGrp::Name as u16 => {
                    name = Some(get::string(payload)?.to_string());
                }
                t if t == CtrlAttrMcastGrp::Id as u16 => {
                    grp_id = Some(get::u32(payload)?);
                }
                _ => {}
            }
        }

        match (name, grp_id) {
            (Some(name), Some(id)) => {
                groups.insert(name, id);
            }
            (name, id) => warn!(?name, ?id, "incomplete multicast group entry"),
        }
    }

    Ok(groups)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netlink::fixtures;

    #[test]
    fn test_genl_header_size() {
        assert_eq!(GENL_HDRLEN, 4);
    }

    #[test]
    fn test_genl_header_round_trip() {
        let hdr = GenlMsgHdr::new(3, 1);
        assert_eq!(hdr.as_bytes(), &[3, 1, 0, 0]);
        assert_eq!(GenlMsgHdr::from_bytes(hdr.as_bytes()), Some(hdr));
        assert_eq!(GenlMsgHdr::from_bytes(&[3, 1]), None);
    }

    #[test]
    fn test_get_family_request() {
        let req = get_family_request("nl80211", 1, 42).unwrap();
        assert_eq!(req.message_type(), GENL_ID_CTRL);
        assert_eq!(req.command(), CtrlCmd::GetFamily as u8);
        assert_eq!(req.sequence(), 1);
        assert_eq!(req.pid(), 42);
        assert_eq!(
            req.get_attribute(CtrlAttr::FamilyName as u16),
            Some(&b"nl80211\0"[..])
        );
        assert!(!req.is_dump_request());
    }

    #[test]
    fn test_parse_new_family_kernel_layout() {
        // Group entries numbered from 1, as the kernel emits them.
        let pkt = NlPacket::parse(&fixtures::new_family(1, 0x1c)).unwrap();
        let info = FamilyInfo::from_packet(&pkt).unwrap();
        assert_eq!(info.name, "nl80211");
        assert_eq!(info.id, 0x1c);
        assert_eq!(info.version, 1);
        assert_eq!(info.mcast_groups.len(), 4);
        assert_eq!(info.group("config"), Some(fixtures::GROUP_CONFIG));
        assert_eq!(info.group("scan"), Some(fixtures::GROUP_SCAN));
        assert_eq!(info.group("regulatory"), Some(fixtures::GROUP_REGULATORY));
        assert_eq!(info.group("mlme"), Some(fixtures::GROUP_MLME));
        assert_eq!(info.group("vendor"), None);
    }

    #[test]
    fn test_parse_mcast_groups_from_index_zero() {
        // Entry types carry no meaning, a zero-numbered entry is still read.
        let data = fixtures::mcast_groups(0, &[("scan", 7)]);
        let groups = parse_mcast_groups(&data).unwrap();
        assert_eq!(groups.get("scan"), Some(&7));
    }

    #[test]
    fn test_new_family_rejects_error() {
        let pkt = NlPacket::parse(&fixtures::error(1, -libc::ENOENT)).unwrap();
        let err = FamilyInfo::from_packet(&pkt).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_new_family_rejects_wrong_command() {
        let mut bytes = fixtures::new_family(1, 0x1c);
        bytes[16] = CtrlCmd::DelFamily as u8;
        let pkt = NlPacket::parse(&bytes).unwrap();
        assert!(matches!(
            FamilyInfo::from_packet(&pkt),
            Err(Error::UnexpectedCommand {
                expected: 1,
                actual: 2
            })
        ));
    }

    #[test]
    fn test_new_family_rejects_wrong_type() {
        let mut bytes = fixtures::new_family(1, 0x1c);
        bytes[4..6].copy_from_slice(&0x1cu16.to_ne_bytes());
        let pkt = NlPacket::parse(&bytes).unwrap();
        assert!(matches!(
            FamilyInfo::from_packet(&pkt),
            Err(Error::UnexpectedType { .. })
        ));
    }

    #[test]
    fn test_new_family_requires_id() {
        let mut pkt = NlPacket::new(GENL_ID_CTRL, CtrlCmd::NewFamily as u8, 1, 0);
        pkt.add_value(CtrlAttr::FamilyName as u16, &"nl80211".to_string())
            .unwrap();
        assert!(matches!(
            FamilyInfo::from_packet(&pkt),
            Err(Error::MissingAttribute("CTRL_ATTR_FAMILY_ID"))
        ));
    }
}

//! A complete generic netlink message: header, genl header, attributes.
//!
//! [`NlPacket`] is built field by field for requests, or parsed from bytes
//! read off a socket. Parsed packets are validated up front, so every
//! accessor works on a buffer whose declared length is known to fit.

use super::attr::{AttrIter, AttrValue, Attribute, find, find_value, nla_align};
use super::error::{Error, Result};
use super::genl::{GENL_HDRLEN, GENL_VERSION, GenlMsgHdr};
use super::message::{
    MessageIter, NLM_F_DUMP, NLM_F_MULTI, NLM_F_REQUEST, NLMSG_HDRLEN, NlMsgHdr, NlMsgType,
};

/// What a packet means to the receive path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    /// Family data addressed to a request.
    Data,
    /// Family data with sequence 0: a multicast notification.
    Multicast,
    /// NLMSG_ERROR carrying code 0.
    Ack,
    /// NLMSG_ERROR carrying a positive errno.
    Error(i32),
    /// NLMSG_DONE.
    Done,
    /// NLMSG_NOOP.
    Noop,
    /// NLMSG_OVERRUN.
    Overrun,
    /// Any other reserved control type.
    Control(u16),
}

/// A generic netlink message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NlPacket {
    buf: Vec<u8>,
}

impl NlPacket {
    /// Start a request with no attributes.
    ///
    /// The request flag is set; callers add `NLM_F_DUMP` or `NLM_F_ACK` with
    /// [`add_flag`](Self::add_flag).
    pub fn new(message_type: u16, command: u8, sequence: u32, pid: u32) -> Self {
        let header = NlMsgHdr {
            nlmsg_len: (NLMSG_HDRLEN + GENL_HDRLEN) as u32,
            nlmsg_type: message_type,
            nlmsg_flags: NLM_F_REQUEST,
            nlmsg_seq: sequence,
            nlmsg_pid: pid,
        };
        let mut buf = Vec::with_capacity(64);
        buf.extend_from_slice(header.as_bytes());
        buf.extend_from_slice(GenlMsgHdr::new(command, GENL_VERSION).as_bytes());
        Self { buf }
    }

    /// Parse a single message. Bytes past the declared length are dropped.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let header = NlMsgHdr::from_bytes(data)?;
        let len = header.nlmsg_len as usize;
        if len < NLMSG_HDRLEN {
            return Err(Error::InvalidMessage(format!(
                "declared length {} shorter than header",
                len
            )));
        }
        if len > data.len() {
            return Err(Error::Truncated {
                expected: len,
                actual: data.len(),
            });
        }
        Ok(Self {
            buf: data[..len].to_vec(),
        })
    }

    /// Split one datagram into its messages.
    ///
    /// A single bad length rejects the whole datagram: once one length is
    /// wrong, the positions of the messages after it cannot be trusted.
    pub fn parse_datagram(data: &[u8]) -> Result<Vec<Self>> {
        MessageIter::new(data)
            .map(|msg| msg.and_then(Self::parse))
            .collect()
    }

    fn header(&self) -> NlMsgHdr {
        NlMsgHdr::from_bytes(&self.buf).unwrap_or_default()
    }

    fn declared_len(&self) -> usize {
        self.header().nlmsg_len as usize
    }

    fn write_len(&mut self) {
        let len = self.buf.len() as u32;
        self.buf[0..4].copy_from_slice(&len.to_ne_bytes());
    }

    /// Check that a full header is present and the declared length fits.
    pub fn is_valid(&self) -> bool {
        let len = self.declared_len();
        self.buf.len() >= NLMSG_HDRLEN && len >= NLMSG_HDRLEN && len <= self.buf.len()
    }

    /// Raw netlink type: a family id or a reserved control type.
    pub fn message_type(&self) -> u16 {
        self.header().nlmsg_type
    }

    /// Netlink flags.
    pub fn flags(&self) -> u16 {
        self.header().nlmsg_flags
    }

    /// Sequence number.
    pub fn sequence(&self) -> u32 {
        self.header().nlmsg_seq
    }

    /// Originating port id.
    pub fn pid(&self) -> u32 {
        self.header().nlmsg_pid
    }

    /// Generic netlink command. Zero for reserved types and short packets.
    pub fn command(&self) -> u8 {
        self.genl_header().map(|h| h.cmd).unwrap_or(0)
    }

    fn genl_header(&self) -> Option<GenlMsgHdr> {
        if self.message_type() < NlMsgType::MIN_TYPE {
            return None;
        }
        GenlMsgHdr::from_bytes(self.buf.get(NLMSG_HDRLEN..self.payload_end())?)
    }

    fn payload_end(&self) -> usize {
        self.declared_len().min(self.buf.len())
    }

    /// True if more fragments of the same reply follow.
    pub fn is_multipart(&self) -> bool {
        self.flags() & NLM_F_MULTI != 0
    }

    /// True for an outgoing request that carries the dump flags.
    pub fn is_dump_request(&self) -> bool {
        self.flags() & NLM_F_DUMP == NLM_F_DUMP
    }

    /// Error code of an NLMSG_ERROR packet as a positive errno.
    ///
    /// `Some(0)` is an acknowledgement, not a failure. `None` if this is not
    /// an error packet or it is too short to carry a code.
    pub fn error_code(&self) -> Option<i32> {
        if self.message_type() != NlMsgType::ERROR {
            return None;
        }
        let raw = self.buf.get(NLMSG_HDRLEN..self.payload_end())?;
        let code = i32::from_payload(raw.get(..4)?).ok()?;
        Some(code.saturating_neg())
    }

    /// Classify the packet for dispatch.
    pub fn kind(&self) -> PacketKind {
        match self.message_type() {
            NlMsgType::ERROR => match self.error_code() {
                Some(0) => PacketKind::Ack,
                Some(errno) => PacketKind::Error(errno),
                None => PacketKind::Error(libc::EBADMSG),
            },
            NlMsgType::DONE => PacketKind::Done,
            NlMsgType::NOOP => PacketKind::Noop,
            NlMsgType::OVERRUN => PacketKind::Overrun,
            t if t < NlMsgType::MIN_TYPE => PacketKind::Control(t),
            _ if self.sequence() == 0 => PacketKind::Multicast,
            _ => PacketKind::Data,
        }
    }

    /// Turn an NLMSG_ERROR with a non-zero code into an error.
    pub fn check_error(&self) -> Result<()> {
        match self.kind() {
            PacketKind::Error(errno) => Err(Error::from_errno(-errno)),
            _ => Ok(()),
        }
    }

    /// Top-level attribute region, after the generic netlink header.
    pub fn attribute_data(&self) -> &[u8] {
        if self.genl_header().is_none() {
            return &[];
        }
        self.buf
            .get(NLMSG_HDRLEN + GENL_HDRLEN..self.payload_end())
            .unwrap_or(&[])
    }

    /// Iterate over top-level attributes.
    pub fn attributes(&self) -> AttrIter<'_> {
        AttrIter::new(self.attribute_data())
    }

    /// Payload of the first top-level attribute of type `kind`.
    pub fn get_attribute(&self, kind: u16) -> Option<&[u8]> {
        find(self.attribute_data(), kind)
    }

    /// Iterate over the children of a top-level container attribute.
    pub fn get_nested(&self, kind: u16) -> Option<AttrIter<'_>> {
        self.get_attribute(kind).map(AttrIter::new)
    }

    /// Decode a top-level attribute.
    pub fn get_attribute_value<T: AttrValue>(&self, kind: u16) -> Option<T> {
        find_value(self.attribute_data(), kind)
    }

    /// Check for a top-level attribute.
    pub fn has_attribute(&self, kind: u16) -> bool {
        self.get_attribute(kind).is_some()
    }

    /// Append an attribute at the next 4-byte boundary.
    pub fn add_attribute(&mut self, attr: &Attribute) {
        let start = nla_align(self.buf.len());
        self.buf.resize(start, 0);
        self.buf.extend_from_slice(attr.as_bytes());
        self.write_len();
    }

    /// Encode and append a scalar or string attribute.
    pub fn add_value<T: AttrValue>(&mut self, kind: u16, value: &T) -> Result<()> {
        self.add_attribute(&Attribute::encode(kind, value)?);
        Ok(())
    }

    /// OR a flag into the header.
    pub fn add_flag(&mut self, flag: u16) {
        let flags = self.flags() | flag;
        self.buf[6..8].copy_from_slice(&flags.to_ne_bytes());
    }

    /// Set the sequence number.
    pub fn set_sequence(&mut self, seq: u32) {
        self.buf[8..12].copy_from_slice(&seq.to_ne_bytes());
    }

    /// Set the port id.
    pub fn set_pid(&mut self, pid: u32) {
        self.buf[12..16].copy_from_slice(&pid.to_ne_bytes());
    }

    /// Encoded bytes, ready for `send`.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Total encoded length.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// True if only headers are present.
    pub fn is_empty(&self) -> bool {
        self.buf.len() <= NLMSG_HDRLEN + GENL_HDRLEN
    }
}

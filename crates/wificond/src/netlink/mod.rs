//! Generic netlink plumbing: codec, sockets and the transport.
//!
//! The codec layers build on each other:
//!
//! - [`message`]: the 16-byte netlink header and reserved message types
//! - [`attr`]: type-length-value attributes and their alignment
//! - [`packet`]: a whole generic netlink message, built or parsed
//! - [`genl`]: the control family, used to resolve family names
//!
//! [`NetlinkManager`] ties them to two sockets and an [`EventLoop`].

pub mod attr;
pub mod config;
mod error;
pub mod event_loop;
pub mod genl;
pub mod manager;
pub mod message;
pub mod packet;
pub mod socket;

#[cfg(test)]
pub(crate) mod fixtures;

pub use attr::{AttrIter, AttrValue, Attribute, NlAttr};
pub use config::TransportConfig;
pub use error::{Error, Result};
pub use event_loop::{Clock, EventLoop, FdCallback, SystemClock, Task, TokioEventLoop};
pub use genl::{FamilyInfo, GENL_ID_CTRL};
pub use manager::{
    NetlinkManager, NetlinkTransport, ResponseHandler, ScanResultHandler, SchedScanResultHandler,
    SequenceAllocator,
};
pub use message::{NLM_F_ACK, NLM_F_DUMP, NLM_F_MULTI, NLM_F_REQUEST, NlMsgHdr, NlMsgType};
pub use packet::{NlPacket, PacketKind};
pub use socket::{NetlinkChannel, NetlinkSocket};

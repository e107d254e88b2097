//! Netlink message fixtures and test doubles.
//!
//! Byte fixtures are laid out the way the kernel sends them, little-endian,
//! with each field annotated. The fakes stand in for the kernel, the clock
//! and the event loop so the transport can be driven deterministically.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::rc::Rc;
use std::time::{Duration, Instant};

use bytes::BytesMut;

use super::attr::{Attribute, nla_align};
use super::error::{Error, Result};
use super::event_loop::{Clock, EventLoop, FdCallback, Task};
use super::genl::{CtrlAttrMcastGrp, GENL_ID_CTRL};
use super::manager::{
    NetlinkTransport, ResponseHandler, ScanResultHandler, SchedScanResultHandler,
    SequenceAllocator,
};
use super::message::{NLM_F_ACK, NLM_F_MULTI, NLM_F_REQUEST, NLMSG_HDRLEN, NlMsgType};
use super::packet::NlPacket;

/// Family id the fake kernel assigns to nl80211.
pub const FAMILY_ID: u16 = 0x1c;

pub const GROUP_CONFIG: u32 = 4;
pub const GROUP_SCAN: u32 = 5;
pub const GROUP_REGULATORY: u32 = 6;
pub const GROUP_MLME: u32 = 7;

fn header(len: u32, kind: u16, flags: u16, seq: u32, pid: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(len as usize);
    out.extend_from_slice(&len.to_ne_bytes());
    out.extend_from_slice(&kind.to_ne_bytes());
    out.extend_from_slice(&flags.to_ne_bytes());
    out.extend_from_slice(&seq.to_ne_bytes());
    out.extend_from_slice(&pid.to_ne_bytes());
    out
}

fn error_message(seq: u32, code: i32) -> Vec<u8> {
    // nlmsghdr + error code + copy of the request header
    let mut out = header(36, NlMsgType::ERROR, 0, seq, 0);
    out.extend_from_slice(&code.to_ne_bytes());
    out.extend(header(20, FAMILY_ID, NLM_F_REQUEST | NLM_F_ACK, seq, 0));
    out
}

/// NLMSG_ERROR with code 0.
pub fn ack(seq: u32) -> Vec<u8> {
    error_message(seq, 0)
}

/// NLMSG_ERROR carrying `neg_errno` (e.g. `-libc::EBUSY`).
pub fn error(seq: u32, neg_errno: i32) -> Vec<u8> {
    error_message(seq, neg_errno)
}

/// NLMSG_DONE ending a dump.
pub fn done(seq: u32) -> Vec<u8> {
    let mut out = header(20, NlMsgType::DONE, NLM_F_MULTI, seq, 0);
    out.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]); // status = 0
    out
}

/// CTRL_CMD_NEWFAMILY reply for nl80211.
/// Captured from: genl ctrl getfamily name nl80211
pub fn new_family(seq: u32, id: u16) -> Vec<u8> {
    let mut out = header(152, GENL_ID_CTRL, 0, seq, 0);
    let [id_lo, id_hi] = id.to_le_bytes();
    out.extend_from_slice(&[
        // genlmsghdr
        0x01, // cmd = CTRL_CMD_NEWFAMILY
        0x02, // version = 2
        0x00, 0x00, // reserved
        // CTRL_ATTR_FAMILY_NAME = "nl80211"
        0x0c, 0x00, // len = 12
        0x02, 0x00, // type = CTRL_ATTR_FAMILY_NAME (2)
        b'n', b'l', b'8', b'0', b'2', b'1', b'1', 0x00,
        // CTRL_ATTR_FAMILY_ID
        0x06, 0x00, // len = 6
        0x01, 0x00, // type = CTRL_ATTR_FAMILY_ID (1)
        id_lo, id_hi, 0x00, 0x00, // id + padding
        // CTRL_ATTR_VERSION = 1
        0x08, 0x00, // len = 8
        0x03, 0x00, // type = CTRL_ATTR_VERSION (3)
        0x01, 0x00, 0x00, 0x00,
        // CTRL_ATTR_MCAST_GROUPS
        0x68, 0x00, // len = 104
        0x07, 0x00, // type = CTRL_ATTR_MCAST_GROUPS (7)
        // entry 1: "config"
        0x18, 0x00, // len = 24
        0x01, 0x00, // index = 1
        0x08, 0x00, 0x02, 0x00, // CTRL_ATTR_MCAST_GRP_ID
        GROUP_CONFIG as u8, 0x00, 0x00, 0x00,
        0x0b, 0x00, 0x01, 0x00, // CTRL_ATTR_MCAST_GRP_NAME, len = 11
        b'c', b'o', b'n', b'f', b'i', b'g', 0x00, 0x00, // "config\0" + padding
        // entry 2: "scan"
        0x18, 0x00, // len = 24
        0x02, 0x00, // index = 2
        0x08, 0x00, 0x02, 0x00,
        GROUP_SCAN as u8, 0x00, 0x00, 0x00,
        0x09, 0x00, 0x01, 0x00, // len = 9
        b's', b'c', b'a', b'n', 0x00, 0x00, 0x00, 0x00, // "scan\0" + padding
        // entry 3: "regulatory"
        0x1c, 0x00, // len = 28
        0x03, 0x00, // index = 3
        0x08, 0x00, 0x02, 0x00,
        GROUP_REGULATORY as u8, 0x00, 0x00, 0x00,
        0x0f, 0x00, 0x01, 0x00, // len = 15
        b'r', b'e', b'g', b'u', b'l', b'a', b't', b'o', b'r', b'y', 0x00, 0x00,
        // entry 4: "mlme"
        0x18, 0x00, // len = 24
        0x04, 0x00, // index = 4
        0x08, 0x00, 0x02, 0x00,
        GROUP_MLME as u8, 0x00, 0x00, 0x00,
        0x09, 0x00, 0x01, 0x00, // len = 9
        b'm', b'l', b'm', b'e', 0x00, 0x00, 0x00, 0x00,
    ]);
    out
}

/// Payload of CTRL_ATTR_MCAST_GROUPS with entries numbered from `start_index`.
pub fn mcast_groups(start_index: u16, groups: &[(&str, u32)]) -> Vec<u8> {
    let mut out = Vec::new();
    for (i, (name, id)) in groups.iter().enumerate() {
        let mut entry = Attribute::nested(start_index + i as u16);
        entry
            .add_child(&Attribute::encode(CtrlAttrMcastGrp::Id as u16, id).unwrap())
            .unwrap();
        let name = Attribute::encode(CtrlAttrMcastGrp::Name as u16, &name.to_string()).unwrap();
        entry.add_child(&name).unwrap();
        out.extend_from_slice(entry.as_bytes());
        out.resize(nla_align(out.len()), 0);
    }
    out
}

/// A complete message of type `kind` with a genl header and `attrs`.
pub fn message(kind: u16, cmd: u8, seq: u32, flags: u16, attrs: &[Attribute]) -> Vec<u8> {
    let mut body = vec![cmd, 0x01, 0x00, 0x00];
    for attr in attrs {
        body.extend_from_slice(attr.as_bytes());
        body.resize(nla_align(body.len()), 0);
    }
    let mut out = header((NLMSG_HDRLEN + body.len()) as u32, kind, flags, seq, 0);
    out.extend(body);
    out
}

/// An nl80211 reply as a parsed packet.
pub fn reply(cmd: u8, seq: u32, flags: u16, attrs: &[Attribute]) -> NlPacket {
    NlPacket::parse(&message(FAMILY_ID, cmd, seq, flags, attrs)).unwrap()
}

/// Parse a byte fixture.
pub fn packet(bytes: &[u8]) -> NlPacket {
    NlPacket::parse(bytes).unwrap()
}

/// Nested attribute built from children.
pub fn nested(kind: u16, children: &[Attribute]) -> Attribute {
    let mut attr = Attribute::nested(kind);
    for child in children {
        attr.add_child(child).unwrap();
    }
    attr
}

/// Scalar or string attribute.
pub fn attr<T: super::attr::AttrValue>(kind: u16, value: T) -> Attribute {
    Attribute::encode(kind, &value).unwrap()
}

/// Monotonic clock moved only by [`advance`](Self::advance).
pub struct FakeClock {
    base: Instant,
    offset: Cell<Duration>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Cell::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.offset.set(self.offset.get() + by);
    }

    pub fn elapsed(&self) -> Duration {
        self.offset.get()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        self.base + self.offset.get()
    }
}

/// The kernel side of every [`FakeChannel`] it opens.
///
/// GETFAMILY requests are answered from [`new_family`]. Any other request
/// receives the datagrams queued with [`reply_with`](Self::reply_with), on
/// the socket it was sent from.
pub struct FakeKernel {
    clock: Rc<FakeClock>,
    fds: RefCell<Vec<RawFd>>,
    inbox: RefCell<HashMap<RawFd, VecDeque<Vec<u8>>>>,
    sent: RefCell<Vec<NlPacket>>,
    replies: RefCell<VecDeque<Vec<Vec<u8>>>>,
    memberships: RefCell<HashMap<RawFd, Vec<u32>>>,
    family_missing: Cell<bool>,
    poll_delay: Cell<Duration>,
    polls: Cell<usize>,
    closed: RefCell<Vec<RawFd>>,
}

impl FakeKernel {
    pub fn new(clock: Rc<FakeClock>) -> Self {
        Self {
            clock,
            fds: RefCell::new(Vec::new()),
            inbox: RefCell::new(HashMap::new()),
            sent: RefCell::new(Vec::new()),
            replies: RefCell::new(VecDeque::new()),
            memberships: RefCell::new(HashMap::new()),
            family_missing: Cell::new(false),
            poll_delay: Cell::new(Duration::from_millis(10)),
            polls: Cell::new(0),
            closed: RefCell::new(Vec::new()),
        }
    }

    pub fn open(self: &Rc<Self>) -> FakeChannel {
        let fd = 1000 + self.fds.borrow().len() as RawFd;
        self.fds.borrow_mut().push(fd);
        FakeChannel {
            fd,
            kernel: Rc::clone(self),
        }
    }

    pub fn opened(&self) -> usize {
        self.fds.borrow().len()
    }

    /// Descriptor of the `n`th channel opened.
    pub fn fd_of(&self, n: usize) -> RawFd {
        self.fds.borrow()[n]
    }

    pub fn sent(&self) -> Vec<NlPacket> {
        self.sent.borrow().clone()
    }

    pub fn memberships(&self, fd: RawFd) -> Vec<u32> {
        self.memberships.borrow().get(&fd).cloned().unwrap_or_default()
    }

    /// Whether the channel with this descriptor has been dropped.
    pub fn is_closed(&self, fd: RawFd) -> bool {
        self.closed.borrow().contains(&fd)
    }

    pub fn polls(&self) -> usize {
        self.polls.get()
    }

    pub fn set_family_missing(&self, missing: bool) {
        self.family_missing.set(missing);
    }

    /// Simulated time one idle poll takes, capped by its timeout.
    pub fn set_poll_delay(&self, delay: Duration) {
        self.poll_delay.set(delay);
    }

    /// Answer the next non-control request with these datagrams.
    pub fn reply_with(&self, datagrams: Vec<Vec<u8>>) {
        self.replies.borrow_mut().push_back(datagrams);
    }

    /// Queue a datagram for reading on `fd`.
    pub fn push(&self, fd: RawFd, datagram: Vec<u8>) {
        self.inbox
            .borrow_mut()
            .entry(fd)
            .or_default()
            .push_back(datagram);
    }

    fn receive(&self, fd: RawFd, msg: &[u8]) {
        let request = NlPacket::parse(msg).unwrap();
        let seq = request.sequence();
        self.sent.borrow_mut().push(request.clone());

        if request.message_type() == GENL_ID_CTRL {
            let reply = if self.family_missing.get() {
                error(seq, -libc::ENOENT)
            } else {
                new_family(seq, FAMILY_ID)
            };
            self.push(fd, reply);
            return;
        }
        let replies = self.replies.borrow_mut().pop_front();
        for datagram in replies.into_iter().flatten() {
            self.push(fd, datagram);
        }
    }

    fn has_input(&self, fd: RawFd) -> bool {
        self.inbox.borrow().get(&fd).is_some_and(|q| !q.is_empty())
    }
}

/// One socket of a [`FakeKernel`].
pub struct FakeChannel {
    fd: RawFd,
    kernel: Rc<FakeKernel>,
}

impl Drop for FakeChannel {
    fn drop(&mut self) {
        self.kernel.closed.borrow_mut().push(self.fd);
    }
}

impl AsRawFd for FakeChannel {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl super::socket::NetlinkChannel for FakeChannel {
    fn send(&self, msg: &[u8]) -> io::Result<usize> {
        self.kernel.receive(self.fd, msg);
        Ok(msg.len())
    }

    fn recv(&self, buf: &mut BytesMut) -> io::Result<usize> {
        let datagram = self
            .kernel
            .inbox
            .borrow_mut()
            .get_mut(&self.fd)
            .and_then(VecDeque::pop_front);
        match datagram {
            Some(datagram) => {
                buf.extend_from_slice(&datagram);
                Ok(datagram.len())
            }
            None => Err(io::ErrorKind::WouldBlock.into()),
        }
    }

    fn poll_readable(&self, timeout: Duration) -> io::Result<bool> {
        self.kernel.polls.set(self.kernel.polls.get() + 1);
        if self.kernel.has_input(self.fd) {
            return Ok(true);
        }
        self.kernel
            .clock
            .advance(self.kernel.poll_delay.get().min(timeout));
        Ok(false)
    }

    fn add_membership(&mut self, group: u32) -> io::Result<()> {
        self.kernel
            .memberships
            .borrow_mut()
            .entry(self.fd)
            .or_default()
            .push(group);
        Ok(())
    }

    fn drop_membership(&mut self, group: u32) -> io::Result<()> {
        if let Some(groups) = self.kernel.memberships.borrow_mut().get_mut(&self.fd) {
            groups.retain(|g| *g != group);
        }
        Ok(())
    }
}

/// Event loop driven by hand from the test.
#[derive(Default)]
pub struct ManualEventLoop {
    tasks: RefCell<VecDeque<(Duration, Task)>>,
    watches: RefCell<HashMap<RawFd, Rc<RefCell<FdCallback>>>>,
    refuse: Cell<bool>,
}

impl ManualEventLoop {
    pub fn refuse_watches(&self, refuse: bool) {
        self.refuse.set(refuse);
    }

    pub fn is_watching(&self, fd: RawFd) -> bool {
        self.watches.borrow().contains_key(&fd)
    }

    /// Deliver one readiness callback. False if `fd` is not watched.
    pub fn fire(&self, fd: RawFd) -> bool {
        let callback = self.watches.borrow().get(&fd).cloned();
        match callback {
            Some(callback) => {
                (callback.borrow_mut())(fd);
                true
            }
            None => false,
        }
    }

    /// Run every posted task, returning the delays they were posted with.
    pub fn run_tasks(&self) -> Vec<Duration> {
        let mut delays = Vec::new();
        loop {
            let next = self.tasks.borrow_mut().pop_front();
            let Some((delay, task)) = next else {
                return delays;
            };
            delays.push(delay);
            task();
        }
    }
}

impl EventLoop for ManualEventLoop {
    fn post_task(&self, task: Task) {
        self.tasks.borrow_mut().push_back((Duration::ZERO, task));
    }

    fn post_delayed_task(&self, task: Task, delay: Duration) {
        self.tasks.borrow_mut().push_back((delay, task));
    }

    fn watch_fd_for_read(&self, fd: RawFd, callback: FdCallback) -> bool {
        if self.refuse.get() {
            return false;
        }
        self.watches
            .borrow_mut()
            .insert(fd, Rc::new(RefCell::new(callback)));
        true
    }

    fn stop_watching_fd(&self, fd: RawFd) {
        self.watches.borrow_mut().remove(&fd);
    }
}

/// Transport that answers from a script instead of a socket.
///
/// Each synchronous request pops the next scripted outcome; with nothing
/// scripted it gets no replies. Requests are recorded for inspection.
pub struct MockTransport {
    sequence: RefCell<SequenceAllocator>,
    requests: RefCell<Vec<NlPacket>>,
    outcomes: RefCell<VecDeque<Result<Vec<NlPacket>>>>,
    registered: RefCell<Vec<(NlPacket, ResponseHandler)>>,
    pub scan_handlers: RefCell<HashMap<u32, ScanResultHandler>>,
    pub sched_scan_handlers: RefCell<HashMap<u32, SchedScanResultHandler>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            sequence: RefCell::new(SequenceAllocator::new()),
            requests: RefCell::new(Vec::new()),
            outcomes: RefCell::new(VecDeque::new()),
            registered: RefCell::new(Vec::new()),
            scan_handlers: RefCell::new(HashMap::new()),
            sched_scan_handlers: RefCell::new(HashMap::new()),
        }
    }

    /// Script the replies to the next synchronous request.
    pub fn respond(&self, replies: Vec<NlPacket>) {
        self.outcomes.borrow_mut().push_back(Ok(replies));
    }

    /// Script a transport failure for the next synchronous request.
    pub fn fail(&self, err: Error) {
        self.outcomes.borrow_mut().push_back(Err(err));
    }

    pub fn requests(&self) -> Vec<NlPacket> {
        self.requests.borrow().clone()
    }

    pub fn last_request(&self) -> NlPacket {
        self.requests.borrow().last().cloned().unwrap()
    }

    /// Deliver `reply` to the handler registered for the `n`th async request.
    pub fn deliver(&self, n: usize, reply: &NlPacket) {
        let mut registered = self.registered.borrow_mut();
        (registered[n].1)(reply);
    }

    pub fn registered_requests(&self) -> Vec<NlPacket> {
        self.registered.borrow().iter().map(|(p, _)| p.clone()).collect()
    }
}

impl NetlinkTransport for MockTransport {
    fn family_id(&self) -> Result<u16> {
        Ok(FAMILY_ID)
    }

    fn next_sequence(&self) -> u32 {
        self.sequence.borrow_mut().next()
    }

    fn send_and_collect(&self, packet: &NlPacket) -> Result<Vec<NlPacket>> {
        self.requests.borrow_mut().push(packet.clone());
        self.outcomes
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    fn send_and_register(&self, packet: &NlPacket, handler: ResponseHandler) -> Result<()> {
        if packet.is_dump_request() {
            return Err(Error::DumpNotAllowed);
        }
        self.registered.borrow_mut().push((packet.clone(), handler));
        Ok(())
    }

    fn subscribe_scan_result_notification(&self, ifindex: u32, handler: ScanResultHandler) {
        self.scan_handlers.borrow_mut().insert(ifindex, handler);
    }

    fn unsubscribe_scan_result_notification(&self, ifindex: u32) {
        self.scan_handlers.borrow_mut().remove(&ifindex);
    }

    fn subscribe_sched_scan_result_notification(
        &self,
        ifindex: u32,
        handler: SchedScanResultHandler,
    ) {
        self.sched_scan_handlers
            .borrow_mut()
            .insert(ifindex, handler);
    }

    fn unsubscribe_sched_scan_result_notification(&self, ifindex: u32) {
        self.sched_scan_handlers.borrow_mut().remove(&ifindex);
    }
}

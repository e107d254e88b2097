//! The netlink transport: two sockets, sequence numbers and reply dispatch.
//!
//! [`NetlinkManager`] owns a synchronous socket, used for blocking
//! request/response exchanges with a wall-clock budget, and an asynchronous
//! socket watched by the host [`EventLoop`] that carries both fire-and-forget
//! replies and multicast notifications.
//!
//! Everything here runs on one thread. Handlers are called inline from the
//! receive path and may call back into the manager.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::rc::{Rc, Weak};

use bytes::BytesMut;
use tracing::{debug, error, info, trace, warn};

use super::config::TransportConfig;
use super::error::{Error, Result};
use super::event_loop::{Clock, EventLoop, SystemClock};
use super::genl::{FamilyInfo, get_family_request};
use super::packet::{NlPacket, PacketKind};
use super::socket::{NetlinkChannel, NetlinkSocket};
use crate::nl80211::scan::parse_scan_notification;
use crate::nl80211::{Nl80211Cmd, Nl80211Attr, ScanNotification};

/// Called for each reply to a registered request.
pub type ResponseHandler = Box<dyn FnMut(&NlPacket)>;

/// Called for `NEW_SCAN_RESULTS` and `SCAN_ABORTED` on one interface.
pub type ScanResultHandler = Box<dyn FnMut(&ScanNotification)>;

/// Called with the interface index when scheduled scan results are ready.
pub type SchedScanResultHandler = Box<dyn FnMut(u32)>;

/// Hands out request sequence numbers.
///
/// Sequence 0 marks multicast traffic, so it is skipped when the counter
/// wraps.
#[derive(Debug, Default, Clone)]
pub struct SequenceAllocator {
    last: u32,
}

impl SequenceAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Continue counting after `last`.
    pub fn starting_after(last: u32) -> Self {
        Self { last }
    }

    pub fn next(&mut self) -> u32 {
        self.last = self.last.wrapping_add(1);
        if self.last == 0 {
            self.last = 1;
        }
        self.last
    }
}

/// What the nl80211 operations need from a transport.
pub trait NetlinkTransport {
    /// Id of the configured family. Fails before startup.
    fn family_id(&self) -> Result<u16>;

    /// Next request sequence number; never 0.
    fn next_sequence(&self) -> u32;

    /// Send on the synchronous socket and gather every reply until the
    /// exchange ends or the budget runs out. `NLMSG_DONE` is not included.
    fn send_and_collect(&self, packet: &NlPacket) -> Result<Vec<NlPacket>>;

    /// Send on the asynchronous socket and deliver replies to `handler`.
    fn send_and_register(&self, packet: &NlPacket, handler: ResponseHandler) -> Result<()>;

    fn subscribe_scan_result_notification(&self, ifindex: u32, handler: ScanResultHandler);

    fn unsubscribe_scan_result_notification(&self, ifindex: u32);

    fn subscribe_sched_scan_result_notification(
        &self,
        ifindex: u32,
        handler: SchedScanResultHandler,
    );

    fn unsubscribe_sched_scan_result_notification(&self, ifindex: u32);

    /// Start a request to the configured family with a fresh sequence number.
    fn new_request(&self, command: u8) -> Result<NlPacket> {
        Ok(NlPacket::new(
            self.family_id()?,
            command,
            self.next_sequence(),
            std::process::id(),
        ))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Channel {
    Sync,
    Async,
}

type ChannelFactory<C> = Box<dyn Fn(usize) -> Result<C>>;

#[derive(Default)]
struct State {
    started: bool,
    sequence: SequenceAllocator,
    handlers: HashMap<u32, ResponseHandler>,
    families: HashMap<String, FamilyInfo>,
    scan_handlers: HashMap<u32, Rc<RefCell<ScanResultHandler>>>,
    sched_scan_handlers: HashMap<u32, Rc<RefCell<SchedScanResultHandler>>>,
}

struct Inner<C: NetlinkChannel> {
    config: TransportConfig,
    event_loop: Rc<dyn EventLoop>,
    clock: Rc<dyn Clock>,
    open_channel: ChannelFactory<C>,
    sync_socket: RefCell<Option<C>>,
    async_socket: RefCell<Option<C>>,
    watched_fd: Cell<Option<RawFd>>,
    tearing_down: Cell<bool>,
    state: RefCell<State>,
}

/// Generic netlink transport for one family.
///
/// Cloning is cheap and shares the same sockets and handler tables. The
/// manager is not `Send`; it lives on the event loop thread.
///
/// # Example
///
/// ```rust,no_run
/// use std::rc::Rc;
/// use tokio::task::LocalSet;
/// use wificond::netlink::{NetlinkManager, NetlinkTransport, TokioEventLoop, TransportConfig};
///
/// # fn example() -> wificond::Result<()> {
/// let local = Rc::new(LocalSet::new());
/// let manager = NetlinkManager::new(
///     Rc::new(TokioEventLoop::new(local.clone())),
///     TransportConfig::default(),
/// );
/// manager.start()?;
/// println!("nl80211 is family {}", manager.family_id()?);
/// # Ok(())
/// # }
/// ```
pub struct NetlinkManager<C: NetlinkChannel + 'static = NetlinkSocket> {
    inner: Rc<Inner<C>>,
}

impl<C: NetlinkChannel + 'static> Clone for NetlinkManager<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl NetlinkManager<NetlinkSocket> {
    /// Create a manager over real generic netlink sockets.
    ///
    /// No socket is opened until [`start`](Self::start).
    pub fn new(event_loop: Rc<dyn EventLoop>, config: TransportConfig) -> Self {
        Self::with_channel(event_loop, Rc::new(SystemClock), config, NetlinkSocket::open)
    }
}

impl<C: NetlinkChannel + 'static> NetlinkManager<C> {
    /// Create a manager that opens its channels through `open_channel`,
    /// which receives the configured receive buffer size.
    pub fn with_channel(
        event_loop: Rc<dyn EventLoop>,
        clock: Rc<dyn Clock>,
        config: TransportConfig,
        open_channel: impl Fn(usize) -> Result<C> + 'static,
    ) -> Self {
        Self {
            inner: Rc::new(Inner {
                config,
                event_loop,
                clock,
                open_channel: Box::new(open_channel),
                sync_socket: RefCell::new(None),
                async_socket: RefCell::new(None),
                watched_fd: Cell::new(None),
                tearing_down: Cell::new(false),
                state: RefCell::new(State::default()),
            }),
        }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.inner.config
    }

    pub fn is_started(&self) -> bool {
        self.inner.state.borrow().started
    }

    /// Open both sockets, discover the family, watch the asynchronous
    /// socket and join the configured multicast groups.
    ///
    /// Calling this again after a successful start does nothing.
    pub fn start(&self) -> Result<()> {
        if self.is_started() {
            debug!("netlink transport already started");
            return Ok(());
        }
        let inner = &self.inner;
        inner.stop_watching();

        let size = inner.config.recv_buffer_size;
        *inner.sync_socket.borrow_mut() = Some((inner.open_channel)(size)?);
        *inner.async_socket.borrow_mut() = Some((inner.open_channel)(size)?);

        let family = self.discover_family(&inner.config.family_name)?;
        self.watch_async_socket()?;
        for group in &inner.config.multicast_groups {
            self.subscribe(group)?;
        }

        inner.state.borrow_mut().started = true;
        info!(
            family = %family.name,
            id = family.id,
            groups = family.mcast_groups.len(),
            "netlink transport started"
        );
        Ok(())
    }

    /// Resolve a generic netlink family by name and cache the result.
    pub fn discover_family(&self, name: &str) -> Result<FamilyInfo> {
        let request = get_family_request(name, self.next_sequence(), std::process::id())?;
        let responses = self.send_and_collect(&request)?;
        let reply = match responses.as_slice() {
            [] => return Err(Error::EmptyResponse),
            [reply] => reply,
            many => {
                return Err(Error::InvalidMessage(format!(
                    "expected one reply to get family, got {}",
                    many.len()
                )));
            }
        };

        let family = FamilyInfo::from_packet(reply).map_err(|e| {
            if e.errno() == Some(libc::ENOENT) {
                Error::FamilyNotFound {
                    name: name.to_string(),
                }
            } else {
                e
            }
        })?;
        debug!(name, id = family.id, version = family.version, "discovered family");
        self.inner
            .state
            .borrow_mut()
            .families
            .insert(name.to_string(), family.clone());
        Ok(family)
    }

    /// A previously discovered family.
    pub fn family(&self, name: &str) -> Option<FamilyInfo> {
        self.inner.state.borrow().families.get(name).cloned()
    }

    /// Join a multicast group of the configured family on the asynchronous
    /// socket.
    pub fn subscribe(&self, group: &str) -> Result<()> {
        let id = self.group_id(group)?;
        let mut socket = self.inner.async_socket.borrow_mut();
        socket
            .as_mut()
            .ok_or(Error::NotStarted)?
            .add_membership(id)?;
        debug!(group, id, "joined multicast group");
        Ok(())
    }

    /// Leave a multicast group joined with [`subscribe`](Self::subscribe).
    pub fn unsubscribe(&self, group: &str) -> Result<()> {
        let id = self.group_id(group)?;
        let mut socket = self.inner.async_socket.borrow_mut();
        socket
            .as_mut()
            .ok_or(Error::NotStarted)?
            .drop_membership(id)?;
        debug!(group, id, "left multicast group");
        Ok(())
    }

    fn group_id(&self, group: &str) -> Result<u32> {
        let state = self.inner.state.borrow();
        let family_name = &self.inner.config.family_name;
        let family = state.families.get(family_name).ok_or(Error::NotStarted)?;
        family.group(group).ok_or_else(|| Error::GroupNotFound {
            family: family_name.clone(),
            group: group.to_string(),
        })
    }

    fn watch_async_socket(&self) -> Result<()> {
        let fd = self
            .inner
            .async_socket
            .borrow()
            .as_ref()
            .map(AsRawFd::as_raw_fd)
            .ok_or(Error::NotStarted)?;

        let weak: Weak<Inner<C>> = Rc::downgrade(&self.inner);
        let watching = self.inner.event_loop.watch_fd_for_read(
            fd,
            Box::new(move |_fd: RawFd| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_async_readable();
                }
            }),
        );
        if !watching {
            return Err(Error::EventLoop(format!("failed to watch fd {}", fd)));
        }
        self.inner.watched_fd.set(Some(fd));
        Ok(())
    }

    /// Number of requests still waiting for replies.
    pub fn pending_requests(&self) -> usize {
        self.inner.state.borrow().handlers.len()
    }
}

impl<C: NetlinkChannel + 'static> NetlinkTransport for NetlinkManager<C> {
    fn family_id(&self) -> Result<u16> {
        self.inner
            .state
            .borrow()
            .families
            .get(&self.inner.config.family_name)
            .map(|family| family.id)
            .ok_or(Error::NotStarted)
    }

    fn next_sequence(&self) -> u32 {
        self.inner.state.borrow_mut().sequence.next()
    }

    fn send_and_collect(&self, packet: &NlPacket) -> Result<Vec<NlPacket>> {
        self.inner.send_and_collect(packet)
    }

    fn send_and_register(&self, packet: &NlPacket, handler: ResponseHandler) -> Result<()> {
        if packet.is_dump_request() {
            error!(seq = packet.sequence(), "dump request on the asynchronous socket");
            return Err(Error::DumpNotAllowed);
        }
        let seq = packet.sequence();
        if seq == 0 {
            return Err(Error::InvalidMessage(
                "sequence 0 is reserved for multicast".into(),
            ));
        }
        self.inner.send(Channel::Async, packet)?;
        self.inner.state.borrow_mut().handlers.insert(seq, handler);
        Ok(())
    }

    fn subscribe_scan_result_notification(&self, ifindex: u32, handler: ScanResultHandler) {
        self.inner
            .state
            .borrow_mut()
            .scan_handlers
            .insert(ifindex, Rc::new(RefCell::new(handler)));
    }

    fn unsubscribe_scan_result_notification(&self, ifindex: u32) {
        self.inner.state.borrow_mut().scan_handlers.remove(&ifindex);
    }

    fn subscribe_sched_scan_result_notification(
        &self,
        ifindex: u32,
        handler: SchedScanResultHandler,
    ) {
        self.inner
            .state
            .borrow_mut()
            .sched_scan_handlers
            .insert(ifindex, Rc::new(RefCell::new(handler)));
    }

    fn unsubscribe_sched_scan_result_notification(&self, ifindex: u32) {
        self.inner
            .state
            .borrow_mut()
            .sched_scan_handlers
            .remove(&ifindex);
    }
}

impl<C: NetlinkChannel> Inner<C> {
    fn socket(&self, channel: Channel) -> &RefCell<Option<C>> {
        match channel {
            Channel::Sync => &self.sync_socket,
            Channel::Async => &self.async_socket,
        }
    }

    fn family_id(&self) -> Option<u16> {
        self.state
            .borrow()
            .families
            .get(&self.config.family_name)
            .map(|family| family.id)
    }

    fn has_handler(&self, seq: u32) -> bool {
        self.state.borrow().handlers.contains_key(&seq)
    }

    fn remove_handler(&self, seq: u32) {
        self.state.borrow_mut().handlers.remove(&seq);
    }

    fn send(&self, channel: Channel, packet: &NlPacket) -> Result<()> {
        let socket = self.socket(channel).borrow();
        let socket = socket.as_ref().ok_or(Error::NotStarted)?;
        let sent = socket.send(packet.as_bytes())?;
        if sent != packet.len() {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("short send: {} of {} bytes", sent, packet.len()),
            )));
        }
        trace!(
            ?channel,
            seq = packet.sequence(),
            cmd = packet.command(),
            len = sent,
            "sent request"
        );
        Ok(())
    }

    fn send_and_collect(&self, packet: &NlPacket) -> Result<Vec<NlPacket>> {
        let seq = packet.sequence();
        if seq == 0 {
            return Err(Error::InvalidMessage(
                "sequence 0 is reserved for multicast".into(),
            ));
        }

        let collected = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&collected);
        self.state.borrow_mut().handlers.insert(
            seq,
            Box::new(move |reply: &NlPacket| sink.borrow_mut().push(reply.clone())),
        );
        if let Err(e) = self.send(Channel::Sync, packet) {
            self.remove_handler(seq);
            return Err(e);
        }

        let budget = self.config.sync_timeout;
        let started = self.clock.now();
        while self.has_handler(seq) {
            let elapsed = self.clock.now().saturating_duration_since(started);
            let remaining = match budget.checked_sub(elapsed) {
                Some(remaining) if !remaining.is_zero() => remaining,
                _ => {
                    self.remove_handler(seq);
                    warn!(seq, ?budget, "timed out waiting for reply");
                    return Err(Error::Timeout { budget });
                }
            };

            let readable = {
                let socket = self.sync_socket.borrow();
                match socket.as_ref() {
                    Some(socket) => socket.poll_readable(remaining),
                    None => Err(io::Error::from(io::ErrorKind::NotConnected)),
                }
            };
            let outcome = match readable {
                Ok(true) => self.read_and_dispatch(Channel::Sync),
                Ok(false) => Ok(()),
                Err(e) => Err(e.into()),
            };
            if let Err(e) = outcome {
                self.remove_handler(seq);
                error!(seq, error = %e, "synchronous receive failed");
                return Err(e);
            }
        }

        Ok(std::mem::take(&mut *collected.borrow_mut()))
    }

    fn on_async_readable(&self) {
        if self.tearing_down.get() {
            return;
        }
        if let Err(e) = self.read_and_dispatch(Channel::Async) {
            error!(error = %e, "failed to read from asynchronous socket");
        }
    }

    /// Read one datagram and dispatch every message in it.
    fn read_and_dispatch(&self, channel: Channel) -> Result<()> {
        let mut buf = BytesMut::with_capacity(self.config.recv_buffer_size);
        let received = {
            let socket = self.socket(channel).borrow();
            let socket = socket.as_ref().ok_or(Error::NotStarted)?;
            match socket.recv(&mut buf) {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(e.into()),
            }
        };
        if received == 0 {
            return Ok(());
        }

        let data = &buf[..received.min(buf.len())];
        let packets = match NlPacket::parse_datagram(data) {
            Ok(packets) => packets,
            Err(e) => {
                error!(?channel, len = data.len(), error = %e, "dropping malformed datagram");
                return Ok(());
            }
        };
        for packet in &packets {
            if self.tearing_down.get() {
                break;
            }
            self.dispatch(packet);
        }
        Ok(())
    }

    fn dispatch(&self, packet: &NlPacket) {
        let seq = packet.sequence();
        if seq == 0 {
            self.dispatch_multicast(packet);
            return;
        }

        let handler = self.state.borrow_mut().handlers.remove(&seq);
        let Some(mut handler) = handler else {
            warn!(seq, kind = ?packet.kind(), "no handler for reply, dropping");
            return;
        };

        match packet.kind() {
            PacketKind::Done | PacketKind::Noop => {
                trace!(seq, "exchange finished");
            }
            PacketKind::Overrun => {
                warn!(seq, "kernel reported overrun, ending exchange");
            }
            kind => {
                handler(packet);
                let terminal = !packet.is_multipart()
                    || matches!(kind, PacketKind::Ack | PacketKind::Error(_));
                if !terminal && !self.tearing_down.get() {
                    self.state.borrow_mut().handlers.insert(seq, handler);
                }
            }
        }
    }

    fn dispatch_multicast(&self, packet: &NlPacket) {
        let Some(family_id) = self.family_id() else {
            return;
        };
        if packet.message_type() != family_id {
            debug!(kind = packet.message_type(), "ignoring multicast from another family");
            return;
        }

        let command = packet.command();
        match Nl80211Cmd::from_u8(command) {
            Some(Nl80211Cmd::NewScanResults | Nl80211Cmd::ScanAborted) => {
                let Some(notification) = parse_scan_notification(packet) else {
                    warn!(command, "scan notification without interface index");
                    return;
                };
                let handler = self
                    .state
                    .borrow()
                    .scan_handlers
                    .get(&notification.ifindex)
                    .cloned();
                let Some(handler) = handler else {
                    debug!(ifindex = notification.ifindex, "no scan result handler");
                    return;
                };
                match handler.try_borrow_mut() {
                    Ok(mut handler) => handler(&notification),
                    Err(_) => warn!(ifindex = notification.ifindex, "scan handler re-entered"),
                }
            }
            Some(Nl80211Cmd::SchedScanResults) => {
                let Some(ifindex) = packet.get_attribute_value::<u32>(Nl80211Attr::Ifindex as u16)
                else {
                    warn!("scheduled scan notification without interface index");
                    return;
                };
                let handler = self.state.borrow().sched_scan_handlers.get(&ifindex).cloned();
                let Some(handler) = handler else {
                    debug!(ifindex, "no scheduled scan result handler");
                    return;
                };
                match handler.try_borrow_mut() {
                    Ok(mut handler) => handler(ifindex),
                    Err(_) => warn!(ifindex, "scheduled scan handler re-entered"),
                }
            }
            _ => debug!(command, "ignoring multicast command"),
        }
    }

    fn stop_watching(&self) {
        if let Some(fd) = self.watched_fd.take() {
            self.event_loop.stop_watching_fd(fd);
        }
    }
}

impl<C: NetlinkChannel> Drop for Inner<C> {
    fn drop(&mut self) {
        self.tearing_down.set(true);
        self.stop_watching();
        self.async_socket.get_mut().take();
        self.sync_socket.get_mut().take();

        let state = self.state.get_mut();
        if !state.handlers.is_empty() {
            debug!(pending = state.handlers.len(), "dropping pending handlers");
        }
        state.handlers.clear();
        state.scan_handlers.clear();
        state.sched_scan_handlers.clear();
    }
}

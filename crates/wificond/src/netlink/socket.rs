//! Raw generic netlink sockets.

use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::Duration;

use bytes::BytesMut;
use netlink_sys::{Socket, SocketAddr, protocols};
use tracing::{debug, warn};

use super::error::Result;

/// A datagram channel to the kernel.
///
/// The transport owns two of these. Reads are only attempted after a
/// readiness signal, so implementations may be non-blocking.
pub trait NetlinkChannel: AsRawFd {
    /// Send one complete message.
    fn send(&self, msg: &[u8]) -> io::Result<usize>;

    /// Read one datagram into `buf`, returning its length.
    fn recv(&self, buf: &mut BytesMut) -> io::Result<usize>;

    /// Wait up to `timeout` for input. `Ok(false)` on timeout or interruption.
    fn poll_readable(&self, timeout: Duration) -> io::Result<bool>;

    /// Join a multicast group.
    fn add_membership(&mut self, group: u32) -> io::Result<()>;

    /// Leave a multicast group.
    fn drop_membership(&mut self, group: u32) -> io::Result<()>;
}

/// `NETLINK_GENERIC` datagram socket.
pub struct NetlinkSocket {
    socket: Socket,
    pid: u32,
}

impl NetlinkSocket {
    /// Open, size and bind a generic netlink socket.
    ///
    /// The receive buffer is set before binding. Datagrams larger than
    /// `recv_buffer_size` are dropped by the kernel.
    pub fn open(recv_buffer_size: usize) -> Result<Self> {
        let mut socket = Socket::new(protocols::NETLINK_GENERIC)?;
        set_recv_buffer(&socket, recv_buffer_size)?;

        // Bind to get a port ID
        let mut addr = SocketAddr::new(0, 0);
        socket.bind(&addr)?;
        socket.get_address(&mut addr)?;
        socket.set_non_blocking(true)?;

        let pid = addr.port_number();
        debug!(fd = socket.as_raw_fd(), pid, "opened generic netlink socket");
        Ok(Self { socket, pid })
    }

    /// Get the kernel-assigned port ID.
    pub fn pid(&self) -> u32 {
        self.pid
    }
}

/// Force the receive buffer size, falling back to the capped option when
/// the process lacks CAP_NET_ADMIN.
fn set_recv_buffer(socket: &Socket, size: usize) -> io::Result<()> {
    let value = libc::c_int::try_from(size)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "receive buffer too large"))?;

    // SAFETY: the fd is a live socket owned by `socket` and `value` outlives
    // the call; the kernel copies exactly size_of::<c_int>() bytes.
    let ret = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_RCVBUFFORCE,
            &value as *const libc::c_int as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if ret == 0 {
        return Ok(());
    }

    let err = io::Error::last_os_error();
    warn!(error = %err, "SO_RCVBUFFORCE failed, using SO_RCVBUF");
    socket.set_rx_buf_sz(size)
}

impl NetlinkChannel for NetlinkSocket {
    fn send(&self, msg: &[u8]) -> io::Result<usize> {
        loop {
            match self.socket.send(msg, 0) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                other => return other,
            }
        }
    }

    fn recv(&self, buf: &mut BytesMut) -> io::Result<usize> {
        loop {
            match self.socket.recv(buf, 0) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                other => return other,
            }
        }
    }

    fn poll_readable(&self, timeout: Duration) -> io::Result<bool> {
        poll_fd(self.socket.as_raw_fd(), timeout)
    }

    fn add_membership(&mut self, group: u32) -> io::Result<()> {
        self.socket.add_membership(group)
    }

    fn drop_membership(&mut self, group: u32) -> io::Result<()> {
        self.socket.drop_membership(group)
    }
}

impl AsRawFd for NetlinkSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }
}

/// Block in poll(2) for POLLIN on `fd`.
///
/// The timeout is rounded up to whole milliseconds so a sub-millisecond
/// remainder still waits instead of spinning.
pub(crate) fn poll_fd(fd: RawFd, timeout: Duration) -> io::Result<bool> {
    let mut millis = timeout.as_millis();
    if timeout.subsec_nanos() % 1_000_000 != 0 {
        millis += 1;
    }
    let millis = libc::c_int::try_from(millis).unwrap_or(libc::c_int::MAX);

    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    // SAFETY: `pfd` is a valid pollfd for the duration of the call and the
    // count matches the single entry passed.
    let ret = unsafe { libc::poll(&mut pfd, 1, millis) };
    if ret < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(false);
        }
        return Err(err);
    }
    if ret > 0 && pfd.revents & (libc::POLLERR | libc::POLLNVAL) != 0 {
        return Err(io::Error::new(
            io::ErrorKind::BrokenPipe,
            format!("poll reported revents {:#x}", pfd.revents),
        ));
    }
    Ok(ret > 0 && pfd.revents & libc::POLLIN != 0)
}

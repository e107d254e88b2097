//! Event-loop collaborator and wall clock.
//!
//! The transport never runs its own loop for the asynchronous socket. It
//! hands the descriptor to an [`EventLoop`] and gets called back when the
//! socket is readable. [`TokioEventLoop`] is the implementation used by the
//! binaries: a `LocalSet` on a current-thread runtime.

use std::cell::RefCell;
use std::collections::HashMap;
use std::future::poll_fn;
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::rc::{Rc, Weak};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use tokio::io::Interest;
use tokio::io::unix::AsyncFd;
use tokio::task::{JoinHandle, LocalSet};
use tracing::{debug, error};

use super::socket::poll_fd;

/// A one-shot task.
pub type Task = Box<dyn FnOnce()>;

/// Readability callback; receives the watched descriptor.
pub type FdCallback = Box<dyn FnMut(RawFd)>;

/// Scheduling primitives the transport needs from its host.
pub trait EventLoop {
    /// Run `task` soon on the loop thread.
    fn post_task(&self, task: Task);

    /// Run `task` on the loop thread after `delay`.
    fn post_delayed_task(&self, task: Task, delay: Duration);

    /// Call `callback` whenever `fd` is readable. Returns false if the
    /// descriptor cannot be watched.
    fn watch_fd_for_read(&self, fd: RawFd, callback: FdCallback) -> bool;

    /// Stop a watch started with [`watch_fd_for_read`](Self::watch_fd_for_read).
    fn stop_watching_fd(&self, fd: RawFd);
}

/// Source of monotonic time for timeout accounting.
pub trait Clock {
    fn now(&self) -> Instant;
}

/// The real monotonic clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Borrowed descriptor registered with the reactor. The owner closes it.
struct WatchedFd(RawFd);

impl AsRawFd for WatchedFd {
    fn as_raw_fd(&self) -> RawFd {
        self.0
    }
}

/// A live watch. The table owns the only strong reference to the reactor
/// registration, so removing the entry deregisters the fd at once.
struct Watch {
    registration: Rc<AsyncFd<WatchedFd>>,
    task: JoinHandle<()>,
}

impl Watch {
    fn cancel(self) {
        self.task.abort();
        drop(self.registration);
    }
}

/// Wait until the watched fd has data queued.
///
/// Readiness is cleared only once the fd is drained, so a callback that reads
/// one datagram is called again while more are queued. Yields `false` once the
/// registration is gone.
fn poll_readable(
    registration: &Weak<AsyncFd<WatchedFd>>,
    fd: RawFd,
    cx: &mut Context<'_>,
) -> Poll<io::Result<bool>> {
    let Some(async_fd) = registration.upgrade() else {
        return Poll::Ready(Ok(false));
    };
    loop {
        match async_fd.poll_read_ready(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
            Poll::Ready(Ok(mut guard)) => {
                if poll_fd(fd, Duration::ZERO).unwrap_or(false) {
                    return Poll::Ready(Ok(true));
                }
                guard.clear_ready();
            }
        }
    }
}

/// [`EventLoop`] backed by a tokio `LocalSet`.
///
/// Tasks are spawned onto the set, so they only run while the set is being
/// driven (`LocalSet::run_until` or `block_on`). Watches must be registered
/// from inside the runtime; stopping one deregisters the fd before returning.
pub struct TokioEventLoop {
    local: Rc<LocalSet>,
    watches: RefCell<HashMap<RawFd, Watch>>,
}

impl TokioEventLoop {
    pub fn new(local: Rc<LocalSet>) -> Self {
        Self {
            local,
            watches: RefCell::new(HashMap::new()),
        }
    }

    /// The set tasks are spawned onto.
    pub fn local_set(&self) -> &Rc<LocalSet> {
        &self.local
    }
}

impl EventLoop for TokioEventLoop {
    fn post_task(&self, task: Task) {
        self.local.spawn_local(async move { task() });
    }

    fn post_delayed_task(&self, task: Task, delay: Duration) {
        self.local.spawn_local(async move {
            tokio::time::sleep(delay).await;
            task();
        });
    }

    fn watch_fd_for_read(&self, fd: RawFd, mut callback: FdCallback) -> bool {
        if tokio::runtime::Handle::try_current().is_err() {
            error!(fd, "cannot watch fd outside a tokio runtime");
            return false;
        }
        // epoll refuses a second registration of the same fd.
        self.stop_watching_fd(fd);
        let async_fd = match AsyncFd::with_interest(WatchedFd(fd), Interest::READABLE) {
            Ok(async_fd) => async_fd,
            Err(e) => {
                error!(fd, error = %e, "failed to register fd with reactor");
                return false;
            }
        };

        let registration = Rc::new(async_fd);
        let weak = Rc::downgrade(&registration);
        let task = self.local.spawn_local(async move {
            loop {
                match poll_fn(|cx| poll_readable(&weak, fd, cx)).await {
                    Ok(true) => callback(fd),
                    Ok(false) => return,
                    Err(e) => {
                        error!(fd, error = %e, "readiness wait failed, dropping watch");
                        return;
                    }
                }
            }
        });

        self.watches.borrow_mut().insert(fd, Watch { registration, task });
        debug!(fd, "watching fd for read");
        true
    }

    fn stop_watching_fd(&self, fd: RawFd) {
        let watch = self.watches.borrow_mut().remove(&fd);
        if let Some(watch) = watch {
            watch.cancel();
            debug!(fd, "stopped watching fd");
        }
    }
}

impl Drop for TokioEventLoop {
    fn drop(&mut self) {
        for (_, watch) in self.watches.get_mut().drain() {
            watch.cancel();
        }
    }
}

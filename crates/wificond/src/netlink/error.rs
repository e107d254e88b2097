//! Error types for netlink and nl80211 operations.

use std::io;
use std::time::Duration;

/// Result type for netlink operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while talking to the kernel.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error from socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Kernel returned an error code.
    #[error("kernel error: {message} (errno {errno})")]
    Kernel {
        /// The errno value from the kernel (positive).
        errno: i32,
        /// Human-readable error message.
        message: String,
    },

    /// Kernel error with operation context.
    #[error("{operation}: {message} (errno {errno})")]
    KernelWithContext {
        /// The operation that failed.
        operation: String,
        /// The errno value from the kernel (positive).
        errno: i32,
        /// Human-readable error message.
        message: String,
    },

    /// Buffer shorter than a header or a declared length.
    #[error("message truncated: expected {expected} bytes, got {actual}")]
    Truncated {
        /// Bytes required.
        expected: usize,
        /// Bytes available.
        actual: usize,
    },

    /// Invalid message format.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Invalid attribute format.
    #[error("invalid attribute: {0}")]
    InvalidAttribute(String),

    /// A reply lacked an attribute the operation depends on.
    #[error("missing attribute: {0}")]
    MissingAttribute(&'static str),

    /// A reply carried the wrong netlink message type.
    #[error("unexpected message type: expected {expected}, got {actual}")]
    UnexpectedType {
        /// Message type we asked for.
        expected: u16,
        /// Message type the kernel sent.
        actual: u16,
    },

    /// A reply carried the wrong generic netlink command.
    #[error("unexpected command: expected {expected}, got {actual}")]
    UnexpectedCommand {
        /// Command we expected in the reply.
        expected: u8,
        /// Command the kernel sent.
        actual: u8,
    },

    /// The kernel returned no reply at all.
    #[error("empty response from kernel")]
    EmptyResponse,

    /// Generic netlink family is not registered in the kernel.
    #[error("generic netlink family not found: {name}")]
    FamilyNotFound {
        /// The family name that was looked up.
        name: String,
    },

    /// Multicast group is not declared by the family.
    #[error("multicast group {group} not found in family {family}")]
    GroupNotFound {
        /// Family the group was looked up in.
        family: String,
        /// Group name.
        group: String,
    },

    /// No usable network interface was reported for a wiphy.
    #[error("no usable interface on wiphy {wiphy}")]
    NoUsableInterface {
        /// Wiphy index that was queried.
        wiphy: u32,
    },

    /// Synchronous exchange exceeded its budget.
    #[error("timed out waiting for netlink reply after {budget:?}")]
    Timeout {
        /// The configured wall-clock budget.
        budget: Duration,
    },

    /// Transport was used before `start()`.
    #[error("netlink transport not started")]
    NotStarted,

    /// Dump requests must go through the synchronous path.
    #[error("dump requests are not allowed on the asynchronous socket")]
    DumpNotAllowed,

    /// The event loop refused a registration.
    #[error("event loop error: {0}")]
    EventLoop(String),
}

impl Error {
    /// Create a kernel error from a negative errno value as carried in NLMSG_ERROR.
    pub fn from_errno(errno: i32) -> Self {
        let message = io::Error::from_raw_os_error(-errno).to_string();
        Self::Kernel {
            errno: -errno,
            message,
        }
    }

    /// Create a kernel error with operation context.
    pub fn from_errno_with_context(errno: i32, operation: impl Into<String>) -> Self {
        let message = io::Error::from_raw_os_error(-errno).to_string();
        Self::KernelWithContext {
            operation: operation.into(),
            errno: -errno,
            message,
        }
    }

    /// Add context to this error.
    ///
    /// Wraps kernel errors with operation context. Other errors are returned unchanged.
    pub fn with_context(self, operation: impl Into<String>) -> Self {
        match self {
            Self::Kernel { errno, message } => Self::KernelWithContext {
                operation: operation.into(),
                errno,
                message,
            },
            other => other,
        }
    }

    /// Check if this is a "not found" error (ENOENT, ENODEV, etc.).
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Kernel { errno, .. } | Self::KernelWithContext { errno, .. } => {
                matches!(*errno, libc::ENOENT | libc::ENODEV)
            }
            Self::FamilyNotFound { .. } | Self::GroupNotFound { .. } => true,
            _ => false,
        }
    }

    /// Check if this is a permission error (EPERM, EACCES).
    pub fn is_permission_denied(&self) -> bool {
        match self {
            Self::Kernel { errno, .. } | Self::KernelWithContext { errno, .. } => {
                matches!(*errno, libc::EPERM | libc::EACCES)
            }
            Self::Io(e) => e.kind() == io::ErrorKind::PermissionDenied,
            _ => false,
        }
    }

    /// Check if this is a "device busy" error (EBUSY).
    pub fn is_busy(&self) -> bool {
        self.errno() == Some(libc::EBUSY)
    }

    /// Check if this is a timeout of a synchronous exchange.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Get the errno value if this is a kernel error.
    pub fn errno(&self) -> Option<i32> {
        match self {
            Self::Kernel { errno, .. } | Self::KernelWithContext { errno, .. } => Some(*errno),
            _ => None,
        }
    }
}

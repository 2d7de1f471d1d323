//! Error types and handling for the agentmesh library

use thiserror::Error;

/// Result type alias for agentmesh operations
pub type Result<T> = std::result::Result<T, BusError>;

/// Fatal initialization failures, returned from [`crate::runtime::Runtime::init`].
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitError {
    /// `ring_capacity_bytes` or `deque_capacity` was not a power of two
    #[error("capacity must be a power of two")]
    CapacityNotPowerOfTwo,
    /// Ring buffer or deque memory allocation failed
    #[error("failed to allocate buffer memory")]
    AllocationFailed,
    /// Thread-to-core pinning failed during startup
    #[error("failed to set CPU affinity")]
    AffinityFailed,
    /// `performance_core_count` exceeded `num_workers`, or `num_workers`/`num_producers`
    /// exceeded the detected logical core count
    #[error("configured core count exceeds available cores")]
    CoreCountExceeded,
}

/// Main error type for the agentmesh library
#[derive(Error, Debug)]
pub enum BusError {
    /// I/O errors from system calls (mmap, mlock, sched_setaffinity, ...)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CPU affinity errors surfaced by `nix`
    #[error("CPU affinity error: {0}")]
    CpuAffinity(#[from] nix::Error),

    /// Fatal configuration/initialization error
    #[error("init error: {0}")]
    Init(#[from] InitError),

    /// Invalid configuration parameter
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the configuration issue
        message: String,
    },

    /// The ring buffer has no space for the requested reservation.
    ///
    /// Reported to the direct caller (the producer) and recovered locally by a
    /// pause-and-retry; never propagated further.
    #[error("ring buffer is full")]
    Full,

    /// Message validation errors (oversized payload, etc.)
    #[error("invalid message: {reason}")]
    InvalidMessage {
        /// Reason the message was rejected
        reason: String,
    },

    /// System resource errors (allocation, locking, affinity)
    #[error("system resource error: {message}")]
    SystemResource {
        /// Description of the system resource issue
        message: String,
    },

    /// NUMA topology errors
    #[error("NUMA error: {message}")]
    Numa {
        /// Description of the NUMA issue
        message: String,
    },

    /// Generic error for unexpected conditions — a logic error, not a
    /// recoverable runtime condition.
    #[error("unexpected error: {message}")]
    Unexpected {
        /// Description of the unexpected condition
        message: String,
    },
}

impl BusError {
    /// Create a new configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::InvalidConfig { message: message.into() }
    }

    /// Create a new message validation error
    pub fn invalid_message(reason: impl Into<String>) -> Self {
        Self::InvalidMessage { reason: reason.into() }
    }

    /// Create a new system resource error
    pub fn system_resource(message: impl Into<String>) -> Self {
        Self::SystemResource { message: message.into() }
    }

    /// Create a new NUMA error
    pub fn numa(message: impl Into<String>) -> Self {
        Self::Numa { message: message.into() }
    }

    /// Create a new unexpected error
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected { message: message.into() }
    }

    /// Whether the caller can recover from this error locally (retry,
    /// back off, skip) rather than treating it as fatal.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Full | Self::Io(_))
    }
}

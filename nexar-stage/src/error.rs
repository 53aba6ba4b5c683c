pub type Result<T> = std::result::Result<T, StageError>;

/// Errors raised by the staging subsystem.
///
/// Every variant is fatal-class: it signals misconfiguration, resource
/// exhaustion at startup, a failing copy engine, or a broken stage/unstage
/// pairing. Callers that cannot report the error upward should call
/// [`StageError::abort`].
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("failed to allocate {size} bytes of staging memory: {reason}")]
    AllocationFailed { size: usize, reason: String },

    #[error("invalid staging configuration: {0}")]
    InvalidConfig(String),

    #[error("no staging context for buffer 0x{addr:x}")]
    UnknownStage { addr: u64 },

    #[error("staging context for buffer 0x{addr:x} already exists")]
    DuplicateStage { addr: u64 },

    #[error("buffer 0x{addr:x} was not staged for a {expected} transfer")]
    StageKindMismatch { addr: u64, expected: &'static str },

    #[error("view of buffer 0x{addr:x} carries true_lb {found}, staged with {expected}")]
    StageViewMismatch {
        addr: u64,
        expected: isize,
        found: isize,
    },

    #[error("buffer 0x{addr:x} does not belong to any staging pool")]
    ForeignBuffer { addr: u64 },

    #[error("buffer 0x{addr:x} released twice")]
    DoubleRelease { addr: u64 },

    #[error(
        "negative payload span for count {count} (extent={extent}, true_lb={true_lb}, true_ub={true_ub})"
    )]
    InvalidSpan {
        count: usize,
        extent: isize,
        true_lb: isize,
        true_ub: isize,
    },

    #[error("{operation} failed: {message}")]
    CopyFailed {
        operation: &'static str,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("device adapter error: {message}")]
    DeviceError {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("internal lock poisoned: {0}")]
    LockPoisoned(&'static str),

    #[error("{count} staging contexts still live at finalize")]
    LeakedStages { count: usize },
}

impl StageError {
    /// Create a `DeviceError` with just a message.
    pub fn device(msg: impl Into<String>) -> Self {
        Self::DeviceError {
            message: msg.into(),
            source: None,
        }
    }

    /// Create a `DeviceError` with a message and a source error.
    pub fn device_with_source(
        msg: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::DeviceError {
            message: msg.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a `CopyFailed` error for a pack or unpack operation.
    pub fn copy_failed(operation: &'static str, msg: impl Into<String>) -> Self {
        Self::CopyFailed {
            operation,
            message: msg.into(),
            source: None,
        }
    }

    /// Log the error and terminate the process.
    ///
    /// Used where a staging failure cannot be handed back to anyone, such as
    /// the request completion hook.
    pub fn abort(self) -> ! {
        tracing::error!(error = %self, "fatal staging error, aborting");
        std::process::abort()
    }
}

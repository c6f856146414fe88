//! Error types shared by all buffers

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Error returned by a flush handler
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Result returned by a flush handler
pub type HandlerResult = Result<(), HandlerError>;

/// Error type for buffer operations
#[derive(Debug, thiserror::Error)]
pub enum BufferError {
    #[error("period must be greater than zero")]
    InvalidPeriod,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("buffer is closed")]
    Closed,

    #[error("flush handler failed: {0}")]
    Handler(HandlerError),

    #[error("flush handler panicked: {0}")]
    HandlerPanicked(String),

    #[error("flush was cancelled, batch dropped")]
    Cancelled,

    #[error("failed to start ticker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// What caused a flush
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlushTrigger {
    /// `flush()` or `flush_async()` called by the owner
    Manual,
    /// The pending count reached the limit inside `put`
    Limit,
    /// The period elapsed on the ticker thread
    Timer,
    /// Pending items delivered while closing
    Close,
}

impl fmt::Display for FlushTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Manual => write!(f, "manual"),
            Self::Limit => write!(f, "limit"),
            Self::Timer => write!(f, "timer"),
            Self::Close => write!(f, "close"),
        }
    }
}

/// A flush that failed where no caller was waiting for it
///
/// Watermark flushes inside `put`, ticker flushes and flushes performed while
/// dropping a buffer have nobody to return an error to. They are reported to
/// the buffer's [`ErrorSink`] instead.
#[derive(Debug)]
pub struct FlushFailure {
    pub trigger: FlushTrigger,
    /// Number of items in the batch that was handed to the handler
    pub items: usize,
    pub error: BufferError,
}

impl fmt::Display for FlushFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} flush of {} item(s) failed: {}",
            self.trigger, self.items, self.error
        )
    }
}

/// Receives background flush failures
pub type ErrorSink = Arc<dyn Fn(&FlushFailure) + Send + Sync>;

/// The sink used when the owner does not supply one
#[must_use]
pub fn log_sink() -> ErrorSink {
    Arc::new(|failure: &FlushFailure| {
        tracing::error!(
            trigger = %failure.trigger,
            items = failure.items,
            error = %failure.error,
            "background flush failed"
        );
    })
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

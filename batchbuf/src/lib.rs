//! Trigger-bounded buffers
//!
//! Concurrent in-memory buffers that collect items from many producers and
//! hand them to a handler in batches, when a period elapses, when the
//! pending count reaches a limit, or when the owner asks for it.
//!
//! - [`Stash`]: insertion-ordered, with single-item take
//! - [`Spooler`]: accumulating, with an optional distinct (coalescing) mode
//!
//! ```text
//!   producers ──put──▶ ┌──────────────────────┐
//!                      │ pending set (mutex)  │──limit reached──▶ handler
//!   ticker ──period──▶ │                      │──period elapsed─▶ handler
//!   owner ──flush────▶ └──────────────────────┘──on demand──────▶ handler
//! ```

pub mod config;
pub(crate) mod engine;
pub mod error;
pub mod handler;
pub mod pending;
pub mod spooler;
pub mod stash;
pub(crate) mod timer;

// Re-export buffer types for convenience
pub use spooler::Spooler;
pub use stash::Stash;

pub use config::{BufferConfig, ClosePolicy, DEFAULT_PERIOD};
pub use error::{
    log_sink, BufferError, ErrorSink, FlushFailure, FlushTrigger, HandlerError, HandlerResult,
};
pub use handler::Handler;
pub use pending::Keyed;

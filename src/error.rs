use thiserror::Error;

/// Error taxonomy for the sharing subsystems.
///
/// Everything except `Cancelled` is recovered at a subsystem boundary and
/// surfaced to the user as a single dialog notification. `Cancelled` is
/// re-raised to the immediate caller so nested operations can unwind, and
/// must never be reported as a generic failure.
#[derive(Debug, Error)]
pub enum ShareError {
    /// Malformed request, e.g. an empty allowed-response set or an
    /// out-of-range auth code length.
    #[error("invalid request: {0}")]
    Validation(String),

    /// A hard precondition was not met (avatar not export-ready, no usable
    /// network address).
    #[error("precondition not met: {0}")]
    Precondition(String),

    /// Listener bind or accept failure.
    #[error("network failure: {0}")]
    Network(String),

    /// The peer presented a wrong or missing auth code.
    #[error("received auth code does not match the session code")]
    AuthMismatch,

    /// No peer connected within the sharing window.
    #[error("timed out waiting for a peer")]
    Timeout,

    /// Explicit user or caller cancellation.
    #[error("operation cancelled")]
    Cancelled,

    /// File read/write/delete failure.
    #[error("io failure: {0}")]
    Io(#[from] std::io::Error),
}

impl ShareError {
    /// True for explicit cancellation, which callers propagate instead of
    /// converting into a failure notification.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ShareError::Cancelled)
    }
}

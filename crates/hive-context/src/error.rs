//! Error types for execution contexts.

/// Errors that can occur while driving a context.
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("Context has terminated")]
    Terminated,

    #[error("Channel closed")]
    ChannelClosed,

    #[error("Context thread panicked")]
    ThreadPanic,

    #[error("Script error: {0}")]
    Script(String),

    #[error("Context creation failed: {0}")]
    CreationFailed(String),

    #[error("Context reset failed: {0}")]
    ResetFailed(String),

    #[error("Failed to spawn thread: {0}")]
    SpawnFailed(#[from] std::io::Error),
}

//! Error types for the dispatch layer.

/// Errors from routing messages into delivery queues or managing handlers.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// No delivery queue exists for this message type. Only receivable
    /// kinds get one.
    #[error("no delivery queue for {0}")]
    UnknownKind(&'static str),

    /// A type-erased message didn't match the queue it was routed to.
    #[error("message routed to the {expected} queue has a different type")]
    TypeMismatch { expected: &'static str },

    /// A kind was added twice.
    #[error("delivery queue for {0} already exists")]
    DuplicateKind(&'static str),
}

/// What a handler returns when it fails.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Return type of every message handler.
pub type HandlerResult = Result<(), HandlerError>;

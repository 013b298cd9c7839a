use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Transient provisioning failure; acquisition retries these up to its
    /// attempt budget before surfacing the last one.
    #[error("endpoint creation failed: {0}")]
    Creation(String),

    /// The client transport went away mid-operation. Aborts a watched
    /// stream immediately and is never retried.
    #[error("client has disconnected")]
    ClientGone,

    #[error("session timed out: {0}")]
    SessionTimeout(String),

    #[error("session closed: {0}")]
    SessionClosed(String),

    /// Programming-level misuse of the state machine (reverse transition,
    /// rebinding an endpoint). A defect, not a retry target.
    #[error("invalid session transition: {0}")]
    InvalidTransition(String),

    #[error("store error: {0}")]
    Store(String),

    /// Transport failure of a proxied call, surfaced to the caller
    /// uninterpreted.
    #[error(transparent)]
    Transport(#[from] reqwest::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

//! Top-level error types for server bootstrap.

use thiserror::Error;

use crate::listener::BindError;
use crate::session::SessionStoreError;

/// Errors surfaced to the embedding application from bootstrap and serving.
///
/// Transient port contention never appears here: it is retried internally.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listener could not be bound for a reason other than port contention.
    #[error(transparent)]
    Bind(#[from] BindError),

    /// The session store could not be initialised.
    #[error("session store: {0}")]
    SessionStore(#[from] SessionStoreError),

    /// The HTTP serve loop terminated with an I/O error.
    #[error("server i/o: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_source_message() {
        let e = ServerError::SessionStore(SessionStoreError::Backend("no route to host".into()));
        assert!(e.to_string().contains("no route to host"));
    }
}

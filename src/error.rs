use thiserror::Error;

/// Structured error hierarchy for Proforma.
///
/// Each boundary subsystem defines its own error enum. Library callers can
/// match on these to decide recovery strategy; bootstrap code continues to
/// use `anyhow::Result` for ad-hoc context chains.
#[derive(Debug, Error)]
pub enum ProformaError {
    #[error("chat: {0}")]
    Chat(#[from] ChatError),

    #[error("store: {0}")]
    Store(#[from] StoreError),

    #[error("resolve: {0}")]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Failures at the chat-transport boundary.
///
/// `PermissionDenied` aborts the session with a notice where one can still be
/// delivered; `NotFound` is ignorable (the message is already gone).
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("missing permission: {0}")]
    PermissionDenied(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("request failed ({status}): {message}")]
    Http { status: u16, message: String },
}

/// Failures at the persistent-store boundary.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Foreign-key violation on a field insert: the owning template was
    /// deleted while the session was running.
    #[error("the owning template no longer exists")]
    TemplateVanished,

    #[error("database: {0}")]
    Database(#[from] sqlx::Error),
}

/// Failures resolving free text to a channel/role reference.
///
/// `NotFound` is the recognizable "could not resolve" condition, distinct
/// from transport failure while talking to the directory.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("could not resolve {0:?} to a reference")]
    NotFound(String),

    #[error("transport: {0}")]
    Transport(#[from] ChatError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_error_displays_status() {
        let err = ChatError::Http {
            status: 429,
            message: "rate limited".into(),
        };
        assert!(err.to_string().contains("429"));
    }

    #[test]
    fn store_error_wraps_into_top_level() {
        let err: ProformaError = StoreError::TemplateVanished.into();
        assert!(err.to_string().contains("no longer exists"));
    }

    #[test]
    fn resolve_not_found_names_the_input() {
        let err = ResolveError::NotFound("#general".into());
        assert!(err.to_string().contains("#general"));
    }

    #[test]
    fn anyhow_interop() {
        let err: ProformaError = anyhow::anyhow!("boom").into();
        assert!(err.to_string().contains("boom"));
    }
}

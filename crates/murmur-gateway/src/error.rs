use thiserror::Error;

/// Why an inbound event was dropped.
///
/// None of these reach the client: the connection loop logs them and moves
/// on to the next frame.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("connection has not authenticated")]
    NotAuthenticated,

    #[error("authenticate rejected: {0}")]
    InvalidToken(String),

    #[error("invalid target: {0}")]
    InvalidTarget(String),

    #[error("store error: {0:#}")]
    Store(#[from] anyhow::Error),

    #[error("blocking task failed: {0}")]
    Blocking(#[from] tokio::task::JoinError),
}

impl HandlerError {
    /// Client mistakes as opposed to server-side failures.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::NotAuthenticated | Self::InvalidToken(_) | Self::InvalidTarget(_)
        )
    }
}

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TunnelError>;

/// Crate-wide error type.
///
/// Variants are split the way §7 of the design splits them: some are fatal
/// to the task that hit them (io, config, auth), others are meant to be
/// logged and swallowed by the caller (`Protocol`) so a single malformed
/// frame never takes down a control session.
#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] serde_json::Error),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("authentication failed")]
    AuthFailed,

    #[error("channel closed")]
    ChannelClosed,
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for TunnelError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        TunnelError::ChannelClosed
    }
}

/// Mirrors the teacher's `require` helper: fail fast with a protocol error
/// when a wire-format invariant doesn't hold.
pub fn require(cond: bool, msg: impl Into<String>) -> Result<()> {
    if !cond {
        return Err(TunnelError::Protocol(msg.into()));
    }
    Ok(())
}

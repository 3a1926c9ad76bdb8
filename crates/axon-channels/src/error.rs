use thiserror::Error;

/// Errors surfaced by channel adapters.
///
/// The gateway reacts to these per channel: send failures feed the
/// reconnect policy, everything else is logged.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel not running")]
    NotRunning,

    #[error("connect failed: {0}")]
    ConnectFailed(String),

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("authentication rejected: {0}")]
    AuthRejected(String),

    #[error("timed out after {ms}ms")]
    Timeout { ms: u64 },

    #[error("bad channel configuration: {0}")]
    Config(String),
}

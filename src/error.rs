use thiserror::Error;

/// Error type shared by the scan engine, the command codec and the connection session.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BeepconError {
    #[error("an operation is already in progress")]
    AlreadyInProgress,

    #[error("a command is already outstanding")]
    CommandInProgress,

    #[error("command requires a validated password")]
    PasswordRequired,

    #[error("no device connected")]
    NotConnected,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("protocol error: {0}")]
    ProtocolError(String),

    #[error("device rejected the command with status 0x{0:02x}")]
    DeviceRejected(u8),

    #[error("timed out waiting for the device")]
    Timeout,

    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),

    #[error("incompatible firmware: {0}")]
    IncompatibleFirmware(String),

    #[error("device version has not been read")]
    VersionUnknown,

    #[error("link to the device was lost")]
    LinkLost,

    #[error("cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, BeepconError>;

impl BeepconError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        BeepconError::InvalidArgument(message.into())
    }

    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        BeepconError::ProtocolError(message.into())
    }
}

use thiserror::Error;
use zelite_ipc::IpcError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("invalid handle: {0}")]
    InvalidHandle(&'static str),

    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("index {index} out of bounds (capacity {capacity})")]
    OutOfBounds { index: u32, capacity: u32 },

    #[error("unsupported feature: {0}")]
    UnsupportedFeature(&'static str),

    #[error("out of device memory (requested {requested} bytes, {available} available)")]
    OutOfDeviceMemory { requested: u64, available: u64 },

    /// Execution-time fault, reported by the next synchronization point.
    #[error("device fault: {0}")]
    DeviceFault(String),

    #[error(transparent)]
    Ipc(#[from] IpcError),
}

impl Error {
    pub(crate) fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }
}

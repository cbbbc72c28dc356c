use thiserror::Error;

/// Failures decoding or resolving an exported IPC handle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IpcError {
    #[error("invalid IPC handle magic 0x{0:08X}")]
    BadMagic(u32),

    #[error("unsupported IPC handle version {0}")]
    UnsupportedVersion(u32),

    #[error("IPC handle kind mismatch (expected {expected}, found {found})")]
    WrongKind { expected: u32, found: u32 },

    #[error("IPC handle was issued by transport {found:#x}, not {expected:#x}")]
    ForeignTransport { expected: u64, found: u64 },

    #[error("unknown or revoked IPC token {0:#x}")]
    UnknownToken(u64),

    #[error("IPC handle reserved bytes are not zero")]
    ReservedNotZero,
}

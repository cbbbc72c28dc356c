//! Wire layout contract for exported IPC handles.
//!
//! An exported handle is a fixed-size byte blob so it can travel through any
//! byte channel (pipe, socket, shared memory) without re-encoding. Every field
//! is a little-endian integer at a fixed offset.

/// Size of every exported handle in bytes.
pub const IPC_HANDLE_BYTES: usize = 64;

/// `b"ZLIP"` as a little-endian `u32`.
pub const IPC_HANDLE_MAGIC: u32 = 0x5049_4C5A;

/// Handle ABI version.
pub const IPC_HANDLE_VERSION: u32 = 1;

/// Byte offsets of the handle fields.
///
/// Layout:
/// - magic (`u32`)
/// - version (`u32`)
/// - kind (`u32`, see [`handle_kind`])
/// - flags (`u32`, kind-specific)
/// - token (`u64`, transport-assigned export identity)
/// - extent (`u64`, slot count for event pools, byte size for memory)
/// - transport id (`u64`, identifies the transport that issued the token)
/// - reserved (zero up to [`IPC_HANDLE_BYTES`])
pub mod handle_offsets {
    pub const MAGIC: usize = 0;
    pub const VERSION: usize = 4;
    pub const KIND: usize = 8;
    pub const FLAGS: usize = 12;
    pub const TOKEN: usize = 16;
    pub const EXTENT: usize = 24;
    pub const TRANSPORT_ID: usize = 32;
    pub const RESERVED: usize = 40;
}

/// Kinds of exported objects.
pub mod handle_kind {
    pub const EVENT_POOL: u32 = 1;
    pub const MEMORY: u32 = 2;
}

/// Per-slot state words stored in an [`EventSlotPage`](crate::EventSlotPage).
pub mod slot_state {
    pub const UNSIGNALED: u32 = 0;
    pub const SIGNALED: u32 = 1;
}

pub(crate) fn read_u32_le(bytes: &[u8; IPC_HANDLE_BYTES], offset: usize) -> u32 {
    let mut tmp = [0u8; 4];
    tmp.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(tmp)
}

pub(crate) fn read_u64_le(bytes: &[u8; IPC_HANDLE_BYTES], offset: usize) -> u64 {
    let mut tmp = [0u8; 8];
    tmp.copy_from_slice(&bytes[offset..offset + 8]);
    u64::from_le_bytes(tmp)
}

pub(crate) fn write_u32_le(bytes: &mut [u8; IPC_HANDLE_BYTES], offset: usize, v: u32) {
    bytes[offset..offset + 4].copy_from_slice(&v.to_le_bytes());
}

pub(crate) fn write_u64_le(bytes: &mut [u8; IPC_HANDLE_BYTES], offset: usize, v: u64) {
    bytes[offset..offset + 8].copy_from_slice(&v.to_le_bytes());
}

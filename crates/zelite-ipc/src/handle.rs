//! Encoding and decoding of exported handles.

use std::fmt;

use crate::error::IpcError;
use crate::layout::{
    handle_kind, handle_offsets, read_u32_le, read_u64_le, write_u32_le, write_u64_le,
    IPC_HANDLE_BYTES, IPC_HANDLE_MAGIC, IPC_HANDLE_VERSION,
};

/// Decoded contents of an exported handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HandleFields {
    pub kind: u32,
    pub flags: u32,
    pub token: u64,
    pub extent: u64,
    pub transport_id: u64,
}

impl HandleFields {
    pub fn encode(&self) -> [u8; IPC_HANDLE_BYTES] {
        let mut bytes = [0u8; IPC_HANDLE_BYTES];
        write_u32_le(&mut bytes, handle_offsets::MAGIC, IPC_HANDLE_MAGIC);
        write_u32_le(&mut bytes, handle_offsets::VERSION, IPC_HANDLE_VERSION);
        write_u32_le(&mut bytes, handle_offsets::KIND, self.kind);
        write_u32_le(&mut bytes, handle_offsets::FLAGS, self.flags);
        write_u64_le(&mut bytes, handle_offsets::TOKEN, self.token);
        write_u64_le(&mut bytes, handle_offsets::EXTENT, self.extent);
        write_u64_le(&mut bytes, handle_offsets::TRANSPORT_ID, self.transport_id);
        bytes
    }

    pub fn decode(bytes: &[u8; IPC_HANDLE_BYTES]) -> Result<Self, IpcError> {
        let magic = read_u32_le(bytes, handle_offsets::MAGIC);
        if magic != IPC_HANDLE_MAGIC {
            return Err(IpcError::BadMagic(magic));
        }
        let version = read_u32_le(bytes, handle_offsets::VERSION);
        if version != IPC_HANDLE_VERSION {
            return Err(IpcError::UnsupportedVersion(version));
        }
        if bytes[handle_offsets::RESERVED..].iter().any(|&b| b != 0) {
            return Err(IpcError::ReservedNotZero);
        }
        Ok(Self {
            kind: read_u32_le(bytes, handle_offsets::KIND),
            flags: read_u32_le(bytes, handle_offsets::FLAGS),
            token: read_u64_le(bytes, handle_offsets::TOKEN),
            extent: read_u64_le(bytes, handle_offsets::EXTENT),
            transport_id: read_u64_le(bytes, handle_offsets::TRANSPORT_ID),
        })
    }
}

macro_rules! typed_handle {
    ($(#[$meta:meta])* $name:ident, $kind:expr) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name {
            bytes: [u8; IPC_HANDLE_BYTES],
        }

        impl $name {
            pub const KIND: u32 = $kind;

            pub(crate) fn from_fields(fields: HandleFields) -> Self {
                debug_assert_eq!(fields.kind, Self::KIND);
                Self {
                    bytes: fields.encode(),
                }
            }

            /// Reconstructs a handle received over a byte channel.
            ///
            /// Only the framing is checked here; the token is resolved when the
            /// handle is opened.
            pub fn from_bytes(bytes: [u8; IPC_HANDLE_BYTES]) -> Result<Self, IpcError> {
                let fields = HandleFields::decode(&bytes)?;
                if fields.kind != Self::KIND {
                    return Err(IpcError::WrongKind {
                        expected: Self::KIND,
                        found: fields.kind,
                    });
                }
                Ok(Self { bytes })
            }

            pub fn as_bytes(&self) -> &[u8; IPC_HANDLE_BYTES] {
                &self.bytes
            }

            pub fn fields(&self) -> HandleFields {
                // Constructors validate the framing, so decoding cannot fail here.
                match HandleFields::decode(&self.bytes) {
                    Ok(fields) => fields,
                    Err(_) => unreachable!("typed IPC handle holds validated bytes"),
                }
            }

            pub fn token(&self) -> u64 {
                self.fields().token
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let fields = self.fields();
                f.debug_struct(stringify!($name))
                    .field("token", &format_args!("{:#x}", fields.token))
                    .field("flags", &format_args!("{:#x}", fields.flags))
                    .field("extent", &fields.extent)
                    .field("transport_id", &format_args!("{:#x}", fields.transport_id))
                    .finish()
            }
        }
    };
}

typed_handle!(
    /// Exported identity of an event pool's slot page.
    IpcEventPoolHandle,
    handle_kind::EVENT_POOL
);

typed_handle!(
    /// Exported identity of a memory allocation.
    IpcMemHandle,
    handle_kind::MEMORY
);

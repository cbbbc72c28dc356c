//! Cross-process plumbing for zelite: the exported handle format, the shared
//! event slot page behind every event pool, and the transport that resolves
//! handles back into shared objects.

mod error;
mod handle;
pub mod layout;
mod slots;
mod transport;

pub use error::IpcError;
pub use handle::{HandleFields, IpcEventPoolHandle, IpcMemHandle};
pub use layout::IPC_HANDLE_BYTES;
pub use slots::{EventSlotPage, SlotTimestamps};
pub use transport::IpcTransport;

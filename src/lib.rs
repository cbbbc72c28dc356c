//! `zelite` re-exports the runtime and its IPC layer under one name.
//!
//! - [`runtime`]: driver, context, memory, events, command lists, queues, fences.
//! - [`ipc`]: handle byte layout, shared event-slot pages, and the transport
//!   that moves them between driver instances.
//!
//! The runtime types are also available at the crate root.

pub use zelite_core as runtime;
pub use zelite_ipc as ipc;

pub use zelite_core::*;

//! Console driver wire contract.
//!
//! Everything a console client, a console server and the kernel console
//! driver exchange through `\Device\ConDrv`:
//!
//! - **ioctl**: device control codes and create-time extended attribute names
//! - **descriptor**: `#[repr(C)]` request/reply structures
//! - **wire**: byte codec for those structures
//!
//! # Framing
//!
//! ```text
//! IoDescriptor (identifier, process, object, function, sizes)
//! └── payload selected by `function`
//!     ├── CONNECT        -> ConnectionInfo (reply)
//!     ├── CREATE_OBJECT  -> CreateObjectInfo
//!     └── USER_DEFINED   -> MsgHeader + API body (see `conmsg`)
//! ```
//!
//! The layouts here are ABI. Field order, widths and padding must not change.

pub mod descriptor;
pub mod ioctl;
pub mod wire;

use thiserror::Error;

pub use descriptor::{
    AccessMask, ConnectionInfo, ConnectionInfo64, CreateObjectInfo, CursorInformation,
    DisplaySize, IoBuffer, IoBuffer64, IoComplete, IoDescriptor, IoFunction, IoOperation,
    IoOperation64, IoStatusBlock, Luid, ObjectType, ServerInformation, ShareMode,
};
pub use ioctl::{CreateEa, Ioctl};
pub use wire::{WireFormat, WireReader, WireWriter};

/// Errors raised while decoding or validating console driver messages.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Message truncated: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    #[error("Unknown I/O function: {0:#x}")]
    UnknownFunction(u32),

    #[error("Unknown object type: {0:#x}")]
    UnknownObjectType(u32),

    #[error("Unknown API number: {0:#010x}")]
    UnknownApi(u32),

    #[error("Message body mismatch: expected API {expected:#010x}, found {found:#010x}")]
    BodyMismatch { expected: u32, found: u32 },
}

//! Server side of the console driver protocol.
//!
//! - **handles**: generation-checked arena behind every object/process handle
//! - **dispatch**: routes driver requests (connect, create/close object,
//!   user-defined API calls) and builds completion replies
//!
//! The console model itself (input buffer, screen buffers) sits behind the
//! [`ApiRoutines`] trait; this module only owns handle lifetime and framing.

pub mod dispatch;
pub mod handles;

use thiserror::Error;

use crate::condrv::ProtocolError;

pub use dispatch::{
    ApiRoutines, ApiStatus, ClientProcess, ConsoleObject, DispatchReply, IoDispatcher, ObjectKind,
    UnimplementedRoutines,
};
pub use handles::{ObjectId, ObjectTable};

/// NTSTATUS values used in completion replies.
pub mod status {
    pub const STATUS_SUCCESS: i32 = 0;
    pub const STATUS_UNSUCCESSFUL: i32 = 0xC000_0001_u32 as i32;
    pub const STATUS_NOT_IMPLEMENTED: i32 = 0xC000_0002_u32 as i32;
    pub const STATUS_INVALID_HANDLE: i32 = 0xC000_0008_u32 as i32;
    pub const STATUS_INVALID_PARAMETER: i32 = 0xC000_000D_u32 as i32;
    pub const STATUS_NO_MEMORY: i32 = 0xC000_0017_u32 as i32;
    pub const STATUS_ACCESS_DENIED: i32 = 0xC000_0022_u32 as i32;
    pub const STATUS_ILLEGAL_FUNCTION: i32 = 0xC000_00AF_u32 as i32;
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServerError {
    #[error("Malformed request: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Request {0:#x} is already outstanding")]
    DuplicateIdentifier(u64),

    #[error("Request {0:#x} is not outstanding")]
    UnknownIdentifier(u64),

    #[error("Object table is full")]
    TableFull,
}

//! Console driver request and reply structures
//!
//! Pointer-sized fields (`ULONG_PTR`, `HANDLE`, `PVOID`) are `usize` and
//! follow the target's width. The `*64` variants are what a 32-bit client
//! running under WOW64 exchanges with a 64-bit driver: their pointer fields
//! are always 64 bits wide, with explicit padding, so they are identical on
//! both sides of the boundary.

use bitflags::bitflags;

use super::wire::{WireFormat, WireReader, WireWriter, POINTER_SIZE};
use super::ProtocolError;

/// Padding after a 32-bit field that precedes a pointer-sized field.
const POINTER_PAD: usize = POINTER_SIZE - 4;

bitflags! {
    /// Sharing requested when a console object is opened.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct ShareMode: u32 {
        const READ  = 0x0000_0001;
        const WRITE = 0x0000_0002;
    }
}

bitflags! {
    /// Generic access rights relevant to console objects.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct AccessMask: u32 {
        const GENERIC_READ  = 0x8000_0000;
        const GENERIC_WRITE = 0x4000_0000;
    }
}

/// Locally unique identifier; the driver uses it as the transaction id.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Luid {
    pub low_part: u32,
    pub high_part: i32,
}

impl Luid {
    pub const fn new(value: u64) -> Self {
        Self {
            low_part: value as u32,
            high_part: (value >> 32) as i32,
        }
    }

    pub const fn as_u64(self) -> u64 {
        (self.high_part as u32 as u64) << 32 | self.low_part as u64
    }
}

impl WireFormat for Luid {
    const WIRE_SIZE: usize = 8;

    fn encode(&self, out: &mut Vec<u8>) {
        out.put_u32(self.low_part);
        out.put_i32(self.high_part);
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            low_part: reader.u32()?,
            high_part: reader.i32()?,
        })
    }
}

/// Kind of request carried by an [`IoDescriptor`].
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IoFunction {
    Connect = 0x01,
    Disconnect = 0x02,
    CreateObject = 0x03,
    CloseObject = 0x04,
    RawWrite = 0x05,
    RawRead = 0x06,
    UserDefined = 0x07,
    RawFlush = 0x08,
}

impl TryFrom<u32> for IoFunction {
    type Error = ProtocolError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Ok(match value {
            0x01 => IoFunction::Connect,
            0x02 => IoFunction::Disconnect,
            0x03 => IoFunction::CreateObject,
            0x04 => IoFunction::CloseObject,
            0x05 => IoFunction::RawWrite,
            0x06 => IoFunction::RawRead,
            0x07 => IoFunction::UserDefined,
            0x08 => IoFunction::RawFlush,
            other => return Err(ProtocolError::UnknownFunction(other)),
        })
    }
}

/// Header of every request the driver hands to a console server.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IoDescriptor {
    /// Transaction id, unique among the connection's outstanding requests.
    pub identifier: Luid,
    /// Server-side value identifying the client process.
    pub process: usize,
    /// Server-side value identifying the target console object.
    pub object: usize,
    pub function: u32,
    pub input_size: u32,
    pub output_size: u32,
    pub reserved: u32,
}

impl IoDescriptor {
    pub fn new(identifier: Luid, function: IoFunction) -> Self {
        Self {
            identifier,
            function: function as u32,
            ..Self::default()
        }
    }

    pub fn function(&self) -> Result<IoFunction, ProtocolError> {
        IoFunction::try_from(self.function)
    }
}

impl WireFormat for IoDescriptor {
    const WIRE_SIZE: usize = Luid::WIRE_SIZE + 2 * POINTER_SIZE + 16;

    fn encode(&self, out: &mut Vec<u8>) {
        self.identifier.encode(out);
        out.put_usize(self.process);
        out.put_usize(self.object);
        out.put_u32(self.function);
        out.put_u32(self.input_size);
        out.put_u32(self.output_size);
        out.put_u32(self.reserved);
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            identifier: Luid::decode(reader)?,
            process: reader.usize()?,
            object: reader.usize()?,
            function: reader.u32()?,
            input_size: reader.u32()?,
            output_size: reader.u32()?,
            reserved: reader.u32()?,
        })
    }
}

/// Object requested by `CONSOLE_IO_CREATE_OBJECT`.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectType {
    CurrentInput = 0x01,
    CurrentOutput = 0x02,
    NewOutput = 0x03,
    Generic = 0x04,
}

impl TryFrom<u32> for ObjectType {
    type Error = ProtocolError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Ok(match value {
            0x01 => ObjectType::CurrentInput,
            0x02 => ObjectType::CurrentOutput,
            0x03 => ObjectType::NewOutput,
            0x04 => ObjectType::Generic,
            other => return Err(ProtocolError::UnknownObjectType(other)),
        })
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CreateObjectInfo {
    pub object_type: u32,
    pub share_mode: u32,
    pub desired_access: u32,
}

impl CreateObjectInfo {
    pub fn new(object_type: ObjectType, share_mode: ShareMode, desired_access: AccessMask) -> Self {
        Self {
            object_type: object_type as u32,
            share_mode: share_mode.bits(),
            desired_access: desired_access.bits(),
        }
    }

    pub fn object_type(&self) -> Result<ObjectType, ProtocolError> {
        ObjectType::try_from(self.object_type)
    }

    pub fn share_mode(&self) -> ShareMode {
        ShareMode::from_bits_retain(self.share_mode)
    }

    pub fn desired_access(&self) -> AccessMask {
        AccessMask::from_bits_retain(self.desired_access)
    }
}

impl WireFormat for CreateObjectInfo {
    const WIRE_SIZE: usize = 12;

    fn encode(&self, out: &mut Vec<u8>) {
        out.put_u32(self.object_type);
        out.put_u32(self.share_mode);
        out.put_u32(self.desired_access);
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            object_type: reader.u32()?,
            share_mode: reader.u32()?,
            desired_access: reader.u32()?,
        })
    }
}

/// Handles a server hands back when it accepts a client connection.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub process: usize,
    pub input: usize,
    pub output: usize,
}

impl WireFormat for ConnectionInfo {
    const WIRE_SIZE: usize = 3 * POINTER_SIZE;

    fn encode(&self, out: &mut Vec<u8>) {
        out.put_usize(self.process);
        out.put_usize(self.input);
        out.put_usize(self.output);
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            process: reader.usize()?,
            input: reader.usize()?,
            output: reader.usize()?,
        })
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionInfo64 {
    pub process: u64,
    pub input: u64,
    pub output: u64,
}

impl From<ConnectionInfo> for ConnectionInfo64 {
    fn from(info: ConnectionInfo) -> Self {
        Self {
            process: info.process as u64,
            input: info.input as u64,
            output: info.output as u64,
        }
    }
}

impl WireFormat for ConnectionInfo64 {
    const WIRE_SIZE: usize = 24;

    fn encode(&self, out: &mut Vec<u8>) {
        out.put_u64(self.process);
        out.put_u64(self.input);
        out.put_u64(self.output);
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            process: reader.u64()?,
            input: reader.u64()?,
            output: reader.u64()?,
        })
    }
}

/// Caller buffer reference (`CD_IO_BUFFER`).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IoBuffer {
    pub size: u32,
    pub buffer: usize,
}

impl WireFormat for IoBuffer {
    const WIRE_SIZE: usize = 4 + POINTER_PAD + POINTER_SIZE;

    fn encode(&self, out: &mut Vec<u8>) {
        out.put_u32(self.size);
        out.pad(POINTER_PAD);
        out.put_usize(self.buffer);
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        let size = reader.u32()?;
        reader.skip(POINTER_PAD)?;
        Ok(Self {
            size,
            buffer: reader.usize()?,
        })
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IoBuffer64 {
    pub size: u32,
    pub reserved: u32,
    pub buffer: u64,
}

impl WireFormat for IoBuffer64 {
    const WIRE_SIZE: usize = 16;

    fn encode(&self, out: &mut Vec<u8>) {
        out.put_u32(self.size);
        out.put_u32(self.reserved);
        out.put_u64(self.buffer);
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            size: reader.u32()?,
            reserved: reader.u32()?,
            buffer: reader.u64()?,
        })
    }
}

/// `IO_STATUS_BLOCK`: an NTSTATUS in a pointer-sized union, plus information.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IoStatusBlock {
    pub status: i32,
    pub reserved: [u8; POINTER_PAD],
    pub information: usize,
}

impl IoStatusBlock {
    pub fn new(status: i32, information: usize) -> Self {
        Self {
            status,
            reserved: [0; POINTER_PAD],
            information,
        }
    }
}

impl WireFormat for IoStatusBlock {
    const WIRE_SIZE: usize = 2 * POINTER_SIZE;

    fn encode(&self, out: &mut Vec<u8>) {
        out.put_i32(self.status);
        out.pad(POINTER_PAD);
        out.put_usize(self.information);
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        let status = reader.i32()?;
        reader.skip(POINTER_PAD)?;
        Ok(Self::new(status, reader.usize()?))
    }
}

/// Reply sent with `IOCTL_CONDRV_COMPLETE_IO`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IoComplete {
    pub identifier: Luid,
    pub io_status: IoStatusBlock,
    pub write: IoBuffer,
}

impl IoComplete {
    pub fn new(identifier: Luid, status: i32, information: usize) -> Self {
        Self {
            identifier,
            io_status: IoStatusBlock::new(status, information),
            write: IoBuffer::default(),
        }
    }
}

impl WireFormat for IoComplete {
    const WIRE_SIZE: usize = Luid::WIRE_SIZE + IoStatusBlock::WIRE_SIZE + IoBuffer::WIRE_SIZE;

    fn encode(&self, out: &mut Vec<u8>) {
        self.identifier.encode(out);
        self.io_status.encode(out);
        self.write.encode(out);
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            identifier: Luid::decode(reader)?,
            io_status: IoStatusBlock::decode(reader)?,
            write: IoBuffer::decode(reader)?,
        })
    }
}

/// Argument of `IOCTL_CONDRV_READ_INPUT`/`WRITE_OUTPUT`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IoOperation {
    pub identifier: Luid,
    pub offset: u32,
    pub data: IoBuffer,
}

impl WireFormat for IoOperation {
    const WIRE_SIZE: usize = Luid::WIRE_SIZE + 4 + POINTER_PAD + IoBuffer::WIRE_SIZE;

    fn encode(&self, out: &mut Vec<u8>) {
        self.identifier.encode(out);
        out.put_u32(self.offset);
        out.pad(POINTER_PAD);
        self.data.encode(out);
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        let identifier = Luid::decode(reader)?;
        let offset = reader.u32()?;
        reader.skip(POINTER_PAD)?;
        Ok(Self {
            identifier,
            offset,
            data: IoBuffer::decode(reader)?,
        })
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IoOperation64 {
    pub identifier: Luid,
    pub offset: u32,
    pub reserved: u32,
    pub data: IoBuffer64,
}

impl WireFormat for IoOperation64 {
    const WIRE_SIZE: usize = Luid::WIRE_SIZE + 8 + IoBuffer64::WIRE_SIZE;

    fn encode(&self, out: &mut Vec<u8>) {
        self.identifier.encode(out);
        out.put_u32(self.offset);
        out.put_u32(self.reserved);
        self.data.encode(out);
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            identifier: Luid::decode(reader)?,
            offset: reader.u32()?,
            reserved: reader.u32()?,
            data: IoBuffer64::decode(reader)?,
        })
    }
}

/// Argument of `IOCTL_CONDRV_SET_SERVER_INFORMATION`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerInformation {
    pub input_available_event: usize,
}

impl WireFormat for ServerInformation {
    const WIRE_SIZE: usize = POINTER_SIZE;

    fn encode(&self, out: &mut Vec<u8>) {
        out.put_usize(self.input_available_event);
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            input_available_event: reader.usize()?,
        })
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DisplaySize {
    pub width: u32,
    pub height: u32,
}

impl WireFormat for DisplaySize {
    const WIRE_SIZE: usize = 8;

    fn encode(&self, out: &mut Vec<u8>) {
        out.put_u32(self.width);
        out.put_u32(self.height);
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            width: reader.u32()?,
            height: reader.u32()?,
        })
    }
}

/// Argument of `IOCTL_CONDRV_SET_CURSOR`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CursorInformation {
    pub column: u16,
    pub row: u16,
    pub height: u32,
    pub is_visible: u8,
}

impl WireFormat for CursorInformation {
    const WIRE_SIZE: usize = 12;

    fn encode(&self, out: &mut Vec<u8>) {
        out.put_u16(self.column);
        out.put_u16(self.row);
        out.put_u32(self.height);
        out.put_u8(self.is_visible);
        out.pad(3);
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        let info = Self {
            column: reader.u16()?,
            row: reader.u16()?,
            height: reader.u32()?,
            is_visible: reader.u8()?,
        };
        reader.skip(3)?;
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::size_of;

    #[test]
    fn test_wire_size_matches_layout() {
        assert_eq!(Luid::WIRE_SIZE, size_of::<Luid>());
        assert_eq!(IoDescriptor::WIRE_SIZE, size_of::<IoDescriptor>());
        assert_eq!(CreateObjectInfo::WIRE_SIZE, size_of::<CreateObjectInfo>());
        assert_eq!(ConnectionInfo::WIRE_SIZE, size_of::<ConnectionInfo>());
        assert_eq!(ConnectionInfo64::WIRE_SIZE, size_of::<ConnectionInfo64>());
        assert_eq!(IoBuffer::WIRE_SIZE, size_of::<IoBuffer>());
        assert_eq!(IoBuffer64::WIRE_SIZE, size_of::<IoBuffer64>());
        assert_eq!(IoStatusBlock::WIRE_SIZE, size_of::<IoStatusBlock>());
        assert_eq!(IoComplete::WIRE_SIZE, size_of::<IoComplete>());
        assert_eq!(IoOperation::WIRE_SIZE, size_of::<IoOperation>());
        assert_eq!(IoOperation64::WIRE_SIZE, size_of::<IoOperation64>());
        assert_eq!(ServerInformation::WIRE_SIZE, size_of::<ServerInformation>());
        assert_eq!(DisplaySize::WIRE_SIZE, size_of::<DisplaySize>());
        assert_eq!(CursorInformation::WIRE_SIZE, size_of::<CursorInformation>());
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_x64_layout_sizes() {
        assert_eq!(size_of::<IoDescriptor>(), 40);
        assert_eq!(size_of::<IoBuffer>(), 16);
        assert_eq!(size_of::<IoComplete>(), 40);
        assert_eq!(size_of::<IoOperation>(), 32);
        assert_eq!(size_of::<ConnectionInfo>(), 24);
    }

    #[test]
    fn test_wow64_variants_have_fixed_width() {
        // Independent of the target pointer width
        assert_eq!(ConnectionInfo64::WIRE_SIZE, 24);
        assert_eq!(IoBuffer64::WIRE_SIZE, 16);
        assert_eq!(IoOperation64::WIRE_SIZE, 32);

        let info = ConnectionInfo {
            process: 0x10,
            input: 0x20,
            output: 0x30,
        };
        let wide = ConnectionInfo64::from(info);
        assert_eq!(wide.to_bytes().len(), 24);
        assert_eq!(wide.input, 0x20);
    }

    #[test]
    fn test_descriptor_layout_on_the_wire() {
        let mut descriptor = IoDescriptor::new(Luid::new(0x1_0000_0002), IoFunction::CreateObject);
        descriptor.process = 0xAB;
        descriptor.object = 0xCD;
        descriptor.input_size = CreateObjectInfo::WIRE_SIZE as u32;

        let bytes = descriptor.to_bytes();
        assert_eq!(bytes.len(), IoDescriptor::WIRE_SIZE);
        assert_eq!(&bytes[0..4], &2u32.to_ne_bytes());
        assert_eq!(&bytes[4..8], &1i32.to_ne_bytes());
        assert_eq!(&bytes[8..8 + POINTER_SIZE], &0xABusize.to_ne_bytes());

        let function_at = 8 + 2 * POINTER_SIZE;
        assert_eq!(&bytes[function_at..function_at + 4], &3u32.to_ne_bytes());

        let decoded = IoDescriptor::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, descriptor);
        assert_eq!(decoded.function(), Ok(IoFunction::CreateObject));
        assert_eq!(decoded.identifier.as_u64(), 0x1_0000_0002);
    }

    #[test]
    fn test_unknown_enumerations_are_rejected() {
        assert_eq!(IoFunction::try_from(9), Err(ProtocolError::UnknownFunction(9)));
        assert_eq!(ObjectType::try_from(0), Err(ProtocolError::UnknownObjectType(0)));
        assert_eq!(IoFunction::try_from(8), Ok(IoFunction::RawFlush));
    }

    #[test]
    fn test_create_object_flags() {
        let info = CreateObjectInfo::new(
            ObjectType::Generic,
            ShareMode::READ | ShareMode::WRITE,
            AccessMask::GENERIC_READ,
        );
        let bytes = info.to_bytes();
        assert_eq!(bytes.len(), 12);
        assert_eq!(&bytes[8..12], &0x8000_0000u32.to_ne_bytes());

        let decoded = CreateObjectInfo::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.object_type(), Ok(ObjectType::Generic));
        assert!(decoded.share_mode().contains(ShareMode::WRITE));
        assert_eq!(decoded.desired_access(), AccessMask::GENERIC_READ);
    }

    #[test]
    fn test_short_buffer_is_truncated_error() {
        let bytes = IoComplete::new(Luid::new(5), 0, 0).to_bytes();
        let err = IoComplete::from_bytes(&bytes[..bytes.len() - 1]).unwrap_err();
        assert!(matches!(err, ProtocolError::Truncated { .. }));
    }
}

//! Console API message bodies
//!
//! Each body follows the message header of a `CONSOLE_IO_USER_DEFINED`
//! request. Layouts mirror the console API message structures, including the
//! padding after `BOOLEAN` fields.

use crate::condrv::{ProtocolError, WireFormat, WireReader, WireWriter};

/// Body of an API that carries nothing but the header.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NoBody;

impl WireFormat for NoBody {
    const WIRE_SIZE: usize = 0;

    fn encode(&self, _out: &mut Vec<u8>) {}

    fn decode(_reader: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(NoBody)
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Coord {
    pub x: i16,
    pub y: i16,
}

impl Coord {
    pub const fn new(x: i16, y: i16) -> Self {
        Self { x, y }
    }

    fn put(&self, out: &mut Vec<u8>) {
        out.put_i16(self.x);
        out.put_i16(self.y);
    }

    fn get(reader: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            x: reader.i16()?,
            y: reader.i16()?,
        })
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SmallRect {
    pub left: i16,
    pub top: i16,
    pub right: i16,
    pub bottom: i16,
}

/// GetConsoleCP / SetConsoleCP
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CodePageMsg {
    pub code_page: u32,
    pub output: bool,
}

impl WireFormat for CodePageMsg {
    const WIRE_SIZE: usize = 8;

    fn encode(&self, out: &mut Vec<u8>) {
        out.put_u32(self.code_page);
        out.put_u8(self.output as u8);
        out.pad(3);
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        let msg = Self {
            code_page: reader.u32()?,
            output: reader.u8()? != 0,
        };
        reader.skip(3)?;
        Ok(msg)
    }
}

/// GetConsoleMode / SetConsoleMode
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModeMsg {
    pub mode: u32,
}

impl WireFormat for ModeMsg {
    const WIRE_SIZE: usize = 4;

    fn encode(&self, out: &mut Vec<u8>) {
        out.put_u32(self.mode);
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self { mode: reader.u32()? })
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputEventsMsg {
    pub ready_events: u32,
}

impl WireFormat for InputEventsMsg {
    const WIRE_SIZE: usize = 4;

    fn encode(&self, out: &mut Vec<u8>) {
        out.put_u32(self.ready_events);
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            ready_events: reader.u32()?,
        })
    }
}

/// ReadConsoleInput / PeekConsoleInput
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GetConsoleInputMsg {
    pub num_records: u32,
    pub flags: u16,
    pub unicode: bool,
}

impl WireFormat for GetConsoleInputMsg {
    const WIRE_SIZE: usize = 8;

    fn encode(&self, out: &mut Vec<u8>) {
        out.put_u32(self.num_records);
        out.put_u16(self.flags);
        out.put_u8(self.unicode as u8);
        out.pad(1);
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        let msg = Self {
            num_records: reader.u32()?,
            flags: reader.u16()?,
            unicode: reader.u8()? != 0,
        };
        reader.skip(1)?;
        Ok(msg)
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadConsoleMsg {
    pub unicode: bool,
    pub process_control_z: bool,
    pub exe_name_length: u16,
    pub initial_num_bytes: u32,
    pub ctrl_wakeup_mask: u32,
    pub control_key_state: u32,
    pub num_bytes: u32,
}

impl WireFormat for ReadConsoleMsg {
    const WIRE_SIZE: usize = 20;

    fn encode(&self, out: &mut Vec<u8>) {
        out.put_u8(self.unicode as u8);
        out.put_u8(self.process_control_z as u8);
        out.put_u16(self.exe_name_length);
        out.put_u32(self.initial_num_bytes);
        out.put_u32(self.ctrl_wakeup_mask);
        out.put_u32(self.control_key_state);
        out.put_u32(self.num_bytes);
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            unicode: reader.u8()? != 0,
            process_control_z: reader.u8()? != 0,
            exe_name_length: reader.u16()?,
            initial_num_bytes: reader.u32()?,
            ctrl_wakeup_mask: reader.u32()?,
            control_key_state: reader.u32()?,
            num_bytes: reader.u32()?,
        })
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteConsoleMsg {
    pub num_bytes: u32,
    pub unicode: bool,
}

impl WireFormat for WriteConsoleMsg {
    const WIRE_SIZE: usize = 8;

    fn encode(&self, out: &mut Vec<u8>) {
        out.put_u32(self.num_bytes);
        out.put_u8(self.unicode as u8);
        out.pad(3);
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        let msg = Self {
            num_bytes: reader.u32()?,
            unicode: reader.u8()? != 0,
        };
        reader.skip(3)?;
        Ok(msg)
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FillConsoleOutputMsg {
    pub write_coord: Coord,
    pub element_type: u32,
    pub element: u16,
    pub length: u32,
}

impl WireFormat for FillConsoleOutputMsg {
    const WIRE_SIZE: usize = 16;

    fn encode(&self, out: &mut Vec<u8>) {
        self.write_coord.put(out);
        out.put_u32(self.element_type);
        out.put_u16(self.element);
        out.pad(2);
        out.put_u32(self.length);
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        let write_coord = Coord::get(reader)?;
        let element_type = reader.u32()?;
        let element = reader.u16()?;
        reader.skip(2)?;
        Ok(Self {
            write_coord,
            element_type,
            element,
            length: reader.u32()?,
        })
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CtrlEventMsg {
    pub ctrl_event: u32,
    pub process_group_id: u32,
}

impl WireFormat for CtrlEventMsg {
    const WIRE_SIZE: usize = 8;

    fn encode(&self, out: &mut Vec<u8>) {
        out.put_u32(self.ctrl_event);
        out.put_u32(self.process_group_id);
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            ctrl_event: reader.u32()?,
            process_group_id: reader.u32()?,
        })
    }
}

/// GetConsoleCursorInfo / SetConsoleCursorInfo
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CursorInfoMsg {
    pub cursor_size: u32,
    pub visible: bool,
}

impl WireFormat for CursorInfoMsg {
    const WIRE_SIZE: usize = 8;

    fn encode(&self, out: &mut Vec<u8>) {
        out.put_u32(self.cursor_size);
        out.put_u8(self.visible as u8);
        out.pad(3);
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        let msg = Self {
            cursor_size: reader.u32()?,
            visible: reader.u8()? != 0,
        };
        reader.skip(3)?;
        Ok(msg)
    }
}

/// Single-coordinate bodies: buffer size, cursor position, largest window.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoordMsg {
    pub coord: Coord,
}

impl WireFormat for CoordMsg {
    const WIRE_SIZE: usize = 4;

    fn encode(&self, out: &mut Vec<u8>) {
        self.coord.put(out);
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            coord: Coord::get(reader)?,
        })
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TextAttributeMsg {
    pub attributes: u16,
}

impl WireFormat for TextAttributeMsg {
    const WIRE_SIZE: usize = 2;

    fn encode(&self, out: &mut Vec<u8>) {
        out.put_u16(self.attributes);
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            attributes: reader.u16()?,
        })
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowInfoMsg {
    pub absolute: bool,
    pub window: SmallRect,
}

impl WireFormat for WindowInfoMsg {
    const WIRE_SIZE: usize = 10;

    fn encode(&self, out: &mut Vec<u8>) {
        out.put_u8(self.absolute as u8);
        out.pad(1);
        out.put_i16(self.window.left);
        out.put_i16(self.window.top);
        out.put_i16(self.window.right);
        out.put_i16(self.window.bottom);
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        let absolute = reader.u8()? != 0;
        reader.skip(1)?;
        Ok(Self {
            absolute,
            window: SmallRect {
                left: reader.i16()?,
                top: reader.i16()?,
                right: reader.i16()?,
                bottom: reader.i16()?,
            },
        })
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GetTitleMsg {
    pub title_length: u32,
    pub unicode: bool,
    pub original: bool,
}

impl WireFormat for GetTitleMsg {
    const WIRE_SIZE: usize = 8;

    fn encode(&self, out: &mut Vec<u8>) {
        out.put_u32(self.title_length);
        out.put_u8(self.unicode as u8);
        out.put_u8(self.original as u8);
        out.pad(2);
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        let msg = Self {
            title_length: reader.u32()?,
            unicode: reader.u8()? != 0,
            original: reader.u8()? != 0,
        };
        reader.skip(2)?;
        Ok(msg)
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetTitleMsg {
    pub unicode: bool,
}

impl WireFormat for SetTitleMsg {
    const WIRE_SIZE: usize = 1;

    fn encode(&self, out: &mut Vec<u8>) {
        out.put_u8(self.unicode as u8);
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            unicode: reader.u8()? != 0,
        })
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MouseInfoMsg {
    pub num_buttons: u32,
}

impl WireFormat for MouseInfoMsg {
    const WIRE_SIZE: usize = 4;

    fn encode(&self, out: &mut Vec<u8>) {
        out.put_u32(self.num_buttons);
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            num_buttons: reader.u32()?,
        })
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FontSizeMsg {
    pub font_index: u32,
    pub font_size: Coord,
}

impl WireFormat for FontSizeMsg {
    const WIRE_SIZE: usize = 8;

    fn encode(&self, out: &mut Vec<u8>) {
        out.put_u32(self.font_index);
        self.font_size.put(out);
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            font_index: reader.u32()?,
            font_size: Coord::get(reader)?,
        })
    }
}

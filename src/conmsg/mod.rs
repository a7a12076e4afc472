//! Console API dispatch table.
//!
//! A `CONSOLE_IO_USER_DEFINED` request carries a message header naming an API
//! ordinal, followed by that API's body. The table below is the single place
//! an ordinal is registered. From it the `console_api_table!` macro generates:
//!
//! - one marker type per API in [`api`], implementing [`ConsoleApi`]
//! - the tagged [`ApiBody`] sum type used by [`ConsoleMessage`]
//! - [`ApiNumber`] and the runtime lookup [`api_info`]
//!
//! Preparing a message for an API that is not in the table does not compile,
//! because there is no marker type to name.

mod messages;

use crate::condrv::{
    IoDescriptor, IoFunction, Luid, ProtocolError, WireFormat, WireReader, WireWriter,
};

pub use messages::*;

pub const CONSOLE_FIRST_API_L1: u32 = 0x0100_0000;
pub const CONSOLE_FIRST_API_L2: u32 = 0x0200_0000;
pub const CONSOLE_FIRST_API_L3: u32 = 0x0300_0000;

/// `CONSOLE_MSG_HEADER`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MsgHeader {
    pub api_number: u32,
    pub api_descriptor_size: u32,
}

impl WireFormat for MsgHeader {
    const WIRE_SIZE: usize = 8;

    fn encode(&self, out: &mut Vec<u8>) {
        out.put_u32(self.api_number);
        out.put_u32(self.api_descriptor_size);
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            api_number: reader.u32()?,
            api_descriptor_size: reader.u32()?,
        })
    }
}

/// Static description of a registered API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApiInfo {
    pub number: u32,
    pub name: &'static str,
    pub body_size: usize,
    pub input_buffers: u32,
    pub output_buffers: u32,
}

/// Compile-time association of an API ordinal with its body and buffer arity.
pub trait ConsoleApi {
    const NUMBER: u32;
    const NAME: &'static str;
    const INPUT_BUFFERS: u32;
    const OUTPUT_BUFFERS: u32;

    type Body: WireFormat + Default + Clone;

    /// Replace `slot` with a default body for this API and return it.
    fn install(slot: &mut ApiBody) -> &mut Self::Body;

    fn body(slot: &ApiBody) -> Option<&Self::Body>;
}

macro_rules! console_api_table {
    ($( $name:ident = $number:expr => $body:ty, in $input:literal, out $output:literal; )*) => {
        /// Body of a console API message, tagged by API.
        #[derive(Debug, Clone, Default, PartialEq, Eq)]
        pub enum ApiBody {
            /// Not a user-defined request.
            #[default]
            Empty,
            $( $name($body), )*
        }

        impl ApiBody {
            pub fn api_number(&self) -> Option<u32> {
                match self {
                    ApiBody::Empty => None,
                    $( ApiBody::$name(_) => Some($number), )*
                }
            }

            fn encode(&self, out: &mut Vec<u8>) {
                match self {
                    ApiBody::Empty => {}
                    $( ApiBody::$name(body) => body.encode(out), )*
                }
            }

            fn decode(number: u32, reader: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
                match number {
                    $( n if n == $number => Ok(ApiBody::$name(<$body>::decode(reader)?)), )*
                    other => Err(ProtocolError::UnknownApi(other)),
                }
            }
        }

        /// API ordinals known to this table.
        #[repr(u32)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum ApiNumber {
            $( $name = $number, )*
        }

        impl TryFrom<u32> for ApiNumber {
            type Error = ProtocolError;

            fn try_from(value: u32) -> Result<Self, Self::Error> {
                match value {
                    $( n if n == $number => Ok(ApiNumber::$name), )*
                    other => Err(ProtocolError::UnknownApi(other)),
                }
            }
        }

        /// Every registered API, in table order.
        pub const API_TABLE: &[ApiInfo] = &[
            $( ApiInfo {
                number: $number,
                name: stringify!($name),
                body_size: <$body as WireFormat>::WIRE_SIZE,
                input_buffers: $input,
                output_buffers: $output,
            }, )*
        ];

        /// Marker types, one per registered API.
        pub mod api {
            use super::*;

            $(
                #[derive(Debug, Clone, Copy, PartialEq, Eq)]
                pub struct $name;

                impl ConsoleApi for $name {
                    const NUMBER: u32 = $number;
                    const NAME: &'static str = stringify!($name);
                    const INPUT_BUFFERS: u32 = $input;
                    const OUTPUT_BUFFERS: u32 = $output;

                    type Body = $body;

                    fn install(slot: &mut ApiBody) -> &mut $body {
                        *slot = ApiBody::$name(<$body>::default());
                        match slot {
                            ApiBody::$name(body) => body,
                            _ => unreachable!(),
                        }
                    }

                    fn body(slot: &ApiBody) -> Option<&$body> {
                        match slot {
                            ApiBody::$name(body) => Some(body),
                            _ => None,
                        }
                    }
                }
            )*
        }
    };
}

console_api_table! {
    GetConsoleCP = CONSOLE_FIRST_API_L1 => CodePageMsg, in 0, out 0;
    GetConsoleMode = CONSOLE_FIRST_API_L1 + 1 => ModeMsg, in 0, out 0;
    SetConsoleMode = CONSOLE_FIRST_API_L1 + 2 => ModeMsg, in 0, out 0;
    GetNumberOfInputEvents = CONSOLE_FIRST_API_L1 + 3 => InputEventsMsg, in 0, out 0;
    GetConsoleInput = CONSOLE_FIRST_API_L1 + 4 => GetConsoleInputMsg, in 0, out 1;
    ReadConsole = CONSOLE_FIRST_API_L1 + 5 => ReadConsoleMsg, in 1, out 1;
    WriteConsole = CONSOLE_FIRST_API_L1 + 6 => WriteConsoleMsg, in 1, out 0;
    NotifyLastClose = CONSOLE_FIRST_API_L1 + 7 => NoBody, in 0, out 0;

    FillConsoleOutput = CONSOLE_FIRST_API_L2 => FillConsoleOutputMsg, in 0, out 0;
    GenerateCtrlEvent = CONSOLE_FIRST_API_L2 + 1 => CtrlEventMsg, in 0, out 0;
    SetActiveScreenBuffer = CONSOLE_FIRST_API_L2 + 2 => NoBody, in 0, out 0;
    FlushInputBuffer = CONSOLE_FIRST_API_L2 + 3 => NoBody, in 0, out 0;
    SetConsoleCP = CONSOLE_FIRST_API_L2 + 4 => CodePageMsg, in 0, out 0;
    GetCursorInfo = CONSOLE_FIRST_API_L2 + 5 => CursorInfoMsg, in 0, out 0;
    SetCursorInfo = CONSOLE_FIRST_API_L2 + 6 => CursorInfoMsg, in 0, out 0;
    SetScreenBufferSize = CONSOLE_FIRST_API_L2 + 9 => CoordMsg, in 0, out 0;
    SetCursorPosition = CONSOLE_FIRST_API_L2 + 10 => CoordMsg, in 0, out 0;
    GetLargestWindowSize = CONSOLE_FIRST_API_L2 + 11 => CoordMsg, in 0, out 0;
    SetTextAttribute = CONSOLE_FIRST_API_L2 + 13 => TextAttributeMsg, in 0, out 0;
    SetWindowInfo = CONSOLE_FIRST_API_L2 + 14 => WindowInfoMsg, in 0, out 0;
    GetTitle = CONSOLE_FIRST_API_L2 + 20 => GetTitleMsg, in 0, out 1;
    SetTitle = CONSOLE_FIRST_API_L2 + 21 => SetTitleMsg, in 1, out 0;

    GetMouseInfo = CONSOLE_FIRST_API_L3 => MouseInfoMsg, in 0, out 0;
    GetFontSize = CONSOLE_FIRST_API_L3 + 1 => FontSizeMsg, in 0, out 0;
}

/// Look up a registered API by ordinal.
pub fn api_info(number: u32) -> Option<&'static ApiInfo> {
    API_TABLE.iter().find(|info| info.number == number)
}

/// A framed console request: descriptor, and for user-defined requests the
/// API header and body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsoleMessage {
    pub descriptor: IoDescriptor,
    pub header: MsgHeader,
    pub body: ApiBody,
}

impl ConsoleMessage {
    pub fn new(identifier: Luid) -> Self {
        Self {
            descriptor: IoDescriptor {
                identifier,
                ..IoDescriptor::default()
            },
            ..Self::default()
        }
    }

    pub fn is_user_defined(&self) -> bool {
        self.descriptor.function == IoFunction::UserDefined as u32
    }

    pub fn api_info(&self) -> Option<&'static ApiInfo> {
        if self.is_user_defined() {
            api_info(self.header.api_number)
        } else {
            None
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(IoDescriptor::WIRE_SIZE + self.descriptor.input_size as usize);
        self.descriptor.encode(&mut out);
        if self.is_user_defined() {
            self.header.encode(&mut out);
            self.body.encode(&mut out);
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let mut reader = WireReader::new(bytes);
        let descriptor = IoDescriptor::decode(&mut reader)?;
        if descriptor.function()? != IoFunction::UserDefined {
            return Ok(Self {
                descriptor,
                ..Self::default()
            });
        }

        let header = MsgHeader::decode(&mut reader)?;
        let body = ApiBody::decode(header.api_number, &mut reader)?;
        Ok(Self {
            descriptor,
            header,
            body,
        })
    }
}

/// Turn `message` into a user-defined request for `A` and return its zeroed
/// body for the caller to fill in.
pub fn prepare_console_message<A: ConsoleApi>(message: &mut ConsoleMessage) -> &mut A::Body {
    let body_size = <A::Body as WireFormat>::WIRE_SIZE;

    message.descriptor.function = IoFunction::UserDefined as u32;
    message.descriptor.input_size = (MsgHeader::WIRE_SIZE + body_size) as u32;
    message.header.api_number = A::NUMBER;
    message.header.api_descriptor_size = body_size as u32;

    A::install(&mut message.body)
}

/// Typed access to the body of a request or reply for `A`.
pub fn read_console_message<A: ConsoleApi>(message: &ConsoleMessage) -> Result<&A::Body, ProtocolError> {
    A::body(&message.body).ok_or(ProtocolError::BodyMismatch {
        expected: A::NUMBER,
        found: message.header.api_number,
    })
}

//! Console driver IOCTL codes
//!
//! Every code is `CTL_CODE(FILE_DEVICE_CONSOLE, n, method, FILE_ANY_ACCESS)`.
//! The method decides how the I/O manager validates the caller's buffers, so
//! both the function number and the method are part of the driver ABI.

/// Device type of `\Device\ConDrv`.
pub const FILE_DEVICE_CONSOLE: u32 = 0x0000_0050;

pub const METHOD_BUFFERED: u32 = 0;
pub const METHOD_IN_DIRECT: u32 = 1;
pub const METHOD_OUT_DIRECT: u32 = 2;
pub const METHOD_NEITHER: u32 = 3;

pub const FILE_ANY_ACCESS: u32 = 0;

/// Equivalent of the `CTL_CODE` macro.
pub const fn ctl_code(device_type: u32, function: u32, method: u32, access: u32) -> u32 {
    (device_type << 16) | (access << 14) | (function << 2) | method
}

const fn condrv_ioctl(function: u32, method: u32) -> u32 {
    ctl_code(FILE_DEVICE_CONSOLE, function, method, FILE_ANY_ACCESS)
}

pub const IOCTL_CONDRV_READ_IO: u32 = condrv_ioctl(1, METHOD_OUT_DIRECT);
pub const IOCTL_CONDRV_COMPLETE_IO: u32 = condrv_ioctl(2, METHOD_NEITHER);
pub const IOCTL_CONDRV_READ_INPUT: u32 = condrv_ioctl(3, METHOD_NEITHER);
pub const IOCTL_CONDRV_WRITE_OUTPUT: u32 = condrv_ioctl(4, METHOD_NEITHER);
pub const IOCTL_CONDRV_ISSUE_USER_IO: u32 = condrv_ioctl(5, METHOD_OUT_DIRECT);
pub const IOCTL_CONDRV_DISCONNECT_PIPE: u32 = condrv_ioctl(6, METHOD_NEITHER);
pub const IOCTL_CONDRV_SET_SERVER_INFORMATION: u32 = condrv_ioctl(7, METHOD_NEITHER);
pub const IOCTL_CONDRV_GET_SERVER_PID: u32 = condrv_ioctl(8, METHOD_NEITHER);
pub const IOCTL_CONDRV_GET_DISPLAY_SIZE: u32 = condrv_ioctl(9, METHOD_NEITHER);
pub const IOCTL_CONDRV_UPDATE_DISPLAY: u32 = condrv_ioctl(10, METHOD_NEITHER);
pub const IOCTL_CONDRV_SET_CURSOR: u32 = condrv_ioctl(11, METHOD_NEITHER);
pub const IOCTL_CONDRV_ALLOW_VIA_UIACCESS: u32 = condrv_ioctl(12, METHOD_NEITHER);
pub const IOCTL_CONDRV_LAUNCH_SERVER: u32 = condrv_ioctl(13, METHOD_NEITHER);

/// Typed view over the console driver IOCTLs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ioctl {
    ReadIo,
    CompleteIo,
    ReadInput,
    WriteOutput,
    IssueUserIo,
    DisconnectPipe,
    SetServerInformation,
    GetServerPid,
    GetDisplaySize,
    UpdateDisplay,
    SetCursor,
    AllowViaUiAccess,
    LaunchServer,
}

impl Ioctl {
    pub const ALL: [Ioctl; 13] = [
        Ioctl::ReadIo,
        Ioctl::CompleteIo,
        Ioctl::ReadInput,
        Ioctl::WriteOutput,
        Ioctl::IssueUserIo,
        Ioctl::DisconnectPipe,
        Ioctl::SetServerInformation,
        Ioctl::GetServerPid,
        Ioctl::GetDisplaySize,
        Ioctl::UpdateDisplay,
        Ioctl::SetCursor,
        Ioctl::AllowViaUiAccess,
        Ioctl::LaunchServer,
    ];

    /// Full 32-bit control code.
    pub const fn code(self) -> u32 {
        match self {
            Ioctl::ReadIo => IOCTL_CONDRV_READ_IO,
            Ioctl::CompleteIo => IOCTL_CONDRV_COMPLETE_IO,
            Ioctl::ReadInput => IOCTL_CONDRV_READ_INPUT,
            Ioctl::WriteOutput => IOCTL_CONDRV_WRITE_OUTPUT,
            Ioctl::IssueUserIo => IOCTL_CONDRV_ISSUE_USER_IO,
            Ioctl::DisconnectPipe => IOCTL_CONDRV_DISCONNECT_PIPE,
            Ioctl::SetServerInformation => IOCTL_CONDRV_SET_SERVER_INFORMATION,
            Ioctl::GetServerPid => IOCTL_CONDRV_GET_SERVER_PID,
            Ioctl::GetDisplaySize => IOCTL_CONDRV_GET_DISPLAY_SIZE,
            Ioctl::UpdateDisplay => IOCTL_CONDRV_UPDATE_DISPLAY,
            Ioctl::SetCursor => IOCTL_CONDRV_SET_CURSOR,
            Ioctl::AllowViaUiAccess => IOCTL_CONDRV_ALLOW_VIA_UIACCESS,
            Ioctl::LaunchServer => IOCTL_CONDRV_LAUNCH_SERVER,
        }
    }

    pub fn from_code(code: u32) -> Option<Ioctl> {
        Self::ALL.iter().copied().find(|ioctl| ioctl.code() == code)
    }

    pub const fn device_type(self) -> u32 {
        self.code() >> 16
    }

    pub const fn function(self) -> u32 {
        (self.code() >> 2) & 0x0FFF
    }

    pub const fn method(self) -> u32 {
        self.code() & 0x3
    }

    pub const fn access(self) -> u32 {
        (self.code() >> 14) & 0x3
    }
}

/// Extended attribute names understood by the driver when a console object
/// is opened, selecting broker, server or attach semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CreateEa {
    Broker,
    Server,
    Attach,
}

impl CreateEa {
    pub const fn name(self) -> &'static str {
        match self {
            CreateEa::Broker => "broker",
            CreateEa::Server => "server",
            CreateEa::Attach => "attach",
        }
    }

    pub fn from_name(name: &str) -> Option<CreateEa> {
        match name {
            "broker" => Some(CreateEa::Broker),
            "server" => Some(CreateEa::Server),
            "attach" => Some(CreateEa::Attach),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ioctl_literal_values() {
        assert_eq!(IOCTL_CONDRV_READ_IO, 0x0050_0006);
        assert_eq!(IOCTL_CONDRV_COMPLETE_IO, 0x0050_000B);
        assert_eq!(IOCTL_CONDRV_READ_INPUT, 0x0050_000F);
        assert_eq!(IOCTL_CONDRV_WRITE_OUTPUT, 0x0050_0013);
        assert_eq!(IOCTL_CONDRV_ISSUE_USER_IO, 0x0050_0016);
        assert_eq!(IOCTL_CONDRV_DISCONNECT_PIPE, 0x0050_001B);
        assert_eq!(IOCTL_CONDRV_SET_SERVER_INFORMATION, 0x0050_001F);
        assert_eq!(IOCTL_CONDRV_GET_SERVER_PID, 0x0050_0023);
        assert_eq!(IOCTL_CONDRV_GET_DISPLAY_SIZE, 0x0050_0027);
        assert_eq!(IOCTL_CONDRV_UPDATE_DISPLAY, 0x0050_002B);
        assert_eq!(IOCTL_CONDRV_SET_CURSOR, 0x0050_002F);
        assert_eq!(IOCTL_CONDRV_ALLOW_VIA_UIACCESS, 0x0050_0033);
        assert_eq!(IOCTL_CONDRV_LAUNCH_SERVER, 0x0050_0037);
    }

    #[test]
    fn test_ioctl_decomposition() {
        for (index, ioctl) in Ioctl::ALL.iter().enumerate() {
            assert_eq!(ioctl.device_type(), FILE_DEVICE_CONSOLE);
            assert_eq!(ioctl.function(), index as u32 + 1);
            assert_eq!(ioctl.access(), FILE_ANY_ACCESS);

            let expected_method = match ioctl {
                Ioctl::ReadIo | Ioctl::IssueUserIo => METHOD_OUT_DIRECT,
                _ => METHOD_NEITHER,
            };
            assert_eq!(ioctl.method(), expected_method, "{:?}", ioctl);
            assert_eq!(Ioctl::from_code(ioctl.code()), Some(*ioctl));
        }
        assert_eq!(Ioctl::from_code(0x0050_0000), None);
    }

    #[test]
    fn test_create_ea_names() {
        for ea in [CreateEa::Broker, CreateEa::Server, CreateEa::Attach] {
            assert_eq!(CreateEa::from_name(ea.name()), Some(ea));
        }
        assert_eq!(CreateEa::Server.name(), "server");
        assert_eq!(CreateEa::from_name("Server"), None);
    }
}

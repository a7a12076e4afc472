//! Headless conhost launcher
//!
//! Starts `conhost.exe --headless` with three anonymous pipes (input,
//! output, signal) and hands the caller the far ends. Unlike
//! `CreatePseudoConsole`, this works with any conhost binary that
//! understands the headless command line, so a newer conhost can be used on
//! an older system.

use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::env::EnvironmentMap;
use super::signal::SignalPipe;

pub const DEFAULT_CONHOST: &str = "conhost.exe";

/// Exit code reported for a process that has not exited yet.
pub const STILL_ACTIVE: u32 = 259;

const E_OUTOFMEMORY: u32 = 0x8007_000E;
const E_INVALIDARG: u32 = 0x8007_0057;
const E_NOTIMPL: u32 = 0x8000_4001;
const E_FAIL: u32 = 0x8000_4005;

#[derive(Error, Debug)]
pub enum PtyError {
    #[error("Failed to create pipe: {0}")]
    PipeCreation(#[source] io::Error),

    #[error("Failed to spawn conhost: {0}")]
    ProcessSpawn(#[source] io::Error),

    #[error("Failed to signal conhost: {0}")]
    Signal(#[source] io::Error),

    #[error("Invalid environment: {0}")]
    Environment(String),

    #[error("Out of memory")]
    OutOfMemory,

    #[error("Pseudo consoles are only available on Windows")]
    Unsupported,
}

impl PtyError {
    /// HRESULT equivalent, for reporting to COM-style callers.
    pub fn hresult(&self) -> i32 {
        let code = match self {
            PtyError::PipeCreation(e) | PtyError::ProcessSpawn(e) | PtyError::Signal(e) => {
                match e.raw_os_error() {
                    Some(code) if code < 0 => code as u32,
                    Some(code) if code > 0 => hresult_from_win32(code as u32),
                    _ => E_FAIL,
                }
            }
            PtyError::Environment(_) => E_INVALIDARG,
            PtyError::OutOfMemory => E_OUTOFMEMORY,
            PtyError::Unsupported => E_NOTIMPL,
        };
        code as i32
    }
}

/// `HRESULT_FROM_WIN32`
pub fn hresult_from_win32(code: u32) -> u32 {
    if code == 0 {
        0
    } else {
        0x8007_0000 | (code & 0xFFFF)
    }
}

pub type Result<T> = std::result::Result<T, PtyError>;

bitflags! {
    /// `PSEUDOCONSOLE_*` creation flags that change the conhost command line.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PtyFlags: u32 {
        /// conhost asks for the cursor position (DSR) before drawing.
        const INHERIT_CURSOR = 0x01;
        const GLYPH_WIDTH_GRAPHEMES = 0x08;
        const GLYPH_WIDTH_WCSWIDTH = 0x10;
        const GLYPH_WIDTH_CONSOLE = 0x18;
    }
}

impl PtyFlags {
    const GLYPH_WIDTH_MASK: u32 = 0x18;

    pub fn text_measurement(self) -> Option<TextMeasurement> {
        match self.bits() & Self::GLYPH_WIDTH_MASK {
            0x08 => Some(TextMeasurement::Graphemes),
            0x10 => Some(TextMeasurement::Wcswidth),
            0x18 => Some(TextMeasurement::Console),
            _ => None,
        }
    }
}

/// How conhost measures the width of text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextMeasurement {
    Graphemes,
    Wcswidth,
    Console,
}

impl TextMeasurement {
    pub fn as_str(self) -> &'static str {
        match self {
            TextMeasurement::Graphemes => "graphemes",
            TextMeasurement::Wcswidth => "wcswidth",
            TextMeasurement::Console => "console",
        }
    }

    pub fn flags(self) -> PtyFlags {
        match self {
            TextMeasurement::Graphemes => PtyFlags::GLYPH_WIDTH_GRAPHEMES,
            TextMeasurement::Wcswidth => PtyFlags::GLYPH_WIDTH_WCSWIDTH,
            TextMeasurement::Console => PtyFlags::GLYPH_WIDTH_CONSOLE,
        }
    }
}

/// What to launch and how.
#[derive(Debug, Clone)]
pub struct PtyOptions {
    /// Command line of the client conhost hosts.
    pub cmdline: String,
    /// Initial size; ignored unless both are nonzero.
    pub width: u16,
    pub height: u16,
    pub starting_directory: Option<PathBuf>,
    /// Extra `CreateProcessW` flags.
    pub creation_flags: u32,
    pub flags: PtyFlags,
    /// Merged over the current environment when not empty.
    pub extra_env: EnvironmentMap,
    pub conhost: String,
}

impl PtyOptions {
    pub fn new(cmdline: impl Into<String>) -> Self {
        Self {
            cmdline: cmdline.into(),
            width: 0,
            height: 0,
            starting_directory: None,
            creation_flags: 0,
            flags: PtyFlags::empty(),
            extra_env: EnvironmentMap::new(),
            conhost: DEFAULT_CONHOST.to_string(),
        }
    }

    pub fn with_size(mut self, width: u16, height: u16) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_flags(mut self, flags: PtyFlags) -> Self {
        self.flags = flags;
        self
    }
}

/// Quote a conhost path containing whitespace so `C:\Program Files\...`
/// cannot resolve to `C:\Program.exe`.
fn quote_conhost_path(conhost: &str) -> String {
    let quoted = conhost.len() >= 2 && conhost.starts_with('"') && conhost.ends_with('"');
    if !quoted && conhost.contains([' ', '\t']) {
        format!("\"{}\"", conhost)
    } else {
        conhost.to_string()
    }
}

/// `<conhost> --headless [--inheritcursor] [--textMeasurement M] [--width W --height H]
/// --signal 0x<handle> -- <cmdline>`
pub fn build_conhost_commandline(
    conhost: &str,
    cmdline: &str,
    width: u16,
    height: u16,
    flags: PtyFlags,
    signal_handle: usize,
) -> String {
    let mut command = format!("{} --headless", quote_conhost_path(conhost));
    if flags.contains(PtyFlags::INHERIT_CURSOR) {
        command.push_str(" --inheritcursor");
    }
    if let Some(measurement) = flags.text_measurement() {
        command.push_str(&format!(" --textMeasurement {}", measurement.as_str()));
    }
    if width != 0 && height != 0 {
        command.push_str(&format!(" --width {} --height {}", width, height));
    }
    command.push_str(&format!(" --signal {:#x} -- {}", signal_handle, cmdline));
    command
}

/// The hosting conhost process.
#[derive(Debug)]
pub struct ProcessInfo {
    pid: u32,
    #[cfg(windows)]
    handle: std::os::windows::io::OwnedHandle,
}

impl ProcessInfo {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Wait for exit. `None` waits forever. Returns whether the process exited.
    #[cfg(windows)]
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        use std::os::windows::io::AsRawHandle;
        use windows::Win32::Foundation::HANDLE;
        use windows::Win32::System::Threading::{WaitForSingleObject, INFINITE};

        let millis = match timeout {
            Some(timeout) => timeout.as_millis().min(u128::from(INFINITE - 1)) as u32,
            None => INFINITE,
        };
        unsafe {
            let result = WaitForSingleObject(HANDLE(self.handle.as_raw_handle()), millis);
            result.0 == 0 // WAIT_OBJECT_0
        }
    }

    #[cfg(not(windows))]
    pub fn wait(&self, _timeout: Option<Duration>) -> bool {
        true
    }

    /// Raw exit code; [`STILL_ACTIVE`] while running.
    #[cfg(windows)]
    pub fn exit_code(&self) -> io::Result<u32> {
        use std::os::windows::io::AsRawHandle;
        use windows::Win32::Foundation::HANDLE;
        use windows::Win32::System::Threading::GetExitCodeProcess;

        let mut code = 0u32;
        unsafe {
            GetExitCodeProcess(HANDLE(self.handle.as_raw_handle()), &mut code).map_err(io::Error::from)?;
        }
        Ok(code)
    }

    #[cfg(not(windows))]
    pub fn exit_code(&self) -> io::Result<u32> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "no process"))
    }
}

/// A running headless conhost. Dropping it closes every pipe, which makes
/// conhost exit. Fields drop in declaration order: signal pipe first,
/// process handle last.
#[derive(Debug)]
pub struct PtySession {
    pub signal: SignalPipe<File>,
    /// Keystrokes and VT input for the hosted client.
    pub input: File,
    /// VT output rendered by conhost.
    pub output: File,
    pub process: ProcessInfo,
}

impl PtySession {
    pub fn resize(&mut self, width: u16, height: u16) -> Result<()> {
        self.signal.resize_window(width, height).map_err(PtyError::Signal)
    }

    /// Tear the session down: the signal pipe goes first, then the data
    /// pipes. Waits up to `timeout` for conhost to exit before the process
    /// handle is released, and returns whether it did.
    pub fn close(self, timeout: Option<Duration>) -> bool {
        let PtySession {
            signal,
            input,
            output,
            process,
        } = self;
        drop(signal);
        drop(input);
        drop(output);

        let exited = process.wait(timeout);
        debug!("conhost pid {} closed, exited: {}", process.pid(), exited);
        exited
    }
}

#[cfg(windows)]
pub fn create_conpty(options: &PtyOptions) -> Result<PtySession> {
    unsafe { conhost::launch(options) }
}

#[cfg(not(windows))]
pub fn create_conpty(options: &PtyOptions) -> Result<PtySession> {
    debug!("Refusing to launch {:?} on this platform", options.conhost);
    Err(PtyError::Unsupported)
}

#[cfg(windows)]
mod conhost {
    use std::ffi::c_void;
    use std::os::windows::ffi::OsStrExt;
    use std::os::windows::io::{AsRawHandle, FromRawHandle, OwnedHandle};

    use tracing::info;
    use windows::core::{PCWSTR, PWSTR};
    use windows::Win32::Foundation::{SetHandleInformation, HANDLE, HANDLE_FLAG_INHERIT};
    use windows::Win32::System::Pipes::CreatePipe;
    use windows::Win32::System::Threading::{
        CreateProcessW, DeleteProcThreadAttributeList, InitializeProcThreadAttributeList,
        UpdateProcThreadAttribute, CREATE_UNICODE_ENVIRONMENT, EXTENDED_STARTUPINFO_PRESENT,
        LPPROC_THREAD_ATTRIBUTE_LIST, PROCESS_CREATION_FLAGS, PROCESS_INFORMATION,
        STARTF_USESTDHANDLES, STARTUPINFOEXW,
    };

    use super::*;

    const PROC_THREAD_ATTRIBUTE_HANDLE_LIST: usize = 0x0002_0002;

    fn raw(handle: &OwnedHandle) -> HANDLE {
        HANDLE(handle.as_raw_handle())
    }

    unsafe fn pipe() -> Result<(OwnedHandle, OwnedHandle)> {
        let mut read = HANDLE::default();
        let mut write = HANDLE::default();
        CreatePipe(&mut read, &mut write, None, 0).map_err(|e| PtyError::PipeCreation(e.into()))?;
        Ok((
            OwnedHandle::from_raw_handle(read.0),
            OwnedHandle::from_raw_handle(write.0),
        ))
    }

    unsafe fn make_inheritable(handle: &OwnedHandle) -> Result<()> {
        SetHandleInformation(raw(handle), HANDLE_FLAG_INHERIT.0, HANDLE_FLAG_INHERIT)
            .map_err(|e| PtyError::PipeCreation(e.into()))
    }

    /// Attribute list restricting inheritance to an explicit set of handles.
    struct HandleList {
        // usize words keep the list pointer-aligned
        _buffer: Vec<usize>,
        list: LPPROC_THREAD_ATTRIBUTE_LIST,
    }

    impl HandleList {
        /// `handles` must outlive the `CreateProcessW` call.
        unsafe fn new(handles: &[HANDLE]) -> Result<Self> {
            let mut size: usize = 0;
            let _ = InitializeProcThreadAttributeList(LPPROC_THREAD_ATTRIBUTE_LIST::default(), 1, 0, &mut size);

            let word = std::mem::size_of::<usize>();
            let words = (size + word - 1) / word;
            let mut buffer: Vec<usize> = Vec::new();
            buffer.try_reserve_exact(words).map_err(|_| PtyError::OutOfMemory)?;
            buffer.resize(words, 0);
            let list = LPPROC_THREAD_ATTRIBUTE_LIST(buffer.as_mut_ptr() as *mut c_void);

            InitializeProcThreadAttributeList(list, 1, 0, &mut size)
                .map_err(|e| PtyError::ProcessSpawn(e.into()))?;
            let attributes = Self { _buffer: buffer, list };

            UpdateProcThreadAttribute(
                attributes.list,
                0,
                PROC_THREAD_ATTRIBUTE_HANDLE_LIST,
                Some(handles.as_ptr() as *const c_void),
                std::mem::size_of_val(handles),
                None,
                None,
            )
            .map_err(|e| PtyError::ProcessSpawn(e.into()))?;

            Ok(attributes)
        }
    }

    impl Drop for HandleList {
        fn drop(&mut self) {
            unsafe { DeleteProcThreadAttributeList(self.list) };
        }
    }

    fn wide(text: &str) -> Vec<u16> {
        text.encode_utf16().chain(std::iter::once(0)).collect()
    }

    pub(super) unsafe fn launch(options: &PtyOptions) -> Result<PtySession> {
        // Our ends stay non-inheritable; conhost's ends are opened up below
        let (conhost_input, input) = pipe()?;
        let (output, conhost_output) = pipe()?;
        let (conhost_signal, signal) = pipe()?;

        for handle in [&conhost_input, &conhost_output, &conhost_signal] {
            make_inheritable(handle)?;
        }
        let inherited = [raw(&conhost_input), raw(&conhost_output), raw(&conhost_signal)];
        let attributes = HandleList::new(&inherited)?;

        let command = build_conhost_commandline(
            &options.conhost,
            &options.cmdline,
            options.width,
            options.height,
            options.flags,
            conhost_signal.as_raw_handle() as usize,
        );
        info!("Launching: {}", command);
        let mut command_wide = wide(&command);

        let mut flags = EXTENDED_STARTUPINFO_PRESENT | PROCESS_CREATION_FLAGS(options.creation_flags);
        let environment = if options.extra_env.is_empty() {
            None
        } else {
            let mut env = options.extra_env.clone();
            env.merge_current_process();
            flags |= CREATE_UNICODE_ENVIRONMENT;
            Some(env.to_environment_block())
        };

        let directory: Option<Vec<u16>> = options.starting_directory.as_ref().map(|dir| {
            dir.as_os_str().encode_wide().chain(std::iter::once(0)).collect()
        });

        let mut startup_info = STARTUPINFOEXW {
            StartupInfo: std::mem::zeroed(),
            lpAttributeList: attributes.list,
        };
        startup_info.StartupInfo.cb = std::mem::size_of::<STARTUPINFOEXW>() as u32;
        startup_info.StartupInfo.dwFlags = STARTF_USESTDHANDLES;
        startup_info.StartupInfo.hStdInput = raw(&conhost_input);
        startup_info.StartupInfo.hStdOutput = raw(&conhost_output);
        startup_info.StartupInfo.hStdError = raw(&conhost_output);

        let mut process_info = PROCESS_INFORMATION::default();
        let spawned = CreateProcessW(
            PCWSTR::null(),
            PWSTR(command_wide.as_mut_ptr()),
            None,
            None,
            true,
            flags,
            environment.as_ref().map(|block| block.as_ptr() as *const c_void),
            directory.as_ref().map_or(PCWSTR::null(), |dir| PCWSTR(dir.as_ptr())),
            &startup_info.StartupInfo,
            &mut process_info,
        );

        // conhost holds its own copies now, or never will
        drop(attributes);
        drop(conhost_input);
        drop(conhost_output);
        drop(conhost_signal);

        spawned.map_err(|e| PtyError::ProcessSpawn(e.into()))?;

        drop(OwnedHandle::from_raw_handle(process_info.hThread.0));
        let process = ProcessInfo {
            pid: process_info.dwProcessId,
            handle: OwnedHandle::from_raw_handle(process_info.hProcess.0),
        };
        debug!("conhost started, pid {}", process.pid);

        Ok(PtySession {
            signal: SignalPipe::new(File::from(signal)),
            input: File::from(input),
            output: File::from(output),
            process,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commandline_with_size() {
        assert_eq!(
            build_conhost_commandline("conhost.exe", "cmd.exe /k dir", 120, 30, PtyFlags::empty(), 0x1a4),
            "conhost.exe --headless --width 120 --height 30 --signal 0x1a4 -- cmd.exe /k dir"
        );
    }

    #[test]
    fn test_commandline_without_size() {
        assert_eq!(
            build_conhost_commandline("C:\\bin\\conhost.exe", "pwsh", 0, 0, PtyFlags::empty(), 0x88),
            "C:\\bin\\conhost.exe --headless --signal 0x88 -- pwsh"
        );
        // Both dimensions are required
        assert_eq!(
            build_conhost_commandline("conhost.exe", "cmd", 80, 0, PtyFlags::empty(), 0x10),
            "conhost.exe --headless --signal 0x10 -- cmd"
        );
    }

    #[test]
    fn test_commandline_flags() {
        let flags = PtyFlags::INHERIT_CURSOR | TextMeasurement::Wcswidth.flags();
        assert_eq!(
            build_conhost_commandline("conhost.exe", "cmd", 80, 25, flags, 0x10),
            "conhost.exe --headless --inheritcursor --textMeasurement wcswidth --width 80 --height 25 --signal 0x10 -- cmd"
        );
        assert_eq!(
            build_conhost_commandline("conhost.exe", "cmd", 0, 0, PtyFlags::GLYPH_WIDTH_CONSOLE, 0x10),
            "conhost.exe --headless --textMeasurement console --signal 0x10 -- cmd"
        );
        assert_eq!(PtyFlags::GLYPH_WIDTH_GRAPHEMES.text_measurement(), Some(TextMeasurement::Graphemes));
        assert_eq!(PtyFlags::INHERIT_CURSOR.text_measurement(), None);
    }

    #[test]
    fn test_conhost_path_with_spaces_is_quoted() {
        assert_eq!(
            build_conhost_commandline(
                "C:\\Program Files\\Terminal\\OpenConsole.exe",
                "cmd",
                0,
                0,
                PtyFlags::empty(),
                0x20
            ),
            "\"C:\\Program Files\\Terminal\\OpenConsole.exe\" --headless --signal 0x20 -- cmd"
        );
        // Already quoted paths are left alone
        assert_eq!(quote_conhost_path("\"C:\\a b\\conhost.exe\""), "\"C:\\a b\\conhost.exe\"");
        assert_eq!(quote_conhost_path("conhost.exe"), "conhost.exe");
    }

    #[test]
    fn test_hresult_mapping() {
        assert_eq!(PtyError::OutOfMemory.hresult() as u32, 0x8007_000E);
        assert_eq!(hresult_from_win32(5), 0x8007_0005);
        assert_eq!(hresult_from_win32(0), 0);

        let spawn = PtyError::ProcessSpawn(io::Error::from_raw_os_error(2));
        assert_eq!(spawn.hresult() as u32, 0x8007_0002);

        let signal = PtyError::Signal(io::Error::new(io::ErrorKind::Other, "gone"));
        assert_eq!(signal.hresult() as u32, E_FAIL);
    }

    #[test]
    fn test_options_defaults() {
        let options = PtyOptions::new("cmd.exe").with_size(80, 25);
        assert_eq!(options.conhost, DEFAULT_CONHOST);
        assert_eq!((options.width, options.height), (80, 25));
        assert!(options.extra_env.is_empty());
        assert!(options.flags.is_empty());
        assert_eq!(options.with_flags(PtyFlags::INHERIT_CURSOR).flags, PtyFlags::INHERIT_CURSOR);
    }

    #[test]
    #[cfg(not(windows))]
    fn test_launch_unsupported() {
        assert!(matches!(
            create_conpty(&PtyOptions::new("sh")),
            Err(PtyError::Unsupported)
        ));
    }

    #[test]
    #[cfg(windows)]
    fn test_conpty_echo() {
        use std::io::Read;

        let mut session = create_conpty(&PtyOptions::new("cmd.exe /c echo hi").with_size(80, 25)).unwrap();
        session.resize(100, 30).unwrap();

        let mut seen = String::new();
        let mut buffer = [0u8; 4096];
        while !seen.contains("hi") {
            let n = session.output.read(&mut buffer).unwrap_or(0);
            if n == 0 {
                break;
            }
            seen.push_str(&String::from_utf8_lossy(&buffer[..n]));
        }
        assert!(seen.contains("hi"), "output: {:?}", seen);
    }

    #[cfg(windows)]
    fn read_until(output: &mut File, needle: &str) -> String {
        use std::io::Read;

        let mut seen = String::new();
        let mut buffer = [0u8; 4096];
        while !seen.contains(needle) {
            let n = output.read(&mut buffer).unwrap_or(0);
            if n == 0 {
                break;
            }
            seen.push_str(&String::from_utf8_lossy(&buffer[..n]));
        }
        seen
    }

    #[test]
    #[cfg(windows)]
    fn test_interactive_echo_then_resize() {
        use std::io::Write;

        let mut session = create_conpty(&PtyOptions::new("cmd.exe").with_size(80, 24)).unwrap();

        session.input.write_all(b"echo hi\r\n").unwrap();
        let seen = read_until(&mut session.output, "hi");
        assert!(seen.contains("hi"), "output: {:?}", seen);

        session.resize(100, 40).unwrap();

        // Output keeps flowing after the resize
        session.input.write_all(b"echo after-resize\r\n").unwrap();
        let seen = read_until(&mut session.output, "after-resize");
        assert!(seen.contains("after-resize"), "output: {:?}", seen);

        assert!(session.close(Some(Duration::from_secs(10))));
    }

    #[test]
    #[cfg(windows)]
    fn test_output_reaches_eof_after_conhost_exits() {
        use std::io::Read;

        // EOF only arrives if no copy of conhost's write end stayed open here
        let mut session = create_conpty(&PtyOptions::new("cmd.exe /c exit 0").with_size(80, 24)).unwrap();
        let mut sink = Vec::new();
        let _ = session.output.read_to_end(&mut sink);
        assert!(session.process.wait(Some(Duration::from_secs(10))));
    }

    #[test]
    #[cfg(windows)]
    fn test_failed_launch_leaks_no_handles() {
        use windows::Win32::System::Threading::{GetCurrentProcess, GetProcessHandleCount};

        fn handle_count() -> u32 {
            let mut count = 0u32;
            unsafe { GetProcessHandleCount(GetCurrentProcess(), &mut count).unwrap() };
            count
        }

        let mut missing = PtyOptions::new("cmd.exe");
        missing.conhost = "C:\\no-such-dir\\conhost.exe".to_string();

        // Warm up lazily created handles before measuring
        assert!(matches!(create_conpty(&missing), Err(PtyError::ProcessSpawn(_))));

        const ATTEMPTS: u32 = 100;
        let before = handle_count();
        for _ in 0..ATTEMPTS {
            assert!(matches!(create_conpty(&missing), Err(PtyError::ProcessSpawn(_))));
        }
        let after = handle_count();

        // A leak would cost six pipe handles per attempt; other tests only add a few
        assert!(after < before + ATTEMPTS, "handles grew from {} to {}", before, after);
    }
}

//! Terminal connections
//!
//! A connection carries text both ways between a console front end and
//! something that renders VT: the front end writes keystrokes with
//! [`TerminalConnection::write_input`] and receives output through
//! registered handlers.

use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::state::{ConnectionState, StateCell};
use crate::core::pty::{create_conpty, PtyError, PtyOptions, PtySession, STILL_ACTIVE};
use crate::core::signal::SignalPipe;

pub type OutputHandler = Box<dyn Fn(&str) + Send + Sync>;
pub type StateHandler = Box<dyn Fn(ConnectionState) + Send + Sync>;

pub trait TerminalConnection: Send + Sync {
    fn start(&self);
    fn write_input(&self, data: &str);
    fn resize(&self, rows: u32, columns: u32);
    fn close(&self);
    fn state(&self) -> ConnectionState;
    fn on_output(&self, handler: OutputHandler);
    fn on_state_changed(&self, handler: StateHandler);
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// State and handler lists shared by a connection and its worker threads.
#[derive(Default)]
pub struct ConnectionCore {
    state: StateCell,
    output_handlers: Mutex<Vec<OutputHandler>>,
    state_handlers: Mutex<Vec<StateHandler>>,
}

impl ConnectionCore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn add_output_handler(&self, handler: OutputHandler) {
        lock(&self.output_handlers).push(handler);
    }

    pub fn add_state_handler(&self, handler: StateHandler) {
        lock(&self.state_handlers).push(handler);
    }

    pub fn emit_output(&self, text: &str) {
        if text.is_empty() {
            return;
        }
        for handler in lock(&self.output_handlers).iter() {
            handler(text);
        }
    }

    /// Advance the state and raise the state handlers if it moved.
    pub fn transition(&self, to: ConnectionState) -> bool {
        if !self.state.transition(to) {
            return false;
        }
        debug!("Connection state -> {:?}", to);
        for handler in lock(&self.state_handlers).iter() {
            handler(to);
        }
        true
    }
}

/// Incremental UTF-8 decoder. A sequence split across reads is held back
/// until it completes; invalid bytes become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);

        let mut text = String::new();
        let mut input = &self.pending[..];
        loop {
            match std::str::from_utf8(input) {
                Ok(valid) => {
                    text.push_str(valid);
                    input = &[];
                    break;
                }
                Err(e) => {
                    let (valid, rest) = input.split_at(e.valid_up_to());
                    text.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(len) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            input = &rest[len..];
                        }
                        None => {
                            input = rest;
                            break;
                        }
                    }
                }
            }
        }

        let held = input.to_vec();
        self.pending = held;
        text
    }

    /// Flush a truncated trailing sequence.
    pub fn finish(&mut self) -> String {
        if self.pending.is_empty() {
            String::new()
        } else {
            self.pending.clear();
            char::REPLACEMENT_CHARACTER.to_string()
        }
    }
}

fn format_status(status: u32) -> String {
    format!("{0} ({0:#010x})", status)
}

/// Read conhost output until EOF, then settle the final state from the
/// exit code `exit_code` reports.
///
/// [`ConptyConnection`] passes conhost's own exit code. conhost exits with
/// `STATUS_SUCCESS` once its last client disconnects, whatever code that
/// client returned; the client's pid never reaches the launcher. A nonzero
/// code therefore means conhost itself failed.
pub fn pump_output<R: Read>(mut output: R, core: &ConnectionCore, exit_code: impl FnOnce() -> u32) {
    let mut decoder = Utf8Decoder::new();
    let mut buffer = vec![0u8; 4096];

    loop {
        match output.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => core.emit_output(&decoder.decode(&buffer[..n])),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                // Broken pipe is how conhost going away usually looks
                debug!("Output pipe read ended: {}", e);
                break;
            }
        }
    }
    core.emit_output(&decoder.finish());

    let code = exit_code();
    info!("Hosted process exited with {}", format_status(code));
    if code == 0 || code == STILL_ACTIVE {
        core.transition(ConnectionState::Closed);
    } else if core.transition(ConnectionState::Failed) {
        core.emit_output(&format!("\r\n[process exited with code {}]\r\n", format_status(code)));
    }
}

/// Pipe ends the front end writes to.
struct Channels {
    // Dropped before input, as in PtySession
    signal: SignalPipe<std::fs::File>,
    input: std::fs::File,
}

/// Connection to a client hosted by a headless conhost.
pub struct ConptyConnection {
    options: Mutex<PtyOptions>,
    core: Arc<ConnectionCore>,
    channels: Mutex<Option<Channels>>,
}

impl ConptyConnection {
    pub fn new(options: PtyOptions) -> Self {
        Self {
            options: Mutex::new(options),
            core: Arc::new(ConnectionCore::new()),
            channels: Mutex::new(None),
        }
    }

    /// Current `(columns, rows)`.
    pub fn size(&self) -> (u16, u16) {
        let options = lock(&self.options);
        (options.width, options.height)
    }

    fn launch_failed(&self, options: &PtyOptions, e: &PtyError) {
        error!("Failed to launch {:?}: {}", options.cmdline, e);
        self.core.emit_output(&format!(
            "[error {} when launching `{}']\r\n",
            format_status(e.hresult() as u32),
            options.cmdline
        ));
        if let Some(dir) = options.starting_directory.as_ref() {
            if let PtyError::ProcessSpawn(inner) = e {
                // ERROR_DIRECTORY
                if inner.raw_os_error() == Some(267) {
                    self.core
                        .emit_output(&format!("\r\nCould not access starting directory \"{}\"\r\n", dir.display()));
                }
            }
        }
        self.core.transition(ConnectionState::Failed);
    }
}

fn clamp_dimension(value: u32) -> u16 {
    value.clamp(1, i16::MAX as u32) as u16
}

impl TerminalConnection for ConptyConnection {
    fn start(&self) {
        let options = lock(&self.options).clone();

        let session = match create_conpty(&options) {
            Ok(session) => session,
            Err(e) => {
                self.launch_failed(&options, &e);
                return;
            }
        };

        let PtySession {
            input,
            output,
            signal,
            process,
        } = session;
        *lock(&self.channels) = Some(Channels { input, signal });
        self.core.transition(ConnectionState::Connected);
        info!("Connected to conhost pid {}", process.pid());

        let core = self.core.clone();
        let spawned = thread::Builder::new()
            .name("conpty-output".to_string())
            .spawn(move || {
                pump_output(output, &core, || {
                    process.wait(Some(Duration::from_secs(1)));
                    process.exit_code().unwrap_or_else(|e| {
                        warn!("Could not query exit code: {}", e);
                        STILL_ACTIVE
                    })
                });
            });

        if let Err(e) = spawned {
            error!("Failed to spawn output thread: {}", e);
            lock(&self.channels).take();
            self.core.transition(ConnectionState::Failed);
        }
    }

    fn write_input(&self, data: &str) {
        if !self.core.is_connected() {
            return;
        }

        let mut channels = lock(&self.channels);
        let Some(active) = channels.as_mut() else {
            return;
        };
        if let Err(e) = active.input.write_all(data.as_bytes()) {
            // The output side notices the broken pipe and settles the state
            warn!("Input pipe write failed: {}", e);
            channels.take();
        }
    }

    fn resize(&self, rows: u32, columns: u32) {
        let (width, height) = (clamp_dimension(columns), clamp_dimension(rows));
        {
            let mut options = lock(&self.options);
            options.width = width;
            options.height = height;
        }

        if let Some(active) = lock(&self.channels).as_mut() {
            if let Err(e) = active.signal.resize_window(width, height) {
                warn!("Resize to {}x{} failed: {}", width, height, e);
            }
        }
    }

    fn close(&self) {
        // Dropping our pipe ends makes conhost exit
        if lock(&self.channels).take().is_some() {
            debug!("Closed conhost pipes");
        }
        self.core.transition(ConnectionState::Closed);
    }

    fn state(&self) -> ConnectionState {
        self.core.state()
    }

    fn on_output(&self, handler: OutputHandler) {
        self.core.add_output_handler(handler);
    }

    fn on_state_changed(&self, handler: StateHandler) {
        self.core.add_state_handler(handler);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn recording_core() -> (Arc<ConnectionCore>, Arc<Mutex<String>>, Arc<Mutex<Vec<ConnectionState>>>) {
        let core = Arc::new(ConnectionCore::new());
        let text = Arc::new(Mutex::new(String::new()));
        let states = Arc::new(Mutex::new(Vec::new()));

        let sink = text.clone();
        core.add_output_handler(Box::new(move |chunk: &str| sink.lock().unwrap().push_str(chunk)));
        let sink = states.clone();
        core.add_state_handler(Box::new(move |state| sink.lock().unwrap().push(state)));
        (core, text, states)
    }

    /// Hands out the bytes in fixed-size reads.
    struct Chunked<'a> {
        bytes: &'a [u8],
        chunk: usize,
    }

    impl Read for Chunked<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.chunk.min(self.bytes.len()).min(buf.len());
            buf[..n].copy_from_slice(&self.bytes[..n]);
            self.bytes = &self.bytes[n..];
            Ok(n)
        }
    }

    #[test]
    fn test_decoder_holds_split_sequences() {
        let mut decoder = Utf8Decoder::new();
        let bytes = "é€😀".as_bytes();

        let mut text = String::new();
        for byte in bytes {
            text.push_str(&decoder.decode(std::slice::from_ref(byte)));
        }
        assert_eq!(text, "é€😀");
        assert_eq!(decoder.finish(), "");
    }

    #[test]
    fn test_decoder_replaces_invalid_bytes() {
        let mut decoder = Utf8Decoder::new();
        assert_eq!(decoder.decode(b"a\xFFb\xC3"), "a\u{FFFD}b");
        assert_eq!(decoder.finish(), "\u{FFFD}");
    }

    #[test]
    fn test_pump_success_closes() {
        let (core, text, states) = recording_core();
        core.transition(ConnectionState::Connected);

        let output = Chunked {
            bytes: "hi ✓\r\n".as_bytes(),
            chunk: 3,
        };
        pump_output(output, &core, || 0);

        assert_eq!(*text.lock().unwrap(), "hi ✓\r\n");
        assert_eq!(
            *states.lock().unwrap(),
            vec![ConnectionState::Connected, ConnectionState::Closed]
        );
    }

    #[test]
    fn test_pump_still_active_closes() {
        let (core, _, _) = recording_core();
        pump_output(Cursor::new(Vec::new()), &core, || STILL_ACTIVE);
        assert_eq!(core.state(), ConnectionState::Closed);
    }

    #[test]
    fn test_pump_nonzero_exit_fails() {
        let (core, text, _) = recording_core();
        core.transition(ConnectionState::Connected);
        pump_output(Cursor::new(b"boom".to_vec()), &core, || 2);

        assert_eq!(core.state(), ConnectionState::Failed);
        let text = text.lock().unwrap();
        assert!(text.starts_with("boom"));
        assert!(text.contains("2 (0x00000002)"));
    }

    #[test]
    fn test_pump_after_close_keeps_closed() {
        let (core, text, _) = recording_core();
        core.transition(ConnectionState::Closed);
        pump_output(Cursor::new(Vec::new()), &core, || 1);

        assert_eq!(core.state(), ConnectionState::Closed);
        assert!(text.lock().unwrap().is_empty());
    }

    #[test]
    fn test_resize_clamps() {
        let connection = ConptyConnection::new(PtyOptions::new("cmd.exe"));
        connection.resize(0, 100_000);
        assert_eq!(connection.size(), (i16::MAX as u16, 1));
        connection.resize(30, 120);
        assert_eq!(connection.size(), (120, 30));
    }

    #[test]
    fn test_input_ignored_until_connected() {
        let connection = ConptyConnection::new(PtyOptions::new("cmd.exe"));
        connection.write_input("dir\r");
        assert_eq!(connection.state(), ConnectionState::Connecting);
        connection.close();
        assert_eq!(connection.state(), ConnectionState::Closed);
        connection.write_input("ignored");
    }

    #[test]
    #[cfg(not(windows))]
    fn test_launch_failure_reports_and_fails() {
        let connection = ConptyConnection::new(PtyOptions::new("sh -l"));
        let text = Arc::new(Mutex::new(String::new()));
        let sink = text.clone();
        connection.on_output(Box::new(move |chunk: &str| sink.lock().unwrap().push_str(chunk)));

        connection.start();
        assert_eq!(connection.state(), ConnectionState::Failed);
        assert_eq!(
            *text.lock().unwrap(),
            "[error 2147500033 (0x80004001) when launching `sh -l']\r\n"
        );
    }
}

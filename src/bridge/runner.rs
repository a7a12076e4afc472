//! Run a connection against the current console until it ends.

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::connection::TerminalConnection;
use super::input::{ConsoleInputReader, InputSource};
use super::state::{ConnectionState, StateCell};

/// Where connection output goes.
pub trait ConsoleSink {
    fn write_text(&mut self, text: &str) -> io::Result<()>;
}

/// Writes UTF-8 to standard output.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutSink;

impl ConsoleSink for StdoutSink {
    fn write_text(&mut self, text: &str) -> io::Result<()> {
        let mut stdout = io::stdout().lock();
        stdout.write_all(text.as_bytes())?;
        stdout.flush()
    }
}

#[cfg(windows)]
pub use console::ConsoleOutput;

#[cfg(windows)]
mod console {
    use super::*;

    use windows::Win32::Foundation::HANDLE;
    use windows::Win32::System::Console::{GetStdHandle, WriteConsoleW, STD_OUTPUT_HANDLE};

    /// Writes UTF-16 straight to the console, bypassing the output code page.
    pub struct ConsoleOutput {
        handle: HANDLE,
        wide: Vec<u16>,
    }

    // Safety: the standard output handle is process-wide
    unsafe impl Send for ConsoleOutput {}

    impl ConsoleOutput {
        pub fn stdout() -> io::Result<Self> {
            let handle = unsafe { GetStdHandle(STD_OUTPUT_HANDLE) }.map_err(io::Error::from)?;
            Ok(Self {
                handle,
                wide: Vec::new(),
            })
        }
    }

    impl ConsoleSink for ConsoleOutput {
        fn write_text(&mut self, text: &str) -> io::Result<()> {
            self.wide.clear();
            self.wide.extend(text.encode_utf16());

            let mut remaining = &self.wide[..];
            while !remaining.is_empty() {
                let mut written = 0u32;
                unsafe {
                    WriteConsoleW(self.handle, remaining, Some(&mut written), None).map_err(io::Error::from)?;
                }
                if written == 0 {
                    return Err(io::Error::new(io::ErrorKind::WriteZero, "console accepted no output"));
                }
                remaining = &remaining[(written as usize).min(remaining.len())..];
            }
            Ok(())
        }
    }
}

/// Cooperative stop flag for the input pump.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Process exit code for a finished connection.
pub fn exit_code(state: ConnectionState) -> i32 {
    if state == ConnectionState::Closed {
        0
    } else {
        1
    }
}

/// Forward console input to the connection until the source ends or the
/// token is cancelled. The token is checked after each blocking read.
fn pump_input<S: InputSource>(source: S, connection: Arc<dyn TerminalConnection>, cancel: CancelToken) {
    let mut reader = ConsoleInputReader::new(source);
    let resized = connection.clone();
    reader.set_resize_callback(move |columns, rows| {
        resized.resize(rows.max(1) as u32, columns.max(1) as u32);
    });

    loop {
        let text = reader.read();
        if cancel.is_cancelled() {
            debug!("Input pump cancelled");
            return;
        }
        match text {
            Some(text) => connection.write_input(&text),
            None => {
                warn!("Console input ended, closing connection");
                connection.close();
                return;
            }
        }
    }
}

/// Wire `connection` to the console and block until it reaches a terminal
/// state. Returns that state.
pub fn run_connection_to_completion<S, K>(
    connection: Arc<dyn TerminalConnection>,
    source: S,
    sink: K,
    cancel: CancelToken,
) -> ConnectionState
where
    S: InputSource + Send + 'static,
    K: ConsoleSink + Send + 'static,
{
    let sink = Mutex::new(sink);
    connection.on_output(Box::new(move |text: &str| {
        let mut sink = sink.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Err(e) = sink.write_text(text) {
            warn!("Console write failed: {}", e);
        }
    }));

    let finished = Arc::new(StateCell::new());
    {
        let finished = finished.clone();
        connection.on_state_changed(Box::new(move |state| {
            finished.transition(state);
        }));
    }

    // The pump blocks in console reads, so it is left to end on its own
    let pump = {
        let connection = connection.clone();
        let cancel = cancel.clone();
        thread::Builder::new()
            .name("console-input".to_string())
            .spawn(move || pump_input(source, connection, cancel))
    };
    if let Err(e) = pump {
        warn!("Failed to spawn input pump: {}", e);
    }

    connection.start();

    // Also covers a connection that settled before its handler fired
    let state = loop {
        let current = connection.state();
        if current.is_terminal() {
            break current;
        }
        if let Some(state) = finished.wait_terminal_timeout(Duration::from_millis(250)) {
            break state;
        }
    };

    cancel.cancel();
    info!("Connection finished: {:?}", state);
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::connection::{ConnectionCore, OutputHandler, StateHandler};
    use crate::bridge::input::{InputRecord, KeyRecord};
    use std::collections::VecDeque;

    /// Echoes input back as output; "q" closes, "x" fails.
    #[derive(Default)]
    struct EchoConnection {
        core: ConnectionCore,
        refuse_start: bool,
    }

    impl TerminalConnection for EchoConnection {
        fn start(&self) {
            if self.refuse_start {
                self.core.emit_output("refused\r\n");
                self.core.transition(ConnectionState::Failed);
                return;
            }
            self.core.emit_output("ready\r\n");
            self.core.transition(ConnectionState::Connected);
        }

        fn write_input(&self, data: &str) {
            if !self.core.is_connected() {
                return;
            }
            self.core.emit_output(data);
            if data.contains('q') {
                self.core.transition(ConnectionState::Closed);
            } else if data.contains('x') {
                self.core.transition(ConnectionState::Failed);
            }
        }

        fn resize(&self, _rows: u32, _columns: u32) {}

        fn close(&self) {
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

    /// Yields one keystroke per read once the connection is up, then closes.
    struct Keys {
        keys: VecDeque<char>,
        gate: Arc<dyn TerminalConnection>,
    }

    impl InputSource for Keys {
        fn read_records(&mut self, records: &mut [InputRecord]) -> io::Result<usize> {
            while self.gate.state() == ConnectionState::Connecting {
                thread::yield_now();
            }
            let Some(key) = self.keys.pop_front() else {
                return Ok(0);
            };
            records[0] = InputRecord::Key(KeyRecord {
                key_down: true,
                unicode_char: key as u16,
                ..KeyRecord::default()
            });
            Ok(1)
        }
    }

    #[derive(Clone, Default)]
    struct SharedSink(Arc<Mutex<String>>);

    impl ConsoleSink for SharedSink {
        fn write_text(&mut self, text: &str) -> io::Result<()> {
            self.0.lock().unwrap().push_str(text);
            Ok(())
        }
    }

    fn run(connection: Arc<dyn TerminalConnection>, keys: &str) -> (ConnectionState, String) {
        let sink = SharedSink::default();
        let source = Keys {
            keys: keys.chars().collect(),
            gate: connection.clone(),
        };
        let state = run_connection_to_completion(connection, source, sink.clone(), CancelToken::new());
        let text = sink.0.lock().unwrap().clone();
        (state, text)
    }

    #[test]
    fn test_runs_until_closed() {
        let (state, text) = run(Arc::new(EchoConnection::default()), "abq");
        assert_eq!(state, ConnectionState::Closed);
        assert_eq!(text, "ready\r\nabq");
        assert_eq!(exit_code(state), 0);
    }

    #[test]
    fn test_failed_connection_exit_code() {
        let (state, text) = run(Arc::new(EchoConnection::default()), "ax");
        assert_eq!(state, ConnectionState::Failed);
        assert!(text.ends_with("ax"));
        assert_eq!(exit_code(state), 1);
    }

    #[test]
    fn test_start_failure_returns_immediately() {
        let connection = Arc::new(EchoConnection {
            refuse_start: true,
            ..EchoConnection::default()
        });
        let (state, text) = run(connection, "");
        assert_eq!(state, ConnectionState::Failed);
        assert_eq!(text, "refused\r\n");
    }

    #[test]
    fn test_input_end_closes_connection() {
        let (state, text) = run(Arc::new(EchoConnection::default()), "ab");
        assert_eq!(state, ConnectionState::Closed);
        assert_eq!(text, "ready\r\nab");
    }

    #[test]
    fn test_cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}

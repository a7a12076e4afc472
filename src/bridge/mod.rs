//! Console to pseudo console bridge.
//!
//! - **input**: console input records to text (surrogate pairs, Alt codes)
//! - **state**: connection lifecycle and waiting on it
//! - **connection**: the connection trait and its conhost implementation
//! - **runner**: pumps the current console through a connection
//!
//! # Architecture
//!
//! ```text
//! console input ──> ConsoleInputReader ──> input pump ──> write_input()
//!                                                           │
//!                                                   ConptyConnection ── conhost --headless
//!                                                           │
//! console output <── ConsoleSink <── output handlers <── output thread
//! ```

pub mod connection;
pub mod input;
pub mod runner;
pub mod state;

pub use connection::{ConnectionCore, ConptyConnection, TerminalConnection, Utf8Decoder};
pub use input::{ConsoleInputReader, InputRecord, InputSource, KeyRecord};
pub use runner::{exit_code, run_connection_to_completion, CancelToken, ConsoleSink, StdoutSink};
pub use state::{ConnectionState, StateCell};

#[cfg(windows)]
pub use input::ConsoleInput;
#[cfg(windows)]
pub use runner::ConsoleOutput;

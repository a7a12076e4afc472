//! Hosting side of a pseudo console.
//!
//! - **pty**: launches a headless conhost attached to three pipes
//! - **signal**: packet writer for conhost's out-of-band signal pipe
//! - **env**: case-insensitive environment block for the launched process
//!
//! # Architecture
//!
//! ```text
//! PtySession
//! ├── input   (File, VT/keystrokes -> conhost)
//! ├── output  (File, conhost -> VT stream)
//! ├── signal  (SignalPipe<File>: resize, clear, show/hide, reparent)
//! └── process (ProcessInfo: pid, wait, exit code)
//! ```

pub mod env;
pub mod pty;
pub mod signal;

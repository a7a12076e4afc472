//! Console input to text
//!
//! Turns console input records into UTF-16 text, reassembling surrogate
//! pairs that arrive as separate key events.

use std::io;

use tracing::{debug, warn};

/// Records requested per read.
pub const INPUT_BATCH: usize = 128;

/// Alt. A key-up carrying a character is how Alt+Numpad input arrives.
pub const VK_MENU: u16 = 0x12;

const REPLACEMENT: u16 = 0xFFFD;

fn is_high_surrogate(unit: u16) -> bool {
    (0xD800..=0xDBFF).contains(&unit)
}

fn is_low_surrogate(unit: u16) -> bool {
    (0xDC00..=0xDFFF).contains(&unit)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyRecord {
    pub key_down: bool,
    pub repeat_count: u16,
    pub virtual_key_code: u16,
    pub virtual_scan_code: u16,
    pub unicode_char: u16,
    pub control_key_state: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InputRecord {
    Key(KeyRecord),
    WindowBufferSize {
        columns: i16,
        rows: i16,
    },
    #[default]
    Other,
}

/// Blocking source of console input records.
pub trait InputSource {
    /// Fill `records` and return how many were read. Zero means the source
    /// is closed.
    fn read_records(&mut self, records: &mut [InputRecord]) -> io::Result<usize>;
}

pub type ResizeCallback = Box<dyn FnMut(i16, i16) + Send>;

pub struct ConsoleInputReader<S: InputSource> {
    source: S,
    records: Vec<InputRecord>,
    pending_high: Option<u16>,
    units: Vec<u16>,
    on_resize: Option<ResizeCallback>,
}

impl<S: InputSource> ConsoleInputReader<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            records: vec![InputRecord::Other; INPUT_BATCH],
            pending_high: None,
            units: Vec::new(),
            on_resize: None,
        }
    }

    /// Called with `(columns, rows)` for every window buffer size event.
    pub fn set_resize_callback(&mut self, callback: impl FnMut(i16, i16) + Send + 'static) {
        self.on_resize = Some(Box::new(callback));
    }

    /// Block until at least one character is available. `None` once the
    /// source fails or closes.
    pub fn read(&mut self) -> Option<String> {
        while self.units.is_empty() {
            let count = match self.source.read_records(&mut self.records) {
                Ok(0) => {
                    debug!("Console input closed");
                    return None;
                }
                Ok(count) => count.min(self.records.len()),
                Err(e) => {
                    warn!("Console input read failed: {}", e);
                    return None;
                }
            };

            for index in 0..count {
                match self.records[index] {
                    InputRecord::Key(key) => self.push_key(&key),
                    InputRecord::WindowBufferSize { columns, rows } => {
                        if let Some(callback) = self.on_resize.as_mut() {
                            callback(columns, rows);
                        }
                    }
                    InputRecord::Other => {}
                }
            }
        }

        let text = String::from_utf16_lossy(&self.units);
        self.units.clear();
        Some(text)
    }

    fn push_key(&mut self, key: &KeyRecord) {
        let wanted = key.key_down || (key.virtual_key_code == VK_MENU && key.unicode_char != 0);
        if !wanted {
            return;
        }

        let unit = key.unicode_char;
        if is_high_surrogate(unit) {
            self.pending_high = Some(unit);
        } else if is_low_surrogate(unit) {
            match self.pending_high.take() {
                Some(high) => self.units.extend([high, unit]),
                None => self.units.push(REPLACEMENT),
            }
        } else if unit != 0 || key.virtual_scan_code != 0 {
            if self.pending_high.take().is_some() {
                self.units.push(REPLACEMENT);
            }
            self.units.push(unit);
        }
    }
}

#[cfg(windows)]
pub use console::ConsoleInput;

#[cfg(windows)]
mod console {
    use super::*;

    use windows::Win32::Foundation::HANDLE;
    use windows::Win32::System::Console::{
        GetConsoleMode, GetStdHandle, ReadConsoleInputW, SetConsoleMode, CONSOLE_MODE,
        ENABLE_VIRTUAL_TERMINAL_INPUT, ENABLE_WINDOW_INPUT, INPUT_RECORD, STD_INPUT_HANDLE,
    };

    const KEY_EVENT: u16 = 0x0001;
    const WINDOW_BUFFER_SIZE_EVENT: u16 = 0x0004;

    /// The process's console input handle.
    pub struct ConsoleInput {
        handle: HANDLE,
        raw: Vec<INPUT_RECORD>,
    }

    // Safety: the standard input handle is process-wide and not tied to a thread
    unsafe impl Send for ConsoleInput {}

    impl ConsoleInput {
        pub fn stdin() -> io::Result<Self> {
            let handle = unsafe { GetStdHandle(STD_INPUT_HANDLE) }.map_err(io::Error::from)?;
            Ok(Self {
                handle,
                raw: Vec::new(),
            })
        }

        /// Deliver keys as VT sequences and report buffer resizes. Returns
        /// the previous mode for [`ConsoleInput::restore_mode`].
        pub fn enable_vt_input(&self) -> io::Result<u32> {
            let mut mode = CONSOLE_MODE::default();
            unsafe {
                GetConsoleMode(self.handle, &mut mode).map_err(io::Error::from)?;
                SetConsoleMode(self.handle, mode | ENABLE_VIRTUAL_TERMINAL_INPUT | ENABLE_WINDOW_INPUT)
                    .map_err(io::Error::from)?;
            }
            Ok(mode.0)
        }

        pub fn restore_mode(&self, mode: u32) -> io::Result<()> {
            unsafe { SetConsoleMode(self.handle, CONSOLE_MODE(mode)) }.map_err(io::Error::from)
        }
    }

    impl InputSource for ConsoleInput {
        fn read_records(&mut self, records: &mut [InputRecord]) -> io::Result<usize> {
            self.raw.resize(records.len(), INPUT_RECORD::default());
            let mut read = 0u32;
            unsafe {
                ReadConsoleInputW(self.handle, &mut self.raw, &mut read).map_err(io::Error::from)?;
            }

            let read = (read as usize).min(records.len());
            for (slot, raw) in records.iter_mut().zip(&self.raw[..read]) {
                *slot = unsafe { convert(raw) };
            }
            Ok(read)
        }
    }

    unsafe fn convert(raw: &INPUT_RECORD) -> InputRecord {
        match raw.EventType {
            KEY_EVENT => {
                let key = raw.Event.KeyEvent;
                InputRecord::Key(KeyRecord {
                    key_down: key.bKeyDown.as_bool(),
                    repeat_count: key.wRepeatCount,
                    virtual_key_code: key.wVirtualKeyCode,
                    virtual_scan_code: key.wVirtualScanCode,
                    unicode_char: key.uChar.UnicodeChar,
                    control_key_state: key.dwControlKeyState,
                })
            }
            WINDOW_BUFFER_SIZE_EVENT => {
                let size = raw.Event.WindowBufferSizeEvent.dwSize;
                InputRecord::WindowBufferSize {
                    columns: size.X,
                    rows: size.Y,
                }
            }
            _ => InputRecord::Other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Replays scripted batches, then reports closed.
    struct Scripted {
        batches: VecDeque<io::Result<Vec<InputRecord>>>,
    }

    impl Scripted {
        fn new(batches: Vec<Vec<InputRecord>>) -> Self {
            Self {
                batches: batches.into_iter().map(Ok).collect(),
            }
        }
    }

    impl InputSource for Scripted {
        fn read_records(&mut self, records: &mut [InputRecord]) -> io::Result<usize> {
            match self.batches.pop_front() {
                None => Ok(0),
                Some(Err(e)) => Err(e),
                Some(Ok(batch)) => {
                    assert!(batch.len() <= records.len());
                    records[..batch.len()].copy_from_slice(&batch);
                    Ok(batch.len())
                }
            }
        }
    }

    fn down(unit: u16) -> InputRecord {
        InputRecord::Key(KeyRecord {
            key_down: true,
            virtual_scan_code: 0x1E,
            unicode_char: unit,
            ..KeyRecord::default()
        })
    }

    fn up(virtual_key_code: u16, unit: u16) -> InputRecord {
        InputRecord::Key(KeyRecord {
            key_down: false,
            virtual_key_code,
            unicode_char: unit,
            ..KeyRecord::default()
        })
    }

    #[test]
    fn test_surrogate_pair_across_batches() {
        // U+1F600 split over two reads
        let mut reader = ConsoleInputReader::new(Scripted::new(vec![vec![down(0xD83D)], vec![down(0xDE00)]]));
        assert_eq!(reader.read().as_deref(), Some("\u{1F600}"));
        assert_eq!(reader.read(), None);
    }

    #[test]
    fn test_lone_surrogates_become_replacement() {
        let mut reader = ConsoleInputReader::new(Scripted::new(vec![vec![
            down(0xDE00),
            down(0xD83D),
            down('a' as u16),
        ]]));
        assert_eq!(reader.read().as_deref(), Some("\u{FFFD}\u{FFFD}a"));
    }

    #[test]
    fn test_key_up_filtering() {
        let mut reader = ConsoleInputReader::new(Scripted::new(vec![vec![
            up(0x41, 'x' as u16),
            up(VK_MENU, 0),
            up(VK_MENU, 0xE9),
            down('b' as u16),
        ]]));
        assert_eq!(reader.read().as_deref(), Some("\u{e9}b"));
    }

    #[test]
    fn test_nul_needs_scan_code() {
        let ctrl_space = InputRecord::Key(KeyRecord {
            key_down: true,
            virtual_scan_code: 0x39,
            unicode_char: 0,
            ..KeyRecord::default()
        });
        let bare_nul = InputRecord::Key(KeyRecord {
            key_down: true,
            ..KeyRecord::default()
        });
        let mut reader = ConsoleInputReader::new(Scripted::new(vec![vec![bare_nul], vec![ctrl_space]]));
        assert_eq!(reader.read().as_deref(), Some("\0"));
    }

    #[test]
    fn test_resize_events_reach_callback() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut reader = ConsoleInputReader::new(Scripted::new(vec![vec![
            InputRecord::WindowBufferSize { columns: 100, rows: 40 },
            InputRecord::Other,
            down('q' as u16),
        ]]));
        let sink = seen.clone();
        reader.set_resize_callback(move |columns, rows| sink.lock().unwrap().push((columns, rows)));

        assert_eq!(reader.read().as_deref(), Some("q"));
        assert_eq!(*seen.lock().unwrap(), vec![(100, 40)]);
    }

    #[test]
    fn test_source_error_ends_reading() {
        let mut reader = ConsoleInputReader::new(Scripted {
            batches: VecDeque::from(vec![Err(io::Error::new(io::ErrorKind::BrokenPipe, "gone"))]),
        });
        assert_eq!(reader.read(), None);
    }

    #[test]
    fn test_full_batch() {
        let batch: Vec<InputRecord> = (0..INPUT_BATCH).map(|i| down(b'a' as u16 + (i % 26) as u16)).collect();
        let mut reader = ConsoleInputReader::new(Scripted::new(vec![batch]));
        let text = reader.read().unwrap();
        assert_eq!(text.len(), INPUT_BATCH);
        assert!(text.starts_with("abc"));
    }
}

//! Out-of-band signal channel to a headless conhost
//!
//! conhost reads fixed-size packets from the pipe whose handle it received
//! with `--signal`. Each packet starts with a `u16` code; the payload layout
//! depends on the code. Every packet goes out in a single `write` so the
//! reader never observes a partial packet.

use std::io::{self, Write};

use tracing::debug;

pub const PTY_SIGNAL_SHOWHIDE_WINDOW: u16 = 1;
pub const PTY_SIGNAL_CLEAR_WINDOW: u16 = 2;
pub const PTY_SIGNAL_REPARENT_WINDOW: u16 = 3;
pub const PTY_SIGNAL_RESIZE_WINDOW: u16 = 8;

/// `[code, columns, rows]`
pub fn resize_packet(width: u16, height: u16) -> [u8; 6] {
    let mut packet = [0u8; 6];
    packet[0..2].copy_from_slice(&PTY_SIGNAL_RESIZE_WINDOW.to_ne_bytes());
    packet[2..4].copy_from_slice(&width.to_ne_bytes());
    packet[4..6].copy_from_slice(&height.to_ne_bytes());
    packet
}

pub fn show_hide_packet(show: bool) -> [u8; 4] {
    let mut packet = [0u8; 4];
    packet[0..2].copy_from_slice(&PTY_SIGNAL_SHOWHIDE_WINDOW.to_ne_bytes());
    packet[2..4].copy_from_slice(&(show as u16).to_ne_bytes());
    packet
}

/// Packed: the window handle follows the code with no padding.
pub fn reparent_packet(window: u64) -> [u8; 10] {
    let mut packet = [0u8; 10];
    packet[0..2].copy_from_slice(&PTY_SIGNAL_REPARENT_WINDOW.to_ne_bytes());
    packet[2..10].copy_from_slice(&window.to_ne_bytes());
    packet
}

/// Writer side of the signal pipe.
#[derive(Debug)]
pub struct SignalPipe<W: Write> {
    writer: W,
}

impl<W: Write> SignalPipe<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn get_ref(&self) -> &W {
        &self.writer
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn send(&mut self, packet: &[u8]) -> io::Result<()> {
        let written = self.writer.write(packet)?;
        if written != packet.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("short signal write: {} of {} bytes", written, packet.len()),
            ));
        }
        self.writer.flush()
    }

    pub fn resize_window(&mut self, width: u16, height: u16) -> io::Result<()> {
        debug!("Signal resize {}x{}", width, height);
        self.send(&resize_packet(width, height))
    }

    pub fn clear_window(&mut self) -> io::Result<()> {
        self.send(&PTY_SIGNAL_CLEAR_WINDOW.to_ne_bytes())
    }

    pub fn show_hide_window(&mut self, show: bool) -> io::Result<()> {
        self.send(&show_hide_packet(show))
    }

    pub fn reparent_window(&mut self, window: u64) -> io::Result<()> {
        self.send(&reparent_packet(window))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Records each `write` call separately.
    #[derive(Default)]
    struct RecordingWriter {
        writes: Vec<Vec<u8>>,
        limit: Option<usize>,
    }

    impl Write for RecordingWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let n = self.limit.map_or(buf.len(), |limit| limit.min(buf.len()));
            self.writes.push(buf[..n].to_vec());
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn u16s(bytes: &[u8]) -> Vec<u16> {
        bytes
            .chunks_exact(2)
            .map(|pair| u16::from_ne_bytes([pair[0], pair[1]]))
            .collect()
    }

    #[test]
    fn test_resize_is_one_six_byte_write() {
        let mut pipe = SignalPipe::new(RecordingWriter::default());
        pipe.resize_window(80, 24).unwrap();

        let writes = &pipe.get_ref().writes;
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].len(), 6);
        assert_eq!(u16s(&writes[0]), vec![8, 80, 24]);
    }

    #[test]
    fn test_clear_and_show_hide_packets() {
        let mut pipe = SignalPipe::new(RecordingWriter::default());
        pipe.clear_window().unwrap();
        pipe.show_hide_window(true).unwrap();
        pipe.show_hide_window(false).unwrap();

        let writes = pipe.into_inner().writes;
        assert_eq!(u16s(&writes[0]), vec![PTY_SIGNAL_CLEAR_WINDOW]);
        assert_eq!(u16s(&writes[1]), vec![1, 1]);
        assert_eq!(u16s(&writes[2]), vec![1, 0]);
    }

    #[test]
    fn test_reparent_packet_is_packed() {
        let packet = reparent_packet(0x0011_2233_4455_6677);
        assert_eq!(packet.len(), 10);
        assert_eq!(u16::from_ne_bytes([packet[0], packet[1]]), PTY_SIGNAL_REPARENT_WINDOW);
        assert_eq!(&packet[2..], &0x0011_2233_4455_6677u64.to_ne_bytes());
    }

    #[test]
    fn test_short_write_is_error() {
        let mut pipe = SignalPipe::new(RecordingWriter {
            limit: Some(4),
            ..RecordingWriter::default()
        });
        let err = pipe.resize_window(120, 40).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WriteZero);
        assert_eq!(pipe.get_ref().writes.len(), 1);
    }
}

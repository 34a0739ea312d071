//! The host-facing side of I/O: everything the DOS/BIOS handler surface
//! and the `IN`/`OUT` instructions need from the outside world (stdin,
//! stdout, wall-clock date/time), behind a trait so tests can supply a
//! deterministic, non-interactive stand-in instead of the real terminal.

use std::collections::VecDeque;
use std::io::{self, BufRead, Read, Write};

use chrono::{Datelike, Local, Timelike};

/// Host I/O surface the execution unit dispatches DOS/BIOS services and
/// the `IN`/`OUT` instructions through.
pub trait MachineIo {
    /// Read one character from stdin, or `None` at end-of-input.
    fn read_char(&mut self) -> Option<u8>;

    /// Read a single line from stdin (used by `IN`'s port prompt), without
    /// the trailing newline.
    fn read_line(&mut self) -> String;

    /// Write bytes to the program-visible stdout channel.
    fn write_stdout(&mut self, bytes: &[u8]);

    /// Current date as `(year, month, day)`, for `INT 21h/AH=2Ah`.
    fn date(&self) -> (u16, u8, u8);

    /// Current time as `(hour, minute, second, centisecond)`, for
    /// `INT 21h/AH=2Ch`.
    fn time(&self) -> (u8, u8, u8, u8);
}

/// The real-world I/O surface: stdin/stdout and the host clock.
pub struct StdIo {
    stdin: io::Stdin,
}

impl StdIo {
    pub fn new() -> StdIo {
        StdIo { stdin: io::stdin() }
    }
}

impl Default for StdIo {
    fn default() -> StdIo {
        StdIo::new()
    }
}

impl MachineIo for StdIo {
    fn read_char(&mut self) -> Option<u8> {
        let mut byte = [0u8; 1];
        match self.stdin.lock().read(&mut byte) {
            Ok(1) => Some(byte[0]),
            _ => None,
        }
    }

    fn read_line(&mut self) -> String {
        let mut line = String::new();
        let _ = self.stdin.lock().read_line(&mut line);
        line.trim_end_matches(['\r', '\n']).to_string()
    }

    fn write_stdout(&mut self, bytes: &[u8]) {
        let mut stdout = io::stdout();
        let _ = stdout.write_all(bytes);
        let _ = stdout.flush();
    }

    fn date(&self) -> (u16, u8, u8) {
        let now = Local::now();
        (now.year() as u16, now.month() as u8, now.day() as u8)
    }

    fn time(&self) -> (u8, u8, u8, u8) {
        let now = Local::now();
        (
            now.hour() as u8,
            now.minute() as u8,
            now.second() as u8,
            (now.timestamp_subsec_millis() / 10) as u8,
        )
    }
}

/// An in-memory stand-in for [`StdIo`], used by tests and anywhere a
/// program's input needs to be scripted and its output captured instead
/// of touching the real terminal.
pub struct BufferIo {
    input: VecDeque<u8>,
    pub output: Vec<u8>,
    pub fixed_date: (u16, u8, u8),
    pub fixed_time: (u8, u8, u8, u8),
}

impl BufferIo {
    pub fn new(input: impl Into<Vec<u8>>) -> BufferIo {
        BufferIo {
            input: VecDeque::from(input.into()),
            output: Vec::new(),
            fixed_date: (1980, 1, 1),
            fixed_time: (0, 0, 0, 0),
        }
    }

    pub fn output_string(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }
}

impl Default for BufferIo {
    fn default() -> BufferIo {
        BufferIo::new(Vec::new())
    }
}

impl MachineIo for BufferIo {
    fn read_char(&mut self) -> Option<u8> {
        self.input.pop_front()
    }

    fn read_line(&mut self) -> String {
        let mut line = Vec::new();
        while let Some(byte) = self.input.pop_front() {
            if byte == b'\n' {
                break;
            }
            line.push(byte);
        }
        String::from_utf8_lossy(&line)
            .trim_end_matches('\r')
            .to_string()
    }

    fn write_stdout(&mut self, bytes: &[u8]) {
        self.output.extend_from_slice(bytes);
    }

    fn date(&self) -> (u16, u8, u8) {
        self.fixed_date
    }

    fn time(&self) -> (u8, u8, u8, u8) {
        self.fixed_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_io_reads_characters_in_order() {
        let mut io = BufferIo::new(*b"AB");
        assert_eq!(io.read_char(), Some(b'A'));
        assert_eq!(io.read_char(), Some(b'B'));
        assert_eq!(io.read_char(), None);
    }

    #[test]
    fn buffer_io_reads_a_line_without_the_newline() {
        let mut io = BufferIo::new(*b"42\nrest");
        assert_eq!(io.read_line(), "42");
        assert_eq!(io.read_char(), Some(b'r'));
    }

    #[test]
    fn buffer_io_captures_stdout_writes() {
        let mut io = BufferIo::default();
        io.write_stdout(b"HI");
        assert_eq!(io.output_string(), "HI");
    }
}

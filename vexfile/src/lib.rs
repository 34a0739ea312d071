//! The on-disk and in-memory container handed from the assembler to the
//! loader: one relocated image per segment plus the entry point execution
//! should start at.
//!
//! A [`Slot`](vcpu::Slot) is a decoded, symbolic unit (a resolved
//! `Instruction` or a lone data byte), not a run of raw machine-code bytes,
//! so this format has nothing in common with a flat binary beyond the file
//! extension: it is serialized with `serde`/`bincode` rather than packed by
//! hand.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use vcpu::{SegmentId, Slot};

/// One segment's assembled slots, relocated to a fixed paragraph base
/// address and tagged with the segment register it is meant to be loaded
/// under.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SegmentImage {
    pub register: SegmentId,
    pub base: u16,
    pub slots: Vec<Slot>,
}

impl SegmentImage {
    pub fn new(register: SegmentId, base: u16, slots: Vec<Slot>) -> SegmentImage {
        SegmentImage { register, base, slots }
    }
}

/// A complete assembled program: every segment's image, plus where
/// execution should begin.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Executable {
    pub segments: Vec<SegmentImage>,
    pub entry_segment: SegmentId,
    pub entry_offset: u16,
}

impl Executable {
    pub fn new(
        segments: Vec<SegmentImage>,
        entry_segment: SegmentId,
        entry_offset: u16,
    ) -> Executable {
        Executable { segments, entry_segment, entry_offset }
    }

    pub fn segment(&self, register: SegmentId) -> Option<&SegmentImage> {
        self.segments.iter().find(|image| image.register == register)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed executable: {0}")]
    Decode(#[from] bincode::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

pub fn read<R: Read>(reader: R) -> Result<Executable> {
    Ok(bincode::deserialize_from(reader)?)
}

pub fn write<W: Write>(writer: W, executable: &Executable) -> Result<()> {
    bincode::serialize_into(writer, executable)?;
    Ok(())
}

pub trait ReadVexExt: Read + Sized {
    fn read_vex(self) -> Result<Executable> {
        read(self)
    }
}

impl<R: Read + Sized> ReadVexExt for R {}

pub trait WriteVexExt: Write + Sized {
    fn write_vex(self, executable: &Executable) -> Result<()> {
        write(self, executable)
    }
}

impl<W: Write + Sized> WriteVexExt for W {}

pub fn read_file<P: AsRef<Path>>(path: P) -> Result<Executable> {
    BufReader::new(File::open(path)?).read_vex()
}

pub fn write_file<P: AsRef<Path>>(path: P, executable: &Executable) -> Result<()> {
    BufWriter::new(File::create(path)?).write_vex(executable)
}

#[cfg(test)]
mod test;

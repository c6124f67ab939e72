//! Save-state files.
//!
//! Layout, all integers little-endian:
//!
//! ```text
//! "CHST"  u8 version  u16 name_len  name  u32 data_len  data  u32 frame_len  frame
//! ```

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use cyclehost_core::snapshot::MachineState;
use thiserror::Error;

const MAGIC: &[u8; 4] = b"CHST";
const VERSION: u8 = 1;

/// Upper bound on either payload; guards allocation on corrupt input.
const MAX_SECTION: u32 = 64 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum StateFileError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("not a save-state file")]
    BadMagic,

    #[error("unsupported save-state version {0}")]
    Version(u8),

    #[error("save state is for {found}, not {expected}")]
    WrongMachine { expected: String, found: String },

    #[error("save-state section of {0} bytes is implausibly large")]
    TooLarge(u32),
}

pub fn write(path: &Path, machine: &str, state: &MachineState) -> Result<(), StateFileError> {
    let mut out = BufWriter::new(File::create(path)?);
    write_to(&mut out, machine, state)?;
    out.flush()?;
    Ok(())
}

pub fn read(path: &Path, machine: &str) -> Result<MachineState, StateFileError> {
    let mut input = BufReader::new(File::open(path)?);
    read_from(&mut input, machine)
}

fn write_to(out: &mut impl Write, machine: &str, state: &MachineState) -> io::Result<()> {
    out.write_all(MAGIC)?;
    out.write_all(&[VERSION])?;
    let name = machine.as_bytes();
    out.write_all(&(name.len() as u16).to_le_bytes())?;
    out.write_all(name)?;
    write_section(out, state.as_bytes())?;
    write_section(out, state.frame())
}

fn write_section(out: &mut impl Write, bytes: &[u8]) -> io::Result<()> {
    out.write_all(&(bytes.len() as u32).to_le_bytes())?;
    out.write_all(bytes)
}

fn read_from(input: &mut impl Read, machine: &str) -> Result<MachineState, StateFileError> {
    let mut magic = [0u8; 4];
    input.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(StateFileError::BadMagic);
    }
    let mut version = [0u8; 1];
    input.read_exact(&mut version)?;
    if version[0] != VERSION {
        return Err(StateFileError::Version(version[0]));
    }

    let mut len = [0u8; 2];
    input.read_exact(&mut len)?;
    let mut name = vec![0u8; u16::from_le_bytes(len) as usize];
    input.read_exact(&mut name)?;
    let found = String::from_utf8_lossy(&name);
    if found != machine {
        return Err(StateFileError::WrongMachine {
            expected: machine.to_string(),
            found: found.into_owned(),
        });
    }

    let data = read_section(input)?;
    let frame = read_section(input)?;
    Ok(MachineState::from_parts(data, frame))
}

fn read_section(input: &mut impl Read) -> Result<Vec<u8>, StateFileError> {
    let mut len = [0u8; 4];
    input.read_exact(&mut len)?;
    let len = u32::from_le_bytes(len);
    if len > MAX_SECTION {
        return Err(StateFileError::TooLarge(len));
    }
    let mut bytes = vec![0u8; len as usize];
    input.read_exact(&mut bytes)?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MachineState {
        MachineState::from_parts(vec![1, 2, 3, 4], vec![9; 6])
    }

    #[test]
    fn file_round_trip() {
        let path = std::env::temp_dir().join("cyclehost_state_test.chst");
        write(&path, "sandbox", &sample()).unwrap();
        assert_eq!(read(&path, "sandbox").unwrap(), sample());
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn other_machine_is_rejected() {
        let mut buf = Vec::new();
        write_to(&mut buf, "sandbox", &sample()).unwrap();
        let err = read_from(&mut buf.as_slice(), "other").unwrap_err();
        assert!(matches!(err, StateFileError::WrongMachine { .. }));
    }

    #[test]
    fn garbage_is_rejected() {
        let err = read_from(&mut &b"PNG\x00\x01"[..], "sandbox").unwrap_err();
        assert!(matches!(err, StateFileError::BadMagic));
    }

    #[test]
    fn truncated_file_is_io_error() {
        let mut buf = Vec::new();
        write_to(&mut buf, "sandbox", &sample()).unwrap();
        buf.truncate(buf.len() - 2);
        let err = read_from(&mut buf.as_slice(), "sandbox").unwrap_err();
        assert!(matches!(err, StateFileError::Io(_)));
    }

    #[test]
    fn huge_section_is_rejected_before_allocating() {
        let mut buf = Vec::new();
        buf.extend_from_slice(MAGIC);
        buf.push(VERSION);
        buf.extend_from_slice(&7u16.to_le_bytes());
        buf.extend_from_slice(b"sandbox");
        buf.extend_from_slice(&u32::MAX.to_le_bytes());
        let err = read_from(&mut buf.as_slice(), "sandbox").unwrap_err();
        assert!(matches!(err, StateFileError::TooLarge(u32::MAX)));
    }
}

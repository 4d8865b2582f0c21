//! Dump models: raw device buffers with parameter access by id.

use std::fmt;

use thiserror::Error;

use crate::sysex::{self, TransferMode};

pub mod arp;
pub mod preset;
pub mod repack;
pub mod setup;

pub use arp::ArpDump;
pub use preset::PresetDump;
pub use setup::SetupDump;

/// Checksum plus EOX at the end of single-message dumps.
pub(crate) const TRAILER: usize = 2;
/// Bytes of single-message dumps not covered by the checksum at the front.
pub(crate) const SINGLE_PREAMBLE: usize = 7;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DumpKind {
    Preset,
    Setup,
    Arp,
}

impl DumpKind {
    /// Identifies a dump from the command byte of its first message.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        match bytes.get(sysex::COMMAND_OFFSET)? {
            &sysex::CMD_PRESET_DUMP => Some(Self::Preset),
            &sysex::CMD_SETUP_DUMP => Some(Self::Setup),
            &sysex::CMD_ARP_DUMP => Some(Self::Arp),
            _ => None,
        }
    }
}

impl fmt::Display for DumpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Preset => write!(f, "preset"),
            Self::Setup => write!(f, "setup"),
            Self::Arp => write!(f, "arp pattern"),
        }
    }
}

#[derive(Debug, Error)]
pub enum DumpError {
    #[error("unexpected {kind} dump length: {len} bytes")]
    Length { kind: DumpKind, len: usize },
    #[error("malformed {kind} dump at byte {offset}")]
    Framing { kind: DumpKind, offset: usize },
    #[error("not a dump")]
    UnknownKind,
    #[error("checksum mismatch in packet(s) {0:?}")]
    Checksum(Vec<u16>),
}

/// Common interface of preset, setup and arp dumps.
pub trait Dump {
    fn kind(&self) -> DumpKind;

    /// Value of a parameter, or [`crate::params::ABSENT`] if it isn't present.
    fn get_value(&self, id: i32, layer: i32) -> i32;

    /// Writes a parameter. Returns false if it isn't present or already has
    /// `value`.
    fn set_value(&mut self, id: i32, value: i32, layer: i32) -> bool;

    fn is_changed(&self) -> bool;

    /// Marks the dump as clean and forgets edit history.
    fn accept_changes(&mut self);

    fn as_bytes(&self) -> &[u8];

    /// Recomputes every checksum in the buffer.
    fn update_checksums(&mut self);

    /// Numbers of packets whose stored checksum doesn't match. Single-message
    /// dumps report packet 0.
    fn validate(&self) -> Vec<u16>;

    /// Wire messages for sending the dump, header first.
    fn messages(&self, mode: TransferMode) -> Vec<Vec<u8>>;

    fn set_device(&mut self, device: u8);
}

/// Checks the vendor preamble of a single-message dump.
pub(crate) fn check_preamble(buf: &[u8], kind: DumpKind, command: u8) -> Result<(), DumpError> {
    let expected = [sysex::SOX, sysex::MANUFACTURER, sysex::MODEL];
    if let Some(offset) = expected.iter().enumerate()
        .find(|(i, b)| buf.get(*i) != Some(b))
        .map(|(i, _)| i) {
        return Err(DumpError::Framing { kind, offset })
    }
    if buf.get(4) != Some(&sysex::EDITOR) {
        return Err(DumpError::Framing { kind, offset: 4 })
    }
    if buf.get(sysex::COMMAND_OFFSET) != Some(&command) {
        return Err(DumpError::Framing { kind, offset: sysex::COMMAND_OFFSET })
    }
    if buf.last() != Some(&sysex::EOX) {
        return Err(DumpError::Framing { kind, offset: buf.len().saturating_sub(1) })
    }
    Ok(())
}

/// Checksum of a single-message dump body.
pub(crate) fn single_checksum(buf: &[u8]) -> u8 {
    crate::checksum::checksum(&buf[SINGLE_PREAMBLE..buf.len() - TRAILER])
}

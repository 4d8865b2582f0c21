//! Setup dumps: device-wide settings with per-channel sections sized by
//! counters in the dump itself.

use crate::codec;
use crate::idmap::{SetupLayout, SETUP_COUNTS, SETUP_NAME_OFFSET};
use crate::params::{ABSENT, SETUP_NAME};
use crate::sysex::{self, TransferMode};

use super::{Dump, DumpError, DumpKind, TRAILER};

/// A setup (multi) dump. Section sizes are read from the dump itself.
#[derive(Debug)]
pub struct SetupDump {
    buf: Vec<u8>,
    layout: SetupLayout,
    name: String,
    changed: bool,
}

impl SetupDump {
    /// An all-zero setup for hardware with `channels` MIDI channels.
    pub fn new(channels: usize) -> Self {
        let layout = SetupLayout::standard(channels);
        let mut buf = vec![0; layout.dump_len()];
        buf[..7].copy_from_slice(&[sysex::SOX, sysex::MANUFACTURER, sysex::MODEL, 0,
            sysex::EDITOR, sysex::CMD_SETUP_DUMP, sysex::SINGLE_DUMP]);
        for (i, count) in layout.counts().into_iter().enumerate() {
            codec::write_pair(&mut buf, SETUP_COUNTS + 2 * i, count as i32);
        }
        let len = buf.len();
        buf[len - 1] = sysex::EOX;
        let mut dump = Self { buf, layout, name: String::new(), changed: false };
        dump.update_checksums();
        dump
    }

    pub fn from_bytes(buf: Vec<u8>) -> Result<Self, DumpError> {
        super::check_preamble(&buf, DumpKind::Setup, sysex::CMD_SETUP_DUMP)?;
        if buf.get(sysex::MODE_OFFSET) != Some(&sysex::SINGLE_DUMP) {
            return Err(DumpError::Framing { kind: DumpKind::Setup, offset: sysex::MODE_OFFSET })
        }
        let layout = SetupLayout::parse(&buf)
            .ok_or(DumpError::Length { kind: DumpKind::Setup, len: buf.len() })?;
        let name = read_name(&buf);
        Ok(Self { buf, layout, name, changed: false })
    }

    pub fn channels(&self) -> usize {
        self.layout.channels
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

fn read_name(buf: &[u8]) -> String {
    sysex::ascii(&buf[SETUP_NAME_OFFSET..SETUP_NAME_OFFSET + 16])
}

impl Clone for SetupDump {
    fn clone(&self) -> Self {
        Self {
            buf: self.buf.clone(),
            layout: self.layout,
            name: self.name.clone(),
            changed: false,
        }
    }
}

impl Dump for SetupDump {
    fn kind(&self) -> DumpKind {
        DumpKind::Setup
    }

    fn get_value(&self, id: i32, layer: i32) -> i32 {
        match self.layout.map(id, layer, self.buf.len()) {
            Some(offset) if SETUP_NAME.contains(&id) => (self.buf[offset] & 0x7f) as i32,
            Some(offset) => codec::read_pair(&self.buf, offset),
            None => ABSENT,
        }
    }

    fn set_value(&mut self, id: i32, value: i32, layer: i32) -> bool {
        let Some(offset) = self.layout.map(id, layer, self.buf.len()) else {
            return false
        };
        if SETUP_NAME.contains(&id) {
            let c = (value & 0x7f) as u8;
            if self.buf[offset] == c {
                return false
            }
            self.buf[offset] = c;
            self.name = read_name(&self.buf);
        } else {
            let value = value.clamp(codec::MIN_VALUE, codec::MAX_VALUE);
            if codec::read_pair(&self.buf, offset) == value {
                return false
            }
            codec::write_pair(&mut self.buf, offset, value);
        }
        self.changed = true;
        true
    }

    fn is_changed(&self) -> bool {
        self.changed
    }

    fn accept_changes(&mut self) {
        self.changed = false;
    }

    fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    fn update_checksums(&mut self) {
        let len = self.buf.len();
        self.buf[len - TRAILER] = super::single_checksum(&self.buf);
    }

    fn validate(&self) -> Vec<u16> {
        if super::single_checksum(&self.buf) == self.buf[self.buf.len() - TRAILER] {
            vec![]
        } else {
            vec![0]
        }
    }

    fn messages(&self, _mode: TransferMode) -> Vec<Vec<u8>> {
        vec![self.buf.clone()]
    }

    fn set_device(&mut self, device: u8) {
        sysex::set_device(&mut self.buf, device);
    }
}

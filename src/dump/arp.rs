//! Arpeggiator pattern dumps, sent as a single message.

use crate::codec;
use crate::params::{ABSENT, ARP_LOOP_STEP, ARP_PATTERN_NAME, ARP_STEP_OFFSET, ARP_STEP_REPEAT};
use crate::sysex::{self, TransferMode};

use super::{Dump, DumpError, DumpKind, TRAILER};

pub const ARP_DUMP_LEN: usize = 303;
pub const STEPS: i32 = 32;

const NUMBER_OFFSET: usize = 7;
const ROM_OFFSET: usize = 9;
const LOOP_OFFSET: usize = 11;
const NAME_OFFSET: usize = 13;
const STEP_BASE: usize = 45;
const STEP_SIZE: usize = 8;

/// A user arpeggiator pattern: 32 steps of offset, velocity, duration and
/// repeat.
#[derive(Debug)]
pub struct ArpDump {
    buf: Vec<u8>,
    name: String,
    changed: bool,
}

fn offset(id: i32, step: i32) -> Option<usize> {
    if (ARP_STEP_OFFSET..=ARP_STEP_REPEAT).contains(&id) {
        if !(0..STEPS).contains(&step) {
            return None
        }
        Some(STEP_BASE + step as usize * STEP_SIZE + (id - ARP_STEP_OFFSET) as usize * 2)
    } else if id == ARP_LOOP_STEP {
        Some(LOOP_OFFSET)
    } else if ARP_PATTERN_NAME.contains(&id) {
        Some(NAME_OFFSET + 2 * (id - ARP_PATTERN_NAME.start()) as usize)
    } else {
        None
    }
}

impl ArpDump {
    pub fn new() -> Self {
        let mut buf = vec![0; ARP_DUMP_LEN];
        buf[..7].copy_from_slice(&[sysex::SOX, sysex::MANUFACTURER, sysex::MODEL, 0,
            sysex::EDITOR, sysex::CMD_ARP_DUMP, sysex::SINGLE_DUMP]);
        buf[ARP_DUMP_LEN - 1] = sysex::EOX;
        let mut dump = Self { buf, name: String::new(), changed: false };
        dump.update_checksums();
        dump
    }

    pub fn from_bytes(buf: Vec<u8>) -> Result<Self, DumpError> {
        if buf.len() != ARP_DUMP_LEN {
            return Err(DumpError::Length { kind: DumpKind::Arp, len: buf.len() })
        }
        super::check_preamble(&buf, DumpKind::Arp, sysex::CMD_ARP_DUMP)?;
        if buf[sysex::MODE_OFFSET] != sysex::SINGLE_DUMP {
            return Err(DumpError::Framing { kind: DumpKind::Arp, offset: sysex::MODE_OFFSET })
        }
        let name = read_name(&buf);
        Ok(Self { buf, name, changed: false })
    }

    pub fn number(&self) -> i32 {
        codec::read_pair(&self.buf, NUMBER_OFFSET)
    }

    pub fn rom(&self) -> i32 {
        codec::read_pair(&self.buf, ROM_OFFSET)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn move_to(&mut self, number: i32, rom: i32) {
        codec::write_pair(&mut self.buf, NUMBER_OFFSET, number);
        codec::write_pair(&mut self.buf, ROM_OFFSET, rom);
        self.changed = true;
    }
}

impl Default for ArpDump {
    fn default() -> Self {
        Self::new()
    }
}

fn read_name(buf: &[u8]) -> String {
    let chars: Vec<u8> = (0..16).map(|i| buf[NAME_OFFSET + 2 * i]).collect();
    sysex::ascii(&chars)
}

impl Clone for ArpDump {
    fn clone(&self) -> Self {
        Self { buf: self.buf.clone(), name: self.name.clone(), changed: false }
    }
}

impl Dump for ArpDump {
    fn kind(&self) -> DumpKind {
        DumpKind::Arp
    }

    fn get_value(&self, id: i32, layer: i32) -> i32 {
        match offset(id, layer) {
            Some(o) if ARP_PATTERN_NAME.contains(&id) => (self.buf[o] & 0x7f) as i32,
            Some(o) => codec::read_pair(&self.buf, o),
            None => ABSENT,
        }
    }

    fn set_value(&mut self, id: i32, value: i32, layer: i32) -> bool {
        let Some(o) = offset(id, layer) else {
            return false
        };
        let value = if ARP_PATTERN_NAME.contains(&id) {
            value & 0x7f
        } else {
            value.clamp(codec::MIN_VALUE, codec::MAX_VALUE)
        };
        if self.get_value(id, layer) == value {
            return false
        }
        codec::write_pair(&mut self.buf, o, value);
        if ARP_PATTERN_NAME.contains(&id) {
            self.name = read_name(&self.buf);
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
        self.buf[ARP_DUMP_LEN - TRAILER] = super::single_checksum(&self.buf);
    }

    fn validate(&self) -> Vec<u16> {
        if super::single_checksum(&self.buf) == self.buf[ARP_DUMP_LEN - TRAILER] {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::*;

    #[test]
    fn test_step_offsets() {
        assert_eq!(offset(ARP_STEP_OFFSET, 0), Some(45));
        assert_eq!(offset(ARP_STEP_REPEAT, 0), Some(51));
        assert_eq!(offset(ARP_STEP_VELOCITY, 31), Some(45 + 31 * 8 + 2));
        assert_eq!(offset(ARP_STEP_REPEAT, 31), Some(ARP_DUMP_LEN - 4));
        assert_eq!(offset(ARP_STEP_OFFSET, 32), None);
        assert_eq!(offset(6, 0), None);
    }

    #[test]
    fn test_values() {
        let mut a = ArpDump::new();
        assert!(a.validate().is_empty());
        assert!(a.set_value(ARP_STEP_OFFSET, -12, 3));
        assert!(!a.set_value(ARP_STEP_OFFSET, -12, 3));
        assert!(a.set_value(ARP_LOOP_STEP, 7, NO_LAYER));
        assert_eq!(a.get_value(ARP_STEP_OFFSET, 3), -12);
        assert_eq!(a.get_value(ARP_LOOP_STEP, NO_LAYER), 7);
        assert_eq!(a.get_value(ARP_STEP_DURATION, 40), ABSENT);
        assert_eq!(a.validate(), vec![0]);
        a.update_checksums();
        assert!(a.validate().is_empty());
    }

    #[test]
    fn test_name_and_location() {
        let mut a = ArpDump::new();
        for (i, c) in "Trance".bytes().enumerate() {
            a.set_value(*ARP_PATTERN_NAME.start() + i as i32, c as i32, NO_LAYER);
        }
        a.move_to(12, 0);
        a.update_checksums();
        let b = ArpDump::from_bytes(a.as_bytes().to_vec()).unwrap();
        assert_eq!(b.name(), "Trance");
        assert_eq!((b.number(), b.rom()), (12, 0));
    }

    #[test]
    fn test_rejects_wrong_length() {
        assert!(matches!(ArpDump::from_bytes(vec![0xf0; 40]),
            Err(DumpError::Length { len: 40, .. })));
    }
}

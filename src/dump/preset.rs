//! Preset dumps: a header message followed by checksummed data packets.

use log::{debug, info};

use crate::checksum;
use crate::codec;
use crate::history::{Edit, History, ParamStore};
use crate::idmap::{self, Variant, HEADER_SIZE};
use crate::params::{self, ABSENT, PRESET_NAME};
use crate::sysex::{self, TransferMode};

use super::repack;
use super::{Dump, DumpError, DumpKind};

/// Buffer state shared by edits and history replays.
#[derive(Debug)]
struct PresetData {
    buf: Vec<u8>,
    variant: Variant,
    name: String,
    changed: bool,
}

impl PresetData {
    fn read_name(&self) -> String {
        let chars: Vec<u8> = PRESET_NAME
            .filter_map(|id| self.read(id, params::NO_LAYER))
            .map(|c| c as u8)
            .collect();
        sysex::ascii(&chars)
    }
}

impl ParamStore for PresetData {
    fn read(&self, id: i32, layer: i32) -> Option<i32> {
        let offset = idmap::map(id, layer, self.variant, self.buf.len())?;
        if PRESET_NAME.contains(&id) {
            Some((self.buf[offset] & 0x7f) as i32)
        } else {
            Some(codec::read_pair(&self.buf, offset))
        }
    }

    fn write(&mut self, id: i32, layer: i32, value: i32) -> bool {
        let Some(offset) = idmap::map(id, layer, self.variant, self.buf.len()) else {
            return false
        };
        if PRESET_NAME.contains(&id) {
            self.buf[offset] = (value & 0x7f) as u8;
            self.buf[offset + 1] = 0;
            self.name = self.read_name();
        } else {
            codec::write_pair(&mut self.buf, offset, value);
        }
        self.changed = true;
        true
    }
}

/// A preset: the header message and data packets as they travel on the
/// wire, plus the edit history.
#[derive(Debug)]
pub struct PresetDump {
    data: PresetData,
    history: History,
}

impl PresetDump {
    /// An all-zero preset of the given variant.
    pub fn new(variant: Variant) -> Self {
        let header = repack::build_header(variant, 0, TransferMode::ClosedLoop, 0, 0);
        let payload = vec![0; variant.payload_len()];
        Self::from_valid(repack::packetize(&header, &payload, variant, TransferMode::ClosedLoop),
            variant)
    }

    /// Wraps a complete preset buffer, identifying its variant by length.
    pub fn from_bytes(buf: Vec<u8>) -> Result<Self, DumpError> {
        let variant = Variant::from_len(buf.len())
            .ok_or(DumpError::Length { kind: DumpKind::Preset, len: buf.len() })?;
        check_framing(&buf, variant)?;
        Ok(Self::from_valid(buf, variant))
    }

    /// Like `from_bytes`, but converts the buffer to `target` if it belongs to
    /// a different variant.
    pub fn with_variant(buf: Vec<u8>, target: Variant) -> Result<Self, DumpError> {
        let dump = Self::from_bytes(buf)?;
        if dump.variant() == target {
            return Ok(dump)
        }
        info!("converting preset from {:?} to {:?}", dump.variant(), target);
        let buf = repack::repack(dump.as_bytes(), dump.variant(), target);
        Self::from_bytes(buf)
    }

    fn from_valid(buf: Vec<u8>, variant: Variant) -> Self {
        let mut data = PresetData { buf, variant, name: String::new(), changed: false };
        data.name = data.read_name();
        Self { data, history: History::new() }
    }

    pub fn variant(&self) -> Variant {
        self.data.variant
    }

    pub fn number(&self) -> i32 {
        repack::header_number(&self.data.buf)
    }

    pub fn rom(&self) -> i32 {
        repack::header_rom(&self.data.buf)
    }

    pub fn name(&self) -> &str {
        &self.data.name
    }

    /// Retargets the dump to another slot. Not an undoable edit.
    pub fn move_to(&mut self, number: i32, rom: i32) {
        repack::set_header_location(&mut self.data.buf, number, rom);
        self.data.changed = true;
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    /// Reverts the last edit step and returns the values written.
    pub fn undo(&mut self) -> Vec<Edit> {
        self.history.undo(&mut self.data)
    }

    pub fn redo(&mut self) -> Vec<Edit> {
        self.history.redo(&mut self.data)
    }

    /// Stops recording history until `end_bulk_edit`.
    pub fn begin_bulk_edit(&mut self) {
        self.history.suspend();
    }

    pub fn end_bulk_edit(&mut self) {
        self.history.resume();
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    /// Copies every layer parameter of layer `src` to layer `dst`. Returns
    /// the edits that changed something; none of them are recorded.
    pub fn copy_layer(&mut self, src: i32, dst: i32) -> Vec<Edit> {
        let mut edits = Vec::new();
        if src == dst {
            return edits
        }
        self.begin_bulk_edit();
        let ids = [params::LAYER_GENERAL, params::LAYER_FILTER, params::LAYER_LFO,
            params::LAYER_ENVELOPE, params::LAYER_CORDS];
        for id in ids.into_iter().flatten() {
            let value = self.get_value(id, src);
            if value != ABSENT && self.set_value(id, value, dst) {
                edits.push(Edit { id, layer: dst, value });
            }
        }
        self.end_bulk_edit();
        debug!("copied layer {src} to {dst}: {} changes", edits.len());
        edits
    }
}

impl Clone for PresetDump {
    fn clone(&self) -> Self {
        Self::from_valid(self.data.buf.clone(), self.data.variant)
    }
}

impl Dump for PresetDump {
    fn kind(&self) -> DumpKind {
        DumpKind::Preset
    }

    fn get_value(&self, id: i32, layer: i32) -> i32 {
        self.data.read(id, layer).unwrap_or(ABSENT)
    }

    fn set_value(&mut self, id: i32, value: i32, layer: i32) -> bool {
        let value = if PRESET_NAME.contains(&id) {
            value & 0x7f
        } else {
            value.clamp(codec::MIN_VALUE, codec::MAX_VALUE)
        };
        match self.data.read(id, layer) {
            Some(current) if current != value => {
                self.history.record(&self.data, id, layer);
                self.data.write(id, layer, value)
            }
            _ => false,
        }
    }

    fn is_changed(&self) -> bool {
        self.data.changed
    }

    fn accept_changes(&mut self) {
        self.data.changed = false;
        self.history.clear();
    }

    fn as_bytes(&self) -> &[u8] {
        &self.data.buf
    }

    fn update_checksums(&mut self) {
        let variant = self.data.variant;
        for i in 0..variant.packet_count() {
            let (body, offset) = repack::packet_body(variant, i);
            self.data.buf[offset] = checksum::checksum(&self.data.buf[body]);
        }
    }

    fn validate(&self) -> Vec<u16> {
        let variant = self.data.variant;
        (0..variant.packet_count())
            .filter(|&i| {
                let (body, offset) = repack::packet_body(variant, i);
                !checksum::verify(&self.data.buf[body], self.data.buf[offset])
            })
            .map(|i| i as u16 + 1)
            .collect()
    }

    fn messages(&self, mode: TransferMode) -> Vec<Vec<u8>> {
        let variant = self.data.variant;
        let mut header = self.data.buf[..HEADER_SIZE].to_vec();
        header[sysex::MODE_OFFSET] = mode.header_byte();
        let mut messages = vec![header];
        for i in 0..variant.packet_count() {
            let mut packet = self.data.buf[repack::packet_range(variant, i)].to_vec();
            packet[sysex::MODE_OFFSET] = mode.data_byte();
            messages.push(packet);
        }
        messages
    }

    fn set_device(&mut self, device: u8) {
        let variant = self.data.variant;
        sysex::set_device(&mut self.data.buf, device);
        for i in 0..variant.packet_count() {
            let start = repack::packet_range(variant, i).start;
            sysex::set_device(&mut self.data.buf[start..], device);
        }
    }
}

/// Checks the header and every packet's preamble and terminator.
fn check_framing(buf: &[u8], variant: Variant) -> Result<(), DumpError> {
    let bad = |offset| DumpError::Framing { kind: DumpKind::Preset, offset };
    super::check_preamble(&buf[..HEADER_SIZE], DumpKind::Preset, sysex::CMD_PRESET_DUMP)?;
    if !matches!(buf[sysex::MODE_OFFSET], sysex::HEADER_CLOSED | sysex::HEADER_OPEN) {
        return Err(bad(sysex::MODE_OFFSET))
    }
    if repack::header_byte_count(buf) != variant.payload_len() {
        return Err(bad(11))
    }
    for i in 0..variant.packet_count() {
        let range = repack::packet_range(variant, i);
        let packet = &buf[range.clone()];
        super::check_preamble(packet, DumpKind::Preset, sysex::CMD_PRESET_DUMP)
            .map_err(|_| bad(range.start))?;
        if !matches!(packet[sysex::MODE_OFFSET], sysex::DATA_CLOSED | sysex::DATA_OPEN) {
            return Err(bad(range.start + sysex::MODE_OFFSET))
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::*;

    #[test]
    fn test_layer_volume_edit() {
        let mut p = PresetDump::new(Variant::STANDARD);
        assert_eq!(p.as_bytes().len(), 1607);
        assert!(p.set_value(LAYER_VOLUME, -20, 2));
        let offset = 34 + 3 * 255 + 134 + 9;
        assert_eq!(&p.as_bytes()[offset..offset + 2], &[108, 127]);
        assert_eq!(p.get_value(LAYER_VOLUME, 2), -20);
        assert_eq!(p.get_value(LAYER_VOLUME, 1), 0);
        assert!(p.is_changed());
        assert_eq!(p.validate(), vec![4]);
        p.update_checksums();
        assert!(p.validate().is_empty());
    }

    #[test]
    fn test_idempotent_set() {
        let mut p = PresetDump::new(Variant::STANDARD);
        assert!(p.set_value(FILTER_FREQ, 300, 0));
        let before = p.as_bytes().to_vec();
        assert!(!p.set_value(FILTER_FREQ, 300, 0));
        assert_eq!(p.as_bytes(), &before[..]);
        assert_eq!(p.history().undo_len(), 1);
    }

    #[test]
    fn test_absent_parameters() {
        let mut p = PresetDump::new(Variant::STANDARD);
        assert_eq!(p.get_value(PRESET_CTRL_M, NO_LAYER), ABSENT);
        assert!(!p.set_value(PRESET_CTRL_M, 5, NO_LAYER));
        assert!(!p.set_value(LAYER_VOLUME, 5, 4));
        assert!(!p.is_changed());

        let mut p = PresetDump::new(Variant::REDUCED_ARP);
        assert_eq!(p.get_value(ARP_POST_DELAY, NO_LAYER), ABSENT);
        assert!(p.set_value(ARP_PRE_DELAY, 5, NO_LAYER));
    }

    #[test]
    fn test_name_sync() {
        let mut p = PresetDump::new(Variant::STANDARD);
        for (i, c) in "Bright Pad".bytes().enumerate() {
            p.set_value(*PRESET_NAME.start() + i as i32, c as i32, NO_LAYER);
        }
        assert_eq!(p.name(), "Bright Pad");
        p.undo();
        assert_eq!(p.name(), "Bright Pa");
        assert_eq!(p.get_value(*PRESET_NAME.start(), NO_LAYER), b'B' as i32);
    }

    #[test]
    fn test_accept_changes() {
        let mut p = PresetDump::new(Variant::STANDARD);
        p.set_value(LAYER_PAN, 10, 0);
        p.undo();
        p.set_value(LAYER_PAN, 11, 0);
        p.accept_changes();
        assert!(!p.is_changed());
        assert!(!p.can_undo());
        assert!(!p.can_redo());
    }

    #[test]
    fn test_undo_goes_through_buffer() {
        let mut p = PresetDump::new(Variant::EXTRA_CONTROLLER);
        p.set_value(PRESET_CTRL_M, 7, NO_LAYER);
        p.set_value(AMP_ENV_ATK1_LEVEL, 90, 3);
        assert_eq!(p.undo().len(), 2);
        assert_eq!(p.get_value(AMP_ENV_ATK1_LEVEL, 3), 0);
        assert_eq!(p.undo(), vec![Edit { id: PRESET_CTRL_M, layer: NO_LAYER, value: 0 }]);
        assert_eq!(p.redo().len(), 1);
        assert_eq!(p.get_value(PRESET_CTRL_M, NO_LAYER), 7);
    }

    #[test]
    fn test_copy_layer() {
        let mut p = PresetDump::new(Variant::STANDARD);
        p.set_value(LAYER_INSTRUMENT, 120, 0);
        p.set_value(CORD0_AMOUNT, -50, 0);
        p.accept_changes();

        let edits = p.copy_layer(0, 3);
        assert_eq!(edits.len(), 2);
        assert_eq!(p.get_value(LAYER_INSTRUMENT, 3), 120);
        assert_eq!(p.get_value(CORD0_AMOUNT, 3), -50);
        assert!(p.is_changed());
        assert!(!p.can_undo());

        p.set_value(LAYER_PAN, 1, 3);
        assert!(p.can_undo());
    }

    #[test]
    fn test_move_to() {
        let mut p = PresetDump::new(Variant::STANDARD);
        p.move_to(130, 4);
        assert_eq!((p.number(), p.rom()), (130, 4));
        assert!(p.is_changed());
    }

    #[test]
    fn test_clone_is_clean() {
        let mut p = PresetDump::new(Variant::STANDARD);
        p.set_value(LAYER_PAN, 10, 0);
        let c = p.clone();
        assert_eq!(c.as_bytes(), p.as_bytes());
        assert!(!c.is_changed());
        assert!(!c.can_undo());
    }

    #[test]
    fn test_from_bytes() {
        let p = PresetDump::new(Variant::EXTRA_CONTROLLER);
        let q = PresetDump::from_bytes(p.as_bytes().to_vec()).unwrap();
        assert_eq!(q.variant(), Variant::EXTRA_CONTROLLER);

        assert!(matches!(PresetDump::from_bytes(vec![0; 1606]),
            Err(DumpError::Length { len: 1606, .. })));

        let mut bytes = p.as_bytes().to_vec();
        bytes[HEADER_SIZE + 255] = 0;
        assert!(matches!(PresetDump::from_bytes(bytes),
            Err(DumpError::Framing { offset, .. }) if offset == HEADER_SIZE + 255));
    }

    #[test]
    fn test_with_variant() {
        let mut p = PresetDump::new(Variant::EXTRA_CONTROLLER);
        p.set_value(PRESET_CTRL_M, 3, NO_LAYER);
        p.set_value(LAYER_FINE_TUNE, -7, 1);
        p.set_value(ARP_POST_DELAY, 12, NO_LAYER);

        let q = PresetDump::with_variant(p.as_bytes().to_vec(), Variant::REDUCED_ARP).unwrap();
        assert_eq!(q.variant(), Variant::REDUCED_ARP);
        assert_eq!(q.as_bytes().len(), 1605);
        assert_eq!(q.get_value(LAYER_FINE_TUNE, 1), -7);
        assert_eq!(q.get_value(PRESET_CTRL_M, NO_LAYER), ABSENT);
        assert_eq!(q.get_value(ARP_POST_DELAY, NO_LAYER), ABSENT);
        assert!(q.validate().is_empty());
    }

    #[test]
    fn test_messages() {
        let mut p = PresetDump::new(Variant::STANDARD);
        p.set_device(9);
        let messages = p.messages(TransferMode::OpenLoop);
        assert_eq!(messages.len(), 8);
        assert_eq!(messages[0].len(), HEADER_SIZE);
        assert_eq!(messages[0][sysex::MODE_OFFSET], sysex::HEADER_OPEN);
        assert_eq!(messages[7].len(), 43);
        for m in &messages[1..] {
            assert_eq!(m[sysex::DEVICE_ID_OFFSET], 9);
            assert_eq!(m[sysex::MODE_OFFSET], sysex::DATA_OPEN);
        }
        assert_eq!(messages.concat().len(), p.as_bytes().len());
    }
}
